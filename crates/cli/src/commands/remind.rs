use std::sync::Arc;

use procura_core::notifier::TracingNotifier;
use procura_db::{connect_from_config, migrations};
use procura_workflow::{ReminderEngine, ScanSummary, WorkflowContext};
use serde::Serialize;
use tracing::{info, warn};

use crate::commands::{
    load_config, runtime, CommandError, CommandResult, EXIT_DATABASE, EXIT_MIGRATION,
    EXIT_REMINDER_FAILURES,
};

#[derive(Debug, Serialize)]
struct RemindReport {
    command: &'static str,
    status: &'static str,
    summary: ScanSummary,
}

/// Runs a single reminder scan; an external scheduler decides how often.
pub fn run() -> CommandResult {
    let config = match load_config("remind") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("remind") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DATABASE))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;

        let ctx = WorkflowContext::sql(pool.clone(), Arc::new(TracingNotifier), &config);
        let summary = ReminderEngine::new(ctx)
            .run()
            .await
            .map_err(|error| ("reminder_schedule", error.to_string(), EXIT_DATABASE))?;
        pool.close().await;
        Ok::<ScanSummary, CommandError>(summary)
    });

    match result {
        Ok(summary) => report(summary),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("remind", error_class, message, exit_code)
        }
    }
}

fn report(summary: ScanSummary) -> CommandResult {
    let degraded = !summary.failures.is_empty();
    if degraded {
        warn!(
            event_name = "cli.remind.degraded",
            failed = summary.failed,
            failures = summary.failures.len(),
            "reminder scan finished with failures"
        );
    } else {
        info!(event_name = "cli.remind.completed", sent = summary.sent, "reminder scan finished");
    }

    let exit_code = if degraded { EXIT_REMINDER_FAILURES } else { 0 };
    let status = if degraded { "degraded" } else { "ok" };
    CommandResult::report("remind", exit_code, &RemindReport { command: "remind", status, summary })
}
