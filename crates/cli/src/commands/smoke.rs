use std::time::Instant;

use procura_core::config::{AppConfig, LoadOptions};
use procura_db::repositories::{ReminderRepository, SqlReminderRepository};
use procura_db::{connect_from_config, migrations};
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_CHECKS_FAILED};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

const AFTER_CONFIG: [&str; 4] =
    ["notifier_settings", "db_connectivity", "migration_visibility", "reminder_schedule"];

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(pass("config_validation", elapsed_ms, "configuration loaded and valid"));
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(fail("config_validation", elapsed_ms, error.to_string()));
            checks.extend(AFTER_CONFIG.into_iter().map(skipped));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let notifier_started = Instant::now();
    let delivery = match config.notifier.smtp_host.as_deref() {
        Some(host) => format!("deliveries relayed through `{host}`"),
        None => "no smtp host configured; deliveries are logged only".to_string(),
    };
    checks.push(pass(
        "notifier_settings",
        elapsed_since(notifier_started),
        format!("links point at `{}`; {delivery}", config.notifier.portal_base_url),
    ));

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(fail(
                "db_connectivity",
                0,
                format!("failed to initialize async runtime: {error}"),
            ));
            checks.extend(AFTER_CONFIG[2..].iter().copied().map(skipped));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let db_started = Instant::now();
    let pool = match runtime.block_on(connect_from_config(&config.database)) {
        Ok(pool) => {
            checks.push(pass(
                "db_connectivity",
                elapsed_since(db_started),
                format!("connected using `{}`", config.database.url),
            ));
            pool
        }
        Err(error) => {
            checks.push(fail(
                "db_connectivity",
                elapsed_since(db_started),
                format!("failed to connect: {error}"),
            ));
            checks.extend(AFTER_CONFIG[2..].iter().copied().map(skipped));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let migration_started = Instant::now();
    match runtime.block_on(migrations::run_pending(&pool)) {
        Ok(()) => checks.push(pass(
            "migration_visibility",
            elapsed_since(migration_started),
            "migrations are visible and executable",
        )),
        Err(error) => {
            checks.push(fail(
                "migration_visibility",
                elapsed_since(migration_started),
                format!("migration execution failed: {error}"),
            ));
            checks.push(skipped("reminder_schedule"));
            runtime.block_on(pool.close());
            return finalize_report(checks, elapsed_since(started));
        }
    }

    let schedule_started = Instant::now();
    let reminders = SqlReminderRepository::new(pool.clone());
    match runtime.block_on(reminders.list_configurations()) {
        Ok(configurations) => {
            let enabled = configurations.iter().filter(|config| config.is_enabled).count();
            let message = if configurations.is_empty() {
                "reminder schedule is empty; run `procura seed` to insert defaults".to_string()
            } else {
                format!("{enabled}/{} reminder configurations enabled", configurations.len())
            };
            checks.push(pass("reminder_schedule", elapsed_since(schedule_started), message));
        }
        Err(error) => checks.push(fail(
            "reminder_schedule",
            elapsed_since(schedule_started),
            format!("reminder configurations are unreadable: {error}"),
        )),
    }
    runtime.block_on(pool.close());

    finalize_report(checks, elapsed_since(started))
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed_since(started), value)),
        Err(error) => Err((elapsed_since(started), error)),
    }
}

fn elapsed_since(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn pass(name: &'static str, elapsed_ms: u64, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck { name, status: SmokeStatus::Pass, elapsed_ms, message: message.into() }
}

fn fail(name: &'static str, elapsed_ms: u64, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck { name, status: SmokeStatus::Fail, elapsed_ms, message: message.into() }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due to previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = CommandResult::report("smoke", 0, &report).output;
    CommandResult {
        exit_code: if failed { EXIT_CHECKS_FAILED } else { 0 },
        output: format!("{human}\n{machine}"),
    }
}
