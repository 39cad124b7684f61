use chrono::Utc;
use procura_db::{connect_from_config, migrations, SeedDataset};

use crate::commands::{
    load_config, runtime, CommandError, CommandResult, EXIT_DATABASE, EXIT_MIGRATION,
};

/// Applies pending migrations, then inserts any missing reminder defaults so a
/// fresh database can be scanned immediately.
pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("migrate") {
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
        let inserted = SeedDataset::seed_reminder_defaults(&pool, Utc::now())
            .await
            .map_err(|error| ("reminder_defaults", error.to_string(), EXIT_MIGRATION))?;
        pool.close().await;
        Ok::<u64, CommandError>(inserted)
    });

    match result {
        Ok(inserted) => CommandResult::success(
            "migrate",
            format!("applied pending migrations; inserted {inserted} reminder default(s)"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
