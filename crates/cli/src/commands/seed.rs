use chrono::Utc;
use procura_db::{connect_from_config, migrations, SeedDataset, SeedResult};

use crate::commands::{
    load_config, runtime, CommandError, CommandResult, EXIT_CHECKS_FAILED, EXIT_DATABASE,
    EXIT_MIGRATION,
};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
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

        let seeded = SeedDataset::load(&pool, Utc::now())
            .await
            .map_err(|error| ("seed_execution", error.to_string(), EXIT_MIGRATION))?;

        let verification = SeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), EXIT_CHECKS_FAILED))?;

        let outcome: Result<SeedResult, CommandError> = if verification.all_present {
            Ok(seeded)
        } else {
            let message = verification_message(&verification.checks);
            Err(("seed_verification", message, EXIT_CHECKS_FAILED))
        };

        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    let users = seeded.users_seeded.iter().map(|id| format!("  - {id}")).collect::<Vec<_>>();
    format!(
        "seeded {} users:\n{}\nreminder defaults inserted: {}",
        seeded.users_seeded.len(),
        users.join("\n"),
        seeded.reminder_configurations_inserted
    )
}

fn verification_message(checks: &[(String, bool)]) -> String {
    let failed = checks
        .iter()
        .filter_map(|(check, present)| (!present).then_some(check.as_str()))
        .collect::<Vec<_>>();
    if failed.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use procura_db::SeedResult;

    use super::{summary, verification_message};

    #[test]
    fn verification_message_names_missing_checks() {
        let checks = vec![
            ("user-admin-001".to_string(), true),
            ("reminder:buyer_review_pending".to_string(), false),
            ("user-manager-001".to_string(), false),
        ];

        assert_eq!(
            verification_message(&checks),
            "seed verification failed for checks: reminder:buyer_review_pending, user-manager-001"
        );
    }

    #[test]
    fn verification_message_falls_back_without_labels() {
        let checks = vec![("user-admin-001".to_string(), true)];
        assert_eq!(verification_message(&checks), "some seed data failed to load");
    }

    #[test]
    fn summary_lists_each_user() {
        let seeded = SeedResult {
            users_seeded: vec!["user-admin-001".to_string(), "user-manager-001".to_string()],
            reminder_configurations_inserted: 0,
        };

        let text = summary(&seeded);
        assert!(text.starts_with("seeded 2 users:"));
        assert!(text.contains("  - user-manager-001"));
        assert!(text.ends_with("reminder defaults inserted: 0"));
    }
}
