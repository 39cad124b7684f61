use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use procura_core::domain::reminder::{
    ReminderConfiguration, ReminderEventType, ReminderLog, ReminderLogStatus, ReminderThresholds,
    ReminderTier,
};

use super::{
    parse_bool_flag, parse_enum, parse_optional_timestamp, parse_timestamp, parse_u32,
    ReminderRepository, RepositoryError,
};
use crate::DbPool;

const INSERT_CONFIGURATION: &str = "INSERT INTO reminder_configuration (
        event_type, first_hours, second_hours, final_hours, is_enabled,
        subject_template, body_template, updated_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

pub struct SqlReminderRepository {
    pool: DbPool,
}

impl SqlReminderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn configuration_from_row(row: &SqliteRow) -> Result<ReminderConfiguration, RepositoryError> {
    let event_type: String = row.try_get("event_type")?;

    Ok(ReminderConfiguration {
        event_type: parse_enum("reminder event type", &event_type, ReminderEventType::parse)?,
        thresholds: ReminderThresholds {
            first_hours: parse_u32("first_hours", row.try_get("first_hours")?)?,
            second_hours: parse_u32("second_hours", row.try_get("second_hours")?)?,
            final_hours: parse_u32("final_hours", row.try_get("final_hours")?)?,
        },
        is_enabled: parse_bool_flag("is_enabled", row.try_get("is_enabled")?)?,
        subject_template: row.try_get("subject_template")?,
        body_template: row.try_get("body_template")?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<ReminderLog, RepositoryError> {
    let event_type: String = row.try_get("event_type")?;
    let status: String = row.try_get("status")?;
    let tier: i64 = row.try_get("tier")?;

    Ok(ReminderLog {
        id: row.try_get("id")?,
        event_type: parse_enum("reminder event type", &event_type, ReminderEventType::parse)?,
        reference_id: row.try_get("reference_id")?,
        tier: ReminderTier::from_ordinal(tier)
            .ok_or_else(|| RepositoryError::Decode(format!("invalid reminder tier `{tier}`")))?,
        status: parse_enum("reminder log status", &status, ReminderLogStatus::parse)?,
        recipient: row.try_get("recipient")?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        error: row.try_get("error")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
    })
}

fn bind_configuration<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    configuration: &'q ReminderConfiguration,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(configuration.event_type.as_str())
        .bind(i64::from(configuration.thresholds.first_hours))
        .bind(i64::from(configuration.thresholds.second_hours))
        .bind(i64::from(configuration.thresholds.final_hours))
        .bind(i64::from(configuration.is_enabled))
        .bind(configuration.subject_template.as_str())
        .bind(configuration.body_template.as_str())
        .bind(configuration.updated_at.to_rfc3339())
}

#[async_trait::async_trait]
impl ReminderRepository for SqlReminderRepository {
    async fn list_configurations(&self) -> Result<Vec<ReminderConfiguration>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event_type, first_hours, second_hours, final_hours, is_enabled,
                    subject_template, body_template, updated_at
             FROM reminder_configuration
             ORDER BY event_type",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(configuration_from_row).collect()
    }

    async fn save_configuration(
        &self,
        configuration: ReminderConfiguration,
    ) -> Result<(), RepositoryError> {
        let statement = format!(
            "{INSERT_CONFIGURATION}
             ON CONFLICT(event_type) DO UPDATE SET
                 first_hours = excluded.first_hours,
                 second_hours = excluded.second_hours,
                 final_hours = excluded.final_hours,
                 is_enabled = excluded.is_enabled,
                 subject_template = excluded.subject_template,
                 body_template = excluded.body_template,
                 updated_at = excluded.updated_at"
        );
        bind_configuration(sqlx::query(&statement), &configuration).execute(&self.pool).await?;

        Ok(())
    }

    async fn seed_defaults(
        &self,
        defaults: Vec<ReminderConfiguration>,
    ) -> Result<u64, RepositoryError> {
        let statement = format!("{INSERT_CONFIGURATION} ON CONFLICT(event_type) DO NOTHING");
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for configuration in &defaults {
            inserted += bind_configuration(sqlx::query(&statement), configuration)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn try_claim(&self, log: ReminderLog) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO reminder_log (id, event_type, reference_id, tier, status,
                                                 recipient, subject, body, error, created_at,
                                                 sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.id)
        .bind(log.event_type.as_str())
        .bind(&log.reference_id)
        .bind(i64::from(log.tier.ordinal()))
        .bind(log.status.as_str())
        .bind(&log.recipient)
        .bind(&log.subject)
        .bind(&log.body)
        .bind(&log.error)
        .bind(log.created_at.to_rfc3339())
        .bind(log.sent_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(
        &self,
        id: &str,
        status: ReminderLogStatus,
        error: Option<String>,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE reminder_log SET status = ?, error = ?, sent_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(error)
                .bind(sent_at.map(|at| at.to_rfc3339()))
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!("reminder log `{id}` does not exist")));
        }

        Ok(())
    }

    async fn list_logs(
        &self,
        event_type: ReminderEventType,
        reference_id: &str,
    ) -> Result<Vec<ReminderLog>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, event_type, reference_id, tier, status, recipient, subject, body, error,
                    created_at, sent_at
             FROM reminder_log
             WHERE event_type = ? AND reference_id = ?
             ORDER BY tier ASC, created_at ASC, rowid ASC",
        )
        .bind(event_type.as_str())
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }
}
