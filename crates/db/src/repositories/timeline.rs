use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row};

use procura_core::audit::{TimelineEntry, TimelineSubject};
use procura_core::domain::user::UserId;

use super::{parse_timestamp, RepositoryError, TimelineRepository};
use crate::DbPool;

pub struct SqlTimelineRepository {
    pool: DbPool,
}

impl SqlTimelineRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<TimelineEntry, RepositoryError> {
    let kind: String = row.try_get("subject_kind")?;
    let subject_id: String = row.try_get("subject_id")?;
    let subject = TimelineSubject::from_parts(&kind, subject_id).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown timeline subject kind `{kind}`"))
    })?;
    let metadata_json: String = row.try_get("metadata_json")?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid timeline metadata: {error}")))?;

    Ok(TimelineEntry {
        id: row.try_get("id")?,
        subject,
        actor: row.try_get("actor")?,
        acting_for: row.try_get::<Option<String>, _>("acting_for")?.map(UserId),
        action: row.try_get("action")?,
        description: row.try_get("description")?,
        metadata,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

#[async_trait::async_trait]
impl TimelineRepository for SqlTimelineRepository {
    async fn append(&self, entry: TimelineEntry) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(&entry.metadata).map_err(|error| {
            RepositoryError::Decode(format!("failed to encode timeline metadata: {error}"))
        })?;

        sqlx::query(
            "INSERT INTO timeline_entry (id, subject_kind, subject_id, actor, acting_for, action,
                                         description, metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(entry.subject.kind())
        .bind(entry.subject.id())
        .bind(&entry.actor)
        .bind(entry.acting_for.as_ref().map(|id| id.0.as_str()))
        .bind(&entry.action)
        .bind(&entry.description)
        .bind(metadata_json)
        .bind(entry.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_subject(
        &self,
        subject: &TimelineSubject,
    ) -> Result<Vec<TimelineEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, subject_kind, subject_id, actor, acting_for, action, description,
                    metadata_json, occurred_at
             FROM timeline_entry
             WHERE subject_kind = ? AND subject_id = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(subject.kind())
        .bind(subject.id())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }
}
