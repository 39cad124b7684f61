use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use procura_core::domain::delegation::{Delegation, DelegationId, DelegationScope};
use procura_core::domain::user::UserId;

use super::{
    parse_bool_flag, parse_enum, parse_optional_timestamp, parse_timestamp, DelegationRepository,
    RepositoryError,
};
use crate::DbPool;

const DELEGATION_COLUMNS: &str = "id, delegator_id, delegate_id, scope, starts_at, ends_at,
    is_active, reason, created_by, created_at, deactivated_at";

pub struct SqlDelegationRepository {
    pool: DbPool,
}

impl SqlDelegationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn delegation_from_row(row: &SqliteRow) -> Result<Delegation, RepositoryError> {
    let scope: String = row.try_get("scope")?;

    Ok(Delegation {
        id: DelegationId(row.try_get("id")?),
        delegator_id: UserId(row.try_get("delegator_id")?),
        delegate_id: UserId(row.try_get("delegate_id")?),
        scope: parse_enum("delegation scope", &scope, DelegationScope::parse)?,
        starts_at: parse_timestamp("starts_at", row.try_get("starts_at")?)?,
        ends_at: parse_timestamp("ends_at", row.try_get("ends_at")?)?,
        is_active: parse_bool_flag("is_active", row.try_get("is_active")?)?,
        reason: row.try_get("reason")?,
        created_by: UserId(row.try_get("created_by")?),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        deactivated_at: parse_optional_timestamp("deactivated_at", row.try_get("deactivated_at")?)?,
    })
}

#[async_trait::async_trait]
impl DelegationRepository for SqlDelegationRepository {
    async fn find_by_id(&self, id: &DelegationId) -> Result<Option<Delegation>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {DELEGATION_COLUMNS} FROM delegation WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(delegation_from_row).transpose()
    }

    async fn save(&self, delegation: Delegation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO delegation (id, delegator_id, delegate_id, scope, starts_at, ends_at,
                                     is_active, reason, created_by, created_at, deactivated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 is_active = excluded.is_active,
                 reason = excluded.reason,
                 deactivated_at = excluded.deactivated_at",
        )
        .bind(&delegation.id.0)
        .bind(&delegation.delegator_id.0)
        .bind(&delegation.delegate_id.0)
        .bind(delegation.scope.as_str())
        .bind(delegation.starts_at.to_rfc3339())
        .bind(delegation.ends_at.to_rfc3339())
        .bind(i64::from(delegation.is_active))
        .bind(&delegation.reason)
        .bind(&delegation.created_by.0)
        .bind(delegation.created_at.to_rfc3339())
        .bind(delegation.deactivated_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_delegate(
        &self,
        delegate: &UserId,
    ) -> Result<Vec<Delegation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM delegation
             WHERE delegate_id = ? ORDER BY starts_at DESC, id"
        ))
        .bind(&delegate.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(delegation_from_row).collect()
    }

    async fn list_for_delegator(
        &self,
        delegator: &UserId,
    ) -> Result<Vec<Delegation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM delegation
             WHERE delegator_id = ? ORDER BY starts_at DESC, id"
        ))
        .bind(&delegator.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(delegation_from_row).collect()
    }

    async fn deactivate(
        &self,
        id: &DelegationId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE delegation SET is_active = 0, deactivated_at = ?
             WHERE id = ? AND is_active = 1",
        )
        .bind(at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
