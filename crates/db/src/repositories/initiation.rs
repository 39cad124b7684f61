use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use procura_core::domain::approval::{
    ApprovalId, ApprovalPair, ApprovalRecord, ApprovalSlot, ApprovalStatus,
};
use procura_core::domain::initiation::{
    Initiation, InitiationId, InitiationStatus, PurchaseType, SupplierDetails, SupplierLocation,
};
use procura_core::domain::user::UserId;

use super::{
    parse_enum, parse_optional_timestamp, parse_timestamp, parse_u32, DecisionWrite,
    DecisionWriteOutcome, InitiationRepository, RepositoryError,
};
use crate::DbPool;

const INITIATION_COLUMNS: &str = "id, requester_id, supplier_name, contact_person, contact_email,
    business_units_json, product_category, purchase_type, annual_purchase_value, currency,
    payment_terms, supplier_location, status, version, created_at, updated_at, submitted_at";

const APPROVAL_COLUMNS: &str = "id, initiation_id, slot, approver_id, status, comment, decided_by,
    acting_for, decided_at, created_at";

pub struct SqlInitiationRepository {
    pool: DbPool,
}

impl SqlInitiationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_slots(
        &self,
        id: &InitiationId,
    ) -> Result<Option<ApprovalPair>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_record WHERE initiation_id = ?"
        ))
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let records = rows.iter().map(approval_from_row).collect::<Result<Vec<_>, _>>()?;
        pair_from_records(id, records)
    }
}

fn initiation_from_row(row: &SqliteRow) -> Result<Initiation, RepositoryError> {
    let business_units_json: String = row.try_get("business_units_json")?;
    let business_units: Vec<String> = serde_json::from_str(&business_units_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid business units: {error}")))?;
    let purchase_value: Option<String> = row.try_get("annual_purchase_value")?;
    let annual_purchase_value = purchase_value
        .map(|raw| {
            Decimal::from_str(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid annual_purchase_value `{raw}`: {error}"))
            })
        })
        .transpose()?;
    let purchase_type: String = row.try_get("purchase_type")?;
    let supplier_location: String = row.try_get("supplier_location")?;
    let status: String = row.try_get("status")?;

    Ok(Initiation {
        id: InitiationId(row.try_get("id")?),
        requester_id: UserId(row.try_get("requester_id")?),
        details: SupplierDetails {
            supplier_name: row.try_get("supplier_name")?,
            contact_person: row.try_get("contact_person")?,
            contact_email: row.try_get("contact_email")?,
            business_units,
            product_category: row.try_get("product_category")?,
            purchase_type: parse_enum("purchase type", &purchase_type, PurchaseType::parse)?,
            annual_purchase_value,
            currency: row.try_get("currency")?,
            payment_terms: row.try_get("payment_terms")?,
            supplier_location: parse_enum(
                "supplier location",
                &supplier_location,
                SupplierLocation::parse,
            )?,
        },
        status: parse_enum("initiation status", &status, InitiationStatus::parse)?,
        version: parse_u32("version", row.try_get("version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        submitted_at: parse_optional_timestamp("submitted_at", row.try_get("submitted_at")?)?,
    })
}

fn approval_from_row(row: &SqliteRow) -> Result<ApprovalRecord, RepositoryError> {
    let slot: String = row.try_get("slot")?;
    let status: String = row.try_get("status")?;

    Ok(ApprovalRecord {
        id: ApprovalId(row.try_get("id")?),
        initiation_id: InitiationId(row.try_get("initiation_id")?),
        slot: parse_enum("approval slot", &slot, ApprovalSlot::parse)?,
        approver_id: UserId(row.try_get("approver_id")?),
        status: parse_enum("approval status", &status, ApprovalStatus::parse)?,
        comment: row.try_get("comment")?,
        decided_by: row.try_get::<Option<String>, _>("decided_by")?.map(UserId),
        acting_for: row.try_get::<Option<String>, _>("acting_for")?.map(UserId),
        decided_at: parse_optional_timestamp("decided_at", row.try_get("decided_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn pair_from_records(
    id: &InitiationId,
    records: Vec<ApprovalRecord>,
) -> Result<Option<ApprovalPair>, RepositoryError> {
    if records.is_empty() {
        return Ok(None);
    }

    let mut manager = None;
    let mut procurement = None;
    for record in records {
        match record.slot {
            ApprovalSlot::Manager => manager = Some(record),
            ApprovalSlot::Procurement => procurement = Some(record),
        }
    }

    match (manager, procurement) {
        (Some(manager), Some(procurement)) => Ok(Some(ApprovalPair { manager, procurement })),
        _ => Err(RepositoryError::Decode(format!(
            "initiation `{}` has an incomplete approval slot pair",
            id.0
        ))),
    }
}

fn business_units_json(details: &SupplierDetails) -> Result<String, RepositoryError> {
    serde_json::to_string(&details.business_units)
        .map_err(|error| RepositoryError::Decode(format!("invalid business units: {error}")))
}

async fn upsert_slot(
    tx: &mut Transaction<'_, Sqlite>,
    record: &ApprovalRecord,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_record (id, initiation_id, slot, approver_id, status, comment,
                                      decided_by, acting_for, decided_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(initiation_id, slot) DO UPDATE SET
             id = excluded.id,
             approver_id = excluded.approver_id,
             status = excluded.status,
             comment = excluded.comment,
             decided_by = excluded.decided_by,
             acting_for = excluded.acting_for,
             decided_at = excluded.decided_at,
             created_at = excluded.created_at",
    )
    .bind(&record.id.0)
    .bind(&record.initiation_id.0)
    .bind(record.slot.as_str())
    .bind(&record.approver_id.0)
    .bind(record.status.as_str())
    .bind(&record.comment)
    .bind(record.decided_by.as_ref().map(|id| id.0.as_str()))
    .bind(record.acting_for.as_ref().map(|id| id.0.as_str()))
    .bind(record.decided_at.map(|at| at.to_rfc3339()))
    .bind(record.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl InitiationRepository for SqlInitiationRepository {
    async fn find_by_id(&self, id: &InitiationId) -> Result<Option<Initiation>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {INITIATION_COLUMNS} FROM initiation WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(initiation_from_row).transpose()
    }

    async fn find_slots(
        &self,
        id: &InitiationId,
    ) -> Result<Option<ApprovalPair>, RepositoryError> {
        self.load_slots(id).await
    }

    async fn list(&self) -> Result<Vec<Initiation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {INITIATION_COLUMNS} FROM initiation ORDER BY created_at DESC, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(initiation_from_row).collect()
    }

    async fn save_draft(&self, initiation: Initiation) -> Result<(), RepositoryError> {
        let details = &initiation.details;

        sqlx::query(
            "INSERT INTO initiation (id, requester_id, supplier_name, contact_person, contact_email,
                                     business_units_json, product_category, purchase_type,
                                     annual_purchase_value, currency, payment_terms,
                                     supplier_location, status, version, created_at, updated_at,
                                     submitted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 supplier_name = excluded.supplier_name,
                 contact_person = excluded.contact_person,
                 contact_email = excluded.contact_email,
                 business_units_json = excluded.business_units_json,
                 product_category = excluded.product_category,
                 purchase_type = excluded.purchase_type,
                 annual_purchase_value = excluded.annual_purchase_value,
                 currency = excluded.currency,
                 payment_terms = excluded.payment_terms,
                 supplier_location = excluded.supplier_location,
                 updated_at = excluded.updated_at",
        )
        .bind(&initiation.id.0)
        .bind(&initiation.requester_id.0)
        .bind(&details.supplier_name)
        .bind(&details.contact_person)
        .bind(&details.contact_email)
        .bind(business_units_json(details)?)
        .bind(&details.product_category)
        .bind(details.purchase_type.as_str())
        .bind(details.annual_purchase_value.map(|value| value.to_string()))
        .bind(&details.currency)
        .bind(&details.payment_terms)
        .bind(details.supplier_location.as_str())
        .bind(initiation.status.as_str())
        .bind(i64::from(initiation.version))
        .bind(initiation.created_at.to_rfc3339())
        .bind(initiation.updated_at.to_rfc3339())
        .bind(initiation.submitted_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn open_slots(
        &self,
        initiation: &Initiation,
        slots: ApprovalPair,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE initiation
             SET status = ?, version = ?, updated_at = ?, submitted_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(initiation.status.as_str())
        .bind(i64::from(initiation.version))
        .bind(initiation.updated_at.to_rfc3339())
        .bind(initiation.submitted_at.map(|at| at.to_rfc3339()))
        .bind(&initiation.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(&format!(
            "INSERT INTO approval_record_history ({APPROVAL_COLUMNS}, archived_at)
             SELECT {APPROVAL_COLUMNS}, ? FROM approval_record
             WHERE initiation_id = ? AND status <> 'pending'"
        ))
        .bind(initiation.updated_at.to_rfc3339())
        .bind(&initiation.id.0)
        .execute(&mut *tx)
        .await?;

        for record in slots.records() {
            upsert_slot(&mut tx, record).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list_archived_slots(
        &self,
        id: &InitiationId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_record_history
             WHERE initiation_id = ?
             ORDER BY archived_at ASC, decided_at ASC, id"
        ))
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(approval_from_row).collect()
    }

    async fn apply_decision(
        &self,
        write: DecisionWrite,
    ) -> Result<DecisionWriteOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let decided = sqlx::query(
            "UPDATE approval_record
             SET status = ?, comment = ?, decided_by = ?, acting_for = ?, decided_at = ?
             WHERE initiation_id = ? AND slot = ? AND status = 'pending'",
        )
        .bind(write.status.as_str())
        .bind(&write.comment)
        .bind(&write.decided_by.0)
        .bind(write.acting_for.as_ref().map(|id| id.0.as_str()))
        .bind(write.decided_at.to_rfc3339())
        .bind(&write.initiation_id.0)
        .bind(write.slot.as_str())
        .execute(&mut *tx)
        .await?;

        if decided.rows_affected() == 0 {
            return Ok(DecisionWriteOutcome::SlotAlreadyDecided);
        }

        let next_version = write.expected_version + 1;
        let advanced = sqlx::query(
            "UPDATE initiation SET status = ?, version = ?, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(write.aggregate_status.as_str())
        .bind(i64::from(next_version))
        .bind(write.decided_at.to_rfc3339())
        .bind(&write.initiation_id.0)
        .bind(i64::from(write.expected_version))
        .execute(&mut *tx)
        .await?;

        if advanced.rows_affected() == 0 {
            return Ok(DecisionWriteOutcome::VersionConflict);
        }

        tx.commit().await?;
        Ok(DecisionWriteOutcome::Applied { version: next_version })
    }

    async fn compare_and_set_status(
        &self,
        id: &InitiationId,
        expected_version: u32,
        status: InitiationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE initiation SET status = ?, version = version + 1, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(status.as_str())
        .bind(at.to_rfc3339())
        .bind(&id.0)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_awaiting_decision(
        &self,
    ) -> Result<Vec<(Initiation, ApprovalPair)>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {INITIATION_COLUMNS} FROM initiation
             WHERE status IN ('submitted', 'manager_approved', 'procurement_approved')
             ORDER BY submitted_at ASC, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut awaiting = Vec::with_capacity(rows.len());
        for row in &rows {
            let initiation = initiation_from_row(row)?;
            if let Some(slots) = self.load_slots(&initiation.id).await? {
                if !slots.pending_slots().is_empty() {
                    awaiting.push((initiation, slots));
                }
            }
        }
        Ok(awaiting)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use procura_core::domain::approval::{ApprovalPair, ApprovalSlot, ApprovalStatus};
    use procura_core::domain::initiation::{
        Initiation, InitiationStatus, PurchaseType, SupplierDetails, SupplierLocation,
    };
    use procura_core::domain::user::UserId;

    use super::SqlInitiationRepository;
    use crate::repositories::{DecisionWrite, DecisionWriteOutcome, InitiationRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn details() -> SupplierDetails {
        SupplierDetails {
            supplier_name: "Karoo Logistics".to_owned(),
            contact_person: "Thandi Mokoena".to_owned(),
            contact_email: "thandi@karoo-logistics.example".to_owned(),
            business_units: vec!["Distribution".to_owned(), "Retail".to_owned()],
            product_category: "Freight".to_owned(),
            purchase_type: PurchaseType::Regular,
            annual_purchase_value: Some(Decimal::new(125_000_50, 2)),
            currency: "ZAR".to_owned(),
            payment_terms: "30 days".to_owned(),
            supplier_location: SupplierLocation::Local,
        }
    }

    async fn submitted(repo: &SqlInitiationRepository) -> (Initiation, ApprovalPair) {
        let now = Utc::now();
        let mut initiation =
            Initiation::new_draft(UserId("u-req".to_owned()), details(), now).expect("draft");
        repo.save_draft(initiation.clone()).await.expect("save draft");

        initiation.status = InitiationStatus::Submitted;
        initiation.version = 1;
        initiation.submitted_at = Some(now);
        let slots = ApprovalPair::open(
            &initiation.id,
            UserId("u-mgr".to_owned()),
            UserId("u-proc".to_owned()),
            now,
        );
        assert!(repo.open_slots(&initiation, slots.clone(), 0).await.expect("open slots"));
        (initiation, slots)
    }

    fn decision(initiation: &Initiation, slot: ApprovalSlot, version: u32) -> DecisionWrite {
        DecisionWrite {
            initiation_id: initiation.id.clone(),
            slot,
            status: ApprovalStatus::Approved,
            comment: Some("looks fine".to_owned()),
            decided_by: UserId("u-dep".to_owned()),
            acting_for: Some(UserId("u-mgr".to_owned())),
            decided_at: Utc::now(),
            expected_version: version,
            aggregate_status: InitiationStatus::ManagerApproved,
        }
    }

    #[tokio::test]
    async fn draft_round_trips_with_decimal_and_business_units() {
        let repo = SqlInitiationRepository::new(setup().await);
        let initiation = Initiation::new_draft(UserId("u-req".to_owned()), details(), Utc::now())
            .expect("draft");

        repo.save_draft(initiation.clone()).await.expect("save");
        let found = repo.find_by_id(&initiation.id).await.expect("find").expect("exists");

        assert_eq!(found.details, initiation.details);
        assert_eq!(found.status, InitiationStatus::Draft);
        assert!(repo.find_slots(&initiation.id).await.expect("slots").is_none());
    }

    #[tokio::test]
    async fn decision_applies_once_and_bumps_version() {
        let repo = SqlInitiationRepository::new(setup().await);
        let (initiation, _) = submitted(&repo).await;

        let outcome = repo
            .apply_decision(decision(&initiation, ApprovalSlot::Manager, 1))
            .await
            .expect("apply");
        assert_eq!(outcome, DecisionWriteOutcome::Applied { version: 2 });

        let slots = repo.find_slots(&initiation.id).await.expect("slots").expect("pair");
        assert_eq!(slots.manager.status, ApprovalStatus::Approved);
        assert_eq!(slots.manager.decided_by, Some(UserId("u-dep".to_owned())));
        assert_eq!(slots.manager.acting_for, Some(UserId("u-mgr".to_owned())));
        assert_eq!(slots.procurement.status, ApprovalStatus::Pending);

        let again = repo
            .apply_decision(decision(&initiation, ApprovalSlot::Manager, 2))
            .await
            .expect("apply again");
        assert_eq!(again, DecisionWriteOutcome::SlotAlreadyDecided);

        let stored = repo.find_by_id(&initiation.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, InitiationStatus::ManagerApproved);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn stale_version_rolls_back_the_slot_write() {
        let repo = SqlInitiationRepository::new(setup().await);
        let (initiation, _) = submitted(&repo).await;

        let outcome = repo
            .apply_decision(decision(&initiation, ApprovalSlot::Procurement, 0))
            .await
            .expect("apply");
        assert_eq!(outcome, DecisionWriteOutcome::VersionConflict);

        let slots = repo.find_slots(&initiation.id).await.expect("slots").expect("pair");
        assert_eq!(slots.procurement.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn reopening_slots_archives_decided_records() {
        let repo = SqlInitiationRepository::new(setup().await);
        let (mut initiation, first) = submitted(&repo).await;

        let mut rejected = decision(&initiation, ApprovalSlot::Manager, 1);
        rejected.status = ApprovalStatus::Rejected;
        rejected.aggregate_status = InitiationStatus::Rejected;
        repo.apply_decision(rejected).await.expect("reject");
        assert!(repo.list_awaiting_decision().await.expect("awaiting").is_empty());

        let later = Utc::now() + Duration::hours(2);
        initiation.status = InitiationStatus::Submitted;
        initiation.version = 3;
        initiation.submitted_at = Some(later);
        let fresh = ApprovalPair::open(
            &initiation.id,
            UserId("u-mgr".to_owned()),
            UserId("u-proc".to_owned()),
            later,
        );
        assert!(!repo.open_slots(&initiation, fresh.clone(), 1).await.expect("stale reopen"));
        assert!(repo.list_archived_slots(&initiation.id).await.expect("archive").is_empty());
        assert!(repo.open_slots(&initiation, fresh.clone(), 2).await.expect("reopen"));

        let archived = repo.list_archived_slots(&initiation.id).await.expect("archive");
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, first.manager.id);
        assert_eq!(archived[0].status, ApprovalStatus::Rejected);
        assert_eq!(archived[0].comment.as_deref(), Some("looks fine"));
        assert_eq!(archived[0].decided_by, Some(UserId("u-dep".to_owned())));

        let slots = repo.find_slots(&initiation.id).await.expect("slots").expect("pair");
        assert_eq!(slots.manager.status, ApprovalStatus::Pending);
        assert_ne!(slots.manager.id, first.manager.id);
        assert_eq!(slots.manager.id, fresh.manager.id);
        assert_eq!(repo.list_awaiting_decision().await.expect("awaiting").len(), 1);
    }

    #[tokio::test]
    async fn status_compare_and_set_requires_current_version() {
        let repo = SqlInitiationRepository::new(setup().await);
        let (initiation, _) = submitted(&repo).await;

        assert!(!repo
            .compare_and_set_status(&initiation.id, 0, InitiationStatus::Approved, Utc::now())
            .await
            .expect("stale cas"));
        assert!(repo
            .compare_and_set_status(&initiation.id, 1, InitiationStatus::Approved, Utc::now())
            .await
            .expect("cas"));

        let stored = repo.find_by_id(&initiation.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, InitiationStatus::Approved);
        assert_eq!(stored.version, 2);
    }
}
