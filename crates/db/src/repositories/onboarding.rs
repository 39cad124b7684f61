use sqlx::{sqlite::SqliteRow, Row};

use procura_core::domain::initiation::InitiationId;
use procura_core::domain::onboarding::{
    AccessToken, DocumentRecord, Onboarding, OnboardingId, OnboardingStatus, OnboardingStep,
    RevisionKind, Supplier, SupplierId, SupplierStatus,
};

use super::{
    parse_enum, parse_optional_timestamp, parse_timestamp, parse_u32, OnboardingRepository,
    RepositoryError,
};
use crate::DbPool;

const ONBOARDING_COLUMNS: &str = "id, initiation_id, supplier_id, status, current_step,
    revision_count, revision_kind, revision_requested_at, revision_notes, access_token,
    email_sent_at, supplier_form_submitted_at, credit_application_submitted_at,
    rejection_reason, completed_at, created_at, updated_at";

const SUPPLIER_COLUMNS: &str = "id, initiation_id, supplier_code, name, contact_person,
    contact_email, status, created_at, updated_at";

pub struct SqlOnboardingRepository {
    pool: DbPool,
}

impl SqlOnboardingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_one(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Onboarding>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {ONBOARDING_COLUMNS} FROM onboarding WHERE {column} = ?"))
                .bind(value)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(onboarding_from_row).transpose()
    }
}

fn onboarding_from_row(row: &SqliteRow) -> Result<Onboarding, RepositoryError> {
    let status: String = row.try_get("status")?;
    let step: String = row.try_get("current_step")?;
    let revision_kind = row
        .try_get::<Option<String>, _>("revision_kind")?
        .map(|raw| parse_enum("revision kind", &raw, RevisionKind::parse))
        .transpose()?;

    Ok(Onboarding {
        id: OnboardingId(row.try_get("id")?),
        initiation_id: InitiationId(row.try_get("initiation_id")?),
        supplier_id: SupplierId(row.try_get("supplier_id")?),
        status: parse_enum("onboarding status", &status, OnboardingStatus::parse)?,
        current_step: parse_enum("onboarding step", &step, OnboardingStep::parse)?,
        revision_count: parse_u32("revision_count", row.try_get("revision_count")?)?,
        revision_kind,
        revision_requested_at: parse_optional_timestamp(
            "revision_requested_at",
            row.try_get("revision_requested_at")?,
        )?,
        revision_notes: row.try_get("revision_notes")?,
        access_token: AccessToken(row.try_get("access_token")?),
        email_sent_at: parse_optional_timestamp("email_sent_at", row.try_get("email_sent_at")?)?,
        supplier_form_submitted_at: parse_optional_timestamp(
            "supplier_form_submitted_at",
            row.try_get("supplier_form_submitted_at")?,
        )?,
        credit_application_submitted_at: parse_optional_timestamp(
            "credit_application_submitted_at",
            row.try_get("credit_application_submitted_at")?,
        )?,
        rejection_reason: row.try_get("rejection_reason")?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn supplier_from_row(row: &SqliteRow) -> Result<Supplier, RepositoryError> {
    let status: String = row.try_get("status")?;

    Ok(Supplier {
        id: SupplierId(row.try_get("id")?),
        initiation_id: InitiationId(row.try_get("initiation_id")?),
        supplier_code: row.try_get("supplier_code")?,
        name: row.try_get("name")?,
        contact_person: row.try_get("contact_person")?,
        contact_email: row.try_get("contact_email")?,
        status: parse_enum("supplier status", &status, SupplierStatus::parse)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<DocumentRecord, RepositoryError> {
    Ok(DocumentRecord {
        id: row.try_get("id")?,
        onboarding_id: OnboardingId(row.try_get("onboarding_id")?),
        category: row.try_get("category")?,
        filename: row.try_get("filename")?,
        version: parse_u32("version", row.try_get("version")?)?,
        uploaded_at: parse_timestamp("uploaded_at", row.try_get("uploaded_at")?)?,
    })
}

#[async_trait::async_trait]
impl OnboardingRepository for SqlOnboardingRepository {
    async fn provision(
        &self,
        supplier: Supplier,
        onboarding: Onboarding,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO supplier (id, initiation_id, supplier_code, name, contact_person,
                                   contact_email, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(initiation_id) DO NOTHING",
        )
        .bind(&supplier.id.0)
        .bind(&supplier.initiation_id.0)
        .bind(&supplier.supplier_code)
        .bind(&supplier.name)
        .bind(&supplier.contact_person)
        .bind(&supplier.contact_email)
        .bind(supplier.status.as_str())
        .bind(supplier.created_at.to_rfc3339())
        .bind(supplier.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO onboarding (id, initiation_id, supplier_id, status, current_step,
                                     revision_count, access_token, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&onboarding.id.0)
        .bind(&onboarding.initiation_id.0)
        .bind(&onboarding.supplier_id.0)
        .bind(onboarding.status.as_str())
        .bind(onboarding.current_step.as_str())
        .bind(i64::from(onboarding.revision_count))
        .bind(&onboarding.access_token.0)
        .bind(onboarding.created_at.to_rfc3339())
        .bind(onboarding.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn find_by_id(&self, id: &OnboardingId) -> Result<Option<Onboarding>, RepositoryError> {
        self.find_one("id", &id.0).await
    }

    async fn find_by_initiation(
        &self,
        initiation_id: &InitiationId,
    ) -> Result<Option<Onboarding>, RepositoryError> {
        self.find_one("initiation_id", &initiation_id.0).await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Onboarding>, RepositoryError> {
        self.find_one("access_token", token).await
    }

    async fn find_supplier(&self, id: &SupplierId) -> Result<Option<Supplier>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SUPPLIER_COLUMNS} FROM supplier WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(supplier_from_row).transpose()
    }

    async fn update(
        &self,
        onboarding: &Onboarding,
        supplier: &Supplier,
        expected_status: OnboardingStatus,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE onboarding SET
                 status = ?, current_step = ?, revision_count = ?, revision_kind = ?,
                 revision_requested_at = ?, revision_notes = ?, email_sent_at = ?,
                 supplier_form_submitted_at = ?, credit_application_submitted_at = ?,
                 rejection_reason = ?, completed_at = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(onboarding.status.as_str())
        .bind(onboarding.current_step.as_str())
        .bind(i64::from(onboarding.revision_count))
        .bind(onboarding.revision_kind.map(|kind| kind.as_str()))
        .bind(onboarding.revision_requested_at.map(|at| at.to_rfc3339()))
        .bind(&onboarding.revision_notes)
        .bind(onboarding.email_sent_at.map(|at| at.to_rfc3339()))
        .bind(onboarding.supplier_form_submitted_at.map(|at| at.to_rfc3339()))
        .bind(onboarding.credit_application_submitted_at.map(|at| at.to_rfc3339()))
        .bind(&onboarding.rejection_reason)
        .bind(onboarding.completed_at.map(|at| at.to_rfc3339()))
        .bind(onboarding.updated_at.to_rfc3339())
        .bind(&onboarding.id.0)
        .bind(expected_status.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE supplier SET name = ?, contact_person = ?, contact_email = ?, status = ?,
                                 updated_at = ?
             WHERE id = ?",
        )
        .bind(&supplier.name)
        .bind(&supplier.contact_person)
        .bind(&supplier.contact_email)
        .bind(supplier.status.as_str())
        .bind(supplier.updated_at.to_rfc3339())
        .bind(&supplier.id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_open(&self) -> Result<Vec<Onboarding>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ONBOARDING_COLUMNS} FROM onboarding
             WHERE status NOT IN ('approved', 'rejected')
             ORDER BY created_at ASC, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(onboarding_from_row).collect()
    }

    async fn add_document(&self, document: DocumentRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO supplier_document (id, onboarding_id, category, filename, version,
                                            uploaded_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&document.id)
        .bind(&document.onboarding_id.0)
        .bind(&document.category)
        .bind(&document.filename)
        .bind(i64::from(document.version))
        .bind(document.uploaded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_documents(
        &self,
        onboarding_id: &OnboardingId,
    ) -> Result<Vec<DocumentRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, onboarding_id, category, filename, version, uploaded_at
             FROM supplier_document
             WHERE onboarding_id = ?
             ORDER BY category, version",
        )
        .bind(&onboarding_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(document_from_row).collect()
    }
}
