use chrono::{DateTime, Datelike, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::initiation::{Initiation, InitiationId};
use crate::flows::{FlowAction, OnboardingEvent, TransitionOutcome};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OnboardingId(pub String);

impl OnboardingId {
    pub fn generate() -> Self {
        Self(format!("ONB-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupplierId(pub String);

impl SupplierId {
    pub fn generate() -> Self {
        Self(format!("SPL-{}", Uuid::new_v4().simple()))
    }
}

/// Opaque per-onboarding secret that authorizes supplier-side actions.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessToken(pub String);

impl AccessToken {
    pub fn generate() -> Self {
        let mut bytes = [0_u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    AwaitingResponse,
    DocumentsReceived,
    UnderReview,
    RevisionNeeded,
    AwaitingFinalApproval,
    Approved,
    Rejected,
}

impl OnboardingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingResponse => "awaiting_response",
            Self::DocumentsReceived => "documents_received",
            Self::UnderReview => "under_review",
            Self::RevisionNeeded => "revision_needed",
            Self::AwaitingFinalApproval => "awaiting_final_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "awaiting_response" => Some(Self::AwaitingResponse),
            "documents_received" => Some(Self::DocumentsReceived),
            "under_review" => Some(Self::UnderReview),
            "revision_needed" => Some(Self::RevisionNeeded),
            "awaiting_final_approval" => Some(Self::AwaitingFinalApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    AwaitingSupplier,
    Review,
    SupplierRevision,
    InitiatorRevision,
    FinalApproval,
    Complete,
}

impl OnboardingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingSupplier => "awaiting_supplier",
            Self::Review => "review",
            Self::SupplierRevision => "supplier_revision",
            Self::InitiatorRevision => "initiator_revision",
            Self::FinalApproval => "final_approval",
            Self::Complete => "complete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "awaiting_supplier" => Some(Self::AwaitingSupplier),
            "review" => Some(Self::Review),
            "supplier_revision" => Some(Self::SupplierRevision),
            "initiator_revision" => Some(Self::InitiatorRevision),
            "final_approval" => Some(Self::FinalApproval),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Who owes the next move after a revision request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionKind {
    SupplierDocuments,
    InitiatorCorrection,
}

impl RevisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupplierDocuments => "supplier_documents",
            Self::InitiatorCorrection => "initiator_correction",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "supplier_documents" => Some(Self::SupplierDocuments),
            "initiator_correction" => Some(Self::InitiatorCorrection),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Onboarding {
    pub id: OnboardingId,
    pub initiation_id: InitiationId,
    pub supplier_id: SupplierId,
    pub status: OnboardingStatus,
    pub current_step: OnboardingStep,
    pub revision_count: u32,
    pub revision_kind: Option<RevisionKind>,
    pub revision_requested_at: Option<DateTime<Utc>>,
    pub revision_notes: Option<String>,
    pub access_token: AccessToken,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub supplier_form_submitted_at: Option<DateTime<Utc>>,
    pub credit_application_submitted_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Onboarding {
    pub fn provision(
        initiation_id: InitiationId,
        supplier_id: SupplierId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OnboardingId::generate(),
            initiation_id,
            supplier_id,
            status: OnboardingStatus::AwaitingResponse,
            current_step: OnboardingStep::AwaitingSupplier,
            revision_count: 0,
            revision_kind: None,
            revision_requested_at: None,
            revision_notes: None,
            access_token: AccessToken::generate(),
            email_sent_at: None,
            supplier_form_submitted_at: None,
            credit_application_submitted_at: None,
            rejection_reason: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies an accepted transition and its side effects on this record.
    pub fn apply(&mut self, outcome: &TransitionOutcome, now: DateTime<Utc>) {
        self.status = outcome.to;
        self.current_step = outcome.step;
        self.updated_at = now;

        for action in &outcome.actions {
            match action {
                FlowAction::StampDocumentsSubmitted => {
                    self.supplier_form_submitted_at = Some(now);
                }
                FlowAction::RecordRevision(kind) => {
                    self.revision_count += 1;
                    self.revision_kind = Some(*kind);
                    self.revision_requested_at = Some(now);
                    self.revision_notes = outcome.event.notes().map(str::to_owned);
                }
                FlowAction::ClearRevision => self.revision_kind = None,
                FlowAction::MarkCompleted => self.completed_at = Some(now),
                FlowAction::RecordRejectionReason => {
                    if let OnboardingEvent::FinalRejected { reason } = &outcome.event {
                        self.rejection_reason = Some(reason.as_str().to_owned());
                    }
                }
                FlowAction::ReopenInitiation
                | FlowAction::RestoreInitiation
                | FlowAction::NotifySupplier
                | FlowAction::NotifyRequester => {}
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierStatus {
    Pending,
    UnderReview,
    RevisionRequested,
    AwaitingFinalApproval,
    Approved,
    Rejected,
}

impl SupplierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UnderReview => "under_review",
            Self::RevisionRequested => "revision_requested",
            Self::AwaitingFinalApproval => "awaiting_final_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "under_review" => Some(Self::UnderReview),
            "revision_requested" => Some(Self::RevisionRequested),
            "awaiting_final_approval" => Some(Self::AwaitingFinalApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn for_onboarding(status: OnboardingStatus) -> Self {
        match status {
            OnboardingStatus::AwaitingResponse => Self::Pending,
            OnboardingStatus::DocumentsReceived | OnboardingStatus::UnderReview => {
                Self::UnderReview
            }
            OnboardingStatus::RevisionNeeded => Self::RevisionRequested,
            OnboardingStatus::AwaitingFinalApproval => Self::AwaitingFinalApproval,
            OnboardingStatus::Approved => Self::Approved,
            OnboardingStatus::Rejected => Self::Rejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: SupplierId,
    pub initiation_id: InitiationId,
    pub supplier_code: String,
    pub name: String,
    pub contact_person: String,
    pub contact_email: String,
    pub status: SupplierStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Supplier {
    pub fn from_initiation(initiation: &Initiation, now: DateTime<Utc>) -> Self {
        Self {
            id: SupplierId::generate(),
            initiation_id: initiation.id.clone(),
            supplier_code: generate_supplier_code(now),
            name: initiation.details.supplier_name.clone(),
            contact_person: initiation.details.contact_person.clone(),
            contact_email: initiation.details.contact_email.clone(),
            status: SupplierStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Picks up corrected contact details from the initiation.
    pub fn refresh_from(&mut self, initiation: &Initiation, now: DateTime<Utc>) {
        self.name = initiation.details.supplier_name.clone();
        self.contact_person = initiation.details.contact_person.clone();
        self.contact_email = initiation.details.contact_email.clone();
        self.updated_at = now;
    }
}

pub fn generate_supplier_code(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("SUP-{}-{}", now.year(), suffix[..6].to_ascii_uppercase())
}

/// Metadata for a document held by the external document store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub onboarding_id: OnboardingId,
    pub category: String,
    pub filename: String,
    pub version: u32,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpload {
    pub category: String,
    pub filename: String,
}

pub const CREDIT_APPLICATION_CATEGORY: &str = "credit_application";
