use serde::{Deserialize, Serialize};

use crate::domain::approval::RejectionReason;
use crate::domain::onboarding::{Onboarding, OnboardingStatus, OnboardingStep, RevisionKind};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OnboardingEvent {
    DocumentsSubmitted,
    ReviewStarted,
    SupplierRevisionRequested { notes: String },
    FinalApprovalRequested,
    InitiatorRevisionRequested { notes: String },
    CorrectedInitiationResubmitted,
    FinalApproved,
    FinalRejected { reason: RejectionReason },
}

impl OnboardingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DocumentsSubmitted => "documents_submitted",
            Self::ReviewStarted => "review_started",
            Self::SupplierRevisionRequested { .. } => "supplier_revision_requested",
            Self::FinalApprovalRequested => "final_approval_requested",
            Self::InitiatorRevisionRequested { .. } => "initiator_revision_requested",
            Self::CorrectedInitiationResubmitted => "corrected_initiation_resubmitted",
            Self::FinalApproved => "final_approved",
            Self::FinalRejected { .. } => "final_rejected",
        }
    }

    pub fn notes(&self) -> Option<&str> {
        match self {
            Self::SupplierRevisionRequested { notes }
            | Self::InitiatorRevisionRequested { notes } => Some(notes.as_str()),
            _ => None,
        }
    }
}

/// Facts about the record beyond its status that gate a transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub revision_kind: Option<RevisionKind>,
}

impl FlowContext {
    pub fn for_onboarding(onboarding: &Onboarding) -> Self {
        Self { revision_kind: onboarding.revision_kind }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    StampDocumentsSubmitted,
    RecordRevision(RevisionKind),
    ClearRevision,
    ReopenInitiation,
    RestoreInitiation,
    MarkCompleted,
    RecordRejectionReason,
    NotifySupplier,
    NotifyRequester,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: OnboardingStatus,
    pub to: OnboardingStatus,
    pub step: OnboardingStep,
    pub event: OnboardingEvent,
    pub actions: Vec<FlowAction>,
}
