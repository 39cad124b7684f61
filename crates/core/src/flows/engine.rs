use thiserror::Error;

use crate::domain::onboarding::{OnboardingStatus, OnboardingStep, RevisionKind};
use crate::flows::states::{FlowAction, FlowContext, OnboardingEvent, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> OnboardingStatus;
    fn transition(
        &self,
        current: &OnboardingStatus,
        event: &OnboardingEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct OnboardingFlow;

impl FlowDefinition for OnboardingFlow {
    fn initial_state(&self) -> OnboardingStatus {
        OnboardingStatus::AwaitingResponse
    }

    fn transition(
        &self,
        current: &OnboardingStatus,
        event: &OnboardingEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_onboarding(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> OnboardingStatus {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &OnboardingStatus,
        event: &OnboardingEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }
}

impl Default for FlowEngine<OnboardingFlow> {
    fn default() -> Self {
        Self::new(OnboardingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid onboarding transition from {state:?} using event `{event}`")]
    InvalidTransition { state: OnboardingStatus, event: &'static str },
    #[error("revision notes are required for `{event}`")]
    MissingRevisionNotes { event: &'static str },
}

fn transition_onboarding(
    current: &OnboardingStatus,
    event: &OnboardingEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        ClearRevision, MarkCompleted, NotifyRequester, NotifySupplier, RecordRejectionReason,
        RecordRevision, ReopenInitiation, RestoreInitiation, StampDocumentsSubmitted,
    };
    use OnboardingEvent::{
        CorrectedInitiationResubmitted, DocumentsSubmitted, FinalApprovalRequested, FinalApproved,
        FinalRejected, InitiatorRevisionRequested, ReviewStarted, SupplierRevisionRequested,
    };
    use OnboardingStatus::{
        Approved, AwaitingFinalApproval, AwaitingResponse, DocumentsReceived, Rejected,
        RevisionNeeded, UnderReview,
    };

    if let Some(notes) = event.notes() {
        if notes.trim().is_empty() {
            return Err(FlowTransitionError::MissingRevisionNotes { event: event.name() });
        }
    }

    let invalid =
        || FlowTransitionError::InvalidTransition { state: *current, event: event.name() };
    let awaiting = |kind: RevisionKind| context.revision_kind == Some(kind);

    let (to, step, actions) = match (current, event) {
        (AwaitingResponse, DocumentsSubmitted) => (
            DocumentsReceived,
            OnboardingStep::Review,
            vec![StampDocumentsSubmitted, NotifyRequester],
        ),
        (RevisionNeeded, DocumentsSubmitted) if awaiting(RevisionKind::SupplierDocuments) => (
            DocumentsReceived,
            OnboardingStep::Review,
            vec![StampDocumentsSubmitted, ClearRevision, NotifyRequester],
        ),
        (DocumentsReceived, ReviewStarted) => (UnderReview, OnboardingStep::Review, Vec::new()),
        (DocumentsReceived, SupplierRevisionRequested { .. })
        | (UnderReview, SupplierRevisionRequested { .. })
        | (AwaitingFinalApproval, SupplierRevisionRequested { .. }) => (
            RevisionNeeded,
            OnboardingStep::SupplierRevision,
            vec![RecordRevision(RevisionKind::SupplierDocuments), NotifySupplier],
        ),
        (DocumentsReceived, FinalApprovalRequested) | (UnderReview, FinalApprovalRequested) => {
            (AwaitingFinalApproval, OnboardingStep::FinalApproval, Vec::new())
        }
        (UnderReview, InitiatorRevisionRequested { .. })
        | (AwaitingFinalApproval, InitiatorRevisionRequested { .. }) => (
            RevisionNeeded,
            OnboardingStep::InitiatorRevision,
            vec![
                RecordRevision(RevisionKind::InitiatorCorrection),
                ReopenInitiation,
                NotifyRequester,
            ],
        ),
        (RevisionNeeded, CorrectedInitiationResubmitted)
            if awaiting(RevisionKind::InitiatorCorrection) =>
        {
            (
                AwaitingFinalApproval,
                OnboardingStep::FinalApproval,
                vec![ClearRevision, RestoreInitiation],
            )
        }
        (AwaitingFinalApproval, FinalApproved) => {
            (Approved, OnboardingStep::Complete, vec![MarkCompleted, NotifySupplier])
        }
        (AwaitingFinalApproval, FinalRejected { .. }) => (
            Rejected,
            OnboardingStep::Complete,
            vec![MarkCompleted, RecordRejectionReason, NotifySupplier],
        ),
        _ => return Err(invalid()),
    };

    Ok(TransitionOutcome { from: *current, to, step, event: event.clone(), actions })
}
