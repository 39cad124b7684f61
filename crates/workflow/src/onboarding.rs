use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use procura_core::audit::{TimelineEntry, TimelineSubject};
use procura_core::domain::approval::Decision;
use procura_core::domain::initiation::{Initiation, InitiationId, InitiationStatus};
use procura_core::domain::onboarding::{
    DocumentRecord, DocumentUpload, Onboarding, OnboardingId, Supplier, SupplierStatus,
    CREDIT_APPLICATION_CATEGORY,
};
use procura_core::domain::user::ActingUser;
use procura_core::errors::{ApplicationError, DomainError};
use procura_core::flows::{
    FlowAction, FlowContext, FlowEngine, OnboardingEvent, TransitionOutcome,
};

use crate::context::{Outcome, WorkflowContext};
use crate::initiations::stale_onboarding;
use crate::messages;

/// Drives an onboarding from invitation through review to its final decision.
///
/// Supplier-side calls authenticate with the onboarding's access token;
/// reviewer calls require an elevated or procurement-manager role.
#[derive(Clone)]
pub struct OnboardingService {
    ctx: WorkflowContext,
}

impl OnboardingService {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self { ctx }
    }

    pub async fn find(
        &self,
        id: &OnboardingId,
    ) -> Result<(Onboarding, Supplier), ApplicationError> {
        let onboarding = self.load(id).await?;
        let supplier = self.supplier_of(&onboarding).await?;
        Ok((onboarding, supplier))
    }

    pub async fn documents(
        &self,
        id: &OnboardingId,
    ) -> Result<Vec<DocumentRecord>, ApplicationError> {
        self.load(id).await?;
        Ok(self.ctx.onboardings.list_documents(id).await?)
    }

    pub async fn submit_documents(
        &self,
        token: &str,
        uploads: Vec<DocumentUpload>,
    ) -> Result<Outcome<Onboarding>, ApplicationError> {
        let onboarding = self.load_by_token(token).await?;
        if uploads.is_empty() {
            return Err(
                DomainError::Validation("at least one document is required".to_owned()).into()
            );
        }
        for upload in &uploads {
            validate_upload(upload)?;
        }

        let mut warnings = Vec::new();
        let actor = format!("supplier:{}", onboarding.supplier_id.0);
        let onboarding = self
            .apply_event(onboarding, OnboardingEvent::DocumentsSubmitted, &actor, &mut warnings)
            .await?;

        let records = self.version_documents(&onboarding, uploads).await?;
        for record in records {
            self.ctx.onboardings.add_document(record).await?;
        }

        Ok(Outcome::with_warnings(onboarding, warnings))
    }

    pub async fn start_review(
        &self,
        id: &OnboardingId,
        reviewer: &ActingUser,
    ) -> Result<Outcome<Onboarding>, ApplicationError> {
        self.review_event(id, reviewer, OnboardingEvent::ReviewStarted).await
    }

    pub async fn request_supplier_revision(
        &self,
        id: &OnboardingId,
        reviewer: &ActingUser,
        notes: &str,
    ) -> Result<Outcome<Onboarding>, ApplicationError> {
        let event = OnboardingEvent::SupplierRevisionRequested { notes: notes.trim().to_owned() };
        self.review_event(id, reviewer, event).await
    }

    pub async fn request_final_approval(
        &self,
        id: &OnboardingId,
        reviewer: &ActingUser,
    ) -> Result<Outcome<Onboarding>, ApplicationError> {
        self.review_event(id, reviewer, OnboardingEvent::FinalApprovalRequested).await
    }

    /// Sends the request back to its requester and reopens the initiation.
    pub async fn request_initiator_revision(
        &self,
        id: &OnboardingId,
        reviewer: &ActingUser,
        notes: &str,
    ) -> Result<Outcome<Onboarding>, ApplicationError> {
        let event = OnboardingEvent::InitiatorRevisionRequested { notes: notes.trim().to_owned() };
        self.review_event(id, reviewer, event).await
    }

    pub async fn finalize(
        &self,
        id: &OnboardingId,
        reviewer: &ActingUser,
        decision: Decision,
    ) -> Result<Outcome<Onboarding>, ApplicationError> {
        let event = match decision {
            Decision::Approve { .. } => OnboardingEvent::FinalApproved,
            Decision::Reject { reason } => OnboardingEvent::FinalRejected { reason },
        };
        self.review_event(id, reviewer, event).await
    }

    /// Records a credit application; allowed until the onboarding is decided.
    pub async fn submit_credit_application(
        &self,
        token: &str,
        filename: &str,
    ) -> Result<Outcome<DocumentRecord>, ApplicationError> {
        let mut onboarding = self.load_by_token(token).await?;
        if onboarding.status.is_terminal() {
            return Err(DomainError::InvalidState(format!(
                "onboarding `{}` is {} and no longer accepts documents",
                onboarding.id.0,
                onboarding.status.as_str()
            ))
            .into());
        }
        let upload = DocumentUpload {
            category: CREDIT_APPLICATION_CATEGORY.to_owned(),
            filename: filename.trim().to_owned(),
        };
        validate_upload(&upload)?;

        let supplier = self.supplier_of(&onboarding).await?;
        let now = self.ctx.now();
        let expected_status = onboarding.status;
        onboarding.credit_application_submitted_at = Some(now);
        onboarding.updated_at = now;
        if !self.ctx.onboardings.update(&onboarding, &supplier, expected_status).await? {
            return Err(stale_onboarding(&onboarding, expected_status));
        }

        let mut records = self.version_documents(&onboarding, vec![upload]).await?;
        let record = records.remove(0);
        self.ctx.onboardings.add_document(record.clone()).await?;

        info!(
            event_name = "onboarding.credit_application_submitted",
            onboarding_id = %onboarding.id.0,
            version = record.version,
            "credit application received"
        );

        let mut warnings = Vec::new();
        self.ctx
            .record(
                TimelineEntry::new(
                    TimelineSubject::Onboarding(onboarding.id.clone()),
                    format!("supplier:{}", supplier.id.0),
                    "credit_application_submitted",
                    format!("credit application `{}` uploaded", record.filename),
                    now,
                )
                .with_metadata("version", record.version.to_string()),
                &mut warnings,
            )
            .await;

        Ok(Outcome::with_warnings(record, warnings))
    }

    async fn review_event(
        &self,
        id: &OnboardingId,
        reviewer: &ActingUser,
        event: OnboardingEvent,
    ) -> Result<Outcome<Onboarding>, ApplicationError> {
        if !reviewer.can_review_onboarding() {
            return Err(DomainError::Unauthorized(format!(
                "user `{}` may not review onboardings",
                reviewer.id.0
            ))
            .into());
        }
        let onboarding = self.load(id).await?;

        let mut warnings = Vec::new();
        let onboarding =
            self.apply_event(onboarding, event, &reviewer.id.0, &mut warnings).await?;
        Ok(Outcome::with_warnings(onboarding, warnings))
    }

    /// Validates and persists one transition, then carries out its side effects.
    async fn apply_event(
        &self,
        mut onboarding: Onboarding,
        event: OnboardingEvent,
        actor: &str,
        warnings: &mut Vec<ApplicationError>,
    ) -> Result<Onboarding, ApplicationError> {
        let expected_status = onboarding.status;
        let transition = FlowEngine::default()
            .apply(&expected_status, &event, &FlowContext::for_onboarding(&onboarding))
            .map_err(DomainError::from)?;

        let reopens = transition.actions.contains(&FlowAction::ReopenInitiation);
        let initiation = if reopens || has_requester_notice(&transition) {
            let initiation =
                self.ctx.initiations.find_by_id(&onboarding.initiation_id).await?.ok_or_else(|| {
                    DomainError::not_found("initiation", onboarding.initiation_id.0.clone())
                })?;
            if reopens && initiation.status != InitiationStatus::SupplierEmailed {
                return Err(DomainError::InvalidState(format!(
                    "initiation `{}` is {} and cannot be returned to its requester",
                    initiation.id.0,
                    initiation.status.as_str()
                ))
                .into());
            }
            Some(initiation)
        } else {
            None
        };

        let mut supplier = self.supplier_of(&onboarding).await?;
        let now = self.ctx.now();
        onboarding.apply(&transition, now);
        supplier.status = SupplierStatus::for_onboarding(onboarding.status);
        supplier.updated_at = now;

        // Initiation CAS precedes the onboarding write; a lost write restores it.
        let reopened = match initiation.as_ref().filter(|_| reopens) {
            Some(initiation) => Some(self.reopen_initiation(initiation, now).await?),
            None => None,
        };
        if !self.ctx.onboardings.update(&onboarding, &supplier, expected_status).await? {
            if let Some(version) = reopened {
                self.restore_initiation(&onboarding.initiation_id, version, now).await?;
            }
            return Err(stale_onboarding(&onboarding, expected_status));
        }

        info!(
            event_name = "onboarding.transitioned",
            onboarding_id = %onboarding.id.0,
            initiation_id = %onboarding.initiation_id.0,
            actor_id = %actor,
            event = transition.event.name(),
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            "onboarding transition applied"
        );

        let mut entry = TimelineEntry::new(
            TimelineSubject::Onboarding(onboarding.id.clone()),
            actor,
            transition.event.name(),
            describe(&transition.event),
            now,
        )
        .with_metadata("from", transition.from.as_str())
        .with_metadata("to", transition.to.as_str());
        if let Some(notes) = transition.event.notes() {
            entry = entry.with_metadata("notes", notes);
        }
        self.ctx.record(entry, warnings).await;

        if reopened.is_some() {
            self.ctx
                .record(
                    TimelineEntry::new(
                        TimelineSubject::Initiation(onboarding.initiation_id.clone()),
                        actor,
                        "initiation_returned_for_revision",
                        "final reviewer returned the initiation for correction",
                        now,
                    ),
                    warnings,
                )
                .await;
        }

        for action in &transition.actions {
            match (action, &transition.event) {
                (
                    FlowAction::NotifySupplier,
                    OnboardingEvent::SupplierRevisionRequested { notes },
                ) => {
                    let message = messages::supplier_revision_requested(
                        &supplier,
                        &onboarding,
                        notes,
                        &self.ctx.links,
                    );
                    self.ctx.deliver(message, "supplier_revision_requested", warnings).await;
                }
                (FlowAction::NotifySupplier, OnboardingEvent::FinalApproved) => {
                    let message = messages::supplier_outcome(&supplier, true, None);
                    self.ctx.deliver(message, "supplier_approved", warnings).await;
                }
                (FlowAction::NotifySupplier, OnboardingEvent::FinalRejected { reason }) => {
                    let message =
                        messages::supplier_outcome(&supplier, false, Some(reason.as_str()));
                    self.ctx.deliver(message, "supplier_rejected", warnings).await;
                }
                (FlowAction::NotifyRequester, event) => {
                    let Some(initiation) = initiation.as_ref() else {
                        continue;
                    };
                    let Some(requester) =
                        self.ctx.users.find_by_id(&initiation.requester_id).await?
                    else {
                        continue;
                    };
                    let message = match event {
                        OnboardingEvent::InitiatorRevisionRequested { notes } => {
                            messages::initiation_returned(
                                &requester,
                                initiation,
                                notes,
                                &self.ctx.links,
                            )
                        }
                        _ => messages::submission_received(
                            &requester,
                            &supplier,
                            &onboarding,
                            &self.ctx.links,
                        ),
                    };
                    self.ctx.deliver(message, "requester_notice", warnings).await;
                }
                _ => {}
            }
        }

        Ok(onboarding)
    }

    /// Returns the initiation to its requester; yields the version it now holds.
    async fn reopen_initiation(
        &self,
        initiation: &Initiation,
        now: DateTime<Utc>,
    ) -> Result<u32, ApplicationError> {
        let reopened = self
            .ctx
            .initiations
            .compare_and_set_status(
                &initiation.id,
                initiation.version,
                InitiationStatus::ReturnedForRevision,
                now,
            )
            .await?;
        if !reopened {
            warn!(
                event_name = "initiation.reopen_skipped",
                initiation_id = %initiation.id.0,
                "initiation changed before it could be returned to its requester"
            );
            return Err(DomainError::InvalidState(format!(
                "initiation `{}` changed before it could be returned for revision",
                initiation.id.0
            ))
            .into());
        }
        Ok(initiation.version + 1)
    }

    async fn restore_initiation(
        &self,
        initiation_id: &InitiationId,
        version: u32,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let restored = self
            .ctx
            .initiations
            .compare_and_set_status(initiation_id, version, InitiationStatus::SupplierEmailed, now)
            .await?;
        if restored {
            warn!(
                event_name = "initiation.reopen_reverted",
                initiation_id = %initiation_id.0,
                "onboarding moved concurrently; initiation restored to supplier_emailed"
            );
        } else {
            warn!(
                event_name = "initiation.reopen_revert_skipped",
                initiation_id = %initiation_id.0,
                "initiation changed again before it could be restored"
            );
        }
        Ok(())
    }

    async fn version_documents(
        &self,
        onboarding: &Onboarding,
        uploads: Vec<DocumentUpload>,
    ) -> Result<Vec<DocumentRecord>, ApplicationError> {
        let mut latest: HashMap<String, u32> = HashMap::new();
        for existing in self.ctx.onboardings.list_documents(&onboarding.id).await? {
            let version = latest.entry(existing.category).or_default();
            *version = (*version).max(existing.version);
        }

        let now = self.ctx.now();
        Ok(uploads
            .into_iter()
            .map(|upload| {
                let version = latest.entry(upload.category.clone()).or_default();
                *version += 1;
                DocumentRecord {
                    id: format!("DOC-{}", Uuid::new_v4().simple()),
                    onboarding_id: onboarding.id.clone(),
                    category: upload.category,
                    filename: upload.filename,
                    version: *version,
                    uploaded_at: now,
                }
            })
            .collect())
    }

    async fn load(&self, id: &OnboardingId) -> Result<Onboarding, ApplicationError> {
        self.ctx
            .onboardings
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::not_found("onboarding", id.0.clone()).into())
    }

    async fn load_by_token(&self, token: &str) -> Result<Onboarding, ApplicationError> {
        self.ctx
            .onboardings
            .find_by_token(token.trim())
            .await?
            .ok_or_else(|| DomainError::not_found("onboarding", "<access token>").into())
    }

    async fn supplier_of(&self, onboarding: &Onboarding) -> Result<Supplier, ApplicationError> {
        self.ctx
            .onboardings
            .find_supplier(&onboarding.supplier_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found("supplier", onboarding.supplier_id.0.clone()).into()
            })
    }
}

fn has_requester_notice(transition: &TransitionOutcome) -> bool {
    transition.actions.contains(&FlowAction::NotifyRequester)
}

fn validate_upload(upload: &DocumentUpload) -> Result<(), DomainError> {
    if upload.category.trim().is_empty() {
        return Err(DomainError::Validation("document category is required".to_owned()));
    }
    if upload.filename.trim().is_empty() {
        return Err(DomainError::Validation(format!(
            "a filename is required for `{}`",
            upload.category
        )));
    }
    Ok(())
}

fn describe(event: &OnboardingEvent) -> String {
    match event {
        OnboardingEvent::DocumentsSubmitted => "supplier submitted onboarding documents".to_owned(),
        OnboardingEvent::ReviewStarted => "review started".to_owned(),
        OnboardingEvent::SupplierRevisionRequested { .. } => {
            "supplier asked to revise documents".to_owned()
        }
        OnboardingEvent::FinalApprovalRequested => "sent for final approval".to_owned(),
        OnboardingEvent::InitiatorRevisionRequested { .. } => {
            "requester asked to correct the initiation".to_owned()
        }
        OnboardingEvent::CorrectedInitiationResubmitted => {
            "requester corrected the initiation".to_owned()
        }
        OnboardingEvent::FinalApproved => "supplier approved".to_owned(),
        OnboardingEvent::FinalRejected { reason } => {
            format!("supplier rejected: {}", reason.as_str())
        }
    }
}
