use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use procura_core::approvals::{resolve, visibility, ResolutionRequest, ResolvedSlot, Visibility};
use procura_core::audit::{TimelineEntry, TimelineSubject};
use procura_core::domain::approval::{ApprovalPair, ApprovalSlot, Decision};
use procura_core::domain::initiation::{
    Initiation, InitiationId, InitiationStatus, SupplierDetails,
};
use procura_core::domain::onboarding::{
    Onboarding, OnboardingStatus, RevisionKind, Supplier, SupplierStatus,
};
use procura_core::domain::user::{ActingUser, User, UserId};
use procura_core::errors::{ApplicationError, DomainError};
use procura_core::flows::{FlowContext, FlowEngine, OnboardingEvent};
use procura_db::repositories::{DecisionWrite, DecisionWriteOutcome};

use crate::context::{Outcome, WorkflowContext};
use crate::delegations::DelegationService;
use crate::messages;

/// Result of a recorded slot decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionReceipt {
    pub initiation: Initiation,
    pub slots: ApprovalPair,
    pub resolved: ResolvedSlot,
    /// Present only on the decision that provisioned the onboarding.
    pub onboarding: Option<Onboarding>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleInitiation {
    pub initiation: Initiation,
    pub slots: Option<ApprovalPair>,
    pub visibility: Visibility,
}

/// Owns the two approval slots of each initiation and its aggregate status.
#[derive(Clone)]
pub struct InitiationService {
    ctx: WorkflowContext,
    delegations: DelegationService,
}

impl InitiationService {
    pub fn new(ctx: WorkflowContext) -> Self {
        let delegations = DelegationService::new(ctx.clone());
        Self { ctx, delegations }
    }

    pub async fn find(
        &self,
        id: &InitiationId,
    ) -> Result<(Initiation, Option<ApprovalPair>), ApplicationError> {
        let initiation = self.load(id).await?;
        let slots = self.ctx.initiations.find_slots(id).await?;
        Ok((initiation, slots))
    }

    pub async fn create_draft(
        &self,
        actor: &ActingUser,
        details: SupplierDetails,
    ) -> Result<Outcome<Initiation>, ApplicationError> {
        let now = self.ctx.now();
        let initiation = Initiation::new_draft(actor.id.clone(), details, now)?;
        self.ctx.initiations.save_draft(initiation.clone()).await?;

        info!(
            event_name = "initiation.draft_created",
            initiation_id = %initiation.id.0,
            actor_id = %actor.id.0,
            "initiation draft created"
        );

        let mut warnings = Vec::new();
        self.ctx
            .record(
                TimelineEntry::new(
                    TimelineSubject::Initiation(initiation.id.clone()),
                    actor.id.0.clone(),
                    "initiation_created",
                    format!("draft created for {}", initiation.details.supplier_name),
                    now,
                ),
                &mut warnings,
            )
            .await;

        Ok(Outcome::with_warnings(initiation, warnings))
    }

    pub async fn update_draft(
        &self,
        id: &InitiationId,
        actor: &ActingUser,
        details: SupplierDetails,
    ) -> Result<Outcome<Initiation>, ApplicationError> {
        let mut initiation = self.load(id).await?;
        initiation.ensure_editable_by(&actor.id)?;
        details.validate()?;

        let now = self.ctx.now();
        initiation.details = details;
        initiation.updated_at = now;
        self.ctx.initiations.save_draft(initiation.clone()).await?;

        let mut warnings = Vec::new();
        self.ctx
            .record(
                TimelineEntry::new(
                    TimelineSubject::Initiation(initiation.id.clone()),
                    actor.id.0.clone(),
                    "initiation_updated",
                    "initiation details edited",
                    now,
                ),
                &mut warnings,
            )
            .await;

        Ok(Outcome::with_warnings(initiation, warnings))
    }

    /// Opens fresh pending slots for the named approvers, or, when the
    /// requester is answering a final-review correction, restores the
    /// onboarding without re-running the slots.
    pub async fn submit(
        &self,
        id: &InitiationId,
        actor: &ActingUser,
        manager_approver: &UserId,
        procurement_approver: &UserId,
    ) -> Result<Outcome<Initiation>, ApplicationError> {
        let initiation = self.load(id).await?;
        initiation.ensure_editable_by(&actor.id)?;
        initiation.details.validate()?;

        if initiation.status == InitiationStatus::ReturnedForRevision {
            if let Some(onboarding) = self.ctx.onboardings.find_by_initiation(id).await? {
                if onboarding.revision_kind == Some(RevisionKind::InitiatorCorrection) {
                    return self.resubmit_corrected(initiation, onboarding, actor).await;
                }
            }
        }

        let manager = self.require_approver(manager_approver, &initiation).await?;
        let procurement = self.require_approver(procurement_approver, &initiation).await?;

        let now = self.ctx.now();
        let expected_version = initiation.version;
        let mut submitted = initiation;
        submitted.status = InitiationStatus::Submitted;
        submitted.version = expected_version + 1;
        submitted.submitted_at = Some(now);
        submitted.updated_at = now;

        let slots =
            ApprovalPair::open(&submitted.id, manager.id.clone(), procurement.id.clone(), now);
        if !self.ctx.initiations.open_slots(&submitted, slots, expected_version).await? {
            return Err(DomainError::InvalidState(format!(
                "initiation `{}` changed while it was being submitted",
                id.0
            ))
            .into());
        }

        info!(
            event_name = "initiation.submitted",
            initiation_id = %submitted.id.0,
            actor_id = %actor.id.0,
            manager_approver = %manager.id.0,
            procurement_approver = %procurement.id.0,
            "initiation submitted for approval"
        );

        let mut warnings = Vec::new();
        self.ctx
            .record(
                TimelineEntry::new(
                    TimelineSubject::Initiation(submitted.id.clone()),
                    actor.id.0.clone(),
                    "initiation_submitted",
                    format!("submitted to {} and {}", manager.name, procurement.name),
                    now,
                )
                .with_metadata("manager_approver", manager.id.0.clone())
                .with_metadata("procurement_approver", procurement.id.0.clone()),
                &mut warnings,
            )
            .await;

        self.notify_approvers(
            &submitted,
            [(ApprovalSlot::Manager, &manager), (ApprovalSlot::Procurement, &procurement)],
            &mut warnings,
        )
        .await?;

        Ok(Outcome::with_warnings(submitted, warnings))
    }

    pub async fn record_decision(
        &self,
        id: &InitiationId,
        actor: &ActingUser,
        requested_slot: Option<ApprovalSlot>,
        decision: Decision,
    ) -> Result<Outcome<DecisionReceipt>, ApplicationError> {
        let mut warnings = Vec::new();
        let delegations = self.delegations.effective_for(&actor.id, &mut warnings).await?;

        let mut attempt = 0;
        let (mut initiation, slots, resolved) = loop {
            attempt += 1;
            let now = self.ctx.now();
            let mut initiation = self.load(id).await?;
            let mut slots = self.ctx.initiations.find_slots(id).await?.ok_or_else(|| {
                DomainError::InvalidState(format!("initiation `{}` has not been submitted", id.0))
            })?;

            let resolved = resolve(&ResolutionRequest {
                initiation: &initiation,
                slots: &slots,
                actor,
                requested_slot,
                delegations: &delegations,
                now,
            })
            .map_err(DomainError::from)?;

            let record = slots.slot_mut(resolved.slot);
            record.status = decision.status();
            record.comment = decision.comment().map(str::to_owned);
            record.decided_by = Some(actor.id.clone());
            record.acting_for = resolved.acting_for().cloned();
            record.decided_at = Some(now);
            let aggregate = slots.aggregate_status();

            let write = DecisionWrite {
                initiation_id: id.clone(),
                slot: resolved.slot,
                status: decision.status(),
                comment: decision.comment().map(str::to_owned),
                decided_by: actor.id.clone(),
                acting_for: resolved.acting_for().cloned(),
                decided_at: now,
                expected_version: initiation.version,
                aggregate_status: aggregate,
            };

            match self.ctx.initiations.apply_decision(write).await? {
                DecisionWriteOutcome::Applied { version } => {
                    initiation.status = aggregate;
                    initiation.version = version;
                    initiation.updated_at = now;
                    break (initiation, slots, resolved);
                }
                DecisionWriteOutcome::SlotAlreadyDecided => {
                    return Err(DomainError::InvalidState(format!(
                        "{} slot of initiation `{}` was already decided",
                        resolved.slot.as_str(),
                        id.0
                    ))
                    .into());
                }
                DecisionWriteOutcome::VersionConflict
                    if attempt < self.ctx.decision_retry_limit =>
                {
                    warn!(
                        event_name = "initiation.decision_retry",
                        initiation_id = %id.0,
                        attempt,
                        "aggregate changed concurrently; re-reading"
                    );
                }
                DecisionWriteOutcome::VersionConflict => {
                    return Err(DomainError::InvalidState(format!(
                        "initiation `{}` kept changing; gave up after {attempt} attempts",
                        id.0
                    ))
                    .into());
                }
            }
        };

        let record = slots.slot(resolved.slot);
        info!(
            event_name = "initiation.decision_recorded",
            initiation_id = %initiation.id.0,
            actor_id = %actor.id.0,
            slot = resolved.slot.as_str(),
            decision = record.status.as_str(),
            status = initiation.status.as_str(),
            "approval decision recorded"
        );

        let description = match (&decision, resolved.acting_for()) {
            (Decision::Approve { .. }, None) => {
                format!("{} slot approved", resolved.slot.as_str())
            }
            (Decision::Approve { .. }, Some(delegator)) => {
                format!("{} slot approved on behalf of `{}`", resolved.slot.as_str(), delegator.0)
            }
            (Decision::Reject { reason }, _) => {
                format!("{} slot rejected: {}", resolved.slot.as_str(), reason.as_str())
            }
        };
        self.ctx
            .record(
                TimelineEntry::new(
                    TimelineSubject::Initiation(initiation.id.clone()),
                    actor.id.0.clone(),
                    format!("{}_{}", resolved.slot.as_str(), record.status.as_str()),
                    description,
                    initiation.updated_at,
                )
                .acting_for(resolved.acting_for().cloned())
                .with_metadata("slot", resolved.slot.as_str())
                .with_metadata("status", initiation.status.as_str()),
                &mut warnings,
            )
            .await;

        let mut onboarding = None;
        match (&decision, initiation.status) {
            (Decision::Reject { reason }, InitiationStatus::Rejected) => {
                let requester = self.ctx.users.find_by_id(&initiation.requester_id).await?;
                if let Some(requester) = requester {
                    self.ctx
                        .deliver(
                            messages::initiation_rejected(
                                &initiation,
                                &requester,
                                slot_label(resolved.slot),
                                reason.as_str(),
                            ),
                            "initiation_rejected",
                            &mut warnings,
                        )
                        .await;
                }
            }
            (Decision::Approve { .. }, InitiationStatus::Approved) => {
                match self.provision(&mut initiation, &mut warnings).await {
                    Ok(provisioned) => onboarding = provisioned,
                    Err(error) => {
                        warn!(
                            event_name = "onboarding.provision_failed",
                            initiation_id = %initiation.id.0,
                            error = %error,
                            "approval committed but provisioning failed"
                        );
                        warnings.push(ApplicationError::Integration(format!(
                            "initiation `{}` is approved but could not be provisioned: {error}",
                            initiation.id.0
                        )));
                    }
                }
            }
            _ => {}
        }

        Ok(Outcome::with_warnings(
            DecisionReceipt { initiation, slots, resolved, onboarding },
            warnings,
        ))
    }

    /// Finishes an approved initiation whose provisioning or supplier
    /// invitation did not go through: provisions when no onboarding exists,
    /// otherwise re-sends the invitation.
    pub async fn retry_supplier_invitation(
        &self,
        id: &InitiationId,
        actor: &ActingUser,
    ) -> Result<Outcome<Initiation>, ApplicationError> {
        let mut initiation = self.load(id).await?;
        if actor.id != initiation.requester_id && !actor.is_elevated() {
            return Err(DomainError::Unauthorized(format!(
                "user `{}` may not resend the invitation for `{}`",
                actor.id.0, id.0
            ))
            .into());
        }
        if initiation.status != InitiationStatus::Approved {
            return Err(DomainError::InvalidState(format!(
                "initiation `{}` is {}; only approved initiations await an invitation",
                id.0,
                initiation.status.as_str()
            ))
            .into());
        }

        let mut warnings = Vec::new();
        let Some(onboarding) = self.ctx.onboardings.find_by_initiation(id).await? else {
            self.provision(&mut initiation, &mut warnings).await?;
            return Ok(Outcome::with_warnings(initiation, warnings));
        };
        let supplier = self
            .ctx
            .onboardings
            .find_supplier(&onboarding.supplier_id)
            .await?
            .ok_or_else(|| DomainError::not_found("supplier", onboarding.supplier_id.0.clone()))?;

        self.invite(&mut initiation, onboarding, &supplier, &mut warnings).await?;
        Ok(Outcome::with_warnings(initiation, warnings))
    }

    /// Initiations the actor may see, annotated with any delegated slots.
    pub async fn list_visible(
        &self,
        actor: &ActingUser,
    ) -> Result<Outcome<Vec<VisibleInitiation>>, ApplicationError> {
        let mut warnings = Vec::new();
        let delegations = self.delegations.effective_for(&actor.id, &mut warnings).await?;
        let now = self.ctx.now();

        let mut visible = Vec::new();
        for initiation in self.ctx.initiations.list().await? {
            let slots = self.ctx.initiations.find_slots(&initiation.id).await?;
            if let Some(visibility) =
                visibility(&initiation, slots.as_ref(), actor, &delegations, now)
            {
                visible.push(VisibleInitiation { initiation, slots, visibility });
            }
        }

        Ok(Outcome::with_warnings(visible, warnings))
    }

    async fn load(&self, id: &InitiationId) -> Result<Initiation, ApplicationError> {
        self.ctx
            .initiations
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::not_found("initiation", id.0.clone()).into())
    }

    async fn require_approver(
        &self,
        approver_id: &UserId,
        initiation: &Initiation,
    ) -> Result<User, ApplicationError> {
        if approver_id == &initiation.requester_id {
            return Err(DomainError::Validation(
                "the requester cannot be assigned as an approver".to_owned(),
            )
            .into());
        }
        match self.ctx.users.find_by_id(approver_id).await? {
            Some(user) if user.is_active => Ok(user),
            Some(_) => Err(DomainError::Validation(format!(
                "approver `{}` is not an active user",
                approver_id.0
            ))
            .into()),
            None => Err(DomainError::Validation(format!(
                "approver `{}` does not exist",
                approver_id.0
            ))
            .into()),
        }
    }

    async fn notify_approvers(
        &self,
        initiation: &Initiation,
        approvers: [(ApprovalSlot, &User); 2],
        warnings: &mut Vec<ApplicationError>,
    ) -> Result<(), ApplicationError> {
        let mut notified = BTreeSet::new();
        for (slot, approver) in approvers {
            if notified.insert(approver.id.0.clone()) {
                self.ctx
                    .deliver(
                        messages::approval_requested(initiation, approver, None, &self.ctx.links),
                        "approval_requested",
                        warnings,
                    )
                    .await;
            }

            for delegation in
                self.delegations.effective_delegates_of(&approver.id, slot, warnings).await?
            {
                let Some(delegate) = self.ctx.users.find_by_id(&delegation.delegate_id).await?
                else {
                    continue;
                };
                if !delegate.is_active || !notified.insert(delegate.id.0.clone()) {
                    continue;
                }
                self.ctx
                    .deliver(
                        messages::approval_requested(
                            initiation,
                            &delegate,
                            Some(approver),
                            &self.ctx.links,
                        ),
                        "approval_requested",
                        warnings,
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// Creates the supplier and onboarding at most once per initiation, then
    /// invites the supplier.
    async fn provision(
        &self,
        initiation: &mut Initiation,
        warnings: &mut Vec<ApplicationError>,
    ) -> Result<Option<Onboarding>, ApplicationError> {
        let now = self.ctx.now();
        let supplier = Supplier::from_initiation(initiation, now);
        let onboarding = Onboarding::provision(initiation.id.clone(), supplier.id.clone(), now);

        if !self.ctx.onboardings.provision(supplier.clone(), onboarding.clone()).await? {
            info!(
                event_name = "onboarding.provision_skipped",
                initiation_id = %initiation.id.0,
                "initiation already has an onboarding"
            );
            return Ok(None);
        }

        info!(
            event_name = "onboarding.provisioned",
            initiation_id = %initiation.id.0,
            onboarding_id = %onboarding.id.0,
            supplier_code = %supplier.supplier_code,
            "supplier and onboarding provisioned"
        );
        self.ctx
            .record(
                TimelineEntry::new(
                    TimelineSubject::Onboarding(onboarding.id.clone()),
                    TimelineEntry::SYSTEM_ACTOR,
                    "onboarding_provisioned",
                    format!("onboarding opened for {}", supplier.name),
                    now,
                )
                .with_metadata("initiation_id", initiation.id.0.clone())
                .with_metadata("supplier_code", supplier.supplier_code.clone()),
                warnings,
            )
            .await;

        let onboarding = self.invite(initiation, onboarding, &supplier, warnings).await?;
        Ok(Some(onboarding))
    }

    /// Sends the supplier invitation; only a successful send stamps the
    /// onboarding and moves the initiation to `supplier_emailed`.
    async fn invite(
        &self,
        initiation: &mut Initiation,
        mut onboarding: Onboarding,
        supplier: &Supplier,
        warnings: &mut Vec<ApplicationError>,
    ) -> Result<Onboarding, ApplicationError> {
        let message = messages::supplier_invitation(supplier, &onboarding, &self.ctx.links);
        let Some(receipt) = self.ctx.deliver(message, "supplier_invitation", warnings).await else {
            return Ok(onboarding);
        };

        let now = self.ctx.now();
        if onboarding.email_sent_at.is_none() {
            let expected_status = onboarding.status;
            onboarding.email_sent_at = Some(now);
            onboarding.updated_at = now;
            if !self.ctx.onboardings.update(&onboarding, supplier, expected_status).await? {
                warn!(
                    event_name = "onboarding.email_stamp_skipped",
                    onboarding_id = %onboarding.id.0,
                    "onboarding moved before the invitation was stamped"
                );
            }
        }

        if self
            .ctx
            .initiations
            .compare_and_set_status(
                &initiation.id,
                initiation.version,
                InitiationStatus::SupplierEmailed,
                now,
            )
            .await?
        {
            initiation.status = InitiationStatus::SupplierEmailed;
            initiation.version += 1;
            initiation.updated_at = now;

            info!(
                event_name = "initiation.supplier_emailed",
                initiation_id = %initiation.id.0,
                onboarding_id = %onboarding.id.0,
                message_id = %receipt.message_id,
                "supplier invitation sent"
            );
            self.ctx
                .record(
                    TimelineEntry::new(
                        TimelineSubject::Initiation(initiation.id.clone()),
                        TimelineEntry::SYSTEM_ACTOR,
                        "supplier_emailed",
                        format!("invitation sent to {}", supplier.contact_email),
                        now,
                    )
                    .with_metadata("message_id", receipt.message_id),
                    warnings,
                )
                .await;
        } else {
            warnings.push(
                DomainError::InvalidState(format!(
                    "initiation `{}` changed before it could be marked supplier_emailed",
                    initiation.id.0
                ))
                .into(),
            );
        }

        Ok(onboarding)
    }

    async fn resubmit_corrected(
        &self,
        initiation: Initiation,
        mut onboarding: Onboarding,
        actor: &ActingUser,
    ) -> Result<Outcome<Initiation>, ApplicationError> {
        let mut supplier = self
            .ctx
            .onboardings
            .find_supplier(&onboarding.supplier_id)
            .await?
            .ok_or_else(|| DomainError::not_found("supplier", onboarding.supplier_id.0.clone()))?;

        let expected_status = onboarding.status;
        let transition = FlowEngine::default()
            .apply(
                &expected_status,
                &OnboardingEvent::CorrectedInitiationResubmitted,
                &FlowContext::for_onboarding(&onboarding),
            )
            .map_err(DomainError::from)?;

        let now = self.ctx.now();
        onboarding.apply(&transition, now);
        supplier.refresh_from(&initiation, now);
        supplier.status = SupplierStatus::for_onboarding(onboarding.status);

        if !self.ctx.onboardings.update(&onboarding, &supplier, expected_status).await? {
            return Err(stale_onboarding(&onboarding, expected_status));
        }
        if !self
            .ctx
            .initiations
            .compare_and_set_status(
                &initiation.id,
                initiation.version,
                InitiationStatus::SupplierEmailed,
                now,
            )
            .await?
        {
            return Err(DomainError::InvalidState(format!(
                "initiation `{}` changed while it was being resubmitted",
                initiation.id.0
            ))
            .into());
        }

        let mut restored = initiation;
        restored.status = InitiationStatus::SupplierEmailed;
        restored.version += 1;
        restored.updated_at = now;

        info!(
            event_name = "initiation.correction_resubmitted",
            initiation_id = %restored.id.0,
            onboarding_id = %onboarding.id.0,
            actor_id = %actor.id.0,
            "corrected initiation returned to final approval"
        );

        let mut warnings = Vec::new();
        self.ctx
            .record(
                TimelineEntry::new(
                    TimelineSubject::Initiation(restored.id.clone()),
                    actor.id.0.clone(),
                    "initiation_resubmitted",
                    "corrections submitted; onboarding returned to final approval",
                    now,
                ),
                &mut warnings,
            )
            .await;
        self.ctx
            .record(
                TimelineEntry::new(
                    TimelineSubject::Onboarding(onboarding.id.clone()),
                    actor.id.0.clone(),
                    transition.event.name(),
                    "requester corrected the initiation",
                    now,
                )
                .with_metadata("from", transition.from.as_str())
                .with_metadata("to", transition.to.as_str()),
                &mut warnings,
            )
            .await;

        Ok(Outcome::with_warnings(restored, warnings))
    }
}

pub(crate) fn stale_onboarding(
    onboarding: &Onboarding,
    expected: OnboardingStatus,
) -> ApplicationError {
    DomainError::InvalidState(format!(
        "onboarding `{}` is no longer {}",
        onboarding.id.0,
        expected.as_str()
    ))
    .into()
}

fn slot_label(slot: ApprovalSlot) -> &'static str {
    match slot {
        ApprovalSlot::Manager => "Manager",
        ApprovalSlot::Procurement => "Procurement",
    }
}
