use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use procura_core::domain::approval::ApprovalSlot;
use procura_core::domain::initiation::InitiationId;
use procura_core::domain::reminder::{
    ReminderConfiguration, ReminderEventType, ReminderLog, ReminderLogStatus,
};
use procura_core::domain::user::{ActingUser, User, UserId};
use procura_core::errors::{ApplicationError, DomainError};
use procura_core::notifier::OutboundMessage;
use procura_core::reminders::{self as rules, ReminderCandidate, ReminderSchedule};

use crate::context::WorkflowContext;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub event_type: ReminderEventType,
    /// Absent when the pending objects of the type could not be listed.
    pub reference_id: Option<String>,
    pub message: String,
}

/// Per-run counters; every evaluated candidate lands in exactly one bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub configurations: usize,
    pub evaluated: usize,
    pub sent: usize,
    pub skipped_not_due: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    pub failures: Vec<ScanFailure>,
}

impl ScanSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            configurations: 0,
            evaluated: 0,
            sent: 0,
            skipped_not_due: 0,
            skipped_duplicate: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }

    fn fail(
        &mut self,
        event_type: ReminderEventType,
        reference_id: Option<&str>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        warn!(
            event_name = "reminder.item_failed",
            event_type = event_type.as_str(),
            reference_id = reference_id.unwrap_or("-"),
            error = %message,
            "reminder item failed"
        );
        self.failures.push(ScanFailure {
            event_type,
            reference_id: reference_id.map(str::to_owned),
            message,
        });
    }
}

/// One stateless pass over every enabled reminder configuration.
///
/// The reminder log is the only guard against duplicates: a tier is claimed
/// as a pending row before the notifier is called, so concurrent or repeated
/// scans skip whatever another run already holds.
#[derive(Clone)]
pub struct ReminderEngine {
    ctx: WorkflowContext,
}

impl ReminderEngine {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self { ctx }
    }

    pub async fn load_schedule(&self) -> Result<ReminderSchedule, ApplicationError> {
        let schedule = ReminderSchedule::new(self.ctx.reminders.list_configurations().await?);
        if schedule.is_empty() {
            warn!(
                event_name = "reminder.schedule_empty",
                "no reminder configurations found; run `procura seed` to insert defaults"
            );
        }
        Ok(schedule)
    }

    pub async fn run(&self) -> Result<ScanSummary, ApplicationError> {
        let schedule = self.load_schedule().await?;
        Ok(self.scan(&schedule).await)
    }

    /// Replaces one event type's thresholds and templates.
    pub async fn configure(
        &self,
        actor: &ActingUser,
        mut configuration: ReminderConfiguration,
    ) -> Result<ReminderConfiguration, ApplicationError> {
        if !actor.is_elevated() {
            return Err(DomainError::Unauthorized(format!(
                "user `{}` may not change reminder settings",
                actor.id.0
            ))
            .into());
        }
        configuration.thresholds.validate()?;
        if configuration.subject_template.trim().is_empty()
            || configuration.body_template.trim().is_empty()
        {
            return Err(
                DomainError::Validation("reminder templates cannot be blank".to_owned()).into()
            );
        }

        configuration.updated_at = self.ctx.now();
        self.ctx.reminders.save_configuration(configuration.clone()).await?;
        info!(
            event_name = "reminder.configuration_saved",
            event_type = configuration.event_type.as_str(),
            actor_id = %actor.id.0,
            enabled = configuration.is_enabled,
            "reminder configuration saved"
        );
        Ok(configuration)
    }

    pub async fn scan(&self, schedule: &ReminderSchedule) -> ScanSummary {
        let mut summary = ScanSummary::new(self.ctx.now());
        info!(
            event_name = "reminder.scan_started",
            configurations = schedule.len(),
            "reminder scan started"
        );

        for config in schedule.enabled() {
            summary.configurations += 1;
            let candidates = match self.candidates(config.event_type, &mut summary).await {
                Ok(candidates) => candidates,
                Err(error) => {
                    summary.fail(config.event_type, None, error.to_string());
                    continue;
                }
            };

            for candidate in candidates {
                summary.evaluated += 1;
                self.remind(config, &candidate, &mut summary).await;
            }
        }

        summary.finished_at = self.ctx.now();
        info!(
            event_name = "reminder.scan_completed",
            configurations = summary.configurations,
            evaluated = summary.evaluated,
            sent = summary.sent,
            skipped_not_due = summary.skipped_not_due,
            skipped_duplicate = summary.skipped_duplicate,
            failed = summary.failed,
            failures = summary.failures.len(),
            "reminder scan completed"
        );
        summary
    }

    async fn remind(
        &self,
        config: &ReminderConfiguration,
        candidate: &ReminderCandidate,
        summary: &mut ScanSummary,
    ) {
        let now = self.ctx.now();
        let Some(tier) = candidate.tier(config, now) else {
            summary.skipped_not_due += 1;
            return;
        };

        let (subject, body) = candidate.render(config, tier, now);
        let log = ReminderLog::claim(
            candidate.event_type,
            candidate.reference_id.clone(),
            tier,
            candidate.recipient.clone(),
            subject.clone(),
            body.clone(),
            now,
        );
        match self.ctx.reminders.try_claim(log.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                summary.skipped_duplicate += 1;
                return;
            }
            Err(error) => {
                summary.failed += 1;
                summary.fail(
                    candidate.event_type,
                    Some(&candidate.reference_id),
                    format!("claim failed: {error}"),
                );
                return;
            }
        }

        let message = OutboundMessage::new(candidate.recipient.clone(), subject, body)
            .with_sender(self.ctx.sender_address.clone());
        let (status, error, sent_at) = match self.ctx.notifier.send(message).await {
            Ok(receipt) => {
                info!(
                    event_name = "reminder.sent",
                    event_type = candidate.event_type.as_str(),
                    reference_id = %candidate.reference_id,
                    tier = tier.ordinal(),
                    message_id = %receipt.message_id,
                    "reminder sent"
                );
                summary.sent += 1;
                (ReminderLogStatus::Sent, None, Some(self.ctx.now()))
            }
            Err(error) => {
                summary.failed += 1;
                summary.fail(
                    candidate.event_type,
                    Some(&candidate.reference_id),
                    error.to_string(),
                );
                (ReminderLogStatus::Failed, Some(error.to_string()), None)
            }
        };

        if let Err(error) = self.ctx.reminders.complete(&log.id, status, error, sent_at).await {
            summary.fail(
                candidate.event_type,
                Some(&candidate.reference_id),
                format!("reminder log `{}` could not be completed: {error}", log.id),
            );
        }
    }

    /// Pending objects of one event type. Objects whose related records cannot
    /// be read are reported and left out; only a failed listing is an error.
    async fn candidates(
        &self,
        event_type: ReminderEventType,
        summary: &mut ScanSummary,
    ) -> Result<Vec<ReminderCandidate>, ApplicationError> {
        let links = &self.ctx.links;
        let mut candidates = Vec::new();

        match event_type {
            ReminderEventType::ManagerApprovalPending
            | ReminderEventType::ProcurementApprovalPending => {
                let slot = match event_type {
                    ReminderEventType::ManagerApprovalPending => ApprovalSlot::Manager,
                    _ => ApprovalSlot::Procurement,
                };
                for (initiation, slots) in self.ctx.initiations.list_awaiting_decision().await? {
                    if !slots.slot(slot).is_pending() {
                        continue;
                    }
                    let reference = slots.slot(slot).id.0.clone();
                    let approver = match self.user(&slots.slot(slot).approver_id).await {
                        Ok(Some(approver)) => approver,
                        Ok(None) => continue,
                        Err(error) => {
                            summary.fail(event_type, Some(&reference), error.to_string());
                            continue;
                        }
                    };
                    let requester = self.user(&initiation.requester_id).await.ok().flatten();
                    candidates.extend(rules::approval_pending(
                        &initiation,
                        &slots,
                        slot,
                        &approver,
                        requester.as_ref(),
                        links,
                    ));
                }
            }
            ReminderEventType::SupplierDocumentSubmission
            | ReminderEventType::BuyerReviewPending
            | ReminderEventType::SupplierRevisionPending => {
                for onboarding in self.ctx.onboardings.list_open().await? {
                    let found = self.ctx.onboardings.find_supplier(&onboarding.supplier_id).await;
                    let supplier = match found {
                        Ok(Some(supplier)) => supplier,
                        Ok(None) => continue,
                        Err(error) => {
                            summary.fail(event_type, Some(&onboarding.id.0), error.to_string());
                            continue;
                        }
                    };

                    let candidate = match event_type {
                        ReminderEventType::SupplierDocumentSubmission => {
                            rules::supplier_document_submission(&onboarding, &supplier, links)
                        }
                        ReminderEventType::SupplierRevisionPending => {
                            rules::supplier_revision_pending(&onboarding, &supplier, links)
                        }
                        _ => match self.requester_of(&onboarding.initiation_id).await {
                            Ok(Some(requester)) => rules::buyer_review_pending(
                                &onboarding,
                                &supplier,
                                &requester,
                                links,
                            ),
                            Ok(None) => None,
                            Err(error) => {
                                let reference = Some(onboarding.id.0.as_str());
                                summary.fail(event_type, reference, error.to_string());
                                None
                            }
                        },
                    };
                    candidates.extend(candidate);
                }
            }
        }

        Ok(candidates)
    }

    async fn user(&self, id: &UserId) -> Result<Option<User>, ApplicationError> {
        Ok(self.ctx.users.find_by_id(id).await?)
    }

    async fn requester_of(
        &self,
        initiation_id: &InitiationId,
    ) -> Result<Option<User>, ApplicationError> {
        match self.ctx.initiations.find_by_id(initiation_id).await? {
            Some(initiation) => self.user(&initiation.requester_id).await,
            None => Ok(None),
        }
    }
}
