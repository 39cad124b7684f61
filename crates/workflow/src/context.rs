use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use procura_core::audit::{TimelineEntry, TimelineSubject};
use procura_core::clock::{Clock, SystemClock};
use procura_core::config::{AppConfig, DEFAULT_SENDER_ADDRESS};
use procura_core::domain::user::{User, UserId};
use procura_core::errors::{ApplicationError, DomainError};
use procura_core::notifier::{MessageReceipt, Notifier, OutboundMessage};
use procura_core::reminders::PortalLinks;
use procura_db::repositories::{
    DelegationRepository, InMemoryDelegationRepository, InMemoryInitiationRepository,
    InMemoryOnboardingRepository, InMemoryReminderRepository, InMemoryTimelineRepository,
    InMemoryUserRepository, InitiationRepository, OnboardingRepository, ReminderRepository,
    SqlDelegationRepository, SqlInitiationRepository, SqlOnboardingRepository,
    SqlReminderRepository, SqlTimelineRepository, SqlUserRepository, TimelineRepository,
    UserRepository,
};
use procura_db::DbPool;

pub const DEFAULT_DECISION_RETRY_LIMIT: u32 = 3;

/// A committed result plus the dependency failures that did not undo it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<ApplicationError>,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self { value, warnings: Vec::new() }
    }

    pub fn with_warnings(value: T, warnings: Vec<ApplicationError>) -> Self {
        Self { value, warnings }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn map<U>(self, apply: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome { value: apply(self.value), warnings: self.warnings }
    }
}

/// Shared collaborators for every workflow service.
#[derive(Clone)]
pub struct WorkflowContext {
    pub users: Arc<dyn UserRepository>,
    pub initiations: Arc<dyn InitiationRepository>,
    pub delegations: Arc<dyn DelegationRepository>,
    pub onboardings: Arc<dyn OnboardingRepository>,
    pub timeline: Arc<dyn TimelineRepository>,
    pub reminders: Arc<dyn ReminderRepository>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub links: PortalLinks,
    pub sender_address: String,
    pub decision_retry_limit: u32,
}

impl WorkflowContext {
    pub fn in_memory(
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        links: PortalLinks,
    ) -> Self {
        Self {
            users: Arc::new(InMemoryUserRepository::default()),
            initiations: Arc::new(InMemoryInitiationRepository::default()),
            delegations: Arc::new(InMemoryDelegationRepository::default()),
            onboardings: Arc::new(InMemoryOnboardingRepository::default()),
            timeline: Arc::new(InMemoryTimelineRepository::default()),
            reminders: Arc::new(InMemoryReminderRepository::default()),
            notifier,
            clock,
            links,
            sender_address: DEFAULT_SENDER_ADDRESS.to_owned(),
            decision_retry_limit: DEFAULT_DECISION_RETRY_LIMIT,
        }
    }

    pub fn sql(pool: DbPool, notifier: Arc<dyn Notifier>, config: &AppConfig) -> Self {
        Self {
            users: Arc::new(SqlUserRepository::new(pool.clone())),
            initiations: Arc::new(SqlInitiationRepository::new(pool.clone())),
            delegations: Arc::new(SqlDelegationRepository::new(pool.clone())),
            onboardings: Arc::new(SqlOnboardingRepository::new(pool.clone())),
            timeline: Arc::new(SqlTimelineRepository::new(pool.clone())),
            reminders: Arc::new(SqlReminderRepository::new(pool)),
            notifier,
            clock: Arc::new(SystemClock),
            links: PortalLinks::new(config.notifier.portal_base_url.clone()),
            sender_address: config.notifier.sender_address.clone(),
            decision_retry_limit: config.workflow.decision_retry_limit,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sender_address(mut self, address: impl Into<String>) -> Self {
        self.sender_address = address.into();
        self
    }

    pub fn with_decision_retry_limit(mut self, limit: u32) -> Self {
        self.decision_retry_limit = limit.max(1);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn require_user(&self, id: &UserId) -> Result<User, ApplicationError> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::not_found("user", id.0.clone()).into())
    }

    pub async fn history(
        &self,
        subject: &TimelineSubject,
    ) -> Result<Vec<TimelineEntry>, ApplicationError> {
        Ok(self.timeline.list_for_subject(subject).await?)
    }

    /// Appends to the timeline after the state change has committed; a failed
    /// append becomes a warning.
    pub(crate) async fn record(&self, entry: TimelineEntry, warnings: &mut Vec<ApplicationError>) {
        let subject_id = entry.subject.id().to_owned();
        let action = entry.action.clone();
        if let Err(error) = self.timeline.append(entry).await {
            warn!(
                event_name = "workflow.timeline_append_failed",
                subject_id = %subject_id,
                action = %action,
                error = %error,
                "timeline entry could not be written"
            );
            warnings.push(ApplicationError::Persistence(format!(
                "timeline entry `{action}` for `{subject_id}` was not recorded: {error}"
            )));
        }
    }

    /// Best-effort delivery; a failure is logged and pushed as a warning.
    pub(crate) async fn deliver(
        &self,
        message: OutboundMessage,
        purpose: &'static str,
        warnings: &mut Vec<ApplicationError>,
    ) -> Option<MessageReceipt> {
        let recipient = message.recipient.clone();
        let message = message.with_sender(self.sender_address.clone());
        match self.notifier.send(message).await {
            Ok(receipt) => Some(receipt),
            Err(error) => {
                warn!(
                    event_name = "workflow.notifier_failed",
                    purpose,
                    recipient = %recipient,
                    error = %error,
                    "notification was not delivered"
                );
                warnings.push(ApplicationError::Integration(format!(
                    "{purpose} notification to {recipient} failed: {error}"
                )));
                None
            }
        }
    }
}
