use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use procura_core::audit::{TimelineEntry, TimelineSubject};
use procura_core::domain::approval::{ApprovalPair, ApprovalRecord, ApprovalSlot, ApprovalStatus};
use procura_core::domain::delegation::{Delegation, DelegationId};
use procura_core::domain::initiation::{Initiation, InitiationId, InitiationStatus};
use procura_core::domain::onboarding::{
    DocumentRecord, Onboarding, OnboardingId, OnboardingStatus, Supplier, SupplierId,
};
use procura_core::domain::reminder::{
    ReminderConfiguration, ReminderEventType, ReminderLog, ReminderLogStatus,
};
use procura_core::domain::user::{User, UserId};
use procura_core::errors::ApplicationError;

pub mod delegation;
pub mod initiation;
pub mod memory;
pub mod onboarding;
pub mod reminder;
pub mod timeline;
pub mod user;

pub use delegation::SqlDelegationRepository;
pub use initiation::SqlInitiationRepository;
pub use memory::{
    InMemoryDelegationRepository, InMemoryInitiationRepository, InMemoryOnboardingRepository,
    InMemoryReminderRepository, InMemoryTimelineRepository, InMemoryUserRepository,
};
pub use onboarding::SqlOnboardingRepository;
pub use reminder::SqlReminderRepository;
pub use timeline::SqlTimelineRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Persistence(value.to_string())
    }
}

/// A slot decision plus the aggregate status it produces, written atomically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionWrite {
    pub initiation_id: InitiationId,
    pub slot: ApprovalSlot,
    pub status: ApprovalStatus,
    pub comment: Option<String>,
    pub decided_by: UserId,
    pub acting_for: Option<UserId>,
    pub decided_at: DateTime<Utc>,
    /// Version observed when the aggregate was computed.
    pub expected_version: u32,
    pub aggregate_status: InitiationStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionWriteOutcome {
    Applied { version: u32 },
    SlotAlreadyDecided,
    VersionConflict,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn save(&self, user: User) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<User>, RepositoryError>;
}

#[async_trait]
pub trait InitiationRepository: Send + Sync {
    async fn find_by_id(&self, id: &InitiationId) -> Result<Option<Initiation>, RepositoryError>;

    async fn find_slots(&self, id: &InitiationId)
        -> Result<Option<ApprovalPair>, RepositoryError>;

    async fn list(&self) -> Result<Vec<Initiation>, RepositoryError>;

    /// Inserts a new draft or rewrites the editable fields of an existing one.
    async fn save_draft(&self, initiation: Initiation) -> Result<(), RepositoryError>;

    /// Moves the initiation to its submitted state and (re)creates both slots
    /// as pending, guarded by `expected_version`. Returns false on a lost race.
    async fn open_slots(
        &self,
        initiation: &Initiation,
        slots: ApprovalPair,
        expected_version: u32,
    ) -> Result<bool, RepositoryError>;

    async fn apply_decision(
        &self,
        write: DecisionWrite,
    ) -> Result<DecisionWriteOutcome, RepositoryError>;

    /// Decided slots from earlier submission rounds, oldest first.
    async fn list_archived_slots(
        &self,
        id: &InitiationId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError>;

    async fn compare_and_set_status(
        &self,
        id: &InitiationId,
        expected_version: u32,
        status: InitiationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Initiations with at least one pending slot that can still be decided.
    async fn list_awaiting_decision(
        &self,
    ) -> Result<Vec<(Initiation, ApprovalPair)>, RepositoryError>;
}

#[async_trait]
pub trait DelegationRepository: Send + Sync {
    async fn find_by_id(&self, id: &DelegationId) -> Result<Option<Delegation>, RepositoryError>;
    async fn save(&self, delegation: Delegation) -> Result<(), RepositoryError>;
    async fn list_for_delegate(&self, delegate: &UserId)
        -> Result<Vec<Delegation>, RepositoryError>;
    async fn list_for_delegator(
        &self,
        delegator: &UserId,
    ) -> Result<Vec<Delegation>, RepositoryError>;
    /// Clears the active flag; false when it was already cleared.
    async fn deactivate(
        &self,
        id: &DelegationId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait OnboardingRepository: Send + Sync {
    /// Inserts the pair unless the initiation already has one.
    async fn provision(
        &self,
        supplier: Supplier,
        onboarding: Onboarding,
    ) -> Result<bool, RepositoryError>;

    async fn find_by_id(&self, id: &OnboardingId) -> Result<Option<Onboarding>, RepositoryError>;
    async fn find_by_initiation(
        &self,
        initiation_id: &InitiationId,
    ) -> Result<Option<Onboarding>, RepositoryError>;
    async fn find_by_token(&self, token: &str) -> Result<Option<Onboarding>, RepositoryError>;
    async fn find_supplier(&self, id: &SupplierId) -> Result<Option<Supplier>, RepositoryError>;

    /// Persists the onboarding and its supplier status while the stored
    /// onboarding is still in `expected_status`.
    async fn update(
        &self,
        onboarding: &Onboarding,
        supplier: &Supplier,
        expected_status: OnboardingStatus,
    ) -> Result<bool, RepositoryError>;

    async fn list_open(&self) -> Result<Vec<Onboarding>, RepositoryError>;

    async fn add_document(&self, document: DocumentRecord) -> Result<(), RepositoryError>;
    async fn list_documents(
        &self,
        onboarding_id: &OnboardingId,
    ) -> Result<Vec<DocumentRecord>, RepositoryError>;
}

#[async_trait]
pub trait TimelineRepository: Send + Sync {
    async fn append(&self, entry: TimelineEntry) -> Result<(), RepositoryError>;
    async fn list_for_subject(
        &self,
        subject: &TimelineSubject,
    ) -> Result<Vec<TimelineEntry>, RepositoryError>;
}

#[async_trait]
pub trait ReminderRepository: Send + Sync {
    async fn list_configurations(&self) -> Result<Vec<ReminderConfiguration>, RepositoryError>;
    async fn save_configuration(
        &self,
        configuration: ReminderConfiguration,
    ) -> Result<(), RepositoryError>;
    /// Inserts any configuration whose event type is missing; returns how many.
    async fn seed_defaults(
        &self,
        defaults: Vec<ReminderConfiguration>,
    ) -> Result<u64, RepositoryError>;

    /// Inserts a pending log row unless the tier is already claimed or sent.
    async fn try_claim(&self, log: ReminderLog) -> Result<bool, RepositoryError>;
    async fn complete(
        &self,
        id: &str,
        status: ReminderLogStatus,
        error: Option<String>,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError>;
    async fn list_logs(
        &self,
        event_type: ReminderEventType,
        reference_id: &str,
    ) -> Result<Vec<ReminderLog>, RepositoryError>;
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_bool_flag(column: &str, value: i64) -> Result<bool, RepositoryError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        raw => Err(RepositoryError::Decode(format!("invalid boolean flag for `{column}`: {raw}"))),
    }
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_enum<T>(
    column: &str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(value).ok_or_else(|| RepositoryError::Decode(format!("unknown {column} `{value}`")))
}
