pub mod approvals;
pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod notifier;
pub mod reminders;

pub use approvals::{
    resolve, visibility, ResolutionFailure, ResolutionRequest, ResolvedSlot, SlotAuthority,
    Visibility,
};
pub use audit::{TimelineEntry, TimelineSubject};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::approval::{
    ApprovalId, ApprovalPair, ApprovalRecord, ApprovalSlot, ApprovalStatus, Decision,
    RejectionReason,
};
pub use domain::delegation::{Delegation, DelegationId, DelegationScope, NewDelegation};
pub use domain::initiation::{Initiation, InitiationId, InitiationStatus, SupplierDetails};
pub use domain::onboarding::{Onboarding, OnboardingId, OnboardingStatus, Supplier, SupplierId};
pub use domain::reminder::{ReminderConfiguration, ReminderEventType, ReminderLog, ReminderTier};
pub use domain::user::{ActingUser, User, UserId, UserRole};
pub use errors::{ApplicationError, DomainError, ErrorKind, InterfaceError};
pub use flows::{FlowEngine, OnboardingEvent, OnboardingFlow};
pub use notifier::{Notifier, NotifierError, OutboundMessage, RecordingNotifier, TracingNotifier};
pub use reminders::ReminderSchedule;
