//! Async services that drive the approval workflow over the repositories:
//! initiation decisions, delegation, onboarding and the reminder scan.

pub mod context;
pub mod delegations;
pub mod initiations;
mod messages;
pub mod onboarding;
pub mod reminders;

pub use context::{Outcome, WorkflowContext, DEFAULT_DECISION_RETRY_LIMIT};
pub use delegations::{DelegationDirection, DelegationService};
pub use initiations::{DecisionReceipt, InitiationService, VisibleInitiation};
pub use onboarding::OnboardingService;
pub use reminders::{ReminderEngine, ScanFailure, ScanSummary};
