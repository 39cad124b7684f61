pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, OnboardingFlow};
pub use states::{FlowAction, FlowContext, OnboardingEvent, TransitionOutcome};
