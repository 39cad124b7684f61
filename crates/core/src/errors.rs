use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approvals::ResolutionFailure;
use crate::flows::FlowTransitionError;

/// Coarse failure class shared by every layer, used for exit codes and
/// interface mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    NotFound,
    InvalidState,
    Validation,
    DependencyFailure,
    Persistence,
    Configuration,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("ambiguous approval slot: {0}")]
    DisambiguationRequired(String),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState(_)
            | Self::FlowTransition(FlowTransitionError::InvalidTransition { .. }) => {
                ErrorKind::InvalidState
            }
            Self::Validation(_)
            | Self::DisambiguationRequired(_)
            | Self::FlowTransition(FlowTransitionError::MissingRevisionNotes { .. }) => {
                ErrorKind::Validation
            }
        }
    }
}

impl From<ResolutionFailure> for DomainError {
    fn from(value: ResolutionFailure) -> Self {
        let reason = value.reason();
        match value {
            ResolutionFailure::SelfApproval { .. } | ResolutionFailure::NotAuthorized { .. } => {
                Self::Unauthorized(reason)
            }
            ResolutionFailure::InitiationClosed { .. }
            | ResolutionFailure::SlotNotPending { .. }
            | ResolutionFailure::NoOpenSlot => Self::InvalidState(reason),
            ResolutionFailure::DisambiguationRequired { .. } => {
                Self::DisambiguationRequired(reason)
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(error) => error.kind(),
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Integration(_) => ErrorKind::DependencyFailure,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The record changed since it was loaded. Refresh and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        let kind = value.kind();
        let message = value.to_string();
        match kind {
            ErrorKind::Validation => Self::BadRequest { message, correlation_id },
            ErrorKind::Unauthorized => Self::Forbidden { message, correlation_id },
            ErrorKind::NotFound => Self::NotFound { message, correlation_id },
            ErrorKind::InvalidState => Self::Conflict { message, correlation_id },
            ErrorKind::Persistence | ErrorKind::DependencyFailure => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ErrorKind::Configuration => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::approvals::ResolutionFailure;
    use crate::domain::approval::ApprovalSlot;
    use crate::domain::user::UserId;
    use crate::errors::{ApplicationError, DomainError, ErrorKind, InterfaceError};

    #[test]
    fn validation_error_maps_to_bad_request_interface_error() {
        let interface =
            ApplicationError::from(DomainError::Validation("supplier name is required".to_owned()))
                .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn self_approval_is_classified_as_unauthorized() {
        let error = DomainError::from(ResolutionFailure::SelfApproval {
            user_id: UserId("u-req".to_owned()),
        });

        assert_eq!(error.kind(), ErrorKind::Unauthorized);
        let interface = ApplicationError::from(error).into_interface("req-2");
        assert!(matches!(interface, InterfaceError::Forbidden { .. }));
    }

    #[test]
    fn decided_slot_maps_to_conflict() {
        let error = DomainError::from(ResolutionFailure::SlotNotPending {
            slot: ApprovalSlot::Manager,
            status: crate::domain::approval::ApprovalStatus::Approved,
        });

        assert_eq!(error.kind(), ErrorKind::InvalidState);
        let interface = ApplicationError::from(error).into_interface("req-3");
        assert!(matches!(interface, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn disambiguation_is_a_validation_failure() {
        let error = DomainError::from(ResolutionFailure::DisambiguationRequired {
            candidates: vec![ApprovalSlot::Manager, ApprovalSlot::Procurement],
        });

        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn integration_error_maps_to_service_unavailable() {
        let error = ApplicationError::Integration("smtp relay refused connection".to_owned());
        assert_eq!(error.kind(), ErrorKind::DependencyFailure);

        let interface = error.into_interface("req-4");
        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("portal url missing".to_owned())
            .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
