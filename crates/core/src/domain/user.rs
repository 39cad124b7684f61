use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Approver,
    Manager,
    ProcurementManager,
    Requester,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Approver => "approver",
            Self::Manager => "manager",
            Self::ProcurementManager => "procurement_manager",
            Self::Requester => "requester",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "approver" => Some(Self::Approver),
            "manager" => Some(Self::Manager),
            "procurement_manager" => Some(Self::ProcurementManager),
            "requester" => Some(Self::Requester),
            _ => None,
        }
    }

    /// Elevated roles may act on either approval slot, subject to slot
    /// disambiguation.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Admin | Self::Approver)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
}

/// Identity supplied by the session provider for the current operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActingUser {
    pub id: UserId,
    pub role: UserRole,
}

impl ActingUser {
    pub fn new(id: impl Into<String>, role: UserRole) -> Self {
        Self { id: UserId(id.into()), role }
    }

    pub fn is_elevated(&self) -> bool {
        self.role.is_elevated()
    }

    pub fn can_review_onboarding(&self) -> bool {
        self.is_elevated() || self.role == UserRole::ProcurementManager
    }
}

impl From<&User> for ActingUser {
    fn from(user: &User) -> Self {
        Self { id: user.id.clone(), role: user.role }
    }
}

#[cfg(test)]
mod tests {
    use super::{ActingUser, UserRole};

    #[test]
    fn only_admin_and_generic_approver_are_elevated() {
        assert!(UserRole::Admin.is_elevated());
        assert!(UserRole::Approver.is_elevated());
        assert!(!UserRole::Manager.is_elevated());
        assert!(!UserRole::ProcurementManager.is_elevated());
        assert!(!UserRole::Requester.is_elevated());
    }

    #[test]
    fn procurement_managers_review_onboarding_without_elevation() {
        let reviewer = ActingUser::new("u-pm", UserRole::ProcurementManager);
        assert!(reviewer.can_review_onboarding());
        assert!(!reviewer.is_elevated());
        assert!(!ActingUser::new("u-mgr", UserRole::Manager).can_review_onboarding());
    }

    #[test]
    fn role_storage_encoding_is_stable() {
        for role in [
            UserRole::Admin,
            UserRole::Approver,
            UserRole::Manager,
            UserRole::ProcurementManager,
            UserRole::Requester,
        ] {
            assert_eq!(UserRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(UserRole::parse("superuser"), None);
    }
}
