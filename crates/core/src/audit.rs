use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::delegation::DelegationId;
use crate::domain::initiation::InitiationId;
use crate::domain::onboarding::OnboardingId;
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TimelineSubject {
    Initiation(InitiationId),
    Onboarding(OnboardingId),
    Delegation(DelegationId),
}

impl TimelineSubject {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initiation(_) => "initiation",
            Self::Onboarding(_) => "onboarding",
            Self::Delegation(_) => "delegation",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Initiation(id) => &id.0,
            Self::Onboarding(id) => &id.0,
            Self::Delegation(id) => &id.0,
        }
    }

    pub fn from_parts(kind: &str, id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        match kind {
            "initiation" => Some(Self::Initiation(InitiationId(id))),
            "onboarding" => Some(Self::Onboarding(OnboardingId(id))),
            "delegation" => Some(Self::Delegation(DelegationId(id))),
            _ => None,
        }
    }
}

/// Append-only record of one state-changing action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: String,
    pub subject: TimelineSubject,
    /// User id, or `system` for scheduled work.
    pub actor: String,
    pub acting_for: Option<UserId>,
    pub action: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl TimelineEntry {
    pub const SYSTEM_ACTOR: &'static str = "system";

    pub fn new(
        subject: TimelineSubject,
        actor: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("TLE-{}", Uuid::new_v4().simple()),
            subject,
            actor: actor.into(),
            acting_for: None,
            action: action.into(),
            description: description.into(),
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn acting_for(mut self, delegator: Option<UserId>) -> Self {
        self.acting_for = delegator;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::audit::{TimelineEntry, TimelineSubject};
    use crate::domain::initiation::InitiationId;
    use crate::domain::user::UserId;

    #[test]
    fn entry_records_delegated_actor_and_metadata() {
        let entry = TimelineEntry::new(
            TimelineSubject::Initiation(InitiationId("INI-42".to_owned())),
            "u-deputy",
            "approval.manager_approved",
            "Manager approval recorded",
            Utc::now(),
        )
        .acting_for(Some(UserId("u-mgr".to_owned())))
        .with_metadata("slot", "manager");

        assert!(entry.id.starts_with("TLE-"));
        assert_eq!(entry.subject.kind(), "initiation");
        assert_eq!(entry.subject.id(), "INI-42");
        assert_eq!(entry.acting_for, Some(UserId("u-mgr".to_owned())));
        assert_eq!(entry.metadata.get("slot").map(String::as_str), Some("manager"));
    }

    #[test]
    fn subject_round_trips_through_stored_parts() {
        let subject = TimelineSubject::from_parts("delegation", "DLG-7").expect("known kind");
        assert_eq!(subject.kind(), "delegation");
        assert_eq!(subject.id(), "DLG-7");
        assert!(TimelineSubject::from_parts("quote", "Q-1").is_none());
    }
}
