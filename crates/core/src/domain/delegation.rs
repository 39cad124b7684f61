use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::ApprovalSlot;
use crate::domain::user::{ActingUser, UserId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelegationId(pub String);

impl DelegationId {
    pub fn generate() -> Self {
        Self(format!("DLG-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationScope {
    All,
    Manager,
    Procurement,
    Requisition,
    Contract,
}

impl DelegationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Manager => "manager",
            Self::Procurement => "procurement",
            Self::Requisition => "requisition",
            Self::Contract => "contract",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "manager" => Some(Self::Manager),
            "procurement" => Some(Self::Procurement),
            "requisition" => Some(Self::Requisition),
            "contract" => Some(Self::Contract),
            _ => None,
        }
    }

    pub fn covers(&self, slot: ApprovalSlot) -> bool {
        match (self, slot) {
            (Self::All, _) => true,
            (Self::Manager, ApprovalSlot::Manager) => true,
            (Self::Procurement, ApprovalSlot::Procurement) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: DelegationId,
    pub delegator_id: UserId,
    pub delegate_id: UserId,
    pub scope: DelegationScope,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
    pub reason: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Delegation {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.starts_at <= now && now <= self.ends_at
    }

    /// Still flagged active although its window has closed; readers flip it.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now > self.ends_at
    }

    pub fn covers(&self, slot: ApprovalSlot) -> bool {
        self.scope.covers(slot)
    }

    pub fn grants(&self, delegator: &UserId, slot: ApprovalSlot, now: DateTime<Utc>) -> bool {
        &self.delegator_id == delegator && self.covers(slot) && self.is_effective(now)
    }

    pub fn ensure_deactivatable_by(&self, actor: &ActingUser) -> Result<(), DomainError> {
        if actor.id == self.delegator_id || actor.is_elevated() {
            Ok(())
        } else {
            Err(DomainError::Unauthorized(format!(
                "only the delegator or an administrator may deactivate delegation `{}`",
                self.id.0
            )))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDelegation {
    pub delegator_id: UserId,
    pub delegate_id: UserId,
    pub scope: DelegationScope,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
}

impl NewDelegation {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.delegate_id == self.delegator_id {
            return Err(DomainError::Validation("a user cannot delegate to themselves".to_owned()));
        }
        if self.ends_at <= self.starts_at {
            return Err(DomainError::Validation(
                "delegation end must be after its start".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn into_delegation(
        self,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> Result<Delegation, DomainError> {
        self.validate()?;
        Ok(Delegation {
            id: DelegationId::generate(),
            delegator_id: self.delegator_id,
            delegate_id: self.delegate_id,
            scope: self.scope,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            is_active: true,
            reason: self.reason.filter(|reason| !reason.trim().is_empty()),
            created_by,
            created_at: now,
            deactivated_at: None,
        })
    }
}
