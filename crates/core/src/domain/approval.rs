use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::initiation::{InitiationId, InitiationStatus};
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(format!("APR-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalSlot {
    Manager,
    Procurement,
}

impl ApprovalSlot {
    pub const ALL: [ApprovalSlot; 2] = [ApprovalSlot::Manager, ApprovalSlot::Procurement];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Procurement => "procurement",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manager" => Some(Self::Manager),
            "procurement" => Some(Self::Procurement),
            _ => None,
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Self::Manager => Self::Procurement,
            Self::Procurement => Self::Manager,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: ApprovalId,
    pub initiation_id: InitiationId,
    pub slot: ApprovalSlot,
    /// Assigned at submission and never reassigned.
    pub approver_id: UserId,
    pub status: ApprovalStatus,
    pub comment: Option<String>,
    pub decided_by: Option<UserId>,
    pub acting_for: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRecord {
    pub fn pending(
        initiation_id: InitiationId,
        slot: ApprovalSlot,
        approver_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalId::generate(),
            initiation_id,
            slot,
            approver_id,
            status: ApprovalStatus::Pending,
            comment: None,
            decided_by: None,
            acting_for: None,
            decided_at: None,
            created_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

/// The two slot records owned by one initiation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPair {
    pub manager: ApprovalRecord,
    pub procurement: ApprovalRecord,
}

impl ApprovalPair {
    pub fn open(
        initiation_id: &InitiationId,
        manager_approver: UserId,
        procurement_approver: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            manager: ApprovalRecord::pending(
                initiation_id.clone(),
                ApprovalSlot::Manager,
                manager_approver,
                now,
            ),
            procurement: ApprovalRecord::pending(
                initiation_id.clone(),
                ApprovalSlot::Procurement,
                procurement_approver,
                now,
            ),
        }
    }

    pub fn slot(&self, slot: ApprovalSlot) -> &ApprovalRecord {
        match slot {
            ApprovalSlot::Manager => &self.manager,
            ApprovalSlot::Procurement => &self.procurement,
        }
    }

    pub fn slot_mut(&mut self, slot: ApprovalSlot) -> &mut ApprovalRecord {
        match slot {
            ApprovalSlot::Manager => &mut self.manager,
            ApprovalSlot::Procurement => &mut self.procurement,
        }
    }

    pub fn records(&self) -> [&ApprovalRecord; 2] {
        [&self.manager, &self.procurement]
    }

    pub fn pending_slots(&self) -> Vec<ApprovalSlot> {
        self.records().into_iter().filter(|record| record.is_pending()).map(|r| r.slot).collect()
    }

    pub fn aggregate_status(&self) -> InitiationStatus {
        aggregate_status(self.manager.status, self.procurement.status)
    }
}

/// Aggregate initiation status as a pure function of the two slot statuses.
/// A rejection on either slot wins regardless of the other.
pub fn aggregate_status(manager: ApprovalStatus, procurement: ApprovalStatus) -> InitiationStatus {
    use ApprovalStatus::{Approved, Pending, Rejected};

    match (manager, procurement) {
        (Rejected, _) | (_, Rejected) => InitiationStatus::Rejected,
        (Approved, Approved) => InitiationStatus::Approved,
        (Approved, Pending) => InitiationStatus::ManagerApproved,
        (Pending, Approved) => InitiationStatus::ProcurementApproved,
        (Pending, Pending) => InitiationStatus::Submitted,
    }
}

/// Human-readable rejection reason; never blank.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RejectionReason(String);

impl RejectionReason {
    pub fn new(reason: impl Into<String>) -> Result<Self, DomainError> {
        let reason = reason.into();
        let trimmed = reason.trim();
        if trimmed.is_empty() {
            return Err(DomainError::Validation("a rejection reason is required".to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RejectionReason {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RejectionReason> for String {
    fn from(value: RejectionReason) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Approve { comment: Option<String> },
    Reject { reason: RejectionReason },
}

impl Decision {
    pub fn approve() -> Self {
        Self::Approve { comment: None }
    }

    pub fn reject(reason: impl Into<String>) -> Result<Self, DomainError> {
        Ok(Self::Reject { reason: RejectionReason::new(reason)? })
    }

    pub fn status(&self) -> ApprovalStatus {
        match self {
            Self::Approve { .. } => ApprovalStatus::Approved,
            Self::Reject { .. } => ApprovalStatus::Rejected,
        }
    }

    pub fn comment(&self) -> Option<&str> {
        match self {
            Self::Approve { comment } => comment.as_deref(),
            Self::Reject { reason } => Some(reason.as_str()),
        }
    }
}
