use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderEventType {
    SupplierDocumentSubmission,
    ManagerApprovalPending,
    ProcurementApprovalPending,
    BuyerReviewPending,
    SupplierRevisionPending,
}

impl ReminderEventType {
    pub const ALL: [ReminderEventType; 5] = [
        ReminderEventType::SupplierDocumentSubmission,
        ReminderEventType::ManagerApprovalPending,
        ReminderEventType::ProcurementApprovalPending,
        ReminderEventType::BuyerReviewPending,
        ReminderEventType::SupplierRevisionPending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupplierDocumentSubmission => "supplier_document_submission",
            Self::ManagerApprovalPending => "manager_approval_pending",
            Self::ProcurementApprovalPending => "procurement_approval_pending",
            Self::BuyerReviewPending => "buyer_review_pending",
            Self::SupplierRevisionPending => "supplier_revision_pending",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "supplier_document_submission" => Some(Self::SupplierDocumentSubmission),
            "manager_approval_pending" => Some(Self::ManagerApprovalPending),
            "procurement_approval_pending" => Some(Self::ProcurementApprovalPending),
            "buyer_review_pending" => Some(Self::BuyerReviewPending),
            "supplier_revision_pending" => Some(Self::SupplierRevisionPending),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderTier {
    First,
    Second,
    Final,
}

impl ReminderTier {
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::First => 1,
            Self::Second => 2,
            Self::Final => 3,
        }
    }

    pub fn from_ordinal(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::First),
            2 => Some(Self::Second),
            3 => Some(Self::Final),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderThresholds {
    pub first_hours: u32,
    pub second_hours: u32,
    pub final_hours: u32,
}

impl ReminderThresholds {
    pub fn new(first_hours: u32, second_hours: u32, final_hours: u32) -> Result<Self, DomainError> {
        let thresholds = Self { first_hours, second_hours, final_hours };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.first_hours == 0 {
            return Err(DomainError::Validation(
                "first reminder threshold must be at least one hour".to_owned(),
            ));
        }
        if !(self.first_hours < self.second_hours && self.second_hours < self.final_hours) {
            return Err(DomainError::Validation(format!(
                "reminder thresholds must ascend strictly, got {}h/{}h/{}h",
                self.first_hours, self.second_hours, self.final_hours
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderConfiguration {
    pub event_type: ReminderEventType,
    pub thresholds: ReminderThresholds,
    pub is_enabled: bool,
    pub subject_template: String,
    pub body_template: String,
    pub updated_at: DateTime<Utc>,
}

impl ReminderConfiguration {
    pub fn default_for(event_type: ReminderEventType, now: DateTime<Utc>) -> Self {
        let (first_hours, second_hours, final_hours, subject, body) = match event_type {
            ReminderEventType::SupplierDocumentSubmission => (
                24,
                72,
                120,
                "Reminder: Complete Your Supplier Onboarding",
                "Dear {supplierName},\n\n\
                 We sent your onboarding invitation {hoursAgo} hours ago and your documents are \
                 still outstanding.\n\n\
                 Complete your registration here: {onboardingLink}\n\n\
                 Procurement Team",
            ),
            ReminderEventType::ManagerApprovalPending => (
                24,
                48,
                72,
                "Reminder: Supplier Approval Pending",
                "Dear {approverName},\n\n\
                 The supplier initiation for {supplierName} requested by {requesterName} \
                 ({category}) has waited {hoursAgo} hours for your manager approval since \
                 {submittedDate}.\n\n\
                 Review it here: {approvalsLink}",
            ),
            ReminderEventType::ProcurementApprovalPending => (
                24,
                48,
                72,
                "Reminder: Procurement Approval Pending",
                "Dear {approverName},\n\n\
                 The supplier initiation for {supplierName} requested by {requesterName} \
                 ({category}) has waited {hoursAgo} hours for procurement approval since \
                 {submittedDate}. Manager decision: {managerStatus}.\n\n\
                 Review it here: {approvalsLink}",
            ),
            ReminderEventType::BuyerReviewPending => (
                48,
                96,
                144,
                "Reminder: Supplier Documents Awaiting Review",
                "Dear {requesterName},\n\n\
                 {supplierName} submitted onboarding documents on {submittedDate}; they have \
                 waited {hoursAgo} hours for review.\n\n\
                 Review them here: {reviewLink}",
            ),
            ReminderEventType::SupplierRevisionPending => (
                48,
                96,
                144,
                "Reminder: Document Revision Required",
                "Dear {supplierName},\n\n\
                 On {revisionDate} we asked you to revise your onboarding documents:\n\
                 {revisionNotes}\n\n\
                 Please resubmit here: {onboardingLink}",
            ),
        };

        Self {
            event_type,
            thresholds: ReminderThresholds { first_hours, second_hours, final_hours },
            is_enabled: true,
            subject_template: subject.to_owned(),
            body_template: body.to_owned(),
            updated_at: now,
        }
    }

    pub fn defaults(now: DateTime<Utc>) -> Vec<Self> {
        ReminderEventType::ALL
            .into_iter()
            .map(|event_type| Self::default_for(event_type, now))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderLogStatus {
    Pending,
    Sent,
    Failed,
}

impl ReminderLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// A pending or sent row exhausts its tier; a failed one does not.
    pub fn exhausts_tier(&self) -> bool {
        matches!(self, Self::Pending | Self::Sent)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderLog {
    pub id: String,
    pub event_type: ReminderEventType,
    pub reference_id: String,
    pub tier: ReminderTier,
    pub status: ReminderLogStatus,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl ReminderLog {
    pub fn claim(
        event_type: ReminderEventType,
        reference_id: impl Into<String>,
        tier: ReminderTier,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("RML-{}", Uuid::new_v4().simple()),
            event_type,
            reference_id: reference_id.into(),
            tier,
            status: ReminderLogStatus::Pending,
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            error: None,
            created_at: now,
            sent_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        ReminderConfiguration, ReminderEventType, ReminderLogStatus, ReminderThresholds,
        ReminderTier,
    };

    #[test]
    fn defaults_cover_every_event_type_with_ascending_thresholds() {
        let defaults = ReminderConfiguration::defaults(Utc::now());

        assert_eq!(defaults.len(), ReminderEventType::ALL.len());
        for config in &defaults {
            assert!(config.is_enabled);
            assert!(config.thresholds.validate().is_ok(), "{:?}", config.event_type);
            assert!(!config.subject_template.is_empty());
        }

        let buyer =
            ReminderConfiguration::default_for(ReminderEventType::BuyerReviewPending, Utc::now());
        assert_eq!(
            buyer.thresholds,
            ReminderThresholds { first_hours: 48, second_hours: 96, final_hours: 144 }
        );
    }

    #[test]
    fn thresholds_must_ascend() {
        assert!(ReminderThresholds::new(24, 24, 72).is_err());
        assert!(ReminderThresholds::new(0, 1, 2).is_err());
        assert!(ReminderThresholds::new(72, 48, 24).is_err());
        assert!(ReminderThresholds::new(1, 2, 3).is_ok());
    }

    #[test]
    fn only_failed_rows_leave_a_tier_open() {
        assert!(ReminderLogStatus::Pending.exhausts_tier());
        assert!(ReminderLogStatus::Sent.exhausts_tier());
        assert!(!ReminderLogStatus::Failed.exhausts_tier());
        assert_eq!(ReminderTier::from_ordinal(2), Some(ReminderTier::Second));
        assert_eq!(ReminderTier::from_ordinal(4), None);
    }
}
