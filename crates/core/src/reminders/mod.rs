//! Pure pieces of the reminder scan: tier classification, template rendering
//! and per-event-type eligibility.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalPair, ApprovalSlot};
use crate::domain::initiation::Initiation;
use crate::domain::onboarding::{Onboarding, OnboardingStatus, RevisionKind, Supplier};
use crate::domain::reminder::{
    ReminderConfiguration, ReminderEventType, ReminderThresholds, ReminderTier,
};
use crate::domain::user::User;

/// Highest threshold crossed by `elapsed`, or `None` before the first one.
pub fn classify_tier(elapsed: Duration, thresholds: &ReminderThresholds) -> Option<ReminderTier> {
    let crossed = |hours: u32| elapsed >= Duration::hours(i64::from(hours));

    if crossed(thresholds.final_hours) {
        Some(ReminderTier::Final)
    } else if crossed(thresholds.second_hours) {
        Some(ReminderTier::Second)
    } else if crossed(thresholds.first_hours) {
        Some(ReminderTier::First)
    } else {
        None
    }
}

/// Replaces `{name}` placeholders; unknown placeholders are left as written.
pub fn render_template(template: &str, variables: &BTreeMap<String, String>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder_name(&after[..close]) => {
                let name = &after[..close];
                match variables.get(name) {
                    Some(value) => output.push_str(value),
                    None => {
                        output.push('{');
                        output.push_str(name);
                        output.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                output.push('{');
                rest = after;
            }
        }
    }

    output.push_str(rest);
    output
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Reminder configuration for one scan, passed in explicitly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSchedule {
    configurations: BTreeMap<ReminderEventType, ReminderConfiguration>,
}

impl ReminderSchedule {
    pub fn new(configurations: impl IntoIterator<Item = ReminderConfiguration>) -> Self {
        Self {
            configurations: configurations
                .into_iter()
                .map(|config| (config.event_type, config))
                .collect(),
        }
    }

    pub fn defaults(now: DateTime<Utc>) -> Self {
        Self::new(ReminderConfiguration::defaults(now))
    }

    pub fn get(&self, event_type: ReminderEventType) -> Option<&ReminderConfiguration> {
        self.configurations.get(&event_type)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &ReminderConfiguration> {
        self.configurations.values().filter(|config| config.is_enabled)
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortalLinks {
    base_url: String,
}

impl PortalLinks {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_owned() }
    }

    pub fn onboarding(&self, onboarding: &Onboarding) -> String {
        format!("{}/supplier-onboarding?token={}", self.base_url, onboarding.access_token.0)
    }

    pub fn approvals(&self, initiation: &Initiation) -> String {
        format!("{}/approvals/{}", self.base_url, initiation.id.0)
    }

    pub fn review(&self, onboarding: &Onboarding) -> String {
        format!("{}/onboarding/{}/review", self.base_url, onboarding.id.0)
    }
}

/// One pending object that may be owed a reminder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderCandidate {
    pub event_type: ReminderEventType,
    /// Dedup key component; changes whenever the object re-enters the
    /// pending state so a new cycle can escalate again.
    pub reference_id: String,
    pub recipient: String,
    pub trigger_at: DateTime<Utc>,
    pub variables: BTreeMap<String, String>,
}

impl ReminderCandidate {
    fn new(
        event_type: ReminderEventType,
        reference_id: String,
        recipient: &str,
        trigger_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            reference_id,
            recipient: recipient.to_owned(),
            trigger_at,
            variables: BTreeMap::new(),
        }
    }

    fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.variables.insert(key.to_owned(), value.into());
        self
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.trigger_at
    }

    pub fn tier(&self, config: &ReminderConfiguration, now: DateTime<Utc>) -> Option<ReminderTier> {
        classify_tier(self.elapsed(now), &config.thresholds)
    }

    /// Rendered `(subject, body)` for the given tier.
    pub fn render(
        &self,
        config: &ReminderConfiguration,
        tier: ReminderTier,
        now: DateTime<Utc>,
    ) -> (String, String) {
        let mut variables = self.variables.clone();
        variables.insert("hoursAgo".to_owned(), self.elapsed(now).num_hours().to_string());
        variables.insert("tier".to_owned(), tier.ordinal().to_string());
        (
            render_template(&config.subject_template, &variables),
            render_template(&config.body_template, &variables),
        )
    }
}

fn format_date(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d").to_string()
}

pub fn supplier_document_submission(
    onboarding: &Onboarding,
    supplier: &Supplier,
    links: &PortalLinks,
) -> Option<ReminderCandidate> {
    if onboarding.status != OnboardingStatus::AwaitingResponse
        || onboarding.supplier_form_submitted_at.is_some()
    {
        return None;
    }
    let sent_at = onboarding.email_sent_at?;

    Some(
        ReminderCandidate::new(
            ReminderEventType::SupplierDocumentSubmission,
            onboarding.id.0.clone(),
            &supplier.contact_email,
            sent_at,
        )
        .var("supplierName", supplier.name.clone())
        .var("onboardingLink", links.onboarding(onboarding)),
    )
}

pub fn approval_pending(
    initiation: &Initiation,
    slots: &ApprovalPair,
    slot: ApprovalSlot,
    approver: &User,
    requester: Option<&User>,
    links: &PortalLinks,
) -> Option<ReminderCandidate> {
    let record = slots.slot(slot);
    if !initiation.status.accepts_decisions() || !record.is_pending() || !approver.is_active {
        return None;
    }
    let event_type = match slot {
        ApprovalSlot::Manager => ReminderEventType::ManagerApprovalPending,
        ApprovalSlot::Procurement => ReminderEventType::ProcurementApprovalPending,
    };
    let submitted = initiation.submitted_at.unwrap_or(record.created_at);

    Some(
        ReminderCandidate::new(event_type, record.id.0.clone(), &approver.email, record.created_at)
            .var("approverName", approver.name.clone())
            .var("supplierName", initiation.details.supplier_name.clone())
            .var(
                "requesterName",
                requester
                    .map(|user| user.name.clone())
                    .unwrap_or_else(|| initiation.requester_id.0.clone()),
            )
            .var("category", initiation.details.product_category.clone())
            .var("submittedDate", format_date(submitted))
            .var("managerStatus", slots.manager.status.as_str())
            .var("approvalsLink", links.approvals(initiation)),
    )
}

pub fn buyer_review_pending(
    onboarding: &Onboarding,
    supplier: &Supplier,
    requester: &User,
    links: &PortalLinks,
) -> Option<ReminderCandidate> {
    if !matches!(
        onboarding.status,
        OnboardingStatus::DocumentsReceived | OnboardingStatus::UnderReview
    ) {
        return None;
    }
    let submitted_at = onboarding.supplier_form_submitted_at?;

    Some(
        ReminderCandidate::new(
            ReminderEventType::BuyerReviewPending,
            format!("{}:r{}", onboarding.id.0, onboarding.revision_count),
            &requester.email,
            submitted_at,
        )
        .var("requesterName", requester.name.clone())
        .var("supplierName", supplier.name.clone())
        .var("submittedDate", format_date(submitted_at))
        .var("reviewLink", links.review(onboarding)),
    )
}

pub fn supplier_revision_pending(
    onboarding: &Onboarding,
    supplier: &Supplier,
    links: &PortalLinks,
) -> Option<ReminderCandidate> {
    if onboarding.status != OnboardingStatus::RevisionNeeded
        || onboarding.revision_kind != Some(RevisionKind::SupplierDocuments)
    {
        return None;
    }
    let requested_at = onboarding.revision_requested_at?;
    let resubmitted = onboarding.supplier_form_submitted_at;
    if matches!(resubmitted, Some(submitted) if submitted > requested_at) {
        return None;
    }

    Some(
        ReminderCandidate::new(
            ReminderEventType::SupplierRevisionPending,
            format!("{}:r{}", onboarding.id.0, onboarding.revision_count),
            &supplier.contact_email,
            requested_at,
        )
        .var("supplierName", supplier.name.clone())
        .var("revisionNotes", onboarding.revision_notes.clone().unwrap_or_default())
        .var("revisionDate", format_date(requested_at))
        .var("onboardingLink", links.onboarding(onboarding)),
    )
}
