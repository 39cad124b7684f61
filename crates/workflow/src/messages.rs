//! Wording of the workflow's transactional notifications.

use procura_core::domain::delegation::Delegation;
use procura_core::domain::initiation::Initiation;
use procura_core::domain::onboarding::{Onboarding, Supplier};
use procura_core::domain::user::User;
use procura_core::notifier::OutboundMessage;
use procura_core::reminders::PortalLinks;

pub(crate) fn approval_requested(
    initiation: &Initiation,
    recipient: &User,
    on_behalf_of: Option<&User>,
    links: &PortalLinks,
) -> OutboundMessage {
    let (subject, preamble) = match on_behalf_of {
        Some(delegator) => (
            "Supplier Approval Required - New Onboarding Request (Delegated)".to_owned(),
            format!("You are receiving this request as a delegate of {}.\n\n", delegator.name),
        ),
        None => ("Supplier Approval Required - New Onboarding Request".to_owned(), String::new()),
    };

    OutboundMessage::new(
        recipient.email.clone(),
        subject,
        format!(
            "Dear {},\n\n{}A request to onboard {} ({}) is waiting for your decision.\n\n\
             Review it here: {}",
            recipient.name,
            preamble,
            initiation.details.supplier_name,
            initiation.details.product_category,
            links.approvals(initiation),
        ),
    )
}

pub(crate) fn initiation_rejected(
    initiation: &Initiation,
    requester: &User,
    slot_label: &str,
    reason: &str,
) -> OutboundMessage {
    OutboundMessage::new(
        requester.email.clone(),
        format!("Supplier Initiation Request Rejected by {slot_label}"),
        format!(
            "Dear {},\n\nYour request to onboard {} was rejected.\n\nReason: {}\n\n\
             You may revise the request and submit it again.",
            requester.name, initiation.details.supplier_name, reason,
        ),
    )
}

pub(crate) fn supplier_invitation(
    supplier: &Supplier,
    onboarding: &Onboarding,
    links: &PortalLinks,
) -> OutboundMessage {
    OutboundMessage::new(
        supplier.contact_email.clone(),
        "Supplier Onboarding - Welcome to Our Procurement System",
        format!(
            "Dear {},\n\n{} has been approved to start supplier onboarding \
             (reference {}).\n\nPlease complete your registration and upload your documents: {}",
            supplier.contact_person,
            supplier.name,
            supplier.supplier_code,
            links.onboarding(onboarding),
        ),
    )
}

pub(crate) fn supplier_revision_requested(
    supplier: &Supplier,
    onboarding: &Onboarding,
    notes: &str,
    links: &PortalLinks,
) -> OutboundMessage {
    OutboundMessage::new(
        supplier.contact_email.clone(),
        "Action Required: Supplier Registration Revisions",
        format!(
            "Dear {},\n\nYour registration needs changes before it can be approved:\n\n{}\n\n\
             Update your submission here: {}",
            supplier.contact_person,
            notes,
            links.onboarding(onboarding),
        ),
    )
}

pub(crate) fn supplier_outcome(
    supplier: &Supplier,
    approved: bool,
    reason: Option<&str>,
) -> OutboundMessage {
    if approved {
        return OutboundMessage::new(
            supplier.contact_email.clone(),
            "Supplier Onboarding Approved",
            format!(
                "Dear {},\n\n{} is now an approved supplier (code {}).",
                supplier.contact_person, supplier.name, supplier.supplier_code,
            ),
        );
    }

    OutboundMessage::new(
        supplier.contact_email.clone(),
        "Supplier Registration Update",
        format!(
            "Dear {},\n\nWe are unable to approve {} as a supplier at this time.\n\nReason: {}",
            supplier.contact_person,
            supplier.name,
            reason.unwrap_or("not provided"),
        ),
    )
}

pub(crate) fn submission_received(
    requester: &User,
    supplier: &Supplier,
    onboarding: &Onboarding,
    links: &PortalLinks,
) -> OutboundMessage {
    OutboundMessage::new(
        requester.email.clone(),
        "Supplier Onboarding Submission Received",
        format!(
            "Dear {},\n\n{} has submitted its onboarding documents.\n\nReview them here: {}",
            requester.name,
            supplier.name,
            links.review(onboarding),
        ),
    )
}

pub(crate) fn initiation_returned(
    requester: &User,
    initiation: &Initiation,
    notes: &str,
    links: &PortalLinks,
) -> OutboundMessage {
    OutboundMessage::new(
        requester.email.clone(),
        "Supplier Initiation Returned for Correction",
        format!(
            "Dear {},\n\nThe final reviewer returned your request for {} with these \
             notes:\n\n{}\n\nCorrect and resubmit it here: {}",
            requester.name,
            initiation.details.supplier_name,
            notes,
            links.approvals(initiation),
        ),
    )
}

pub(crate) fn delegation_granted(
    delegation: &Delegation,
    delegate: &User,
    delegator: &User,
) -> OutboundMessage {
    OutboundMessage::new(
        delegate.email.clone(),
        format!("Approval Authority Delegated to You by {}", delegator.name),
        format!(
            "Dear {},\n\n{} delegated {} approval authority to you from {} until {}.{}",
            delegate.name,
            delegator.name,
            delegation.scope.as_str(),
            delegation.starts_at.format("%Y-%m-%d %H:%M UTC"),
            delegation.ends_at.format("%Y-%m-%d %H:%M UTC"),
            delegation
                .reason
                .as_deref()
                .map(|reason| format!("\n\nReason: {reason}"))
                .unwrap_or_default(),
        ),
    )
}
