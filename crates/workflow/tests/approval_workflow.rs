mod support;

use std::sync::Arc;

use chrono::Duration;

use procura_core::approvals::{DelegatedSlots, SlotAuthority, VisibilityReason};
use procura_core::audit::TimelineSubject;
use procura_core::domain::approval::{ApprovalSlot, ApprovalStatus, Decision};
use procura_core::domain::delegation::DelegationScope;
use procura_core::domain::initiation::InitiationStatus;
use procura_core::errors::ErrorKind;
use procura_db::repositories::OnboardingRepository;
use procura_workflow::DelegationDirection;

use support::{
    actor, approved, delegation, email, harness, harness_with, id, submitted, FlakyOnboardings,
    ADMIN, APPROVER, DEPUTY, MANAGER, PROCUREMENT, REQUESTER, SUPPLIER_CONTACT,
};

#[tokio::test]
async fn both_approvals_provision_once_and_email_the_supplier() {
    let harness = harness().await;
    let initiation = submitted(&harness).await;

    let first = harness
        .initiations
        .record_decision(&initiation.id, &actor(MANAGER), None, Decision::approve())
        .await
        .expect("manager approves")
        .value;
    assert_eq!(first.initiation.status, InitiationStatus::ManagerApproved);
    assert!(first.onboarding.is_none());

    let second = harness
        .initiations
        .record_decision(&initiation.id, &actor(PROCUREMENT), None, Decision::approve())
        .await
        .expect("procurement approves");
    assert!(second.is_clean(), "unexpected warnings: {:?}", second.warnings);
    assert_eq!(second.value.initiation.status, InitiationStatus::SupplierEmailed);

    let onboarding = second.value.onboarding.expect("onboarding provisioned");
    let stored = harness
        .ctx
        .onboardings
        .find_by_initiation(&initiation.id)
        .await
        .expect("lookup")
        .expect("stored onboarding");
    assert_eq!(stored.id, onboarding.id);
    assert!(stored.email_sent_at.is_some());

    let open = harness.ctx.onboardings.list_open().await.expect("list open");
    assert_eq!(open.len(), 1);
    assert_eq!(harness.notifier.sent_to(SUPPLIER_CONTACT).len(), 1);

    let history = harness
        .ctx
        .history(&TimelineSubject::Initiation(initiation.id.clone()))
        .await
        .expect("history");
    let actions: Vec<&str> = history.iter().map(|entry| entry.action.as_str()).collect();
    assert!(actions.contains(&"manager_approved"));
    assert!(actions.contains(&"procurement_approved"));
    assert!(actions.contains(&"supplier_emailed"));
}

#[tokio::test]
async fn manager_rejection_short_circuits_and_strands_the_other_slot() {
    let harness = harness().await;
    let initiation = submitted(&harness).await;

    let rejected = harness
        .initiations
        .record_decision(
            &initiation.id,
            &actor(MANAGER),
            Some(ApprovalSlot::Manager),
            Decision::reject("supplier is already on the restricted list").expect("reason"),
        )
        .await
        .expect("manager rejects")
        .value;

    assert_eq!(rejected.initiation.status, InitiationStatus::Rejected);
    assert_eq!(rejected.slots.procurement.status, ApprovalStatus::Pending);

    let stranded = harness
        .initiations
        .record_decision(&initiation.id, &actor(PROCUREMENT), None, Decision::approve())
        .await
        .expect_err("rejected initiations accept no decisions");
    assert_eq!(stranded.kind(), ErrorKind::InvalidState);

    let notices = harness.notifier.sent_to(&email(REQUESTER));
    assert_eq!(notices.len(), 1);
    assert!(notices[0].subject.contains("Rejected by Manager"));
    assert!(notices[0].body.contains("supplier is already on the restricted list"));
}

#[tokio::test]
async fn delegate_decides_inside_the_window_on_behalf_of_the_manager() {
    let harness = harness().await;
    harness
        .delegations
        .create(&actor(MANAGER), delegation(MANAGER, DEPUTY, DelegationScope::All, 9))
        .await
        .expect("delegate");
    let initiation = submitted(&harness).await;

    harness.clock.advance(Duration::days(4));
    let receipt = harness
        .initiations
        .record_decision(&initiation.id, &actor(DEPUTY), None, Decision::approve())
        .await
        .expect("delegate approves")
        .value;

    assert_eq!(receipt.resolved.slot, ApprovalSlot::Manager);
    assert!(matches!(receipt.resolved.authority, SlotAuthority::Delegated { .. }));
    assert_eq!(receipt.slots.manager.decided_by, Some(id(DEPUTY)));
    assert_eq!(receipt.slots.manager.acting_for, Some(id(MANAGER)));

    let history = harness
        .ctx
        .history(&TimelineSubject::Initiation(initiation.id.clone()))
        .await
        .expect("history");
    let decision = history
        .iter()
        .find(|entry| entry.action == "manager_approved")
        .expect("decision entry");
    assert_eq!(decision.actor, DEPUTY);
    assert_eq!(decision.acting_for, Some(id(MANAGER)));
}

#[tokio::test]
async fn listing_after_the_window_expires_the_delegation_and_revokes_authority() {
    let harness = harness().await;
    harness
        .delegations
        .create(&actor(MANAGER), delegation(MANAGER, DEPUTY, DelegationScope::All, 9))
        .await
        .expect("delegate");
    let initiation = submitted(&harness).await;

    harness.clock.advance(Duration::days(10));
    let listed = harness
        .delegations
        .list(&actor(DEPUTY), DelegationDirection::Received, true)
        .await
        .expect("list")
        .value;
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].is_active);

    let stored = harness
        .ctx
        .delegations
        .find_by_id(&listed[0].id)
        .await
        .expect("lookup")
        .expect("row retained");
    assert!(!stored.is_active);

    let refused = harness
        .initiations
        .record_decision(&initiation.id, &actor(DEPUTY), None, Decision::approve())
        .await
        .expect_err("expired delegate");
    assert_eq!(refused.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn requester_cannot_decide_even_with_an_elevated_role() {
    let harness = harness().await;
    let draft = harness
        .initiations
        .create_draft(&actor(ADMIN), support::details())
        .await
        .expect("draft")
        .value;
    harness
        .initiations
        .submit(&draft.id, &actor(ADMIN), &id(MANAGER), &id(PROCUREMENT))
        .await
        .expect("submit");

    for slot in [None, Some(ApprovalSlot::Manager), Some(ApprovalSlot::Procurement)] {
        let error = harness
            .initiations
            .record_decision(&draft.id, &actor(ADMIN), slot, Decision::approve())
            .await
            .expect_err("self approval");
        assert_eq!(error.kind(), ErrorKind::Unauthorized);
    }
}

#[tokio::test]
async fn elevated_approver_must_name_a_slot_while_both_are_open() {
    let harness = harness().await;
    let initiation = submitted(&harness).await;

    let ambiguous = harness
        .initiations
        .record_decision(&initiation.id, &actor(APPROVER), None, Decision::approve())
        .await
        .expect_err("two open slots");
    assert_eq!(ambiguous.kind(), ErrorKind::Validation);

    let named = harness
        .initiations
        .record_decision(
            &initiation.id,
            &actor(APPROVER),
            Some(ApprovalSlot::Procurement),
            Decision::approve(),
        )
        .await
        .expect("named slot")
        .value;
    assert_eq!(named.resolved.authority, SlotAuthority::Elevated);
    assert_eq!(named.initiation.status, InitiationStatus::ProcurementApproved);

    let remaining = harness
        .initiations
        .record_decision(&initiation.id, &actor(APPROVER), None, Decision::approve())
        .await
        .expect("single open slot resolves")
        .value;
    assert_eq!(remaining.resolved.slot, ApprovalSlot::Manager);
}

#[tokio::test]
async fn deciding_a_decided_slot_reports_a_conflict() {
    let harness = harness().await;
    let initiation = submitted(&harness).await;
    harness
        .initiations
        .record_decision(
            &initiation.id,
            &actor(MANAGER),
            Some(ApprovalSlot::Manager),
            Decision::approve(),
        )
        .await
        .expect("first decision");
    let again = harness
        .initiations
        .record_decision(
            &initiation.id,
            &actor(MANAGER),
            Some(ApprovalSlot::Manager),
            Decision::reject("changed my mind").expect("reason"),
        )
        .await
        .expect_err("slot already decided");
    assert_eq!(again.kind(), ErrorKind::InvalidState);

    let (_, slots) = harness.initiations.find(&initiation.id).await.expect("find");
    let slots = slots.expect("slots");
    assert_eq!(slots.manager.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn concurrent_decisions_converge_on_a_single_provisioning() {
    let harness = harness().await;
    let initiation = submitted(&harness).await;

    let manager = actor(MANAGER);
    let procurement = actor(PROCUREMENT);
    let service = &harness.initiations;
    let (left, right) = tokio::join!(
        service.record_decision(&initiation.id, &manager, None, Decision::approve()),
        service.record_decision(&initiation.id, &procurement, None, Decision::approve()),
    );
    let left = left.expect("manager decision").value;
    let right = right.expect("procurement decision").value;

    let provisioned = [&left, &right].iter().filter(|receipt| receipt.onboarding.is_some()).count();
    assert_eq!(provisioned, 1);

    let (stored, _) = harness.initiations.find(&initiation.id).await.expect("find");
    assert_eq!(stored.status, InitiationStatus::SupplierEmailed);
    assert_eq!(harness.ctx.onboardings.list_open().await.expect("open").len(), 1);
    assert_eq!(harness.notifier.sent_to(SUPPLIER_CONTACT).len(), 1);
}

#[tokio::test]
async fn failed_invitation_leaves_the_initiation_approved_until_retried() {
    let harness = harness().await;
    harness.notifier.fail_for(SUPPLIER_CONTACT);
    let initiation = submitted(&harness).await;

    harness
        .initiations
        .record_decision(&initiation.id, &actor(MANAGER), None, Decision::approve())
        .await
        .expect("manager approves");
    let outcome = harness
        .initiations
        .record_decision(&initiation.id, &actor(PROCUREMENT), None, Decision::approve())
        .await
        .expect("approval commits despite notifier failure");

    assert_eq!(outcome.value.initiation.status, InitiationStatus::Approved);
    assert!(outcome.warnings.iter().any(|warning| warning.kind() == ErrorKind::DependencyFailure));
    let onboarding = outcome.value.onboarding.expect("provisioned before notifying");
    assert!(onboarding.email_sent_at.is_none());

    harness.notifier.recover();
    let retried = harness
        .initiations
        .retry_supplier_invitation(&initiation.id, &actor(REQUESTER))
        .await
        .expect("retry");
    assert!(retried.is_clean());
    assert_eq!(retried.value.status, InitiationStatus::SupplierEmailed);
    assert_eq!(harness.ctx.onboardings.list_open().await.expect("open").len(), 1);
}

#[tokio::test]
async fn failed_provisioning_is_completed_by_the_invitation_retry() {
    let onboardings = Arc::new(FlakyOnboardings::default());
    let store: Arc<dyn OnboardingRepository> = onboardings.clone();
    let harness = harness_with(move |ctx| ctx.onboardings = store).await;
    let initiation = submitted(&harness).await;
    harness
        .initiations
        .record_decision(&initiation.id, &actor(MANAGER), None, Decision::approve())
        .await
        .expect("manager approves");

    onboardings.fail_next_provision();
    let decided = harness
        .initiations
        .record_decision(&initiation.id, &actor(PROCUREMENT), None, Decision::approve())
        .await
        .expect("approval stays committed");
    assert_eq!(decided.value.initiation.status, InitiationStatus::Approved);
    assert!(decided.value.onboarding.is_none());
    assert_eq!(decided.warnings.len(), 1);
    assert_eq!(decided.warnings[0].kind(), ErrorKind::DependencyFailure);
    assert!(harness
        .ctx
        .onboardings
        .find_by_initiation(&initiation.id)
        .await
        .expect("find")
        .is_none());
    assert!(harness.notifier.sent_to(SUPPLIER_CONTACT).is_empty());

    let retried = harness
        .initiations
        .retry_supplier_invitation(&initiation.id, &actor(REQUESTER))
        .await
        .expect("retry provisions");
    assert!(retried.is_clean(), "unexpected warnings: {:?}", retried.warnings);
    assert_eq!(retried.value.status, InitiationStatus::SupplierEmailed);

    let onboarding = harness
        .ctx
        .onboardings
        .find_by_initiation(&initiation.id)
        .await
        .expect("find")
        .expect("provisioned on retry");
    assert!(onboarding.email_sent_at.is_some());
    assert_eq!(harness.notifier.sent_to(SUPPLIER_CONTACT).len(), 1);

    let again = harness
        .initiations
        .retry_supplier_invitation(&initiation.id, &actor(REQUESTER))
        .await
        .expect_err("already emailed");
    assert_eq!(again.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn submission_validates_approvers_and_notifies_their_delegates() {
    let harness = harness().await;
    let draft = harness
        .initiations
        .create_draft(&actor(REQUESTER), support::details())
        .await
        .expect("draft")
        .value;

    let self_assigned = harness
        .initiations
        .submit(&draft.id, &actor(REQUESTER), &id(REQUESTER), &id(PROCUREMENT))
        .await
        .expect_err("requester as approver");
    assert_eq!(self_assigned.kind(), ErrorKind::Validation);

    let unknown = harness
        .initiations
        .submit(&draft.id, &actor(REQUESTER), &id(MANAGER), &id("u-nobody"))
        .await
        .expect_err("unknown approver");
    assert_eq!(unknown.kind(), ErrorKind::Validation);

    harness
        .delegations
        .create(&actor(MANAGER), delegation(MANAGER, DEPUTY, DelegationScope::Manager, 5))
        .await
        .expect("delegate");
    harness
        .initiations
        .submit(&draft.id, &actor(REQUESTER), &id(MANAGER), &id(PROCUREMENT))
        .await
        .expect("submit");

    assert_eq!(harness.notifier.sent_to(&email(MANAGER)).len(), 1);
    assert_eq!(harness.notifier.sent_to(&email(PROCUREMENT)).len(), 1);
    let delegated = harness
        .notifier
        .sent_to(&email(DEPUTY))
        .into_iter()
        .filter(|message| message.subject.ends_with("(Delegated)"))
        .count();
    assert_eq!(delegated, 1);
}

#[tokio::test]
async fn listing_annotates_delegated_slots() {
    let harness = harness().await;
    harness
        .delegations
        .create(&actor(MANAGER), delegation(MANAGER, DEPUTY, DelegationScope::Manager, 5))
        .await
        .expect("delegate");
    let initiation = submitted(&harness).await;

    let visible = harness.initiations.list_visible(&actor(DEPUTY)).await.expect("list").value;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].initiation.id, initiation.id);
    assert_eq!(visible[0].visibility.reason, VisibilityReason::Delegate);
    assert_eq!(visible[0].visibility.delegated, Some(DelegatedSlots::Manager));
    assert_eq!(visible[0].visibility.delegated_by, vec![id(MANAGER)]);

    let stranger = harness.initiations.list_visible(&actor("u-stranger")).await.expect("list");
    assert!(stranger.value.is_empty());
}

#[tokio::test]
async fn resubmitting_a_rejected_initiation_opens_fresh_slots() {
    let harness = harness().await;
    let initiation = submitted(&harness).await;
    harness
        .initiations
        .record_decision(
            &initiation.id,
            &actor(PROCUREMENT),
            None,
            Decision::reject("missing tax clearance").expect("reason"),
        )
        .await
        .expect("reject");

    let mut corrected = support::details();
    corrected.payment_terms = "60 days".to_owned();
    harness
        .initiations
        .update_draft(&initiation.id, &actor(REQUESTER), corrected)
        .await
        .expect("rejected initiations are editable");
    let resubmitted = harness
        .initiations
        .submit(&initiation.id, &actor(REQUESTER), &id(MANAGER), &id(PROCUREMENT))
        .await
        .expect("resubmit")
        .value;

    assert_eq!(resubmitted.status, InitiationStatus::Submitted);
    let (_, slots) = harness.initiations.find(&initiation.id).await.expect("find");
    let slots = slots.expect("slots");
    assert_eq!(slots.manager.status, ApprovalStatus::Pending);
    assert_eq!(slots.procurement.status, ApprovalStatus::Pending);

    let archived =
        harness.ctx.initiations.list_archived_slots(&initiation.id).await.expect("archive");
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].slot, ApprovalSlot::Procurement);
    assert_eq!(archived[0].status, ApprovalStatus::Rejected);
    assert_eq!(archived[0].comment.as_deref(), Some("missing tax clearance"));
    assert_eq!(archived[0].decided_by, Some(id(PROCUREMENT)));
}

#[tokio::test]
async fn notifications_carry_the_configured_sender() {
    const SENDER: &str = "buying@highveld-procurement.example";
    let harness = harness_with(|ctx| ctx.sender_address = SENDER.to_owned()).await;
    approved(&harness).await;

    let sent = harness.notifier.sent();
    assert!(sent.len() >= 3, "approvers and supplier are notified");
    assert!(sent.iter().all(|message| message.sender.as_deref() == Some(SENDER)));
}

#[tokio::test]
async fn approved_initiations_are_locked_for_editing() {
    let harness = harness().await;
    let (initiation, _) = approved(&harness).await;

    let error = harness
        .initiations
        .update_draft(&initiation.id, &actor(REQUESTER), support::details())
        .await
        .expect_err("locked");
    assert_eq!(error.kind(), ErrorKind::InvalidState);
}
