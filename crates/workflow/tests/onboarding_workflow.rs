mod support;

use std::sync::Arc;

use procura_core::audit::TimelineSubject;
use procura_core::domain::approval::{ApprovalStatus, Decision};
use procura_core::domain::initiation::InitiationStatus;
use procura_core::domain::onboarding::{
    DocumentUpload, Onboarding, OnboardingStatus, RevisionKind, SupplierStatus,
    CREDIT_APPLICATION_CATEGORY,
};
use procura_core::errors::ErrorKind;
use procura_db::repositories::{InitiationRepository, OnboardingRepository};

use support::{
    actor, approved, email, harness, harness_with, id, ContendedInitiations, FlakyOnboardings,
    Harness, MANAGER, PROCUREMENT, REQUESTER, SUPPLIER_CONTACT,
};

const CORRECTED_CONTACT: &str = "accounts@highveld.example";

fn uploads(files: &[(&str, &str)]) -> Vec<DocumentUpload> {
    files
        .iter()
        .map(|(category, filename)| DocumentUpload {
            category: (*category).to_owned(),
            filename: (*filename).to_owned(),
        })
        .collect()
}

async fn submit(harness: &Harness, onboarding: &Onboarding) -> Onboarding {
    harness
        .onboarding
        .submit_documents(
            &onboarding.access_token.0,
            uploads(&[("bank_confirmation", "bank.pdf"), ("tax_clearance", "tax.pdf")]),
        )
        .await
        .expect("documents accepted")
        .value
}

async fn in_final_approval(harness: &Harness) -> Onboarding {
    let (_, onboarding) = approved(harness).await;
    submit(harness, &onboarding).await;
    harness
        .onboarding
        .start_review(&onboarding.id, &actor(PROCUREMENT))
        .await
        .expect("review");
    harness
        .onboarding
        .request_final_approval(&onboarding.id, &actor(PROCUREMENT))
        .await
        .expect("final approval")
        .value
}

#[tokio::test]
async fn document_submission_notifies_the_requester() {
    let harness = harness().await;
    let (_, onboarding) = approved(&harness).await;

    let received = submit(&harness, &onboarding).await;
    assert_eq!(received.status, OnboardingStatus::DocumentsReceived);
    assert!(received.supplier_form_submitted_at.is_some());

    let notices = harness.notifier.sent_to(&email(REQUESTER));
    assert_eq!(notices.len(), 1);
    assert!(notices[0].body.contains("Highveld Packaging"));

    let documents = harness.onboarding.documents(&onboarding.id).await.expect("documents");
    assert_eq!(documents.len(), 2);
    assert!(documents.iter().all(|document| document.version == 1));
}

#[tokio::test]
async fn supplier_revision_leaves_the_initiation_untouched() {
    let harness = harness().await;
    let (initiation, onboarding) = approved(&harness).await;
    submit(&harness, &onboarding).await;
    harness.onboarding.start_review(&onboarding.id, &actor(PROCUREMENT)).await.expect("review");

    let revision = harness
        .onboarding
        .request_supplier_revision(&onboarding.id, &actor(PROCUREMENT), "bank letter is expired")
        .await
        .expect("revision requested")
        .value;
    assert_eq!(revision.status, OnboardingStatus::RevisionNeeded);
    assert_eq!(revision.revision_kind, Some(RevisionKind::SupplierDocuments));
    assert_eq!(revision.revision_count, 1);
    assert_eq!(revision.revision_notes.as_deref(), Some("bank letter is expired"));

    let (_, supplier) = harness.onboarding.find(&onboarding.id).await.expect("find");
    assert_eq!(supplier.status, SupplierStatus::RevisionRequested);
    let to_supplier = harness.notifier.sent_to(SUPPLIER_CONTACT);
    assert_eq!(to_supplier.len(), 2);
    assert!(to_supplier[1].body.contains("bank letter is expired"));

    let (untouched, _) = harness.initiations.find(&initiation.id).await.expect("find");
    assert_eq!(untouched.status, InitiationStatus::SupplierEmailed);

    let resubmitted = harness
        .onboarding
        .submit_documents(
            &onboarding.access_token.0,
            uploads(&[("bank_confirmation", "bank-2026.pdf")]),
        )
        .await
        .expect("revised documents")
        .value;
    assert_eq!(resubmitted.status, OnboardingStatus::DocumentsReceived);
    assert_eq!(resubmitted.revision_kind, None);
    assert_eq!(resubmitted.revision_count, 1);

    let documents = harness.onboarding.documents(&onboarding.id).await.expect("documents");
    let bank = documents
        .iter()
        .filter(|document| document.category == "bank_confirmation")
        .map(|document| document.version)
        .max();
    assert_eq!(bank, Some(2));
}

#[tokio::test]
async fn initiator_correction_returns_to_final_approval_without_new_slots() {
    let harness = harness().await;
    let onboarding = in_final_approval(&harness).await;

    let returned = harness
        .onboarding
        .request_initiator_revision(&onboarding.id, &actor(PROCUREMENT), "payment terms are wrong")
        .await
        .expect("returned to requester");
    assert!(returned.is_clean(), "unexpected warnings: {:?}", returned.warnings);
    assert_eq!(returned.value.status, OnboardingStatus::RevisionNeeded);
    assert_eq!(returned.value.revision_kind, Some(RevisionKind::InitiatorCorrection));

    let (initiation, slots_before) =
        harness.initiations.find(&onboarding.initiation_id).await.expect("find");
    assert_eq!(initiation.status, InitiationStatus::ReturnedForRevision);
    let notices = harness.notifier.sent_to(&email(REQUESTER));
    assert!(notices.iter().any(|message| message.body.contains("payment terms are wrong")));

    let mut corrected = support::details();
    corrected.payment_terms = "45 days".to_owned();
    corrected.contact_email = CORRECTED_CONTACT.to_owned();
    harness
        .initiations
        .update_draft(&initiation.id, &actor(REQUESTER), corrected)
        .await
        .expect("correction saved");
    let restored = harness
        .initiations
        .submit(&initiation.id, &actor(REQUESTER), &id(MANAGER), &id(PROCUREMENT))
        .await
        .expect("corrected resubmission")
        .value;
    assert_eq!(restored.status, InitiationStatus::SupplierEmailed);
    assert_eq!(restored.details.payment_terms, "45 days");

    let (after, slots_after) = harness.initiations.find(&initiation.id).await.expect("find");
    assert_eq!(after.status, InitiationStatus::SupplierEmailed);
    assert_eq!(slots_after, slots_before);
    let slots_after = slots_after.expect("slots kept");
    assert_eq!(slots_after.manager.status, ApprovalStatus::Approved);
    assert_eq!(slots_after.procurement.status, ApprovalStatus::Approved);

    let (onboarding, supplier) = harness.onboarding.find(&onboarding.id).await.expect("find");
    assert_eq!(onboarding.status, OnboardingStatus::AwaitingFinalApproval);
    assert_eq!(onboarding.revision_kind, None);
    assert_eq!(supplier.contact_email, CORRECTED_CONTACT);
    assert_eq!(harness.ctx.onboardings.list_open().await.expect("open").len(), 1);

    let history = harness
        .ctx
        .history(&TimelineSubject::Initiation(initiation.id.clone()))
        .await
        .expect("history");
    let actions: Vec<&str> = history.iter().map(|entry| entry.action.as_str()).collect();
    assert!(actions.contains(&"initiation_returned_for_revision"));
    assert!(actions.contains(&"initiation_resubmitted"));

    let before_outcome = harness.notifier.sent_to(SUPPLIER_CONTACT).len();
    harness
        .onboarding
        .finalize(&onboarding.id, &actor(PROCUREMENT), Decision::approve())
        .await
        .expect("approve corrected onboarding");
    assert_eq!(harness.notifier.sent_to(CORRECTED_CONTACT).len(), 1);
    assert_eq!(harness.notifier.sent_to(SUPPLIER_CONTACT).len(), before_outcome);
}

#[tokio::test]
async fn initiator_revision_is_refused_when_the_initiation_moved() {
    let initiations = Arc::new(ContendedInitiations::default());
    let store: Arc<dyn InitiationRepository> = initiations.clone();
    let harness = harness_with(move |ctx| ctx.initiations = store).await;
    let onboarding = in_final_approval(&harness).await;

    initiations.lose_next_status_change();
    let error = harness
        .onboarding
        .request_initiator_revision(&onboarding.id, &actor(PROCUREMENT), "payment terms are wrong")
        .await
        .expect_err("initiation changed underneath");
    assert_eq!(error.kind(), ErrorKind::InvalidState);

    let (unchanged, _) = harness.onboarding.find(&onboarding.id).await.expect("find");
    assert_eq!(unchanged.status, OnboardingStatus::AwaitingFinalApproval);
    assert_eq!(unchanged.revision_kind, None);
    let (initiation, _) =
        harness.initiations.find(&onboarding.initiation_id).await.expect("find");
    assert_eq!(initiation.status, InitiationStatus::SupplierEmailed);

    let returned = harness
        .onboarding
        .request_initiator_revision(&onboarding.id, &actor(PROCUREMENT), "payment terms are wrong")
        .await
        .expect("second attempt")
        .value;
    assert_eq!(returned.revision_kind, Some(RevisionKind::InitiatorCorrection));
    let (initiation, _) =
        harness.initiations.find(&onboarding.initiation_id).await.expect("find");
    assert_eq!(initiation.status, InitiationStatus::ReturnedForRevision);
}

#[tokio::test]
async fn lost_onboarding_write_puts_the_initiation_back() {
    let onboardings = Arc::new(FlakyOnboardings::default());
    let store: Arc<dyn OnboardingRepository> = onboardings.clone();
    let harness = harness_with(move |ctx| ctx.onboardings = store).await;
    let onboarding = in_final_approval(&harness).await;

    onboardings.lose_next_update();
    let error = harness
        .onboarding
        .request_initiator_revision(&onboarding.id, &actor(PROCUREMENT), "payment terms are wrong")
        .await
        .expect_err("onboarding changed underneath");
    assert_eq!(error.kind(), ErrorKind::InvalidState);

    let (unchanged, _) = harness.onboarding.find(&onboarding.id).await.expect("find");
    assert_eq!(unchanged.status, OnboardingStatus::AwaitingFinalApproval);
    let (initiation, _) =
        harness.initiations.find(&onboarding.initiation_id).await.expect("find");
    assert_eq!(initiation.status, InitiationStatus::SupplierEmailed);

    let refused = harness
        .initiations
        .update_draft(&initiation.id, &actor(REQUESTER), support::details())
        .await
        .expect_err("initiation stays locked");
    assert_eq!(refused.kind(), ErrorKind::InvalidState);

    let history = harness
        .ctx
        .history(&TimelineSubject::Initiation(initiation.id.clone()))
        .await
        .expect("history");
    assert!(history.iter().all(|entry| entry.action != "initiation_returned_for_revision"));
}

#[tokio::test]
async fn final_approval_completes_the_onboarding() {
    let harness = harness().await;
    let onboarding = in_final_approval(&harness).await;

    let done = harness
        .onboarding
        .finalize(&onboarding.id, &actor(PROCUREMENT), Decision::approve())
        .await
        .expect("approve")
        .value;
    assert_eq!(done.status, OnboardingStatus::Approved);
    assert!(done.completed_at.is_some());

    let (_, supplier) = harness.onboarding.find(&onboarding.id).await.expect("find");
    assert_eq!(supplier.status, SupplierStatus::Approved);
    assert!(harness.ctx.onboardings.list_open().await.expect("open").is_empty());
    assert_eq!(harness.notifier.sent_to(SUPPLIER_CONTACT).len(), 2);
}

#[tokio::test]
async fn final_rejection_records_the_reason() {
    let harness = harness().await;
    let onboarding = in_final_approval(&harness).await;

    let done = harness
        .onboarding
        .finalize(
            &onboarding.id,
            &actor(PROCUREMENT),
            Decision::reject("B-BBEE certificate could not be verified").expect("reason"),
        )
        .await
        .expect("reject")
        .value;
    assert_eq!(done.status, OnboardingStatus::Rejected);
    assert_eq!(
        done.rejection_reason.as_deref(),
        Some("B-BBEE certificate could not be verified")
    );

    let outcome = harness.notifier.sent_to(SUPPLIER_CONTACT);
    assert!(outcome
        .last()
        .is_some_and(|message| message.body.contains("B-BBEE certificate could not be verified")));
}

#[tokio::test]
async fn reviewers_need_a_reviewing_role() {
    let harness = harness().await;
    let (_, onboarding) = approved(&harness).await;
    submit(&harness, &onboarding).await;

    let error = harness
        .onboarding
        .start_review(&onboarding.id, &actor(REQUESTER))
        .await
        .expect_err("requesters do not review");
    assert_eq!(error.kind(), ErrorKind::Unauthorized);

    let (unchanged, _) = harness.onboarding.find(&onboarding.id).await.expect("find");
    assert_eq!(unchanged.status, OnboardingStatus::DocumentsReceived);
}

#[tokio::test]
async fn unknown_tokens_and_illegal_events_are_refused() {
    let harness = harness().await;
    let (_, onboarding) = approved(&harness).await;

    let unknown = harness
        .onboarding
        .submit_documents("not-a-token", uploads(&[("tax_clearance", "tax.pdf")]))
        .await
        .expect_err("unknown token");
    assert_eq!(unknown.kind(), ErrorKind::NotFound);

    let empty = harness
        .onboarding
        .submit_documents(&onboarding.access_token.0, Vec::new())
        .await
        .expect_err("nothing uploaded");
    assert_eq!(empty.kind(), ErrorKind::Validation);

    let early = harness
        .onboarding
        .finalize(&onboarding.id, &actor(PROCUREMENT), Decision::approve())
        .await
        .expect_err("not awaiting final approval");
    assert_eq!(early.kind(), ErrorKind::InvalidState);

    submit(&harness, &onboarding).await;
    let blank_notes = harness
        .onboarding
        .request_supplier_revision(&onboarding.id, &actor(PROCUREMENT), "   ")
        .await
        .expect_err("notes required");
    assert_eq!(blank_notes.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn credit_application_is_accepted_until_the_onboarding_closes() {
    let harness = harness().await;
    let onboarding = in_final_approval(&harness).await;

    let first = harness
        .onboarding
        .submit_credit_application(&onboarding.access_token.0, "credit.pdf")
        .await
        .expect("credit application")
        .value;
    assert_eq!(first.category, CREDIT_APPLICATION_CATEGORY);
    assert_eq!(first.version, 1);
    let second = harness
        .onboarding
        .submit_credit_application(&onboarding.access_token.0, "credit-signed.pdf")
        .await
        .expect("replacement")
        .value;
    assert_eq!(second.version, 2);

    let (stored, _) = harness.onboarding.find(&onboarding.id).await.expect("find");
    assert!(stored.credit_application_submitted_at.is_some());
    assert_eq!(stored.status, OnboardingStatus::AwaitingFinalApproval);

    harness
        .onboarding
        .finalize(&onboarding.id, &actor(PROCUREMENT), Decision::approve())
        .await
        .expect("approve");
    let closed = harness
        .onboarding
        .submit_credit_application(&onboarding.access_token.0, "late.pdf")
        .await
        .expect_err("terminal onboarding");
    assert_eq!(closed.kind(), ErrorKind::InvalidState);
}
