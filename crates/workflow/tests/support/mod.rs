#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use procura_core::clock::ManualClock;
use procura_core::domain::approval::{ApprovalPair, ApprovalRecord, Decision};
use procura_core::domain::delegation::{DelegationScope, NewDelegation};
use procura_core::domain::initiation::{
    Initiation, InitiationId, InitiationStatus, PurchaseType, SupplierDetails, SupplierLocation,
};
use procura_core::domain::onboarding::{
    DocumentRecord, Onboarding, OnboardingId, OnboardingStatus, Supplier, SupplierId,
};
use procura_core::domain::user::{ActingUser, User, UserId, UserRole};
use procura_core::notifier::RecordingNotifier;
use procura_core::reminders::PortalLinks;
use procura_db::repositories::{
    DecisionWrite, DecisionWriteOutcome, InMemoryInitiationRepository,
    InMemoryOnboardingRepository, InitiationRepository, OnboardingRepository, RepositoryError,
};
use procura_workflow::{
    DelegationService, InitiationService, OnboardingService, ReminderEngine, WorkflowContext,
};

pub const REQUESTER: &str = "u-requester";
pub const MANAGER: &str = "u-manager";
pub const PROCUREMENT: &str = "u-procurement";
pub const DEPUTY: &str = "u-deputy";
pub const ADMIN: &str = "u-admin";
pub const APPROVER: &str = "u-approver";
pub const SUPPLIER_CONTACT: &str = "thandi@highveld.example";

pub struct Harness {
    pub ctx: WorkflowContext,
    pub clock: ManualClock,
    pub notifier: RecordingNotifier,
    pub initiations: InitiationService,
    pub delegations: DelegationService,
    pub onboarding: OnboardingService,
    pub reminders: ReminderEngine,
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).single().expect("valid start instant")
}

pub fn email(id: &str) -> String {
    format!("{id}@procura.local")
}

pub fn actor(id: &str) -> ActingUser {
    let role = match id {
        MANAGER | DEPUTY => UserRole::Manager,
        PROCUREMENT => UserRole::ProcurementManager,
        ADMIN => UserRole::Admin,
        APPROVER => UserRole::Approver,
        _ => UserRole::Requester,
    };
    ActingUser::new(id, role)
}

pub fn id(value: &str) -> UserId {
    UserId(value.to_owned())
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

/// Builds a harness after `adjust` has swapped collaborators on the context.
pub async fn harness_with(adjust: impl FnOnce(&mut WorkflowContext)) -> Harness {
    let clock = ManualClock::new(start());
    let notifier = RecordingNotifier::default();
    let mut ctx = WorkflowContext::in_memory(
        Arc::new(notifier.clone()),
        Arc::new(clock.clone()),
        PortalLinks::new("https://portal.procura.local/"),
    );
    adjust(&mut ctx);

    for user_id in [REQUESTER, MANAGER, PROCUREMENT, DEPUTY, ADMIN, APPROVER] {
        let acting = actor(user_id);
        ctx.users
            .save(User {
                id: acting.id,
                name: user_id.trim_start_matches("u-").to_owned(),
                email: email(user_id),
                role: acting.role,
                is_active: true,
            })
            .await
            .expect("seed user");
    }

    Harness {
        initiations: InitiationService::new(ctx.clone()),
        delegations: DelegationService::new(ctx.clone()),
        onboarding: OnboardingService::new(ctx.clone()),
        reminders: ReminderEngine::new(ctx.clone()),
        ctx,
        clock,
        notifier,
    }
}

pub fn details() -> SupplierDetails {
    SupplierDetails {
        supplier_name: "Highveld Packaging".to_owned(),
        contact_person: "Thandi Nkosi".to_owned(),
        contact_email: SUPPLIER_CONTACT.to_owned(),
        business_units: vec!["Manufacturing".to_owned()],
        product_category: "Packaging".to_owned(),
        purchase_type: PurchaseType::Regular,
        annual_purchase_value: Some(Decimal::new(480_000, 0)),
        currency: "ZAR".to_owned(),
        payment_terms: "30 days".to_owned(),
        supplier_location: SupplierLocation::Local,
    }
}

pub async fn submitted(harness: &Harness) -> Initiation {
    let draft = harness
        .initiations
        .create_draft(&actor(REQUESTER), details())
        .await
        .expect("create draft")
        .value;
    harness
        .initiations
        .submit(&draft.id, &actor(REQUESTER), &id(MANAGER), &id(PROCUREMENT))
        .await
        .expect("submit")
        .value
}

pub async fn approved(harness: &Harness) -> (Initiation, Onboarding) {
    let initiation = submitted(harness).await;
    harness
        .initiations
        .record_decision(&initiation.id, &actor(MANAGER), None, Decision::approve())
        .await
        .expect("manager approves");
    let receipt = harness
        .initiations
        .record_decision(&initiation.id, &actor(PROCUREMENT), None, Decision::approve())
        .await
        .expect("procurement approves")
        .value;
    let onboarding = receipt.onboarding.expect("final approval provisions an onboarding");
    (receipt.initiation, onboarding)
}

pub fn delegation(from: &str, to: &str, scope: DelegationScope, days: i64) -> NewDelegation {
    NewDelegation {
        delegator_id: id(from),
        delegate_id: id(to),
        scope,
        starts_at: start(),
        ends_at: start() + Duration::days(days),
        reason: Some("leave".to_owned()),
    }
}

/// In-memory onboarding store whose next provisioning or update can be made to fail.
#[derive(Default)]
pub struct FlakyOnboardings {
    inner: InMemoryOnboardingRepository,
    fail_provision: AtomicBool,
    lose_update: AtomicBool,
}

impl FlakyOnboardings {
    pub fn fail_next_provision(&self) {
        self.fail_provision.store(true, Ordering::SeqCst);
    }

    /// The next update reports a concurrent status change.
    pub fn lose_next_update(&self) {
        self.lose_update.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OnboardingRepository for FlakyOnboardings {
    async fn provision(
        &self,
        supplier: Supplier,
        onboarding: Onboarding,
    ) -> Result<bool, RepositoryError> {
        if self.fail_provision.swap(false, Ordering::SeqCst) {
            return Err(RepositoryError::Conflict("supplier code already taken".to_owned()));
        }
        self.inner.provision(supplier, onboarding).await
    }

    async fn find_by_id(&self, id: &OnboardingId) -> Result<Option<Onboarding>, RepositoryError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_initiation(
        &self,
        initiation_id: &InitiationId,
    ) -> Result<Option<Onboarding>, RepositoryError> {
        self.inner.find_by_initiation(initiation_id).await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Onboarding>, RepositoryError> {
        self.inner.find_by_token(token).await
    }

    async fn find_supplier(&self, id: &SupplierId) -> Result<Option<Supplier>, RepositoryError> {
        self.inner.find_supplier(id).await
    }

    async fn update(
        &self,
        onboarding: &Onboarding,
        supplier: &Supplier,
        expected_status: OnboardingStatus,
    ) -> Result<bool, RepositoryError> {
        if self.lose_update.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.update(onboarding, supplier, expected_status).await
    }

    async fn list_open(&self) -> Result<Vec<Onboarding>, RepositoryError> {
        self.inner.list_open().await
    }

    async fn add_document(&self, document: DocumentRecord) -> Result<(), RepositoryError> {
        self.inner.add_document(document).await
    }

    async fn list_documents(
        &self,
        onboarding_id: &OnboardingId,
    ) -> Result<Vec<DocumentRecord>, RepositoryError> {
        self.inner.list_documents(onboarding_id).await
    }
}

/// In-memory initiation store whose next status compare-and-set loses its race.
#[derive(Default)]
pub struct ContendedInitiations {
    inner: InMemoryInitiationRepository,
    lose_status_change: AtomicBool,
}

impl ContendedInitiations {
    pub fn lose_next_status_change(&self) {
        self.lose_status_change.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl InitiationRepository for ContendedInitiations {
    async fn find_by_id(&self, id: &InitiationId) -> Result<Option<Initiation>, RepositoryError> {
        self.inner.find_by_id(id).await
    }

    async fn find_slots(
        &self,
        id: &InitiationId,
    ) -> Result<Option<ApprovalPair>, RepositoryError> {
        self.inner.find_slots(id).await
    }

    async fn list(&self) -> Result<Vec<Initiation>, RepositoryError> {
        self.inner.list().await
    }

    async fn save_draft(&self, initiation: Initiation) -> Result<(), RepositoryError> {
        self.inner.save_draft(initiation).await
    }

    async fn open_slots(
        &self,
        initiation: &Initiation,
        slots: ApprovalPair,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        self.inner.open_slots(initiation, slots, expected_version).await
    }

    async fn apply_decision(
        &self,
        write: DecisionWrite,
    ) -> Result<DecisionWriteOutcome, RepositoryError> {
        self.inner.apply_decision(write).await
    }

    async fn list_archived_slots(
        &self,
        id: &InitiationId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        self.inner.list_archived_slots(id).await
    }

    async fn compare_and_set_status(
        &self,
        id: &InitiationId,
        expected_version: u32,
        status: InitiationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        if self.lose_status_change.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.compare_and_set_status(id, expected_version, status, at).await
    }

    async fn list_awaiting_decision(
        &self,
    ) -> Result<Vec<(Initiation, ApprovalPair)>, RepositoryError> {
        self.inner.list_awaiting_decision().await
    }
}
