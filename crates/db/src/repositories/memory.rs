use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use procura_core::audit::{TimelineEntry, TimelineSubject};
use procura_core::domain::approval::{ApprovalPair, ApprovalRecord};
use procura_core::domain::delegation::{Delegation, DelegationId};
use procura_core::domain::initiation::{Initiation, InitiationId, InitiationStatus};
use procura_core::domain::onboarding::{
    DocumentRecord, Onboarding, OnboardingId, OnboardingStatus, Supplier, SupplierId,
};
use procura_core::domain::reminder::{
    ReminderConfiguration, ReminderEventType, ReminderLog, ReminderLogStatus,
};
use procura_core::domain::user::{User, UserId};

use super::{
    DecisionWrite, DecisionWriteOutcome, DelegationRepository, InitiationRepository,
    OnboardingRepository, ReminderRepository, RepositoryError, TimelineRepository,
    UserRepository,
};

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), user);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        let mut listed: Vec<User> = users.values().cloned().collect();
        listed.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(listed)
    }
}

#[derive(Default)]
struct InitiationState {
    initiations: HashMap<String, Initiation>,
    slots: HashMap<String, ApprovalPair>,
    archived: HashMap<String, Vec<ApprovalRecord>>,
}

#[derive(Default)]
pub struct InMemoryInitiationRepository {
    state: RwLock<InitiationState>,
}

#[async_trait::async_trait]
impl InitiationRepository for InMemoryInitiationRepository {
    async fn find_by_id(&self, id: &InitiationId) -> Result<Option<Initiation>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.initiations.get(&id.0).cloned())
    }

    async fn find_slots(
        &self,
        id: &InitiationId,
    ) -> Result<Option<ApprovalPair>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.slots.get(&id.0).cloned())
    }

    async fn list(&self) -> Result<Vec<Initiation>, RepositoryError> {
        let state = self.state.read().await;
        let mut listed: Vec<Initiation> = state.initiations.values().cloned().collect();
        listed.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(listed)
    }

    async fn save_draft(&self, initiation: Initiation) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        match state.initiations.get_mut(&initiation.id.0) {
            Some(existing) => {
                existing.details = initiation.details;
                existing.updated_at = initiation.updated_at;
            }
            None => {
                state.initiations.insert(initiation.id.0.clone(), initiation);
            }
        }
        Ok(())
    }

    async fn open_slots(
        &self,
        initiation: &Initiation,
        slots: ApprovalPair,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(stored) = state.initiations.get_mut(&initiation.id.0) else {
            return Ok(false);
        };
        if stored.version != expected_version {
            return Ok(false);
        }

        stored.status = initiation.status;
        stored.version = initiation.version;
        stored.updated_at = initiation.updated_at;
        stored.submitted_at = initiation.submitted_at;
        if let Some(previous) = state.slots.insert(initiation.id.0.clone(), slots) {
            let decided = previous.records().into_iter().filter(|record| !record.is_pending());
            state
                .archived
                .entry(initiation.id.0.clone())
                .or_default()
                .extend(decided.cloned());
        }
        Ok(true)
    }

    async fn list_archived_slots(
        &self,
        id: &InitiationId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.archived.get(&id.0).cloned().unwrap_or_default())
    }

    async fn apply_decision(
        &self,
        write: DecisionWrite,
    ) -> Result<DecisionWriteOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        let key = write.initiation_id.0.clone();

        let slot_pending = state
            .slots
            .get(&key)
            .map(|slots| slots.slot(write.slot).is_pending())
            .unwrap_or(false);
        if !slot_pending {
            return Ok(DecisionWriteOutcome::SlotAlreadyDecided);
        }

        let version_matches = state
            .initiations
            .get(&key)
            .map(|initiation| initiation.version == write.expected_version)
            .unwrap_or(false);
        if !version_matches {
            return Ok(DecisionWriteOutcome::VersionConflict);
        }

        let next_version = write.expected_version + 1;
        if let Some(slots) = state.slots.get_mut(&key) {
            let record = slots.slot_mut(write.slot);
            record.status = write.status;
            record.comment = write.comment;
            record.decided_by = Some(write.decided_by);
            record.acting_for = write.acting_for;
            record.decided_at = Some(write.decided_at);
        }
        if let Some(initiation) = state.initiations.get_mut(&key) {
            initiation.status = write.aggregate_status;
            initiation.version = next_version;
            initiation.updated_at = write.decided_at;
        }

        Ok(DecisionWriteOutcome::Applied { version: next_version })
    }

    async fn compare_and_set_status(
        &self,
        id: &InitiationId,
        expected_version: u32,
        status: InitiationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        match state.initiations.get_mut(&id.0) {
            Some(initiation) if initiation.version == expected_version => {
                initiation.status = status;
                initiation.version += 1;
                initiation.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_awaiting_decision(
        &self,
    ) -> Result<Vec<(Initiation, ApprovalPair)>, RepositoryError> {
        let state = self.state.read().await;
        let mut awaiting: Vec<(Initiation, ApprovalPair)> = state
            .initiations
            .values()
            .filter(|initiation| initiation.status.accepts_decisions())
            .filter_map(|initiation| {
                let slots = state.slots.get(&initiation.id.0)?;
                (!slots.pending_slots().is_empty()).then(|| (initiation.clone(), slots.clone()))
            })
            .collect();
        awaiting.sort_by(|(left, _), (right, _)| {
            left.submitted_at.cmp(&right.submitted_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(awaiting)
    }
}

#[derive(Default)]
pub struct InMemoryDelegationRepository {
    delegations: RwLock<HashMap<String, Delegation>>,
}

impl InMemoryDelegationRepository {
    async fn list_matching(&self, predicate: impl Fn(&Delegation) -> bool) -> Vec<Delegation> {
        let delegations = self.delegations.read().await;
        let mut listed: Vec<Delegation> =
            delegations.values().filter(|delegation| predicate(delegation)).cloned().collect();
        listed.sort_by(|left, right| {
            right.starts_at.cmp(&left.starts_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        listed
    }
}

#[async_trait::async_trait]
impl DelegationRepository for InMemoryDelegationRepository {
    async fn find_by_id(&self, id: &DelegationId) -> Result<Option<Delegation>, RepositoryError> {
        let delegations = self.delegations.read().await;
        Ok(delegations.get(&id.0).cloned())
    }

    async fn save(&self, delegation: Delegation) -> Result<(), RepositoryError> {
        let mut delegations = self.delegations.write().await;
        delegations.insert(delegation.id.0.clone(), delegation);
        Ok(())
    }

    async fn list_for_delegate(
        &self,
        delegate: &UserId,
    ) -> Result<Vec<Delegation>, RepositoryError> {
        Ok(self.list_matching(|delegation| &delegation.delegate_id == delegate).await)
    }

    async fn list_for_delegator(
        &self,
        delegator: &UserId,
    ) -> Result<Vec<Delegation>, RepositoryError> {
        Ok(self.list_matching(|delegation| &delegation.delegator_id == delegator).await)
    }

    async fn deactivate(
        &self,
        id: &DelegationId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut delegations = self.delegations.write().await;
        match delegations.get_mut(&id.0) {
            Some(delegation) if delegation.is_active => {
                delegation.is_active = false;
                delegation.deactivated_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
struct OnboardingState {
    onboardings: HashMap<String, Onboarding>,
    suppliers: HashMap<String, Supplier>,
    documents: Vec<DocumentRecord>,
}

#[derive(Default)]
pub struct InMemoryOnboardingRepository {
    state: RwLock<OnboardingState>,
}

impl InMemoryOnboardingRepository {
    async fn find_where(&self, predicate: impl Fn(&Onboarding) -> bool) -> Option<Onboarding> {
        let state = self.state.read().await;
        state.onboardings.values().find(|onboarding| predicate(onboarding)).cloned()
    }
}

#[async_trait::async_trait]
impl OnboardingRepository for InMemoryOnboardingRepository {
    async fn provision(
        &self,
        supplier: Supplier,
        onboarding: Onboarding,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let already_provisioned = state
            .onboardings
            .values()
            .any(|existing| existing.initiation_id == onboarding.initiation_id);
        if already_provisioned {
            return Ok(false);
        }

        state.suppliers.insert(supplier.id.0.clone(), supplier);
        state.onboardings.insert(onboarding.id.0.clone(), onboarding);
        Ok(true)
    }

    async fn find_by_id(&self, id: &OnboardingId) -> Result<Option<Onboarding>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.onboardings.get(&id.0).cloned())
    }

    async fn find_by_initiation(
        &self,
        initiation_id: &InitiationId,
    ) -> Result<Option<Onboarding>, RepositoryError> {
        Ok(self.find_where(|onboarding| &onboarding.initiation_id == initiation_id).await)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Onboarding>, RepositoryError> {
        Ok(self.find_where(|onboarding| onboarding.access_token.0 == token).await)
    }

    async fn find_supplier(&self, id: &SupplierId) -> Result<Option<Supplier>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.suppliers.get(&id.0).cloned())
    }

    async fn update(
        &self,
        onboarding: &Onboarding,
        supplier: &Supplier,
        expected_status: OnboardingStatus,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        match state.onboardings.get(&onboarding.id.0) {
            Some(stored) if stored.status == expected_status => {}
            _ => return Ok(false),
        }

        state.onboardings.insert(onboarding.id.0.clone(), onboarding.clone());
        if let Some(stored) = state.suppliers.get_mut(&supplier.id.0) {
            stored.name = supplier.name.clone();
            stored.contact_person = supplier.contact_person.clone();
            stored.contact_email = supplier.contact_email.clone();
            stored.status = supplier.status;
            stored.updated_at = supplier.updated_at;
        }
        Ok(true)
    }

    async fn list_open(&self) -> Result<Vec<Onboarding>, RepositoryError> {
        let state = self.state.read().await;
        let mut open: Vec<Onboarding> = state
            .onboardings
            .values()
            .filter(|onboarding| !onboarding.status.is_terminal())
            .cloned()
            .collect();
        open.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(open)
    }

    async fn add_document(&self, document: DocumentRecord) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let duplicate = state.documents.iter().any(|existing| {
            existing.onboarding_id == document.onboarding_id
                && existing.category == document.category
                && existing.version == document.version
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "document `{}` version {} already exists",
                document.category, document.version
            )));
        }
        state.documents.push(document);
        Ok(())
    }

    async fn list_documents(
        &self,
        onboarding_id: &OnboardingId,
    ) -> Result<Vec<DocumentRecord>, RepositoryError> {
        let state = self.state.read().await;
        let mut documents: Vec<DocumentRecord> = state
            .documents
            .iter()
            .filter(|document| &document.onboarding_id == onboarding_id)
            .cloned()
            .collect();
        documents.sort_by(|left, right| {
            left.category.cmp(&right.category).then(left.version.cmp(&right.version))
        });
        Ok(documents)
    }
}

#[derive(Default)]
pub struct InMemoryTimelineRepository {
    entries: RwLock<Vec<TimelineEntry>>,
}

#[async_trait::async_trait]
impl TimelineRepository for InMemoryTimelineRepository {
    async fn append(&self, entry: TimelineEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.push(entry);
        Ok(())
    }

    async fn list_for_subject(
        &self,
        subject: &TimelineSubject,
    ) -> Result<Vec<TimelineEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut listed: Vec<TimelineEntry> =
            entries.iter().filter(|entry| &entry.subject == subject).cloned().collect();
        // Stable sort keeps append order for equal timestamps.
        listed.sort_by_key(|entry| entry.occurred_at);
        Ok(listed)
    }
}

#[derive(Default)]
pub struct InMemoryReminderRepository {
    configurations: RwLock<HashMap<ReminderEventType, ReminderConfiguration>>,
    logs: RwLock<Vec<ReminderLog>>,
}

#[async_trait::async_trait]
impl ReminderRepository for InMemoryReminderRepository {
    async fn list_configurations(&self) -> Result<Vec<ReminderConfiguration>, RepositoryError> {
        let configurations = self.configurations.read().await;
        let mut listed: Vec<ReminderConfiguration> = configurations.values().cloned().collect();
        listed.sort_by(|left, right| left.event_type.as_str().cmp(right.event_type.as_str()));
        Ok(listed)
    }

    async fn save_configuration(
        &self,
        configuration: ReminderConfiguration,
    ) -> Result<(), RepositoryError> {
        let mut configurations = self.configurations.write().await;
        configurations.insert(configuration.event_type, configuration);
        Ok(())
    }

    async fn seed_defaults(
        &self,
        defaults: Vec<ReminderConfiguration>,
    ) -> Result<u64, RepositoryError> {
        let mut configurations = self.configurations.write().await;
        let mut inserted = 0;
        for configuration in defaults {
            if let std::collections::hash_map::Entry::Vacant(slot) =
                configurations.entry(configuration.event_type)
            {
                slot.insert(configuration);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn try_claim(&self, log: ReminderLog) -> Result<bool, RepositoryError> {
        let mut logs = self.logs.write().await;
        let claimed = logs.iter().any(|existing| {
            existing.event_type == log.event_type
                && existing.reference_id == log.reference_id
                && existing.tier == log.tier
                && existing.status.exhausts_tier()
        });
        if claimed {
            return Ok(false);
        }
        logs.push(log);
        Ok(true)
    }

    async fn complete(
        &self,
        id: &str,
        status: ReminderLogStatus,
        error: Option<String>,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let mut logs = self.logs.write().await;
        let log = logs.iter_mut().find(|log| log.id == id).ok_or_else(|| {
            RepositoryError::Conflict(format!("reminder log `{id}` does not exist"))
        })?;
        log.status = status;
        log.error = error;
        log.sent_at = sent_at;
        Ok(())
    }

    async fn list_logs(
        &self,
        event_type: ReminderEventType,
        reference_id: &str,
    ) -> Result<Vec<ReminderLog>, RepositoryError> {
        let logs = self.logs.read().await;
        let mut listed: Vec<ReminderLog> = logs
            .iter()
            .filter(|log| log.event_type == event_type && log.reference_id == reference_id)
            .cloned()
            .collect();
        listed.sort_by_key(|log| (log.tier, log.created_at));
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use procura_core::domain::approval::{ApprovalPair, ApprovalSlot, ApprovalStatus};
    use procura_core::domain::initiation::{
        Initiation, InitiationStatus, PurchaseType, SupplierDetails, SupplierLocation,
    };
    use procura_core::domain::reminder::{
        ReminderEventType, ReminderLog, ReminderLogStatus, ReminderTier,
    };
    use procura_core::domain::user::UserId;

    use super::{InMemoryInitiationRepository, InMemoryReminderRepository};
    use crate::repositories::{
        DecisionWrite, DecisionWriteOutcome, InitiationRepository, ReminderRepository,
    };

    fn draft() -> Initiation {
        let details = SupplierDetails {
            supplier_name: "Karoo Logistics".to_owned(),
            contact_person: "Anna Botha".to_owned(),
            contact_email: "anna@karoo.example".to_owned(),
            business_units: vec!["Operations".to_owned()],
            product_category: "Freight".to_owned(),
            purchase_type: PurchaseType::Regular,
            annual_purchase_value: None,
            currency: "ZAR".to_owned(),
            payment_terms: "30 days".to_owned(),
            supplier_location: SupplierLocation::Local,
        };
        Initiation::new_draft(UserId("u-req".to_owned()), details, Utc::now()).expect("draft")
    }

    #[tokio::test]
    async fn decisions_mirror_sql_compare_and_set() {
        let repo = InMemoryInitiationRepository::default();
        let mut initiation = draft();
        repo.save_draft(initiation.clone()).await.expect("save");

        let now = Utc::now();
        initiation.status = InitiationStatus::Submitted;
        initiation.version = 1;
        initiation.submitted_at = Some(now);
        let slots = ApprovalPair::open(
            &initiation.id,
            UserId("u-mgr".to_owned()),
            UserId("u-proc".to_owned()),
            now,
        );
        assert!(repo.open_slots(&initiation, slots, 0).await.expect("open"));

        let write = DecisionWrite {
            initiation_id: initiation.id.clone(),
            slot: ApprovalSlot::Manager,
            status: ApprovalStatus::Approved,
            comment: None,
            decided_by: UserId("u-mgr".to_owned()),
            acting_for: None,
            decided_at: now,
            expected_version: 1,
            aggregate_status: InitiationStatus::ManagerApproved,
        };
        let stale =
            DecisionWrite { slot: ApprovalSlot::Procurement, expected_version: 0, ..write.clone() };

        assert_eq!(
            repo.apply_decision(stale).await.expect("stale"),
            DecisionWriteOutcome::VersionConflict
        );
        assert_eq!(
            repo.apply_decision(write.clone()).await.expect("apply"),
            DecisionWriteOutcome::Applied { version: 2 }
        );
        assert_eq!(
            repo.apply_decision(write).await.expect("repeat"),
            DecisionWriteOutcome::SlotAlreadyDecided
        );

        let stored_slots = repo.find_slots(&initiation.id).await.expect("slots").expect("open");
        assert!(stored_slots.slot(ApprovalSlot::Procurement).is_pending());
        assert_eq!(repo.list_awaiting_decision().await.expect("awaiting").len(), 1);
    }

    #[tokio::test]
    async fn reminder_claims_block_until_failure() {
        let repo = InMemoryReminderRepository::default();
        let claim = || {
            ReminderLog::claim(
                ReminderEventType::BuyerReviewPending,
                "ONB-1:r0",
                ReminderTier::First,
                "buyer@example.com",
                "subject",
                "body",
                Utc::now(),
            )
        };

        let first = claim();
        assert!(repo.try_claim(first.clone()).await.expect("claim"));
        assert!(!repo.try_claim(claim()).await.expect("duplicate"));
        repo.complete(
            &first.id,
            ReminderLogStatus::Failed,
            Some("down".to_owned()),
            None,
        )
        .await
        .expect("fail");
        assert!(repo.try_claim(claim()).await.expect("retry"));
    }
}
