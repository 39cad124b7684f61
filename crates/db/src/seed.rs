use chrono::{DateTime, Utc};

use procura_core::domain::reminder::{ReminderConfiguration, ReminderEventType};
use procura_core::domain::user::{User, UserId, UserRole};

use crate::connection::DbPool;
use crate::repositories::{
    ReminderRepository, RepositoryError, SqlReminderRepository, SqlUserRepository,
    UserRepository,
};

struct SeedUser {
    id: &'static str,
    name: &'static str,
    email: &'static str,
    role: UserRole,
}

/// Deterministic roster covering every role the approval workflow routes to.
const SEED_USERS: &[SeedUser] = &[
    SeedUser {
        id: "user-admin-001",
        name: "Ada Admin",
        email: "admin@procura.local",
        role: UserRole::Admin,
    },
    SeedUser {
        id: "user-requester-001",
        name: "Rui Requester",
        email: "requester@procura.local",
        role: UserRole::Requester,
    },
    SeedUser {
        id: "user-manager-001",
        name: "Mia Manager",
        email: "manager@procura.local",
        role: UserRole::Manager,
    },
    SeedUser {
        id: "user-procurement-001",
        name: "Priya Procurement",
        email: "procurement@procura.local",
        role: UserRole::ProcurementManager,
    },
    SeedUser {
        id: "user-approver-001",
        name: "Alex Approver",
        email: "approver@procura.local",
        role: UserRole::Approver,
    },
];

/// Demo users plus the default reminder configurations.
///
/// Loading is idempotent: users are upserted and reminder defaults are only
/// inserted for event types that have no configuration yet.
pub struct SeedDataset;

impl SeedDataset {
    pub fn users() -> Vec<User> {
        SEED_USERS
            .iter()
            .map(|seed| User {
                id: UserId(seed.id.to_owned()),
                name: seed.name.to_owned(),
                email: seed.email.to_owned(),
                role: seed.role,
                is_active: true,
            })
            .collect()
    }

    /// Inserts missing reminder defaults without touching operator edits.
    pub async fn seed_reminder_defaults(
        pool: &DbPool,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        SqlReminderRepository::new(pool.clone())
            .seed_defaults(ReminderConfiguration::defaults(now))
            .await
    }

    pub async fn load(pool: &DbPool, now: DateTime<Utc>) -> Result<SeedResult, RepositoryError> {
        let users = SqlUserRepository::new(pool.clone());
        let mut users_seeded = Vec::with_capacity(SEED_USERS.len());
        for user in Self::users() {
            users_seeded.push(user.id.0.clone());
            users.save(user).await?;
        }

        let reminder_configurations_inserted = Self::seed_reminder_defaults(pool, now).await?;

        Ok(SeedResult { users_seeded, reminder_configurations_inserted })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();
        let users = SqlUserRepository::new(pool.clone());

        for seed in SEED_USERS {
            let stored = users.find_by_id(&UserId(seed.id.to_owned())).await?;
            let present = stored.is_some_and(|user| user.role == seed.role && user.is_active);
            checks.push((seed.id.to_owned(), present));
        }

        let configurations = SqlReminderRepository::new(pool.clone()).list_configurations().await?;
        for event_type in ReminderEventType::ALL {
            let present =
                configurations.iter().any(|configuration| configuration.event_type == event_type);
            checks.push((format!("reminder:{}", event_type.as_str()), present));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Clone, Debug)]
pub struct SeedResult {
    pub users_seeded: Vec<String>,
    pub reminder_configurations_inserted: u64,
}

#[derive(Clone, Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}
