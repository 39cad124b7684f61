use serde::{Deserialize, Serialize};
use tracing::info;

use procura_core::audit::{TimelineEntry, TimelineSubject};
use procura_core::domain::approval::ApprovalSlot;
use procura_core::domain::delegation::{Delegation, DelegationId, NewDelegation};
use procura_core::domain::user::{ActingUser, UserId};
use procura_core::errors::{ApplicationError, DomainError};

use crate::context::{Outcome, WorkflowContext};
use crate::messages;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationDirection {
    Given,
    Received,
    All,
}

impl DelegationDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "given" => Some(Self::Given),
            "received" => Some(Self::Received),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

/// Registry of time-bounded authority substitutions.
///
/// Expiry is evaluated when delegations are read: any row still flagged
/// active past its end is deactivated on the spot and recorded as expired.
#[derive(Clone)]
pub struct DelegationService {
    ctx: WorkflowContext,
}

impl DelegationService {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self { ctx }
    }

    pub async fn create(
        &self,
        actor: &ActingUser,
        request: NewDelegation,
    ) -> Result<Outcome<Delegation>, ApplicationError> {
        request.validate()?;
        if actor.id != request.delegator_id && !actor.is_elevated() {
            return Err(DomainError::Unauthorized(format!(
                "user `{}` may not delegate on behalf of `{}`",
                actor.id.0, request.delegator_id.0
            ))
            .into());
        }

        let delegator =
            self.ctx.users.find_by_id(&request.delegator_id).await?.ok_or_else(|| {
                DomainError::Validation(format!(
                    "delegator `{}` does not exist",
                    request.delegator_id.0
                ))
            })?;
        let delegate = match self.ctx.users.find_by_id(&request.delegate_id).await? {
            Some(user) if user.is_active => user,
            Some(user) => {
                return Err(DomainError::Validation(format!(
                    "delegate `{}` is not an active user",
                    user.id.0
                ))
                .into());
            }
            None => {
                return Err(DomainError::Validation(format!(
                    "delegate `{}` does not exist",
                    request.delegate_id.0
                ))
                .into());
            }
        };

        let now = self.ctx.now();
        let delegation = request.into_delegation(actor.id.clone(), now)?;
        self.ctx.delegations.save(delegation.clone()).await?;

        info!(
            event_name = "delegation.created",
            delegation_id = %delegation.id.0,
            delegator_id = %delegation.delegator_id.0,
            delegate_id = %delegation.delegate_id.0,
            scope = delegation.scope.as_str(),
            actor_id = %actor.id.0,
            "delegation created"
        );

        let mut warnings = Vec::new();
        self.ctx
            .record(
                TimelineEntry::new(
                    TimelineSubject::Delegation(delegation.id.clone()),
                    actor.id.0.clone(),
                    "delegation_created",
                    format!(
                        "{} delegated {} authority to {}",
                        delegator.name,
                        delegation.scope.as_str(),
                        delegate.name
                    ),
                    now,
                )
                .with_metadata("delegator_id", delegation.delegator_id.0.clone())
                .with_metadata("delegate_id", delegation.delegate_id.0.clone())
                .with_metadata("scope", delegation.scope.as_str())
                .with_metadata("ends_at", delegation.ends_at.to_rfc3339()),
                &mut warnings,
            )
            .await;
        self.ctx
            .deliver(
                messages::delegation_granted(&delegation, &delegate, &delegator),
                "delegation_granted",
                &mut warnings,
            )
            .await;

        Ok(Outcome::with_warnings(delegation, warnings))
    }

    /// Permanently clears the active flag; the row is kept for audit.
    pub async fn deactivate(
        &self,
        id: &DelegationId,
        actor: &ActingUser,
    ) -> Result<Outcome<Delegation>, ApplicationError> {
        let mut delegation = self
            .ctx
            .delegations
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::not_found("delegation", id.0.clone()))?;
        delegation.ensure_deactivatable_by(actor)?;

        let now = self.ctx.now();
        if !self.ctx.delegations.deactivate(id, now).await? {
            return Err(DomainError::InvalidState(format!(
                "delegation `{}` is already inactive",
                id.0
            ))
            .into());
        }
        delegation.is_active = false;
        delegation.deactivated_at = Some(now);

        info!(
            event_name = "delegation.deactivated",
            delegation_id = %id.0,
            actor_id = %actor.id.0,
            "delegation deactivated"
        );

        let mut warnings = Vec::new();
        self.ctx
            .record(
                TimelineEntry::new(
                    TimelineSubject::Delegation(id.clone()),
                    actor.id.0.clone(),
                    "delegation_deactivated",
                    format!("delegation to `{}` deactivated", delegation.delegate_id.0),
                    now,
                ),
                &mut warnings,
            )
            .await;

        Ok(Outcome::with_warnings(delegation, warnings))
    }

    pub async fn list(
        &self,
        actor: &ActingUser,
        direction: DelegationDirection,
        include_inactive: bool,
    ) -> Result<Outcome<Vec<Delegation>>, ApplicationError> {
        let mut delegations = Vec::new();
        if matches!(direction, DelegationDirection::Given | DelegationDirection::All) {
            delegations.extend(self.ctx.delegations.list_for_delegator(&actor.id).await?);
        }
        if matches!(direction, DelegationDirection::Received | DelegationDirection::All) {
            delegations.extend(self.ctx.delegations.list_for_delegate(&actor.id).await?);
        }

        let mut warnings = Vec::new();
        self.expire_lapsed(&mut delegations, &mut warnings).await?;
        delegations.retain(|delegation| include_inactive || delegation.is_active);
        delegations.sort_by(|left, right| {
            right.starts_at.cmp(&left.starts_at).then_with(|| left.id.0.cmp(&right.id.0))
        });

        Ok(Outcome::with_warnings(delegations, warnings))
    }

    /// Delegations currently granting authority to `delegate`.
    pub async fn effective_for(
        &self,
        delegate: &UserId,
        warnings: &mut Vec<ApplicationError>,
    ) -> Result<Vec<Delegation>, ApplicationError> {
        let mut delegations = self.ctx.delegations.list_for_delegate(delegate).await?;
        self.expire_lapsed(&mut delegations, warnings).await?;
        let now = self.ctx.now();
        delegations.retain(|delegation| delegation.is_effective(now));
        Ok(delegations)
    }

    /// Effective delegations through which someone may act on `delegator`'s slot.
    pub async fn effective_delegates_of(
        &self,
        delegator: &UserId,
        slot: ApprovalSlot,
        warnings: &mut Vec<ApplicationError>,
    ) -> Result<Vec<Delegation>, ApplicationError> {
        let mut delegations = self.ctx.delegations.list_for_delegator(delegator).await?;
        self.expire_lapsed(&mut delegations, warnings).await?;
        let now = self.ctx.now();
        delegations.retain(|delegation| delegation.grants(delegator, slot, now));
        Ok(delegations)
    }

    async fn expire_lapsed(
        &self,
        delegations: &mut [Delegation],
        warnings: &mut Vec<ApplicationError>,
    ) -> Result<(), ApplicationError> {
        let now = self.ctx.now();
        for delegation in delegations.iter_mut().filter(|delegation| delegation.is_lapsed(now)) {
            let flipped = self.ctx.delegations.deactivate(&delegation.id, now).await?;
            delegation.is_active = false;
            delegation.deactivated_at.get_or_insert(now);
            if !flipped {
                continue;
            }

            info!(
                event_name = "delegation.expired",
                delegation_id = %delegation.id.0,
                delegator_id = %delegation.delegator_id.0,
                delegate_id = %delegation.delegate_id.0,
                "lapsed delegation deactivated"
            );
            self.ctx
                .record(
                    TimelineEntry::new(
                        TimelineSubject::Delegation(delegation.id.clone()),
                        TimelineEntry::SYSTEM_ACTOR,
                        "delegation_expired",
                        format!("delegation ended at {}", delegation.ends_at.to_rfc3339()),
                        now,
                    ),
                    warnings,
                )
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use procura_core::clock::ManualClock;
    use procura_core::domain::delegation::{DelegationScope, NewDelegation};
    use procura_core::domain::user::{ActingUser, User, UserId, UserRole};
    use procura_core::errors::{ApplicationError, ErrorKind};
    use procura_core::notifier::RecordingNotifier;
    use procura_core::reminders::PortalLinks;

    use super::{DelegationDirection, DelegationService};
    use crate::context::WorkflowContext;

    fn user(id: &str, role: UserRole) -> User {
        User {
            id: UserId(id.to_owned()),
            name: id.to_owned(),
            email: format!("{id}@procura.local"),
            role,
            is_active: true,
        }
    }

    async fn setup() -> (DelegationService, ManualClock, RecordingNotifier) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
        let notifier = RecordingNotifier::default();
        let ctx = WorkflowContext::in_memory(
            Arc::new(notifier.clone()),
            Arc::new(clock.clone()),
            PortalLinks::new("https://portal.procura.local"),
        );
        for user in [user("mgr", UserRole::Manager), user("dep", UserRole::Manager)] {
            ctx.users.save(user).await.expect("seed user");
        }
        (DelegationService::new(ctx), clock, notifier)
    }

    fn request(clock: &ManualClock, days: i64) -> NewDelegation {
        use procura_core::clock::Clock;
        let now = clock.now();
        NewDelegation {
            delegator_id: UserId("mgr".to_owned()),
            delegate_id: UserId("dep".to_owned()),
            scope: DelegationScope::All,
            starts_at: now,
            ends_at: now + Duration::days(days),
            reason: Some("annual leave".to_owned()),
        }
    }

    #[tokio::test]
    async fn creation_notifies_the_delegate() {
        let (service, clock, notifier) = setup().await;
        let created = service
            .create(&ActingUser::new("mgr", UserRole::Manager), request(&clock, 3))
            .await
            .expect("create");

        assert!(created.is_clean());
        assert!(created.value.is_active);
        assert_eq!(notifier.sent_to("dep@procura.local").len(), 1);
    }

    #[tokio::test]
    async fn unknown_delegate_and_foreign_delegator_are_refused() {
        let (service, clock, _) = setup().await;

        let mut unknown = request(&clock, 3);
        unknown.delegate_id = UserId("ghost".to_owned());
        let error = service
            .create(&ActingUser::new("mgr", UserRole::Manager), unknown)
            .await
            .expect_err("unknown delegate");
        assert_eq!(error.kind(), ErrorKind::Validation);

        let error = service
            .create(&ActingUser::new("dep", UserRole::Manager), request(&clock, 3))
            .await
            .expect_err("not the delegator");
        assert_eq!(error.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn second_deactivation_is_invalid_state() {
        let (service, clock, _) = setup().await;
        let actor = ActingUser::new("mgr", UserRole::Manager);
        let created = service.create(&actor, request(&clock, 3)).await.expect("create").value;

        let deactivated = service.deactivate(&created.id, &actor).await.expect("deactivate");
        assert!(!deactivated.value.is_active);

        let again = service.deactivate(&created.id, &actor).await.expect_err("already inactive");
        assert!(matches!(again, ApplicationError::Domain(_)));
        assert_eq!(again.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn listing_after_the_end_expires_the_delegation() {
        let (service, clock, _) = setup().await;
        let actor = ActingUser::new("dep", UserRole::Manager);
        service
            .create(&ActingUser::new("mgr", UserRole::Manager), request(&clock, 2))
            .await
            .expect("create");

        clock.advance(Duration::days(3));
        let active =
            service.list(&actor, DelegationDirection::Received, false).await.expect("list");
        assert!(active.value.is_empty());

        let all = service.list(&actor, DelegationDirection::Received, true).await.expect("list");
        assert_eq!(all.value.len(), 1);
        assert!(!all.value[0].is_active);
        assert!(all.value[0].deactivated_at.is_some());
    }
}
