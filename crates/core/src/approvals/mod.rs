//! Decides whether an acting user may record a decision on an approval slot,
//! and which slot an ambiguous request targets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalPair, ApprovalRecord, ApprovalSlot, ApprovalStatus};
use crate::domain::delegation::{Delegation, DelegationId};
use crate::domain::initiation::{Initiation, InitiationStatus};
use crate::domain::user::{ActingUser, UserId};

/// How the acting user came to hold authority over a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotAuthority {
    Assigned,
    Delegated { delegator: UserId, delegation_id: DelegationId },
    Elevated,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSlot {
    pub slot: ApprovalSlot,
    pub approver_id: UserId,
    pub authority: SlotAuthority,
}

impl ResolvedSlot {
    pub fn acting_for(&self) -> Option<&UserId> {
        match &self.authority {
            SlotAuthority::Delegated { delegator, .. } => Some(delegator),
            SlotAuthority::Assigned | SlotAuthority::Elevated => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionFailure {
    InitiationClosed { status: InitiationStatus },
    SlotNotPending { slot: ApprovalSlot, status: ApprovalStatus },
    NoOpenSlot,
    SelfApproval { user_id: UserId },
    NotAuthorized { user_id: UserId, slot: Option<ApprovalSlot> },
    DisambiguationRequired { candidates: Vec<ApprovalSlot> },
}

impl ResolutionFailure {
    pub fn reason(&self) -> String {
        match self {
            Self::InitiationClosed { status } => {
                format!("initiation is {} and no longer accepts decisions", status.as_str())
            }
            Self::SlotNotPending { slot, status } => {
                format!("{} slot is already {}", slot.as_str(), status.as_str())
            }
            Self::NoOpenSlot => "no approval slot is pending".to_owned(),
            Self::SelfApproval { user_id } => {
                format!("user `{}` requested this initiation and cannot approve it", user_id.0)
            }
            Self::NotAuthorized { user_id, slot: Some(slot) } => {
                format!("user `{}` may not decide the {} slot", user_id.0, slot.as_str())
            }
            Self::NotAuthorized { user_id, slot: None } => {
                format!("user `{}` holds no authority over any pending slot", user_id.0)
            }
            Self::DisambiguationRequired { candidates } => {
                let names = candidates.iter().map(ApprovalSlot::as_str).collect::<Vec<_>>();
                format!("specify which slot to decide: {}", names.join(" or "))
            }
        }
    }
}

pub struct ResolutionRequest<'a> {
    pub initiation: &'a Initiation,
    pub slots: &'a ApprovalPair,
    pub actor: &'a ActingUser,
    pub requested_slot: Option<ApprovalSlot>,
    /// Delegations naming the actor as delegate; ineffective ones are ignored.
    pub delegations: &'a [Delegation],
    pub now: DateTime<Utc>,
}

/// Direct authority over one slot: the assigned approver, or an effective
/// delegate of that approver whose scope covers the slot.
pub fn authorize(
    record: &ApprovalRecord,
    actor: &UserId,
    delegations: &[Delegation],
    now: DateTime<Utc>,
) -> Option<SlotAuthority> {
    if &record.approver_id == actor {
        return Some(SlotAuthority::Assigned);
    }

    delegations
        .iter()
        .find(|delegation| {
            &delegation.delegate_id == actor
                && delegation.grants(&record.approver_id, record.slot, now)
        })
        .map(|delegation| SlotAuthority::Delegated {
            delegator: delegation.delegator_id.clone(),
            delegation_id: delegation.id.clone(),
        })
}

pub fn resolve(request: &ResolutionRequest<'_>) -> Result<ResolvedSlot, ResolutionFailure> {
    let ResolutionRequest { initiation, slots, actor, requested_slot, delegations, now } = request;

    if !initiation.status.accepts_decisions() {
        return Err(ResolutionFailure::InitiationClosed { status: initiation.status });
    }

    match requested_slot {
        Some(slot) => {
            let record = slots.slot(*slot);
            if !record.is_pending() {
                return Err(ResolutionFailure::SlotNotPending {
                    slot: *slot,
                    status: record.status,
                });
            }
            if actor.id == initiation.requester_id {
                return Err(ResolutionFailure::SelfApproval { user_id: actor.id.clone() });
            }
            match authorize(record, &actor.id, delegations, *now) {
                Some(authority) => Ok(resolved(record, authority)),
                None if actor.is_elevated() => Ok(resolved(record, SlotAuthority::Elevated)),
                None => Err(ResolutionFailure::NotAuthorized {
                    user_id: actor.id.clone(),
                    slot: Some(*slot),
                }),
            }
        }
        None => {
            let pending = slots
                .records()
                .into_iter()
                .filter(|record| record.is_pending())
                .collect::<Vec<_>>();
            if pending.is_empty() {
                return Err(ResolutionFailure::NoOpenSlot);
            }
            if actor.id == initiation.requester_id {
                return Err(ResolutionFailure::SelfApproval { user_id: actor.id.clone() });
            }

            let mut direct = pending
                .iter()
                .filter_map(|record| {
                    authorize(record, &actor.id, delegations, *now)
                        .map(|authority| (*record, authority))
                })
                .collect::<Vec<_>>();

            match direct.len() {
                1 => {
                    let (record, authority) = direct.remove(0);
                    Ok(resolved(record, authority))
                }
                0 if actor.is_elevated() && pending.len() == 1 => {
                    Ok(resolved(pending[0], SlotAuthority::Elevated))
                }
                0 if !actor.is_elevated() => {
                    Err(ResolutionFailure::NotAuthorized { user_id: actor.id.clone(), slot: None })
                }
                _ => Err(ResolutionFailure::DisambiguationRequired {
                    candidates: pending.iter().map(|record| record.slot).collect(),
                }),
            }
        }
    }
}

fn resolved(record: &ApprovalRecord, authority: SlotAuthority) -> ResolvedSlot {
    ResolvedSlot { slot: record.slot, approver_id: record.approver_id.clone(), authority }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityReason {
    Requester,
    Elevated,
    AssignedApprover,
    Delegate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegatedSlots {
    Manager,
    Procurement,
    Both,
}

/// Display-only annotation for listings; carries no authorization weight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visibility {
    pub reason: VisibilityReason,
    pub delegated: Option<DelegatedSlots>,
    pub delegated_by: Vec<UserId>,
}

pub fn visibility(
    initiation: &Initiation,
    slots: Option<&ApprovalPair>,
    actor: &ActingUser,
    delegations: &[Delegation],
    now: DateTime<Utc>,
) -> Option<Visibility> {
    let mut delegated_slots = Vec::new();
    let mut delegated_by: Vec<UserId> = Vec::new();
    let mut assigned = false;

    if let Some(slots) = slots {
        for record in slots.records() {
            if record.approver_id == actor.id {
                assigned = true;
                continue;
            }
            let grant = delegations.iter().find(|delegation| {
                delegation.delegate_id == actor.id
                    && delegation.grants(&record.approver_id, record.slot, now)
            });
            if let Some(delegation) = grant {
                delegated_slots.push(record.slot);
                if !delegated_by.contains(&delegation.delegator_id) {
                    delegated_by.push(delegation.delegator_id.clone());
                }
            }
        }
    }

    let delegated = match delegated_slots.as_slice() {
        [] => None,
        [ApprovalSlot::Manager] => Some(DelegatedSlots::Manager),
        [ApprovalSlot::Procurement] => Some(DelegatedSlots::Procurement),
        _ => Some(DelegatedSlots::Both),
    };

    let reason = if initiation.requester_id == actor.id {
        VisibilityReason::Requester
    } else if assigned {
        VisibilityReason::AssignedApprover
    } else if delegated.is_some() {
        VisibilityReason::Delegate
    } else if actor.is_elevated() {
        VisibilityReason::Elevated
    } else {
        return None;
    };

    Some(Visibility { reason, delegated, delegated_by })
}
