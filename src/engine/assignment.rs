use std::cmp::Reverse;

use crate::model::*;

use super::availability::{ResolveOptions, resolve};
use super::conflict::find_conflicts;
use super::{Rejection, SchedulingPolicy};

/// Same-hotel affinity, then fewest live bookings, then lowest id. Total,
/// so the pick is deterministic.
fn rank_key(c: &Candidate) -> (Reverse<bool>, usize, NannyId) {
    (Reverse(c.same_hotel), c.booking_count, c.nanny_id)
}

/// Order candidates best-first by [`rank_key`].
pub fn rank(candidates: &[Candidate]) -> Vec<Candidate> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by_key(rank_key);
    ranked
}

pub fn select(candidates: &[Candidate]) -> Option<NannyId> {
    candidates
        .iter()
        .min_by_key(|c| rank_key(c))
        .map(|c| c.nanny_id)
}

/// Pick a nanny when the caller didn't name one.
pub fn assign_automatic(
    roster: &[&NannyState],
    slot: &Slot,
    policy: &SchedulingPolicy,
) -> Result<NannyId, Rejection> {
    if !roster.iter().any(|rs| rs.nanny.is_candidate()) {
        return Err(Rejection::NoNanniesAvailable);
    }
    let candidates = resolve(
        roster,
        slot,
        ResolveOptions {
            consult_blocked_dates: true,
            overlap: policy.overlap_on_bad_token,
        },
    );
    select(&candidates).ok_or(Rejection::NoNannyForSlot)
}

/// Confirm a caller-chosen nanny, or list every booking in the way.
///
/// Availability and status are not consulted: the caller chose this nanny on
/// purpose. Blocked dates only count when the policy says so.
pub fn validate_manual(
    rs: &NannyState,
    slot: &Slot,
    policy: &SchedulingPolicy,
) -> Result<NannyId, Rejection> {
    let conflicts = find_conflicts(rs, slot, policy.overlap_on_bad_token, None);
    if !conflicts.is_empty() {
        return Err(Rejection::Conflict {
            nanny_id: rs.id(),
            bookings: conflicts.into_iter().map(ConflictingBooking::from).collect(),
        });
    }
    if policy.manual_honors_blocked_dates {
        let dates = rs.blocked_on(&slot.days);
        if !dates.is_empty() {
            return Err(Rejection::DateBlocked {
                nanny_id: rs.id(),
                dates,
            });
        }
    }
    Ok(rs.id())
}
