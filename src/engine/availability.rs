use crate::model::*;

use super::OverlapPolicy;
use super::conflict::booking_overlaps;

// ── Availability Resolver ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Skip nannies who blocked any requested day.
    pub consult_blocked_dates: bool,
    pub overlap: OverlapPolicy,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            consult_blocked_dates: true,
            overlap: OverlapPolicy::FailOpen,
        }
    }
}

/// Nannies that could legally take `slot`, ascending by id.
///
/// 1. Structural filter: active and available.
/// 2. Blocked dates on any requested day exclude (when consulted).
/// 3. A live booking whose window overlaps excludes, including an overnight
///    booking from the day before.
/// 4. Survivors are annotated with their live booking count and whether they
///    already serve the requested hotel on one of the requested days.
///
/// Pure over its inputs. An empty result means nobody can take the slot.
pub fn resolve(roster: &[&NannyState], slot: &Slot, opts: ResolveOptions) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = roster
        .iter()
        .filter(|rs| rs.nanny.is_candidate())
        .filter(|rs| !opts.consult_blocked_dates || rs.blocked_on(&slot.days).is_empty())
        .filter(|rs| {
            !rs.live_bookings_near(&slot.days)
                .any(|b| booking_overlaps(b, slot, opts.overlap))
        })
        .map(|rs| Candidate {
            nanny_id: rs.id(),
            booking_count: rs.live_booking_count(),
            same_hotel: slot.hotel.as_deref().is_some_and(|hotel| {
                rs.live_bookings_on(&slot.days).any(|b| b.at_hotel(hotel))
            }),
        })
        .collect();
    candidates.sort_by_key(|c| c.nanny_id);
    candidates
}
