use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::assignment::rank;
use super::availability::{ResolveOptions, resolve};
use super::conflict::slot_from_parts;
use super::{Engine, EngineError};

/// Which bookings a listing returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub nanny_id: Option<NannyId>,
    /// Only bookings touching one of these days (ascending).
    pub days: Option<Vec<NaiveDate>>,
    /// Drop cancelled bookings.
    pub live_only: bool,
}

impl BookingFilter {
    fn matches(&self, booking: &Booking) -> bool {
        if self.live_only && !booking.status.is_live() {
            return false;
        }
        match &self.days {
            Some(days) => booking.touches(days),
            None => true,
        }
    }
}

impl Engine {
    /// Read-locked snapshot of every nanny, ascending by id.
    async fn roster_snapshot(&self) -> Vec<tokio::sync::OwnedRwLockReadGuard<NannyState>> {
        let mut states: Vec<_> = self
            .nannies
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        states.sort_by_key(|(id, _)| *id);
        let mut guards = Vec::with_capacity(states.len());
        for (_, rs) in states {
            guards.push(rs.read_owned().await);
        }
        guards
    }

    pub async fn list_nannies(&self) -> Vec<Nanny> {
        self.roster_snapshot()
            .await
            .iter()
            .map(|rs| rs.nanny.clone())
            .collect()
    }

    pub async fn get_nanny(&self, id: NannyId) -> Option<Nanny> {
        let rs = self.get_nanny_state(id)?;
        let guard = rs.read().await;
        Some(guard.nanny.clone())
    }

    pub async fn blocked_dates(&self, nanny_id: NannyId) -> Result<Vec<BlockedDate>, EngineError> {
        let rs = self
            .get_nanny_state(nanny_id)
            .ok_or(EngineError::NannyNotFound(nanny_id))?;
        let guard = rs.read().await;
        Ok(guard.blocked.values().cloned().collect())
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let nanny_id = self.nanny_for_booking(&id)?;
        let rs = self.get_nanny_state(nanny_id)?;
        let guard = rs.read().await;
        guard.booking(id).cloned()
    }

    /// Bookings matching `filter`, ordered by start date then id.
    pub async fn bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let mut out: Vec<Booking> = match filter.nanny_id {
            Some(id) => match self.get_nanny_state(id) {
                Some(rs) => {
                    let guard = rs.read().await;
                    guard
                        .bookings
                        .iter()
                        .filter(|b| filter.matches(b))
                        .cloned()
                        .collect()
                }
                None => Vec::new(),
            },
            None => self
                .roster_snapshot()
                .await
                .iter()
                .flat_map(|rs| rs.bookings.iter().filter(|b| filter.matches(b)).cloned())
                .collect(),
        };
        out.sort_by_key(|b| (b.date, b.id));
        out
    }

    /// Nannies free for the described slot, best pick first.
    ///
    /// Read-only preview of what automatic assignment would consider. The
    /// answer can go stale as soon as the locks drop.
    pub async fn eligible_nannies(
        &self,
        date: NaiveDate,
        end_date: Option<NaiveDate>,
        start_time: &str,
        end_time: Option<&str>,
        hotel: Option<&str>,
    ) -> Result<Vec<Candidate>, EngineError> {
        let slot = slot_from_parts(date, end_date, start_time, end_time, hotel)?;
        let guards = self.roster_snapshot().await;
        let roster: Vec<&NannyState> = guards.iter().map(|g| &**g).collect();
        let candidates = resolve(
            &roster,
            &slot,
            ResolveOptions {
                consult_blocked_dates: true,
                overlap: self.policy.overlap_on_bad_token,
            },
        );
        Ok(rank(&candidates))
    }
}
