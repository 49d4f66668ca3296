use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::window::parse_time_token;

use super::assignment::{assign_automatic, validate_manual};
use super::conflict::{find_conflicts, slot_from_parts, validate_request};
use super::duration::validate_duration;
use super::{BookingOutcome, Engine, EngineError, Rejection, WalCommand};

impl Engine {
    // ── Booking lifecycle ────────────────────────────────────

    /// Validate, resolve a nanny, and commit a booking.
    ///
    /// Scheduling rejections come back as `Ok(BookingOutcome::Rejected)`;
    /// `Err` is reserved for storage failures and duplicate ids. Dispatchers
    /// run after the locks are released and cannot undo the assignment.
    pub async fn create_booking(
        &self,
        request: BookingRequest,
    ) -> Result<BookingOutcome, EngineError> {
        let started = Instant::now();
        let result = self.schedule(request).await;
        metrics::histogram!(observability::ASSIGNMENT_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let outcome = result?;
        match &outcome {
            BookingOutcome::Assigned(booking) => {
                metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "assigned", "reason" => "ok")
                    .increment(1);
                self.dispatch(booking).await;
            }
            BookingOutcome::Rejected(rejection) => {
                metrics::counter!(
                    observability::BOOKINGS_TOTAL,
                    "outcome" => "rejected",
                    "reason" => rejection.reason()
                )
                .increment(1);
                debug!(reason = rejection.reason(), "booking rejected: {rejection}");
            }
        }
        Ok(outcome)
    }

    async fn schedule(&self, request: BookingRequest) -> Result<BookingOutcome, EngineError> {
        // validating
        let slot = match validate_request(&request, &self.policy) {
            Ok(slot) => slot,
            Err(r) => return Ok(BookingOutcome::Rejected(r)),
        };

        // resolving: the lease is held from here until the commit lands
        let (mut lease, decision) = match request.nanny_id {
            Some(id) => {
                let Some(lease) = self.lease_nanny(id).await else {
                    return Ok(BookingOutcome::Rejected(Rejection::UnknownNanny(id)));
                };
                let decision = match lease.get(id) {
                    Some(rs) => validate_manual(rs, &slot, &self.policy),
                    None => Err(Rejection::UnknownNanny(id)),
                };
                (lease, decision)
            }
            None => {
                let lease = self.lease_roster().await;
                let decision = assign_automatic(&lease.states(), &slot, &self.policy);
                (lease, decision)
            }
        };
        if self.booking_to_nanny.contains_key(&request.id) {
            return Err(EngineError::AlreadyExists(format!("booking {}", request.id)));
        }
        let nanny_id = match decision {
            Ok(id) => id,
            Err(r) => return Ok(BookingOutcome::Rejected(r)),
        };

        // assigned
        let leased = lease.len();
        let rs = lease
            .get_mut(nanny_id)
            .ok_or(EngineError::NannyNotFound(nanny_id))?;
        if rs.bookings.len() >= MAX_BOOKINGS_PER_NANNY {
            return Ok(BookingOutcome::Rejected(Rejection::LimitExceeded(
                "too many bookings for nanny",
            )));
        }

        let last_day = slot.days.last().copied().unwrap_or(request.date);
        let booking = Booking {
            id: request.id,
            nanny_id: Some(nanny_id),
            client_id: request.client_id,
            client_name: request.client_name,
            date: request.date,
            end_date: (last_day > request.date).then_some(last_day),
            start_time: request.start_time,
            end_time: request.end_time,
            status: BookingStatus::Pending,
            hotel: request.hotel,
            notes: request.notes,
            clock_in: None,
            clock_out: None,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        // Two manual requests on different nannies hold disjoint leases, so
        // the id is claimed in the shared index before the journal write.
        match self.booking_to_nanny.entry(booking.id) {
            Entry::Occupied(_) => {
                return Err(EngineError::AlreadyExists(format!("booking {}", booking.id)));
            }
            Entry::Vacant(claim) => {
                claim.insert(nanny_id);
            }
        }
        if let Err(e) = self.persist_and_apply(rs, &event).await {
            self.booking_to_nanny.remove(&booking.id);
            return Err(e);
        }
        info!(
            booking = %booking.id,
            nanny = nanny_id,
            manual = request.nanny_id.is_some(),
            leased,
            "booking assigned"
        );
        Ok(BookingOutcome::Assigned(booking))
    }

    async fn dispatch(&self, booking: &Booking) {
        for dispatcher in &self.dispatchers {
            if let Err(e) = dispatcher.booking_assigned(booking).await {
                metrics::counter!(observability::DISPATCH_FAILURES_TOTAL, "dispatcher" => dispatcher.name())
                    .increment(1);
                warn!(
                    dispatcher = dispatcher.name(),
                    booking = %booking.id,
                    "dispatch failed: {e}"
                );
            }
        }
    }

    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.booking_write(&id).await?;
        let current = guard
            .booking(id)
            .ok_or(EngineError::BookingNotFound(id))?
            .status;
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current,
                to: status,
            });
        }
        let event = Event::BookingStatusChanged {
            id,
            nanny_id: guard.id(),
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, from = %current, to = %status, "booking status changed");
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(id))
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.set_booking_status(id, BookingStatus::Cancelled).await
    }

    /// Move a booking to a new daily window on the same days.
    ///
    /// Re-runs the duration rule (a live clock-in bypasses it) and the
    /// conflict check against the nanny's other bookings.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        start_time: String,
        end_time: Option<String>,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.booking_write(&id).await?;
        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(id))?;
        if !booking.status.can_transition_to(BookingStatus::Completed) {
            return Err(EngineError::BookingClosed {
                id,
                status: booking.status,
            });
        }

        let slot = slot_from_parts(
            booking.date,
            booking.end_date,
            &start_time,
            end_time.as_deref(),
            booking.hotel.as_deref(),
        )?;
        if let Some(end) = &end_time {
            validate_duration(
                &start_time,
                end,
                booking.clock_in.is_some(),
                self.policy.min_booking_hours,
            )?;
        }
        let conflicts = find_conflicts(&guard, &slot, self.policy.overlap_on_bad_token, Some(id));
        if !conflicts.is_empty() {
            return Err(Rejection::Conflict {
                nanny_id: guard.id(),
                bookings: conflicts.into_iter().map(ConflictingBooking::from).collect(),
            }
            .into());
        }

        let event = Event::BookingRescheduled {
            id,
            nanny_id: guard.id(),
            start_time,
            end_time,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, "booking rescheduled");
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(id))
    }

    pub async fn record_clock_in(&self, id: Ulid, at: String) -> Result<Booking, EngineError> {
        if parse_time_token(&at).is_none() {
            return Err(Rejection::InvalidTime(at).into());
        }
        let mut guard = self.booking_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::BookingNotFound(id))?;
        if !booking.status.can_transition_to(BookingStatus::Completed) {
            return Err(EngineError::BookingClosed {
                id,
                status: booking.status,
            });
        }
        if booking.clock_in.is_some() {
            return Err(EngineError::AlreadyExists(format!("clock-in for booking {id}")));
        }
        let event = Event::ClockedIn {
            id,
            nanny_id: guard.id(),
            at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(id))
    }

    /// Record the actual end time. Completes the booking.
    pub async fn record_clock_out(&self, id: Ulid, at: String) -> Result<Booking, EngineError> {
        if parse_time_token(&at).is_none() {
            return Err(Rejection::InvalidTime(at).into());
        }
        let mut guard = self.booking_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::BookingNotFound(id))?;
        if !booking.status.can_transition_to(BookingStatus::Completed) {
            return Err(EngineError::BookingClosed {
                id,
                status: booking.status,
            });
        }
        if booking.clock_in.is_none() {
            return Err(EngineError::NotClockedIn(id));
        }
        let event = Event::ClockedOut {
            id,
            nanny_id: guard.id(),
            at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, "booking completed by clock-out");
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(id))
    }

    // ── Roster ───────────────────────────────────────────────

    pub async fn register_nanny(&self, nanny: Nanny) -> Result<(), EngineError> {
        let _roster = self.roster_gate.lock().await;
        if self.nannies.len() >= MAX_NANNIES {
            return Err(EngineError::LimitExceeded("too many nannies"));
        }
        if nanny.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("nanny name too long"));
        }
        if self.nannies.contains_key(&nanny.id) {
            return Err(EngineError::AlreadyExists(format!("nanny {}", nanny.id)));
        }

        let id = nanny.id;
        let event = Event::NannyRegistered {
            nanny: nanny.clone(),
        };
        self.wal_append(&event).await?;
        self.nannies
            .insert(id, Arc::new(RwLock::new(NannyState::new(nanny))));
        self.notify.send(id, &event);
        info!(nanny = id, "nanny registered");
        Ok(())
    }

    pub async fn set_nanny_available(
        &self,
        id: NannyId,
        available: bool,
    ) -> Result<(), EngineError> {
        let mut guard = self.nanny_write(id).await?;
        let event = Event::NannyAvailabilityChanged {
            nanny_id: id,
            available,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(nanny = id, available, "nanny availability changed");
        Ok(())
    }

    pub async fn set_nanny_status(
        &self,
        id: NannyId,
        status: NannyStatus,
    ) -> Result<(), EngineError> {
        let mut guard = self.nanny_write(id).await?;
        let event = Event::NannyStatusChanged {
            nanny_id: id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(nanny = id, %status, "nanny status changed");
        Ok(())
    }

    pub async fn block_date(
        &self,
        nanny_id: NannyId,
        date: NaiveDate,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let mut guard = self.nanny_write(nanny_id).await?;
        if guard.blocked.contains_key(&date) {
            return Err(EngineError::AlreadyExists(format!(
                "blocked date {date} for nanny {nanny_id}"
            )));
        }
        if guard.blocked.len() >= MAX_BLOCKED_DATES_PER_NANNY {
            return Err(EngineError::LimitExceeded("too many blocked dates"));
        }
        let event = Event::DateBlocked {
            entry: BlockedDate {
                nanny_id,
                date,
                reason,
            },
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn unblock_date(&self, nanny_id: NannyId, date: NaiveDate) -> Result<(), EngineError> {
        let mut guard = self.nanny_write(nanny_id).await?;
        if !guard.blocked.contains_key(&date) {
            return Err(EngineError::DateNotBlocked(nanny_id, date));
        }
        let event = Event::DateUnblocked { nanny_id, date };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Journal maintenance ──────────────────────────────────

    /// Rewrite the journal with only the events needed to rebuild current state.
    ///
    /// Every nanny stays read-locked until the rewritten file is in place, so
    /// no append can land between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _roster = self.roster_gate.lock().await;
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

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::NannyRegistered {
                nanny: guard.nanny.clone(),
            });
            for entry in guard.blocked.values() {
                events.push(Event::DateBlocked {
                    entry: entry.clone(),
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }

        let events_len = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        if result.is_ok() {
            info!(events = events_len, "journal compacted");
        }
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
