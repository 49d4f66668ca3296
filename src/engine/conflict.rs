use chrono::NaiveDate;
use tracing::warn;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::window::{parse_time_token, range_len, try_windows_overlap_shifted};

use super::duration::validate_duration;
use super::{OverlapPolicy, Rejection, SchedulingPolicy};

fn check_token(token: &str) -> Result<(), Rejection> {
    if token.len() > MAX_TOKEN_LEN || parse_time_token(token).is_none() {
        return Err(Rejection::InvalidTime(token.to_string()));
    }
    Ok(())
}

fn check_len(value: Option<&str>, max: usize, what: &'static str) -> Result<(), Rejection> {
    match value {
        Some(v) if v.len() > max => Err(Rejection::LimitExceeded(what)),
        _ => Ok(()),
    }
}

/// Boundary check for a window: tokens must parse, the span must stay within
/// limits. No duration rule here.
pub fn slot_from_parts(
    date: NaiveDate,
    end_date: Option<NaiveDate>,
    start_time: &str,
    end_time: Option<&str>,
    hotel: Option<&str>,
) -> Result<Slot, Rejection> {
    check_token(start_time)?;
    if let Some(end) = end_time {
        check_token(end)?;
    }
    check_len(hotel, MAX_HOTEL_LEN, "hotel name too long")?;
    if range_len(date, end_date) > MAX_RANGE_DAYS {
        return Err(Rejection::LimitExceeded("booking spans too many days"));
    }
    Ok(Slot::new(
        date,
        end_date,
        start_time,
        end_time.map(str::to_string),
        hotel,
    ))
}

/// Everything the validating stage checks before any lock is taken.
pub fn validate_request(
    request: &BookingRequest,
    policy: &SchedulingPolicy,
) -> Result<Slot, Rejection> {
    check_len(Some(&request.client_name), MAX_NAME_LEN, "client name too long")?;
    check_len(request.notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;
    let slot = slot_from_parts(
        request.date,
        request.end_date,
        &request.start_time,
        request.end_time.as_deref(),
        request.hotel.as_deref(),
    )?;
    // Open-ended bookings run until clock-out, there is nothing to measure.
    if let Some(end) = &request.end_time {
        validate_duration(&request.start_time, end, false, policy.min_booking_hours)?;
    }
    Ok(slot)
}

/// Whether an existing booking's window collides with the slot's window.
///
/// Each requested day is compared against the booking's own days and the
/// days either side of it, since an overnight window spills into the next
/// morning. Slot tokens were checked at the boundary, so only a stored
/// booking can be unparseable here. `overlap` decides how that reads, but
/// only for a booking that shares a day with the slot.
pub(crate) fn booking_overlaps(existing: &Booking, slot: &Slot, overlap: OverlapPolicy) -> bool {
    for day in &slot.days {
        for offset in -1i64..=1 {
            let booked = match offset {
                -1 => day.pred_opt(),
                0 => Some(*day),
                _ => day.succ_opt(),
            };
            if !booked.is_some_and(|d| existing.covers(d)) {
                continue;
            }
            // The slot's day sits `-offset` days after the booked day.
            match try_windows_overlap_shifted(
                &slot.start_time,
                &slot.end_time,
                &existing.start_time,
                existing.effective_end(),
                -offset,
            ) {
                Some(true) => return true,
                Some(false) => {}
                None => return unparseable_overlap(existing, slot, overlap),
            }
        }
    }
    false
}

fn unparseable_overlap(existing: &Booking, slot: &Slot, overlap: OverlapPolicy) -> bool {
    if !existing.touches(&slot.days) {
        return false;
    }
    warn!(
        booking = %existing.id,
        start = %existing.start_time,
        end = %existing.effective_end(),
        ?overlap,
        "stored booking window is unparseable"
    );
    overlap == OverlapPolicy::FailClosed
}

/// Live bookings of one nanny that collide with the slot, skipping `exclude`.
pub fn find_conflicts<'a>(
    rs: &'a NannyState,
    slot: &Slot,
    overlap: OverlapPolicy,
    exclude: Option<Ulid>,
) -> Vec<&'a Booking> {
    rs.live_bookings_near(&slot.days)
        .filter(|b| Some(b.id) != exclude)
        .filter(|b| booking_overlaps(b, slot, overlap))
        .collect()
}
