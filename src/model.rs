use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::window::{END_OF_DAY, expand_date_range};

pub type NannyId = i64;
pub type ClientId = i64;

/// Access-control state, set by admins. Independent of `available`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NannyStatus {
    Active,
    Invited,
    Blocked,
}

impl NannyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NannyStatus::Active => "active",
            NannyStatus::Invited => "invited",
            NannyStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for NannyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NannyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(NannyStatus::Active),
            "invited" => Ok(NannyStatus::Invited),
            "blocked" => Ok(NannyStatus::Blocked),
            other => Err(format!("unknown nanny status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the booking still occupies its nanny's time.
    pub fn is_live(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    /// Completed and cancelled are terminal.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Completed)
                | (Pending, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nanny {
    pub id: NannyId,
    pub name: String,
    pub status: NannyStatus,
    /// Self-toggled by the nanny.
    pub available: bool,
}

impl Nanny {
    /// Only active nannies who marked themselves available can be assigned.
    pub fn is_candidate(&self) -> bool {
        self.status == NannyStatus::Active && self.available
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedDate {
    pub nanny_id: NannyId,
    pub date: NaiveDate,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub nanny_id: Option<NannyId>,
    pub client_id: ClientId,
    pub client_name: String,
    pub date: NaiveDate,
    /// Inclusive last day of a multi-day booking. `None` for single-day.
    pub end_date: Option<NaiveDate>,
    pub start_time: String,
    /// `None` means open-ended.
    pub end_time: Option<String>,
    pub status: BookingStatus,
    pub hotel: Option<String>,
    pub notes: Option<String>,
    pub clock_in: Option<String>,
    pub clock_out: Option<String>,
}

impl Booking {
    pub fn days(&self) -> Vec<NaiveDate> {
        expand_date_range(self.date, self.end_date)
    }

    pub fn last_day(&self) -> NaiveDate {
        match self.end_date {
            Some(end) if end > self.date => end,
            _ => self.date,
        }
    }

    /// End token used for conflict checks.
    pub fn effective_end(&self) -> &str {
        self.end_time.as_deref().unwrap_or(END_OF_DAY)
    }

    pub fn covers(&self, day: NaiveDate) -> bool {
        day >= self.date && day <= self.last_day()
    }

    /// Whether any of `days` (sorted ascending) falls inside this booking's span.
    pub fn touches(&self, days: &[NaiveDate]) -> bool {
        days.iter().any(|d| self.covers(*d))
    }

    pub fn at_hotel(&self, hotel: &str) -> bool {
        self.hotel
            .as_deref()
            .is_some_and(|h| normalize_hotel(h) == hotel)
    }
}

/// Hotel names compare case-insensitively after trimming.
pub fn normalize_hotel(hotel: &str) -> String {
    hotel.trim().to_lowercase()
}

/// Everything the engine knows about one nanny. Guarded by a single lock.
#[derive(Debug, Clone)]
pub struct NannyState {
    pub nanny: Nanny,
    pub blocked: BTreeMap<NaiveDate, BlockedDate>,
    /// Bookings assigned to this nanny, sorted by `date`.
    pub bookings: Vec<Booking>,
}

impl NannyState {
    pub fn new(nanny: Nanny) -> Self {
        Self {
            nanny,
            blocked: BTreeMap::new(),
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> NannyId {
        self.nanny.id
    }

    /// Insert booking keeping the list sorted by start date.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.date <= booking.date);
        self.bookings.insert(pos, booking);
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn live_bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.status.is_live())
    }

    /// Non-cancelled bookings touching any of `days` (sorted ascending).
    pub fn live_bookings_on<'a>(&'a self, days: &[NaiveDate]) -> impl Iterator<Item = &'a Booking> {
        // Bookings starting after the last requested day can't touch it.
        let last = days.last().copied();
        let bound = match last {
            Some(last) => self.bookings.partition_point(|b| b.date <= last),
            None => 0,
        };
        self.bookings[..bound]
            .iter()
            .filter(move |b| b.status.is_live() && b.touches(days))
    }

    /// Non-cancelled bookings whose span comes within one day of `days`
    /// (sorted ascending). Overnight windows reach into the neighbouring day,
    /// so conflict checks look this wide.
    pub fn live_bookings_near<'a>(&'a self, days: &[NaiveDate]) -> impl Iterator<Item = &'a Booking> {
        let low = days.first().and_then(|d| d.pred_opt());
        let bound = match days.last() {
            Some(last) => {
                let high = last.succ_opt().unwrap_or(*last);
                self.bookings.partition_point(|b| b.date <= high)
            }
            None => 0,
        };
        self.bookings[..bound]
            .iter()
            .filter(move |b| b.status.is_live() && low.is_none_or(|low| b.last_day() >= low))
    }

    pub fn live_booking_count(&self) -> usize {
        self.live_bookings().count()
    }

    /// Requested days the nanny has blocked, ascending.
    pub fn blocked_on(&self, days: &[NaiveDate]) -> Vec<NaiveDate> {
        days.iter()
            .copied()
            .filter(|d| self.blocked.contains_key(d))
            .collect()
    }
}

/// A booking request as it arrives from a caller. Tokens are still raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    /// `None` asks the engine to pick a nanny.
    pub nanny_id: Option<NannyId>,
    pub client_id: ClientId,
    pub client_name: String,
    pub date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub hotel: Option<String>,
    pub notes: Option<String>,
}

/// The validated shape the resolver and policy work on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Ascending, non-empty.
    pub days: Vec<NaiveDate>,
    pub start_time: String,
    /// Explicit end, or [`END_OF_DAY`] for open-ended requests.
    pub end_time: String,
    /// Normalized (trimmed, lowercased); `None` when absent or blank.
    pub hotel: Option<String>,
}

impl Slot {
    pub fn new(
        date: NaiveDate,
        end_date: Option<NaiveDate>,
        start_time: impl Into<String>,
        end_time: Option<String>,
        hotel: Option<&str>,
    ) -> Self {
        Self {
            days: expand_date_range(date, end_date),
            start_time: start_time.into(),
            end_time: end_time.unwrap_or_else(|| END_OF_DAY.to_string()),
            hotel: hotel.map(normalize_hotel).filter(|h| !h.is_empty()),
        }
    }
}

/// An eligible nanny, annotated for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub nanny_id: NannyId,
    /// Non-cancelled bookings currently held.
    pub booking_count: usize,
    /// Already serving the requested hotel on one of the requested days.
    pub same_hotel: bool,
}

/// An existing booking that blocks a manual assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictingBooking {
    pub booking_id: Ulid,
    pub date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub client_name: String,
}

impl From<&Booking> for ConflictingBooking {
    fn from(b: &Booking) -> Self {
        Self {
            booking_id: b.id,
            date: b.date,
            end_date: b.end_date,
            start_time: b.start_time.clone(),
            end_time: b.end_time.clone(),
            client_name: b.client_name.clone(),
        }
    }
}

/// The event types, flat. This is the journal record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    NannyRegistered {
        nanny: Nanny,
    },
    NannyAvailabilityChanged {
        nanny_id: NannyId,
        available: bool,
    },
    NannyStatusChanged {
        nanny_id: NannyId,
        status: NannyStatus,
    },
    DateBlocked {
        entry: BlockedDate,
    },
    DateUnblocked {
        nanny_id: NannyId,
        date: NaiveDate,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        nanny_id: NannyId,
        status: BookingStatus,
    },
    BookingRescheduled {
        id: Ulid,
        nanny_id: NannyId,
        start_time: String,
        end_time: Option<String>,
    },
    ClockedIn {
        id: Ulid,
        nanny_id: NannyId,
        at: String,
    },
    ClockedOut {
        id: Ulid,
        nanny_id: NannyId,
        at: String,
    },
}

impl Event {
    /// The nanny whose state this event changes.
    pub fn nanny_id(&self) -> NannyId {
        match self {
            Event::NannyRegistered { nanny } => nanny.id,
            Event::DateBlocked { entry } => entry.nanny_id,
            Event::BookingCreated { booking } => booking.nanny_id.unwrap_or_default(),
            Event::NannyAvailabilityChanged { nanny_id, .. }
            | Event::NannyStatusChanged { nanny_id, .. }
            | Event::DateUnblocked { nanny_id, .. }
            | Event::BookingStatusChanged { nanny_id, .. }
            | Event::BookingRescheduled { nanny_id, .. }
            | Event::ClockedIn { nanny_id, .. }
            | Event::ClockedOut { nanny_id, .. } => *nanny_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn booking(date: &str, end_date: Option<&str>, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            nanny_id: Some(1),
            client_id: 7,
            client_name: "Client".into(),
            date: day(date),
            end_date: end_date.map(day),
            start_time: "9h00".into(),
            end_time: Some("12h00".into()),
            status,
            hotel: Some("  Grand Hotel ".into()),
            notes: None,
            clock_in: None,
            clock_out: None,
        }
    }

    fn state() -> NannyState {
        NannyState::new(Nanny {
            id: 1,
            name: "Ana".into(),
            status: NannyStatus::Active,
            available: true,
        })
    }

    #[test]
    fn candidate_requires_active_and_available() {
        let mut n = state().nanny;
        assert!(n.is_candidate());
        n.available = false;
        assert!(!n.is_candidate());
        n.available = true;
        n.status = NannyStatus::Invited;
        assert!(!n.is_candidate());
        n.status = NannyStatus::Blocked;
        assert!(!n.is_candidate());
    }

    #[test]
    fn status_strings_parse_back() {
        for s in [NannyStatus::Active, NannyStatus::Invited, NannyStatus::Blocked] {
            assert_eq!(s.as_str().parse::<NannyStatus>().unwrap(), s);
        }
        for s in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<BookingStatus>().unwrap(), s);
        }
        assert!("retired".parse::<NannyStatus>().is_err());
    }

    #[test]
    fn terminal_statuses_do_not_transition() {
        assert!(BookingStatus::Pending.can_transition_to(BookingStatus::Confirmed));
        assert!(BookingStatus::Confirmed.can_transition_to(BookingStatus::Cancelled));
        assert!(!BookingStatus::Cancelled.can_transition_to(BookingStatus::Pending));
        assert!(!BookingStatus::Completed.can_transition_to(BookingStatus::Cancelled));
        assert!(!BookingStatus::Confirmed.can_transition_to(BookingStatus::Pending));
    }

    #[test]
    fn multi_day_booking_touches_inner_days() {
        let b = booking("2024-06-01", Some("2024-06-03"), BookingStatus::Pending);
        assert!(b.touches(&[day("2024-06-02")]));
        assert!(b.touches(&[day("2024-05-30"), day("2024-06-03")]));
        assert!(!b.touches(&[day("2024-06-04")]));
        assert_eq!(b.days().len(), 3);
    }

    #[test]
    fn open_ended_booking_runs_to_end_of_day() {
        let mut b = booking("2024-06-01", None, BookingStatus::Pending);
        b.end_time = None;
        assert_eq!(b.effective_end(), "23h59");
    }

    #[test]
    fn hotel_match_ignores_case_and_padding() {
        let b = booking("2024-06-01", None, BookingStatus::Pending);
        assert!(b.at_hotel(&normalize_hotel("grand HOTEL")));
        assert!(!b.at_hotel("ritz"));
    }

    #[test]
    fn bookings_stay_sorted_by_date() {
        let mut rs = state();
        rs.insert_booking(booking("2024-06-05", None, BookingStatus::Pending));
        rs.insert_booking(booking("2024-06-01", None, BookingStatus::Pending));
        rs.insert_booking(booking("2024-06-03", None, BookingStatus::Pending));
        let dates: Vec<_> = rs.bookings.iter().map(|b| b.date).collect();
        assert_eq!(dates, vec![day("2024-06-01"), day("2024-06-03"), day("2024-06-05")]);
    }

    #[test]
    fn live_bookings_on_skips_cancelled_and_other_days() {
        let mut rs = state();
        rs.insert_booking(booking("2024-06-01", None, BookingStatus::Cancelled));
        rs.insert_booking(booking("2024-05-30", Some("2024-06-02"), BookingStatus::Confirmed));
        rs.insert_booking(booking("2024-06-04", None, BookingStatus::Pending));
        let days = [day("2024-06-01")];
        let hits: Vec<_> = rs.live_bookings_on(&days).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].date, day("2024-05-30"));
        assert_eq!(rs.live_booking_count(), 2);
    }

    #[test]
    fn live_bookings_near_reaches_one_day_out() {
        let mut rs = state();
        rs.insert_booking(booking("2024-05-30", None, BookingStatus::Pending));
        rs.insert_booking(booking("2024-05-31", None, BookingStatus::Pending));
        rs.insert_booking(booking("2024-06-03", None, BookingStatus::Confirmed));
        rs.insert_booking(booking("2024-06-04", None, BookingStatus::Pending));
        rs.insert_booking(booking("2024-06-03", None, BookingStatus::Cancelled));
        let days = [day("2024-06-01"), day("2024-06-02")];
        let dates: Vec<_> = rs.live_bookings_near(&days).map(|b| b.date).collect();
        assert_eq!(dates, vec![day("2024-05-31"), day("2024-06-03")]);
        assert_eq!(rs.live_bookings_on(&days).count(), 0);
    }

    #[test]
    fn slot_defaults_open_end_and_drops_blank_hotel() {
        let slot = Slot::new(day("2024-06-01"), None, "9h00", None, Some("   "));
        assert_eq!(slot.end_time, "23h59");
        assert_eq!(slot.hotel, None);
        assert_eq!(slot.days, vec![day("2024-06-01")]);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            booking: booking("2024-06-01", Some("2024-06-02"), BookingStatus::Pending),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.nanny_id(), 1);
    }
}
