use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{BookingStatus, ConflictingBooking, NannyId};

/// The broad classes a caller has to tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller's fault. Never retried automatically.
    Validation,
    /// Nobody can take the slot right now. A different window may work.
    Capacity,
    /// The chosen nanny collides with existing work.
    Conflict,
    /// Storage failure. Safe to retry.
    Data,
}

/// Why a scheduling decision said no.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    InvalidTime(String),
    LimitExceeded(&'static str),
    UnknownNanny(NannyId),
    DurationTooShort { hours: f64, minimum: f64 },
    /// No nanny in the roster is active and available at all.
    NoNanniesAvailable,
    /// Some nannies are available, but none is free for this window.
    NoNannyForSlot,
    Conflict {
        nanny_id: NannyId,
        bookings: Vec<ConflictingBooking>,
    },
    DateBlocked {
        nanny_id: NannyId,
        dates: Vec<NaiveDate>,
    },
}

impl Rejection {
    pub fn class(&self) -> ErrorClass {
        match self {
            Rejection::InvalidTime(_)
            | Rejection::LimitExceeded(_)
            | Rejection::UnknownNanny(_)
            | Rejection::DurationTooShort { .. } => ErrorClass::Validation,
            Rejection::NoNanniesAvailable | Rejection::NoNannyForSlot => ErrorClass::Capacity,
            Rejection::Conflict { .. } | Rejection::DateBlocked { .. } => ErrorClass::Conflict,
        }
    }

    /// Short label for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::InvalidTime(_) => "invalid_time",
            Rejection::LimitExceeded(_) => "limit_exceeded",
            Rejection::UnknownNanny(_) => "unknown_nanny",
            Rejection::DurationTooShort { .. } => "duration_too_short",
            Rejection::NoNanniesAvailable => "none_available",
            Rejection::NoNannyForSlot => "slot_taken",
            Rejection::Conflict { .. } => "manual_conflict",
            Rejection::DateBlocked { .. } => "date_blocked",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::InvalidTime(token) => {
                write!(f, "invalid time token: {token:?} (expected e.g. 9h30)")
            }
            Rejection::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            Rejection::UnknownNanny(id) => write!(f, "unknown nanny: {id}"),
            Rejection::DurationTooShort { hours, minimum } => {
                write!(f, "booking lasts {hours:.2}h, minimum is {minimum:.2}h")
            }
            Rejection::NoNanniesAvailable => write!(f, "no nannies currently available"),
            Rejection::NoNannyForSlot => write!(f, "no nanny available for this time slot"),
            Rejection::Conflict { nanny_id, bookings } => write!(
                f,
                "nanny {nanny_id} has {} conflicting booking(s)",
                bookings.len()
            ),
            Rejection::DateBlocked { nanny_id, dates } => {
                write!(f, "nanny {nanny_id} blocked ")?;
                for (i, d) in dates.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{d}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NannyNotFound(NannyId),
    BookingNotFound(Ulid),
    AlreadyExists(String),
    DateNotBlocked(NannyId, NaiveDate),
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    NotClockedIn(Ulid),
    /// Completed or cancelled bookings can't be changed.
    BookingClosed {
        id: Ulid,
        status: BookingStatus,
    },
    LimitExceeded(&'static str),
    Rejected(Rejection),
    WalError(String),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Rejected(r) => r.class(),
            EngineError::WalError(_) => ErrorClass::Data,
            _ => ErrorClass::Validation,
        }
    }
}

impl From<Rejection> for EngineError {
    fn from(r: Rejection) -> Self {
        EngineError::Rejected(r)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NannyNotFound(id) => write!(f, "nanny not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::DateNotBlocked(id, date) => {
                write!(f, "nanny {id} has no blocked date on {date}")
            }
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "booking {id}: cannot go from {from} to {to}")
            }
            EngineError::NotClockedIn(id) => write!(f, "booking {id} has no clock-in"),
            EngineError::BookingClosed { id, status } => {
                write!(f, "booking {id} is {status} and can no longer change")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Rejected(r) => write!(f, "{r}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
