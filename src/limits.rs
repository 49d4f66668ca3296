//! Hard caps applied at the engine boundary.

pub const MAX_NANNIES: usize = 10_000;
pub const MAX_BOOKINGS_PER_NANNY: usize = 50_000;
pub const MAX_BLOCKED_DATES_PER_NANNY: usize = 3_660;

/// Longest multi-day booking, counted in calendar days.
pub const MAX_RANGE_DAYS: usize = 62;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_HOTEL_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4_096;
pub const MAX_REASON_LEN: usize = 1_024;
pub const MAX_TOKEN_LEN: usize = 8;
