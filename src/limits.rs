use std::time::Duration;

use crate::model::Ms;

/// Hard cap on seats per schedule.
pub const MAX_SCHEDULE_CAPACITY: u32 = 50_000;

/// Reservations must be placed strictly more than this far ahead of the
/// exam start. A schedule starting exactly at `now + BOOKING_LEAD_TIME_MS`
/// is already closed to booking.
pub const BOOKING_LEAD_TIME_MS: Ms = 3 * 24 * 60 * 60 * 1000;

/// How long a mutation waits for a schedule's write lock before giving up
/// with a retryable timeout.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

pub const MAX_SCHEDULES: usize = 100_000;
pub const MAX_RESERVATIONS_PER_SCHEDULE: usize = 100_000;

/// Sanity bounds for schedule timestamps: 2000-01-01 .. 3000-01-01 UTC.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 32_503_680_000_000;

/// An exam sitting longer than this is a data-entry error.
pub const MAX_WINDOW_DURATION_MS: Ms = 30 * 24 * 60 * 60 * 1000;
