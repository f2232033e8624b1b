use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Validate a schedule window: sane timestamps, end strictly after start,
/// bounded duration.
pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<(), EngineError> {
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end <= start {
        return Err(EngineError::InvalidWindow { start, end });
    }
    if end - start > MAX_WINDOW_DURATION_MS {
        return Err(EngineError::LimitExceeded("schedule window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_capacity(max_capacity: u32) -> Result<(), EngineError> {
    if max_capacity == 0 || max_capacity > MAX_SCHEDULE_CAPACITY {
        return Err(EngineError::InvalidCapacity(max_capacity));
    }
    Ok(())
}

/// True while the booking window for a schedule starting at `start_time`
/// is still open. The boundary is exclusive: a start exactly at
/// `now + BOOKING_LEAD_TIME_MS` is already closed.
pub(crate) fn booking_open(start_time: Ms, now: Ms) -> bool {
    start_time > now + BOOKING_LEAD_TIME_MS
}

/// The reservability check, pure over values read under the schedule lock.
///
/// Two call sites, two roles: advisory at creation (pending rows hold no
/// seats, so concurrent creates may all pass) and authoritative at
/// confirmation (the only check that guards the counter). Both roles run
/// the same predicate; what differs is whether a commit consumes seats.
///
/// `is_available` is not consulted here. The flag gates the availability
/// listing only.
pub(crate) fn check_reservable(s: &ScheduleState, seats: u32, now: Ms) -> Result<(), EngineError> {
    if seats == 0 {
        return Err(EngineError::InvalidSeats(seats));
    }
    if !booking_open(s.start_time, now) {
        return Err(EngineError::LeadTimeNotMet { start_time: s.start_time });
    }
    let available = s.available_capacity();
    if seats > available {
        return Err(EngineError::CapacityExceeded { requested: seats, available });
    }
    Ok(())
}
