use ulid::Ulid;

use crate::model::{Ms, ReservationStatus};

/// Broad classification of an `EngineError`. Callers branch on this to
/// decide between retrying and surfacing the failure; everything else about
/// an error is diagnostic detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any state was read or written.
    Validation,
    /// The requested seats do not fit the schedule under the lock.
    Capacity,
    /// The reservation or schedule is in a state that forbids the operation.
    State,
    /// The actor lacks the capability for the operation.
    Auth,
    /// The schedule lock could not be acquired in time. The only kind
    /// worth retrying.
    Conflict,
    NotFound,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    ScheduleNotFound(Ulid),
    ReservationNotFound(Ulid),
    ScheduleExists(Ulid),
    InvalidSeats(u32),
    InvalidWindow { start: Ms, end: Ms },
    InvalidCapacity(u32),
    StartInPast(Ms),
    LimitExceeded(&'static str),
    CapacityExceeded { requested: u32, available: u32 },
    LeadTimeNotMet { start_time: Ms },
    CapacityBelowConfirmed { new_max: u32, confirmed: u32 },
    NotPending(ReservationStatus),
    AlreadyCancelled(Ulid),
    ConfirmedNotDeletable(Ulid),
    HasReservations(Ulid),
    Forbidden(&'static str),
    LockTimeout(Ulid),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ScheduleNotFound(_) | EngineError::ReservationNotFound(_) => {
                ErrorKind::NotFound
            }
            EngineError::InvalidSeats(_)
            | EngineError::InvalidWindow { .. }
            | EngineError::InvalidCapacity(_)
            | EngineError::StartInPast(_)
            | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::CapacityExceeded { .. }
            | EngineError::LeadTimeNotMet { .. }
            | EngineError::CapacityBelowConfirmed { .. } => ErrorKind::Capacity,
            EngineError::ScheduleExists(_)
            | EngineError::NotPending(_)
            | EngineError::AlreadyCancelled(_)
            | EngineError::ConfirmedNotDeletable(_)
            | EngineError::HasReservations(_) => ErrorKind::State,
            EngineError::Forbidden(_) => ErrorKind::Auth,
            EngineError::LockTimeout(_) => ErrorKind::Conflict,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }

    /// True only for lock-wait timeouts. Every other error is final:
    /// retrying the identical request cannot succeed until state changes.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ScheduleNotFound(id) => write!(f, "schedule not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::ScheduleExists(id) => write!(f, "schedule already exists: {id}"),
            EngineError::InvalidSeats(n) => write!(f, "invalid seat count: {n}"),
            EngineError::InvalidWindow { start, end } => {
                write!(f, "invalid schedule window: end {end} not after start {start}")
            }
            EngineError::InvalidCapacity(cap) => {
                write!(f, "invalid max capacity: {cap} (allowed 1..=50000)")
            }
            EngineError::StartInPast(t) => write!(f, "schedule start {t} is in the past"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::CapacityExceeded { requested, available } => {
                write!(f, "capacity exceeded: requested {requested}, available {available}")
            }
            EngineError::LeadTimeNotMet { start_time } => {
                write!(f, "booking closed: lead time not met for exam starting at {start_time}")
            }
            EngineError::CapacityBelowConfirmed { new_max, confirmed } => {
                write!(f, "max capacity {new_max} is below confirmed seats {confirmed}")
            }
            EngineError::NotPending(status) => {
                write!(f, "reservation is {status}, not pending")
            }
            EngineError::AlreadyCancelled(id) => {
                write!(f, "reservation already cancelled: {id}")
            }
            EngineError::ConfirmedNotDeletable(id) => {
                write!(f, "cannot delete confirmed reservation {id}: cancel it first")
            }
            EngineError::HasReservations(id) => {
                write!(f, "cannot delete schedule {id}: has reservations")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::LockTimeout(id) => {
                write!(f, "timed out waiting for schedule lock: {id}")
            }
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
