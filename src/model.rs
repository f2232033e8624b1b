use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Lifecycle state of a reservation.
///
/// `Pending` is the only creatable state. Seats are consumed on the
/// `Pending -> Confirmed` transition and released on `Confirmed -> Cancelled`;
/// no other transition touches the schedule counter. `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The capability a caller presents. Authorization is decided on this tag
/// alone; credential resolution happens outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// A customer. Sees and mutates only reservations they own.
    Customer(Ulid),
    /// Administrative capability: schedule management, confirmation,
    /// unrestricted visibility.
    Admin,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin)
    }

    /// True when this actor owns the given reservation.
    pub fn owns(&self, r: &Reservation) -> bool {
        matches!(self, Actor::Customer(id) if *id == r.customer_id)
    }
}

/// A seat reservation against one exam schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub customer_id: Ulid,
    /// Seats requested, always >= 1. Fixed once confirmed.
    pub seats: u32,
    pub status: ReservationStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// One exam schedule plus every reservation referencing it.
///
/// Reservations live inside the schedule state so that the schedule's single
/// writer lock covers the seat counter and every row that can change it.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    pub id: Ulid,
    pub start_time: Ms,
    pub end_time: Ms,
    /// Hard seat cap, 1..=50_000.
    pub max_capacity: u32,
    /// Seats held by confirmed reservations only. Pending and cancelled
    /// rows never contribute. `0 <= confirmed_seats <= max_capacity`.
    pub confirmed_seats: u32,
    /// Administrative override, independent of capacity. Gates the
    /// availability listing only.
    pub is_available: bool,
    /// All reservations on this schedule, in creation order.
    pub reservations: Vec<Reservation>,
}

impl ScheduleState {
    pub fn new(id: Ulid, start_time: Ms, end_time: Ms, max_capacity: u32, is_available: bool) -> Self {
        Self {
            id,
            start_time,
            end_time,
            max_capacity,
            confirmed_seats: 0,
            is_available,
            reservations: Vec::new(),
        }
    }

    /// Seats still open for confirmation.
    pub fn available_capacity(&self) -> u32 {
        self.max_capacity - self.confirmed_seats
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Remove a reservation row by id.
    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Recompute the confirmed-seat total from the rows. Audit helper:
    /// must always equal `confirmed_seats`.
    pub fn confirmed_seat_sum(&self) -> u32 {
        self.reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Confirmed)
            .map(|r| r.seats)
            .sum()
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ScheduleCreated {
        id: Ulid,
        start_time: Ms,
        end_time: Ms,
        max_capacity: u32,
        is_available: bool,
    },
    ScheduleUpdated {
        id: Ulid,
        start_time: Ms,
        end_time: Ms,
        max_capacity: u32,
        is_available: bool,
    },
    ScheduleDeleted {
        id: Ulid,
    },
    /// Carries the status and both timestamps so compaction can re-emit a
    /// live row as one event. The public create path always records
    /// `Pending`; apply bumps the counter when the status is `Confirmed`.
    ReservationCreated {
        id: Ulid,
        schedule_id: Ulid,
        customer_id: Ulid,
        seats: u32,
        status: ReservationStatus,
        created_at: Ms,
        updated_at: Ms,
    },
    SeatsChanged {
        id: Ulid,
        schedule_id: Ulid,
        seats: u32,
        at: Ms,
    },
    ReservationConfirmed {
        id: Ulid,
        schedule_id: Ulid,
        at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        schedule_id: Ulid,
        at: Ms,
    },
    ReservationDeleted {
        id: Ulid,
        schedule_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleInfo {
    pub id: Ulid,
    pub start_time: Ms,
    pub end_time: Ms,
    pub max_capacity: u32,
    pub confirmed_seats: u32,
    pub available_capacity: u32,
    pub is_available: bool,
}

impl ScheduleInfo {
    pub(crate) fn from_state(s: &ScheduleState) -> Self {
        Self {
            id: s.id,
            start_time: s.start_time,
            end_time: s.end_time,
            max_capacity: s.max_capacity,
            confirmed_seats: s.confirmed_seats,
            available_capacity: s.available_capacity(),
            is_available: s.is_available,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub schedule_id: Ulid,
    pub customer_id: Ulid,
    pub seats: u32,
    pub status: ReservationStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl ReservationInfo {
    pub(crate) fn from_row(schedule_id: Ulid, r: &Reservation) -> Self {
        Self {
            id: r.id,
            schedule_id,
            customer_id: r.customer_id,
            seats: r.seats,
            status: r.status,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}
