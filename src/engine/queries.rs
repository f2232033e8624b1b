use ulid::Ulid;

use crate::model::*;

use super::capacity::{booking_open, now_ms};
use super::{Engine, EngineError, SharedScheduleState};

// Read paths take the schedule lock in shared mode. They produce
// eventually-consistent snapshots for display and are never used to gate a
// transition; every precondition is re-evaluated under the write lock.

impl Engine {
    /// Snapshot of one schedule, including derived available capacity.
    pub async fn get_schedule_info(&self, id: Ulid) -> Result<ScheduleInfo, EngineError> {
        let shared = self
            .get_schedule(&id)
            .ok_or(EngineError::ScheduleNotFound(id))?;
        let guard = shared.read().await;
        Ok(ScheduleInfo::from_state(&guard))
    }

    /// All schedules, id-ordered.
    pub async fn list_schedules(&self) -> Vec<ScheduleInfo> {
        let handles: Vec<SharedScheduleState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for shared in handles {
            let guard = shared.read().await;
            out.push(ScheduleInfo::from_state(&guard));
        }
        out.sort_by_key(|s| s.id);
        out
    }

    /// Schedules currently open for booking: administratively available and
    /// still ahead of the booking lead time. This listing is the only place
    /// `is_available` is consulted.
    pub async fn available_schedules(&self) -> Vec<ScheduleInfo> {
        let now = now_ms();
        let handles: Vec<SharedScheduleState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for shared in handles {
            let guard = shared.read().await;
            if guard.is_available && booking_open(guard.start_time, now) {
                out.push(ScheduleInfo::from_state(&guard));
            }
        }
        out.sort_by_key(|s| s.id);
        out
    }

    /// One reservation. Scoped: a customer resolves only their own rows,
    /// and a foreign id reads as not-found.
    pub async fn get_reservation(
        &self,
        id: Ulid,
        actor: Actor,
    ) -> Result<ReservationInfo, EngineError> {
        let schedule_id = self
            .schedule_for_reservation(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let shared = self
            .get_schedule(&schedule_id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let guard = shared.read().await;
        let row = guard
            .reservation(id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        if !actor.is_admin() && !actor.owns(row) {
            return Err(EngineError::ReservationNotFound(id));
        }
        Ok(ReservationInfo::from_row(schedule_id, row))
    }

    /// Reservations visible to the actor: everything for an admin, own rows
    /// for a customer. Id-ordered.
    pub async fn list_reservations(&self, actor: Actor) -> Vec<ReservationInfo> {
        let handles: Vec<(Ulid, SharedScheduleState)> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let mut out = Vec::new();
        for (schedule_id, shared) in handles {
            let guard = shared.read().await;
            for r in &guard.reservations {
                if actor.is_admin() || actor.owns(r) {
                    out.push(ReservationInfo::from_row(schedule_id, r));
                }
            }
        }
        out.sort_by_key(|r| r.id);
        out
    }
}
