use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::capacity::{check_reservable, now_ms, validate_capacity, validate_window};
use super::policy;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_schedule(
        &self,
        id: Ulid,
        start_time: Ms,
        end_time: Ms,
        max_capacity: u32,
        is_available: bool,
        actor: Actor,
    ) -> Result<ScheduleInfo, EngineError> {
        policy::authorize_schedule_admin(&actor)?;
        validate_window(start_time, end_time)?;
        validate_capacity(max_capacity)?;
        if start_time <= now_ms() {
            return Err(EngineError::StartInPast(start_time));
        }
        // No per-schedule lock exists yet; the admission lock makes the
        // occupancy check and the insert one critical section, and keeps
        // creation from interleaving with a compaction snapshot.
        let _admission = self.create_lock.lock().await;
        if self.state.len() >= MAX_SCHEDULES {
            return Err(EngineError::LimitExceeded("too many schedules"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::ScheduleExists(id));
        }

        let event = Event::ScheduleCreated { id, start_time, end_time, max_capacity, is_available };
        self.wal_append(&event).await?;
        let s = ScheduleState::new(id, start_time, end_time, max_capacity, is_available);
        let info = ScheduleInfo::from_state(&s);
        self.state.insert(id, Arc::new(RwLock::new(s)));
        metrics::gauge!(crate::observability::SCHEDULES_ACTIVE).set(self.state.len() as f64);
        metrics::counter!(
            crate::observability::EVENTS_TOTAL,
            "event" => crate::observability::event_label(&event)
        )
        .increment(1);
        self.notify.send(id, &event);
        Ok(info)
    }

    /// Admin edit of schedule fields. The capacity invariant survives edits:
    /// `max_capacity` may not drop below the seats already confirmed.
    pub async fn update_schedule(
        &self,
        id: Ulid,
        start_time: Ms,
        end_time: Ms,
        max_capacity: u32,
        is_available: bool,
        actor: Actor,
    ) -> Result<ScheduleInfo, EngineError> {
        policy::authorize_schedule_admin(&actor)?;
        validate_window(start_time, end_time)?;
        validate_capacity(max_capacity)?;

        let mut guard = self.lock_schedule(id).await?;
        if start_time != guard.start_time && start_time <= now_ms() {
            return Err(EngineError::StartInPast(start_time));
        }
        if max_capacity < guard.confirmed_seats {
            return Err(EngineError::CapacityBelowConfirmed {
                new_max: max_capacity,
                confirmed: guard.confirmed_seats,
            });
        }

        let event = Event::ScheduleUpdated { id, start_time, end_time, max_capacity, is_available };
        self.persist_and_apply(id, &mut guard, &event).await?;
        Ok(ScheduleInfo::from_state(&guard))
    }

    /// Schedules are deletable only once nothing references them; reservations
    /// must be deleted first.
    pub async fn delete_schedule(&self, id: Ulid, actor: Actor) -> Result<(), EngineError> {
        policy::authorize_schedule_admin(&actor)?;
        let guard = self.lock_schedule(id).await?;
        if !guard.reservations.is_empty() {
            return Err(EngineError::HasReservations(id));
        }

        let event = Event::ScheduleDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        metrics::gauge!(crate::observability::SCHEDULES_ACTIVE).set(self.state.len() as f64);
        metrics::counter!(
            crate::observability::EVENTS_TOTAL,
            "event" => crate::observability::event_label(&event)
        )
        .increment(1);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        drop(guard);
        Ok(())
    }

    /// Create a pending reservation. The capacity check here is advisory:
    /// it runs under the schedule lock against the authoritative counter,
    /// but pending rows consume nothing, so concurrent creates may all pass.
    /// Only confirmation moves seats from requested to held.
    pub async fn create_reservation(
        &self,
        schedule_id: Ulid,
        customer_id: Ulid,
        seats: u32,
    ) -> Result<Reservation, EngineError> {
        if seats == 0 {
            return Err(EngineError::InvalidSeats(seats));
        }

        let mut guard = self.lock_schedule(schedule_id).await?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_SCHEDULE {
            return Err(EngineError::LimitExceeded("too many reservations on schedule"));
        }
        let now = now_ms();
        check_reservable(&guard, seats, now)?;

        let row = Reservation {
            id: Ulid::new(),
            customer_id,
            seats,
            status: ReservationStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let event = Event::ReservationCreated {
            id: row.id,
            schedule_id,
            customer_id,
            seats,
            status: ReservationStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(schedule_id, &mut guard, &event).await?;
        Ok(row)
    }

    /// Change the seat count of a pending reservation. The new quantity must
    /// fit on its own: pending rows hold nothing, so the whole amount is
    /// re-checked, not a difference from the old one.
    pub async fn update_seats(
        &self,
        reservation_id: Ulid,
        seats: u32,
        actor: Actor,
    ) -> Result<Reservation, EngineError> {
        if seats == 0 {
            return Err(EngineError::InvalidSeats(seats));
        }

        let (schedule_id, mut guard) = self.resolve_reservation_write(reservation_id, &actor).await?;
        let row = guard
            .reservation(reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        policy::authorize_update(&actor, row)?;
        policy::check_pending(row)?;
        if row.seats == seats {
            // Nothing changes, nothing is logged.
            return Ok(row.clone());
        }
        let now = now_ms();
        check_reservable(&guard, seats, now)?;

        let event = Event::SeatsChanged { id: reservation_id, schedule_id, seats, at: now };
        self.persist_and_apply(schedule_id, &mut guard, &event).await?;
        let row = guard
            .reservation(reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        Ok(row.clone())
    }

    /// Confirm a pending reservation, consuming its seats. This is the
    /// authoritative capacity check: the precondition is evaluated against
    /// values re-read under the exclusive schedule lock, and the status
    /// change and counter change commit as one unit. Precondition failures
    /// are final business errors, never lock conflicts.
    pub async fn confirm_reservation(
        &self,
        reservation_id: Ulid,
        actor: Actor,
    ) -> Result<Reservation, EngineError> {
        let (schedule_id, mut guard) = self.resolve_reservation_write(reservation_id, &actor).await?;
        policy::authorize_confirm(&actor)?;
        let row = guard
            .reservation(reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        policy::check_pending(row)?;
        let seats = row.seats;
        let now = now_ms();
        check_reservable(&guard, seats, now)?;

        let event = Event::ReservationConfirmed { id: reservation_id, schedule_id, at: now };
        self.persist_and_apply(schedule_id, &mut guard, &event).await?;
        let row = guard
            .reservation(reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        Ok(row.clone())
    }

    /// Cancel a reservation. Seats are released iff the row was confirmed at
    /// commit time, decided under the same lock that serializes confirms, so
    /// a cancel can never release seats it did not hold. Cancelling twice is
    /// a reported error.
    pub async fn cancel_reservation(
        &self,
        reservation_id: Ulid,
        actor: Actor,
    ) -> Result<Reservation, EngineError> {
        let (schedule_id, mut guard) = self.resolve_reservation_write(reservation_id, &actor).await?;
        let row = guard
            .reservation(reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        policy::authorize_cancel(&actor, row)?;
        policy::check_cancellable(row)?;

        let event = Event::ReservationCancelled {
            id: reservation_id,
            schedule_id,
            at: now_ms(),
        };
        self.persist_and_apply(schedule_id, &mut guard, &event).await?;
        let row = guard
            .reservation(reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        Ok(row.clone())
    }

    /// Remove a pending or cancelled row. Confirmed rows are refused for
    /// every actor: cancelling is the only exit that releases seats, and
    /// deletion never touches the counter.
    pub async fn delete_reservation(
        &self,
        reservation_id: Ulid,
        actor: Actor,
    ) -> Result<(), EngineError> {
        let (schedule_id, mut guard) = self.resolve_reservation_write(reservation_id, &actor).await?;
        let row = guard
            .reservation(reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        policy::authorize_delete(&actor, row)?;
        policy::check_deletable(row)?;

        let event = Event::ReservationDeleted { id: reservation_id, schedule_id };
        self.persist_and_apply(schedule_id, &mut guard, &event).await
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: one create per schedule, one create per
    /// reservation row carrying its current status.
    ///
    /// The snapshot holds every schedule write lock, in id order, plus the
    /// admission lock, and releases them only once the rewrite is queued at
    /// the writer. An append is therefore either captured by the snapshot or
    /// ordered after the rewrite; nothing falls between and gets erased.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let admission = self.create_lock.lock().await;
        let mut schedule_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        schedule_ids.sort();

        let mut guards = Vec::with_capacity(schedule_ids.len());
        for id in schedule_ids {
            match self.lock_schedule(id).await {
                Ok(guard) => guards.push(guard),
                // Deleted after the id scan; the snapshot omits it.
                Err(EngineError::ScheduleNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::ScheduleCreated {
                id: guard.id,
                start_time: guard.start_time,
                end_time: guard.end_time,
                max_capacity: guard.max_capacity,
                is_available: guard.is_available,
            });
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    schedule_id: guard.id,
                    customer_id: r.customer_id,
                    seats: r.seats,
                    status: r.status,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        // With the rewrite queued, later appends are ordered behind it; the
        // locks can be released before the response.
        drop(guards);
        drop(admission);
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
