mod capacity;
mod error;
mod mutations;
mod policy;
mod queries;

pub use error::{EngineError, ErrorKind};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::limits::DEFAULT_LOCK_WAIT;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedScheduleState = Arc<RwLock<ScheduleState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation engine: one lock-guarded state per schedule, a WAL for
/// durability, and a broadcast hub for committed events.
pub struct Engine {
    pub state: DashMap<Ulid, SharedScheduleState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → owning schedule id.
    pub(super) reservation_to_schedule: DashMap<Ulid, Ulid>,
    /// Serializes schedule creation, which has no per-schedule lock to take,
    /// with other creates and with compaction snapshots.
    pub(super) create_lock: Mutex<()>,
    /// Bounded wait for a schedule's write lock; timing out is the one
    /// retryable failure.
    lock_wait: Duration,
}

/// Apply an event directly to a ScheduleState (no locking — caller holds the
/// write lock, or owns the state exclusively during replay).
///
/// This is the only code that touches `confirmed_seats`: plus `seats` on
/// Pending→Confirmed, minus `seats` on Confirmed→Cancelled, nothing else.
/// Replaying the WAL therefore reconstructs the counter exactly.
fn apply_to_schedule(s: &mut ScheduleState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ReservationCreated {
            id,
            schedule_id,
            customer_id,
            seats,
            status,
            created_at,
            updated_at,
        } => {
            s.reservations.push(Reservation {
                id: *id,
                customer_id: *customer_id,
                seats: *seats,
                status: *status,
                created_at: *created_at,
                updated_at: *updated_at,
            });
            if *status == ReservationStatus::Confirmed {
                s.confirmed_seats += *seats;
            }
            index.insert(*id, *schedule_id);
        }
        Event::SeatsChanged { id, seats, at, .. } => {
            if let Some(r) = s.reservation_mut(*id) {
                r.seats = *seats;
                r.updated_at = *at;
            }
        }
        Event::ReservationConfirmed { id, at, .. } => {
            if let Some(r) = s.reservation_mut(*id)
                && r.status == ReservationStatus::Pending {
                    r.status = ReservationStatus::Confirmed;
                    r.updated_at = *at;
                    let seats = r.seats;
                    s.confirmed_seats += seats;
                }
        }
        Event::ReservationCancelled { id, at, .. } => {
            if let Some(r) = s.reservation_mut(*id)
                && r.status != ReservationStatus::Cancelled {
                    let was_confirmed = r.status == ReservationStatus::Confirmed;
                    r.status = ReservationStatus::Cancelled;
                    r.updated_at = *at;
                    let seats = r.seats;
                    if was_confirmed {
                        debug_assert!(s.confirmed_seats >= seats);
                        s.confirmed_seats -= seats;
                    }
                }
        }
        Event::ReservationDeleted { id, .. } => {
            s.remove_reservation(*id);
            index.remove(id);
        }
        Event::ScheduleUpdated { start_time, end_time, max_capacity, is_available, .. } => {
            s.start_time = *start_time;
            s.end_time = *end_time;
            s.max_capacity = *max_capacity;
            s.is_available = *is_available;
        }
        // ScheduleCreated/Deleted are handled at the DashMap level, not here
        Event::ScheduleCreated { .. } | Event::ScheduleDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            reservation_to_schedule: DashMap::new(),
            create_lock: Mutex::new(()),
            lock_wait: DEFAULT_LOCK_WAIT,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::ScheduleCreated { id, start_time, end_time, max_capacity, is_available } => {
                    let s = ScheduleState::new(*id, *start_time, *end_time, *max_capacity, *is_available);
                    engine.state.insert(*id, Arc::new(RwLock::new(s)));
                }
                Event::ScheduleDeleted { id } => {
                    // Deletion requires an empty schedule, so there are no
                    // index entries left to clean up.
                    engine.state.remove(id);
                }
                other => {
                    if let Some(schedule_id) = event_schedule_id(other)
                        && let Some(entry) = engine.state.get(&schedule_id) {
                            let arc = entry.clone();
                            let mut guard = arc.try_write().expect("replay: uncontended write");
                            apply_to_schedule(&mut guard, other, &engine.reservation_to_schedule);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Override the bounded lock wait. Tests use tiny values to force the
    /// timeout path deterministically.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_schedule(&self, id: &Ulid) -> Option<SharedScheduleState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn schedule_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_schedule
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// Acquire the exclusive per-schedule lock, waiting at most `lock_wait`.
    /// A timeout surfaces as `LockTimeout`, the retryable conflict: the
    /// caller's unit of work has touched nothing and can be resubmitted.
    /// Acquiring behind a delete reports the schedule as gone.
    pub(super) async fn lock_schedule(
        &self,
        id: Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ScheduleState>, EngineError> {
        let shared = self
            .get_schedule(&id)
            .ok_or(EngineError::ScheduleNotFound(id))?;
        let wait_start = std::time::Instant::now();
        match tokio::time::timeout(self.lock_wait, shared.clone().write_owned()).await {
            Ok(guard) => {
                metrics::histogram!(crate::observability::LOCK_WAIT_SECONDS)
                    .record(wait_start.elapsed().as_secs_f64());
                // A delete drops the map entry while holding this lock, so a
                // waiter can win an arc that is no longer the live one. Writes
                // to it would be invisible to queries and lost on replay.
                let live = self
                    .state
                    .get(&id)
                    .is_some_and(|e| Arc::ptr_eq(e.value(), &shared));
                if !live {
                    return Err(EngineError::ScheduleNotFound(id));
                }
                Ok(guard)
            }
            Err(_) => {
                metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                Err(EngineError::LockTimeout(id))
            }
        }
    }

    /// WAL-append + apply + notify in one call, under the held lock. The
    /// append is fsync'd before apply, so nothing observable ever precedes
    /// durability.
    pub(super) async fn persist_and_apply(
        &self,
        schedule_id: Ulid,
        s: &mut ScheduleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_schedule(s, event, &self.reservation_to_schedule);
        metrics::counter!(
            crate::observability::EVENTS_TOTAL,
            "event" => crate::observability::event_label(event)
        )
        .increment(1);
        self.notify.send(schedule_id, event);
        Ok(())
    }

    /// Look up a reservation's schedule, lock it, and verify the row is still
    /// present and visible to the actor. Customers never learn whether a
    /// foreign reservation exists: scoping failures read as not-found.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: Ulid,
        actor: &Actor,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ScheduleState>), EngineError> {
        let schedule_id = self
            .schedule_for_reservation(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        let guard = match self.lock_schedule(schedule_id).await {
            Ok(guard) => guard,
            // The schedule can vanish between the index read and the lock
            // grant; its rows went with it.
            Err(EngineError::ScheduleNotFound(_)) => {
                return Err(EngineError::ReservationNotFound(reservation_id));
            }
            Err(e) => return Err(e),
        };
        let row = guard
            .reservation(reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        if !actor.is_admin() && !actor.owns(row) {
            return Err(EngineError::ReservationNotFound(reservation_id));
        }
        Ok((schedule_id, guard))
    }
}

/// Extract the schedule id from an event (for non-Create/Delete events).
fn event_schedule_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationCreated { schedule_id, .. }
        | Event::SeatsChanged { schedule_id, .. }
        | Event::ReservationConfirmed { schedule_id, .. }
        | Event::ReservationCancelled { schedule_id, .. }
        | Event::ReservationDeleted { schedule_id, .. } => Some(*schedule_id),
        Event::ScheduleUpdated { id, .. } => Some(*id),
        Event::ScheduleCreated { .. } | Event::ScheduleDeleted { .. } => None,
    }
}
