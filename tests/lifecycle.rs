use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_test::assert_ok;
use ulid::Ulid;

use proctor::compactor::run_compactor;
use proctor::engine::{Engine, EngineError};
use proctor::limits::BOOKING_LEAD_TIME_MS;
use proctor::model::{Actor, Event, Ms, ReservationStatus};
use proctor::notify::NotifyHub;

// ── Test infrastructure ──────────────────────────────────────

const H: Ms = 3_600_000; // 1 hour in ms

fn test_wal(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("proctor_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

fn bookable_start() -> Ms {
    now_ms() + BOOKING_LEAD_TIME_MS + 7 * 86_400_000
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn full_booking_lifecycle() {
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(test_wal("lifecycle.wal"), notify).unwrap();

    // Staff publish an exam sitting
    let sid = Ulid::new();
    let start = bookable_start();
    assert_ok!(
        engine
            .create_schedule(sid, start, start + 3 * H, 200, true, Actor::Admin)
            .await
    );

    // A customer finds it in the open listing
    let open = engine.available_schedules().await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].available_capacity, 200);

    // They book five seats, then realize they need six
    let customer = Ulid::new();
    let row = assert_ok!(engine.create_reservation(sid, customer, 5).await);
    let row = assert_ok!(engine.update_seats(row.id, 6, Actor::Customer(customer)).await);
    assert_eq!(row.seats, 6);

    // A pending booking holds nothing
    let info = engine.get_schedule_info(sid).await.unwrap();
    assert_eq!(info.available_capacity, 200);

    // Payment clears, staff confirm, seats are held
    let row = assert_ok!(engine.confirm_reservation(row.id, Actor::Admin).await);
    assert_eq!(row.status, ReservationStatus::Confirmed);
    let info = engine.get_schedule_info(sid).await.unwrap();
    assert_eq!(info.confirmed_seats, 6);
    assert_eq!(info.available_capacity, 194);

    // Plans change; the customer cancels and the seats come back
    assert_ok!(
        engine
            .cancel_reservation(row.id, Actor::Customer(customer))
            .await
    );
    let info = engine.get_schedule_info(sid).await.unwrap();
    assert_eq!(info.available_capacity, 200);

    // Staff clear the dead row out and retire the schedule
    assert_ok!(engine.delete_reservation(row.id, Actor::Admin).await);
    assert_ok!(engine.delete_schedule(sid, Actor::Admin).await);
    assert!(engine.list_schedules().await.is_empty());
}

#[tokio::test]
async fn subscriptions_are_per_schedule() {
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(test_wal("per_schedule.wal"), notify.clone()).unwrap();

    let start = bookable_start();
    let exam_a = Ulid::new();
    let exam_b = Ulid::new();
    engine
        .create_schedule(exam_a, start, start + H, 50, true, Actor::Admin)
        .await
        .unwrap();
    engine
        .create_schedule(exam_b, start, start + H, 50, true, Actor::Admin)
        .await
        .unwrap();

    let mut rx_a = notify.subscribe(exam_a);
    let mut rx_b = notify.subscribe(exam_b);

    let customer = Ulid::new();
    let row = engine.create_reservation(exam_a, customer, 2).await.unwrap();
    engine.confirm_reservation(row.id, Actor::Admin).await.unwrap();

    assert!(matches!(
        rx_a.recv().await.unwrap(),
        Event::ReservationCreated { id, .. } if id == row.id
    ));
    assert!(matches!(
        rx_a.recv().await.unwrap(),
        Event::ReservationConfirmed { id, .. } if id == row.id
    ));

    // The other exam's feed stays silent
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn service_resumes_after_restart() {
    let path = test_wal("resume.wal");
    let notify = Arc::new(NotifyHub::new());

    let sid = Ulid::new();
    let customer = Ulid::new();
    let pending_id;
    {
        let engine = Engine::new(path.clone(), notify.clone()).unwrap();
        let start = bookable_start();
        engine
            .create_schedule(sid, start, start + 2 * H, 50, true, Actor::Admin)
            .await
            .unwrap();

        let sold = engine.create_reservation(sid, customer, 20).await.unwrap();
        engine.confirm_reservation(sold.id, Actor::Admin).await.unwrap();

        let pending = engine.create_reservation(sid, customer, 10).await.unwrap();
        pending_id = pending.id;
    }

    // The half-finished booking survives the restart and completes
    let engine = Engine::new(path, notify).unwrap();
    let row = engine.confirm_reservation(pending_id, Actor::Admin).await.unwrap();
    assert_eq!(row.status, ReservationStatus::Confirmed);

    let info = engine.get_schedule_info(sid).await.unwrap();
    assert_eq!(info.confirmed_seats, 30);
    assert_eq!(info.available_capacity, 20);
}

#[tokio::test]
async fn background_compaction_is_invisible_to_callers() {
    let path = test_wal("compact.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());

    let sid = Ulid::new();
    let start = bookable_start();
    engine
        .create_schedule(sid, start, start + 2 * H, 100, true, Actor::Admin)
        .await
        .unwrap();
    let customer = Ulid::new();
    for seats in [5, 3, 8] {
        let row = engine.create_reservation(sid, customer, seats).await.unwrap();
        engine.confirm_reservation(row.id, Actor::Admin).await.unwrap();
    }
    assert!(engine.wal_appends_since_compact().await >= 5);

    // The first interval tick fires immediately and takes the snapshot
    tokio::spawn(run_compactor(engine.clone(), 5));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    // Bookings continue against the rewritten log
    let row = engine.create_reservation(sid, Ulid::new(), 4).await.unwrap();
    engine.confirm_reservation(row.id, Actor::Admin).await.unwrap();

    // A restart sees both the snapshot and the appends after it
    let engine2 = Engine::new(path, notify).unwrap();
    let info = engine2.get_schedule_info(sid).await.unwrap();
    assert_eq!(info.confirmed_seats, 20);
    assert_eq!(engine2.list_reservations(Actor::Admin).await.len(), 4);
}

#[tokio::test]
async fn seats_are_never_oversold_under_competition() {
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(test_wal("competition.wal"), notify).unwrap());

    let sid = Ulid::new();
    let start = bookable_start();
    engine
        .create_schedule(sid, start, start + 3 * H, 100, true, Actor::Admin)
        .await
        .unwrap();

    // Ten groups of fifteen all want in. Everyone may ask; the seats only
    // move at confirmation.
    let mut row_ids = Vec::new();
    for _ in 0..10 {
        let row = engine.create_reservation(sid, Ulid::new(), 15).await.unwrap();
        row_ids.push(row.id);
    }

    let mut handles = Vec::new();
    for row_id in row_ids {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.confirm_reservation(row_id, Actor::Admin).await
        }));
    }

    let mut confirmed = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => confirmed += 1,
            Err(e) => {
                assert!(matches!(e, EngineError::CapacityExceeded { .. }));
                assert!(!e.is_retryable());
            }
        }
    }

    // 6 * 15 = 90 fits; a seventh group would need 105.
    assert_eq!(confirmed, 6);
    let info = engine.get_schedule_info(sid).await.unwrap();
    assert_eq!(info.confirmed_seats, 90);
    assert_eq!(info.available_capacity, 10);
}
