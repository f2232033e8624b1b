use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use proctor::engine::Engine;
use proctor::limits::BOOKING_LEAD_TIME_MS;
use proctor::model::{Actor, Ms};
use proctor::notify::NotifyHub;

const HOUR: Ms = 3_600_000; // 1 hour in ms

fn wal_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}_{}.wal", Ulid::new()))
}

fn new_engine(dir: &Path, name: &str) -> Arc<Engine> {
    let notify = Arc::new(NotifyHub::new());
    Arc::new(Engine::new(wal_path(dir, name), notify).expect("open engine"))
}

fn bookable_start() -> Ms {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms;
    now + BOOKING_LEAD_TIME_MS + 30 * 24 * HOUR
}

async fn make_schedule(engine: &Engine, max_capacity: u32) -> Ulid {
    let sid = Ulid::new();
    let start = bookable_start();
    engine
        .create_schedule(sid, start, start + 3 * HOUR, max_capacity, true, Actor::Admin)
        .await
        .expect("create schedule");
    sid
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential(dir: &Path) {
    let engine = new_engine(dir, "phase1");
    let sid = make_schedule(&engine, 50_000).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for _ in 0..n {
        let t = Instant::now();
        engine
            .create_reservation(sid, Ulid::new(), 1)
            .await
            .expect("create reservation");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(dir: &Path) {
    let engine = new_engine(dir, "phase2");

    let n_tasks = 10;
    let n_per_task = 200;

    // One schedule per task: contention stays on the shared WAL, not the
    // per-schedule locks.
    let mut schedules = Vec::new();
    for _ in 0..n_tasks {
        schedules.push(make_schedule(&engine, 50_000).await);
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for sid in schedules {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..n_per_task {
                eng.create_reservation(sid, Ulid::new(), 1)
                    .await
                    .expect("create reservation");
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(dir: &Path) {
    let engine = new_engine(dir, "phase3");
    let read_sid = make_schedule(&engine, 50_000).await;

    // Pre-fill so snapshots are non-trivial
    for _ in 0..200 {
        engine
            .create_reservation(read_sid, Ulid::new(), 1)
            .await
            .expect("prefill");
    }

    // Writers hammer their own schedules in the background
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let eng = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let sid = make_schedule(&eng, 50_000).await;
            while !stop.load(Ordering::Relaxed) {
                let _ = eng.create_reservation(sid, Ulid::new(), 1).await;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let eng = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                eng.get_schedule_info(read_sid).await.expect("schedule info");
                let _ = eng.available_schedules().await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("snapshot query", &mut all_latencies);
}

async fn phase4_confirm_storm(dir: &Path) {
    let engine = new_engine(dir, "phase4");

    // Everyone fights over one schedule: every confirm serializes on its
    // lock and re-checks capacity there.
    let sid = make_schedule(&engine, 10_000).await;

    let n_rows = 1_000;
    let seats_per_row: u32 = 15; // 1000 x 15 asks for 15000 of 10000 seats
    let mut row_ids = Vec::with_capacity(n_rows);
    for _ in 0..n_rows {
        let row = engine
            .create_reservation(sid, Ulid::new(), seats_per_row)
            .await
            .expect("create reservation");
        row_ids.push(row.id);
    }

    let confirmed = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for row_id in row_ids {
        let eng = engine.clone();
        let confirmed = confirmed.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            match eng.confirm_reservation(row_id, Actor::Admin).await {
                Ok(_) => confirmed.fetch_add(1, Ordering::Relaxed),
                Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = confirmed.load(Ordering::Relaxed);
    let no = rejected.load(Ordering::Relaxed);
    let info = engine.get_schedule_info(sid).await.expect("schedule info");
    let ops = n_rows as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_rows} competing confirms in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    println!(
        "  confirmed={ok}, rejected={no}, seats held={}/{}",
        info.confirmed_seats, info.max_capacity
    );
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("PROCTOR_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    proctor::observability::init(metrics_port);

    let dir = std::env::var("PROCTOR_BENCH_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("proctor_bench"));
    std::fs::create_dir_all(&dir).expect("create bench dir");

    println!("=== proctor stress benchmark ===");
    println!("data dir: {}\n", dir.display());

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&dir).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&dir).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&dir).await;

    println!("\n[phase 4] confirm storm on one schedule");
    phase4_confirm_storm(&dir).await;

    println!("\n=== benchmark complete ===");
}
