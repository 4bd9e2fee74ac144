use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use slotbook::engine::{Engine, EngineError};
use slotbook::model::{Branch, BookingRequest, TimeSlot};
use slotbook::notify::NotifyHub;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn bench_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
}

/// One branch with `count` slots of `capacity`, five minutes apart from 06:00.
async fn setup(engine: &Engine, count: u32, capacity: u32) -> (Ulid, Vec<TimeSlot>) {
    let branch = engine
        .create_branch(Branch {
            id: Ulid::new(),
            name: format!("Bench Branch {}", Ulid::new()),
            address: "1 Bench Rd".into(),
            phone: None,
            email: None,
            operating_hours: None,
        })
        .await
        .unwrap();
    let mut slots = Vec::new();
    for i in 0..count {
        let start = NaiveTime::from_hms_opt(6, 0, 0).unwrap() + chrono::Duration::minutes(5 * i as i64);
        let end = start + chrono::Duration::minutes(5);
        let slot = TimeSlot::new(Ulid::new(), branch.id, bench_date(), start, end, capacity);
        slots.push(engine.create_slot(slot).await.unwrap());
    }
    (branch.id, slots)
}

fn request(slot: &TimeSlot, n: usize) -> BookingRequest {
    BookingRequest {
        customer_name: format!("Customer {n}"),
        customer_email: format!("c{n}@bench.test"),
        customer_phone: None,
        branch_id: slot.branch_id,
        date: slot.date,
        start_time: slot.start,
    }
}

async fn phase1_sequential(engine: &Engine) {
    let (_, slots) = setup(engine, 100, 20).await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine.book_appointment(request(&slots[i % slots.len()], i)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("book latency", &mut latencies);
}

async fn phase2_contended(engine: Arc<Engine>) {
    let capacity = 25;
    let (_, slots) = setup(&engine, 1, capacity).await;
    let slot = slots[0].clone();
    let n = 1000;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n {
        let engine = engine.clone();
        let req = request(&slot, i);
        handles.push(tokio::spawn(async move { engine.book_appointment(req).await }));
    }
    let mut ok = 0;
    let mut full = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::SlotNotAvailable(_)) => full += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let elapsed = start.elapsed();
    println!(
        "  {n} racing bookings on one slot (capacity {capacity}): {ok} ok, {full} full in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(ok, capacity, "capacity violated");
}

async fn phase3_spread(engine: Arc<Engine>) {
    let (_, slots) = setup(&engine, 200, 10).await;
    let n_tasks = 20;
    let n_per_task = 100;

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let engine = engine.clone();
        let slots = slots.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                let n = t * n_per_task + j;
                let _ = engine.book_appointment(request(&slots[n % slots.len()], n)).await;
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
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase4_read_under_load(engine: Arc<Engine>) {
    let (branch_id, slots) = setup(&engine, 100, 50).await;

    let stop = Arc::new(AtomicBool::new(false));
    let written = Arc::new(AtomicUsize::new(0));
    let mut writers = Vec::new();
    for w in 0..5 {
        let engine = engine.clone();
        let slots = slots.clone();
        let stop = stop.clone();
        let written = written.clone();
        writers.push(tokio::spawn(async move {
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                let n = w * 1_000_000 + i;
                if engine.book_appointment(request(&slots[i % slots.len()], n)).await.is_ok() {
                    written.fetch_add(1, Ordering::Relaxed);
                }
                i += 1;
            }
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..10 {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(500);
            for _ in 0..500 {
                let t = Instant::now();
                engine.available_slots(branch_id, bench_date()).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }

    println!("  {} bookings written during reads", written.load(Ordering::Relaxed));
    print_latency("available_slots query", &mut all);
}

#[tokio::main]
async fn main() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(Engine::new(dir.path().join("bench.wal"), Arc::new(NotifyHub::new())).unwrap());

    println!("=== slotbook stress benchmark ===");
    println!("wal: {}\n", dir.path().display());

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&engine).await;

    println!("\n[phase 2] contended single slot");
    phase2_contended(engine.clone()).await;

    println!("\n[phase 3] concurrent bookings across slots");
    phase3_spread(engine.clone()).await;

    println!("\n[phase 4] availability reads under write load");
    phase4_read_under_load(engine.clone()).await;

    println!("\n[compaction]");
    let start = Instant::now();
    engine.compact_wal().await.unwrap();
    println!("  compacted in {:.2}s", start.elapsed().as_secs_f64());

    println!("\n=== benchmark complete ===");
}
