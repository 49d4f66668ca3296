use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("carebook")
        .user("carebook")
        .password("carebook");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

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
        latencies.last().map_or(0.0, |d| d.as_secs_f64() * 1000.0),
    );
}

/// The server keeps its roster between runs, so every run works on fresh ids
/// and dates.
struct Run {
    nanny_base: i64,
    first_day: NaiveDate,
}

impl Run {
    fn new() -> Self {
        let stamp = Ulid::new().timestamp_ms();
        let first_day = NaiveDate::from_ymd_opt(2030, 1, 1)
            .and_then(|d| d.checked_add_days(Days::new(stamp % 20_000)))
            .expect("date in range");
        Self {
            nanny_base: (stamp % 1_000_000) as i64 * 1000,
            first_day,
        }
    }

    fn day(&self, offset: u64) -> NaiveDate {
        self.first_day
            .checked_add_days(Days::new(offset))
            .expect("date in range")
    }
}

fn booking_sql(nanny: Option<i64>, date: NaiveDate, start: &str, end: &str) -> String {
    let nanny = nanny.map_or("NULL".to_string(), |n| n.to_string());
    format!(
        "INSERT INTO bookings (id, nanny_id, client_id, client_name, start_date, end_date, start_time, end_time) \
         VALUES ('{}', {nanny}, 1, 'bench', '{date}', NULL, '{start}', '{end}')",
        Ulid::new()
    )
}

async fn setup(client: &tokio_postgres::Client, run: &Run, n: i64) -> Vec<i64> {
    let mut ids = Vec::new();
    for i in 0..n {
        let id = run.nanny_base + i;
        client
            .batch_execute(&format!(
                "INSERT INTO nannies (id, name) VALUES ({id}, 'bench {i}')"
            ))
            .await
            .unwrap();
        ids.push(id);
    }
    println!("  registered {} nannies", ids.len());
    ids
}

async fn phase1_sequential(host: &str, port: u16, run: &Run, nanny: i64) {
    let client = connect(host, port).await;

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        client
            .batch_execute(&booking_sql(Some(nanny), run.day(i as u64), "9h00", "12h00"))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} manual bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Every task asks for the same slots. Each slot must end up with at most
/// one booking per nanny.
async fn phase2_contention(host: &str, port: u16, run: &Run, roster: usize) {
    let n_tasks = 20;
    let n_slots = 50u64;
    let day_offset = 5000;

    let start = Instant::now();
    let assigned = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let assigned = assigned.clone();
        let days: Vec<_> = (0..n_slots).map(|s| run.day(day_offset + s)).collect();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(days.len());
            for date in days {
                let t = Instant::now();
                if client
                    .simple_query(&booking_sql(None, date, "14h00", "18h00"))
                    .await
                    .is_ok()
                {
                    assigned.fetch_add(1, Ordering::Relaxed);
                }
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    let ok = assigned.load(Ordering::Relaxed);
    let expected = roster * n_slots as usize;
    println!(
        "  {n_tasks} tasks x {n_slots} slots: {ok} assigned (capacity {expected}) in {:.2}s",
        elapsed.as_secs_f64()
    );
    if ok > expected {
        println!("  !! DOUBLE BOOKING: {} more than capacity", ok - expected);
    }
    print_latency("automatic assignment", &mut all_latencies);
}

async fn phase3_read_under_load(host: &str, port: u16, run: &Run, nannies: &[i64]) {
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for (w, &nanny) in nannies.iter().enumerate().take(4) {
        let host = host.to_string();
        let stop = stop.clone();
        let base = 10_000 + w as u64 * 2000;
        let days: Vec<_> = (0..2000).map(|i| run.day(base + i)).collect();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for date in days {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let _ = client
                    .batch_execute(&booking_sql(Some(nanny), date, "8h00", "11h00"))
                    .await;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 300;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let date = run.day(r);
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                let messages = client
                    .simple_query(&format!(
                        "SELECT * FROM eligible_nannies WHERE start_date = '{date}' AND start_time = '13h00' AND end_time = '17h00'"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
                let _rows = messages
                    .iter()
                    .filter(|m| matches!(m, SimpleQueryMessage::Row(_)))
                    .count();
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

    print_latency("eligible_nannies query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for _ in 0..ops_per_conn {
                client.simple_query("SELECT * FROM nannies").await.unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} reads each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("CAREBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CAREBOOK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid CAREBOOK_PORT");

    println!("=== carebook stress benchmark ===");
    println!("target: {host}:{port}\n");

    let run = Run::new();

    println!("[setup]");
    let setup_client = connect(&host, port).await;
    let nannies = setup(&setup_client, &run, 8).await;
    drop(setup_client);

    println!("\n[phase 1] sequential manual bookings");
    phase1_sequential(&host, port, &run, nannies[0]).await;

    println!("\n[phase 2] contended automatic assignment");
    phase2_contention(&host, port, &run, nannies.len()).await;

    println!("\n[phase 3] eligibility reads under write load");
    phase3_read_under_load(&host, port, &run, &nannies).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
