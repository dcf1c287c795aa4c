//! Load test against a running server. Start it with `PARKSPOT_ADMIN_ID` set
//! and run this with the same value so spots can be activated.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms
const PASSWORD_VAR: &str = "PARKSPOT_PASSWORD";

#[derive(Clone)]
struct Target {
    host: String,
    port: u16,
    password: String,
    admin: Ulid,
}

async fn connect_as(target: &Target, user: Ulid) -> Client {
    let mut config = Config::new();
    config
        .host(&target.host)
        .port(target.port)
        .dbname("parkspot")
        .user(user.to_string())
        .password(&target.password);

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

async fn signup(target: &Target, role: &str) -> (Ulid, Client) {
    let id = Ulid::new();
    let client = connect_as(target, id).await;
    client
        .batch_execute(&format!("INSERT INTO users (id, role) VALUES ('{id}', '{role}')"))
        .await
        .unwrap();
    (id, client)
}

/// Start of the next whole day, so every declared window is in the future.
fn base_time() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    (now / (24 * HOUR) + 1) * 24 * HOUR
}

/// A fresh homeowner with one active spot open for `hours` hours from `base`.
async fn open_spot(target: &Target, base: i64, hours: i64) -> Ulid {
    let (_, owner) = signup(target, "homeowner").await;
    let spot = Ulid::new();
    owner
        .batch_execute(&format!(
            "INSERT INTO spots (id, hourly_price, latitude, longitude, vehicle_capacity) VALUES ('{spot}', 400, 48.85, 2.35, 1)"
        ))
        .await
        .unwrap();
    let admin = connect_as(target, target.admin).await;
    admin
        .batch_execute(&format!(
            "INSERT INTO spot_changes (spot_id, status, is_available, hourly_price) VALUES ('{spot}', 'active', NULL, NULL)"
        ))
        .await
        .unwrap();
    owner
        .batch_execute(&format!(
            r#"INSERT INTO availability (id, spot_id, start, "end") VALUES ('{}', '{spot}', {base}, {})"#,
            Ulid::new(),
            base + hours * HOUR
        ))
        .await
        .unwrap();
    spot
}

async fn book(client: &Client, spot: Ulid, start: i64) -> Result<(), tokio_postgres::Error> {
    client
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, spot_id, start, "end", total_price) VALUES ('{}', '{spot}', {start}, {}, 400)"#,
            Ulid::new(),
            start + HOUR
        ))
        .await
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential(target: &Target, base: i64) {
    let n = 2000;
    let spot = open_spot(target, base, n).await;
    let (_, driver) = signup(target, "driver").await;

    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        book(&driver, spot, base + i * HOUR).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many drivers race for the same hour, hour after hour. Exactly one may win
/// each round.
async fn phase2_contention(target: &Target, base: i64) {
    let n_drivers = 50;
    let rounds = 20;
    let spot = open_spot(target, base, rounds).await;

    let mut drivers = Vec::with_capacity(n_drivers);
    for _ in 0..n_drivers {
        drivers.push(Arc::new(signup(target, "driver").await.1));
    }

    let start = Instant::now();
    let mut overbooked = 0;
    let mut rejected = 0;
    for round in 0..rounds {
        let slot_start = base + round * HOUR;
        let wins = Arc::new(AtomicUsize::new(0));
        let losses = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for client in &drivers {
            let client = client.clone();
            let wins = wins.clone();
            let losses = losses.clone();
            handles.push(tokio::spawn(async move {
                match book(&client, spot, slot_start).await {
                    Ok(()) => wins.fetch_add(1, Ordering::Relaxed),
                    Err(e) if e.code() == Some(&SqlState::EXCLUSION_VIOLATION) => {
                        losses.fetch_add(1, Ordering::Relaxed)
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let won = wins.load(Ordering::Relaxed);
        if won != 1 {
            overbooked += 1;
            eprintln!("  round {round}: {won} winners");
        }
        rejected += losses.load(Ordering::Relaxed);
    }

    let elapsed = start.elapsed();
    println!(
        "  {rounds} rounds x {n_drivers} drivers in {:.2}s: {rejected} refused, {overbooked} bad rounds",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(target: &Target, base: i64) {
    let hours = 500;
    let read_spot = open_spot(target, base, hours).await;
    let (_, filler) = signup(target, "driver").await;
    // Every other hour booked, so the open windows are fragmented.
    for i in (0..hours).step_by(2) {
        book(&filler, read_spot, base + i * HOUR).await.unwrap();
    }

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let target = target.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let spot = open_spot(&target, base, 5_000).await;
            let (_, client) = signup(&target, "driver").await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) && i < 5_000 {
                let _ = book(&client, spot, base + i * HOUR).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let target = target.clone();
        reader_handles.push(tokio::spawn(async move {
            let (_, client) = signup(&target, "driver").await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        r#"SELECT * FROM open_windows WHERE spot_id = '{read_spot}' AND start >= {base} AND "end" <= {}"#,
                        base + hours * HOUR
                    ))
                    .await
                    .unwrap();
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

    print_latency("open_windows query", &mut all_latencies);
}

async fn phase4_connection_storm(target: &Target, base: i64) {
    let n_conns = 50;
    let ops_per_conn = 10;
    let spot = open_spot(target, base, n_conns * ops_per_conn).await;

    let start = Instant::now();
    let success = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for c in 0..n_conns {
        let target = target.clone();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let (_, client) = signup(&target, "driver").await;
            for i in 0..ops_per_conn {
                book(&client, spot, base + (c * ops_per_conn + i) * HOUR).await.unwrap();
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
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("PARKSPOT_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("PARKSPOT_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid PARKSPOT_PORT");
    let password = std::env::var(PASSWORD_VAR).unwrap_or_else(|_| "parkspot".into());
    let admin = std::env::var("PARKSPOT_ADMIN_ID")
        .ok()
        .and_then(|v| Ulid::from_string(&v).ok())
        .expect("PARKSPOT_ADMIN_ID must name the server's bootstrap admin");
    let target = Target { host, port, password, admin };
    let base = base_time();

    println!("=== parkspot stress benchmark ===");
    println!("target: {}:{}\n", target.host, target.port);

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&target, base).await;

    println!("\n[phase 2] contended bookings on one spot");
    phase2_contention(&target, base).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&target, base).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&target, base).await;

    println!("\n=== benchmark complete ===");
}
