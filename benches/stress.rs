use std::time::{Duration, Instant};

use chrono::{Duration as Days, NaiveDate};
use tokio_postgres::{Client, Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16, db: &str) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(db)
        .user("innkeep")
        .password("innkeep");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_db() -> String {
    format!("bench_{}", Ulid::new())
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

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).expect("valid date") + Days::days(offset)
}

/// Hotel plus one room in the client's tenant; returns the room id.
async fn setup_room(client: &Client) -> Ulid {
    let hotel = Ulid::new();
    let room = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO hotels (id, name, rating) VALUES ('{hotel}', 'Bench Hotel', 3)"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, hotel_id, number, capacity, price) VALUES ('{room}', '{hotel}', '1', 2, 1000)"
        ))
        .await
        .unwrap();
    room
}

fn booking_sql(room: Ulid, check_in: NaiveDate, nights: i64) -> String {
    let check_out = check_in + Days::days(nights);
    format!(
        "INSERT INTO bookings (id, room_id, check_in, check_out) VALUES ('{}', '{room}', '{check_in}', '{check_out}')",
        Ulid::new()
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_db()).await;
    let room = setup_room(&client).await;

    // Back-to-back two-night stays; each one passes the conflict check.
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        client
            .batch_execute(&booking_sql(room, day(i as i64 * 2), 2))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_contention(host: &str, port: u16) {
    // Many clients race for the same nights of one room.
    let db = fresh_db();
    let setup = connect(host, port, &db).await;
    let room = setup_room(&setup).await;

    let n_tasks = 20;
    let n_rounds = 100;
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let (mut won, mut lost) = (0usize, 0usize);
            for round in 0..n_rounds {
                match client.batch_execute(&booking_sql(room, day(round * 3), 3)).await {
                    Ok(()) => won += 1,
                    Err(_) => lost += 1,
                }
            }
            (won, lost)
        }));
    }

    let (mut won, mut lost) = (0, 0);
    for h in handles {
        let (w, l) = h.await.unwrap();
        won += w;
        lost += l;
    }
    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} clients x {n_rounds} contested stays: {won} booked, {lost} rejected in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_rounds as usize, "each stay must be booked exactly once");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let db = fresh_db();
    let setup = connect(host, port, &db).await;
    let room = setup_room(&setup).await;
    for i in 0..200 {
        setup
            .batch_execute(&booking_sql(room, day(i * 3), 2))
            .await
            .unwrap();
    }

    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let db = db.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let own_room = setup_room(&client).await;
            let mut i = 0i64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let _ = client.batch_execute(&booking_sql(own_room, day(i % 700), 1)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let db = db.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let (from, to) = (day(0), day(600));
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM availability WHERE room_id = '{room}' AND check_in >= '{from}' AND check_out <= '{to}'"
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
    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("INNKEEP_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("INNKEEP_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid INNKEEP_PORT");

    println!("=== innkeep stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended bookings on one room");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n=== benchmark complete ===");
}
