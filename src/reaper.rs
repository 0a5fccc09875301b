use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{now_ms, Engine};

const REAP_INTERVAL: Duration = Duration::from_secs(5);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Cancel pending bookings whose hold has run out.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    loop {
        interval.tick().await;
        reap_once(&engine).await;
    }
}

/// One sweep. Returns how many bookings were cancelled.
pub async fn reap_once(engine: &Engine) -> usize {
    let now = now_ms();
    let mut reaped = 0;
    for (booking_id, room_id) in engine.collect_expired_pending(now) {
        match engine.expire_booking(booking_id, now).await {
            Ok(true) => {
                info!("expired pending booking {booking_id} on room {room_id}");
                reaped += 1;
            }
            // Confirmed or cancelled since the scan.
            Ok(false) => {}
            Err(e) => tracing::debug!("reaper skip {booking_id}: {e}"),
        }
    }
    reaped
}

/// Compact the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}
