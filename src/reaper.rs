use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

fn unix_now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Background task that periodically cancels expired booking requests.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = unix_now_ms();
        let expired = engine.collect_expired_requests(now);
        for (booking_id, _mentor_id) in expired {
            match engine.cancel_booking(booking_id).await {
                Ok(_) => info!("reaped expired booking request {booking_id}"),
                Err(e) => {
                    // May have been confirmed or cancelled in the meantime
                    tracing::debug!("reaper skip {booking_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
