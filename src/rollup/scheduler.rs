use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::run_cycle;
use crate::publish::Publisher;
use crate::store::tags::TagRegistry;
use crate::store::Store;

/// Drive aggregation cycles on a fixed interval until cancelled.
///
/// The interval is relative to startup, not aligned to wall-clock minute
/// boundaries. A cycle that is already running when cancellation arrives
/// completes before the task returns; missed ticks are skipped, never
/// bunched up.
pub async fn run(
    store: Store,
    registry: Arc<TagRegistry>,
    publisher: Publisher,
    interval: Duration,
    retention: Duration,
    cancel: CancellationToken,
) {
    let retention_secs = i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; consume it so the loop starts idle.
    ticker.tick().await;

    info!(
        publisher = publisher.name(),
        interval = ?interval,
        retention = ?retention,
        "aggregation scheduler started",
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("aggregation scheduler cancelled");
                return;
            }
            _ = ticker.tick() => {
                let now = Utc::now().timestamp();
                let stats = run_cycle(&store, &registry, &publisher, now, retention_secs);
                info!(
                    tags = stats.tags_seen,
                    rollups = stats.rollups_written,
                    pruned = stats.rows_pruned,
                    errors = stats.tag_errors,
                    "aggregation cycle complete",
                );
            }
        }
    }
}
