pub mod scheduler;

use tracing::warn;

use crate::publish::Publisher;
use crate::store::rollups::MinuteRollup;
use crate::store::tags::TagRegistry;
use crate::store::{Store, StoreError};

/// Rollup granularity. Fixed; a different resolution is a different table.
pub const ROLLUP_WINDOW_SECS: i64 = 60;

/// Truncate a unix timestamp to the start of its minute.
pub fn minute_start(ts: i64) -> i64 {
    ts - ts.rem_euclid(ROLLUP_WINDOW_SECS)
}

/// Counters for one aggregation cycle, for the cycle summary log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub tags_seen: usize,
    pub rollups_written: usize,
    pub rows_pruned: usize,
    pub tag_errors: usize,
}

/// Compute the rollup for one tag over one minute window.
///
/// Returns `None` when the window holds no samples; an empty minute is
/// never materialized.
pub fn compute_minute(
    store: &Store,
    tag_id: i64,
    minute: i64,
) -> Result<Option<MinuteRollup>, StoreError> {
    let agg = store.window_aggregate(tag_id, minute, minute + ROLLUP_WINDOW_SECS)?;

    Ok(agg.map(|agg| MinuteRollup {
        tag_id,
        min: agg.min,
        max: agg.max,
        avg: agg.avg,
        count: agg.count,
        timestamp: minute,
    }))
}

/// Run one aggregation cycle at time `now`.
///
/// Recomputes the current (possibly still filling) minute for every known
/// tag, overwriting the stored rollup each time so its count grows as the
/// minute fills. A failure on one tag is logged and does not stop the
/// others, and pruning runs regardless.
pub fn run_cycle(
    store: &Store,
    registry: &TagRegistry,
    publisher: &Publisher,
    now: i64,
    retention_secs: i64,
) -> CycleStats {
    let mut stats = CycleStats::default();
    let minute = minute_start(now);

    for (tag_id, name) in registry.known_tags() {
        stats.tags_seen += 1;

        let rollup = match compute_minute(store, tag_id, minute) {
            Ok(Some(rollup)) => rollup,
            Ok(None) => continue,
            Err(e) => {
                warn!(tag = %name, error = %e, "rollup computation failed");
                stats.tag_errors += 1;
                continue;
            }
        };

        if let Err(e) = store.upsert_rollup(&rollup) {
            warn!(tag = %name, error = %e, "rollup write failed");
            stats.tag_errors += 1;
            continue;
        }

        publisher.publish(&rollup);
        stats.rollups_written += 1;
    }

    // Pruning keys off the wall clock, not the truncated minute.
    match store.prune_before(now - retention_secs) {
        Ok(pruned) => stats.rows_pruned = pruned,
        Err(e) => warn!(error = %e, "pruning failed"),
    }

    stats
}
