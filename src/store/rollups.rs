use rusqlite::{params, OptionalExtension};

use super::{Store, StoreError};

/// One per-tag, per-minute rollup row.
///
/// `timestamp` is the minute start in unix seconds. The row for the
/// in-progress minute is overwritten on every aggregation cycle, so its
/// count grows until the minute closes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinuteRollup {
    pub tag_id: i64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: i64,
    pub timestamp: i64,
}

impl Store {
    /// Insert or overwrite the rollup row for (tag_id, timestamp).
    ///
    /// Callers never pass a zero-count rollup; empty windows are skipped
    /// upstream.
    pub fn upsert_rollup(&self, rollup: &MinuteRollup) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO measurements_1min (tag_id, min, max, avg, count, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (tag_id, timestamp) DO UPDATE SET
                 min = excluded.min,
                 max = excluded.max,
                 avg = excluded.avg,
                 count = excluded.count",
            params![
                rollup.tag_id,
                rollup.min,
                rollup.max,
                rollup.avg,
                rollup.count,
                rollup.timestamp
            ],
        )?;
        Ok(())
    }

    /// Read back the rollup row for (tag_id, timestamp), if any.
    pub fn rollup_at(
        &self,
        tag_id: i64,
        timestamp: i64,
    ) -> Result<Option<MinuteRollup>, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT tag_id, min, max, avg, count, timestamp
                 FROM measurements_1min
                 WHERE tag_id = ?1 AND timestamp = ?2",
                params![tag_id, timestamp],
                |row| {
                    Ok(MinuteRollup {
                        tag_id: row.get(0)?,
                        min: row.get(1)?,
                        max: row.get(2)?,
                        avg: row.get(3)?,
                        count: row.get(4)?,
                        timestamp: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
