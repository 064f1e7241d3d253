use rusqlite::params;

use super::{Store, StoreError};

/// Aggregate over a half-open time window of raw samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowAggregate {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: i64,
}

impl Store {
    /// Append one raw sample. Durable when this returns.
    pub fn append_measurement(
        &self,
        tag_id: i64,
        value: f64,
        timestamp: i64,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO measurements (tag_id, value, timestamp) VALUES (?1, ?2, ?3)",
            params![tag_id, value, timestamp],
        )?;
        Ok(())
    }

    /// Compute min/max/avg/count over [start, end) for one tag, in SQL.
    ///
    /// Returns `None` when the window holds no samples.
    pub fn window_aggregate(
        &self,
        tag_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Option<WindowAggregate>, StoreError> {
        let (min, max, avg, count): (Option<f64>, Option<f64>, Option<f64>, i64) =
            self.conn().query_row(
                "SELECT MIN(value), MAX(value), AVG(value), COUNT(value)
                 FROM measurements
                 WHERE tag_id = ?1 AND timestamp >= ?2 AND timestamp < ?3",
                params![tag_id, start, end],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        match (min, max, avg) {
            (Some(min), Some(max), Some(avg)) if count > 0 => Ok(Some(WindowAggregate {
                min,
                max,
                avg,
                count,
            })),
            _ => Ok(None),
        }
    }

    /// Delete all raw samples strictly older than `threshold`.
    ///
    /// Returns the number of rows removed. Deleting nothing is not an error.
    pub fn prune_before(&self, threshold: i64) -> Result<usize, StoreError> {
        let deleted = self.conn().execute(
            "DELETE FROM measurements WHERE timestamp < ?1",
            params![threshold],
        )?;
        Ok(deleted)
    }
}
