use std::collections::HashMap;

use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::{Store, StoreError};

impl Store {
    /// Load the full tag table, for warming the registry cache.
    pub fn load_tags(&self) -> Result<Vec<(i64, String)>, StoreError> {
        let mut stmt = self.conn().prepare("SELECT id, name FROM tags ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Look up an existing tag id by name.
    pub fn lookup_tag(&self, name: &str) -> Result<Option<i64>, StoreError> {
        let id = self
            .conn()
            .query_row(
                "SELECT id FROM tags WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Insert a tag name, tolerating a concurrent insert of the same name.
    ///
    /// The UNIQUE constraint makes the insert a no-op when another connection
    /// won the race; the follow-up select returns the winner's id either way.
    pub fn insert_tag(&self, name: &str) -> Result<i64, StoreError> {
        self.conn().execute(
            "INSERT INTO tags (name) VALUES (?1) ON CONFLICT (name) DO NOTHING",
            params![name],
        )?;
        self.conn()
            .query_row(
                "SELECT id FROM tags WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
    }
}

/// In-process cache over the tags table.
///
/// The cache is authoritative for names it holds; misses fall through to the
/// table. The create path runs under the cache lock so one process never
/// races itself into a duplicate insert.
#[derive(Default)]
pub struct TagRegistry {
    cache: Mutex<HashMap<String, i64>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the cache from the tags table. Called once at startup.
    pub fn warm(&self, store: &Store) -> Result<usize, StoreError> {
        let tags = store.load_tags()?;
        let mut cache = self.cache.lock();
        cache.clear();
        for (id, name) in tags {
            cache.insert(name, id);
        }
        Ok(cache.len())
    }

    /// Resolve a tag name to its id, creating the tag on first sight.
    ///
    /// Ids are stable: once a name maps to an id, every later resolution
    /// returns the same id, across restarts included.
    pub fn resolve_or_create(&self, store: &Store, name: &str) -> Result<i64, StoreError> {
        let mut cache = self.cache.lock();

        if let Some(id) = cache.get(name) {
            return Ok(*id);
        }

        // Another connection may have created the tag since warm-up.
        let id = match store.lookup_tag(name)? {
            Some(id) => id,
            None => {
                let id = store.insert_tag(name)?;
                debug!(tag = %name, id, "registered new tag");
                id
            }
        };

        cache.insert(name.to_string(), id);
        Ok(id)
    }

    /// Snapshot of all known (id, name) pairs, ordered by id, matching the
    /// shape `load_tags` returns.
    pub fn known_tags(&self) -> Vec<(i64, String)> {
        let cache = self.cache.lock();
        let mut tags: Vec<(i64, String)> = cache
            .iter()
            .map(|(name, id)| (*id, name.clone()))
            .collect();
        tags.sort_by_key(|(id, _)| *id);
        tags
    }
}
