//! `SQLite` persistence of cached device state.

use meshbridge_core::{AttrMap, DeviceId, StateCache};
use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;

/// `SQLite`-backed store of last known device state.
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open or create a `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened or initialized.
    pub fn open(path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be created.
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> SqliteResult<()> {
        self.conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS device_state (
                device_id TEXT PRIMARY KEY,
                state_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            ",
        )?;

        Ok(())
    }

    /// Save the state of one device, replacing any previous row.
    ///
    /// # Errors
    ///
    /// Returns error if the state cannot be encoded or the insert fails.
    pub fn save_state(&self, id: &DeviceId, state: &AttrMap) -> Result<(), StoreError> {
        save_row(&self.conn, id, state)
    }

    /// Delete the stored state of one device.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub fn delete_state(&self, id: &DeviceId) -> Result<bool, StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM device_state WHERE device_id = ?1", [id.as_str()])?;
        Ok(deleted > 0)
    }

    /// Load every stored device state.
    ///
    /// Rows whose JSON cannot be decoded are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub fn load_all(&self) -> Result<Vec<(DeviceId, AttrMap)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT device_id, state_json FROM device_state ORDER BY device_id")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut states = Vec::with_capacity(rows.len());
        for (device_id, json) in rows {
            match serde_json::from_str::<AttrMap>(&json) {
                Ok(state) => states.push((DeviceId::new(device_id), state)),
                Err(err) => {
                    tracing::warn!(error = %err, device_id, "Skipping unreadable stored state");
                }
            }
        }
        Ok(states)
    }

    /// Seed a cache with every stored state.
    ///
    /// # Errors
    ///
    /// Returns error if loading fails.
    pub fn restore_into(&self, cache: &mut StateCache) -> Result<usize, StoreError> {
        let states = self.load_all()?;
        let count = states.len();
        for (id, state) in states {
            cache.restore(id, state);
        }
        Ok(count)
    }

    /// Write devices merged since the last flush and delete cleared ones,
    /// in one transaction.
    ///
    /// Returns the number of rows written or deleted.
    ///
    /// # Errors
    ///
    /// Returns error if any write fails. The transaction is rolled back and
    /// the drained devices are only written again after their next change.
    pub fn flush(&mut self, cache: &mut StateCache) -> Result<usize, StoreError> {
        let dirty = cache.take_dirty();
        let cleared = cache.take_cleared();
        if dirty.is_empty() && cleared.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        for (id, state) in &dirty {
            save_row(&tx, id, state)?;
        }
        for id in &cleared {
            tx.execute("DELETE FROM device_state WHERE device_id = ?1", [id.as_str()])?;
        }
        tx.commit()?;

        tracing::debug!(saved = dirty.len(), deleted = cleared.len(), "Flushed device state");
        Ok(dirty.len() + cleared.len())
    }
}

fn save_row(conn: &Connection, id: &DeviceId, state: &AttrMap) -> Result<(), StoreError> {
    let json = state
        .to_json()
        .map_err(|e| StoreError::Encode(format!("{id}: {e}")))?;
    let text = serde_json::to_string(&json).map_err(|e| StoreError::Encode(e.to_string()))?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let now_i64 = i64::try_from(now).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        r"
        INSERT OR REPLACE INTO device_state (device_id, state_json, updated_at)
        VALUES (?1, ?2, ?3)
        ",
        (id.as_str(), text, now_i64),
    )?;

    Ok(())
}

/// Errors for state persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database failure
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// State could not be encoded as JSON
    #[error("encode error: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbridge_core::AttrValue;

    fn state(pairs: &[(&str, AttrValue)]) -> AttrMap {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn state_store_basic_operations() {
        let store = StateStore::in_memory().unwrap();
        let id = DeviceId::new("0x1");

        store
            .save_state(&id, &state(&[("state", "ON".into()), ("brightness", 12.into())]))
            .unwrap();
        store
            .save_state(&id, &state(&[("state", "OFF".into())]))
            .unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, id);
        assert_eq!(all[0].1.get("state"), Some(&AttrValue::from("OFF")));

        assert!(store.delete_state(&id).unwrap());
        assert!(!store.delete_state(&id).unwrap());
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn flush_and_restore_roundtrip() {
        let mut store = StateStore::in_memory().unwrap();
        let mut cache = StateCache::new();
        let a = DeviceId::new("0xa");
        let b = DeviceId::new("0xb");

        cache.merge(&a, &state(&[("state", "ON".into()), ("color_temp", 370.into())]));
        cache.merge(&b, &state(&[("occupancy", true.into())]));
        assert_eq!(store.flush(&mut cache).unwrap(), 2);
        assert_eq!(store.flush(&mut cache).unwrap(), 0);

        cache.clear(&b);
        assert_eq!(store.flush(&mut cache).unwrap(), 1);

        let mut restored = StateCache::new();
        assert_eq!(store.restore_into(&mut restored).unwrap(), 1);
        assert_eq!(restored.get(&a), cache.get(&a));
        assert_eq!(
            restored.get(&a).keys().collect::<Vec<_>>(),
            vec!["state", "color_temp"]
        );
        assert!(restored.get(&b).is_empty());
    }

    #[test]
    fn unencodable_state_is_an_error() {
        let store = StateStore::in_memory().unwrap();
        let result = store.save_state(&DeviceId::new("0x1"), &state(&[("t", f64::NAN.into())]));
        assert!(matches!(result, Err(StoreError::Encode(_))));
    }

    #[test]
    fn open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let id = DeviceId::new("0x1");

        {
            let store = StateStore::open(&path).unwrap();
            store.save_state(&id, &state(&[("state", "ON".into())])).unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
    }
}
