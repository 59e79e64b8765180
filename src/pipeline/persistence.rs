//! Persistence gateway
//!
//! Key/value mirror of the ledger. Values are JSON documents addressed by
//! the logical names in [`StoreKey`]. The ledger stays authoritative: the
//! gateway never mutates state on its own, a failed write is logged and not
//! retried, and the next flush of that key carries the latest state forward.
//!
//! Table written:
//! - `persistence` - UPSERT on key

use super::engine::PipelineEngine;
use super::ledger::StoreKey;
use crate::error::PersistenceError;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// `Ok(None)` when the key was never written
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
}

/// SQLite-backed gateway (WAL mode, single table)
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database and its table
    pub fn open(db_path: &str) -> Result<Self, PersistenceError> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS persistence (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                updated_at  INTEGER NOT NULL
            );
            "#,
        )?;
        log::info!("📊 Opened persistence store: {} (WAL)", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl PersistenceGateway for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let value = conn
            .query_row(
                "SELECT value FROM persistence WHERE key = ?",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            r#"
            INSERT INTO persistence (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![key, value, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }
}

/// In-process gateway for runs without a database
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Load every persisted collection into a fresh engine
///
/// Missing keys leave the collection empty (first run). Unreadable or
/// unparseable values are logged and skipped. Afterwards the action log gets
/// its retroactive duplicate cleanup and is written back.
///
/// Returns the number of keys restored.
pub async fn rehydrate(engine: &mut PipelineEngine, store: &dyn PersistenceGateway) -> usize {
    let mut restored = 0;

    for key in StoreKey::all() {
        let raw = match store.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                log::error!("❌ Failed to read {}: {}", key.as_str(), e);
                continue;
            }
        };

        let parsed = serde_json::from_str(&raw)
            .map_err(PersistenceError::from)
            .and_then(|value| engine.restore(key, value).map_err(PersistenceError::from));
        match parsed {
            Ok(()) => restored += 1,
            Err(e) => log::warn!("⚠️  Ignoring stored {}: {}", key.as_str(), e),
        }
    }

    // Restoring is not a change; only a repaired action log is written back
    let removed = engine.clean_action_log();
    engine.take_dirty();
    if removed > 0 {
        engine.mark_dirty(StoreKey::ActionLog);
    }

    log::info!("✅ Rehydrated {}/{} persisted keys", restored, StoreKey::all().len());
    restored
}

/// Write every dirty key through the gateway
///
/// Snapshots are taken under the engine lock; writes happen after it is
/// released. Returns the number of keys written successfully.
pub async fn flush_dirty(engine: &Mutex<PipelineEngine>, store: &dyn PersistenceGateway) -> usize {
    let snapshots: Vec<(StoreKey, Result<String, serde_json::Error>)> = {
        let mut guard = engine.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .take_dirty()
            .into_iter()
            .map(|key| {
                let doc = guard
                    .ledger()
                    .snapshot(key)
                    .and_then(|value| serde_json::to_string(&value));
                (key, doc)
            })
            .collect()
    }; // Lock released here

    let mut written = 0;
    for (key, doc) in snapshots {
        let result = match doc {
            Ok(doc) => store.put(key.as_str(), &doc).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => written += 1,
            Err(e) => log::error!("❌ Failed to persist {}: {}", key.as_str(), e),
        }
    }

    if written > 0 {
        log::debug!("✅ Persisted {} key(s)", written);
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::EngineRules;
    use crate::pipeline::notify::LogSink;
    use crate::pipeline::types::{ActionLogEntry, PlayerAction};
    use crate::wire::cipher::CipherUnwrapper;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn engine_at(now: i64) -> PipelineEngine {
        PipelineEngine::new_with_timestamp_fn(
            EngineRules::default(),
            CipherUnwrapper::default(),
            Arc::new(LogSink),
            Box::new(move || now),
        )
    }

    #[tokio::test]
    async fn test_sqlite_get_put() {
        let temp = NamedTempFile::new().unwrap();
        let store = SqliteStore::open(temp.path().to_str().unwrap()).unwrap();

        assert_eq!(store.get("players").await.unwrap(), None);
        store.put("players", "{}").await.unwrap();
        store.put("players", r#"{"1":{"uid":"1"}}"#).await.unwrap();
        assert_eq!(
            store.get("players").await.unwrap().as_deref(),
            Some(r#"{"1":{"uid":"1"}}"#)
        );
    }

    #[tokio::test]
    async fn test_flush_then_rehydrate() {
        let temp = NamedTempFile::new().unwrap();
        let store = SqliteStore::open(temp.path().to_str().unwrap()).unwrap();

        let engine = Mutex::new(engine_at(1_000));
        {
            let mut guard = engine.lock().unwrap();
            guard.toggle_tracked("42");
            guard
                .process_event(json!({"code": 3700, "data": {"coin_drop": {
                    "rain_id": 9, "status": 1, "amount": 10, "currency": "gold", "player_number": 3
                }}}))
                .unwrap();
        }

        let written = flush_dirty(&engine, &store).await;
        assert_eq!(written, 4); // pastDrops, totalAmounts, notificationsArchive, trackedPlayers
        assert_eq!(flush_dirty(&engine, &store).await, 0);

        let mut fresh = engine_at(2_000);
        assert_eq!(rehydrate(&mut fresh, &store).await, 4);
        assert!(fresh.ledger().is_tracked("42"));
        assert_eq!(fresh.ledger().get_totals().get("gold"), Some(&10.0));
        assert_eq!(fresh.ledger().archive().len(), 1);
        assert!(fresh.take_dirty().is_empty());
    }

    #[tokio::test]
    async fn test_rehydrate_tolerates_absent_and_corrupt_keys() {
        let store = MemoryStore::new();
        store.put("pastDrops", "not json").await.unwrap();
        store.put("tipTotals", r#"{"usd": 4.5}"#).await.unwrap();

        let mut engine = engine_at(0);
        assert_eq!(rehydrate(&mut engine, &store).await, 1);
        assert!(engine.ledger().get_recent_drops().is_empty());
        assert_eq!(engine.ledger().get_tip_totals().get("usd"), Some(&4.5));
    }

    #[tokio::test]
    async fn test_rehydrate_cleans_action_log() {
        let bet = |time: i64| ActionLogEntry {
            action: PlayerAction::Bet { amount: 1.0, win: 2.0, currency: "usd".into() },
            time,
        };
        let log = json!({"7": [bet(15_000), bet(10_000), bet(0)]});

        let store = MemoryStore::new();
        store.put("actionsMap", &log.to_string()).await.unwrap();

        let mut engine = engine_at(0);
        rehydrate(&mut engine, &store).await;
        let times: Vec<i64> = engine.ledger().get_action_log("7").iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0]);
        assert_eq!(engine.take_dirty(), vec![StoreKey::ActionLog]);
    }
}
