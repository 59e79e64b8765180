//! Runtime configuration from environment variables

use crate::error::ConfigError;
use crate::pipeline::dedup::DedupRules;
use crate::pipeline::engine::{EngineRules, DEFAULT_HEARTBEAT_CODE};
use crate::pipeline::ingestion::IngestionSettings;
use crate::pipeline::ledger::{LedgerRules, DEFAULT_BIG_WIN_THRESHOLD};
use crate::wire::cipher::{CipherUnwrapper, DEFAULT_KEY, KEY_LEN};
use std::env;

pub const DEFAULT_SUPPRESS_NOTIFY_CODE: i64 = 3513;

/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// `false` keeps state in memory only
    pub enable_persistence: bool,

    /// Frame channel buffer size
    pub channel_buffer: usize,

    pub persist_debounce_ms: u64,
    pub stats_interval_secs: u64,

    pub big_win_threshold: f64,
    pub heartbeat_code: i64,
    pub suppress_notify_code: i64,

    /// Pre-shared AES key, exactly 16 bytes
    pub cipher_key: String,

    /// Seeded into the tracked set at startup
    pub tracked_players: Vec<String>,

    /// Frame file; stdin when unset
    pub frame_source: Option<String>,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BIRDFLOW_DB_PATH` (default: birdflow.db)
    /// - `ENABLE_PERSISTENCE` (default: true)
    /// - `FRAME_CHANNEL_BUFFER` (default: 1000)
    /// - `PERSIST_DEBOUNCE_MS` (default: 500)
    /// - `STATS_INTERVAL_SECS` (default: 30)
    /// - `BIG_WIN_THRESHOLD` (default: 1000)
    /// - `HEARTBEAT_CODE` (default: 3121)
    /// - `SUPPRESS_NOTIFY_CODE` (default: 3513)
    /// - `CIPHER_KEY` (default: Luckybird1234567)
    /// - `TRACKED_PLAYERS` (comma-separated uids)
    /// - `FRAME_SOURCE` (optional path)
    ///
    /// Unparseable numbers fall back to their defaults; a key of the wrong
    /// length is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cipher_key = env::var("CIPHER_KEY").unwrap_or_else(|_| DEFAULT_KEY.to_string());
        if cipher_key.len() != KEY_LEN {
            return Err(ConfigError::InvalidValue(format!(
                "CIPHER_KEY must be {} bytes, got {}",
                KEY_LEN,
                cipher_key.len()
            )));
        }

        let tracked_players = env::var("TRACKED_PLAYERS")
            .map(|s| {
                s.split(',')
                    .map(|uid| uid.trim().to_string())
                    .filter(|uid| !uid.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            db_path: env::var("BIRDFLOW_DB_PATH").unwrap_or_else(|_| "birdflow.db".to_string()),
            enable_persistence: parse_var("ENABLE_PERSISTENCE", true),
            channel_buffer: parse_var("FRAME_CHANNEL_BUFFER", 1_000),
            persist_debounce_ms: parse_var("PERSIST_DEBOUNCE_MS", 500),
            stats_interval_secs: parse_var("STATS_INTERVAL_SECS", 30),
            big_win_threshold: parse_var("BIG_WIN_THRESHOLD", DEFAULT_BIG_WIN_THRESHOLD),
            heartbeat_code: parse_var("HEARTBEAT_CODE", DEFAULT_HEARTBEAT_CODE),
            suppress_notify_code: parse_var("SUPPRESS_NOTIFY_CODE", DEFAULT_SUPPRESS_NOTIFY_CODE),
            cipher_key,
            tracked_players,
            frame_source: env::var("FRAME_SOURCE").ok().filter(|s| !s.trim().is_empty()),
        })
    }

    pub fn engine_rules(&self) -> EngineRules {
        EngineRules {
            heartbeat_code: self.heartbeat_code,
            dedup: DedupRules::default(),
            ledger: LedgerRules {
                big_win_threshold: self.big_win_threshold,
                suppress_code: Some(self.suppress_notify_code),
            },
        }
    }

    pub fn ingestion_settings(&self) -> IngestionSettings {
        IngestionSettings {
            persist_debounce_ms: self.persist_debounce_ms,
            stats_interval_secs: self.stats_interval_secs,
            channel_capacity: self.channel_buffer,
        }
    }

    pub fn cipher(&self) -> Result<CipherUnwrapper, ConfigError> {
        CipherUnwrapper::from_key_str(&self.cipher_key)
            .ok_or_else(|| ConfigError::InvalidValue("CIPHER_KEY".to_string()))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
