//! Pipeline Engine - owns all ingestion state
//!
//! ```text
//! RawFrame
//!     ↓  wire::frame::decode
//! JSON object
//!     ↓  CipherUnwrapper::unwrap_envelope
//! inner event
//!     ↓  classifier::classify
//! TypedEvent
//!     ↓  DedupEngine::screen
//! screened TypedEvent
//!     ↓  Ledger::apply
//! notifications → NotificationSink
//! ```
//!
//! One engine instance holds the dedup guards, the ledger and the stats; there
//! is no process-wide state, so independent engines can run side by side.
//! Every failure is returned to the caller, which logs it and moves on to the
//! next frame.

use super::classifier::{classify, Classification};
use super::de::value_as_i64;
use super::dedup::{cleanup_action_log, DedupEngine, DedupRules};
use super::ledger::{Ledger, LedgerRules, StoreKey, TOP_BALANCES_LIMIT, TOP_BALANCES_WINDOW_MS};
use super::notify::NotificationSink;
use super::stats::IngestStats;
use super::types::PlayerProfile;
use crate::error::PipelineError;
use crate::wire::cipher::{CipherUnwrapper, Envelope};
use crate::wire::frame::{decode, RawFrame};
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_HEARTBEAT_CODE: i64 = 3121;

#[derive(Debug, Clone)]
pub struct EngineRules {
    pub heartbeat_code: i64,
    pub dedup: DedupRules,
    pub ledger: LedgerRules,
}

impl Default for EngineRules {
    fn default() -> Self {
        Self {
            heartbeat_code: DEFAULT_HEARTBEAT_CODE,
            dedup: DedupRules::default(),
            ledger: LedgerRules::default(),
        }
    }
}

/// What happened to a frame that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Heartbeat,
    /// Every primary effect was rejected by a dedup guard
    Duplicate,
    Committed {
        kind: &'static str,
        notifications: usize,
    },
}

pub struct PipelineEngine {
    rules: EngineRules,
    cipher: CipherUnwrapper,
    dedup: DedupEngine,
    ledger: Ledger,
    stats: IngestStats,
    sink: Arc<dyn NotificationSink>,

    /// Unix milliseconds (overridable for tests)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl PipelineEngine {
    pub fn new(rules: EngineRules, cipher: CipherUnwrapper, sink: Arc<dyn NotificationSink>) -> Self {
        Self::new_with_timestamp_fn(
            rules,
            cipher,
            sink,
            Box::new(|| chrono::Utc::now().timestamp_millis()),
        )
    }

    /// Create an engine with a custom clock
    ///
    /// # Arguments
    /// * `now_fn` - Function returning Unix milliseconds
    pub fn new_with_timestamp_fn(
        rules: EngineRules,
        cipher: CipherUnwrapper,
        sink: Arc<dyn NotificationSink>,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            dedup: DedupEngine::new(rules.dedup.clone()),
            ledger: Ledger::new(),
            stats: IngestStats::default(),
            rules,
            cipher,
            sink,
            now_fn,
        }
    }

    /// Run one transport frame through the whole pipeline
    pub fn process_frame(&mut self, frame: &RawFrame) -> Result<FrameOutcome, PipelineError> {
        self.stats.frames += 1;

        let decoded = decode(frame, self.rules.heartbeat_code).map_err(|e| {
            self.stats.malformed += 1;
            e
        })?;

        if decoded.heartbeat {
            self.stats.heartbeats += 1;
            log::trace!("heartbeat");
            return Ok(FrameOutcome::Heartbeat);
        }

        let encrypted = Envelope::detect(&decoded.value).is_some();
        if encrypted {
            self.stats.encrypted += 1;
        }

        let unwrapped = self.cipher.unwrap_envelope(decoded.value).map_err(|e| {
            self.stats.decrypt_failures += 1;
            e
        })?;
        if unwrapped.was_encrypted {
            self.stats.decrypted += 1;
        }

        self.handle_event(unwrapped.event, unwrapped.was_encrypted)
    }

    /// Classify, screen and commit an already-decrypted event object
    pub fn process_event(&mut self, value: Value) -> Result<FrameOutcome, PipelineError> {
        self.handle_event(value, false)
    }

    fn handle_event(&mut self, value: Value, encrypted: bool) -> Result<FrameOutcome, PipelineError> {
        let now = (self.now_fn)();
        let code = value.get("code").and_then(value_as_i64);
        let data_size = value.get("data").map_or(0, |data| data.to_string().len());

        let event = match classify(value, self.rules.heartbeat_code) {
            Classification::Heartbeat => {
                self.stats.heartbeats += 1;
                log::trace!("heartbeat");
                return Ok(FrameOutcome::Heartbeat);
            }
            Classification::Unrecognized(miss) => {
                self.stats.record_message(code, data_size, encrypted, now);
                self.stats.unrecognized += 1;
                return Err(miss.into());
            }
            Classification::Event(event) => {
                self.stats.record_message(code, data_size, encrypted, now);
                event
            }
        };

        let screened = self.dedup.screen(event, &self.ledger, now);
        self.stats.duplicates += screened.dropped.len() as u64;
        if !screened.dropped.is_empty() {
            log::debug!(
                "Duplicate {:?} dropped (code: {:?})",
                screened.dropped,
                screened.event.code
            );
        }

        let notifications = self.ledger.apply(&screened.event, now, &self.rules.ledger);
        for n in &notifications {
            self.sink.notify(&n.message, n.category);
        }
        self.stats.notifications += notifications.len() as u64;

        if screened.is_duplicate() {
            return Ok(FrameOutcome::Duplicate);
        }

        self.stats.committed += 1;
        Ok(FrameOutcome::Committed {
            kind: screened.event.kind.label(),
            notifications: notifications.len(),
        })
    }

    /// Flip tracking for a player; returns whether it is now tracked
    pub fn toggle_tracked(&mut self, uid: &str) -> bool {
        self.ledger.toggle_tracked(uid)
    }

    /// `top_balances` with the default window and limit
    pub fn top_balances(&self) -> Vec<&PlayerProfile> {
        self.ledger
            .top_balances((self.now_fn)(), TOP_BALANCES_WINDOW_MS, TOP_BALANCES_LIMIT)
    }

    /// Load one persisted collection into the ledger
    pub fn restore(&mut self, key: StoreKey, value: Value) -> Result<(), serde_json::Error> {
        self.ledger.restore(key, value)
    }

    /// Repair duplicate bets in the (rehydrated) action log
    pub fn clean_action_log(&mut self) -> usize {
        let window = self.rules.dedup.bet_window_ms;
        let removed = cleanup_action_log(self.ledger.action_log_mut(), window);
        if removed > 0 {
            log::info!("🧹 Removed {} duplicate bet entries from action log", removed);
        }
        removed
    }

    /// Clear ledger, guards and stats; every persisted key becomes dirty
    pub fn reset(&mut self) {
        self.ledger.clear();
        self.dedup.clear();
        self.stats = IngestStats::default();
    }

    pub fn mark_dirty(&mut self, key: StoreKey) {
        self.ledger.mark_dirty(key);
    }

    pub fn take_dirty(&mut self) -> Vec<StoreKey> {
        self.ledger.take_dirty()
    }

    pub fn now(&self) -> i64 {
        (self.now_fn)()
    }

    pub fn rules(&self) -> &EngineRules {
        &self.rules
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn dedup(&self) -> &DedupEngine {
        &self.dedup
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }
}
