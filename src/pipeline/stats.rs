//! Ingestion counters, logged periodically by the worker
//!
//! Alongside the counters the stats keep a capture of the most recent
//! decoded messages (code, label, data size), newest first.

use std::collections::{BTreeMap, VecDeque};

/// Messages kept in the recent-message capture
pub const RECENT_MESSAGES_CAP: usize = 1000;

/// Human-readable label for an observed message code
pub fn message_label(code: Option<i64>) -> &'static str {
    match code {
        Some(3547) => "Game State Update",
        Some(3599) => "Player Action Response",
        Some(3555) => "Balance Update",
        Some(3513) => "Bet Confirmation",
        Some(3951) => "Game Result",
        Some(3022) => "Connection Status",
        Some(4033) => "Error Response",
        Some(3120) => "Heartbeat/Ping",
        Some(3053) => "Chat Message",
        Some(3078) => "User Status",
        Some(3052) => "Room Update",
        Some(3700) => "Bonus/Reward",
        Some(4020) => "Transaction Update",
        Some(3803) => "Game History",
        Some(1080) => "Authentication",
        Some(3029) => "Settings Update",
        Some(3117) => "Notification",
        Some(3574) => "Leaderboard",
        Some(3505) => "Achievement",
        Some(3030) => "System Message",
        _ => "Unknown",
    }
}

/// One entry of the recent-message capture
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedMessage {
    /// Unix milliseconds
    pub time: i64,
    pub code: Option<i64>,
    pub label: &'static str,
    /// Length of the serialized `data` field
    pub data_size: usize,
    pub encrypted: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestStats {
    pub frames: u64,
    pub malformed: u64,
    pub encrypted: u64,
    pub decrypted: u64,
    pub decrypt_failures: u64,
    pub heartbeats: u64,
    pub unrecognized: u64,
    pub duplicates: u64,
    pub committed: u64,
    pub notifications: u64,
    /// Message count per top-level `code`
    pub by_code: BTreeMap<i64, u64>,
    recent: VecDeque<CapturedMessage>,
}

impl IngestStats {
    /// Count the code and capture the message; heartbeats never get here
    pub fn record_message(&mut self, code: Option<i64>, data_size: usize, encrypted: bool, time: i64) {
        self.record_code(code);
        self.recent.push_front(CapturedMessage {
            time,
            code,
            label: message_label(code),
            data_size,
            encrypted,
        });
        self.recent.truncate(RECENT_MESSAGES_CAP);
    }

    /// Most recent first
    pub fn recent_messages(&self) -> impl Iterator<Item = &CapturedMessage> {
        self.recent.iter()
    }

    pub fn record_code(&mut self, code: Option<i64>) {
        if let Some(code) = code {
            *self.by_code.entry(code).or_insert(0) += 1;
        }
    }

    /// Percentage of envelopes that decrypted; `None` before the first one
    pub fn decrypt_success_rate(&self) -> Option<f64> {
        if self.encrypted == 0 {
            None
        } else {
            Some(self.decrypted as f64 / self.encrypted as f64 * 100.0)
        }
    }

    pub fn log_summary(&self) {
        let rate = self
            .decrypt_success_rate()
            .map(|r| format!("{:.1}%", r))
            .unwrap_or_else(|| "n/a".to_string());

        log::info!(
            "📊 Frames: {} | committed: {} | duplicates: {} | unrecognized: {} | malformed: {} | heartbeats: {}",
            self.frames,
            self.committed,
            self.duplicates,
            self.unrecognized,
            self.malformed,
            self.heartbeats
        );
        log::info!(
            "   🔐 Encrypted: {} | decrypted: {} | failed: {} | success: {}",
            self.encrypted,
            self.decrypted,
            self.decrypt_failures,
            rate
        );

        let mut top: Vec<(&i64, &u64)> = self.by_code.iter().collect();
        top.sort_by(|a, b| b.1.cmp(a.1));
        for (code, count) in top.into_iter().take(5) {
            log::info!("   code {} ({}): {}", code, message_label(Some(*code)), count);
        }
    }
}
