//! Notification sinks
//!
//! Fire-and-forget: the engine never waits on, or learns the fate of, a
//! notification. Rendering (toasts, sounds) belongs to whoever consumes the
//! sink.

use super::types::{Notification, NotifyCategory};
use tokio::sync::mpsc;

pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str, category: NotifyCategory);
}

/// Writes notifications to the log at `info`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, message: &str, category: NotifyCategory) {
        log::info!("🔔 [{}] {}", category.as_str(), message);
    }
}

/// Forwards notifications to a bounded channel, dropping when it is full
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, message: &str, category: NotifyCategory) {
        let notification = Notification {
            message: message.to_string(),
            category,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.tx.try_send(notification) {
            log::warn!("⚠️  Notification dropped: {}", e);
        }
    }
}
