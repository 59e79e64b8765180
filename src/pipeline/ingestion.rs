//! Frame ingestion - single async worker over the frame channel
//!
//! Frames are handled strictly in arrival order: one task pulls them off the
//! channel and runs each through the engine before taking the next. Dirty
//! ledger keys are flushed on a short debounce timer, outside the engine lock.

use super::engine::PipelineEngine;
use super::persistence::{flush_dirty, PersistenceGateway};
use super::stats::IngestStats;
use crate::error::PipelineError;
use crate::wire::frame::RawFrame;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant};

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    /// Persistence flush debounce (milliseconds)
    pub persist_debounce_ms: u64,
    pub stats_interval_secs: u64,
    /// Frame channel size, for the utilization warning
    pub channel_capacity: usize,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            persist_debounce_ms: 500,
            stats_interval_secs: 30,
            channel_capacity: 1000,
        }
    }
}

/// Run the ingestion loop until the frame channel closes
///
/// Main loop:
/// 1. Receives frames from the transport reader
/// 2. Processes each frame through PipelineEngine (errors are logged, never fatal)
/// 3. Flushes dirty keys to the gateway on the debounce timer
/// 4. Logs a stats summary on the stats timer
///
/// Performs a final flush on shutdown and returns the final counters.
pub async fn start_frame_ingestion(
    mut rx: mpsc::Receiver<RawFrame>,
    engine: Arc<Mutex<PipelineEngine>>,
    store: Arc<dyn PersistenceGateway>,
    settings: IngestionSettings,
) -> IngestStats {
    log::info!("🚀 Starting frame ingestion");
    log::info!("   ├─ Persist debounce: {}ms", settings.persist_debounce_ms);
    log::info!("   ├─ Stats interval: {}s", settings.stats_interval_secs);
    log::info!("   └─ Waiting for frames...");

    let mut flush_timer = interval(Duration::from_millis(settings.persist_debounce_ms.max(1)));
    let mut stats_timer = interval(Duration::from_secs(settings.stats_interval_secs.max(1)));
    let mut frame_count = 0u64;
    let mut last_log_time = Instant::now();

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    log::warn!("⚠️  Frame channel closed, stopping ingestion");
                    break;
                };

                let result = {
                    let mut guard = engine.lock().unwrap_or_else(PoisonError::into_inner);
                    guard.process_frame(&frame)
                };
                if let Err(e) = result {
                    log_frame_error(&e);
                }

                frame_count += 1;
                if last_log_time.elapsed().as_secs() >= 10 {
                    let per_sec = frame_count as f64 / last_log_time.elapsed().as_secs_f64();
                    log::info!("📊 Ingestion rate: {:.1} frames/sec (total: {})", per_sec, frame_count);
                    last_log_time = Instant::now();
                    frame_count = 0;
                }
            }

            _ = flush_timer.tick() => {
                flush_dirty(&engine, store.as_ref()).await;
            }

            _ = stats_timer.tick() => {
                let stats = engine.lock().unwrap_or_else(PoisonError::into_inner).stats().clone();
                stats.log_summary();

                let usage = rx.len();
                if usage > settings.channel_capacity / 2 {
                    log::warn!(
                        "⚠️  Channel usage high: {}/{}",
                        usage,
                        settings.channel_capacity
                    );
                }
            }
        }
    }

    log::info!("🔄 Performing final flush...");
    flush_dirty(&engine, store.as_ref()).await;

    let stats = engine.lock().unwrap_or_else(PoisonError::into_inner).stats().clone();
    stats.log_summary();
    log::info!("✅ Frame ingestion stopped");
    stats
}

/// Log level follows how expected each failure kind is
pub fn log_frame_error(err: &PipelineError) {
    match err {
        PipelineError::Decode(e) => log::debug!("Dropped frame: {}", e),
        PipelineError::Decrypt(e) => log::warn!("⚠️  Decrypt failed: {}", e),
        PipelineError::ClassificationMiss(e) => log::debug!("Not processed: {}", e),
        PipelineError::Persistence(e) => log::error!("❌ Persistence error: {}", e),
    }
}
