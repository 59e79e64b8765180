//! Birdflow Runtime
//!
//! Reads transport frames (one per line) from stdin or `FRAME_SOURCE`, runs
//! them through the event pipeline and mirrors ledger state to SQLite.
//!
//! Usage:
//!   websocket-tap | cargo run --release --bin birdflow
//!
//! Environment variables:
//!   BIRDFLOW_DB_PATH - SQLite database path (default: birdflow.db)
//!   ENABLE_PERSISTENCE - false keeps state in memory (default: true)
//!   FRAME_SOURCE - frame file to read instead of stdin
//!   TRACKED_PLAYERS - comma-separated uids to notify on

use birdflow::config::PipelineConfig;
use birdflow::pipeline::{
    engine::PipelineEngine,
    ingestion::start_frame_ingestion,
    notify::LogSink,
    persistence::{rehydrate, MemoryStore, PersistenceGateway, SqliteStore},
};
use birdflow::wire::frame::RawFrame;
use dotenv::dotenv;
use env_logger::Env;
use log::{error, info};
use std::io::{BufRead, BufReader};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Lines buffered between the blocking reader thread and the forwarder
const LINE_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Birdflow Runtime");

    let config = PipelineConfig::from_env()?;
    info!("   ├─ Persistence: {}", if config.enable_persistence { config.db_path.as_str() } else { "memory" });
    info!("   ├─ Channel buffer: {} frames", config.channel_buffer);
    info!("   ├─ Big win threshold: {}", config.big_win_threshold);
    info!(
        "   └─ Source: {}",
        config.frame_source.as_deref().unwrap_or("stdin")
    );

    let store: Arc<dyn PersistenceGateway> = if config.enable_persistence {
        Arc::new(SqliteStore::open(&config.db_path)?)
    } else {
        Arc::new(MemoryStore::new())
    };

    let mut engine = PipelineEngine::new(config.engine_rules(), config.cipher()?, Arc::new(LogSink));
    rehydrate(&mut engine, store.as_ref()).await;

    for uid in &config.tracked_players {
        if !engine.ledger().is_tracked(uid) {
            engine.toggle_tracked(uid);
        }
    }
    info!(
        "✅ PipelineEngine ready ({} profiles, {} tracked)",
        engine.ledger().profile_count(),
        engine.ledger().tracked_players().count()
    );

    let engine = Arc::new(Mutex::new(engine));
    let (tx, rx) = mpsc::channel::<RawFrame>(config.channel_buffer);

    let ingestion = tokio::spawn(start_frame_ingestion(
        rx,
        engine.clone(),
        store.clone(),
        config.ingestion_settings(),
    ));
    let input: Box<dyn BufRead + Send> = match &config.frame_source {
        Some(path) => Box::new(BufReader::new(std::fs::File::open(path)?)),
        None => Box::new(BufReader::new(std::io::stdin())),
    };
    let (line_tx, line_rx) = mpsc::channel::<String>(LINE_BUFFER);
    spawn_line_reader(input, line_tx);
    let mut reader = tokio::spawn(forward_frames(line_rx, tx));

    info!("🔄 Press CTRL+C to shutdown gracefully");

    tokio::select! {
        result = &mut reader => {
            match result {
                Ok(count) => info!("✅ Frame source exhausted after {} frames", count),
                Err(e) => error!("❌ Reader task failed: {}", e),
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("❌ Failed to listen for CTRL+C: {}", e);
            }
            info!("⚠️  Received CTRL+C, shutting down...");
            // The forwarder owns the frame sender; aborting it closes the
            // channel even while the reader thread is blocked on input
            reader.abort();
        }
    }

    let stats = ingestion.await?;
    info!(
        "✅ Birdflow stopped ({} frames, {} committed)",
        stats.frames, stats.committed
    );
    Ok(())
}

/// Read lines on a dedicated thread so a blocked read never holds up shutdown
fn spawn_line_reader(input: Box<dyn BufRead + Send>, line_tx: mpsc::Sender<String>) {
    std::thread::spawn(move || {
        for line in input.lines() {
            match line {
                Ok(line) => {
                    if line_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("❌ Frame source failed: {}", e);
                    break;
                }
            }
        }
    });
}

/// Forward non-empty lines as text frames until the source ends or the
/// frame channel closes
async fn forward_frames(mut lines: mpsc::Receiver<String>, tx: mpsc::Sender<RawFrame>) -> u64 {
    let mut count = 0u64;
    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        if tx.send(RawFrame::Text(line)).await.is_err() {
            break;
        }
        count += 1;
    }
    count
}
