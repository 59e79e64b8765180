//! # Event pipeline
//!
//! Turns decrypted platform messages into deduplicated, aggregated ledger
//! state and notifications.
//!
//! ## Module Organization
//!
//! - `types` - Core data structures (TypedEvent, PlayerProfile, records)
//! - `de` - Lenient field decoding for loosely typed JSON
//! - `classifier` - Message shape → TypedEvent
//! - `dedup` - Debounce, bet-window and permanent-id guards
//! - `ledger` - Profiles, action logs, drops, totals, archive
//! - `notify` - Notification sink trait and implementations
//! - `stats` - Ingestion counters
//! - `engine` - PipelineEngine, owner of all of the above
//! - `persistence` - Persistence gateway (SQLite / memory) and rehydration
//! - `ingestion` - Async frame worker with debounced flush

pub mod types;
pub mod de;
pub mod classifier;
pub mod dedup;
pub mod ledger;
pub mod notify;
pub mod stats;
pub mod engine;
pub mod persistence;
pub mod ingestion;

// Re-export commonly used types
pub use types::{EventKind, NotifyCategory, PlayerProfile, TypedEvent};
pub use classifier::{classify, Classification};
pub use dedup::DedupEngine;
pub use ledger::{Ledger, StoreKey};
pub use notify::{ChannelSink, LogSink, NotificationSink};
pub use engine::{EngineRules, FrameOutcome, PipelineEngine};
pub use persistence::{MemoryStore, PersistenceGateway, SqliteStore};
