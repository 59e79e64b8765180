//! Integration tests for the frame ingestion worker
//!
//! Drives `start_frame_ingestion` over a real channel, the way the runtime
//! does, and checks what lands in the persistence gateway and the sink.
//!
//! Key integration points tested:
//! - Strict arrival-order processing of mixed plain/encrypted frames
//! - Bad frames never stop the worker
//! - Final flush on channel close
//! - Rehydration of a second engine from the flushed store

#[cfg(test)]
mod pipeline_integration_tests {
    use birdflow::pipeline::engine::{EngineRules, PipelineEngine};
    use birdflow::pipeline::ingestion::{start_frame_ingestion, IngestionSettings};
    use birdflow::pipeline::notify::{ChannelSink, LogSink};
    use birdflow::pipeline::persistence::{rehydrate, MemoryStore, PersistenceGateway, SqliteStore};
    use birdflow::pipeline::types::NotifyCategory;
    use birdflow::wire::cipher::CipherUnwrapper;
    use birdflow::wire::frame::RawFrame;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tempfile::NamedTempFile;
    use tokio::sync::mpsc;

    fn sealed(payload: serde_json::Value) -> RawFrame {
        let envelope = CipherUnwrapper::default().seal_random(&payload.to_string());
        RawFrame::from(envelope.to_value().to_string())
    }

    fn settings() -> IngestionSettings {
        IngestionSettings {
            persist_debounce_ms: 10,
            stats_interval_secs: 60,
            channel_capacity: 64,
        }
    }

    #[tokio::test]
    async fn test_worker_processes_mixed_stream_and_flushes() {
        let (notify_tx, mut notify_rx) = mpsc::channel(16);
        let engine = Arc::new(Mutex::new(PipelineEngine::new(
            EngineRules::default(),
            CipherUnwrapper::default(),
            Arc::new(ChannelSink::new(notify_tx)),
        )));
        let store = Arc::new(MemoryStore::new());

        let (tx, rx) = mpsc::channel::<RawFrame>(64);
        let worker = tokio::spawn(start_frame_ingestion(
            rx,
            engine.clone(),
            store.clone(),
            settings(),
        ));

        let frames = vec![
            RawFrame::from(r#"42{"code":3121}"#),
            RawFrame::from("3"),
            RawFrame::from(r#"{"iv":"00","detail":"%%%"}"#),
            sealed(json!({"code": 3700, "data": {"coin_drop": {
                "rain_id": "r1", "status": 1, "amount": "50", "currency": "gold", "player_number": 12
            }}})),
            sealed(json!({"code": 3700, "data": {"coin_drop": {
                "rain_id": "r1", "status": 1, "amount": "50", "currency": "gold", "player_number": 12
            }}})),
            RawFrame::from(
                json!({"code": 3053, "data": {"tip": {"amount": "3", "currency": "usd"}}}).to_string(),
            ),
            RawFrame::from(r#"{"code":4000,"data":{}}"#),
        ];
        for frame in frames {
            tx.send(frame).await.unwrap();
        }
        drop(tx);

        let stats = worker.await.unwrap();
        assert_eq!(stats.frames, 7);
        assert_eq!(stats.heartbeats, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.decrypt_failures, 1);
        assert_eq!(stats.decrypted, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.unrecognized, 1);
        assert_eq!(stats.committed, 2);

        let notice = notify_rx.recv().await.unwrap();
        assert_eq!(notice.message, "Coin Drop: 50 GOLD for 12 people");
        assert_eq!(notice.category, NotifyCategory::Gold);
        assert!(notify_rx.try_recv().is_err());

        // Final flush wrote the touched keys
        let totals = store.get("totalAmounts").await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&totals).unwrap(), json!({"gold": 50.0}));
        let tips = store.get("tipTotals").await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&tips).unwrap(), json!({"usd": 3.0}));
        assert!(store.get("players").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_survives_restart_via_sqlite() {
        let temp = NamedTempFile::new().unwrap();
        let db_path = temp.path().to_str().unwrap().to_string();

        {
            let store: Arc<dyn PersistenceGateway> = Arc::new(SqliteStore::open(&db_path).unwrap());
            let mut engine = PipelineEngine::new(
                EngineRules::default(),
                CipherUnwrapper::default(),
                Arc::new(LogSink),
            );
            engine.toggle_tracked("77");
            let engine = Arc::new(Mutex::new(engine));

            let (tx, rx) = mpsc::channel::<RawFrame>(8);
            let worker = tokio::spawn(start_frame_ingestion(rx, engine, store, settings()));
            tx.send(sealed(json!({"code": 3547, "data": {"bet": {
                "user": {"uid": 77, "name": "seven", "redeem_usd": "12"},
                "amount": "1", "win": "0", "currency": "usd", "record_id": "b-1"
            }}})))
            .await
            .unwrap();
            drop(tx);
            worker.await.unwrap();
        }

        let store = SqliteStore::open(&db_path).unwrap();
        let mut engine = PipelineEngine::new(
            EngineRules::default(),
            CipherUnwrapper::default(),
            Arc::new(LogSink),
        );
        assert_eq!(rehydrate(&mut engine, &store).await, 4);

        let ledger = engine.ledger();
        assert!(ledger.is_tracked("77"));
        assert_eq!(ledger.get_action_log("77").len(), 1);
        assert_eq!(ledger.get_profile("77").and_then(|p| p.name.as_deref()), Some("seven"));
        assert_eq!(ledger.archive().len(), 1);
    }
}
