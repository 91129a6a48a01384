use std::sync::Arc;
use std::sync::atomic::Ordering;

use engine::config::WorkerSettings;
use engine::{EngineConfig, EngineError, VolatilityEngine};
use history::VolatilityStore;
use volatility::fixtures::GarchPathGenerator;
use volatility::pipeline::{PairPipeline, VolatilityModel};
use volatility::{InvalidTick, ModelConfig, ModelConfigError, VolatilityRecord};

use mock_store::MockVolatilityStore;

fn model(window_len: usize) -> ModelConfig {
    ModelConfig {
        window_len,
        ..Default::default()
    }
}

fn engine_on(store: Arc<MockVolatilityStore>, window_len: usize) -> VolatilityEngine {
    VolatilityEngine::new(model(window_len), store, WorkerSettings::default()).unwrap()
}

async fn ingest_all(
    engine: &VolatilityEngine,
    pair: &str,
    ticks: &[(u64, f64)],
) -> Vec<VolatilityRecord> {
    let mut out = Vec::new();
    for &(ts, price) in ticks {
        if let Some(r) = engine.ingest(pair, price, Some(ts)).await.unwrap() {
            out.push(r);
        }
    }
    out
}

#[tokio::test]
async fn neo_usdt_ticks_produce_three_persisted_records() {
    let store = Arc::new(MockVolatilityStore::default());
    let engine = engine_on(store.clone(), 2);

    let ticks: Vec<(u64, f64)> = [15.0, 15.1, 14.9, 15.2, 15.0]
        .into_iter()
        .enumerate()
        .map(|(i, p)| (i as u64 + 1, p))
        .collect();

    let emitted = ingest_all(&engine, "NEO/USDT", &ticks).await;

    assert_eq!(emitted.len(), 3);
    assert_eq!(emitted[0].timestamp, 3);
    assert_eq!(store.records("NEO/USDT").await, emitted);

    let c = engine.counters().snapshot();
    assert_eq!(c.ticks_accepted, 5);
    assert_eq!(c.records_emitted, 3);
    assert_eq!(c.records_committed, 3);
    assert_eq!(c.ticks_rejected, 0);
}

#[tokio::test]
async fn out_of_order_tick_is_rejected_and_history_unchanged() {
    let store = Arc::new(MockVolatilityStore::default());
    let engine = engine_on(store.clone(), 1);

    engine.ingest("X", 10.0, Some(4)).await.unwrap();
    engine.ingest("X", 10.5, Some(5)).await.unwrap();
    let before = store.records("X").await;
    assert_eq!(before.len(), 1);

    let err = engine.ingest("X", 11.0, Some(3)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTick(InvalidTick::NonMonotonic {
            ts_ms: 3,
            last_ts_ms: 5
        })
    ));
    assert_eq!(store.records("X").await, before);
    assert_eq!(engine.counters().snapshot().ticks_rejected, 1);

    // The pair carries on from ts 5.
    let next = engine.ingest("X", 10.8, Some(6)).await.unwrap().unwrap();
    assert_eq!(next.timestamp, 6);
}

#[tokio::test]
async fn bad_prices_and_empty_pairs_are_rejected() {
    let store = Arc::new(MockVolatilityStore::default());
    let engine = engine_on(store.clone(), 2);

    assert!(matches!(
        engine.ingest("", 1.0, Some(1)).await,
        Err(EngineError::InvalidTick(InvalidTick::EmptyPair))
    ));
    for price in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(
            engine.ingest("X", price, Some(1)).await,
            Err(EngineError::InvalidTick(InvalidTick::NonPositivePrice { .. }))
        ));
    }

    assert_eq!(engine.counters().snapshot().ticks_rejected, 5);
    assert_eq!(engine.counters().snapshot().ticks_accepted, 0);
}

#[tokio::test]
async fn omitted_timestamps_are_assigned_and_increasing() {
    let store = Arc::new(MockVolatilityStore::default());
    let engine = engine_on(store.clone(), 1);

    engine.ingest("X", 1.0, None).await.unwrap();
    let a = engine.ingest("X", 1.1, None).await.unwrap().unwrap();
    let b = engine.ingest("X", 1.2, None).await.unwrap().unwrap();

    assert!(b.timestamp > a.timestamp);
}

#[test]
fn invalid_model_config_is_fatal() {
    let store: Arc<dyn VolatilityStore> = Arc::new(MockVolatilityStore::default());

    let non_stationary = ModelConfig {
        garch: volatility::forecaster::GarchParams {
            omega: 0.0001,
            alpha: 0.3,
            beta: 0.8,
        },
        ..Default::default()
    };

    assert!(matches!(
        VolatilityEngine::new(non_stationary, store.clone(), WorkerSettings::default()),
        Err(EngineError::InvalidModelConfig(ModelConfigError::NonStationary { .. }))
    ));

    assert!(matches!(
        VolatilityEngine::new(model(0), store, WorkerSettings::default()),
        Err(EngineError::InvalidModelConfig(ModelConfigError::EmptyWindow))
    ));
}

/// The engine's output for a pair equals a bare pipeline fed the same ticks,
/// even with many pairs running at once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_pairs_match_sequential_pipelines() {
    let store = Arc::new(MockVolatilityStore::default());
    let engine = Arc::new(engine_on(store.clone(), 5));

    let pairs: Vec<String> = (0..8).map(|i| format!("PAIR{i}/USDT")).collect();

    let tasks = pairs.iter().enumerate().map(|(i, pair)| {
        let engine = engine.clone();
        let pair = pair.clone();
        tokio::spawn(async move {
            let ticks = GarchPathGenerator::new(i as u64, 100.0).ticks(40, 1, 1);
            ingest_all(&engine, &pair, &ticks).await
        })
    });
    let results = futures::future::join_all(tasks).await;

    let m = Arc::new(VolatilityModel::new(model(5)).unwrap());
    for (i, (pair, res)) in pairs.iter().zip(results).enumerate() {
        let emitted = res.unwrap();

        let mut p = PairPipeline::new(pair.clone(), m.clone());
        let expected: Vec<_> = GarchPathGenerator::new(i as u64, 100.0)
            .ticks(40, 1, 1)
            .into_iter()
            .filter_map(|(ts, px)| p.process(px, Some(ts), 0).unwrap().record)
            .collect();

        assert_eq!(emitted, expected);
        assert_eq!(store.records(pair).await, expected);
    }

    assert_eq!(engine.active_pairs(), pairs);
}

/// Restarting from a JSONL log continues exactly where an uninterrupted run
/// would be.
#[tokio::test]
async fn restart_from_jsonl_matches_uninterrupted_run() {
    let ticks = GarchPathGenerator::new(99, 15.0).ticks(60, 1_000, 1_000);

    let interrupted = tempfile::tempdir().unwrap();
    let uninterrupted = tempfile::tempdir().unwrap();

    let cfg = |dir: &std::path::Path| EngineConfig {
        data_dir: dir.to_path_buf(),
        model: model(10),
        ..Default::default()
    };

    {
        let engine = VolatilityEngine::from_config(&cfg(interrupted.path()))
            .await
            .unwrap();
        ingest_all(&engine, "NEO/USDT", &ticks[..35]).await;
    }
    {
        let engine = VolatilityEngine::from_config(&cfg(interrupted.path()))
            .await
            .unwrap();
        ingest_all(&engine, "NEO/USDT", &ticks[35..]).await;
    }

    let engine = VolatilityEngine::from_config(&cfg(uninterrupted.path()))
        .await
        .unwrap();
    ingest_all(&engine, "NEO/USDT", &ticks).await;

    let resumed = VolatilityEngine::from_config(&cfg(interrupted.path()))
        .await
        .unwrap()
        .query()
        .get_history("NEO/USDT", None)
        .await
        .unwrap();
    let reference = engine.query().get_history("NEO/USDT", None).await.unwrap();

    assert_eq!(resumed.len(), 50);
    assert_eq!(resumed, reference);
}

/// After a restart the stale timestamp guard still holds.
#[tokio::test]
async fn restart_restores_normalizer_clock() {
    let store = Arc::new(MockVolatilityStore::default());
    {
        let engine = engine_on(store.clone(), 1);
        ingest_all(&engine, "X", &[(1, 1.0), (2, 1.1), (3, 1.2)]).await;
    }

    let engine = engine_on(store.clone(), 1);
    assert!(matches!(
        engine.ingest("X", 1.3, Some(3)).await,
        Err(EngineError::InvalidTick(InvalidTick::NonMonotonic { .. }))
    ));
    // Window of one return is rebuilt, so the next tick emits immediately.
    assert!(engine.ingest("X", 1.3, Some(4)).await.unwrap().is_some());
}

#[tokio::test]
async fn failed_write_is_retried_in_order() {
    let store = Arc::new(MockVolatilityStore::failing());
    let engine = engine_on(store.clone(), 1);

    assert_eq!(engine.ingest("X", 1.0, Some(1)).await.unwrap(), None);

    let err = engine.ingest("X", 1.1, Some(2)).await.unwrap_err();
    let EngineError::PersistenceWriteFailure { record, .. } = err else {
        panic!("expected write failure, got {err:?}");
    };
    assert_eq!(record.timestamp, 2);

    // State moved on regardless; ts 3 is also emitted and queued.
    assert!(engine.ingest("X", 1.2, Some(3)).await.is_err());
    assert!(store.records("X").await.is_empty());
    assert_eq!(engine.counters().snapshot().persistence_failures, 2);

    store.set_fail_appends(false);
    let r4 = engine.ingest("X", 1.15, Some(4)).await.unwrap().unwrap();

    let ts: Vec<u64> = store.records("X").await.iter().map(|r| r.timestamp).collect();
    assert_eq!(ts, vec![2, 3, 4]);
    assert_eq!(store.records("X").await[2], r4);
    assert_eq!(engine.retry_pending("X").await.unwrap(), 0);
}

#[tokio::test]
async fn retry_pending_flushes_backlog() {
    let store = Arc::new(MockVolatilityStore::failing());
    let engine = engine_on(store.clone(), 1);

    engine.ingest("X", 1.0, Some(1)).await.unwrap();
    let EngineError::PersistenceWriteFailure { record, .. } =
        engine.ingest("X", 1.1, Some(2)).await.unwrap_err()
    else {
        panic!("expected write failure");
    };

    assert!(matches!(
        engine.retry_pending("X").await,
        Err(EngineError::PersistenceWriteFailure { .. })
    ));

    store.set_fail_appends(false);
    assert_eq!(engine.retry_pending("X").await.unwrap(), 1);
    assert_eq!(store.records("X").await, vec![*record]);

    // Unknown pairs have nothing pending and do not spawn workers.
    assert_eq!(engine.retry_pending("Y").await.unwrap(), 0);
    assert_eq!(engine.active_pairs(), vec!["X"]);
}

/// A write that landed but was reported as failed is not duplicated on retry.
#[tokio::test]
async fn redelivery_after_lost_ack_is_a_noop() {
    let store = Arc::new(MockVolatilityStore::default());
    store.set_fail_after_commit(true);
    let engine = engine_on(store.clone(), 1);

    engine.ingest("X", 1.0, Some(1)).await.unwrap();
    assert!(engine.ingest("X", 1.1, Some(2)).await.is_err());
    assert_eq!(store.records("X").await.len(), 1);

    store.set_fail_after_commit(false);
    assert_eq!(engine.retry_pending("X").await.unwrap(), 1);

    assert_eq!(store.records("X").await.len(), 1);
    assert_eq!(engine.counters().snapshot().duplicate_appends, 1);
}

#[tokio::test]
async fn full_backlog_refuses_ticks_without_touching_state() {
    let store = Arc::new(MockVolatilityStore::failing());
    let settings = WorkerSettings {
        max_pending_records: 2,
        ..Default::default()
    };
    let engine = VolatilityEngine::new(model(1), store.clone(), settings).unwrap();

    engine.ingest("X", 1.0, Some(1)).await.unwrap();
    assert!(engine.ingest("X", 1.1, Some(2)).await.is_err());
    assert!(engine.ingest("X", 1.2, Some(3)).await.is_err());

    assert!(matches!(
        engine.ingest("X", 1.3, Some(4)).await,
        Err(EngineError::BacklogFull { pending: 2, .. })
    ));

    // ts 4 was never applied, so it is still acceptable once storage recovers.
    store.set_fail_appends(false);
    let r = engine.ingest("X", 1.3, Some(4)).await.unwrap().unwrap();
    assert_eq!(r.timestamp, 4);

    let ts: Vec<u64> = store.records("X").await.iter().map(|r| r.timestamp).collect();
    assert_eq!(ts, vec![2, 3, 4]);
}

#[tokio::test]
async fn unreadable_history_fails_worker_start() {
    let store = Arc::new(MockVolatilityStore::default());
    store.set_fail_reads(true);
    let engine = engine_on(store.clone(), 2);

    assert!(matches!(
        engine.ingest("X", 1.0, Some(1)).await,
        Err(EngineError::PersistenceReadFailure { .. })
    ));
    assert!(engine.active_pairs().is_empty());

    store.set_fail_reads(false);
    assert!(engine.ingest("X", 1.0, Some(1)).await.is_ok());
    assert_eq!(store.append_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ceiling_hits_are_counted_and_processing_continues() {
    let store = Arc::new(MockVolatilityStore::default());
    let cfg = ModelConfig {
        window_len: 1,
        variance_ceiling: 0.001,
        ..Default::default()
    };
    let engine = VolatilityEngine::new(cfg, store.clone(), WorkerSettings::default()).unwrap();

    engine.ingest("X", 100.0, Some(1)).await.unwrap();
    let r = engine.ingest("X", 300.0, Some(2)).await.unwrap().unwrap();

    assert_eq!(engine.counters().snapshot().ceiling_hits, 1);
    assert!((r.garch_forecast - 0.001f64.sqrt()).abs() < 1e-12);
    assert!(engine.ingest("X", 301.0, Some(3)).await.unwrap().is_some());
}
