use std::sync::Arc;

use engine::config::WorkerSettings;
use engine::{QueryError, VolatilityEngine};
use volatility::fixtures::GarchPathGenerator;
use volatility::{ModelConfig, VolRegime};

use mock_store::MockVolatilityStore;

async fn seeded_engine(store: Arc<MockVolatilityStore>) -> VolatilityEngine {
    let cfg = ModelConfig {
        window_len: 4,
        ..Default::default()
    };
    let engine = VolatilityEngine::new(cfg, store, WorkerSettings::default()).unwrap();

    for (pair, seed) in [("BTC/USDT", 1), ("ETH/USDT", 2)] {
        for (ts, price) in GarchPathGenerator::new(seed, 100.0).ticks(20, 1, 1) {
            engine.ingest(pair, price, Some(ts)).await.unwrap();
        }
    }
    engine
}

#[tokio::test]
async fn latest_and_history_reflect_persisted_records() {
    let store = Arc::new(MockVolatilityStore::default());
    let engine = seeded_engine(store.clone()).await;
    let q = engine.query();

    let all = q.get_history("BTC/USDT", None).await.unwrap();
    assert_eq!(all.len(), 16);
    assert!(all.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    let latest = q.get_latest("BTC/USDT").await.unwrap();
    assert_eq!(Some(&latest), all.last());

    let recent = q.get_history("BTC/USDT", Some(3)).await.unwrap();
    assert_eq!(recent, all[13..].to_vec());
}

#[tokio::test]
async fn unknown_pair_is_not_found_but_has_empty_history() {
    let store = Arc::new(MockVolatilityStore::default());
    let engine = seeded_engine(store).await;
    let q = engine.query();

    assert!(matches!(
        q.get_latest("DOGE/USDT").await,
        Err(QueryError::NotFound { .. })
    ));
    assert!(q.get_history("DOGE/USDT", Some(5)).await.unwrap().is_empty());
    assert!(matches!(
        q.get_term_structure("DOGE/USDT", &[1]).await,
        Err(QueryError::NotFound { .. })
    ));
}

#[tokio::test]
async fn term_structure_starts_at_latest_forecast_and_reverts() {
    let store = Arc::new(MockVolatilityStore::default());
    let engine = seeded_engine(store).await;
    let q = engine.query();

    let latest = q.get_latest("ETH/USDT").await.unwrap();
    let points = q
        .get_term_structure("ETH/USDT", &[1, 10, 10_000])
        .await
        .unwrap();

    assert_eq!(points.len(), 3);
    assert!((points[0].volatility - latest.garch_forecast).abs() < 1e-12);

    let long_run = engine.model().forecaster().params().long_run_variance();
    assert!((points[2].variance - long_run).abs() < 1e-12);

    let gap = |v: f64| (v - long_run).abs();
    assert!(gap(points[1].variance) <= gap(points[0].variance));
}

#[tokio::test]
async fn regime_and_pair_listing() {
    let store = Arc::new(MockVolatilityStore::default());
    let engine = seeded_engine(store).await;
    let q = engine.query();

    let latest = q.get_latest("BTC/USDT").await.unwrap();
    assert_eq!(
        q.get_regime("BTC/USDT").await.unwrap(),
        VolRegime::classify(latest.realized_vol)
    );

    assert_eq!(q.list_pairs().await.unwrap(), vec!["BTC/USDT", "ETH/USDT"]);
}

#[tokio::test]
async fn read_failures_are_surfaced() {
    let store = Arc::new(MockVolatilityStore::default());
    let engine = seeded_engine(store.clone()).await;
    let q = engine.query();

    store.set_fail_reads(true);

    assert!(matches!(
        q.get_latest("BTC/USDT").await,
        Err(QueryError::ReadFailure { .. })
    ));
    assert!(matches!(
        q.get_history("BTC/USDT", None).await,
        Err(QueryError::ReadFailure { .. })
    ));
    assert!(matches!(
        q.list_pairs().await,
        Err(QueryError::ListFailure(_))
    ));
}
