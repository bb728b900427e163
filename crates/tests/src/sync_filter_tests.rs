//! Sync-consistency filtering inside the relay path and under concurrency.

use crate::mock_infrastructure::*;
use std::{sync::Arc, time::Duration};
use switchboard_core::{
    runtime::SwitchboardRuntime,
    store::MemoryStore,
    sync::{SyncConfig, SyncFilter},
    types::GatewaySettings,
};

const SYNC_CHECK: &str = r#"{"method":"eth_blockNumber","id":1,"jsonrpc":"2.0","params":[]}"#;

async fn sync_runtime(client: Arc<ScriptedRelayClient>, probe: Arc<CountingProbe>) -> SwitchboardRuntime {
    let mut config = test_config();
    config.blockchains[0].sync_check = Some(SYNC_CHECK.to_string());
    SwitchboardRuntime::builder()
        .with_config(config)
        .with_relay_client(client)
        .with_liveness_probe(probe)
        .with_metrics_sink(Arc::new(RecordingSink::default()))
        .disable_store_sweeper()
        .build()
        .await
        .expect("Failed to build runtime")
}

#[tokio::test]
async fn test_relays_only_reach_in_sync_nodes() {
    let client = Arc::new(ScriptedRelayClient::new(
        nodes(&["node-a", "node-b", "node-c"]),
        NodeBehavior::Respond(BLOCK_NUMBER_RESPONSE.to_string()),
    ));
    let probe = Arc::new(CountingProbe::new(1));
    let runtime = sync_runtime(client.clone(), probe.clone()).await;
    let app = test_application(APP_ID, GatewaySettings::default());

    for _ in 0..5 {
        let response = runtime
            .dispatcher()
            .send_relay(relay_request(app.clone(), BLOCK_NUMBER_REQUEST))
            .await
            .unwrap();
        assert_eq!(response.service_node.as_deref(), Some("node-a"));
    }

    assert_eq!(client.attempts_to("node-a"), 5);
    // the verdict is cached per node set, so the probe runs once
    assert_eq!(probe.calls(), 1);
}

#[tokio::test]
async fn test_chain_without_sync_check_skips_probe() {
    let client = Arc::new(ScriptedRelayClient::new(
        nodes(&["node-a", "node-b"]),
        NodeBehavior::Respond(BLOCK_NUMBER_RESPONSE.to_string()),
    ));
    let probe = Arc::new(CountingProbe::new(1));
    let runtime = SwitchboardRuntime::builder()
        .with_config(test_config())
        .with_relay_client(client)
        .with_liveness_probe(probe.clone())
        .with_metrics_sink(Arc::new(RecordingSink::default()))
        .disable_store_sweeper()
        .build()
        .await
        .expect("Failed to build runtime");
    let app = test_application(APP_ID, GatewaySettings::default());

    runtime.dispatcher().send_relay(relay_request(app, BLOCK_NUMBER_REQUEST)).await.unwrap();
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn test_concurrent_uncached_calls_share_one_probe() {
    let store = Arc::new(MemoryStore::new());
    let probe = Arc::new(CountingProbe::new(1).with_delay(Duration::from_millis(200)));
    let filter = SyncFilter::new(store, probe.clone(), SyncConfig::default());
    let candidates = nodes(&["node-a", "node-b", "node-c"]);

    let (first, second) = tokio::join!(
        filter.consensus_filter(&candidates, CHAIN_HASH, SYNC_CHECK),
        filter.consensus_filter(&candidates, CHAIN_HASH, SYNC_CHECK),
    );

    assert_eq!(first.len(), 1);
    assert_eq!(second, candidates, "lock holder in flight, second caller gets the full set");
    assert_eq!(probe.calls(), 1);

    let cached = filter.consensus_filter(&candidates, CHAIN_HASH, SYNC_CHECK).await;
    assert_eq!(cached, first);
    assert_eq!(probe.calls(), 1);
}

#[tokio::test]
async fn test_node_order_does_not_change_cache_entry() {
    let store = Arc::new(MemoryStore::new());
    let probe = Arc::new(CountingProbe::new(2));
    let filter = SyncFilter::new(store, probe.clone(), SyncConfig::default());

    let forward = nodes(&["node-a", "node-b", "node-c"]);
    let mut reversed = forward.clone();
    reversed.reverse();

    let first = filter.consensus_filter(&forward, CHAIN_HASH, SYNC_CHECK).await;
    let second = filter.consensus_filter(&reversed, CHAIN_HASH, SYNC_CHECK).await;

    assert_eq!(first, second);
    assert_eq!(probe.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cached_verdict_expires() {
    let store = Arc::new(MemoryStore::new());
    let probe = Arc::new(CountingProbe::new(1));
    let config = SyncConfig { cache_ttl_seconds: 300, lock_ttl_seconds: 10 };
    let filter = SyncFilter::new(store, probe.clone(), config);
    let candidates = nodes(&["node-a", "node-b"]);

    filter.consensus_filter(&candidates, CHAIN_HASH, SYNC_CHECK).await;
    tokio::time::advance(Duration::from_secs(299)).await;
    filter.consensus_filter(&candidates, CHAIN_HASH, SYNC_CHECK).await;
    assert_eq!(probe.calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    filter.consensus_filter(&candidates, CHAIN_HASH, SYNC_CHECK).await;
    assert_eq!(probe.calls(), 2);
}
