//! Aggregator fan-out, selection, caching and expiry behavior against
//! scriptable providers and the in-memory cache.

mod common;

use std::sync::Arc;
use std::time::Duration;

use dustsweep_backend::bridges::{
    AggregatorConfig, BridgeAggregator, BridgeError, BridgePriority, BridgeProvider,
    BridgeQuoteRequest, BridgeStatus,
};
use dustsweep_backend::cache::{Cache, MemoryCache};
use dustsweep_backend::types::Chain;
use ethereum_types::U256;

use common::MockProvider;

fn aggregator_with(providers: Vec<Arc<dyn BridgeProvider>>) -> BridgeAggregator {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    BridgeAggregator::new(providers, cache, AggregatorConfig::default())
}

fn request(amount: u64, priority: Option<BridgePriority>) -> BridgeQuoteRequest {
    BridgeQuoteRequest {
        source_chain: Chain::Arbitrum,
        destination_chain: Chain::Base,
        source_token: "0xaf88d065e77c8cC2239327C5EDb3A432268e5831".into(),
        destination_token: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".into(),
        amount: U256::from(amount),
        sender: "0xabc0000000000000000000000000000000000001".into(),
        recipient: "0xabc0000000000000000000000000000000000001".into(),
        slippage: None,
        priority,
    }
}

#[tokio::test]
async fn cost_priority_picks_highest_net_output() {
    let cheap = Arc::new(MockProvider::new("cheap").with_fees(100, 0.1).with_time(600));
    let fast = Arc::new(MockProvider::new("fast").with_fees(5_000, 1.0).with_time(30));
    let aggregator = aggregator_with(vec![cheap, fast]);

    let quote = aggregator
        .get_quote(&request(1_000_000, Some(BridgePriority::Cost)))
        .await
        .expect("expected a quote");
    assert_eq!(quote.provider, "cheap");
}

#[tokio::test]
async fn speed_priority_picks_fastest() {
    let cheap = Arc::new(MockProvider::new("cheap").with_fees(100, 0.1).with_time(600));
    let fast = Arc::new(MockProvider::new("fast").with_fees(5_000, 1.0).with_time(30));
    let aggregator = aggregator_with(vec![cheap, fast]);

    let quote = aggregator
        .get_quote(&request(1_000_000, Some(BridgePriority::Speed)))
        .await
        .expect("expected a quote");
    assert_eq!(quote.provider, "fast");
}

#[tokio::test]
async fn failing_provider_is_isolated() {
    let broken = Arc::new(MockProvider::new("broken").failing());
    let healthy = Arc::new(MockProvider::new("healthy"));
    let aggregator = aggregator_with(vec![broken.clone(), healthy]);

    let quote = aggregator.get_quote(&request(1_000_000, None)).await;
    assert_eq!(quote.unwrap().provider, "healthy");
    assert_eq!(broken.quote_calls(), 1);
}

#[tokio::test]
async fn no_usable_provider_yields_none() {
    let broken = Arc::new(MockProvider::new("broken").failing());
    let aggregator = aggregator_with(vec![broken]);
    assert!(aggregator.get_quote(&request(1_000_000, None)).await.is_none());

    let unsupported = Arc::new(MockProvider::new("nope").unsupported());
    let aggregator = aggregator_with(vec![unsupported]);
    assert!(aggregator.get_quote(&request(1_000_000, None)).await.is_none());
}

#[tokio::test]
async fn route_support_answers_are_memoized() {
    let provider = Arc::new(MockProvider::new("mock"));
    let aggregator = aggregator_with(vec![provider.clone()]);

    assert!(aggregator.supports_route(Chain::Arbitrum, Chain::Base, "0xToken").await);
    assert!(aggregator.supports_route(Chain::Arbitrum, Chain::Base, "0xToken").await);
    // Second call must come from the cache
    assert_eq!(provider.support_calls(), 1);
}

#[tokio::test]
async fn build_transaction_is_deterministic_while_quote_is_valid() {
    let provider = Arc::new(MockProvider::new("mock"));
    let aggregator = aggregator_with(vec![provider]);

    let quote = aggregator
        .get_quote(&request(1_000_000, None))
        .await
        .expect("expected a quote");

    let first = aggregator.build_transaction(&quote).await.unwrap();
    let second = aggregator.build_transaction(&quote).await.unwrap();
    assert_eq!(first.data, second.data);
    assert_eq!(first.to, second.to);
    assert_eq!(first.quote_id, quote.quote_id);
}

#[tokio::test]
async fn build_transaction_fails_once_quote_context_expires() {
    let provider = Arc::new(MockProvider::new("mock").with_quote_validity_ms(2_000));
    let aggregator = aggregator_with(vec![provider]);

    let quote = aggregator
        .get_quote(&request(1_000_000, None))
        .await
        .expect("expected a quote");

    tokio::time::sleep(Duration::from_millis(2_200)).await;

    match aggregator.build_transaction(&quote).await {
        Err(BridgeError::QuoteExpired) => {}
        other => panic!("expected QuoteExpired, got {:?}", other.map(|t| t.quote_id)),
    }
}

#[tokio::test]
async fn build_transaction_rejects_unknown_quote_ids() {
    let provider = Arc::new(MockProvider::new("mock"));
    let aggregator = aggregator_with(vec![provider.clone()]);

    let mut quote = aggregator
        .get_quote(&request(1_000_000, None))
        .await
        .expect("expected a quote");
    quote.quote_id = "mock-0-ffffff".into();

    assert!(matches!(
        aggregator.build_transaction(&quote).await,
        Err(BridgeError::QuoteExpired)
    ));
}

#[tokio::test]
async fn get_all_quotes_orders_by_priority() {
    let cheap = Arc::new(MockProvider::new("cheap").with_fees(100, 0.1).with_time(600));
    let fast = Arc::new(MockProvider::new("fast").with_fees(5_000, 1.0).with_time(30));
    let aggregator = aggregator_with(vec![cheap, fast]);

    let by_cost = aggregator
        .get_all_quotes(&request(1_000_000, Some(BridgePriority::Cost)))
        .await;
    assert_eq!(by_cost.len(), 2);
    assert_eq!(by_cost[0].provider, "cheap");

    let by_speed = aggregator
        .get_all_quotes(&request(1_000_000, Some(BridgePriority::Speed)))
        .await;
    assert_eq!(by_speed[0].provider, "fast");
}

#[tokio::test]
async fn status_errors_degrade_to_pending_receipt() {
    let broken = Arc::new(MockProvider::new("broken").failing());
    let aggregator = aggregator_with(vec![broken]);

    let receipt = aggregator
        .get_status("0xdeadbeef", Chain::Arbitrum, Some("broken"))
        .await;
    assert_eq!(receipt.status, BridgeStatus::Pending);
    assert!(receipt.error.is_some());

    // Unknown hint degrades the same way instead of panicking
    let receipt = aggregator
        .get_status("0xdeadbeef", Chain::Arbitrum, Some("missing"))
        .await;
    assert_eq!(receipt.status, BridgeStatus::Pending);
}

#[tokio::test]
async fn status_without_hint_probes_providers() {
    let provider = Arc::new(MockProvider::new("mock"));
    let aggregator = aggregator_with(vec![provider]);

    let receipt = aggregator.get_status("0xdeadbeef", Chain::Arbitrum, None).await;
    assert_eq!(receipt.status, BridgeStatus::Bridging);
    assert_eq!(receipt.provider, "mock");
}
