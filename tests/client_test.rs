//! Cache-first lookup semantics of the tenant client: pacer fallthrough on
//! miss, key-map builds, and the unknown-key policy.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use bws_cache::client::CachedTenantClient;
use bws_cache::error::ErrorKind;
use bws_cache::metrics::Metrics;
use bws_cache::pacer::RequestPacer;

use common::{entry, registry_with, test_region, MockUpstream};

fn client_with(
    upstream: Arc<MockUpstream>,
) -> (CachedTenantClient, Arc<MockUpstream>, Arc<Metrics>) {
    let registry = registry_with(upstream.clone());
    let tenant = registry.get_or_create("tok", &test_region());
    let pacer = RequestPacer::start(Duration::from_millis(1));
    let metrics = Arc::new(Metrics::new());
    (
        CachedTenantClient::new(tenant, pacer, metrics.clone()),
        upstream,
        metrics,
    )
}

#[tokio::test]
async fn cold_lookup_by_id_fetches_once_then_serves_from_cache() {
    let (client, upstream, metrics) =
        client_with(MockUpstream::with_secrets([entry(1, "K1", "v1")]));
    let id = Uuid::from_u128(1);

    let first = client.get_by_id(id).await.unwrap();
    assert_eq!(first.key, "K1");
    assert_eq!(first.value, "v1");
    assert_eq!(upstream.get_calls.load(Ordering::SeqCst), 1);
    assert!(metrics.render().0.contains("cache_miss{type=\"secret\"} 1"));

    // Second lookup is a pure cache hit; no further pacer submission.
    let second = client.get_by_id(id).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(upstream.get_calls.load(Ordering::SeqCst), 1);
    assert!(metrics.render().0.contains("cache_hits{type=\"secret\"} 1"));
}

#[tokio::test]
async fn missing_secret_surfaces_as_missing() {
    let (client, upstream, _metrics) = client_with(MockUpstream::new());

    let err = client.get_by_id(Uuid::from_u128(9)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingSecret);
    assert_eq!(upstream.get_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn key_lookup_builds_the_map_once() {
    let (client, upstream, _metrics) = client_with(MockUpstream::with_secrets([
        entry(1, "K1", "v1"),
        entry(2, "K2", "v2"),
    ]));

    let found = client.get_by_key("K2").await.unwrap();
    assert_eq!(found.id, Uuid::from_u128(2));
    assert_eq!(found.value, "v2");
    assert_eq!(upstream.list_calls.load(Ordering::SeqCst), 1);
    // The enumeration installed full entries, so no by-id fetch was needed.
    assert_eq!(upstream.get_calls.load(Ordering::SeqCst), 0);

    // A second key resolves against the already-built map.
    let other = client.get_by_key("K1").await.unwrap();
    assert_eq!(other.id, Uuid::from_u128(1));
    assert_eq!(upstream.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_key_does_not_rebuild_the_map() {
    let (client, upstream, _metrics) = client_with(MockUpstream::with_secrets([
        entry(1, "K1", "v1"),
        entry(2, "K2", "v2"),
    ]));

    client.get_by_key("K2").await.unwrap();

    let err = client.get_by_key("K3").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownKey);
    assert_eq!(upstream.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn authentication_happens_once_across_lookups() {
    let (client, upstream, _metrics) = client_with(MockUpstream::with_secrets([
        entry(1, "K1", "v1"),
        entry(2, "K2", "v2"),
    ]));

    client.get_by_key("K1").await.unwrap();
    client.get_by_id(Uuid::from_u128(2)).await.unwrap();
    client.get_by_id(Uuid::from_u128(2)).await.unwrap();

    assert_eq!(upstream.auth_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reset_reports_pre_reset_sizes() {
    let (client, _upstream, _metrics) = client_with(MockUpstream::with_secrets([
        entry(1, "K1", "v1"),
        entry(2, "K2", "v2"),
    ]));

    client.get_by_key("K1").await.unwrap();
    assert_eq!(client.stats().secret_cache_size, 2);

    let before = client.reset();
    assert_eq!(before.secret_cache_size, 2);
    assert_eq!(before.keymap_cache_size, 2);
    assert_eq!(client.stats().secret_cache_size, 0);
    assert_eq!(client.stats().keymap_cache_size, 0);
}
