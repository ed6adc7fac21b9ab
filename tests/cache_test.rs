//! Integration tests for the metadata cache.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedTransport, SHOP_METADATA, SHOP_METADATA_V2};
use edm_forms::{CacheConfig, CacheEvent, MetadataCache, MetadataError};

const ENDPOINT: &str = "http://shop.test/odata";
const FETCH_DELAY: Duration = Duration::from_millis(30);

fn cache_over(transport: &Arc<ScriptedTransport>, config: CacheConfig) -> MetadataCache {
    MetadataCache::with_config(transport.clone(), config)
}

fn shop_transport() -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::new(&[SHOP_METADATA], FETCH_DELAY))
}

// === Freshness Tests ===

mod freshness {
    use super::*;

    #[tokio::test]
    async fn second_get_is_a_hit() {
        let transport = shop_transport();
        let cache = cache_over(&transport, CacheConfig::default());

        let first = cache.get(ENDPOINT, "Order", false).await.unwrap();
        let second = cache.get(ENDPOINT, "Order", false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn one_fetch_serves_every_entity() {
        let transport = shop_transport();
        let cache = cache_over(&transport, CacheConfig::default());

        cache.get(ENDPOINT, "Order", false).await.unwrap();
        cache.get(ENDPOINT, "Customer", false).await.unwrap();
        cache.get(ENDPOINT, "OrderLine", false).await.unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn trailing_slash_is_same_endpoint() {
        let transport = shop_transport();
        let cache = cache_over(&transport, CacheConfig::default());

        cache.get(ENDPOINT, "Order", false).await.unwrap();
        cache
            .get(&format!("{ENDPOINT}/"), "Order", false)
            .await
            .unwrap();

        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let transport = shop_transport();
        let config = CacheConfig::default().ttl(Duration::from_millis(60));
        let cache = cache_over(&transport, config);

        cache.get(ENDPOINT, "Order", false).await.unwrap();
        assert!(cache.peek(ENDPOINT, "Order").is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.peek(ENDPOINT, "Order").is_none());

        cache.get(ENDPOINT, "Order", false).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn force_refresh_always_fetches() {
        let transport = shop_transport();
        let cache = cache_over(&transport, CacheConfig::default());

        cache.get(ENDPOINT, "Order", false).await.unwrap();
        cache.get(ENDPOINT, "Order", true).await.unwrap();
        cache.get(ENDPOINT, "Order", true).await.unwrap();

        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn records_expire_after_ttl() {
        let transport = shop_transport();
        let ttl = Duration::from_secs(60);
        let cache = cache_over(&transport, CacheConfig::default().ttl(ttl));

        cache.get(ENDPOINT, "Order", false).await.unwrap();
        let record = cache.peek(ENDPOINT, "Order").unwrap();

        assert_eq!(record.expires_at - record.fetched_at, ttl);
        assert_eq!(record.data.name, "Order");
    }
}

// === Coalescing Tests ===

mod coalescing {
    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let transport = shop_transport();
        let cache = cache_over(&transport, CacheConfig::default());

        let (order, customer, again) = tokio::join!(
            cache.get(ENDPOINT, "Order", false),
            cache.get(ENDPOINT, "Customer", false),
            cache.get(ENDPOINT, "Order", false),
        );

        assert_eq!(order.unwrap().name, "Order");
        assert_eq!(customer.unwrap().name, "Customer");
        assert_eq!(again.unwrap().name, "Order");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn force_refresh_joins_in_flight_fetch() {
        let transport = shop_transport();
        let cache = cache_over(&transport, CacheConfig::default());

        let (plain, forced) = tokio::join!(
            cache.get(ENDPOINT, "Order", false),
            cache.get(ENDPOINT, "Order", true),
        );

        assert!(plain.is_ok() && forced.is_ok());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn spawned_callers_share_one_fetch() {
        let transport = shop_transport();
        let cache = cache_over(&transport, CacheConfig::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get(ENDPOINT, "Order", false).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn fetch_older_than_window_is_not_joined() {
        let transport = Arc::new(ScriptedTransport::new(
            &[SHOP_METADATA],
            Duration::from_millis(120),
        ));
        let config = CacheConfig::default().coalesce_window(Duration::from_millis(20));
        let cache = cache_over(&transport, config);

        let late = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cache.get(ENDPOINT, "Order", true).await
        };
        let (first, second) = tokio::join!(cache.get(ENDPOINT, "Order", false), late);

        assert!(first.is_ok() && second.is_ok());
        assert_eq!(transport.calls(), 2);
    }
}

// === Ordering Tests ===

mod ordering {
    use super::*;

    #[tokio::test]
    async fn stale_fetch_completing_late_is_discarded() {
        // First fetch is slow and carries the old document; the second is
        // fast and carries the new one, which no longer has Order.
        let transport = Arc::new(ScriptedTransport::with_delays(&[
            (SHOP_METADATA, Duration::from_millis(150)),
            (SHOP_METADATA_V2, Duration::from_millis(10)),
        ]));
        let config = CacheConfig::default().coalesce_window(Duration::from_millis(10));
        let cache = cache_over(&transport, config);

        let newer = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cache.get(ENDPOINT, "Customer", true).await
        };
        let (older_customer, older_order, newer) = tokio::join!(
            cache.get(ENDPOINT, "Customer", false),
            cache.get(ENDPOINT, "Order", false),
            newer,
        );

        assert!(newer.unwrap().property("Website").is_some());
        // Slow callers are answered from the fresher records
        assert!(older_customer.unwrap().property("Website").is_some());
        assert!(matches!(
            older_order,
            Err(MetadataError::EntityNotFound { .. })
        ));

        let record = cache.peek(ENDPOINT, "Customer").unwrap();
        assert!(record.data.property("Website").is_some());
        assert!(record.data.property("Email").is_none());
        assert!(cache.peek(ENDPOINT, "Order").is_none());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn newer_document_replaces_older() {
        let transport = Arc::new(ScriptedTransport::new(
            &[SHOP_METADATA, SHOP_METADATA_V2],
            FETCH_DELAY,
        ));
        let cache = cache_over(&transport, CacheConfig::default());

        let old = cache.get(ENDPOINT, "Customer", false).await.unwrap();
        assert!(old.property("Email").is_some());

        let new = cache.get(ENDPOINT, "Customer", true).await.unwrap();
        assert!(new.property("Website").is_some());
        // Order is gone from the second revision
        assert!(cache.peek(ENDPOINT, "Order").is_none());
    }
}

// === Invalidation Tests ===

mod invalidation {
    use super::*;

    #[tokio::test]
    async fn invalidate_drops_one_entity() {
        let transport = shop_transport();
        let cache = cache_over(&transport, CacheConfig::default());

        cache.get(ENDPOINT, "Order", false).await.unwrap();
        cache.invalidate(ENDPOINT, "Order");

        assert!(cache.peek(ENDPOINT, "Order").is_none());
        assert!(cache.peek(ENDPOINT, "Customer").is_some());

        cache.get(ENDPOINT, "Order", false).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn fetch_started_before_clear_does_not_repopulate() {
        let transport = Arc::new(ScriptedTransport::new(
            &[SHOP_METADATA],
            Duration::from_millis(80),
        ));
        let cache = cache_over(&transport, CacheConfig::default());

        let clear = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cache.invalidate_all();
        };
        let (result, ()) = tokio::join!(cache.get(ENDPOINT, "Order", false), clear);

        // The caller still gets its answer, but nothing was cached
        assert_eq!(result.unwrap().name, "Order");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn events_are_published() {
        let transport = shop_transport();
        let cache = cache_over(&transport, CacheConfig::default());
        let mut events = cache.subscribe();

        cache.get(ENDPOINT, "Order", false).await.unwrap();
        let mut updated = Vec::new();
        for _ in 0..3 {
            match events.recv().await.unwrap() {
                CacheEvent::Updated { entity, .. } => updated.push(entity),
                other => panic!("unexpected event {other:?}"),
            }
        }
        updated.sort();
        assert_eq!(updated, ["Customer", "Order", "OrderLine"]);

        cache.invalidate(ENDPOINT, "Order");
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::Invalidated {
                endpoint: ENDPOINT.to_string(),
                entity: "Order".to_string(),
            }
        );

        cache.invalidate_all();
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Cleared);
    }
}

// === Failure Tests ===

mod failures {
    use super::*;

    #[tokio::test]
    async fn unknown_entity_is_not_found_and_not_cached() {
        let transport = shop_transport();
        let cache = cache_over(&transport, CacheConfig::default());

        let result = cache.get(ENDPOINT, "Invoice", false).await;
        assert!(matches!(result, Err(MetadataError::EntityNotFound { .. })));
        assert!(cache.peek(ENDPOINT, "Invoice").is_none());
    }

    #[tokio::test]
    async fn malformed_document_caches_nothing() {
        let transport = Arc::new(ScriptedTransport::new(&["<not xml"], FETCH_DELAY));
        let cache = cache_over(&transport, CacheConfig::default());

        let result = cache.get(ENDPOINT, "Order", false).await;
        assert!(matches!(result, Err(MetadataError::InvalidXml { .. })));
        assert!(cache.is_empty());

        // Failures are not memoized either
        let _ = cache.get(ENDPOINT, "Order", false).await;
        assert_eq!(transport.calls(), 2);
    }
}
