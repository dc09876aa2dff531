//! End-to-end aggregation: store, fetch group, breaker and parser together.
//!
//! Feed hosts are wiremock servers; every test builds its own aggregator so
//! breaker state never leaks between tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use feedgather::config::{BreakerConfig, FetchConfig};
use feedgather::feed::{BreakerState, FeedFetcher, ManualClock, ResourceGroup};
use feedgather::storage::{MemoryStore, StoreError, SubscriptionStore};
use feedgather::{Aggregator, Subscriptions};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss(title: &str, items: usize) -> String {
    let items: String = (0..items)
        .map(|i| {
            format!(
                "<item><title>{title} #{i}</title><link>https://example.com/{title}/{i}</link>\
                 <description>Body {i}</description></item>"
            )
        })
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{title}</title>{items}</channel></rss>"#)
}

struct Harness {
    aggregator: Aggregator,
    clock: Arc<ManualClock>,
}

fn harness(fetch: FetchConfig, breaker: BreakerConfig) -> Harness {
    let clock = Arc::new(ManualClock::new());
    let group = Arc::new(ResourceGroup::new(
        "feed-get",
        fetch.worker_pool_size,
        fetch.queue_depth,
        &breaker,
        clock.clone(),
    ));
    let client = FeedFetcher::build_client(&fetch).unwrap();
    let fetcher = FeedFetcher::new(client, group, &fetch);
    Harness {
        aggregator: Aggregator::new(SubscriptionStore::Volatile(MemoryStore::new()), fetcher),
        clock,
    }
}

fn fetch_config(timeout_ms: u64, workers: usize) -> FetchConfig {
    FetchConfig {
        timeout_ms,
        worker_pool_size: workers,
        queue_depth: workers,
        ..FetchConfig::default()
    }
}

async fn mount_feed(server: &MockServer, route: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_failing_feed_is_omitted_from_aggregate() {
    let server = MockServer::start().await;
    mount_feed(&server, "/a", ResponseTemplate::new(200).set_body_string(rss("A", 10))).await;
    mount_feed(
        &server,
        "/b",
        ResponseTemplate::new(200)
            .set_body_string(rss("B", 3))
            .set_delay(Duration::from_secs(2)),
    )
    .await;

    let h = harness(fetch_config(300, 10), BreakerConfig::default());
    let a = format!("{}/a", server.uri());
    let b = format!("{}/b", server.uri());
    h.aggregator.add_subscription("alice", &a).await.unwrap();
    h.aggregator.add_subscription("alice", &b).await.unwrap();

    let subs = h.aggregator.get_subscriptions("alice").await.unwrap();
    assert_eq!(subs.user, "alice");
    assert_eq!(subs.feeds.len(), 1);
    assert_eq!(subs.feeds[0].url, a);
    assert_eq!(subs.feeds[0].title, "A");
    assert_eq!(subs.feeds[0].items.len(), 10);
    assert_eq!(subs.feeds[0].items[0].title, "A #0");
    assert_eq!(subs.feeds[0].items[9].description, "Body 9");
}

#[tokio::test]
async fn test_http_errors_and_garbage_are_omitted() {
    let server = MockServer::start().await;
    mount_feed(&server, "/ok", ResponseTemplate::new(200).set_body_string(rss("Ok", 1))).await;
    mount_feed(&server, "/missing", ResponseTemplate::new(404)).await;
    mount_feed(&server, "/down", ResponseTemplate::new(503)).await;
    mount_feed(&server, "/html", ResponseTemplate::new(200).set_body_string("<html><body>hi")).await;

    let h = harness(fetch_config(1_000, 10), BreakerConfig::default());
    for route in ["/missing", "/ok", "/down", "/html"] {
        h.aggregator
            .add_subscription("carol", &format!("{}{route}", server.uri()))
            .await
            .unwrap();
    }

    let subs = h.aggregator.get_subscriptions("carol").await.unwrap();
    let urls: Vec<&str> = subs.feeds.iter().map(|f| f.url.as_str()).collect();
    assert_eq!(urls, vec![format!("{}/ok", server.uri())]);
}

#[tokio::test]
async fn test_fetches_run_concurrently() {
    let server = MockServer::start().await;
    mount_feed(
        &server,
        "/slow",
        ResponseTemplate::new(200)
            .set_body_string(rss("Slow", 1))
            .set_delay(Duration::from_millis(200)),
    )
    .await;

    let h = harness(fetch_config(5_000, 50), BreakerConfig::default());
    for i in 0..50 {
        // Distinct URLs, same route
        let url = format!("{}/slow?n={i}", server.uri());
        h.aggregator.add_subscription("dave", &url).await.unwrap();
    }

    let started = Instant::now();
    let subs = h.aggregator.get_subscriptions("dave").await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(subs.feeds.len(), 50);
    // Serial execution would take at least 10s
    assert!(
        elapsed < Duration::from_secs(3),
        "fetches look serialized: {elapsed:?}"
    );
}

#[tokio::test]
async fn test_open_breaker_stops_network_calls() {
    let server = MockServer::start().await;
    mount_feed(&server, "/flaky", ResponseTemplate::new(500)).await;

    let breaker = BreakerConfig {
        request_volume_threshold: 5,
        error_threshold_percent: 50,
        sleep_window_ms: 5_000,
        ..BreakerConfig::default()
    };
    let h = harness(fetch_config(1_000, 1), breaker);
    for i in 0..5 {
        let url = format!("{}/flaky?n={i}", server.uri());
        h.aggregator.add_subscription("erin", &url).await.unwrap();
    }

    let first = h.aggregator.get_subscriptions("erin").await.unwrap();
    assert!(first.feeds.is_empty());
    assert_eq!(
        h.aggregator.fetcher().group().breaker().state(),
        BreakerState::Open
    );
    assert_eq!(server.received_requests().await.unwrap().len(), 5);

    let second = h.aggregator.get_subscriptions("erin").await.unwrap();
    assert_eq!(second, first);
    assert_eq!(server.received_requests().await.unwrap().len(), 5);
    assert_eq!(
        h.aggregator.fetcher().group().breaker().snapshot().short_circuited,
        5
    );
}

#[tokio::test]
async fn test_breaker_recovers_after_sleep_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(4)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("Back", 2)))
        .mount(&server)
        .await;

    let breaker = BreakerConfig {
        request_volume_threshold: 4,
        sleep_window_ms: 1_000,
        ..BreakerConfig::default()
    };
    let h = harness(fetch_config(1_000, 1), breaker);
    for i in 0..4 {
        let url = format!("{}/feed?n={i}", server.uri());
        h.aggregator.add_subscription("frank", &url).await.unwrap();
    }

    assert!(h.aggregator.get_subscriptions("frank").await.unwrap().feeds.is_empty());
    assert_eq!(
        h.aggregator.fetcher().group().breaker().state(),
        BreakerState::Open
    );

    h.clock.advance(Duration::from_millis(1_000));
    // One worker: the first feed is the trial, the rest follow once it closes
    let subs = h.aggregator.get_subscriptions("frank").await.unwrap();
    assert_eq!(
        h.aggregator.fetcher().group().breaker().state(),
        BreakerState::Closed
    );
    assert_eq!(subs.feeds.len(), 4);
}

#[tokio::test]
async fn test_user_without_subscriptions_gets_empty_feeds() {
    let h = harness(fetch_config(1_000, 4), BreakerConfig::default());
    let subs = h.aggregator.get_subscriptions("ghost").await.unwrap();
    assert_eq!(
        subs,
        Subscriptions {
            user: "ghost".to_string(),
            feeds: vec![]
        }
    );
    assert_eq!(
        serde_json::to_value(&subs).unwrap(),
        serde_json::json!({"user": "ghost", "feeds": []})
    );
}

#[tokio::test]
async fn test_subscribe_then_unsubscribe_round_trip() {
    let server = MockServer::start().await;
    mount_feed(&server, "/rss", ResponseTemplate::new(200).set_body_string(rss("R", 2))).await;

    let h = harness(fetch_config(1_000, 4), BreakerConfig::default());
    let url = format!("{}/rss", server.uri());

    h.aggregator.add_subscription("heidi", &url).await.unwrap();
    h.aggregator.add_subscription("heidi", &url).await.unwrap();
    let subs = h.aggregator.get_subscriptions("heidi").await.unwrap();
    assert_eq!(subs.feeds.len(), 1);

    h.aggregator.delete_subscription("heidi", &url).await.unwrap();
    let subs = h.aggregator.get_subscriptions("heidi").await.unwrap();
    assert!(subs.feeds.is_empty());

    // Mutations never fetch
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_store_failure_fails_the_aggregate() {
    let store = SubscriptionStore::from_config(&feedgather::config::StoreConfig {
        backend: feedgather::storage::StoreBackend::Durable,
        database: ":memory:".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();
    let SubscriptionStore::Durable(db) = &store else {
        panic!("expected durable store");
    };
    db.close().await;

    let fetch = fetch_config(1_000, 2);
    let group = Arc::new(ResourceGroup::from_config(&fetch, &BreakerConfig::default()));
    let fetcher = FeedFetcher::new(reqwest::Client::new(), group, &fetch);
    let aggregator = Aggregator::new(store, fetcher);

    assert!(matches!(
        aggregator.get_subscriptions("ivan").await,
        Err(StoreError::Unavailable(_))
    ));
    assert!(!aggregator.health().is_ok());
}
