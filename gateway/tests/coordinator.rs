mod support;

use gateway::coordinator::{Coordinator, CoordinatorConfig};
use index_core::discovery::{DiscoveryClient, StaticDiscovery};
use index_core::frontier::Frontier;
use index_core::{Error, StoreStats};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use support::{page, FakeBarrel, FakeFrontier, RecordingSubscriber};

fn coordinator_with(discovery: Arc<dyn DiscoveryClient>, frontier: Arc<dyn Frontier>) -> Coordinator {
    Coordinator::new(discovery, frontier, CoordinatorConfig::default())
}

fn coordinator(discovery: Arc<dyn DiscoveryClient>) -> Coordinator {
    coordinator_with(discovery, Arc::new(FakeFrontier::default()))
}

fn terms(q: &[&str]) -> Vec<String> {
    q.iter().map(|t| t.to_string()).collect()
}

fn counts(pages: usize) -> StoreStats {
    StoreStats { term_count: pages * 2, page_count: pages, backlink_entry_count: 0 }
}

#[tokio::test]
async fn search_fails_over_to_the_next_replica() {
    let r1 = FakeBarrel::down("b1");
    let r2 = FakeBarrel::up("b2");
    r2.store.add_document(page("a.com", &["cat", "dog"], &["b.com"]));
    r2.store.add_document(page("c.com", &["cat"], &["b.com"]));

    let coord = coordinator(Arc::new(StaticDiscovery::default()));
    coord.add_replica(r1.handle());
    coord.add_replica(r2.handle());

    let hits = coord.search(&terms(&["cat"]), 0).await.unwrap();
    let urls: Vec<_> = hits.iter().map(|h| h.url.as_str()).collect();
    assert_eq!(urls, vec!["a.com", "c.com"]);
    assert_eq!(coord.active_ids(), vec!["b2"]);
    assert_eq!(r1.searches(), 1);
}

#[tokio::test]
async fn exhausting_every_replica_is_an_error() {
    let coord = coordinator(Arc::new(StaticDiscovery::default()));
    coord.add_replica(FakeBarrel::down("b1").handle());
    coord.add_replica(FakeBarrel::down("b2").handle());

    let err = coord.search(&terms(&["cat"]), 0).await.unwrap_err();
    assert!(matches!(err, Error::AllReplicasFailed));
    assert!(coord.active_ids().is_empty());
}

#[tokio::test]
async fn empty_active_set_runs_discovery_first() {
    let r1 = FakeBarrel::up("b1");
    r1.store.add_document(page("a.com", &["rust"], &[]));
    let coord = coordinator(Arc::new(StaticDiscovery::new(vec![r1.handle()])));
    assert!(coord.active_ids().is_empty());

    let hits = coord.search(&terms(&["rust"]), 0).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(coord.active_ids(), vec!["b1"]);
}

#[tokio::test]
async fn cache_hit_skips_the_replica() {
    let r1 = FakeBarrel::up("b1");
    r1.store.add_document(page("a.com", &["rust"], &[]));
    let coord = coordinator(Arc::new(StaticDiscovery::default()));
    coord.add_replica(r1.handle());

    coord.search(&terms(&["Rust"]), 0).await.unwrap();
    let again = coord.search(&terms(&[" rust ", ""]), 0).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(r1.searches(), 1);

    coord.search(&terms(&["rust"]), 1).await.unwrap();
    assert_eq!(r1.searches(), 2);
    assert_eq!(coord.cache().len(), 2);
}

#[tokio::test]
async fn blank_query_touches_nothing() {
    let r1 = FakeBarrel::up("b1");
    let coord = coordinator(Arc::new(StaticDiscovery::new(vec![r1.handle()])));

    assert!(coord.search(&terms(&["  ", ""]), 0).await.unwrap().is_empty());
    assert_eq!(r1.searches(), 0);
    assert!(coord.active_ids().is_empty());
}

#[tokio::test]
async fn reads_rotate_round_robin() {
    let r1 = FakeBarrel::up("b1");
    let r2 = FakeBarrel::up("b2");
    let coord = coordinator(Arc::new(StaticDiscovery::default()));
    coord.add_replica(r1.handle());
    coord.add_replica(r2.handle());

    for q in ["alpha", "beta", "gamma", "delta"] {
        coord.search(&terms(&[q]), 0).await.unwrap();
    }
    assert_eq!(r1.searches(), 2);
    assert_eq!(r2.searches(), 2);
}

#[tokio::test]
async fn backlinks_try_url_variants() {
    let r1 = FakeBarrel::up("b1");
    r1.store.add_document(page("https://a.com", &["rust"], &["https://www.example.com/"]));
    let coord = coordinator(Arc::new(StaticDiscovery::default()));
    coord.add_replica(r1.handle());

    assert_eq!(coord.get_backlinks("example.com").await, vec!["https://a.com"]);
    assert!(coord.get_backlinks("nowhere.org").await.is_empty());
}

#[tokio::test]
async fn backlinks_give_up_quietly_when_replicas_fail() {
    let coord = coordinator(Arc::new(StaticDiscovery::default()));
    coord.add_replica(FakeBarrel::down("b1").handle());
    assert!(coord.get_backlinks("example.com").await.is_empty());
}

#[tokio::test]
async fn stats_re_resolve_a_restarted_replica() {
    let stale = FakeBarrel::down("b1");
    let restarted = FakeBarrel::up("b1");
    restarted.store.add_document(page("a.com", &["rust"], &[]));
    let gone = FakeBarrel::down("b2");

    let coord = coordinator(Arc::new(StaticDiscovery::new(vec![restarted.handle()])));
    coord.add_replica(stale.handle());
    coord.add_replica(gone.handle());

    let report = coord.get_stats().await;
    assert_eq!(report.active_replicas, 2);
    let b1 = report.replicas.iter().find(|r| r.id == "b1").unwrap();
    assert!(b1.online);
    assert_eq!(b1.pages, Some(1));
    let b2 = report.replicas.iter().find(|r| r.id == "b2").unwrap();
    assert!(!b2.online);
    assert_eq!(b2.pages, None);
    // offline replicas are reported, not removed
    assert_eq!(coord.active_ids(), vec!["b1", "b2"]);

    coord.search(&terms(&["rust"]), 0).await.unwrap();
    assert_eq!(restarted.searches(), 1);
}

#[tokio::test]
async fn stats_include_top_queries_and_latency() {
    let r1 = FakeBarrel::up("b1");
    let coord = coordinator(Arc::new(StaticDiscovery::default()));
    coord.add_replica(r1.handle());

    coord.search(&terms(&["cat"]), 0).await.unwrap();
    coord.search(&terms(&["cat"]), 0).await.unwrap();
    coord.search(&terms(&["Cat", "dog"]), 0).await.unwrap();

    let report = coord.get_stats().await;
    assert_eq!(report.top_queries[0].query, "cat");
    assert_eq!(report.top_queries[0].count, 2);
    assert_eq!(report.top_queries[1].query, "cat dog");
    assert!(report.replicas[0].avg_latency_ms.is_some());
}

#[tokio::test]
async fn subscribers_hear_only_about_changes() {
    let coord = coordinator(Arc::new(StaticDiscovery::default()));
    let sub = Arc::new(RecordingSubscriber::default());
    coord.register_subscriber(sub.clone());

    coord.notify_from_replica("b1", counts(1)).await;
    assert_eq!(sub.pushes(), 1);
    coord.notify_from_replica("b1", counts(1)).await;
    assert_eq!(sub.pushes(), 1);
    coord.notify_from_replica("b1", counts(2)).await;
    assert_eq!(sub.pushes(), 2);

    let last = sub.reports.lock().last().cloned().unwrap();
    assert_eq!(last.replicas[0].pages, Some(2));
    assert!(!last.replicas[0].online);
}

#[tokio::test]
async fn failing_subscribers_are_dropped() {
    let coord = coordinator(Arc::new(StaticDiscovery::default()));
    let good = Arc::new(RecordingSubscriber::default());
    let bad = Arc::new(RecordingSubscriber { fail: true, ..Default::default() });
    coord.register_subscriber(good.clone());
    coord.register_subscriber(bad);
    assert_eq!(coord.subscriber_count(), 2);

    coord.notify_from_replica("b1", counts(3)).await;
    assert_eq!(coord.subscriber_count(), 1);
    assert_eq!(good.pushes(), 1);
}

#[tokio::test]
async fn index_url_forwards_to_the_frontier() {
    let frontier = Arc::new(FakeFrontier::default());
    let coord = coordinator_with(Arc::new(StaticDiscovery::default()), frontier.clone());

    assert!(coord.index_url(" example.com/ ").await);
    assert!(!coord.index_url("ftp://example.com").await);
    assert!(!coord.index_url("").await);
    assert_eq!(*frontier.priority.lock(), vec!["https://example.com"]);

    let broken = Arc::new(FakeFrontier::failing());
    let coord = coordinator_with(Arc::new(StaticDiscovery::default()), broken);
    assert!(!coord.index_url("https://example.com").await);
}

#[tokio::test]
async fn registered_replicas_replace_by_id() {
    let old = FakeBarrel::down("b1");
    let new = FakeBarrel::up("b1");
    let coord = coordinator(Arc::new(StaticDiscovery::default()));
    coord.register_replica(old.handle());
    coord.register_replica(new.handle());
    assert_eq!(coord.active_ids(), vec!["b1"]);

    coord.search(&terms(&["rust"]), 0).await.unwrap();
    assert_eq!(old.searches.load(Ordering::SeqCst), 0);
    assert_eq!(new.searches(), 1);
}

#[tokio::test]
async fn stats_report_frontier_figures() {
    let frontier = Arc::new(FakeFrontier::default());
    let coord = coordinator_with(Arc::new(StaticDiscovery::default()), frontier.clone());
    frontier.register_downloader().await.unwrap();
    frontier.register_downloader().await.unwrap();
    assert!(coord.index_url("example.com").await);

    let report = coord.get_stats().await;
    assert_eq!(report.frontier.queue_size, Some(1));
    assert_eq!(report.frontier.active_downloaders, Some(2));
    assert_eq!(coord.current_report().frontier, report.frontier);
    assert_eq!(coord.ping_frontier().await.as_deref(), Some("frontier online, 1 pending"));
}

#[tokio::test]
async fn stats_degrade_when_the_frontier_is_down() {
    let r1 = FakeBarrel::up("b1");
    let coord = coordinator_with(Arc::new(StaticDiscovery::default()), Arc::new(FakeFrontier::failing()));
    coord.add_replica(r1.handle());

    let report = coord.get_stats().await;
    assert_eq!(report.active_replicas, 1);
    assert!(report.replicas[0].online);
    assert_eq!(report.frontier.queue_size, None);
    assert_eq!(report.frontier.active_downloaders, None);
    assert!(coord.ping_frontier().await.is_none());
}
