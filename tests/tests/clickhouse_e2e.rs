//! End-to-end tests against a real ClickHouse.
//!
//! Tracker → ClickHouseStore → ClickHouse → Analyzer. Requires Docker, or
//! an existing server via `PIRSCH_TEST_CLICKHOUSE_URL`; run with
//! `cargo test -- --ignored`.

use analyzer::Analyzer;
use chrono::NaiveDate;
use clickhouse_client::health::{check_connection, init_schema};
use clickhouse_client::query::{count_rows, query_page_views, query_session_rows};
use integration_tests::fixtures::{self, at, hit_from, unique_client_id};
use integration_tests::setup::ClickHouseContext;
use pirsch_core::{Filter, HitRequest, Store};

fn visitor(client_id: u64, ip: &str, user_agent: &str, path: &str) -> HitRequest {
    HitRequest {
        client_id,
        user_agent: user_agent.into(),
        ..hit_from(ip, path)
    }
}

fn day_filter(client_id: u64) -> Filter {
    let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    Filter::new(client_id).between(day, day)
}

#[tokio::test]
#[ignore = "requires ClickHouse"]
async fn test_schema_is_idempotent() {
    let ctx = ClickHouseContext::new().await;
    assert!(check_connection(&ctx.client).await);
    init_schema(&ctx.client)
        .await
        .expect("second schema run must succeed");
}

#[tokio::test]
#[ignore = "requires ClickHouse"]
async fn test_session_rows_collapse() {
    let ctx = ClickHouseContext::new().await;
    let tracker = ctx.tracker(fixtures::test_settings());
    let client_id = unique_client_id();

    let ip = "203.0.113.10";
    tracker
        .hit(&visitor(client_id, ip, fixtures::CHROME_UA, "/"), at(0))
        .await
        .unwrap();
    tracker
        .hit(&visitor(client_id, ip, fixtures::CHROME_UA, "/a"), at(60))
        .await
        .unwrap();
    tracker.stop().await.unwrap();

    let rows = query_session_rows(&ctx.client, client_id).await.unwrap();
    assert_eq!(rows.len(), 3, "expected +1, -1, +1 session rows");
    let net: i32 = rows.iter().map(|r| r.sign as i32).sum();
    assert_eq!(net, 1);
    let live = rows
        .iter()
        .find(|r| r.sign == 1 && r.page_views == 2)
        .expect("live session row");
    assert_eq!(live.is_bounce, 0);
    assert_eq!(live.entry_path, "/");
    assert_eq!(live.exit_path, "/a");

    assert_eq!(count_rows(&ctx.client, "page_view", client_id).await.unwrap(), 2);

    let analyzer = Analyzer::new(ctx.store.clone() as std::sync::Arc<dyn Store>);
    let totals = analyzer.total_visitors(&day_filter(client_id)).await.unwrap();
    assert_eq!(totals.visitors, 1);
    assert_eq!(totals.sessions, 1);
    assert_eq!(totals.views, 2);
    assert_eq!(totals.bounces, 0);
}

#[tokio::test]
#[ignore = "requires ClickHouse"]
async fn test_new_tracker_continues_stored_session() {
    let ctx = ClickHouseContext::new().await;
    let client_id = unique_client_id();
    let ip = "203.0.113.11";

    let first = ctx.tracker(fixtures::test_settings());
    first
        .hit(&visitor(client_id, ip, fixtures::CHROME_UA, "/"), at(0))
        .await
        .unwrap();
    first.stop().await.unwrap();

    let second = ctx.tracker(fixtures::test_settings());
    second
        .hit(&visitor(client_id, ip, fixtures::CHROME_UA, "/b"), at(60))
        .await
        .unwrap();
    second.stop().await.unwrap();

    let rows = query_session_rows(&ctx.client, client_id).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.session_id == rows[0].session_id));

    let page_views = query_page_views(&ctx.client, client_id).await.unwrap();
    assert_eq!(page_views.len(), 2);
    assert_eq!(page_views[0].session_id, page_views[1].session_id);
}

#[tokio::test]
#[ignore = "requires ClickHouse"]
async fn test_pages_with_time_on_page() {
    let ctx = ClickHouseContext::new().await;
    let tracker = ctx.tracker(fixtures::test_settings());
    let client_id = unique_client_id();

    let ip = "203.0.113.12";
    for (path, second) in [("/x", 0), ("/y", 10), ("/x", 25)] {
        tracker
            .hit(&visitor(client_id, ip, fixtures::CHROME_UA, path), at(second))
            .await
            .unwrap();
    }
    tracker.stop().await.unwrap();

    let analyzer = Analyzer::new(ctx.store.clone() as std::sync::Arc<dyn Store>);
    let mut filter = day_filter(client_id);
    filter.include_time_on_page = true;
    let stats = analyzer.by_path(&filter).await.unwrap();

    let x = stats.iter().find(|s| s.path == "/x").expect("/x row");
    assert_eq!(x.visitors, 1);
    assert_eq!(x.views, 2);
    assert_eq!(x.average_time_spent_seconds, 10);

    let y = stats.iter().find(|s| s.path == "/y").expect("/y row");
    assert_eq!(y.visitors, 1);
    assert_eq!(y.views, 1);
    assert_eq!(y.average_time_spent_seconds, 15);
}

#[tokio::test]
#[ignore = "requires ClickHouse"]
async fn test_platform_shares() {
    let ctx = ClickHouseContext::new().await;
    let tracker = ctx.tracker(fixtures::test_settings());
    let client_id = unique_client_id();

    let desktop = ["198.51.100.1", "198.51.100.2"];
    let mobile = ["198.51.100.3", "198.51.100.4", "198.51.100.5"];
    for ip in desktop {
        tracker
            .hit(&visitor(client_id, ip, fixtures::CHROME_UA, "/"), at(0))
            .await
            .unwrap();
    }
    for ip in mobile {
        tracker
            .hit(&visitor(client_id, ip, fixtures::IPHONE_UA, "/"), at(0))
            .await
            .unwrap();
    }
    tracker.stop().await.unwrap();

    let analyzer = Analyzer::new(ctx.store.clone() as std::sync::Arc<dyn Store>);
    let stats = analyzer.platform(&day_filter(client_id)).await.unwrap();
    assert_eq!(stats.platform_desktop, 2);
    assert_eq!(stats.platform_mobile, 3);
    assert_eq!(stats.platform_unknown, 0);
    assert_eq!(stats.relative_platform_desktop, 0.4);
    assert_eq!(stats.relative_platform_mobile, 0.6);
    assert_eq!(stats.relative_platform_unknown, 0.0);
}
