//! Analyzer tests against canned store results.
//!
//! These cover the merging and derived values the analyzer computes on top
//! of the store; the SQL itself is covered by the query builder's tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use analyzer::Analyzer;
use chrono::NaiveDate;
use integration_tests::fixtures::{t0, CLIENT_ID};
use integration_tests::mocks::{Canned, MockStore};
use pirsch_core::{
    AvgTimeSpentStats, ConversionStats, Direction, EntryStats, ErrorKind, ExitStats, Filter,
    PageStats, Sort, Store, TotalVisitorSessionStats, TotalVisitorStats,
};

fn analyzer(canned: Canned) -> (MockStore, Analyzer) {
    let store = MockStore::new();
    store.set_canned(canned);
    let analyzer = Analyzer::new(Arc::new(store.clone()) as Arc<dyn Store>);
    (store, analyzer)
}

fn filter() -> Filter {
    Filter::new(CLIENT_ID).between(
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 5, 7).unwrap(),
    )
}

fn total(path: &str, visitors: u64, sessions: u64) -> TotalVisitorSessionStats {
    TotalVisitorSessionStats {
        path: path.into(),
        visitors,
        sessions,
        views: sessions,
    }
}

#[tokio::test]
async fn test_platform_shares() {
    let (store, analyzer) = analyzer(Canned {
        counts: VecDeque::from([2, 3, 0]),
        ..Default::default()
    });

    let stats = analyzer.platform(&filter()).await.unwrap();
    assert_eq!(stats.platform_desktop, 2);
    assert_eq!(stats.platform_mobile, 3);
    assert_eq!(stats.platform_unknown, 0);
    assert_eq!(stats.relative_platform_desktop, 0.4);
    assert_eq!(stats.relative_platform_mobile, 0.6);
    assert_eq!(stats.relative_platform_unknown, 0.0);
    assert_eq!(store.queries().len(), 3);
}

#[tokio::test]
async fn test_platform_without_visitors() {
    let (_, analyzer) = analyzer(Canned::default());
    let stats = analyzer.platform(&filter()).await.unwrap();
    assert_eq!(stats.relative_platform_desktop, 0.0);
    assert_eq!(stats.relative_platform_mobile, 0.0);
    assert_eq!(stats.relative_platform_unknown, 0.0);
}

#[tokio::test]
async fn test_conversions_need_a_pattern() {
    let (store, analyzer) = analyzer(Canned {
        conversion: ConversionStats {
            visitors: 4,
            views: 9,
            cr: 0.25,
        },
        ..Default::default()
    });

    assert!(analyzer.conversions(&filter()).await.unwrap().is_none());
    assert!(store.queries().is_empty());

    let mut blank = filter();
    blank.path_pattern = vec!["".into()];
    assert!(analyzer.conversions(&blank).await.unwrap().is_none());
    assert!(store.queries().is_empty());

    let mut f = filter();
    f.path_pattern = vec!["^/blog/.*$".into()];
    let stats = analyzer.conversions(&f).await.unwrap().expect("conversion stats");
    assert_eq!(stats.visitors, 4);
    assert_eq!(stats.cr, 0.25);
    assert_eq!(store.queries().len(), 1);
}

fn entry_canned() -> Canned {
    Canned {
        counts: VecDeque::from([3]),
        entry_stats: vec![
            EntryStats {
                path: "/".into(),
                entries: 2,
                ..Default::default()
            },
            EntryStats {
                path: "/blog".into(),
                entries: 1,
                ..Default::default()
            },
        ],
        totals: vec![total("/", 3, 4), total("/blog", 5, 5)],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_total_visitors_with_average_time_on_page() {
    let (store, analyzer) = analyzer(Canned {
        counts: VecDeque::from([37]),
        total_visitors: TotalVisitorStats {
            visitors: 4,
            sessions: 5,
            views: 9,
            bounces: 1,
            bounce_rate: 0.2,
            ..Default::default()
        },
        ..Default::default()
    });

    let stats = analyzer.total_visitors(&filter()).await.unwrap();
    assert_eq!(stats.visitors, 4);
    assert_eq!(stats.average_time_spent_seconds, 0);
    assert_eq!(store.queries().len(), 1);

    let mut f = filter();
    f.include_avg_time_on_page = true;
    let stats = analyzer.total_visitors(&f).await.unwrap();
    assert_eq!(stats.views, 9);
    assert_eq!(stats.average_time_spent_seconds, 37);
    let queries = store.queries();
    assert_eq!(queries.len(), 3);
    assert!(queries[2].sql.contains("average_time_spent_seconds"));
}

#[tokio::test]
async fn test_entry_rates_from_total_sessions() {
    let (store, analyzer) = analyzer(entry_canned());

    let mut f = filter();
    f.sort = vec![Sort {
        field: "visitors".into(),
        direction: Direction::Desc,
    }];
    let stats = analyzer.entry(&f).await.unwrap();

    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].path, "/blog");
    assert_eq!(stats[0].visitors, 5);
    assert_eq!(stats[0].entry_rate, 1.0 / 3.0);
    assert_eq!(stats[1].path, "/");
    assert_eq!(stats[1].sessions, 4);
    assert_eq!(stats[1].entry_rate, 2.0 / 3.0);

    let sum: f64 = stats.iter().map(|s| s.entry_rate).sum();
    assert!((sum - 1.0).abs() < 1e-9);

    let queries = store.queries();
    assert_eq!(queries.len(), 3);
    assert!(queries
        .iter()
        .any(|q| q.sql.contains("HAVING sum(sign) > 0)") && q.sql.starts_with("SELECT count(*)")));
}

#[tokio::test]
async fn test_entry_sorted_by_sessions() {
    let (_, analyzer) = analyzer(entry_canned());

    let mut f = filter();
    f.sort = vec![Sort {
        field: "sessions".into(),
        direction: Direction::Asc,
    }];
    let stats = analyzer.entry(&f).await.unwrap();

    let paths: Vec<&str> = stats.iter().map(|s| s.path.as_str()).collect();
    assert_eq!(paths, ["/", "/blog"]);
}

#[tokio::test]
async fn test_exit_rates_from_total_sessions() {
    let (_, analyzer) = analyzer(Canned {
        counts: VecDeque::from([4]),
        exit_stats: vec![ExitStats {
            path: "/thanks".into(),
            exits: 3,
            ..Default::default()
        }],
        totals: vec![total("/thanks", 3, 3)],
        ..Default::default()
    });

    let stats = analyzer.exit(&filter()).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].exit_rate, 0.75);
    assert_eq!(stats[0].visitors, 3);
}

#[tokio::test]
async fn test_pages_with_time_on_page() {
    let (store, analyzer) = analyzer(Canned {
        page_stats: vec![
            PageStats {
                path: "/".into(),
                visitors: 2,
                ..Default::default()
            },
            PageStats {
                path: "/pricing".into(),
                visitors: 1,
                ..Default::default()
            },
        ],
        time_spent: vec![AvgTimeSpentStats {
            path: "/".into(),
            average_time_spent_seconds: 42,
        }],
        ..Default::default()
    });

    let mut f = filter();
    f.include_time_on_page = true;
    let stats = analyzer.by_path(&f).await.unwrap();

    assert_eq!(stats[0].average_time_spent_seconds, 42);
    assert_eq!(stats[1].average_time_spent_seconds, 0);
    assert_eq!(store.queries().len(), 2);
}

#[tokio::test]
async fn test_pages_without_time_on_page_run_one_query() {
    let (store, analyzer) = analyzer(Canned {
        page_stats: vec![PageStats {
            path: "/".into(),
            ..Default::default()
        }],
        ..Default::default()
    });

    analyzer.by_path(&filter()).await.unwrap();
    assert_eq!(store.queries().len(), 1);
}

#[tokio::test]
async fn test_referrers_group_by_name() {
    let (store, analyzer) = analyzer(Canned::default());
    analyzer.referrers(&filter()).await.unwrap();

    let queries = store.queries();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].sql.contains("referrer_name"));
}

#[tokio::test]
async fn test_active_visitors_total() {
    let (store, analyzer) = analyzer(Canned {
        counts: VecDeque::from([5]),
        ..Default::default()
    });

    let (_, total) = analyzer
        .active_visitors(&filter(), Duration::from_secs(600), t0())
        .await
        .unwrap();
    assert_eq!(total, 5);
    assert_eq!(store.queries().len(), 2);
}

#[tokio::test]
async fn test_sort_on_unselected_field_is_rejected() {
    let (_, analyzer) = analyzer(Canned::default());
    let mut f = filter();
    f.sort = vec![Sort {
        field: "bounces".into(),
        direction: Direction::Asc,
    }];

    let err = analyzer.languages(&f).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[tokio::test]
async fn test_caller_filter_is_not_modified() {
    let (_, analyzer) = analyzer(Canned {
        entry_stats: vec![EntryStats {
            path: "/".into(),
            entries: 1,
            ..Default::default()
        }],
        totals: vec![total("/", 1, 1)],
        ..Default::default()
    });

    let mut f = filter();
    f.limit = 10;
    f.sort = vec![Sort {
        field: "visitors".into(),
        direction: Direction::Asc,
    }];
    let before = f.clone();

    analyzer.platform(&f).await.unwrap();
    analyzer.entry(&f).await.unwrap();
    analyzer
        .active_visitors(&f, Duration::from_secs(300), t0())
        .await
        .unwrap();

    assert_eq!(f, before);
}
