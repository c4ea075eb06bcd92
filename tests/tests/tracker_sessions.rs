//! Session stitching tests against the in-memory store.
//!
//! Each test drives a real `Tracker` (collectors, batching, session cache)
//! and inspects the rows it handed to the store after a flush.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use integration_tests::fixtures::{self, at, hit, hit_from, CLIENT_ID};
use integration_tests::mocks::MockStore;
use integration_tests::setup::MockContext;
use pirsch_core::{
    fingerprint, Error, ErrorKind, Salts, Session, SessionState, Sign, Store, VisitAttributes,
};
use tracker::{Tracker, TrackerConfig, TrackerOptions, TrackerSettings};

#[tokio::test]
async fn test_single_hit_creates_page_view_and_session() {
    let ctx = MockContext::new();

    ctx.tracker.hit(&hit("/"), at(0)).await.unwrap();
    ctx.tracker.flush().await.unwrap();

    let page_views = ctx.store.page_views();
    assert_eq!(page_views.len(), 1);
    assert_eq!(page_views[0].path, "/");
    assert_eq!(page_views[0].duration_seconds, 0);
    assert_eq!(page_views[0].attributes.language, "de");
    assert_eq!(page_views[0].attributes.referrer_name, "google.com");
    assert_eq!(page_views[0].attributes.browser, "Chrome");
    assert_eq!(page_views[0].attributes.screen_class, "XL");
    assert!(page_views[0].attributes.desktop);

    let sessions = ctx.store.sessions();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.sign, Sign::State);
    assert_eq!(session.page_views, 1);
    assert!(session.is_bounce);
    assert_eq!(session.entry_path, "/");
    assert_eq!(session.exit_path, "/");
    assert_eq!(session.session_id, page_views[0].session_id);
    assert_eq!(session.visitor_id, page_views[0].visitor_id);

    assert_eq!(ctx.store.user_agents().len(), 1);
    assert_eq!(ctx.tracker.cached_sessions(), 1);
}

#[tokio::test]
async fn test_second_hit_cancels_and_replaces_session() {
    let ctx = MockContext::new();

    ctx.tracker.hit(&hit("/"), at(0)).await.unwrap();
    ctx.tracker.hit(&hit("/pricing"), at(60)).await.unwrap();
    ctx.tracker.flush().await.unwrap();

    let page_views = ctx.store.page_views();
    assert_eq!(page_views.len(), 2);
    assert_eq!(page_views[1].path, "/pricing");
    assert_eq!(page_views[1].duration_seconds, 60);
    assert_eq!(page_views[0].session_id, page_views[1].session_id);

    let sessions = ctx.store.sessions();
    assert_eq!(sessions.len(), 3);
    assert_eq!(sessions[0].sign, Sign::State);
    assert_eq!(sessions[1], sessions[0].cancelled());
    assert_eq!(sessions[2].sign, Sign::State);
    assert_eq!(sessions[2].page_views, 2);
    assert!(!sessions[2].is_bounce);
    assert_eq!(sessions[2].entry_path, "/");
    assert_eq!(sessions[2].exit_path, "/pricing");
    assert_eq!(sessions[2].duration_seconds, 60);

    // Collapsing the rows leaves exactly the latest state.
    let net: i32 = sessions.iter().map(|s| s.sign.as_i8() as i32).sum();
    assert_eq!(net, 1);
}

#[tokio::test]
async fn test_inactivity_starts_new_session() {
    let ctx = MockContext::new();

    ctx.tracker.hit(&hit("/"), at(0)).await.unwrap();
    ctx.tracker.hit(&hit("/"), at(31 * 60)).await.unwrap();
    ctx.tracker.flush().await.unwrap();

    let sessions = ctx.store.sessions();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| s.sign == Sign::State));
    assert_ne!(sessions[0].session_id, sessions[1].session_id);
    assert_eq!(sessions[0].visitor_id, sessions[1].visitor_id);
}

#[tokio::test]
async fn test_max_session_length_splits_sessions() {
    let ctx = MockContext::with_settings(TrackerSettings {
        inactivity_timeout_secs: 30,
        max_session_length_secs: 60,
        ..fixtures::test_settings()
    });

    for second in [0, 30, 60, 90, 120] {
        ctx.tracker.hit(&hit("/"), at(second)).await.unwrap();
    }
    ctx.tracker.flush().await.unwrap();

    // 1 + floor(120s span / 60s maximum)
    let ids: BTreeSet<u64> = ctx.store.page_views().iter().map(|p| p.session_id).collect();
    assert_eq!(ids.len(), 3);

    let page_views = ctx.store.page_views();
    assert_eq!(page_views[1].session_id, page_views[0].session_id);
    assert_ne!(page_views[2].session_id, page_views[1].session_id);
    assert_eq!(page_views[3].session_id, page_views[2].session_id);
    assert_ne!(page_views[4].session_id, page_views[3].session_id);
}

#[tokio::test]
async fn test_session_continues_across_midnight() {
    let ctx = MockContext::new();
    let before = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 50).unwrap();
    let after = before + Duration::seconds(20);

    ctx.tracker.hit(&hit("/"), before).await.unwrap();
    ctx.tracker.hit(&hit("/a"), after).await.unwrap();
    ctx.tracker.flush().await.unwrap();

    let sessions = ctx.store.sessions();
    assert_eq!(sessions.len(), 3);
    assert_eq!(sessions[0].session_id, sessions[2].session_id);
    assert_eq!(sessions[0].visitor_id, sessions[2].visitor_id);
    assert_eq!(sessions[2].page_views, 2);
}

#[tokio::test]
async fn test_daily_hit_limit_drops_excess_hits() {
    let ctx = MockContext::with_settings(TrackerSettings {
        max_hits_per_day: 100,
        ..fixtures::test_settings()
    });

    for i in 0..101 {
        ctx.tracker.hit(&hit("/"), at(i * 2)).await.unwrap();
    }
    ctx.tracker.flush().await.unwrap();

    assert_eq!(ctx.store.page_views().len(), 100);
    assert_eq!(ctx.store.user_agents().len(), 1);
}

#[tokio::test]
async fn test_crawler_hits_are_ignored() {
    let ctx = MockContext::new();
    let mut request = hit("/");
    request.user_agent = fixtures::CRAWLER_UA.into();

    ctx.tracker.hit(&request, at(0)).await.unwrap();
    ctx.tracker.flush().await.unwrap();

    assert!(ctx.store.page_views().is_empty());
    assert!(ctx.store.sessions().is_empty());
    assert!(ctx.store.user_agents().is_empty());
}

#[tokio::test]
async fn test_invalid_hit_is_rejected() {
    let ctx = MockContext::new();
    let mut request = hit("/");
    request.url = String::new();

    let err = ctx.tracker.hit(&request, at(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    request.url = "not a url".into();
    let err = ctx.tracker.hit(&request, at(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_event_for_new_visitor_starts_session() {
    let ctx = MockContext::new();

    ctx.tracker
        .event(&fixtures::event("signup"), &hit("/pricing"), at(0))
        .await
        .unwrap();
    ctx.tracker.flush().await.unwrap();

    let page_views = ctx.store.page_views();
    assert_eq!(page_views.len(), 1);
    assert_eq!(page_views[0].path, "/pricing");

    let sessions = ctx.store.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].page_views, 1);

    let events = ctx.store.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.event_name, "signup");
    assert_eq!(event.event_meta_keys, vec!["plan".to_string()]);
    assert_eq!(event.event_meta_values, vec!["pro".to_string()]);
    assert_eq!(event.duration_seconds, 12);
    assert_eq!(event.path, "/pricing");
    assert_eq!(event.session_id, sessions[0].session_id);
}

#[tokio::test]
async fn test_event_in_live_session_does_not_count_page_view() {
    let ctx = MockContext::new();

    ctx.tracker.hit(&hit("/"), at(0)).await.unwrap();
    ctx.tracker
        .event(&fixtures::event("download"), &hit("/"), at(5))
        .await
        .unwrap();
    ctx.tracker.flush().await.unwrap();

    assert_eq!(ctx.store.page_views().len(), 1);
    let sessions = ctx.store.sessions();
    assert_eq!(sessions.len(), 3);
    assert_eq!(sessions[1], sessions[0].cancelled());
    assert_eq!(sessions[2].page_views, 1);
    assert_eq!(sessions[2].duration_seconds, 5);
    assert_eq!(ctx.store.events().len(), 1);
}

#[tokio::test]
async fn test_event_without_name_is_rejected() {
    let ctx = MockContext::new();
    let err = ctx
        .tracker
        .event(&fixtures::event(""), &hit("/"), at(0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_visitors_are_kept_apart() {
    let ctx = MockContext::new();

    ctx.tracker.hit(&hit_from("198.51.100.1", "/"), at(0)).await.unwrap();
    ctx.tracker.hit(&hit_from("198.51.100.2", "/"), at(1)).await.unwrap();
    ctx.tracker.flush().await.unwrap();

    let sessions = ctx.store.sessions();
    assert_eq!(sessions.len(), 2);
    assert_ne!(sessions[0].visitor_id, sessions[1].visitor_id);
    assert_eq!(ctx.tracker.cached_sessions(), 2);
}

#[tokio::test]
async fn test_continues_stored_session() {
    let ctx = MockContext::new();
    let request = hit("/b");
    let (today, _) = Salts::new("test-salt").current(at(600));
    let visitor_id = fingerprint(&today, &request.ip, &request.user_agent);
    let stored = SessionState::start(
        CLIENT_ID,
        visitor_id,
        7,
        at(0),
        "/",
        "Home",
        VisitAttributes::default(),
    )
    .to_row(Sign::State);
    ctx.store.set_stored_session(Some(stored.clone()));

    ctx.tracker.hit(&request, at(600)).await.unwrap();
    ctx.tracker.flush().await.unwrap();

    let sessions = ctx.store.sessions();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0], stored.cancelled());
    assert_eq!(sessions[1].session_id, 7);
    assert_eq!(sessions[1].page_views, 2);
    assert_eq!(sessions[1].entry_path, "/");
    assert_eq!(sessions[1].exit_path, "/b");
}

#[tokio::test]
async fn test_failed_lookup_starts_new_session() {
    let ctx = MockContext::new();
    ctx.store.set_lookup_fails(true);

    ctx.tracker.hit(&hit("/"), at(0)).await.unwrap();
    ctx.tracker.flush().await.unwrap();

    let sessions = ctx.store.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].sign, Sign::State);
}

#[tokio::test]
async fn test_failed_save_reaches_error_handler() {
    let store = MockStore::new();
    store.set_should_fail(true);
    let failures = Arc::new(AtomicUsize::new(0));
    let seen = failures.clone();
    let tracker = Tracker::with_options(
        Arc::new(store.clone()) as Arc<dyn Store>,
        TrackerConfig::from(fixtures::test_settings()),
        TrackerOptions {
            on_error: Some(Arc::new(move |e: &Error| {
                assert_eq!(e.kind(), ErrorKind::StorageTransient);
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        },
    )
    .unwrap();

    tracker.hit(&hit("/"), at(0)).await.unwrap();
    tracker.flush().await.unwrap();

    // page view, session and user agent batches
    assert_eq!(failures.load(Ordering::SeqCst), 3);
    assert!(store.page_views().is_empty());
}

#[tokio::test]
async fn test_full_channel_reports_overload() {
    let ctx = MockContext::with_settings(TrackerSettings {
        batch_size: 1,
        channel_capacity: 1,
        enqueue_timeout_ms: Some(10),
        ..fixtures::test_settings()
    });
    ctx.store.close_gate();

    let mut overloaded = None;
    for i in 0..20 {
        if let Err(e) = ctx.tracker.hit(&hit("/"), at(i * 2)).await {
            overloaded = Some(e);
            break;
        }
    }
    let err = overloaded.expect("expected an overloaded channel");
    assert_eq!(err.kind(), ErrorKind::Overloaded);
    assert!(err.kind().is_retryable());

    ctx.store.open_gate();
    ctx.tracker.stop().await.unwrap();
}

#[tokio::test]
async fn test_overloaded_hits_leave_sessions_consistent() {
    let ctx = MockContext::with_settings(TrackerSettings {
        batch_size: 1,
        channel_capacity: 1,
        enqueue_timeout_ms: Some(10),
        ..fixtures::test_settings()
    });
    ctx.store.close_gate();

    let mut rejected = 0;
    for i in 0..20 {
        if let Err(e) = ctx.tracker.hit(&hit("/"), at(i * 2)).await {
            assert_eq!(e.kind(), ErrorKind::Overloaded);
            rejected += 1;
        }
    }
    assert!(rejected > 0);

    ctx.store.open_gate();
    ctx.tracker.flush().await.unwrap();
    for i in 20..23 {
        ctx.tracker.hit(&hit("/"), at(i * 2)).await.unwrap();
    }
    ctx.tracker.stop().await.unwrap();

    let page_views = ctx.store.page_views();
    let sessions = ctx.store.sessions();
    assert_eq!(page_views.len(), 23 - rejected);

    let net: i32 = sessions.iter().map(|s| s.sign.as_i8() as i32).sum();
    assert_eq!(net, 1);
    for (i, row) in sessions.iter().enumerate() {
        if row.sign == Sign::Cancel {
            let state = Session {
                sign: Sign::State,
                ..row.clone()
            };
            assert!(sessions[..i].contains(&state), "cancel row without its state row");
        }
    }
    let live = sessions.last().expect("live session row");
    assert_eq!(live.sign, Sign::State);
    assert_eq!(live.page_views as usize, page_views.len());
}

#[tokio::test]
async fn test_channels_save_independently() {
    let ctx = MockContext::new();
    ctx.store.close_gate();
    ctx.tracker.hit(&hit("/"), at(0)).await.unwrap();

    // page view, session and user agent batches each get a worker
    let held = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while ctx.store.held_saves() < 3 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(held.is_ok(), "only {} saves in flight", ctx.store.held_saves());

    ctx.store.open_gate();
    ctx.tracker.stop().await.unwrap();
    assert_eq!(ctx.store.page_views().len(), 1);
    assert_eq!(ctx.store.sessions().len(), 1);
}

#[tokio::test]
async fn test_stop_saves_pending_rows() {
    let ctx = MockContext::with_settings(TrackerSettings {
        batch_max_age_ms: 60_000,
        ..fixtures::test_settings()
    });

    ctx.tracker.hit(&hit("/"), at(0)).await.unwrap();
    ctx.tracker.stop().await.unwrap();

    assert_eq!(ctx.store.page_views().len(), 1);
    assert_eq!(ctx.store.sessions().len(), 1);
}

#[tokio::test]
async fn test_stopped_tracker_rejects_calls() {
    let ctx = MockContext::new();
    ctx.tracker.stop().await.unwrap();

    let err = ctx.tracker.hit(&hit("/"), at(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Stopped);
    let err = ctx.tracker.flush().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Stopped);

    // stopping twice is a no-op
    ctx.tracker.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let result = Tracker::new(
        Arc::new(MockStore::new()) as Arc<dyn Store>,
        TrackerConfig::from(TrackerSettings {
            workers: 0,
            ..fixtures::test_settings()
        }),
    );
    let err = result.err().expect("workers = 0 must be rejected");
    assert_eq!(err.kind(), ErrorKind::Config);
}
