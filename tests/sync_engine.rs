//! Integration tests for the sync engine against a mocked Feedly API.
//!
//! Each test gets its own wiremock server and in-memory session store.
//! Unmatched requests get a 404 from wiremock, which the engine treats as an
//! ordinary API failure.

use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedwatch::api::{ApiClient, ApiError};
use feedwatch::config::{Config, WatermarkPolicy};
use feedwatch::engine::{Engine, EngineError, EngineEvent, InterfaceConfig, MouseButton};
use feedwatch::storage::{Database, FilterSelection, SessionState};

const GLOBAL_STREAM: &str = r"^/streams/user%2Fu1%2Fcategory%2Fglobal\.all/contents$";
const SAVED_STREAM: &str = r"^/streams/user%2Fu1%2Ftag%2Fglobal\.saved/contents$";
const SAVED_TAG: &str = r"^/tags/user%2Fu1%2Ftag%2Fglobal\.saved$";

fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

fn entry(id: &str, crawled: i64) -> Value {
    json!({
        "id": id,
        "title": format!("Title {}", id),
        "crawled": crawled,
        "origin": { "title": "Blog", "htmlUrl": "https://blog.example.com/" },
        "alternate": [{ "href": format!("https://blog.example.com/{}", id) }],
    })
}

fn stream(entries: Vec<Value>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "items": entries }))
}

fn logged_in_session(refresh_token: Option<&str>) -> SessionState {
    SessionState {
        access_token: Some(SecretString::from("tok".to_string())),
        refresh_token: refresh_token.map(|t| SecretString::from(t.to_string())),
        user_id: Some("u1".to_string()),
        ..Default::default()
    }
}

fn test_config(server: &MockServer) -> Config {
    Config {
        api_base_url: Some(server.uri()),
        ..Default::default()
    }
}

async fn test_engine(
    server: &MockServer,
    config: Config,
    session: SessionState,
) -> (Arc<Engine>, Database) {
    let db = Database::open(":memory:").await.unwrap();
    db.save_session(&session).await.unwrap();
    let engine = Engine::new(config, db.clone(), ApiClient::new(reqwest::Client::new()))
        .await
        .unwrap();
    (engine, db)
}

/// Wait for the first event matching `pred`, skipping the others.
async fn next_matching<F>(events: &mut Receiver<EngineEvent>, pred: F) -> EngineEvent
where
    F: Fn(&EngineEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn drain(events: &mut Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

async fn token_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/auth/token")
        .count()
}

// ============================================================================
// Unread Cache
// ============================================================================

#[tokio::test]
async fn test_update_feeds_merges_filter_streams() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"category%2Fa/contents$"))
        .and(query_param("unreadOnly", "true"))
        .and(query_param("ranked", "newest"))
        .and(query_param("count", "2"))
        .respond_with(stream(vec![entry("1", 100), entry("2", 200)]))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"category%2Fb/contents$"))
        .respond_with(stream(vec![entry("1", 150), entry("3", 50)]))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config {
        max_number_of_feeds: 2,
        is_filters_enabled: true,
        filters: vec!["user/u1/category/a".into(), "user/u1/category/b".into()],
        ..test_config(&server)
    };
    let (engine, _db) = test_engine(&server, config, logged_in_session(None)).await;

    engine.update_feeds(true).await.unwrap();

    let cache = engine.cached_feeds().await;
    let ids: Vec<&str> = cache.iter().map(|item| item.id.as_str()).collect();
    // Duplicate "1" keeps the copy from the later stream
    assert_eq!(ids, vec!["2", "1"]);
    assert_eq!(cache[1].crawled_at, Some(at(150)));
}

#[tokio::test]
async fn test_update_feeds_oldest_first_ranking() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .and(query_param("ranked", "oldest"))
        .respond_with(stream(vec![entry("b", 300), entry("a", 100)]))
        .mount(&server)
        .await;

    let config = Config {
        oldest_feeds_first: true,
        ..test_config(&server)
    };
    let (engine, _db) = test_engine(&server, config, logged_in_session(None)).await;

    engine.update_feeds(true).await.unwrap();

    let ids: Vec<String> = engine.cached_feeds().await.into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_update_feeds_failed_stream_leaves_cache_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(stream(vec![entry("1", 100)]))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (engine, _db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;

    engine.update_feeds(true).await.unwrap();
    assert_eq!(engine.cached_feeds().await.len(), 1);

    let err = engine.update_feeds(true).await.unwrap_err();
    assert!(matches!(err, EngineError::Api(ApiError::HttpStatus(500))));
    assert!(engine.cached_feeds().await.is_empty());
}

#[tokio::test]
async fn test_update_feeds_requires_user_id() {
    let server = MockServer::start().await;
    let session = SessionState {
        user_id: None,
        ..logged_in_session(None)
    };
    let (engine, _db) = test_engine(&server, test_config(&server), session).await;

    let err = engine.update_feeds(false).await.unwrap_err();
    assert!(matches!(err, EngineError::NotLoggedIn));
}

#[tokio::test]
async fn test_get_feeds_refills_silently() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(stream(vec![entry("1", 100)]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/markers/counts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "unreadcounts": [{ "id": "user/u1/category/global.all", "count": 1 }]
        })))
        .mount(&server)
        .await;

    let (engine, _db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;
    let mut events = engine.subscribe();

    let list = engine.get_feeds().await;

    assert!(list.is_logged_in);
    assert_eq!(list.feeds.len(), 1);
    assert_eq!(list.feeds[0].url, "https://blog.example.com/1");

    let seen = drain(&mut events);
    assert!(!seen
        .iter()
        .any(|e| matches!(e, EngineEvent::NewFeedsDetected { .. })));
    assert!(seen.contains(&EngineEvent::UnreadCountUpdated {
        count: 1,
        is_logged_in: true
    }));
    // The watermark still moves on a silent pass
    assert_eq!(engine.session_summary().await.last_feed_seen_at, Some(at(100)));
}

#[tokio::test]
async fn test_new_feeds_announced_with_sound() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(stream(vec![entry("old", 100), entry("new", 300)]))
        .mount(&server)
        .await;

    let config = Config {
        play_sound: true,
        ..test_config(&server)
    };
    let session = SessionState {
        last_feed_seen_at: Some(at(200)),
        ..logged_in_session(None)
    };
    let (engine, db) = test_engine(&server, config, session).await;
    let mut events = engine.subscribe();

    engine.update_feeds(false).await.unwrap();

    let seen = drain(&mut events);
    assert_eq!(seen.len(), 2);
    match &seen[0] {
        EngineEvent::NewFeedsDetected { feeds, many } => {
            assert_eq!(feeds.len(), 1);
            assert_eq!(feeds[0].id, "new");
            assert!(!many);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(seen[1], EngineEvent::PlaySound);

    let stored = db.load_session().await.unwrap();
    assert_eq!(stored.last_feed_seen_at, Some(at(300)));
}

#[tokio::test]
async fn test_notifications_disabled_skips_detection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(stream(vec![entry("new", 300)]))
        .mount(&server)
        .await;

    let config = Config {
        show_desktop_notifications: false,
        play_sound: true,
        ..test_config(&server)
    };
    let (engine, _db) = test_engine(&server, config, logged_in_session(None)).await;
    let mut events = engine.subscribe();

    engine.update_feeds(false).await.unwrap();

    assert!(drain(&mut events).is_empty());
    assert_eq!(engine.session_summary().await.last_feed_seen_at, None);
    assert_eq!(engine.cached_feeds().await.len(), 1);
}

#[tokio::test]
async fn test_full_batch_reported_as_many() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(stream(vec![entry("1", 100), entry("2", 200)]))
        .mount(&server)
        .await;

    let config = Config {
        max_number_of_feeds: 2,
        ..test_config(&server)
    };
    let (engine, _db) = test_engine(&server, config, logged_in_session(None)).await;
    let mut events = engine.subscribe();

    engine.update_feeds(false).await.unwrap();

    let event = next_matching(&mut events, |e| {
        matches!(e, EngineEvent::NewFeedsDetected { .. })
    })
    .await;
    assert!(matches!(event, EngineEvent::NewFeedsDetected { many: true, .. }));
}

/// Two overlapping passes: the first one's response arrives after the second
/// has already advanced the watermark.
async fn overlapping_passes(policy: WatermarkPolicy) -> (Vec<Vec<String>>, Option<DateTime<Utc>>) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(
            stream(vec![entry("slow", 150)]).set_delay(Duration::from_millis(300)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(stream(vec![entry("fast", 300)]))
        .mount(&server)
        .await;

    let config = Config {
        watermark_policy: policy,
        ..test_config(&server)
    };
    let session = SessionState {
        last_feed_seen_at: Some(at(100)),
        ..logged_in_session(None)
    };
    let (engine, _db) = test_engine(&server, config, session).await;
    let mut events = engine.subscribe();

    let slow = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.update_feeds(false).await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.received_requests().await.unwrap_or_default().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    engine.update_feeds(false).await.unwrap();
    slow.await.unwrap().unwrap();

    let announced = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::NewFeedsDetected { feeds, .. } => {
                Some(feeds.into_iter().map(|item| item.id).collect())
            }
            _ => None,
        })
        .collect();
    (announced, engine.session_summary().await.last_feed_seen_at)
}

#[tokio::test]
async fn test_monotonic_watermark_never_regresses() {
    let (announced, watermark) = overlapping_passes(WatermarkPolicy::Monotonic).await;

    assert_eq!(announced, vec![vec!["fast".to_string()]]);
    assert_eq!(watermark, Some(at(300)));
}

#[tokio::test]
async fn test_pass_snapshot_watermark_uses_start_value() {
    let (announced, watermark) = overlapping_passes(WatermarkPolicy::PassSnapshot).await;

    assert_eq!(
        announced,
        vec![vec!["fast".to_string()], vec!["slow".to_string()]]
    );
    assert_eq!(watermark, Some(at(150)));
}

// ============================================================================
// Mark As Read
// ============================================================================

#[tokio::test]
async fn test_mark_as_read_event_sequence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(stream(vec![entry("e1", 100), entry("e2", 200)]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/markers"))
        .and(header("Authorization", "Bearer tok"))
        .and(body_partial_json(json!({
            "action": "markAsRead",
            "type": "entries",
            "entryIds": ["e1"],
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, _db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;
    engine.update_feeds(true).await.unwrap();
    let mut events = engine.subscribe();

    engine.mark_as_read(vec!["e1".to_string()]).await.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            EngineEvent::FeedsRemoved(vec!["e1".to_string()]),
            EngineEvent::FeedsMarkedRead(vec!["e1".to_string()]),
            EngineEvent::CountDecremented(1),
        ]
    );
    let ids: Vec<String> = engine.cached_feeds().await.into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["e2"]);
}

#[tokio::test]
async fn test_mark_as_read_failure_keeps_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(stream(vec![entry("e1", 100)]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/markers"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (engine, _db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;
    engine.update_feeds(true).await.unwrap();
    let mut events = engine.subscribe();

    assert!(engine.mark_as_read(vec!["e1".to_string()]).await.is_err());

    assert_eq!(
        drain(&mut events),
        vec![EngineEvent::FeedsRemoved(vec!["e1".to_string()])]
    );
    assert_eq!(engine.cached_feeds().await.len(), 1);
}

// ============================================================================
// Saved Feeds
// ============================================================================

#[tokio::test]
async fn test_save_failure_keeps_optimistic_flag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(stream(vec![entry("e1", 100)]))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(SAVED_TAG))
        .and(body_partial_json(json!({ "entryId": "e1" })))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, _db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;
    engine.update_feeds(true).await.unwrap();

    assert!(engine.set_saved("e1", true).await.is_err());

    let cache = engine.cached_feeds().await;
    assert!(cache[0].is_saved);
}

#[tokio::test]
async fn test_unsave_refreshes_saved_cache() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/tags/user%2Fu1%2Ftag%2Fglobal\.saved/e1$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(SAVED_STREAM))
        .respond_with(stream(vec![entry("e2", 100)]))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, _db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;

    engine.set_saved("e1", false).await.unwrap();

    let saved = engine.cached_saved_feeds().await;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, "e2");
}

#[tokio::test]
async fn test_get_saved_feeds_uses_cache_unless_forced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(SAVED_STREAM))
        .respond_with(stream(vec![entry("s1", 100)]))
        .expect(2)
        .mount(&server)
        .await;

    let (engine, _db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;

    assert_eq!(engine.get_saved_feeds(false).await.feeds.len(), 1);
    assert_eq!(engine.get_saved_feeds(false).await.feeds.len(), 1);
    assert_eq!(engine.get_saved_feeds(true).await.feeds.len(), 1);
}

// ============================================================================
// Counter
// ============================================================================

#[tokio::test]
async fn test_counter_corrects_multi_category_subscriptions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markers/counts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "unreadcounts": [
                { "id": "user/u1/category/a", "count": 5 },
                { "id": "user/u1/category/b", "count": 5 },
                { "id": "feed/x", "count": 5 },
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "feed/x",
            "categories": [
                { "id": "user/u1/category/a", "label": "A" },
                { "id": "user/u1/category/b", "label": "B" },
            ]
        }])))
        .mount(&server)
        .await;

    let config = Config {
        is_filters_enabled: true,
        filters: vec!["user/u1/category/a".into(), "user/u1/category/b".into()],
        ..test_config(&server)
    };
    let (engine, _db) = test_engine(&server, config, logged_in_session(None)).await;
    let mut events = engine.subscribe();

    assert_eq!(engine.update_counter().await.unwrap(), 5);
    assert_eq!(
        drain(&mut events),
        vec![EngineEvent::UnreadCountUpdated {
            count: 5,
            is_logged_in: true
        }]
    );
}

#[tokio::test]
async fn test_hidden_counter_publishes_zero() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markers/counts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "unreadcounts": [{ "id": "user/u1/category/global.all", "count": 42 }]
        })))
        .mount(&server)
        .await;

    let config = Config {
        show_counter: false,
        ..test_config(&server)
    };
    let (engine, _db) = test_engine(&server, config, logged_in_session(None)).await;
    let mut events = engine.subscribe();

    assert_eq!(engine.update_counter().await.unwrap(), 42);
    assert_eq!(
        drain(&mut events),
        vec![EngineEvent::UnreadCountUpdated {
            count: 0,
            is_logged_in: true
        }]
    );
}

#[tokio::test]
async fn test_counter_reset_sends_newer_than() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markers/counts"))
        .and(query_param("newerThan", "5000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unreadcounts": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config {
        reset_counter_on_click: true,
        ..test_config(&server)
    };
    let session = SessionState {
        last_counter_reset_at: at(5000),
        ..logged_in_session(None)
    };
    let (engine, _db) = test_engine(&server, config, session).await;

    assert_eq!(engine.update_counter().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reset_counter_disabled_restores_epoch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markers/counts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unreadcounts": [] })))
        .mount(&server)
        .await;

    let session = SessionState {
        last_counter_reset_at: at(5000),
        ..logged_in_session(None)
    };
    let (engine, db) = test_engine(&server, test_config(&server), session).await;

    engine.update_counter().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].url.query().is_none());
    let stored = db.load_session().await.unwrap();
    assert_eq!(stored.last_counter_reset_at, DateTime::<Utc>::UNIX_EPOCH);
}

// ============================================================================
// Authorization Recovery
// ============================================================================

#[tokio::test]
async fn test_concurrent_rejections_refresh_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_partial_json(json!({
            "grant_type": "refresh_token",
            "refresh_token": "refresh",
        })))
        .respond_with(ResponseTemplate::new(400).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, _db) =
        test_engine(&server, test_config(&server), logged_in_session(Some("refresh"))).await;
    let mut events = engine.subscribe();

    let (first, second) = tokio::join!(engine.update_counter(), engine.update_counter());
    assert!(matches!(first, Err(EngineError::Api(ApiError::AuthorizationRequired))));
    assert!(matches!(second, Err(EngineError::Api(ApiError::AuthorizationRequired))));

    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.session_summary().await.authorization_retry_pending {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("refresh never completed");

    assert_eq!(token_requests(&server).await, 1);
    assert!(!engine.is_logged_in().await);

    let logged_out = drain(&mut events)
        .into_iter()
        .filter(|e| {
            *e == EngineEvent::UnreadCountUpdated {
                count: 0,
                is_logged_in: false,
            }
        })
        .count();
    assert_eq!(logged_out, 1);
}

#[tokio::test]
async fn test_rejection_without_refresh_token_stays_logged_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (engine, db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;

    assert!(engine.update_counter().await.is_err());
    assert!(engine.update_counter().await.is_err());

    // Give the spawned refresh a moment; it must not reach the network
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(token_requests(&server).await, 0);

    let summary = engine.session_summary().await;
    assert!(summary.authorization_retry_pending);
    assert!(db.load_session().await.unwrap().authorization_retry_pending);
}

#[tokio::test]
async fn test_refresh_success_reinitializes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("Authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "id": "u1",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/markers/counts"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "unreadcounts": [{ "id": "user/u1/category/global.all", "count": 7 }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/streams/"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(stream(vec![]))
        .mount(&server)
        .await;

    let (engine, db) =
        test_engine(&server, test_config(&server), logged_in_session(Some("refresh"))).await;
    let mut events = engine.subscribe();

    assert!(engine.update_counter().await.is_err());

    next_matching(&mut events, |e| {
        *e == EngineEvent::UnreadCountUpdated {
            count: 7,
            is_logged_in: true,
        }
    })
    .await;

    let stored = db.load_session().await.unwrap();
    assert_eq!(
        stored.access_token.as_ref().map(|t| t.expose_secret().to_owned()),
        Some("fresh".to_string())
    );
    assert!(!stored.authorization_retry_pending);
    assert!(engine.is_logged_in().await);
    assert_eq!(engine.scheduled_timers().await, 2);

    engine.shutdown().await;
    assert_eq!(engine.scheduled_timers().await, 0);
}

#[tokio::test]
async fn test_rejection_stops_schedule() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (engine, _db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;
    let mut events = engine.subscribe();

    engine.start_schedule().await;
    assert_eq!(engine.scheduled_timers().await, 2);

    next_matching(&mut events, |e| {
        *e == EngineEvent::UnreadCountUpdated {
            count: 0,
            is_logged_in: false,
        }
    })
    .await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.scheduled_timers().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("schedule still armed");
}

// ============================================================================
// Categories
// ============================================================================

#[tokio::test]
async fn test_categories_end_with_uncategorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/categories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "user/u1/category/tech", "label": "Tech" }
        ])))
        .mount(&server)
        .await;

    let (engine, _db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;

    let categories = engine.get_categories().await.unwrap();
    assert_eq!(categories.len(), 2);
    assert_eq!(categories[0].label, "Tech");
    assert_eq!(categories[1].id, "user/u1/category/global.uncategorized");
    assert_eq!(categories[1].label, "Uncategorized");
}

#[tokio::test]
async fn test_categories_empty_when_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/categories"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (engine, _db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;

    assert!(engine.get_categories().await.unwrap().is_empty());
}

// ============================================================================
// Authorization Flow
// ============================================================================

#[tokio::test]
async fn test_authorization_redirect_consumed_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_partial_json(json!({
            "grant_type": "authorization_code",
            "code": "abc",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a",
            "refresh_token": "r",
            "id": "u9",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, db) = test_engine(&server, test_config(&server), SessionState::default()).await;

    let url = engine.begin_authorization().await.unwrap();
    assert_eq!(url.path(), "/auth/auth");
    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    let forged = "http://localhost/?code=abc&state=forged";
    assert!(matches!(
        engine.complete_authorization(forged).await,
        Err(EngineError::Auth(_))
    ));

    let redirect = format!("http://localhost/?code=abc&state={}", state);
    engine.complete_authorization(&redirect).await.unwrap();
    assert!(matches!(
        engine.complete_authorization(&redirect).await,
        Err(EngineError::NoPendingAuthorization)
    ));

    let stored = db.load_session().await.unwrap();
    assert_eq!(stored.user_id.as_deref(), Some("u9"));
    assert!(stored.refresh_token.is_some());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_complete_without_begin_rejected() {
    let server = MockServer::start().await;
    let (engine, _db) = test_engine(&server, test_config(&server), SessionState::default()).await;

    assert!(matches!(
        engine
            .complete_authorization("http://localhost/?code=abc&state=1")
            .await,
        Err(EngineError::NoPendingAuthorization)
    ));
}

#[tokio::test]
async fn test_logout_forgets_tokens() {
    let server = MockServer::start().await;
    let (engine, db) =
        test_engine(&server, test_config(&server), logged_in_session(Some("refresh"))).await;

    engine.logout().await.unwrap();
    engine.shutdown().await;

    let stored = db.load_session().await.unwrap();
    assert!(stored.access_token.is_none());
    assert!(stored.refresh_token.is_none());
    assert!(!engine.session_summary().await.has_access_token);
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_request_feeds_closes_popup_when_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(stream(vec![]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/markers/counts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unreadcounts": [] })))
        .mount(&server)
        .await;

    let config = Config {
        close_popup_when_no_feeds: true,
        ..test_config(&server)
    };
    let (engine, _db) = test_engine(&server, config, logged_in_session(None)).await;
    let mut events = engine.subscribe();

    engine.request_feeds(false, false).await;
    let seen = drain(&mut events);
    assert_eq!(seen.first(), Some(&EngineEvent::LoaderShown));
    assert_eq!(seen.last(), Some(&EngineEvent::ClosePopup));

    engine.request_feeds(false, true).await;
    let seen = drain(&mut events);
    assert_eq!(
        seen.last(),
        Some(&EngineEvent::FeedsUpdated {
            feeds: vec![],
            is_logged_in: true,
            is_saved_feeds: false,
        })
    );
}

#[tokio::test]
async fn test_open_feed_rejects_unsafe_url() {
    let server = MockServer::start().await;
    let (engine, _db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;
    let mut events = engine.subscribe();

    let result = engine
        .open_feed("javascript:alert(1)", false, Some("e1"), false)
        .await;

    assert!(matches!(result, Err(EngineError::InvalidUrl(_))));
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_open_saved_feed_skips_mark_read() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/markers"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = Config {
        mark_read_on_click: true,
        close_popup_on_news_open: true,
        ..test_config(&server)
    };
    let (engine, _db) = test_engine(&server, config, logged_in_session(None)).await;
    let mut events = engine.subscribe();

    engine
        .open_feed("https://blog.example.com/e1", false, Some("e1"), true)
        .await
        .unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            EngineEvent::OpenUrl {
                url: "https://blog.example.com/e1".to_string(),
                in_background: false,
            },
            EngineEvent::ClosePopup,
        ]
    );
}

#[tokio::test]
async fn test_save_filters_persists_selection() {
    let server = MockServer::start().await;
    let (engine, db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;

    let selection = FilterSelection {
        filters: vec!["user/u1/category/tech".to_string()],
        enabled: true,
    };
    engine.save_filters(selection.clone()).await.unwrap();
    engine.shutdown().await;

    assert_eq!(db.load_filters().await.unwrap(), Some(selection));
    let config = engine.config().await;
    assert!(config.filters_active());
    assert_eq!(config.filters, vec!["user/u1/category/tech"]);
}

#[tokio::test]
async fn test_popup_shown_pushes_interface_config() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(GLOBAL_STREAM))
        .respond_with(stream(vec![entry("e1", 100)]))
        .mount(&server)
        .await;

    let config = Config {
        ability_save_feeds: true,
        popup_font_size: 400,
        ..test_config(&server)
    };
    let (engine, _db) = test_engine(&server, config, logged_in_session(None)).await;
    let mut events = engine.subscribe();

    engine.popup_shown().await;

    let seen = drain(&mut events);
    assert_eq!(seen[0], EngineEvent::LoaderShown);
    assert_eq!(
        seen[1],
        EngineEvent::InterfaceConfigPushed(InterfaceConfig {
            ability_save_feeds: true,
            popup_font_size: 150,
            show_categories: false,
        })
    );
    match seen.last() {
        Some(EngineEvent::FeedsUpdated {
            feeds,
            is_saved_feeds: false,
            ..
        }) => assert_eq!(feeds.len(), 1),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_left_click_resets_counter() {
    let server = MockServer::start().await;
    let config = Config {
        reset_counter_on_click: true,
        ..test_config(&server)
    };
    let (engine, db) = test_engine(&server, config, logged_in_session(None)).await;
    let mut events = engine.subscribe();

    engine.handle_click(MouseButton::Left).await.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![EngineEvent::UnreadCountUpdated {
            count: 0,
            is_logged_in: false
        }]
    );
    let stored = db.load_session().await.unwrap();
    assert!(stored.last_counter_reset_at > DateTime::<Utc>::UNIX_EPOCH);
}

#[tokio::test]
async fn test_open_site_click_while_logged_out_starts_authorization() {
    let server = MockServer::start().await;
    let (engine, _db) = test_engine(&server, test_config(&server), SessionState::default()).await;
    let mut events = engine.subscribe();

    engine.handle_click(MouseButton::Right).await.unwrap();

    match drain(&mut events).as_slice() {
        [EngineEvent::OpenUrl { url, in_background: false }] => {
            assert!(url.contains("/auth/auth?response_type=code"));
        }
        other => panic!("unexpected events {:?}", other),
    }
}

#[tokio::test]
async fn test_apply_config_keeps_saved_filters() {
    let server = MockServer::start().await;
    let (engine, db) = test_engine(&server, test_config(&server), logged_in_session(None)).await;
    let selection = FilterSelection {
        filters: vec!["user/u1/category/news".to_string()],
        enabled: true,
    };
    db.save_filters(&selection).await.unwrap();

    let next = Config {
        update_interval_minutes: 30,
        ..test_config(&server)
    };
    engine.apply_config(next).await.unwrap();
    engine.shutdown().await;

    let config = engine.config().await;
    assert_eq!(config.update_interval(), 30);
    assert_eq!(config.filters, selection.filters);
    assert!(config.is_filters_enabled);
}

#[tokio::test]
async fn test_save_flag_flips_without_user_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"category%2Fa/contents$"))
        .respond_with(stream(vec![entry("e1", 100)]))
        .mount(&server)
        .await;

    // Filter streams need no user id, so the cache fills without one
    let config = Config {
        is_filters_enabled: true,
        filters: vec!["user/u1/category/a".into()],
        ..test_config(&server)
    };
    let session = SessionState {
        user_id: None,
        ..logged_in_session(None)
    };
    let (engine, _db) = test_engine(&server, config, session).await;
    engine.update_feeds(true).await.unwrap();

    let result = engine.set_saved("e1", true).await;

    assert!(matches!(result, Err(EngineError::NotLoggedIn)));
    assert!(engine.cached_feeds().await[0].is_saved);
}

#[tokio::test]
async fn test_schedule_with_huge_interval() {
    let server = MockServer::start().await;
    let config = Config {
        update_interval_minutes: i64::MAX as u64,
        ..test_config(&server)
    };
    let (engine, _db) = test_engine(&server, config, logged_in_session(None)).await;

    engine.start_schedule().await;
    assert_eq!(engine.scheduled_timers().await, 2);

    engine.shutdown().await;
}
