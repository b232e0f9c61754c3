use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, StatusCode, Url};
use tokio::sync::mpsc;

use notifica_core::host::ScopeCall;
use notifica_core::{
    Agent, AgentConfig, AgentError, AgentEvent, CacheError, CacheStorage, CacheWrite,
    DiskCacheStorage, EventOutcome, FetchOutcome, Host, MemoryCacheStorage, Network, NetworkError, PushError,
    Request, Response, ResponseType, TracingNotifier, TracingScope,
};

const ORIGIN: &str = "https://app.example";

/// Network that answers from a fixed table and records every request.
#[derive(Default)]
struct ScriptedNetwork {
    replies: Mutex<HashMap<String, Response>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    fn reply(&self, path: &str, response: Response) {
        self.replies.lock().unwrap().insert(url(path).to_string(), response);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        self.calls.lock().unwrap().push(request.url.to_string());
        self.replies
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned()
            .ok_or_else(|| NetworkError::Unavailable(format!("offline: {}", request.url)))
    }
}

/// Memory storage that counts lookups and can be told to fail.
#[derive(Default)]
struct InstrumentedStorage {
    inner: MemoryCacheStorage,
    lookups: AtomicUsize,
    fail_lookups: bool,
    fail_puts: bool,
    fail_deletes: bool,
}

fn storage_failure(reason: &str) -> CacheError {
    CacheError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, reason.to_string()))
}

#[async_trait]
impl CacheStorage for InstrumentedStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.inner.open(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        if self.fail_deletes {
            return Err(storage_failure("read-only storage"));
        }
        self.inner.delete(name).await
    }

    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>, CacheError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups {
            return Err(storage_failure("index unreadable"));
        }
        self.inner.match_request(name, request).await
    }

    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<(), CacheError> {
        if self.fail_puts {
            return Err(storage_failure("disk full"));
        }
        self.inner.put(name, request, response).await
    }
}

struct Harness {
    agent: Agent,
    storage: Arc<InstrumentedStorage>,
    network: Arc<ScriptedNetwork>,
    notifier: Arc<TracingNotifier>,
    scope: Arc<TracingScope>,
    writes: mpsc::Receiver<CacheWrite>,
}

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

fn ok(body: &'static str) -> Response {
    Response::new(StatusCode::OK, body).with_url(url("/"))
}

fn config() -> AgentConfig {
    AgentConfig {
        origin: ORIGIN.to_string(),
        cache_version: "v8".to_string(),
        precache: vec!["/".into(), "/index.html".into(), "/assets/css/style.css".into()],
        ..AgentConfig::default()
    }
}

fn harness_with(config: AgentConfig, storage: InstrumentedStorage) -> Harness {
    let storage = Arc::new(storage);
    let network = Arc::new(ScriptedNetwork::default());
    let notifier = Arc::new(TracingNotifier::new());
    let scope = Arc::new(TracingScope::new());
    let (tx, writes) = mpsc::channel(16);

    let host = Host {
        caches: storage.clone(),
        network: network.clone(),
        notifier: notifier.clone(),
        scope: scope.clone(),
    };
    let agent = Agent::new(config, host).unwrap().with_cache_write_channel(tx);

    Harness {
        agent,
        storage,
        network,
        notifier,
        scope,
        writes,
    }
}

fn harness() -> Harness {
    harness_with(config(), InstrumentedStorage::default())
}

async fn next_write(h: &mut Harness) -> CacheWrite {
    tokio::time::timeout(Duration::from_secs(5), h.writes.recv())
        .await
        .expect("cache write did not settle")
        .expect("cache write channel closed")
}

// ============================================================================
// Fetch
// ============================================================================

#[tokio::test]
async fn test_cache_hit_skips_network() {
    let h = harness();
    h.storage
        .put("notifica-pwa-cache-v8", &Request::get(url("/app.js")), ok("cached"))
        .await
        .unwrap();

    let outcome = h.agent.handle_fetch(Request::get(url("/app.js"))).await;

    match outcome {
        FetchOutcome::Cached(r) => assert_eq!(r.body, "cached"),
        other => panic!("expected cache hit, got {:?}", other),
    }
    assert!(h.network.calls().is_empty());
}

#[tokio::test]
async fn test_miss_fetches_and_stores_one_copy() {
    let mut h = harness();
    h.network.reply("/data.json", ok("{\"a\":1}"));

    let outcome = h.agent.handle_fetch(Request::get(url("/data.json"))).await;
    let response = match outcome {
        FetchOutcome::Network(r) => r,
        other => panic!("expected network response, got {:?}", other),
    };
    assert_eq!(response.body, Bytes::from_static(b"{\"a\":1}"));

    let write = next_write(&mut h).await;
    assert!(write.result.is_ok());
    assert_eq!(write.cache_name, "notifica-pwa-cache-v8");
    assert_eq!(write.url, url("/data.json").as_str());
    assert_eq!(h.storage.inner.len("notifica-pwa-cache-v8").await, Some(1));

    // The stored copy is complete and independent of the returned one.
    let second = h.agent.handle_fetch(Request::get(url("/data.json"))).await;
    match second {
        FetchOutcome::Cached(r) => assert_eq!(r.body, response.body),
        other => panic!("expected cache hit, got {:?}", other),
    }
    assert_eq!(h.network.calls().len(), 1);
}

#[tokio::test]
async fn test_cross_origin_and_non_get_pass_through() {
    let h = harness();
    let cross_origin = Request::get(Url::parse("https://cdn.example/lib.js").unwrap());
    let lookalike = Request::get(Url::parse("https://app.example.evil.test/").unwrap());
    let post = Request::new(Method::POST, url("/api/orders"));
    let head = Request::new(Method::HEAD, url("/"));

    for request in [cross_origin, lookalike, post, head] {
        assert!(!h.agent.intercepts(&request));
        assert!(matches!(h.agent.handle_fetch(request).await, FetchOutcome::Passthrough));
    }
    assert_eq!(h.storage.lookups.load(Ordering::SeqCst), 0);
    assert!(h.network.calls().is_empty());
}

#[tokio::test]
async fn test_not_found_is_returned_but_not_cached() {
    let h = harness();
    let not_found = Response::new(StatusCode::NOT_FOUND, "missing").with_header("X-Trace", "1");
    h.network.reply("/gone", not_found.clone());

    let outcome = h.agent.handle_fetch(Request::get(url("/gone"))).await;

    assert_eq!(outcome.into_response(), Some(not_found));
    assert_eq!(h.storage.inner.len("notifica-pwa-cache-v8").await, None);
}

#[tokio::test]
async fn test_non_basic_responses_are_not_cached() {
    let h = harness();
    h.network.reply("/redirected", ok("elsewhere").with_type(ResponseType::Cors));
    h.network.reply("/opaque", Response::new(StatusCode::OK, "").with_type(ResponseType::Opaque));

    for path in ["/redirected", "/opaque"] {
        let outcome = h.agent.handle_fetch(Request::get(url(path))).await;
        assert!(matches!(outcome, FetchOutcome::Network(_)));
    }
    assert_eq!(h.storage.inner.len("notifica-pwa-cache-v8").await, None);
}

#[tokio::test]
async fn test_network_failure_yields_no_response() {
    let h = harness();
    let outcome = h.agent.handle_fetch(Request::get(url("/offline"))).await;
    assert!(matches!(outcome, FetchOutcome::NoResponse));
    assert!(outcome.response().is_none());
}

#[tokio::test]
async fn test_concurrent_misses_both_fetch_and_write() {
    let mut h = harness();
    h.network.reply("/race", ok("race"));

    let (a, b) = tokio::join!(
        h.agent.handle_fetch(Request::get(url("/race"))),
        h.agent.handle_fetch(Request::get(url("/race"))),
    );
    assert!(matches!(a, FetchOutcome::Network(_)));
    assert!(matches!(b, FetchOutcome::Network(_)));
    assert_eq!(h.network.calls().len(), 2);

    assert!(next_write(&mut h).await.result.is_ok());
    assert!(next_write(&mut h).await.result.is_ok());
    assert_eq!(h.storage.inner.len("notifica-pwa-cache-v8").await, Some(1));
}

#[tokio::test]
async fn test_lookup_error_falls_back_to_network() {
    let storage = InstrumentedStorage {
        fail_lookups: true,
        ..InstrumentedStorage::default()
    };
    let mut h = harness_with(config(), storage);
    h.network.reply("/app.js", ok("fresh"));

    let outcome = h.agent.handle_fetch(Request::get(url("/app.js"))).await;

    match outcome {
        FetchOutcome::Network(r) => assert_eq!(r.body, "fresh"),
        other => panic!("expected network response, got {:?}", other),
    }
    assert_eq!(h.storage.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(h.network.calls(), vec![url("/app.js").to_string()]);
    assert!(next_write(&mut h).await.result.is_ok());
}

#[tokio::test]
async fn test_failed_cache_write_still_returns_response() {
    let storage = InstrumentedStorage {
        fail_puts: true,
        ..InstrumentedStorage::default()
    };
    let mut h = harness_with(config(), storage);
    h.network.reply("/data.json", ok("payload"));

    let outcome = h.agent.handle_fetch(Request::get(url("/data.json"))).await;
    match outcome {
        FetchOutcome::Network(r) => assert_eq!(r.body, "payload"),
        other => panic!("expected network response, got {:?}", other),
    }

    let write = next_write(&mut h).await;
    assert_eq!(write.url, url("/data.json").as_str());
    assert!(matches!(write.result, Err(CacheError::Io(_))));
    assert_eq!(h.storage.inner.len("notifica-pwa-cache-v8").await, None);
}

#[tokio::test]
async fn test_vary_star_response_is_returned_but_not_stored() {
    let mut h = harness();
    h.network.reply("/feed", ok("feed").with_header("Vary", "*"));

    let outcome = h.agent.handle_fetch(Request::get(url("/feed"))).await;
    assert!(matches!(outcome, FetchOutcome::Network(_)));

    let write = next_write(&mut h).await;
    assert!(matches!(write.result, Err(CacheError::Unsupported(_))));
    assert_eq!(h.storage.inner.len("notifica-pwa-cache-v8").await, None);
}

// ============================================================================
// Install / Activate
// ============================================================================

#[tokio::test]
async fn test_install_precaches_manifest_and_skips_waiting() {
    let h = harness();
    for path in ["/", "/index.html", "/assets/css/style.css"] {
        h.network.reply(path, ok("asset"));
    }

    let report = h.agent.install().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.stored.len(), 3);
    assert_eq!(h.storage.inner.len("notifica-pwa-cache-v8").await, Some(3));
    assert_eq!(h.scope.calls(), vec![ScopeCall::SkipWaiting]);
}

#[tokio::test]
async fn test_install_tolerates_partial_failure() {
    let h = harness();
    h.network.reply("/", ok("shell"));
    h.network.reply("/index.html", Response::new(StatusCode::NOT_FOUND, ""));
    // "/assets/css/style.css" is unreachable

    let report = h.agent.install().await.unwrap();

    assert_eq!(report.stored, vec![url("/").to_string()]);
    let failed: Vec<&str> = report.failed.iter().map(|f| f.url.as_str()).collect();
    assert_eq!(
        failed,
        vec![url("/index.html").as_str(), url("/assets/css/style.css").as_str()]
    );
    assert_eq!(report.failed[0].reason, "Status 404 Not Found");
    assert_eq!(h.scope.calls(), vec![ScopeCall::SkipWaiting]);
}

#[tokio::test]
async fn test_install_rejects_partial_and_cross_origin_responses() {
    let h = harness();
    h.network.reply("/", ok("shell"));
    h.network.reply("/index.html", Response::new(StatusCode::PARTIAL_CONTENT, "<ht"));
    h.network.reply("/assets/css/style.css", ok("body{}").with_type(ResponseType::Cors));

    let report = h.agent.install().await.unwrap();

    assert_eq!(report.stored, vec![url("/").to_string()]);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0].url, url("/index.html").as_str());
    assert_eq!(report.failed[0].reason, "Status 206 Partial Content");
    assert_eq!(report.failed[1].reason, "Response type Cors");
    assert_eq!(h.storage.inner.len("notifica-pwa-cache-v8").await, Some(1));

    let lookup = h
        .storage
        .match_request("notifica-pwa-cache-v8", &Request::get(url("/index.html")))
        .await
        .unwrap();
    assert!(lookup.is_none());
}

#[tokio::test]
async fn test_strict_install_fails_without_skipping_wait() {
    let strict = AgentConfig {
        strict_precache: true,
        ..config()
    };
    let h = harness_with(strict, InstrumentedStorage::default());
    h.network.reply("/", ok("shell"));

    let result = h.agent.install().await;

    match result {
        Err(AgentError::Precache(err)) => {
            assert_eq!(err.total, 3);
            assert_eq!(err.failed.len(), 2);
        }
        other => panic!("expected precache error, got {:?}", other),
    }
    assert!(h.scope.calls().is_empty());
}

#[tokio::test]
async fn test_activate_deletes_stale_generations() {
    let h = harness();
    h.storage
        .put("notifica-pwa-cache-v6", &Request::get(url("/")), ok("v6"))
        .await
        .unwrap();
    h.storage.open("notifica-pwa-cache-v7").await.unwrap();
    h.storage
        .put("notifica-pwa-cache-v8", &Request::get(url("/")), ok("v8"))
        .await
        .unwrap();
    h.storage.open("unrelated").await.unwrap();

    let deleted = h.agent.activate().await.unwrap();

    assert_eq!(
        deleted,
        vec!["notifica-pwa-cache-v6", "notifica-pwa-cache-v7", "unrelated"]
    );
    assert_eq!(h.storage.keys().await.unwrap(), vec!["notifica-pwa-cache-v8"]);
    let kept = h
        .storage
        .match_request("notifica-pwa-cache-v8", &Request::get(url("/")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kept.body, "v8");
    assert_eq!(h.scope.calls(), vec![ScopeCall::Claim]);
}

#[tokio::test]
async fn test_activate_removes_unreadable_disk_generation() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(DiskCacheStorage::new(dir.path().to_path_buf()).unwrap());
    storage
        .put("notifica-pwa-cache-v6", &Request::get(url("/")), ok("v6"))
        .await
        .unwrap();
    storage
        .put("notifica-pwa-cache-v8", &Request::get(url("/")), ok("v8"))
        .await
        .unwrap();

    // Simulate a crash halfway through writing the old generation's index.
    let stale = dir.path().join("notifica-pwa-cache-v6.json");
    let contents = std::fs::read(&stale).unwrap();
    std::fs::write(&stale, &contents[..contents.len() / 3]).unwrap();

    let host = Host {
        caches: storage.clone(),
        network: Arc::new(ScriptedNetwork::default()),
        notifier: Arc::new(TracingNotifier::new()),
        scope: Arc::new(TracingScope::new()),
    };
    let agent = Agent::new(config(), host).unwrap();

    let deleted = agent.activate().await.unwrap();

    assert_eq!(deleted, vec!["notifica-pwa-cache-v6"]);
    assert!(!stale.exists());
    assert!(!dir.path().join("notifica-pwa-cache-v6.bodies").exists());
    assert_eq!(storage.keys().await.unwrap(), vec!["notifica-pwa-cache-v8"]);
}

#[tokio::test]
async fn test_activate_deletion_failure_propagates() {
    let storage = InstrumentedStorage {
        fail_deletes: true,
        ..InstrumentedStorage::default()
    };
    let h = harness_with(config(), storage);
    h.storage.open("notifica-pwa-cache-v7").await.unwrap();

    let result = h.agent.activate().await;

    assert!(matches!(result, Err(AgentError::Cache(CacheError::Io(_)))));
    assert!(h.scope.calls().is_empty());
}

// ============================================================================
// Push / Notification click
// ============================================================================

#[tokio::test]
async fn test_push_and_click_open_payload_url() {
    let h = harness();
    let body = br#"{"title":"Order Shipped","body":"Your order is on the way","url":"/orders/42"}"#;

    let notification = h.agent.handle_push(Some(body.as_slice())).await.unwrap();
    assert_eq!(notification.title, "Order Shipped");
    assert_eq!(notification.options.body, "Your order is on the way");
    assert_eq!(notification.url(), "/orders/42");
    assert_eq!(h.notifier.visible(), vec![notification.clone()]);

    let opened = h.agent.handle_notification_click(&notification).await.unwrap();
    assert_eq!(opened, "/orders/42");
    assert!(h.notifier.visible().is_empty());
    assert_eq!(h.scope.calls(), vec![ScopeCall::OpenWindow("/orders/42".to_string())]);
}

#[tokio::test]
async fn test_empty_push_uses_defaults() {
    let h = harness();
    let notification = h.agent.handle_push(Some(b"{}".as_slice())).await.unwrap();
    assert_eq!(notification.title, "New Notification");
    assert_eq!(notification.options.body, "You have a new message.");
    assert_eq!(notification.options.vibrate, vec![200, 100, 200]);
    assert_eq!(notification.url(), "/");
}

#[tokio::test]
async fn test_bad_push_is_reported_and_not_shown() {
    let h = harness();
    let malformed = h.agent.handle_push(Some(b"{title: oops".as_slice())).await;
    assert!(matches!(malformed, Err(AgentError::Push(PushError::Malformed(_)))));

    let missing = h.agent.handle_push(None).await;
    assert!(matches!(missing, Err(AgentError::Push(PushError::MissingPayload))));

    assert!(h.notifier.shown().is_empty());
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_dispatch_routes_events() {
    let h = harness();

    let outcome = h
        .agent
        .dispatch(AgentEvent::Push(Some(Bytes::from_static(br#"{"url":"/inbox"}"#))))
        .await
        .unwrap();
    let notification = match outcome {
        EventOutcome::NotificationShown(n) => n,
        other => panic!("unexpected outcome {:?}", other),
    };

    let outcome = h
        .agent
        .dispatch(AgentEvent::NotificationClick(notification))
        .await
        .unwrap();
    assert!(matches!(outcome, EventOutcome::WindowOpened(ref u) if u == "/inbox"));

    let outcome = h
        .agent
        .dispatch(AgentEvent::Fetch(Request::new(Method::POST, url("/"))))
        .await
        .unwrap();
    assert!(matches!(outcome, EventOutcome::Fetched(FetchOutcome::Passthrough)));

    let outcome = h.agent.dispatch(AgentEvent::Activate).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Activated(ref deleted) if deleted.is_empty()));
}

#[test]
fn test_invalid_config_is_rejected() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let host = Host {
        caches: storage,
        network: Arc::new(ScriptedNetwork::default()),
        notifier: Arc::new(TracingNotifier::new()),
        scope: Arc::new(TracingScope::new()),
    };
    let bad = AgentConfig {
        cache_version: String::new(),
        ..config()
    };
    assert!(matches!(Agent::new(bad, host), Err(AgentError::Config(_))));
}
