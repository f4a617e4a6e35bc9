//! End-to-end behaviour of sync runs with scripted sources.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bili_ingest::models::{CatalogFetch, VideoItem, VideoStats};
use bili_ingest::rate_limiter::{AdaptiveRateLimiter, RateLimiterConfig};
use bili_ingest::{
    ApiConfig, ApiError, BiliApi, BiliClient, CatalogSource, ClientConfig, Credential,
    CredentialEntry, CredentialPool, DiscardSink, PoolConfig, RetryPolicy, RosterEntry, RunState,
    SinkReport, SyncConfig, SyncError, SyncMode, SyncOrchestrator, SyncSink, TaskStatus,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

enum Step {
    Items(usize),
    Auth,
    Malformed,
    /// Signal `started`, then wait for `release` before returning items.
    Gate(usize),
}

struct ScriptedSource {
    pool: Arc<CredentialPool>,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<String>>,
    auth_reports: Mutex<Vec<String>>,
    started: Notify,
    release: Notify,
}

impl ScriptedSource {
    fn new(pool: Arc<CredentialPool>, scripts: Vec<(&str, Vec<Step>)>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            scripts: Mutex::new(
                scripts
                    .into_iter()
                    .map(|(id, steps)| (id.to_string(), steps.into()))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
            auth_reports: Mutex::new(Vec::new()),
            started: Notify::new(),
            release: Notify::new(),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

fn items(creator: &str, n: usize) -> CatalogFetch {
    CatalogFetch {
        items: (0..n)
            .map(|i| VideoItem {
                video_id: format!("BV{creator}{i}"),
                aid: i as u64,
                title: format!("{creator} #{i}"),
                description: String::new(),
                cover_url: String::new(),
                duration: "01:00".into(),
                published_at: 0,
                stats: VideoStats::default(),
                creator_id: 0,
            })
            .collect(),
        ..Default::default()
    }
}

#[async_trait]
impl CatalogSource for ScriptedSource {
    async fn fetch_catalog(
        &self,
        creator: &RosterEntry,
        _max_items: usize,
        _mode: SyncMode,
    ) -> Result<CatalogFetch, ApiError> {
        self.calls.lock().push(creator.id.clone());
        let step = self
            .scripts
            .lock()
            .get_mut(&creator.id)
            .and_then(|s| s.pop_front())
            .unwrap_or(Step::Items(0));

        match step {
            Step::Items(n) => Ok(items(&creator.id, n)),
            Step::Auth => {
                let Some(active) = self.pool.get_active_credential() else {
                    return Err(ApiError::CredentialsExhausted);
                };
                self.auth_reports.lock().push(active.id.clone());
                Err(ApiError::Auth {
                    code: -101,
                    message: "账号未登录".into(),
                    credential_id: Some(active.id),
                })
            }
            Step::Malformed => Err(ApiError::Malformed("catalog page 1 has no list".into())),
            Step::Gate(n) => {
                self.started.notify_one();
                self.release.notified().await;
                Ok(items(&creator.id, n))
            }
        }
    }
}

/// Rejects every item whose title ends in `#1`.
#[derive(Default)]
struct PickySink {
    stored: Mutex<Vec<String>>,
}

#[async_trait]
impl SyncSink for PickySink {
    async fn store(&self, _creator: &RosterEntry, items: &[VideoItem]) -> SinkReport {
        let mut report = SinkReport::default();
        for item in items {
            if item.title.ends_with("#1") {
                report.rejected += 1;
            } else {
                self.stored.lock().push(item.video_id.clone());
                report.accepted += 1;
            }
        }
        report
    }
}

fn pool_with(ids: &[&str], max_error_count: u32) -> Arc<CredentialPool> {
    Arc::new(CredentialPool::with_entries(
        PoolConfig {
            max_error_count,
            ..Default::default()
        },
        ids.iter()
            .map(|id| CredentialEntry::new(*id, *id, Credential::parse(&format!("SESSDATA={id}")).unwrap())),
    ))
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        creator_retries: 3,
        creator_retry_delay_ms: 10,
        creator_time_budget_ms: None,
        inter_creator_delay_ms: 50,
        max_items_per_creator: 100,
    }
}

fn roster(ids: &[&str]) -> Vec<RosterEntry> {
    ids.iter().map(|id| RosterEntry::new(*id, format!("creator {id}"))).collect()
}

#[tokio::test(start_paused = true)]
async fn test_auth_errors_accumulate_on_credential_and_creator_recovers() {
    let pool = pool_with(&["k1", "k2"], 3);
    let source = ScriptedSource::new(
        pool.clone(),
        vec![
            ("c1", vec![Step::Items(2)]),
            ("c2", vec![Step::Auth, Step::Auth, Step::Items(1)]),
        ],
    );
    let orch = SyncOrchestrator::new(source.clone(), Arc::new(DiscardSink), pool.clone(), fast_config());

    let run = orch
        .start_run(roster(&["c1", "c2"]), 100, SyncMode::Full)
        .unwrap()
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    let c1 = run.task("c1").unwrap();
    assert_eq!(c1.status, TaskStatus::Completed);
    assert_eq!(c1.items_synced, 2);
    let c2 = run.task("c2").unwrap();
    assert_eq!(c2.status, TaskStatus::Completed);
    assert_eq!(c2.items_synced, 1);
    assert_eq!(c2.attempts, 3);
    assert_eq!(run.total_synced, 3);
    assert_eq!(run.total_errors, 0);

    // Both failures were charged to the same credential, which stays in use
    // below the deactivation threshold.
    assert_eq!(*source.auth_reports.lock(), vec!["k1".to_string(), "k1".to_string()]);
    let k1 = pool.entry("k1").unwrap();
    assert!(k1.is_active);
    assert_eq!(k1.error_count, 2);
    assert_eq!(k1.last_error.as_deref(), Some("账号未登录"));
    assert_eq!(pool.entry("k2").unwrap().error_count, 0);
    assert!(pool.list_status()[0].is_current);
    assert_eq!(source.calls(), vec!["c1", "c2", "c2", "c2"]);
}

fn always_expired<'a>(ids: &[&'a str]) -> Vec<(&'a str, Vec<Step>)> {
    ids.iter()
        .map(|id| (*id, (0..10).map(|_| Step::Auth).collect()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_expired_pool_is_deactivated_and_halts_with_default_threshold() {
    let pool = Arc::new(CredentialPool::with_entries(
        PoolConfig::default(),
        ["k1", "k2"]
            .into_iter()
            .map(|id| CredentialEntry::new(id, id, Credential::parse(&format!("SESSDATA={id}")).unwrap())),
    ));
    let creators = ["c1", "c2", "c3", "c4", "c5"];
    let source = ScriptedSource::new(pool.clone(), always_expired(&creators));
    let orch = SyncOrchestrator::new(source.clone(), Arc::new(DiscardSink), pool.clone(), fast_config());

    let run = orch
        .start_run(roster(&creators), 10, SyncMode::Full)
        .unwrap()
        .await
        .unwrap();

    assert!(pool.is_exhausted());
    for status in pool.list_status() {
        assert!(!status.is_active);
        assert_eq!(status.error_count, 3);
    }
    assert_eq!(
        *source.auth_reports.lock(),
        ["k1", "k1", "k1", "k2", "k2", "k2"].map(String::from).to_vec()
    );
    assert_eq!(source.calls(), vec!["c1", "c1", "c1", "c2", "c2", "c2"]);

    assert_eq!(run.halt_reason.as_deref(), Some("credential pool exhausted"));
    assert_eq!(run.failed_count(), 5);
    assert!(run.task("c1").unwrap().last_error.as_deref().unwrap().contains("-101"));
    for id in ["c2", "c3", "c4", "c5"] {
        assert_eq!(
            run.task(id).unwrap().last_error.as_deref(),
            Some("credential pool exhausted")
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_expired_credential_halts_on_first_creator() {
    let pool = pool_with(&["k1"], 3);
    let creators = ["c1", "c2", "c3"];
    let source = ScriptedSource::new(pool.clone(), always_expired(&creators));
    let orch = SyncOrchestrator::new(source.clone(), Arc::new(DiscardSink), pool.clone(), fast_config());

    let run = orch
        .start_run(roster(&creators), 10, SyncMode::Full)
        .unwrap()
        .await
        .unwrap();

    assert!(pool.is_exhausted());
    assert_eq!(pool.entry("k1").unwrap().error_count, 3);
    assert_eq!(source.calls(), vec!["c1", "c1", "c1"]);
    assert_eq!(run.task("c1").unwrap().attempts, 3);
    assert_eq!(run.failed_count(), 3);
    assert_eq!(run.halt_reason.as_deref(), Some("credential pool exhausted"));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_catalog_fails_only_that_creator() {
    let pool = pool_with(&["k1"], 3);
    let source = ScriptedSource::new(
        pool.clone(),
        vec![
            ("bad", vec![Step::Malformed, Step::Items(9)]),
            ("good", vec![Step::Items(2)]),
        ],
    );
    let orch = SyncOrchestrator::new(source.clone(), Arc::new(DiscardSink), pool, fast_config());

    let run = orch
        .start_run(roster(&["bad", "good"]), 100, SyncMode::Full)
        .unwrap()
        .await
        .unwrap();

    let bad = run.task("bad").unwrap();
    assert_eq!(bad.status, TaskStatus::Failed);
    assert!(bad.last_error.as_deref().unwrap().contains("malformed response"));
    assert_eq!(bad.attempts, 1);
    assert_eq!(bad.items_synced, 0);
    assert_eq!(run.task("good").unwrap().status, TaskStatus::Completed);
    assert_eq!(run.total_synced, 2);
    assert_eq!(run.total_errors, 0);
    assert_eq!(run.state, RunState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected_without_side_effects() {
    let pool = pool_with(&["k1"], 3);
    let source = ScriptedSource::new(pool.clone(), vec![("a", vec![Step::Gate(1)])]);
    let orch = SyncOrchestrator::new(source.clone(), Arc::new(DiscardSink), pool, fast_config());

    let handle = orch.start_run(roster(&["a", "b"]), 10, SyncMode::Full).unwrap();
    source.started.notified().await;

    let before = orch.run_status();
    let err = orch
        .start_run(roster(&["x", "y", "z"]), 99, SyncMode::Latest)
        .unwrap_err();
    assert_eq!(err, SyncError::AlreadyRunning);
    assert_eq!(orch.run_status(), before);
    assert_eq!(before.tasks.len(), 2);
    assert_eq!(before.max_items_per_creator, 10);

    source.release.notify_one();
    let run = handle.await.unwrap();
    assert_eq!(run.completed_count(), 2);
    assert!(!orch.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_lets_in_flight_creator_finish() {
    let pool = pool_with(&["k1"], 3);
    let source = ScriptedSource::new(pool.clone(), vec![("A", vec![Step::Gate(3)])]);
    let orch = SyncOrchestrator::new(source.clone(), Arc::new(DiscardSink), pool, fast_config());

    let handle = orch.start_run(roster(&["A", "B", "C"]), 10, SyncMode::Full).unwrap();
    source.started.notified().await;
    assert_eq!(orch.run_status().tasks[0].status, TaskStatus::Running);

    orch.cancel_run().unwrap();
    source.release.notify_one();
    let run = handle.await.unwrap();

    assert_eq!(run.state, RunState::Cancelled);
    assert!(!run.is_running);
    let a = run.task("A").unwrap();
    assert_eq!(a.status, TaskStatus::Completed);
    assert_eq!(a.items_synced, 3);
    for id in ["B", "C"] {
        let task = run.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.last_error.as_deref(), Some("cancelled"));
    }
    assert_eq!(source.calls(), vec!["A"]);
    assert_eq!(orch.cancel_run().unwrap_err(), SyncError::NotRunning);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_pool_halts_the_run() {
    let pool = pool_with(&["k1"], 1);
    let source = ScriptedSource::new(
        pool.clone(),
        vec![("c1", vec![Step::Items(1)]), ("c2", vec![Step::Auth])],
    );
    let orch = SyncOrchestrator::new(source.clone(), Arc::new(DiscardSink), pool.clone(), fast_config());

    let run = orch
        .start_run(roster(&["c1", "c2", "c3"]), 10, SyncMode::Full)
        .unwrap()
        .await
        .unwrap();

    assert!(pool.is_exhausted());
    assert_eq!(run.task("c1").unwrap().status, TaskStatus::Completed);
    for id in ["c2", "c3"] {
        let task = run.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.last_error.as_deref(), Some("credential pool exhausted"));
    }
    assert_eq!(run.halt_reason.as_deref(), Some("credential pool exhausted"));
    assert_eq!(source.calls(), vec!["c1", "c2"]);
}

#[tokio::test(start_paused = true)]
async fn test_sink_rejections_are_counted_as_errors() {
    let pool = pool_with(&["k1"], 3);
    let source = ScriptedSource::new(pool.clone(), vec![("c1", vec![Step::Items(3)])]);
    let sink = Arc::new(PickySink::default());
    let orch = SyncOrchestrator::new(source, sink.clone(), pool, fast_config());

    let run = orch
        .start_run(roster(&["c1"]), 10, SyncMode::Full)
        .unwrap()
        .await
        .unwrap();

    let task = run.task("c1").unwrap();
    assert_eq!(task.items_synced, 2);
    assert_eq!(task.errors, 1);
    assert_eq!(run.total_errors, 1);
    assert_eq!(sink.stored.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_tasks_never_overlap_and_run_in_roster_order() {
    let pool = pool_with(&["k1"], 3);
    let ids = ["r1", "r2", "r3", "r4", "r5"];
    let source = ScriptedSource::new(pool.clone(), ids.iter().map(|id| (*id, vec![Step::Items(1)])).collect());
    let orch = SyncOrchestrator::new(source.clone(), Arc::new(DiscardSink), pool, fast_config());

    let run = orch.start_run(roster(&ids), 10, SyncMode::Full).unwrap().await.unwrap();

    assert_eq!(source.calls(), ids.to_vec());
    for pair in run.tasks.windows(2) {
        assert!(pair[0].finished_at.unwrap() <= pair[1].started_at.unwrap());
    }
    for task in &run.tasks {
        assert!(task.finished_at.unwrap() >= task.started_at.unwrap());
    }
}

/// Full stack: orchestrator over the real domain operations and client.
#[tokio::test]
async fn test_missing_list_fails_creator_through_the_client() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x/space/wbi/arc/search"))
        .and(query_param("mid", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "message": "0", "data": {"page": {"pn": 1, "ps": 30, "count": 3}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/space/wbi/arc/search"))
        .and(query_param("mid", "200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "message": "0", "data": {
                "list": {"vlist": [
                    {"aid": 1, "bvid": "BV1", "title": "one", "pic": "//i0.hdslb.com/1.jpg", "length": "01:00", "created": 1, "play": 1, "comment": 0, "mid": 200},
                    {"aid": 2, "bvid": "BV2", "title": "two", "pic": "//i0.hdslb.com/2.jpg", "length": "02:00", "created": 2, "play": 2, "comment": 0, "mid": 200}
                ]},
                "page": {"pn": 1, "ps": 30, "count": 2}
            }
        })))
        .mount(&server)
        .await;

    let pool = pool_with(&["k1"], 3);
    let client = BiliClient::builder(ClientConfig {
        api_base: server.uri(),
        retry: RetryPolicy::no_retry(),
        ..Default::default()
    })
    .rate_limiter(Arc::new(AdaptiveRateLimiter::new(RateLimiterConfig {
        min_delay_ms: 1,
        base_delay_ms: 1,
        max_delay_ms: 10,
        jitter_ms: 0,
        ..Default::default()
    })))
    .pool(pool.clone())
    .build()
    .unwrap();
    let api = Arc::new(BiliApi::new(Arc::new(client), ApiConfig::default()));
    let config = SyncConfig {
        inter_creator_delay_ms: 1,
        creator_retry_delay_ms: 1,
        ..fast_config()
    };
    let orch = SyncOrchestrator::new(api, Arc::new(DiscardSink), pool, config);

    let run = orch
        .start_run(roster(&["100", "200"]), 50, SyncMode::Full)
        .unwrap()
        .await
        .unwrap();

    let failed = run.task("100").unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.last_error.as_deref().unwrap().contains("no list"));
    let ok = run.task("200").unwrap();
    assert_eq!(ok.status, TaskStatus::Completed);
    assert_eq!(ok.items_synced, 2);
    assert_eq!(run.total_synced, 2);
    assert_eq!(run.total_errors, 0);
}
