//! Shared fixtures: in-memory fakes for the store collaborators and builders
//! for telemetry and run documents. Everything is single-threaded
//! (`Rc<RefCell<..>>`), matching how the dispatcher itself is driven.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use chrono::{Duration as TimeDelta, Utc};
use derive_builder::Builder;
use log::LevelFilter;

use crate::config::{DispatcherSettings, QueueConfig, RuntimeConfig, ScanConfig};
use crate::scan::{
    PoolLoadSnapshot, QueueLoadSnapshot, RunState, ScanId, ScanMessage, ScanRequest, ScanRun,
    ScanRunResult, ScanType,
};
use crate::storage::{
    MessageQueue, PoolLoadSource, QueueLoadStore, RequestPage, RequestStore, RunResultStore,
    StoreFuture,
};

pub fn init_test_logging() {
    let _ = env_logger::Builder::default()
        .filter(None, LevelFilter::Debug)
        .try_init();
}

pub fn default_settings() -> DispatcherSettings {
    DispatcherSettings {
        queue_name: "scan-requests".to_string(),
        pool_name: "scan-pool".to_string(),
        scan_type: ScanType::Accessibility,
        default_queue_size: 4,
        delete_budget: 3,
    }
}

pub fn scan_request(id: &str) -> ScanRequest {
    ScanRequest {
        id: id.to_string(),
        url: format!("https://scans.test/{id}"),
        scan_type: ScanType::Accessibility,
        priority: 0,
    }
}

/// A run document whose run timestamp is `run_age_minutes` old and whose
/// creation timestamp is `creation_age_minutes` old.
pub fn run_result(
    id: &str,
    state: RunState,
    retry_count: u32,
    run_age_minutes: i64,
    creation_age_minutes: i64,
) -> ScanRunResult {
    let now = Utc::now();
    ScanRunResult {
        id: id.to_string(),
        run: ScanRun {
            state,
            retry_count,
            timestamp: now - TimeDelta::minutes(run_age_minutes),
            error: None,
        },
        creation_timestamp: now - TimeDelta::minutes(creation_age_minutes),
    }
}

#[derive(Builder)]
#[builder(pattern = "owned", build_fn(skip))]
#[allow(dead_code)]
pub struct PoolLoad {
    is_idle: bool,
    activity_state_flags: u32,
    target_max_tasks_per_pool: i64,
    pool_fill_interval_seconds: u64,
    tasks_increment_count_per_interval: u64,
    sampling_interval_seconds: u64,
}

impl PoolLoadBuilder {
    pub fn build(self) -> PoolLoadSnapshot {
        PoolLoadSnapshot {
            is_idle: self.is_idle.unwrap_or(false),
            activity_state_flags: self.activity_state_flags.unwrap_or(1),
            target_max_tasks_per_pool: self.target_max_tasks_per_pool.unwrap_or(32),
            pool_fill_interval_seconds: self.pool_fill_interval_seconds.unwrap_or(15),
            tasks_increment_count_per_interval: self
                .tasks_increment_count_per_interval
                .unwrap_or(4),
            sampling_interval_seconds: self.sampling_interval_seconds.unwrap_or(60),
            timestamp: Utc::now(),
        }
    }
}

pub struct StaticRuntimeConfig {
    queue: QueueConfig,
    scan: ScanConfig,
}

impl StaticRuntimeConfig {
    pub fn new(max_queue_size: u64, scan: ScanConfig) -> Self {
        Self {
            queue: QueueConfig { max_queue_size },
            scan,
        }
    }
}

impl RuntimeConfig for StaticRuntimeConfig {
    fn queue_config(&self) -> anyhow::Result<QueueConfig> {
        Ok(self.queue.clone())
    }

    fn scan_config(&self) -> anyhow::Result<ScanConfig> {
        Ok(self.scan.clone())
    }
}

#[derive(Default)]
struct QueueState {
    message_count: u64,
    messages: Vec<ScanMessage>,
    rejected: HashSet<ScanId>,
    fail_transport: bool,
}

/// In-memory execution queue.
#[derive(Default)]
pub struct TestQueue {
    state: Rc<RefCell<QueueState>>,
}

impl TestQueue {
    pub fn set_message_count(&self, count: u64) {
        self.state.borrow_mut().message_count = count;
    }

    /// The queue will refuse messages for this scan id.
    pub fn reject(&self, id: &str) {
        self.state.borrow_mut().rejected.insert(id.to_string());
    }

    /// Every post fails with a transport error.
    pub fn fail_transport(&self) {
        self.state.borrow_mut().fail_transport = true;
    }

    pub fn messages(&self) -> Vec<ScanMessage> {
        self.state.borrow().messages.clone()
    }
}

impl MessageQueue for TestQueue {
    fn message_count(&self, _queue_name: &str) -> StoreFuture<u64> {
        let state = self.state.clone();
        Box::pin(async move { Ok(state.borrow().message_count) })
    }

    fn create_message(&self, _queue_name: &str, message: &ScanMessage) -> StoreFuture<bool> {
        let state = self.state.clone();
        let message = message.clone();
        Box::pin(async move {
            let mut state = state.borrow_mut();
            if state.fail_transport {
                anyhow::bail!("execution queue is unavailable");
            }
            if state.rejected.contains(&message.id) {
                return Ok(false);
            }
            state.message_count += 1;
            state.messages.push(message);
            Ok(true)
        })
    }
}

#[derive(Default)]
struct RequestStoreState {
    requests: Vec<ScanRequest>,
    deleted: HashSet<ScanId>,
    pages_read: usize,
}

/// In-memory pending-request store with index-based continuation tokens.
pub struct TestRequestStore {
    page_size: usize,
    state: Rc<RefCell<RequestStoreState>>,
}

impl TestRequestStore {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size,
            state: Rc::default(),
        }
    }

    pub fn add(&self, request: ScanRequest) {
        self.state.borrow_mut().requests.push(request);
    }

    pub fn deleted(&self) -> HashSet<ScanId> {
        self.state.borrow().deleted.clone()
    }

    pub fn pages_read(&self) -> usize {
        self.state.borrow().pages_read
    }
}

impl RequestStore for TestRequestStore {
    fn read_requests(
        &self,
        scan_type: ScanType,
        continuation_token: Option<&str>,
    ) -> StoreFuture<RequestPage> {
        let state = self.state.clone();
        let page_size = self.page_size;
        let start: usize = continuation_token
            .map(|token| token.parse().unwrap_or(0))
            .unwrap_or(0);
        Box::pin(async move {
            let mut state = state.borrow_mut();
            state.pages_read += 1;
            let matching: Vec<ScanRequest> = state
                .requests
                .iter()
                .filter(|request| request.scan_type == scan_type)
                .cloned()
                .collect();
            let end = (start + page_size).min(matching.len());
            let continuation_token = (end < matching.len()).then(|| end.to_string());
            Ok(RequestPage {
                items: matching[start..end].to_vec(),
                continuation_token,
            })
        })
    }

    fn delete_requests(&self, ids: &[ScanId]) -> StoreFuture<()> {
        let state = self.state.clone();
        let ids = ids.to_vec();
        Box::pin(async move {
            let mut state = state.borrow_mut();
            state.requests.retain(|request| !ids.contains(&request.id));
            state.deleted.extend(ids);
            Ok(())
        })
    }
}

/// In-memory run-result store.
#[derive(Default)]
pub struct TestRunResultStore {
    results: Rc<RefCell<HashMap<ScanId, ScanRunResult>>>,
}

impl TestRunResultStore {
    pub fn seed(&self, result: ScanRunResult) {
        self.results.borrow_mut().insert(result.id.clone(), result);
    }

    pub fn get(&self, id: &str) -> Option<ScanRunResult> {
        self.results.borrow().get(id).cloned()
    }
}

impl RunResultStore for TestRunResultStore {
    fn read_scan_run(&self, id: &str) -> StoreFuture<Option<ScanRunResult>> {
        let results = self.results.clone();
        let id = id.to_string();
        Box::pin(async move { Ok(results.borrow().get(&id).cloned()) })
    }

    fn write_scan_runs(&self, batch: &[ScanRunResult]) -> StoreFuture<()> {
        let results = self.results.clone();
        let batch = batch.to_vec();
        Box::pin(async move {
            let mut results = results.borrow_mut();
            for result in batch {
                results.insert(result.id.clone(), result);
            }
            Ok(())
        })
    }
}

/// Pool telemetry source with a settable snapshot.
pub struct TestPoolLoadSource {
    cycle: Duration,
    snapshot: Rc<RefCell<Option<PoolLoadSnapshot>>>,
}

impl TestPoolLoadSource {
    pub fn new(cycle: Duration) -> Self {
        Self {
            cycle,
            snapshot: Rc::default(),
        }
    }

    pub fn set_snapshot(&self, snapshot: PoolLoadSnapshot) {
        *self.snapshot.borrow_mut() = Some(snapshot);
    }
}

impl PoolLoadSource for TestPoolLoadSource {
    fn read_pool_load(&self, _pool_name: &str) -> StoreFuture<Option<PoolLoadSnapshot>> {
        let snapshot = self.snapshot.clone();
        Box::pin(async move { Ok(snapshot.borrow().clone()) })
    }

    fn dispatch_cycle(&self) -> Duration {
        self.cycle
    }
}

/// Single-slot queue-load store.
#[derive(Default)]
pub struct TestQueueLoadStore {
    snapshot: Rc<RefCell<Option<QueueLoadSnapshot>>>,
}

impl TestQueueLoadStore {
    /// Seeds the store as if a previous cycle had persisted this index.
    pub fn seed_index(&self, queue_buffering_index: u32) {
        *self.snapshot.borrow_mut() = Some(QueueLoadSnapshot {
            queue_size_per_interval: 0,
            queue_buffering_index,
            sampling_interval_seconds: 60,
            timestamp: Utc::now(),
        });
    }

    pub fn last_written(&self) -> Option<QueueLoadSnapshot> {
        self.snapshot.borrow().clone()
    }
}

impl QueueLoadStore for TestQueueLoadStore {
    fn read_queue_load(&self, _queue_name: &str) -> StoreFuture<Option<QueueLoadSnapshot>> {
        let snapshot = self.snapshot.clone();
        Box::pin(async move { Ok(snapshot.borrow().clone()) })
    }

    fn write_queue_load(
        &self,
        snapshot: &QueueLoadSnapshot,
        _queue_name: &str,
    ) -> StoreFuture<()> {
        let slot = self.snapshot.clone();
        let snapshot = snapshot.clone();
        Box::pin(async move {
            *slot.borrow_mut() = Some(snapshot);
            Ok(())
        })
    }
}
