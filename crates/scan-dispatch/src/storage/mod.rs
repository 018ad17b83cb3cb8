//! Contracts of the external collaborators: the execution queue, the durable
//! request/result stores, the pool telemetry source and the queue-load store.
//!
//! All of these are implemented elsewhere (hosted services in deployment,
//! in-memory fakes in tests). Methods return boxed futures so that
//! implementations stay object-safe; an implementation clones whatever the
//! future needs out of `&self` and the arguments.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::scan::{
    PoolLoadSnapshot, QueueLoadSnapshot, ScanId, ScanMessage, ScanRequest, ScanRunResult, ScanType,
};

pub type StoreResult<T> = anyhow::Result<T>;

pub type StoreFuture<T> = Pin<Box<dyn Future<Output = StoreResult<T>>>>;

/// One page of pending scan requests.
#[derive(Debug, Clone)]
pub struct RequestPage {
    pub items: Vec<ScanRequest>,
    /// Opaque token resuming the walk; `None` when the store is exhausted.
    pub continuation_token: Option<String>,
}

/// Execution queue consumed by the remote compute pool.
pub trait MessageQueue {
    /// Number of messages currently held by the queue.
    fn message_count(&self, queue_name: &str) -> StoreFuture<u64>;

    /// Posts one scan message. Returns whether the queue accepted it; a
    /// rejection is per-message and does not fail the cycle.
    fn create_message(&self, queue_name: &str, message: &ScanMessage) -> StoreFuture<bool>;
}

/// Durable store of pending scan requests, walked in pages.
pub trait RequestStore {
    fn read_requests(
        &self,
        scan_type: ScanType,
        continuation_token: Option<&str>,
    ) -> StoreFuture<RequestPage>;

    fn delete_requests(&self, ids: &[ScanId]) -> StoreFuture<()>;
}

/// Durable store of scan run documents.
pub trait RunResultStore {
    fn read_scan_run(&self, id: &str) -> StoreFuture<Option<ScanRunResult>>;

    fn write_scan_runs(&self, results: &[ScanRunResult]) -> StoreFuture<()>;
}

/// Telemetry source describing the downstream compute pool.
pub trait PoolLoadSource {
    /// Latest load snapshot of the pool, absent until the pool subsystem has
    /// published one.
    fn read_pool_load(&self, pool_name: &str) -> StoreFuture<Option<PoolLoadSnapshot>>;

    /// Length of one dispatch scheduling cycle. Pool telemetry is calibrated
    /// against this interval.
    fn dispatch_cycle(&self) -> Duration;
}

/// Store of the per-queue load snapshot written by the queue-size generator.
pub trait QueueLoadStore {
    fn read_queue_load(&self, queue_name: &str) -> StoreFuture<Option<QueueLoadSnapshot>>;

    fn write_queue_load(&self, snapshot: &QueueLoadSnapshot, queue_name: &str) -> StoreFuture<()>;
}
