use serde::{Deserialize, Serialize};

use crate::scan::ScanType;

/// Capacity limit of the execution queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// When the queue already holds this many messages, a dispatch cycle is a
    /// no-op.
    pub max_queue_size: u64,
}

/// Retry policy applied when classifying pending scan requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    /// Minimum time between two dispatch attempts of the same scan.
    pub retry_interval_minutes: u32,
    /// Dispatch attempts allowed per scan before it is reaped.
    pub max_retry_count: u32,
    /// Absolute per-scan time budget, measured from request creation.
    pub stale_timeout_minutes: u32,
}

/// Runtime configuration read from the hosted configuration store.
///
/// Values may change between cycles; callers read them once per cycle. A read
/// failure or an invalid document aborts the cycle without mutating any
/// persisted state.
pub trait RuntimeConfig {
    fn queue_config(&self) -> anyhow::Result<QueueConfig>;
    fn scan_config(&self) -> anyhow::Result<ScanConfig>;
}

/// Static identity and bounds of one dispatcher instance, fixed at
/// construction time.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Name of the execution queue this dispatcher feeds.
    pub queue_name: String,
    /// Identity of the compute pool whose telemetry drives the target depth.
    pub pool_name: String,
    /// Scan type served by this dispatcher.
    pub scan_type: ScanType,
    /// Target queue depth used before any pool telemetry exists.
    pub default_queue_size: u64,
    /// Upper bound on pending-request deletions per cycle.
    pub delete_budget: usize,
}
