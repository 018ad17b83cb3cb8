//! Data model of scan requests and their run documents.
//!
//! A scan is tracked by two records sharing one id: the immutable
//! [`ScanRequest`] in the pending store, created by the submission path and
//! deleted by the dispatcher once the scan is resolved, and the mutable
//! [`ScanRunResult`] in the result store, which is the durable record of the
//! scan's progress. All records that cross a store boundary are JSON
//! documents with camelCase field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ScanId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanType {
    Accessibility,
    Privacy,
}

/// Lifecycle state of a single scan run.
///
/// `Accepted` is written by the submission path; the dispatcher advances it
/// to `Queued` or `Failed`; the remote worker owns the transitions through
/// `Running` and `Report` up to one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Accepted,
    Queued,
    Running,
    Report,
    Completed,
    Unscannable,
    Failed,
}

impl RunState {
    /// The run finished and its pending request is no longer needed.
    pub fn is_resolved(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Unscannable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunErrorKind {
    InternalError,
    ScanTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
}

impl RunError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: RunErrorKind::InternalError,
            message: message.into(),
        }
    }
}

/// State of the most recent run of a scan.
///
/// `timestamp` records the last state transition; retry eligibility is
/// measured against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRun {
    pub state: RunState,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

/// Durable record of a scan across dispatch cycles.
///
/// `creation_timestamp` never changes once written; the absolute staleness
/// budget is measured against it, not against the last transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRunResult {
    pub id: ScanId,
    pub run: ScanRun,
    pub creation_timestamp: DateTime<Utc>,
}

/// A pending scan submitted by a client. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub id: ScanId,
    pub url: String,
    pub scan_type: ScanType,
    pub priority: i32,
}

/// Minimal message posted to the execution queue; the worker reads everything
/// else from the result store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMessage {
    pub id: ScanId,
    pub url: String,
}

/// Point-in-time telemetry describing how saturated the compute pool is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolLoadSnapshot {
    pub is_idle: bool,
    /// Bitmask of recent activity ticks; zero means the pool was idle on
    /// every sampled tick.
    pub activity_state_flags: u32,
    pub target_max_tasks_per_pool: i64,
    pub pool_fill_interval_seconds: u64,
    pub tasks_increment_count_per_interval: u64,
    pub sampling_interval_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

/// The target queue depth computed on the previous cycle together with the
/// adaptive multiplier that produced it. One logical record per queue name,
/// overwritten every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueLoadSnapshot {
    pub queue_size_per_interval: u64,
    pub queue_buffering_index: u32,
    pub sampling_interval_seconds: u64,
    pub timestamp: DateTime<Utc>,
}
