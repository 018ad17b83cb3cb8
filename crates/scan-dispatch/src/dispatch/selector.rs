use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;

use crate::common::error::DispatchError;
use crate::config::{RuntimeConfig, ScanConfig};
use crate::dispatch::DispatchResult;
use crate::scan::{RunState, ScanRequest, ScanRunResult, ScanType};
use crate::storage::{RequestStore, RunResultStore};

/// Routing decision for one pending scan request.
///
/// The rules producing it are ordered, first match wins; every combination of
/// run state, retry count and age maps to exactly one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No run document exists for the request id.
    NotFound,
    /// The run resolved; the pending request is no longer needed.
    Completed,
    /// Failed with the retry budget exhausted.
    NoRetry,
    /// Queued or running past the retry budget without progress.
    Stale,
    /// Past the absolute time budget, reaped regardless of retries.
    Abandoned,
    /// Fresh request awaiting its first dispatch.
    Accepted,
    /// Eligible for another dispatch attempt.
    Retry,
    /// Mid-retry-window or progressing; leave it alone.
    Pending,
}

impl Classification {
    /// The request should be removed from the pending store.
    pub fn is_reaped(self) -> bool {
        matches!(
            self,
            Classification::NotFound
                | Classification::Completed
                | Classification::NoRetry
                | Classification::Stale
                | Classification::Abandoned
        )
    }

    /// The request should be posted to the execution queue.
    pub fn is_dispatched(self) -> bool {
        matches!(self, Classification::Accepted | Classification::Retry)
    }
}

/// Classifies a pending request against its current run document.
///
/// Pure over its inputs so the rule table can be tested without any store.
pub fn classify(
    run_result: Option<&ScanRunResult>,
    policy: &ScanConfig,
    now: DateTime<Utc>,
) -> Classification {
    let Some(result) = run_result else {
        return Classification::NotFound;
    };

    let run = &result.run;
    let retries_exhausted = run.retry_count >= policy.max_retry_count;
    let retry_window_passed =
        now >= run.timestamp + Duration::minutes(i64::from(policy.retry_interval_minutes));
    let past_time_budget = now
        >= result.creation_timestamp + Duration::minutes(i64::from(policy.stale_timeout_minutes));

    match run.state {
        RunState::Completed | RunState::Unscannable => Classification::Completed,
        RunState::Failed if retries_exhausted && retry_window_passed => Classification::NoRetry,
        RunState::Queued | RunState::Running if retries_exhausted && retry_window_passed => {
            Classification::Stale
        }
        RunState::Accepted | RunState::Queued | RunState::Running | RunState::Report
            if past_time_budget =>
        {
            Classification::Abandoned
        }
        RunState::Accepted => Classification::Accepted,
        RunState::Queued | RunState::Running | RunState::Failed
            if !retries_exhausted && retry_window_passed =>
        {
            Classification::Retry
        }
        _ => Classification::Pending,
    }
}

/// A request cleared for dispatch, together with the run document the
/// dispatcher will advance.
#[derive(Debug, Clone)]
pub struct DispatchableScan {
    pub request: ScanRequest,
    pub run_result: ScanRunResult,
    pub outcome: Classification,
}

/// A request whose run resolved, exhausted its budgets or vanished; only
/// deletion remains, so no run document is carried.
#[derive(Debug, Clone)]
pub struct ReapableScan {
    pub request: ScanRequest,
    pub outcome: Classification,
}

#[derive(Debug, Default)]
pub struct SelectedRequests {
    pub to_enqueue: Vec<DispatchableScan>,
    pub to_delete: Vec<ReapableScan>,
}

impl SelectedRequests {
    fn is_filled(&self, enqueue_target: usize, delete_target: usize) -> bool {
        self.to_enqueue.len() >= enqueue_target && self.to_delete.len() >= delete_target
    }
}

/// Walks the pending-request store and partitions requests into the dispatch
/// and delete sets, bounded to the requested counts.
pub struct ScanRequestSelector {
    request_store: Rc<dyn RequestStore>,
    run_result_store: Rc<dyn RunResultStore>,
    runtime_config: Rc<dyn RuntimeConfig>,
}

impl ScanRequestSelector {
    pub fn new(
        request_store: Rc<dyn RequestStore>,
        run_result_store: Rc<dyn RunResultStore>,
        runtime_config: Rc<dyn RuntimeConfig>,
    ) -> Self {
        Self {
            request_store,
            run_result_store,
            runtime_config,
        }
    }

    /// Selects up to `enqueue_target` requests to dispatch and up to
    /// `delete_target` requests to reap, earliest-discovered first.
    ///
    /// Pagination stops as soon as both bounds are met or the store is
    /// exhausted. Requests are classified independently of each other; the
    /// run-document lookups of one page are issued concurrently.
    pub async fn select(
        &self,
        scan_type: ScanType,
        enqueue_target: usize,
        delete_target: usize,
    ) -> DispatchResult<SelectedRequests> {
        let mut selected = SelectedRequests::default();
        if selected.is_filled(enqueue_target, delete_target) {
            return Ok(selected);
        }

        let policy = self
            .runtime_config
            .scan_config()
            .map_err(|error| DispatchError::Configuration(error.to_string()))?;

        let mut continuation_token: Option<String> = None;
        loop {
            let page = self
                .request_store
                .read_requests(scan_type, continuation_token.as_deref())
                .await?;
            let next_token = page.continuation_token;

            let lookups = page
                .items
                .iter()
                .map(|request| self.run_result_store.read_scan_run(&request.id));
            let run_results = join_all(lookups).await;

            let now = Utc::now();
            for (request, run_result) in page.items.into_iter().zip(run_results) {
                let run_result = run_result?;
                let outcome = classify(run_result.as_ref(), &policy, now);
                log::debug!("Scan request {} classified as {outcome:?}", request.id);

                match outcome {
                    Classification::Pending => {}
                    Classification::Accepted | Classification::Retry => {
                        if selected.to_enqueue.len() < enqueue_target {
                            // The rule table yields a dispatch outcome only
                            // when a run document exists.
                            if let Some(run_result) = run_result {
                                selected.to_enqueue.push(DispatchableScan {
                                    request,
                                    run_result,
                                    outcome,
                                });
                            }
                        }
                    }
                    _ => {
                        if selected.to_delete.len() < delete_target {
                            selected.to_delete.push(ReapableScan { request, outcome });
                        }
                    }
                }
            }

            if selected.is_filled(enqueue_target, delete_target) {
                break;
            }
            match next_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        Ok(selected)
    }
}
