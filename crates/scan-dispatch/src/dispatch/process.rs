use std::rc::Rc;

use chrono::Utc;
use futures::future::join_all;

use crate::common::error::DispatchError;
use crate::config::{DispatcherSettings, RuntimeConfig};
use crate::dispatch::queue_size::QueueSizeGenerator;
use crate::dispatch::selector::{
    Classification, DispatchableScan, ReapableScan, ScanRequestSelector,
};
use crate::dispatch::DispatchResult;
use crate::scan::{RunError, RunState, ScanId, ScanMessage};
use crate::storage::{MessageQueue, PoolLoadSource, QueueLoadStore, RequestStore, RunResultStore};

/// Counters of one completed dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Fresh scans posted to the queue.
    pub queued: usize,
    /// Retry dispatches posted to the queue.
    pub retried: usize,
    /// Scans the queue refused; recorded as failed in their run documents.
    pub rejected: usize,
    /// Pending requests removed from the request store.
    pub deleted: usize,
    /// Queue depth after the cycle.
    pub queue_size: u64,
}

/// Result of one dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The execution queue was already at capacity; nothing was dispatched.
    Skipped { queue_size: u64 },
    Dispatched(CycleStats),
}

/// Outcome of one per-scan dispatch pipeline.
struct DispatchedScan {
    id: ScanId,
    posted: bool,
    fresh: bool,
}

/// The dispatch control loop.
///
/// Once per scheduling tick it reads the current queue depth, asks the
/// [`QueueSizeGenerator`] for the target depth, asks the
/// [`ScanRequestSelector`] for work, posts accepted scans to the execution
/// queue, advances their run documents and reaps resolved requests from the
/// pending store.
pub struct OnDemandDispatcher {
    queue: Rc<dyn MessageQueue>,
    request_store: Rc<dyn RequestStore>,
    run_result_store: Rc<dyn RunResultStore>,
    runtime_config: Rc<dyn RuntimeConfig>,
    queue_size_generator: QueueSizeGenerator,
    selector: ScanRequestSelector,
    settings: Rc<DispatcherSettings>,
}

impl OnDemandDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Rc<dyn MessageQueue>,
        request_store: Rc<dyn RequestStore>,
        run_result_store: Rc<dyn RunResultStore>,
        pool_source: Rc<dyn PoolLoadSource>,
        queue_load_store: Rc<dyn QueueLoadStore>,
        runtime_config: Rc<dyn RuntimeConfig>,
        settings: DispatcherSettings,
    ) -> Self {
        let settings = Rc::new(settings);
        let queue_size_generator =
            QueueSizeGenerator::new(pool_source, queue_load_store, settings.clone());
        let selector = ScanRequestSelector::new(
            request_store.clone(),
            run_result_store.clone(),
            runtime_config.clone(),
        );
        Self {
            queue,
            request_store,
            run_result_store,
            runtime_config,
            queue_size_generator,
            selector,
            settings,
        }
    }

    /// Runs one dispatch cycle.
    ///
    /// Cycles must not overlap: the queue-load snapshot is read and rewritten
    /// within the cycle, so a host that can trigger cycles concurrently has
    /// to serialise the calls itself.
    pub async fn dispatch_scan_requests(&self) -> DispatchResult<CycleOutcome> {
        let queue_config = self
            .runtime_config
            .queue_config()
            .map_err(|error| DispatchError::Configuration(error.to_string()))?;
        // A broken scan policy must surface before the generator persists its
        // snapshot; the selector re-reads the policy when it runs.
        self.runtime_config
            .scan_config()
            .map_err(|error| DispatchError::Configuration(error.to_string()))?;

        let current_queue_size = self.queue.message_count(&self.settings.queue_name).await?;
        if current_queue_size >= queue_config.max_queue_size {
            log::warn!(
                "Execution queue {} holds {current_queue_size} of {} messages, skipping dispatch cycle",
                self.settings.queue_name,
                queue_config.max_queue_size
            );
            return Ok(CycleOutcome::Skipped {
                queue_size: current_queue_size,
            });
        }

        let target = self
            .queue_size_generator
            .target_queue_size(current_queue_size)
            .await?;
        let enqueue_target = target.saturating_sub(current_queue_size) as usize;

        let selected = self
            .selector
            .select(
                self.settings.scan_type,
                enqueue_target,
                self.settings.delete_budget,
            )
            .await?;

        let mut stats = CycleStats {
            deleted: self.reap_requests(&selected.to_delete).await?,
            ..CycleStats::default()
        };
        self.dispatch_requests(selected.to_enqueue, &mut stats).await?;
        stats.queue_size = current_queue_size + (stats.queued + stats.retried) as u64;

        log::info!(
            "Dispatch cycle finished: {} queued, {} retried, {} rejected by the queue, {} requests deleted, queue depth {}",
            stats.queued,
            stats.retried,
            stats.rejected,
            stats.deleted,
            stats.queue_size
        );
        Ok(CycleOutcome::Dispatched(stats))
    }

    /// Removes resolved, exhausted and orphaned requests from the pending
    /// store. Unconditional and not retried within the cycle.
    async fn reap_requests(&self, to_delete: &[ReapableScan]) -> DispatchResult<usize> {
        if to_delete.is_empty() {
            return Ok(0);
        }
        for scan in to_delete {
            log::debug!(
                "Deleting scan request {} classified as {:?}",
                scan.request.id,
                scan.outcome
            );
        }
        let ids: Vec<ScanId> = to_delete
            .iter()
            .map(|scan| scan.request.id.clone())
            .collect();
        self.request_store.delete_requests(&ids).await?;
        Ok(ids.len())
    }

    /// Posts the selected scans to the execution queue, one concurrent
    /// pipeline per scan, and folds the outcomes into `stats`.
    ///
    /// Requests whose outcome is durably recorded leave the pending store
    /// whatever the queue said; the run document is the record of truth from
    /// that point on. A transport failure of one pipeline does not stop its
    /// siblings, but fails the cycle once they have finished.
    async fn dispatch_requests(
        &self,
        to_enqueue: Vec<DispatchableScan>,
        stats: &mut CycleStats,
    ) -> DispatchResult<()> {
        if to_enqueue.is_empty() {
            return Ok(());
        }

        let outcomes = join_all(
            to_enqueue
                .into_iter()
                .map(|scan| self.dispatch_one(scan)),
        )
        .await;

        let mut dispatched_ids = Vec::new();
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(scan) => {
                    match (scan.posted, scan.fresh) {
                        (true, true) => stats.queued += 1,
                        (true, false) => stats.retried += 1,
                        (false, _) => stats.rejected += 1,
                    }
                    dispatched_ids.push(scan.id);
                }
                Err(error) => {
                    log::error!("Dispatch pipeline failed: {error:?}");
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        if !dispatched_ids.is_empty() {
            self.request_store.delete_requests(&dispatched_ids).await?;
            stats.deleted += dispatched_ids.len();
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Posts one scan and records the outcome in its run document; the two
    /// steps are strictly sequenced because the written state depends on the
    /// post result.
    async fn dispatch_one(&self, scan: DispatchableScan) -> DispatchResult<DispatchedScan> {
        let DispatchableScan {
            request,
            mut run_result,
            outcome,
        } = scan;

        let message = ScanMessage {
            id: request.id.clone(),
            url: request.url.clone(),
        };
        let posted = self
            .queue
            .create_message(&self.settings.queue_name, &message)
            .await?;

        if posted {
            log::debug!("Posted scan {} to queue {}", request.id, self.settings.queue_name);
            run_result.run.state = RunState::Queued;
            run_result.run.error = None;
        } else {
            log::error!(
                "Queue {} rejected scan {}, recording the failure",
                self.settings.queue_name,
                request.id
            );
            run_result.run.state = RunState::Failed;
            run_result.run.error = Some(RunError::internal(format!(
                "Failed to post scan {} to the execution queue",
                request.id
            )));
            run_result.run.retry_count += 1;
        }
        run_result.run.timestamp = Utc::now();

        if let Err(error) = self
            .run_result_store
            .write_scan_runs(std::slice::from_ref(&run_result))
            .await
        {
            if posted {
                // The scan is already in the queue but its run document still
                // says otherwise, and there is no compensating transaction to
                // roll the post back.
                log::error!(
                    "Scan {} was posted but recording its run state failed, the two are now out of sync: {error:?}",
                    request.id
                );
            }
            return Err(DispatchError::Store(error));
        }

        Ok(DispatchedScan {
            id: request.id,
            posted,
            fresh: outcome == Classification::Accepted,
        })
    }
}
