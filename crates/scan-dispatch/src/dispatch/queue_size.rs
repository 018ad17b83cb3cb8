use std::rc::Rc;

use chrono::Utc;

use crate::common::error::config_error;
use crate::config::DispatcherSettings;
use crate::dispatch::DispatchResult;
use crate::scan::{PoolLoadSnapshot, QueueLoadSnapshot};
use crate::storage::{PoolLoadSource, QueueLoadStore};

/// Computes the target depth of the execution queue for the next scheduling
/// cycle and persists the [`QueueLoadSnapshot`] the decision was based on.
///
/// The target is `target_max_tasks + drain_speed * buffering_index`: the
/// pool's task limit plus the estimated consumption over the next cycle,
/// scaled by an adaptive multiplier. The multiplier grows by one every time
/// the queue drains to zero between cycles and resets when the pool is
/// observed continuously idle while the queue still holds work.
pub struct QueueSizeGenerator {
    pool_source: Rc<dyn PoolLoadSource>,
    queue_load_store: Rc<dyn QueueLoadStore>,
    settings: Rc<DispatcherSettings>,
}

impl QueueSizeGenerator {
    pub fn new(
        pool_source: Rc<dyn PoolLoadSource>,
        queue_load_store: Rc<dyn QueueLoadStore>,
        settings: Rc<DispatcherSettings>,
    ) -> Self {
        Self {
            pool_source,
            queue_load_store,
            settings,
        }
    }

    /// Returns how many messages the execution queue should hold at the start
    /// of the next cycle.
    ///
    /// Rewrites the persisted queue-load snapshot as a side effect, so it must
    /// be called once per cycle.
    pub async fn target_queue_size(&self, current_queue_size: u64) -> DispatchResult<u64> {
        let pool_load = self
            .pool_source
            .read_pool_load(&self.settings.pool_name)
            .await?;

        let Some(pool_load) = pool_load else {
            // Cold start: no pool telemetry has been published yet, fall back
            // to the static default.
            let target = self.settings.default_queue_size;
            log::info!(
                "No load snapshot for pool {}, using the default queue size {target}",
                self.settings.pool_name
            );
            self.persist_snapshot(target, 1).await?;
            return Ok(target);
        };

        if pool_load.target_max_tasks_per_pool < 0 {
            return config_error(format!(
                "Pool {} reports an invalid task limit {}",
                self.settings.pool_name, pool_load.target_max_tasks_per_pool
            ));
        }
        let target_max_tasks = pool_load.target_max_tasks_per_pool as u64;

        let cycle_seconds = self.pool_source.dispatch_cycle().as_secs_f64();
        let drain_speed = estimate_drain_speed(&pool_load, target_max_tasks, cycle_seconds);

        let buffering_index = match self
            .queue_load_store
            .read_queue_load(&self.settings.queue_name)
            .await?
        {
            // First decision with live telemetry, start from the base
            // multiplier.
            None => 1,
            Some(last) => next_buffering_index(
                last.queue_buffering_index,
                current_queue_size,
                pool_load.activity_state_flags,
            ),
        };

        let target =
            target_max_tasks.saturating_add(drain_speed.saturating_mul(buffering_index as u64));
        log::debug!(
            "Queue {}: drain speed {drain_speed}, buffering index {buffering_index}, target size {target}",
            self.settings.queue_name
        );

        self.persist_snapshot(target, buffering_index).await?;
        Ok(target)
    }

    async fn persist_snapshot(&self, target: u64, buffering_index: u32) -> DispatchResult<()> {
        let snapshot = QueueLoadSnapshot {
            queue_size_per_interval: target,
            queue_buffering_index: buffering_index,
            sampling_interval_seconds: self.pool_source.dispatch_cycle().as_secs(),
            timestamp: Utc::now(),
        };
        self.queue_load_store
            .write_queue_load(&snapshot, &self.settings.queue_name)
            .await?;
        Ok(())
    }
}

/// Estimated number of tasks the pool will consume over the next cycle.
fn estimate_drain_speed(
    pool_load: &PoolLoadSnapshot,
    target_max_tasks: u64,
    cycle_seconds: f64,
) -> u64 {
    let extrapolate = |count: u64, interval_seconds: u64| -> u64 {
        if interval_seconds == 0 {
            // Interval unknown, the extrapolation is meaningless.
            return target_max_tasks;
        }
        (count as f64 * (cycle_seconds / interval_seconds as f64 + 1.0)).ceil() as u64
    };

    if pool_load.is_idle {
        // An idle pool absorbs a burst as fast as it can fill.
        extrapolate(target_max_tasks, pool_load.pool_fill_interval_seconds)
    } else {
        // Observed throughput, extrapolated to the next cycle.
        extrapolate(
            pool_load.tasks_increment_count_per_interval,
            pool_load.sampling_interval_seconds,
        )
    }
}

fn next_buffering_index(last_index: u32, current_queue_size: u64, activity_state_flags: u32) -> u32 {
    if current_queue_size > 0 {
        if activity_state_flags == 0 {
            // The queue holds work but the pool was idle on every recent
            // tick: demand collapsed, start over.
            1
        } else {
            last_index
        }
    } else {
        // The queue drained to zero between cycles, grow the buffer.
        last_index + 1
    }
}
