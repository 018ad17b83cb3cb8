//! On-demand scan dispatch: decides every scheduling cycle how many pending
//! scan requests to push onto the execution queue and which requests to
//! enqueue, retry or reap, based on live feedback from the compute pool
//! consuming the queue.

mod process;
mod queue_size;
mod selector;
mod service;

pub use process::{CycleOutcome, CycleStats, OnDemandDispatcher};
pub use queue_size::QueueSizeGenerator;
pub use selector::{
    classify, Classification, DispatchableScan, ReapableScan, ScanRequestSelector,
    SelectedRequests,
};
pub use service::{create_dispatch_service, DispatchMessage, DispatchService};

pub type DispatchResult<T> = crate::Result<T>;
