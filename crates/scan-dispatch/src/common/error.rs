use thiserror::Error;

/// Failure modes of a dispatch cycle.
///
/// A [`Configuration`](DispatchError::Configuration) error is fatal for the
/// cycle and is raised before any persisted state is mutated. A
/// [`Store`](DispatchError::Store) error is a transient I/O failure of one of
/// the queue/store collaborators; the caller retries the whole cycle on the
/// next scheduling tick.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub fn config_error<T>(message: String) -> crate::Result<T> {
    Err(DispatchError::Configuration(message))
}
