//! Run-level error type.
//!
//! Component errors live next to their components (`FetchError`,
//! `StoreError`, `NotifyError`, `ConfigError`). A run only fails outright
//! on the two steps it cannot isolate: fetching and recording.

pub use crate::config::ConfigError;
pub use crate::fetch::FetchError;
pub use crate::notify::NotifyError;
pub use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to record sent proposals: {0}")]
    Store(#[from] StoreError),
}
