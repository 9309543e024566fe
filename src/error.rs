//! Errors returned by the dispatcher
//!
//! Construction fails on a config that could never release anything:
//!
//! ```
//! use priority_dispatcher::{DispatchError, Dispatcher, DispatcherConfig};
//!
//! let config = DispatcherConfig { per_second_budget: 0, ..Default::default() };
//! let refused = Dispatcher::<u32>::new(config, |_: u32| async {});
//! assert!(matches!(refused, Err(DispatchError::InvalidPerSecondBudget(0))));
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::DispatcherState;

/// Failures the dispatcher reports to its owner.
///
/// Admission rejections and empty extractions are not errors: they are counted in the metrics
/// and never surface here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("per-second budget must be at least 1, got {0}")]
    InvalidPerSecondBudget(u32),

    #[error("admission capacity must be at least 1")]
    InvalidAdmissionCapacity,

    #[error("dispatcher cannot be started from the {0} state")]
    AlreadyStarted(DispatcherState),

    #[error("dispatcher must be started from within a Tokio runtime")]
    NoRuntime,

    #[error("in-flight executions did not drain within {0:?}")]
    ShutdownTimeout(Duration),
}
