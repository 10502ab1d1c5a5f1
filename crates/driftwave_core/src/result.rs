use crate::{Device, Locale};
use thiserror::Error;

/// Non-fatal outcome of a compute, readiness or present pass.
///
/// Variants are ordered by severity, so [`Flow::worst`] is a plain `max`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flow {
    /// The pass completed.
    #[default]
    Success,
    /// Not ready yet; poll again.
    Timeout,
    /// The current frame was dropped.
    Skip,
}

impl Flow {
    /// The more severe of two statuses.
    pub fn worst(self, other: Flow) -> Flow {
        self.max(other)
    }

    pub fn is_success(self) -> bool {
        self == Flow::Success
    }
}

/// Error sum shared across the scheduler interface.
///
/// Structural variants (`Cycle`, `StaleIo`, `InplaceAliasing`) are raised
/// during a rebuild and leave the pipeline empty but consistent. `Module`
/// is recoverable at the caller; `Fatal` is not.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("dependency cycle detected between compute modules")]
    Cycle,
    #[error("module `{0}` has no active inputs or outputs")]
    StaleIo(Locale),
    #[error("in-place tensor {0:#018x} is consumed by multiple modules after a branch")]
    InplaceAliasing(u64),
    #[error("no graph backend registered for device `{0}`")]
    UnsupportedDevice(Device),
    #[error("module `{0}` is already registered")]
    DuplicateModule(Locale),
    #[error("scheduler has been destroyed")]
    Destroyed,
    #[error("module error: {0}")]
    Module(String),
    #[error("fatal module error: {0}")]
    Fatal(String),
}

/// Result alias used across the framework. `Ok` carries a [`Flow`] status
/// unless a call site narrows `T`.
pub type FlowResult<T = Flow> = Result<T, FlowError>;
