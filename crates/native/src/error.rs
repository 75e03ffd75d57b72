//! Error types for native resource lifecycle management
use thiserror::Error;

use crate::engine::{DependencyKey, EngineError, ResourceKind};
use crate::resource::ResourceId;

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for lifecycle operations.
///
/// `UseAfterDispose` and `DoubleRelease` are both caller bugs, but of
/// different severity: the first is recoverable at the caller's discretion,
/// the second means reference accounting is broken somewhere and is
/// reported as fatal (see [`Error::is_fatal`]).
#[derive(Error, Debug)]
pub enum Error {
    /// A resource was accessed or acquired after its liveness flag was cleared
    #[error("{kind} '{resource_id}' was used after it was disposed")]
    UseAfterDispose {
        /// The resource identifier
        resource_id: ResourceId,
        /// The resource category
        kind: ResourceKind,
    },

    /// `release()` was called on a resource whose count is already zero
    #[error("{kind} '{resource_id}' was released with no outstanding references")]
    DoubleRelease {
        /// The resource identifier
        resource_id: ResourceId,
        /// The resource category
        kind: ResourceKind,
    },

    /// The engine refused to construct a resource or dependency
    #[error("failed to construct {kind}{}: {source}", .key.as_ref().map(|k| format!(" for key '{k}'")).unwrap_or_default())]
    Construction {
        /// The kind of resource that was requested (or, for dependencies,
        /// the kind of the parent it was requested from)
        kind: ResourceKind,
        /// The dependency key, when constructing through a parent
        key: Option<DependencyKey>,
        /// The engine's own error
        #[source]
        source: EngineError,
    },

    /// The engine failed an attribute read on a live handle
    #[error("engine call failed for resource '{resource_id}': {source}")]
    Engine {
        /// The resource identifier
        resource_id: ResourceId,
        /// The engine's own error
        #[source]
        source: EngineError,
    },

    /// Scheduler or controller configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// A controller operation needed an attached resource but found none
    #[error("controller is not attached to a resource")]
    Detached,

    /// A controller was used after `release()` gave up its interest for good
    #[error("controller has been released and cannot attach new resources")]
    ControllerReleased,

    /// The disposal worker thread could not be started
    #[error("failed to spawn disposal worker '{thread_name}'")]
    WorkerSpawn {
        /// The configured worker thread name
        thread_name: String,
        /// The OS error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error signals broken ownership accounting.
    ///
    /// Only [`Error::DoubleRelease`] is fatal; the core never tries to
    /// recover from it.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DoubleRelease { .. })
    }

    /// Whether this is a use-after-dispose error
    #[must_use]
    pub fn is_use_after_dispose(&self) -> bool {
        matches!(self, Self::UseAfterDispose { .. })
    }

    /// Get the resource ID associated with this error (if any)
    #[must_use]
    pub fn resource_id(&self) -> Option<ResourceId> {
        match self {
            Self::UseAfterDispose { resource_id, .. }
            | Self::DoubleRelease { resource_id, .. }
            | Self::Engine { resource_id, .. } => Some(*resource_id),
            Self::Construction { .. }
            | Self::Configuration { .. }
            | Self::Detached
            | Self::ControllerReleased
            | Self::WorkerSpawn { .. } => None,
        }
    }
}
