//! The seam between the lifecycle core and the native engine.
//!
//! The engine is an opaque factory/destructor service: it turns bytes (or a
//! parent handle plus a key) into [`NativeHandle`]s, answers attribute reads
//! against live handles, and destroys handles. The core guarantees that
//! `destroy` is called exactly once per handle, only from the disposal
//! scheduler, and that no read is ever issued against a destroyed handle.

use std::fmt;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Opaque identifier of an engine-owned object.
///
/// Valid only between construction and teardown. Exactly one
/// [`Resource`](crate::Resource) owns each handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(u64);

impl NativeHandle {
    /// Wrap a raw engine value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw engine value.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Resource category. Decides which teardown the engine performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ResourceKind {
    /// Top-level resource loaded from bytes (e.g. a file).
    Container,
    /// Resource derived from a container (e.g. an artboard instance).
    Artifact,
    /// Resource derived from an artifact (e.g. a state machine or animation).
    SubArtifact,
}

impl ResourceKind {
    /// The kind of the children this kind spawns.
    #[must_use]
    pub const fn child_kind(self) -> Self {
        match self {
            Self::Container => Self::Artifact,
            Self::Artifact | Self::SubArtifact => Self::SubArtifact,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::Artifact => write!(f, "artifact"),
            Self::SubArtifact => write!(f, "sub-artifact"),
        }
    }
}

/// Key under which a parent spawns a dependency.
///
/// The engine interprets the key; the core only uses it for insert-once
/// bookkeeping in the parent's dependency registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DependencyKey {
    /// Look the child up by name.
    Name(String),
    /// Look the child up by position.
    Index(usize),
}

impl DependencyKey {
    /// Key of the first child (`Index(0)`).
    #[must_use]
    pub const fn first() -> Self {
        Self::Index(0)
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "#{index}"),
        }
    }
}

impl From<&str> for DependencyKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for DependencyKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<usize> for DependencyKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Errors raised by the engine itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The input bytes could not be understood
    #[error("malformed input: {reason}")]
    Malformed {
        /// Why the input was rejected
        reason: String,
    },

    /// No child exists for the requested key
    #[error("no dependency named '{key}'")]
    NotFound {
        /// The key that was requested
        key: String,
    },

    /// The handle is unknown or already destroyed
    #[error("invalid native handle {handle}")]
    InvalidHandle {
        /// The offending handle
        handle: NativeHandle,
    },

    /// Any other engine failure
    #[error("engine failure: {message}")]
    Failed {
        /// The engine's description of the failure
        message: String,
    },
}

/// Result type for engine calls
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Native engine interface consumed by the lifecycle core.
///
/// Implementations must be callable from any thread. Reads and spawns are
/// issued from caller threads while the handle is live; `destroy` is only
/// ever issued from the disposal scheduler's execution context.
pub trait Engine: Send + Sync + 'static {
    /// Construct a container from raw bytes.
    fn load(&self, bytes: &[u8]) -> EngineResult<NativeHandle>;

    /// Construct a dependency of `parent` for `key`, returning its handle and kind.
    fn spawn(
        &self,
        parent: NativeHandle,
        parent_kind: ResourceKind,
        key: &DependencyKey,
    ) -> EngineResult<(NativeHandle, ResourceKind)>;

    /// Destroy a handle. Called exactly once per handle.
    fn destroy(&self, kind: ResourceKind, handle: NativeHandle) -> EngineResult<()>;

    /// Read the object's name.
    fn name(&self, handle: NativeHandle) -> EngineResult<String>;

    /// Names of the dependencies this object can spawn, in index order.
    fn dependency_names(&self, handle: NativeHandle) -> EngineResult<Vec<String>>;
}
