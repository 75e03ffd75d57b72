//! Event broadcasting for resource lifecycle observability.
//!
//! Provides [`LifecycleEvent`] variants emitted as resources are created,
//! acquired, released, disposed and torn down, and an [`EventBus`] backed by
//! `tokio::sync::broadcast`.

use tokio::sync::broadcast;

use crate::engine::ResourceKind;
use crate::resource::ResourceId;

// ---------------------------------------------------------------------------
// LifecycleEvent
// ---------------------------------------------------------------------------

/// Events emitted during resource lifecycle operations.
///
/// `Disposed` is emitted on the thread whose `release()` cleared liveness;
/// `Destroyed` and `TeardownFailed` are emitted from the scheduler once the
/// engine's destroy call has returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A resource was constructed (count 1).
    Created {
        /// The resource identifier.
        resource_id: ResourceId,
        /// The resource category.
        kind: ResourceKind,
    },
    /// A logical owner was added.
    Acquired {
        /// The resource identifier.
        resource_id: ResourceId,
        /// Count after the acquisition.
        ref_count: u32,
    },
    /// A logical owner was dropped.
    Released {
        /// The resource identifier.
        resource_id: ResourceId,
        /// Count after the release.
        ref_count: u32,
    },
    /// Liveness was cleared and teardown was scheduled.
    Disposed {
        /// The resource identifier.
        resource_id: ResourceId,
        /// The resource category.
        kind: ResourceKind,
    },
    /// The engine destroyed the native object.
    Destroyed {
        /// The resource identifier.
        resource_id: ResourceId,
    },
    /// The engine reported a failure while destroying the native object.
    TeardownFailed {
        /// The resource identifier.
        resource_id: ResourceId,
        /// Human-readable error description.
        error: String,
    },
}

impl LifecycleEvent {
    /// The resource this event is about.
    #[must_use]
    pub fn resource_id(&self) -> ResourceId {
        match self {
            Self::Created { resource_id, .. }
            | Self::Acquired { resource_id, .. }
            | Self::Released { resource_id, .. }
            | Self::Disposed { resource_id, .. }
            | Self::Destroyed { resource_id }
            | Self::TeardownFailed { resource_id, .. } => *resource_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for lifecycle events.
///
/// Emission is fire-and-forget: if no subscribers are listening or the
/// channel is full, events are silently dropped (no backpressure on the
/// emitter, which may be holding a resource lock).
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    ///
    /// The buffer size determines how many events can be queued before
    /// slow subscribers start lagging (and losing events).
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: LifecycleEvent) {
        // Err only means there are no active receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
