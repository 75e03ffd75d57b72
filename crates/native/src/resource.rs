//! Reference-counted wrappers around engine-owned objects.
//!
//! A [`Resource`] owns exactly one [`NativeHandle`] and counts its logical
//! owners. Cloning a `Resource` copies the *reference*, not ownership; only
//! [`acquire`](Resource::acquire) and [`release`](Resource::release) move the
//! count.
//!
//! When the count reaches zero the handle is taken out of the resource under
//! the same lock as the decrement, so liveness flips exactly once and before
//! anything else happens. Destroying the native object and releasing the
//! parent's implicit reference on every dependency is then handed to the
//! [`Scheduler`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::controller::Controller;
use crate::engine::{DependencyKey, Engine, EngineResult, NativeHandle, ResourceKind};
use crate::error::{Error, Result};
#[cfg(feature = "events")]
use crate::events::{EventBus, LifecycleEvent};
use crate::lease::Lease;
use crate::scheduler::{DisposalTask, Scheduler};

// ---------------------------------------------------------------------------
// ResourceId
// ---------------------------------------------------------------------------

/// Stable identity of a [`Resource`] object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResourceId(Uuid);

impl ResourceId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Shared services
// ---------------------------------------------------------------------------

/// Services every resource in one tree shares.
#[derive(Clone)]
pub(crate) struct Services {
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    #[cfg(feature = "events")]
    pub(crate) events: Option<Arc<EventBus>>,
}

impl Services {
    #[cfg(feature = "events")]
    fn emit(&self, event: impl FnOnce() -> LifecycleEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event());
        }
    }
}

// ---------------------------------------------------------------------------
// Resource internals
// ---------------------------------------------------------------------------

/// Mutable state; every field changes under one write lock.
///
/// Reads take the lock with `read_recursive`, so accessors can nest inside
/// [`Resource::with_handle`].
struct State {
    ref_count: u32,
    /// `Some` exactly while `ref_count > 0`.
    handle: Option<NativeHandle>,
    /// Children spawned by this resource, one implicit reference each.
    dependencies: IndexMap<DependencyKey, Resource>,
}

struct Inner {
    id: ResourceId,
    kind: ResourceKind,
    /// Key under which the parent spawned this resource.
    key: Option<DependencyKey>,
    parent: Option<Weak<Inner>>,
    services: Services,
    state: RwLock<State>,
}

/// Reference-counted handle to one engine-owned object.
///
/// Created with a count of 1. All attribute reads go through
/// [`with_handle`](Self::with_handle) and fail with
/// [`Error::UseAfterDispose`] once the resource is disposed.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<Inner>,
}

impl Resource {
    fn new(
        handle: NativeHandle,
        kind: ResourceKind,
        key: Option<DependencyKey>,
        parent: Option<Weak<Inner>>,
        services: Services,
    ) -> Self {
        let resource = Self {
            inner: Arc::new(Inner {
                id: ResourceId::new(),
                kind,
                key,
                parent,
                services,
                state: RwLock::new(State {
                    ref_count: 1,
                    handle: Some(handle),
                    dependencies: IndexMap::new(),
                }),
            }),
        };

        tracing::debug!(
            resource_id = %resource.id(),
            kind = %kind,
            handle = %handle,
            "Created resource"
        );
        #[cfg(feature = "events")]
        resource
            .inner
            .services
            .emit(|| LifecycleEvent::Created {
                resource_id: resource.id(),
                kind,
            });

        resource
    }

    // -- identity ------------------------------------------------------------

    /// Stable identity of this resource object.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    /// Resource category.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.inner.kind
    }

    /// Key under which the parent spawned this resource, if any.
    #[must_use]
    pub fn key(&self) -> Option<&DependencyKey> {
        self.inner.key.as_ref()
    }

    /// The parent that spawned this resource, while the parent object exists.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Self { inner })
    }

    // -- introspection ------------------------------------------------------

    /// Current number of logical owners. Zero once disposed.
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.inner.state.read_recursive().ref_count
    }

    /// Whether the resource still owns its native handle.
    #[must_use]
    pub fn has_native_handle(&self) -> bool {
        self.inner.state.read_recursive().handle.is_some()
    }

    /// Whether the resource is live. Same flag as [`has_native_handle`](Self::has_native_handle).
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.has_native_handle()
    }

    /// Snapshot of the dependencies this resource currently holds, in spawn order.
    #[must_use]
    pub fn dependencies(&self) -> Vec<Self> {
        self.inner
            .state
            .read_recursive()
            .dependencies
            .values()
            .cloned()
            .collect()
    }

    // -- reference counting -------------------------------------------------

    /// Add a logical owner. Returns the new count.
    ///
    /// # Errors
    /// [`Error::UseAfterDispose`] if the resource is already disposed.
    pub fn acquire(&self) -> Result<u32> {
        let count = {
            let mut state = self.inner.state.write();
            if state.handle.is_none() {
                return Err(self.use_after_dispose());
            }
            state.ref_count += 1;
            state.ref_count
        };

        tracing::trace!(resource_id = %self.id(), ref_count = count, "Acquired resource");
        #[cfg(feature = "events")]
        self.inner.services.emit(|| LifecycleEvent::Acquired {
            resource_id: self.id(),
            ref_count: count,
        });

        Ok(count)
    }

    /// Drop a logical owner. Returns the remaining count.
    ///
    /// Reaching zero disposes the resource: liveness is cleared before this
    /// call returns, the resource leaves its parent's dependency set, and
    /// native teardown plus the cascade over its own dependencies is queued
    /// on the scheduler.
    ///
    /// # Errors
    /// [`Error::DoubleRelease`] if the count is already zero. Nothing is
    /// modified in that case.
    pub fn release(&self) -> Result<u32> {
        let (remaining, disposed) = {
            let mut state = self.inner.state.write();
            if state.ref_count == 0 {
                drop(state);
                tracing::error!(
                    resource_id = %self.id(),
                    kind = %self.kind(),
                    "Released a resource with no outstanding references"
                );
                return Err(Error::DoubleRelease {
                    resource_id: self.id(),
                    kind: self.kind(),
                });
            }
            state.ref_count -= 1;
            if state.ref_count == 0 {
                let handle = state.handle.take();
                // A child already at zero is detaching itself; its implicit
                // reference is gone.
                let dependencies: Vec<Self> = state
                    .dependencies
                    .drain(..)
                    .map(|(_, dependency)| dependency)
                    .filter(Self::is_live)
                    .collect();
                (0, handle.map(|handle| (handle, dependencies)))
            } else {
                (state.ref_count, None)
            }
        };

        tracing::trace!(resource_id = %self.id(), ref_count = remaining, "Released resource");
        #[cfg(feature = "events")]
        self.inner.services.emit(|| LifecycleEvent::Released {
            resource_id: self.id(),
            ref_count: remaining,
        });

        if let Some((handle, dependencies)) = disposed {
            self.dispose(handle, dependencies);
        }

        Ok(remaining)
    }

    /// Acquire a reference wrapped in a guard that releases it on drop.
    pub fn lease(&self) -> Result<Lease> {
        self.acquire()?;
        Ok(Lease::new(self.clone()))
    }

    fn dispose(&self, handle: NativeHandle, dependencies: Vec<Self>) {
        self.detach_from_parent();

        tracing::debug!(
            resource_id = %self.id(),
            kind = %self.kind(),
            handle = %handle,
            dependencies = dependencies.len(),
            "Disposed resource; scheduling teardown"
        );
        #[cfg(feature = "events")]
        self.inner.services.emit(|| LifecycleEvent::Disposed {
            resource_id: self.id(),
            kind: self.kind(),
        });

        let id = self.id();
        let kind = self.kind();
        let services = self.inner.services.clone();
        let task = DisposalTask::new(id, kind, move || {
            // Children lose liveness before the parent object goes away.
            for dependency in dependencies {
                if let Err(error) = dependency.release() {
                    tracing::warn!(
                        resource_id = %id,
                        dependency_id = %dependency.id(),
                        error = %error,
                        "Cascade could not release dependency"
                    );
                }
            }
            let result = services.engine.destroy(kind, handle);
            #[cfg(feature = "events")]
            services.emit(|| match &result {
                Ok(()) => LifecycleEvent::Destroyed { resource_id: id },
                Err(error) => LifecycleEvent::TeardownFailed {
                    resource_id: id,
                    error: error.to_string(),
                },
            });
            result
        });

        self.inner.services.scheduler.enqueue(task);
    }

    fn detach_from_parent(&self) {
        let Some(parent) = self.parent() else {
            return;
        };
        let Some(key) = self.key() else {
            return;
        };
        let mut state = parent.inner.state.write();
        if state
            .dependencies
            .get(key)
            .is_some_and(|registered| registered.id() == self.id())
        {
            state.dependencies.shift_remove(key);
        }
    }

    // -- dependencies -------------------------------------------------------

    /// Fetch the dependency spawned under `key`, constructing it on first use.
    ///
    /// The returned resource is owned by this one (count 1 on construction);
    /// callers that want it to outlive this resource must
    /// [`acquire`](Self::acquire) it. This resource's own count is never
    /// changed.
    ///
    /// # Errors
    /// [`Error::UseAfterDispose`] if this resource is disposed, or
    /// [`Error::Construction`] if the engine rejects the key.
    pub fn dependency(&self, key: impl Into<DependencyKey>) -> Result<Self> {
        let key = key.into();
        let mut state = self.inner.state.write();
        let Some(handle) = state.handle else {
            return Err(self.use_after_dispose());
        };
        // Parent before child is the only nested lock order.
        match state.dependencies.get(&key) {
            Some(existing) if existing.is_live() => return Ok(existing.clone()),
            Some(_) => {
                // Released to zero but not yet detached; replace it.
                state.dependencies.shift_remove(&key);
            }
            None => {}
        }

        let (child_handle, child_kind) = self
            .inner
            .services
            .engine
            .spawn(handle, self.kind(), &key)
            .map_err(|source| Error::Construction {
                kind: self.kind(),
                key: Some(key.clone()),
                source,
            })?;

        let child = Self::new(
            child_handle,
            child_kind,
            Some(key.clone()),
            Some(Arc::downgrade(&self.inner)),
            self.inner.services.clone(),
        );
        state.dependencies.insert(key, child.clone());
        Ok(child)
    }

    // -- guarded access -----------------------------------------------------

    /// Run `read` against the live handle.
    ///
    /// This is the single liveness gate for attribute reads. A read lock is
    /// held for the duration of `read`, so the handle cannot be disposed
    /// underneath it. Other reads of this resource may nest inside `read`;
    /// `acquire`, `release` and `dependency` on it would deadlock.
    ///
    /// # Errors
    /// [`Error::UseAfterDispose`] if disposed. Whatever `read` returns is
    /// passed through untouched.
    pub fn with_handle<T>(
        &self,
        read: impl FnOnce(&dyn Engine, NativeHandle) -> T,
    ) -> Result<T> {
        let state = self.inner.state.read_recursive();
        match state.handle {
            Some(handle) => Ok(read(self.inner.services.engine.as_ref(), handle)),
            None => Err(self.use_after_dispose()),
        }
    }

    /// The object's name as reported by the engine.
    pub fn name(&self) -> Result<String> {
        self.read(|engine, handle| engine.name(handle))
    }

    /// Names of the dependencies the engine can spawn from this object.
    pub fn dependency_names(&self) -> Result<Vec<String>> {
        self.read(|engine, handle| engine.dependency_names(handle))
    }

    fn read<T>(&self, read: impl FnOnce(&dyn Engine, NativeHandle) -> EngineResult<T>) -> Result<T> {
        self.with_handle(read)?.map_err(|source| Error::Engine {
            resource_id: self.id(),
            source,
        })
    }

    fn use_after_dispose(&self) -> Error {
        Error::UseAfterDispose {
            resource_id: self.id(),
            kind: self.kind(),
        }
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read_recursive();
        f.debug_struct("Resource")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("key", &self.inner.key)
            .field("ref_count", &state.ref_count)
            .field("handle", &state.handle)
            .field("dependencies", &state.dependencies.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ResourceFactory
// ---------------------------------------------------------------------------

/// Entry point that binds an engine to a scheduler and creates root resources.
///
/// Every resource created here, and every dependency spawned from one,
/// shares the same engine, scheduler and (optional) event bus.
#[derive(Clone)]
pub struct ResourceFactory {
    services: Services,
}

impl ResourceFactory {
    /// Create a factory over `engine` that disposes through `scheduler`.
    pub fn new(engine: Arc<dyn Engine>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            services: Services {
                engine,
                scheduler,
                #[cfg(feature = "events")]
                events: None,
            },
        }
    }

    /// Emit lifecycle events for every resource created by this factory.
    #[cfg(feature = "events")]
    #[must_use]
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.services.events = Some(bus);
        self
    }

    /// Construct a container from bytes. The caller owns the single reference.
    ///
    /// # Errors
    /// [`Error::Construction`] if the engine rejects the bytes.
    pub fn load(&self, bytes: &[u8]) -> Result<Resource> {
        let handle = self
            .services
            .engine
            .load(bytes)
            .map_err(|source| Error::Construction {
                kind: ResourceKind::Container,
                key: None,
                source,
            })?;
        Ok(Resource::new(
            handle,
            ResourceKind::Container,
            None,
            None,
            self.services.clone(),
        ))
    }

    /// A detached controller bound to this factory's scheduler.
    #[must_use]
    pub fn controller(&self) -> Controller {
        Controller::new(Arc::clone(&self.services.scheduler))
    }

    /// The scheduler resources created here dispose through.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.services.scheduler
    }

    /// The engine resources created here are backed by.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.services.engine
    }
}

impl fmt::Debug for ResourceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ResourceFactory");
        s.field("pending_disposals", &self.services.scheduler.pending());
        #[cfg(feature = "events")]
        s.field("events", &self.services.events.is_some());
        s.finish()
    }
}
