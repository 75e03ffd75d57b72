//! Consumer-side holder of a resource tree.
//!
//! A [`Controller`] owns one reference on a primary resource (typically a
//! container) plus one reference on each resource it tracked from that tree
//! (typically the active artifact and its sub-artifacts).
//!
//! `reset()` gives back the tracked references and detaches, but keeps the
//! reference on the primary: anything fetched from the primary stays usable
//! whether or not the controller tracked it. `release()` (or dropping the
//! controller) gives up the primary too, which fires the full cascade when
//! it was the last reference.
//!
//! Unlike [`Resource::release`], resetting or releasing a detached
//! controller is a no-op.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::DependencyKey;
use crate::error::{Error, Result};
use crate::resource::Resource;
use crate::scheduler::Scheduler;

/// Whether a controller currently drives a resource tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    /// Drives a primary resource and may track resources from it.
    Attached,
    /// Tracks nothing. A primary kept across `reset()` is still held.
    Detached,
}

#[derive(Debug, Default)]
struct Held {
    /// Reference taken over by `attach`; survives `reset`.
    primary: Option<Resource>,
    /// Resources acquired on the controller's behalf, in acquisition order.
    tracked: Vec<Resource>,
    attached: bool,
    released: bool,
}

impl Held {
    fn take_all(&mut self) -> (Option<Resource>, Vec<Resource>) {
        self.attached = false;
        (self.primary.take(), std::mem::take(&mut self.tracked))
    }

    fn attached_primary(&self) -> Result<Resource> {
        match &self.primary {
            Some(primary) if self.attached => Ok(primary.clone()),
            _ if self.released => Err(Error::ControllerReleased),
            _ => Err(Error::Detached),
        }
    }
}

/// Holder of one primary resource and the resources acquired through it.
pub struct Controller {
    scheduler: Arc<dyn Scheduler>,
    held: Mutex<Held>,
}

impl Controller {
    /// Create a detached controller whose disposals run on `scheduler`.
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            held: Mutex::new(Held::default()),
        }
    }

    /// Take over the caller's reference on `resource`.
    ///
    /// No extra `acquire()` happens: the caller hands its reference to the
    /// controller. Any primary held from an earlier attachment is released
    /// along with its tracked resources. Attaching the primary the
    /// controller already holds (for example after [`reset`](Self::reset))
    /// re-attaches without taking a second reference.
    ///
    /// # Errors
    /// [`Error::UseAfterDispose`] if `resource` is disposed (nothing is
    /// taken over), [`Error::ControllerReleased`] after
    /// [`release`](Self::release).
    pub fn attach(&self, resource: Resource) -> Result<()> {
        let previous = {
            let mut held = self.held.lock();
            if held.released {
                return Err(Error::ControllerReleased);
            }
            if !resource.is_live() {
                return Err(Error::UseAfterDispose {
                    resource_id: resource.id(),
                    kind: resource.kind(),
                });
            }
            let (previous, tracked) = held.take_all();
            let previous = previous.filter(|primary| *primary != resource);
            tracing::debug!(resource_id = %resource.id(), "Controller attached resource");
            held.primary = Some(resource);
            held.attached = true;
            (previous, tracked)
        };
        release_all(previous)
    }

    /// Fetch `key` from the primary resource and acquire it on the
    /// controller's behalf.
    ///
    /// # Errors
    /// [`Error::Detached`] when detached, [`Error::UseAfterDispose`] when
    /// the primary is disposed, or the construction error from the engine.
    pub fn acquire_dependency(&self, key: impl Into<DependencyKey>) -> Result<Resource> {
        let mut held = self.held.lock();
        let primary = held.attached_primary()?;
        let dependency = primary.dependency(key)?;
        dependency.acquire()?;
        held.tracked.push(dependency.clone());
        Ok(dependency)
    }

    /// Acquire `resource` on the controller's behalf.
    ///
    /// `resource` may come from anywhere in the primary's tree (for example
    /// a sub-artifact of a tracked artifact).
    ///
    /// # Errors
    /// [`Error::UseAfterDispose`] if `resource` is disposed, or
    /// [`Error::Detached`] if the controller holds nothing.
    pub fn track(&self, resource: &Resource) -> Result<()> {
        let mut held = self.held.lock();
        held.attached_primary()?;
        resource.acquire()?;
        held.tracked.push(resource.clone());
        Ok(())
    }

    /// Give back the tracked references and detach.
    ///
    /// Tracked resources are released most recent first; all releases are
    /// attempted and the first error is returned. The reference on the
    /// primary is kept until [`release`](Self::release), so the primary and
    /// everything fetched from it stay live. A detached controller returns
    /// `Ok(())` without doing anything.
    pub fn reset(&self) -> Result<()> {
        let tracked = {
            let mut held = self.held.lock();
            if !held.attached {
                return Ok(());
            }
            held.attached = false;
            std::mem::take(&mut held.tracked)
        };
        tracing::debug!(tracked = tracked.len(), "Controller reset");
        release_all((None, tracked))
    }

    /// Give up every reference, including the primary, for good. Idempotent.
    ///
    /// If the controller held the last reference on its primary resource
    /// the full disposal cascade fires.
    pub fn release(&self) -> Result<()> {
        let references = {
            let mut held = self.held.lock();
            held.released = true;
            held.take_all()
        };
        release_all(references)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ControllerStatus {
        if self.held.lock().attached {
            ControllerStatus::Attached
        } else {
            ControllerStatus::Detached
        }
    }

    /// Whether the controller is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.status() == ControllerStatus::Attached
    }

    /// Whether [`release`](Self::release) was called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.held.lock().released
    }

    /// The primary resource whose reference this controller holds.
    ///
    /// Still `Some` after [`reset`](Self::reset); `None` after
    /// [`release`](Self::release).
    #[must_use]
    pub fn primary(&self) -> Option<Resource> {
        self.held.lock().primary.clone()
    }

    /// Resources acquired on the controller's behalf, in acquisition order.
    #[must_use]
    pub fn tracked(&self) -> Vec<Resource> {
        self.held.lock().tracked.clone()
    }

    /// Teardown tasks still queued or running on the scheduler.
    #[must_use]
    pub fn pending_disposals(&self) -> usize {
        self.scheduler.pending()
    }

    /// Wait until every queued teardown has run, or `timeout` elapses.
    pub fn wait_for_disposals(&self, timeout: Duration) -> bool {
        self.scheduler.drain_and_wait(timeout)
    }
}

/// Release tracked resources (most recent first), then the primary.
fn release_all((primary, tracked): (Option<Resource>, Vec<Resource>)) -> Result<()> {
    let mut first_error = None;
    for resource in tracked.iter().rev().chain(primary.iter()) {
        if let Err(error) = resource.release() {
            tracing::warn!(
                resource_id = %resource.id(),
                error = %error,
                "Controller could not release its reference"
            );
            first_error.get_or_insert(error);
        }
    }
    first_error.map_or(Ok(()), Err)
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            tracing::warn!(error = %error, "Controller dropped with unreleasable references");
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let held = self.held.lock();
        f.debug_struct("Controller")
            .field("primary", &held.primary.as_ref().map(Resource::id))
            .field("attached", &held.attached)
            .field("tracked", &held.tracked.len())
            .field("released", &held.released)
            .field("pending_disposals", &self.scheduler.pending())
            .finish()
    }
}
