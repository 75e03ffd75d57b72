//! # Nebula Native
//!
//! Deterministic lifecycle management for objects owned by a native engine.
//!
//! Engine objects form a tree: a container (loaded from bytes) spawns
//! artifacts, which spawn sub-artifacts. Each object is wrapped in a
//! [`Resource`] that counts its logical owners. When the count reaches zero
//! the resource stops being usable immediately, and the engine call that
//! destroys it is queued on a [`Scheduler`] so teardown always happens on
//! one thread the engine can rely on.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nebula_native::testing::MockEngine;
//! use nebula_native::{DisposalScheduler, ResourceFactory};
//!
//! # fn main() -> nebula_native::Result<()> {
//! let scheduler = Arc::new(DisposalScheduler::with_defaults()?);
//! let factory = ResourceFactory::new(Arc::new(MockEngine::new()), scheduler);
//!
//! let file = factory.load(br#"{"name": "file", "children": [{"name": "artboard"}]}"#)?;
//! let artboard = file.dependency("artboard")?;
//! artboard.acquire()?; // keep it past the file
//!
//! file.release()?;
//! assert!(artboard.is_live());
//! artboard.release()?;
//! # Ok(())
//! # }
//! ```
//!
//! A [`Controller`] holds a primary resource plus whatever it acquired
//! through it. [`reset`](Controller::reset) gives back the acquired
//! references and keeps the primary; [`release`](Controller::release) gives
//! up the primary as well.

pub mod controller;
pub mod engine;
pub mod error;
pub mod lease;
pub mod resource;
pub mod scheduler;
pub mod testing;

// Lifecycle event broadcasting
#[cfg(feature = "events")]
pub mod events;

pub use controller::{Controller, ControllerStatus};
pub use engine::{DependencyKey, Engine, EngineError, EngineResult, NativeHandle, ResourceKind};
pub use error::{Error, Result};
pub use lease::Lease;
pub use resource::{Resource, ResourceFactory, ResourceId};
pub use scheduler::{
    DisposalScheduler, DisposalTask, InlineScheduler, Scheduler, SchedulerConfig, SchedulerStats,
};

#[cfg(feature = "events")]
pub use events::{EventBus, LifecycleEvent};
