//! End-to-end lifecycle scenarios on the threaded disposal scheduler.
//!
//! Liveness flips synchronously on `release()`; the cascade over
//! dependencies and the engine's destroy calls run on the scheduler, so
//! every assertion about a dependent's liveness comes after a drain.

use std::sync::Arc;
use std::time::Duration;

use nebula_native::testing::MockEngine;
use nebula_native::{DependencyKey, DisposalScheduler, Error, ResourceFactory, ResourceKind};
use pretty_assertions::assert_eq;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const FILE: &[u8] = br#"{
    "name": "file",
    "children": [
        {"name": "New Artboard", "children": [{"name": "State Machine 1"}]},
        {"name": "Second"}
    ]
}"#;

const DRAIN: Duration = Duration::from_secs(5);

struct Fixture {
    engine: Arc<MockEngine>,
    factory: ResourceFactory,
}

impl Fixture {
    fn new() -> Self {
        let engine = Arc::new(MockEngine::new());
        let scheduler = Arc::new(DisposalScheduler::with_defaults().expect("spawn worker"));
        let factory = ResourceFactory::new(engine.clone(), scheduler);
        Self { engine, factory }
    }

    fn drain(&self) {
        assert!(
            self.factory.scheduler().drain_and_wait(DRAIN),
            "disposal queue did not drain"
        );
    }
}

// ---------------------------------------------------------------------------
// Scenario A: release to zero, then release again
// ---------------------------------------------------------------------------

#[test]
fn release_to_zero_then_double_release() {
    let fx = Fixture::new();
    let file = fx.factory.load(FILE).unwrap();
    assert_eq!(file.ref_count(), 1);
    assert!(file.is_live());

    assert_eq!(file.release().unwrap(), 0);
    assert_eq!(file.ref_count(), 0);
    assert!(!file.is_live(), "liveness flips before release returns");

    let err = file.release().unwrap_err();
    assert!(matches!(err, Error::DoubleRelease { .. }), "got: {err:?}");
    assert!(err.is_fatal());

    fx.drain();
    assert_eq!(fx.engine.live_count(), 0);
}

// ---------------------------------------------------------------------------
// Scenario B: acquire keeps the resource live
// ---------------------------------------------------------------------------

#[test]
fn acquire_then_release_twice() {
    let fx = Fixture::new();
    let file = fx.factory.load(FILE).unwrap();

    assert_eq!(file.acquire().unwrap(), 2);
    assert_eq!(file.release().unwrap(), 1);
    assert!(file.is_live());
    assert_eq!(file.name().unwrap(), "file");

    assert_eq!(file.release().unwrap(), 0);
    assert!(!file.is_live());
    fx.drain();
    assert_eq!(fx.engine.destroyed_names(), vec!["file"]);
}

// ---------------------------------------------------------------------------
// Scenario C: releasing the parent cascades to a dependency
// ---------------------------------------------------------------------------

#[test]
fn parent_release_cascades_to_dependency() {
    let fx = Fixture::new();
    let file = fx.factory.load(FILE).unwrap();
    let artboard = file.dependency(DependencyKey::first()).unwrap();

    assert_eq!(file.dependencies(), vec![artboard.clone()]);
    assert!(artboard.is_live());
    assert_eq!(artboard.ref_count(), 1);
    assert_eq!(artboard.kind(), ResourceKind::Artifact);

    file.release().unwrap();
    assert!(!file.is_live());
    assert!(file.dependencies().is_empty());

    fx.drain();
    assert!(!artboard.is_live());
    assert_eq!(artboard.ref_count(), 0);
    assert_eq!(fx.engine.live_count(), 0);
}

#[test]
fn cascade_reaches_every_level() {
    let fx = Fixture::new();
    let file = fx.factory.load(FILE).unwrap();
    let artboard = file.dependency("New Artboard").unwrap();
    let machine = artboard.dependency("State Machine 1").unwrap();
    assert_eq!(machine.kind(), ResourceKind::SubArtifact);

    file.release().unwrap();
    fx.drain();

    assert!(!artboard.is_live());
    assert!(!machine.is_live());
    assert_eq!(fx.engine.destroyed().len(), 3);
    assert_eq!(fx.engine.live_count(), 0);
}

// ---------------------------------------------------------------------------
// Scenario D: an acquired dependency outlives its parent
// ---------------------------------------------------------------------------

#[test]
fn acquired_dependency_outlives_parent() {
    let fx = Fixture::new();
    let file = fx.factory.load(FILE).unwrap();
    let artboard = file.dependency(DependencyKey::first()).unwrap();
    assert_eq!(artboard.acquire().unwrap(), 2);

    file.release().unwrap();
    fx.drain();

    assert!(!file.is_live());
    assert_eq!(artboard.ref_count(), 1);
    assert!(artboard.is_live());
    assert_eq!(artboard.name().unwrap(), "New Artboard");

    assert_eq!(artboard.release().unwrap(), 0);
    assert!(!artboard.is_live());
    fx.drain();
    assert_eq!(fx.engine.live_count(), 0);
}

// ---------------------------------------------------------------------------
// Scenario E: controller reset leaves independently held resources alone
// ---------------------------------------------------------------------------

#[test]
fn controller_reset_keeps_independently_fetched_dependency() {
    let fx = Fixture::new();
    let controller = fx.factory.controller();
    let file = fx.factory.load(FILE).unwrap();
    controller.attach(file.clone()).unwrap();

    // Fetched through the file, not through the controller.
    let artboard = file.dependency(DependencyKey::first()).unwrap();
    assert_eq!(artboard.name().unwrap(), "New Artboard");

    controller.reset().unwrap();
    assert!(!controller.is_attached());
    assert!(controller.wait_for_disposals(DRAIN));

    assert!(file.is_live(), "reset keeps the controller's reference on the file");
    assert!(artboard.is_live());
    assert_eq!(artboard.ref_count(), 1);
    assert_eq!(artboard.name().unwrap(), "New Artboard");
    assert_eq!(
        artboard.dependency_names().unwrap(),
        vec!["State Machine 1".to_string()]
    );

    // Giving up the controller gives up the file and everything under it.
    controller.release().unwrap();
    assert!(controller.wait_for_disposals(DRAIN));
    let err = artboard.name().unwrap_err();
    assert!(err.is_use_after_dispose(), "got: {err:?}");
    assert_eq!(err.resource_id(), Some(artboard.id()));
    assert_eq!(fx.engine.live_count(), 0);
}

#[test]
fn acquired_dependency_outlives_controller_release() {
    let fx = Fixture::new();
    let controller = fx.factory.controller();
    let file = fx.factory.load(FILE).unwrap();
    controller.attach(file.clone()).unwrap();

    let artboard = file.dependency(DependencyKey::first()).unwrap();
    artboard.acquire().unwrap();

    controller.release().unwrap();
    assert!(!file.is_live());
    assert!(controller.wait_for_disposals(DRAIN));

    assert!(artboard.is_live());
    assert_eq!(artboard.ref_count(), 1);
    assert_eq!(artboard.name().unwrap(), "New Artboard");

    artboard.release().unwrap();
    fx.drain();
    assert_eq!(fx.engine.live_count(), 0);
}
