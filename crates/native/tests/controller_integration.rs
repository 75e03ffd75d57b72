//! Controller behaviour against a threaded scheduler.

use std::sync::Arc;
use std::time::Duration;

use nebula_native::testing::MockEngine;
use nebula_native::{ControllerStatus, DependencyKey, DisposalScheduler, Error, ResourceFactory};
use pretty_assertions::assert_eq;

const FILE: &[u8] = br#"{
    "name": "file",
    "children": [
        {"name": "New Artboard", "children": [{"name": "State Machine 1"}]},
        {"name": "Second"}
    ]
}"#;

const DRAIN: Duration = Duration::from_secs(5);

fn setup() -> (Arc<MockEngine>, ResourceFactory) {
    let engine = Arc::new(MockEngine::new());
    let scheduler = Arc::new(DisposalScheduler::with_defaults().expect("spawn worker"));
    (engine.clone(), ResourceFactory::new(engine, scheduler))
}

#[test]
fn reset_keeps_tracked_natives_readable_until_release() {
    let (engine, factory) = setup();
    let controller = factory.controller();
    let file = factory.load(FILE).unwrap();
    controller.attach(file.clone()).unwrap();

    let artboard = controller.acquire_dependency(DependencyKey::first()).unwrap();
    assert_eq!(artboard.ref_count(), 2, "implicit + controller");
    let machine = artboard.dependency(0usize).unwrap();
    controller.track(&machine).unwrap();
    assert_eq!(machine.ref_count(), 2);
    assert_eq!(controller.tracked(), vec![artboard.clone(), machine.clone()]);

    controller.reset().unwrap();
    assert_eq!(controller.status(), ControllerStatus::Detached);
    assert!(controller.tracked().is_empty());
    assert!(controller.wait_for_disposals(DRAIN));

    assert!(file.is_live());
    assert_eq!(artboard.name().unwrap(), "New Artboard");
    assert_eq!(machine.name().unwrap(), "State Machine 1");
    assert_eq!(artboard.ref_count(), 1);
    assert_eq!(machine.ref_count(), 1);

    // Releasing the controller gives up the file and its resources.
    controller.release().unwrap();
    assert!(!file.is_live());
    assert!(controller.wait_for_disposals(DRAIN));
    assert_eq!(controller.pending_disposals(), 0);

    assert!(artboard.name().unwrap_err().is_use_after_dispose());
    assert!(machine.name().unwrap_err().is_use_after_dispose());
    assert_eq!(engine.live_count(), 0);
}

#[test]
fn reset_leaves_extra_references_alone() {
    let (_, factory) = setup();
    let controller = factory.controller();
    let file = factory.load(FILE).unwrap();
    controller.attach(file.clone()).unwrap();

    let artboard = controller.acquire_dependency("New Artboard").unwrap();
    artboard.acquire().unwrap();
    assert_eq!(artboard.ref_count(), 3);

    controller.reset().unwrap();
    assert_eq!(artboard.ref_count(), 2, "implicit + caller");

    controller.release().unwrap();
    assert!(controller.wait_for_disposals(DRAIN));
    assert_eq!(artboard.ref_count(), 1);
    assert_eq!(artboard.name().unwrap(), "New Artboard");
    artboard.release().unwrap();
}

#[test]
fn drop_after_reset_gives_up_the_file() {
    let (engine, factory) = setup();
    let file = factory.load(FILE).unwrap();
    let artboard = file.dependency(DependencyKey::first()).unwrap();
    {
        let controller = factory.controller();
        controller.attach(file.clone()).unwrap();
        controller.reset().unwrap();
        assert_eq!(artboard.name().unwrap(), "New Artboard");
    }
    assert!(!file.is_live());
    assert!(factory.scheduler().drain_and_wait(DRAIN));
    assert!(artboard.name().unwrap_err().is_use_after_dispose());
    assert_eq!(engine.live_count(), 0);
}

#[test]
fn release_then_drain_disposes_unacquired_artifact() {
    let (engine, factory) = setup();
    let controller = factory.controller();
    let file = factory.load(FILE).unwrap();
    controller.attach(file.clone()).unwrap();
    let second = file.dependency("Second").unwrap();

    controller.release().unwrap();
    assert!(controller.is_released());
    assert!(controller.wait_for_disposals(DRAIN));

    assert!(second.name().unwrap_err().is_use_after_dispose());
    assert_eq!(engine.live_count(), 0);

    // Released controllers stay tolerant on teardown and strict on reuse.
    controller.reset().unwrap();
    controller.release().unwrap();
    let other = factory.load(FILE).unwrap();
    assert!(matches!(
        controller.attach(other.clone()),
        Err(Error::ControllerReleased)
    ));
    other.release().unwrap();
}

#[test]
fn track_rejects_disposed_resource() {
    let (_, factory) = setup();
    let controller = factory.controller();
    let file = factory.load(FILE).unwrap();
    controller.attach(file.clone()).unwrap();

    let second = file.dependency("Second").unwrap();
    second.release().unwrap();

    let err = controller.track(&second).unwrap_err();
    assert!(err.is_use_after_dispose());
    assert!(controller.tracked().is_empty());
}

#[test]
fn construction_failure_leaves_controller_attached() {
    let (_, factory) = setup();
    let controller = factory.controller();
    controller.attach(factory.load(FILE).unwrap()).unwrap();

    let err = controller.acquire_dependency("Missing").unwrap_err();
    assert!(matches!(err, Error::Construction { .. }));
    assert!(controller.is_attached());
    assert!(controller.tracked().is_empty());
}
