//! Integration tests for lifecycle event emission.

#![cfg(feature = "events")]

use std::sync::Arc;
use std::time::Duration;

use nebula_native::testing::MockEngine;
use nebula_native::{
    DisposalScheduler, EventBus, InlineScheduler, LifecycleEvent, ResourceFactory, ResourceKind,
};
use pretty_assertions::assert_eq;
use tokio::sync::broadcast::error::TryRecvError;

const FILE: &[u8] = br#"{"name": "file", "children": [{"name": "artboard"}]}"#;

fn collect(rx: &mut tokio::sync::broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return events,
            Err(TryRecvError::Lagged(n)) => panic!("lagged by {n} events"),
        }
    }
}

#[tokio::test]
async fn cascade_emits_events_in_order() {
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let scheduler = Arc::new(DisposalScheduler::with_defaults().expect("spawn worker"));
    let factory = ResourceFactory::new(Arc::new(MockEngine::new()), scheduler.clone())
        .with_event_bus(Arc::clone(&bus));

    let file = factory.load(FILE).unwrap();
    let artboard = file.dependency("artboard").unwrap();
    file.release().unwrap();
    assert!(factory.scheduler().drain_and_wait(Duration::from_secs(5)));

    let (f, a) = (file.id(), artboard.id());
    assert_eq!(
        collect(&mut rx),
        vec![
            LifecycleEvent::Created { resource_id: f, kind: ResourceKind::Container },
            LifecycleEvent::Created { resource_id: a, kind: ResourceKind::Artifact },
            LifecycleEvent::Released { resource_id: f, ref_count: 0 },
            LifecycleEvent::Disposed { resource_id: f, kind: ResourceKind::Container },
            LifecycleEvent::Released { resource_id: a, ref_count: 0 },
            LifecycleEvent::Disposed { resource_id: a, kind: ResourceKind::Artifact },
            LifecycleEvent::Destroyed { resource_id: f },
            LifecycleEvent::Destroyed { resource_id: a },
        ]
    );
}

#[tokio::test]
async fn acquire_and_failed_teardown_are_reported() {
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe();
    let engine = Arc::new(MockEngine::new());
    engine.fail_destroy_of("file");
    let factory = ResourceFactory::new(engine, Arc::new(InlineScheduler::new()))
        .with_event_bus(Arc::clone(&bus));

    let file = factory.load(FILE).unwrap();
    file.acquire().unwrap();
    file.release().unwrap();
    file.release().unwrap();

    let events = collect(&mut rx);
    assert_eq!(
        events[1],
        LifecycleEvent::Acquired {
            resource_id: file.id(),
            ref_count: 2
        }
    );
    match events.last() {
        Some(LifecycleEvent::TeardownFailed { resource_id, error }) => {
            assert_eq!(*resource_id, file.id());
            assert_eq!(error, "engine failure: refused to destroy 'file'");
        }
        other => panic!("expected TeardownFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn factories_without_a_bus_emit_nothing() {
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let factory = ResourceFactory::new(Arc::new(MockEngine::new()), Arc::new(InlineScheduler::new()));

    factory.load(FILE).unwrap().release().unwrap();
    assert!(collect(&mut rx).is_empty());
}
