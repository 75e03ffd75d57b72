//! In-memory [`Engine`] for tests, benches and demos.
//!
//! [`MockEngine`] loads JSON documents of the shape
//!
//! ```json
//! {"name": "file", "children": [{"name": "artboard", "children": [{"name": "machine"}]}]}
//! ```
//!
//! and hands out one handle per spawned node. It records every destroy call
//! (count per handle, order and calling thread) so tests can check that
//! teardown happens exactly once and only on the scheduler's thread.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
use serde_json::Value;

use crate::engine::{DependencyKey, Engine, EngineError, EngineResult, NativeHandle, ResourceKind};

/// One node of a loaded document.
#[derive(Debug)]
struct Node {
    name: String,
    children: Vec<Arc<Node>>,
}

impl Node {
    fn parse(value: &Value) -> EngineResult<Arc<Self>> {
        let object = value.as_object().ok_or_else(|| EngineError::Malformed {
            reason: "expected an object".to_string(),
        })?;
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Malformed {
                reason: "missing string field 'name'".to_string(),
            })?;
        let children = match object.get("children") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().map(Self::parse).collect::<EngineResult<_>>()?,
            Some(_) => {
                return Err(EngineError::Malformed {
                    reason: format!("'children' of '{name}' must be an array"),
                });
            }
        };
        Ok(Arc::new(Self {
            name: name.to_string(),
            children,
        }))
    }

    fn child(&self, key: &DependencyKey) -> Option<&Arc<Self>> {
        match key {
            DependencyKey::Name(name) => self.children.iter().find(|child| &child.name == name),
            DependencyKey::Index(index) => self.children.get(*index),
        }
    }
}

#[derive(Debug)]
struct Live {
    node: Arc<Node>,
    kind: ResourceKind,
}

/// A destroy call the engine received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyRecord {
    /// The destroyed handle.
    pub handle: NativeHandle,
    /// The kind passed with the call.
    pub kind: ResourceKind,
    /// Name of the destroyed object, if the handle was live.
    pub name: Option<String>,
    /// Thread the call arrived on.
    pub thread: ThreadId,
}

#[derive(Debug, Default)]
struct MockState {
    next_handle: u64,
    created: usize,
    live: HashMap<NativeHandle, Live>,
    destroy_calls: HashMap<NativeHandle, u32>,
    destroyed: Vec<DestroyRecord>,
    fail_destroy: HashSet<String>,
}

impl MockState {
    fn allocate(&mut self, node: Arc<Node>, kind: ResourceKind) -> NativeHandle {
        self.next_handle += 1;
        self.created += 1;
        let handle = NativeHandle::from_raw(self.next_handle);
        self.live.insert(handle, Live { node, kind });
        handle
    }

    fn node(&self, handle: NativeHandle) -> EngineResult<&Live> {
        self.live
            .get(&handle)
            .ok_or(EngineError::InvalidHandle { handle })
    }
}

/// Thread-safe in-memory engine.
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    /// Create an engine with no live objects.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every destroy call for objects named `name` report failure.
    ///
    /// The handle is still considered gone afterwards.
    pub fn fail_destroy_of(&self, name: impl Into<String>) {
        self.state.lock().fail_destroy.insert(name.into());
    }

    /// Objects constructed and not yet destroyed.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Objects ever constructed.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.state.lock().created
    }

    /// How many times `handle` was passed to `destroy`.
    #[must_use]
    pub fn destroy_calls(&self, handle: NativeHandle) -> u32 {
        self.state
            .lock()
            .destroy_calls
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    /// Every destroy call, in arrival order.
    #[must_use]
    pub fn destroyed(&self) -> Vec<DestroyRecord> {
        self.state.lock().destroyed.clone()
    }

    /// Names of destroyed objects, in arrival order.
    #[must_use]
    pub fn destroyed_names(&self) -> Vec<String> {
        self.state
            .lock()
            .destroyed
            .iter()
            .filter_map(|record| record.name.clone())
            .collect()
    }

    /// Distinct threads destroy calls arrived on.
    #[must_use]
    pub fn destroy_threads(&self) -> HashSet<ThreadId> {
        self.state
            .lock()
            .destroyed
            .iter()
            .map(|record| record.thread)
            .collect()
    }
}

impl Engine for MockEngine {
    fn load(&self, bytes: &[u8]) -> EngineResult<NativeHandle> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| EngineError::Malformed {
            reason: e.to_string(),
        })?;
        let root = Node::parse(&value)?;
        Ok(self.state.lock().allocate(root, ResourceKind::Container))
    }

    fn spawn(
        &self,
        parent: NativeHandle,
        parent_kind: ResourceKind,
        key: &DependencyKey,
    ) -> EngineResult<(NativeHandle, ResourceKind)> {
        let mut state = self.state.lock();
        let child = state
            .node(parent)?
            .node
            .child(key)
            .cloned()
            .ok_or_else(|| EngineError::NotFound { key: key.to_string() })?;
        let kind = parent_kind.child_kind();
        Ok((state.allocate(child, kind), kind))
    }

    fn destroy(&self, kind: ResourceKind, handle: NativeHandle) -> EngineResult<()> {
        let mut state = self.state.lock();
        *state.destroy_calls.entry(handle).or_default() += 1;
        let removed = state.live.remove(&handle);
        let name = removed.as_ref().map(|live| live.node.name.clone());
        state.destroyed.push(DestroyRecord {
            handle,
            kind,
            name: name.clone(),
            thread: std::thread::current().id(),
        });

        let Some(live) = removed else {
            return Err(EngineError::InvalidHandle { handle });
        };
        if live.kind != kind {
            return Err(EngineError::Failed {
                message: format!("handle {handle} is a {}, not a {kind}", live.kind),
            });
        }
        if let Some(name) = name
            && state.fail_destroy.contains(&name)
        {
            return Err(EngineError::Failed {
                message: format!("refused to destroy '{name}'"),
            });
        }
        Ok(())
    }

    fn name(&self, handle: NativeHandle) -> EngineResult<String> {
        Ok(self.state.lock().node(handle)?.node.name.clone())
    }

    fn dependency_names(&self, handle: NativeHandle) -> EngineResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .node(handle)?
            .node
            .children
            .iter()
            .map(|child| child.name.clone())
            .collect())
    }
}
