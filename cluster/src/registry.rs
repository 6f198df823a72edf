use crate::node::Node;
use bully_common::NodeId;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct RegistryInner {
    active: Vec<Arc<Node>>,
    terminated: Vec<Arc<Node>>,
    highest: Option<Arc<Node>>,
}

/// Roster of participants, split into active and terminated
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant in discovery order. Returns false if the id is
    /// already known.
    pub fn add(&self, node: Arc<Node>) -> bool {
        let mut inner = self.inner.lock();
        let known = inner
            .active
            .iter()
            .chain(inner.terminated.iter())
            .any(|n| n.id == node.id);
        if known {
            return false;
        }

        let is_highest = inner.highest.as_ref().map_or(true, |h| h.id < node.id);
        if is_highest {
            inner.highest = Some(node.clone());
        }
        inner.active.push(node);
        true
    }

    /// Move a participant from the active to the terminated list. Returns
    /// false if it was not active.
    pub fn add_terminated(&self, id: NodeId) -> bool {
        let mut inner = self.inner.lock();
        match inner.active.iter().position(|n| n.id == id) {
            Some(index) => {
                let node = inner.active.remove(index);
                tracing::debug!(
                    "Participant {} terminated, {} still active",
                    id,
                    inner.active.len()
                );
                inner.terminated.push(node);
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> Vec<Arc<Node>> {
        self.inner.lock().active.clone()
    }

    pub fn terminated(&self) -> Vec<Arc<Node>> {
        self.inner.lock().terminated.clone()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn terminated_count(&self) -> usize {
        self.inner.lock().terminated.len()
    }

    pub fn is_active(&self, id: NodeId) -> bool {
        self.inner.lock().active.iter().any(|n| n.id == id)
    }

    /// Highest-id participant ever added
    pub fn highest(&self) -> Option<Arc<Node>> {
        self.inner.lock().highest.clone()
    }

    /// Look up a participant in either list
    pub fn get(&self, id: NodeId) -> Option<Arc<Node>> {
        let inner = self.inner.lock();
        inner
            .active
            .iter()
            .chain(inner.terminated.iter())
            .find(|n| n.id == id)
            .cloned()
    }
}
