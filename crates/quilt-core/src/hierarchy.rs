//! Kernel hierarchy linking.
//!
//! Kernels form a tree. A child holds its parent weakly and a parent tracks
//! its children weakly, so dropping either side never leaks the other.
//! Context info resolves bottom-up: the local map overrides whatever the
//! parent chain provides.

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::debug;

use crate::container::{KernelService, ServiceId};
use crate::kernel::Kernel;

pub struct HierarchyManager {
    parent: RwLock<Option<Weak<Kernel>>>,
    children: Mutex<Vec<Weak<Kernel>>>,
    info: RwLock<Map<String, Value>>,
}

impl Default for HierarchyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HierarchyManager {
    pub fn new() -> Self {
        Self {
            parent: RwLock::new(None),
            children: Mutex::new(Vec::new()),
            info: RwLock::new(Map::new()),
        }
    }

    pub(crate) fn set_parent(&self, parent: Option<Weak<Kernel>>) {
        *self.parent.write() = parent;
    }

    pub fn parent(&self) -> Option<Arc<Kernel>> {
        self.parent.read().as_ref().and_then(|weak| weak.upgrade())
    }

    pub(crate) fn add_child(&self, child: &Arc<Kernel>) {
        let mut children = self.children.lock();
        children.retain(|entry| entry.upgrade().is_some_and(|k| k.id() != child.id()));
        children.push(Arc::downgrade(child));
        debug!(child = child.id(), "kernel linked");
    }

    pub(crate) fn remove_child(&self, id: u64) {
        self.children
            .lock()
            .retain(|entry| entry.upgrade().is_some_and(|k| k.id() != id));
    }

    /// Live children, pruning entries whose kernel was dropped.
    pub fn children(&self) -> Vec<Arc<Kernel>> {
        let mut children = self.children.lock();
        children.retain(|entry| entry.upgrade().is_some());
        children.iter().filter_map(|entry| entry.upgrade()).collect()
    }

    /// Local info merged over the parent chain; local keys win.
    pub fn context_info(&self) -> Map<String, Value> {
        let mut merged = match self.parent() {
            Some(parent) => parent.hierarchy().context_info(),
            None => Map::new(),
        };
        for (key, value) in self.info.read().iter() {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    pub fn set_context_info(&self, info: Map<String, Value>) {
        *self.info.write() = info;
    }
}

impl KernelService for HierarchyManager {
    fn service_id(&self) -> ServiceId {
        ServiceId::Hierarchy
    }

    fn dispose(&self) {
        *self.parent.write() = None;
        self.children.lock().clear();
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_local_info_without_parent() {
        let hierarchy = HierarchyManager::new();
        let mut info = Map::new();
        info.insert("workspace".to_string(), json!("/tmp/demo"));
        hierarchy.set_context_info(info);

        let resolved = hierarchy.context_info();
        assert_eq!(resolved.get("workspace"), Some(&json!("/tmp/demo")));
        assert!(hierarchy.parent().is_none());
        assert!(hierarchy.children().is_empty());
    }
}
