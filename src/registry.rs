use crate::container::ContainerHandle;
use crate::module::{Module, ModuleId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// A live container together with the module it belongs to.
pub struct RegisteredContainer {
    module: Arc<dyn Module>,
    handle: Arc<dyn ContainerHandle>,
    registered_at: DateTime<Utc>,
}

impl RegisteredContainer {
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn into_parts(self) -> (Arc<dyn Module>, Arc<dyn ContainerHandle>) {
        (self.module, self.handle)
    }
}

/// Concurrent map from module to its live container.
///
/// Backed by a sharded map: operations on the same module are atomic with
/// respect to each other, operations on different modules only contend when
/// they land in the same shard.
#[derive(Default)]
pub struct ContainerRegistry {
    entries: DashMap<ModuleId, RegisteredContainer>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert a handle for `module`. If the module already has one the new
    /// handle is handed back untouched.
    pub fn try_insert(
        &self,
        module: Arc<dyn Module>,
        handle: Arc<dyn ContainerHandle>,
    ) -> Result<(), Arc<dyn ContainerHandle>> {
        match self.entries.entry(module.id()) {
            Entry::Occupied(_) => Err(handle),
            Entry::Vacant(slot) => {
                slot.insert(RegisteredContainer {
                    module,
                    handle,
                    registered_at: Utc::now(),
                });
                Ok(())
            }
        }
    }

    pub fn remove_if_present(&self, id: ModuleId) -> Option<RegisteredContainer> {
        self.entries.remove(&id).map(|(_, entry)| entry)
    }

    /// Remove every entry present at the time of the call.
    pub fn remove_all(&self) -> Vec<RegisteredContainer> {
        let ids: Vec<ModuleId> = self.entries.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.remove_if_present(id))
            .collect()
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
