//! Resource and property persistence.
//!
//! [`MemoryStore`] keeps every record in memory behind one mutex. Writes go
//! through a [`Session`]: the session stages a copy of the tables, mutations
//! apply to the copy, and [`Session::commit`] swaps the copy in. Dropping a
//! session without committing discards every staged change, so a failed
//! multi-record update never leaves a partial write behind.
//!
//! Sessions hold the store lock for their whole lifetime and are therefore
//! short-lived and synchronous; callers never keep one across an `.await`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{
    ManagerId, Property, PropertyId, Resource, ResourceId, ResourceKind, ResourceManager,
    ResourceState,
};

mod snapshot;

pub use snapshot::SnapshotFile;

/// Errors raised by the persistence layer.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when a record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Record type that was looked up.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
    /// Raised when a previous writer panicked while holding the store lock.
    #[error("store lock poisoned")]
    Poisoned,
    /// Raised when the snapshot file cannot be read or written.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Snapshot path.
        path: String,
        /// Operating system error message.
        message: String,
    },
    /// Raised when the snapshot file is not valid JSON.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Snapshot path.
        path: String,
        /// Parser error message.
        message: String,
    },
}

impl StoreError {
    fn resource(id: ResourceId) -> Self {
        Self::NotFound {
            entity: "resource",
            id: id.to_string(),
        }
    }

    fn manager(id: ManagerId) -> Self {
        Self::NotFound {
            entity: "resource manager",
            id: id.to_string(),
        }
    }
}

/// Every persisted record.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Tables {
    /// Resources keyed by identifier.
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, Resource>,
    /// Resource managers keyed by identifier.
    #[serde(default)]
    pub managers: BTreeMap<ManagerId, ResourceManager>,
}

/// Filters accepted by [`MemoryStore::list_resources`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceFilter {
    /// Only resources of this kind.
    pub kind: Option<ResourceKind>,
    /// Only resources in this state.
    pub state: Option<ResourceState>,
    /// Only resources owned by this manager.
    pub manager: Option<ManagerId>,
}

impl ResourceFilter {
    /// Returns `true` when `resource` passes every set filter.
    #[must_use]
    pub fn matches(&self, resource: &Resource) -> bool {
        self.kind.is_none_or(|kind| resource.kind == kind)
            && self.state.is_none_or(|state| resource.state == state)
            && self
                .manager
                .is_none_or(|manager| resource.resource_manager_id == Some(manager))
    }
}

/// In-memory store with transactional sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `tables`.
    #[must_use]
    pub const fn from_tables(tables: Tables) -> Self {
        Self {
            tables: Mutex::new(tables),
        }
    }

    /// Returns a copy of every record, for snapshotting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] when the store lock is poisoned.
    pub fn tables(&self) -> Result<Tables, StoreError> {
        Ok(self.lock()?.clone())
    }

    /// Opens a transactional session named after the triggering event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] when the store lock is poisoned.
    pub fn session(&self, event: &'static str) -> Result<Session<'_>, StoreError> {
        let guard = self.lock()?;
        let staged = guard.clone();
        Ok(Session {
            event,
            guard,
            staged,
            committed: false,
        })
    }

    /// Loads one resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such resource exists.
    pub fn get_resource(&self, id: ResourceId) -> Result<Resource, StoreError> {
        self.lock()?
            .resources
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::resource(id))
    }

    /// Lists resources matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] when the store lock is poisoned.
    pub fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>, StoreError> {
        Ok(self
            .lock()?
            .resources
            .values()
            .filter(|resource| filter.matches(resource))
            .cloned()
            .collect())
    }

    /// Loads one resource manager.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such manager exists.
    pub fn get_manager(&self, id: ManagerId) -> Result<ResourceManager, StoreError> {
        self.lock()?
            .managers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::manager(id))
    }

    /// Lists every resource manager.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] when the store lock is poisoned.
    pub fn list_managers(&self) -> Result<Vec<ResourceManager>, StoreError> {
        Ok(self.lock()?.managers.values().cloned().collect())
    }

    /// Replaces every value of `key` on a resource with `value` in its own
    /// session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the resource does not exist.
    pub fn set_property(
        &self,
        id: ResourceId,
        key: &str,
        value: impl Into<String>,
    ) -> Result<(), StoreError> {
        let mut session = self.session("set-property")?;
        session.set_property(id, key, value)?;
        session.commit();
        Ok(())
    }

    /// Deletes every value of each key in `keys` from a resource in its own
    /// session, returning how many records were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the resource does not exist.
    pub fn delete_properties(&self, id: ResourceId, keys: &[&str]) -> Result<usize, StoreError> {
        let mut session = self.session("delete-properties")?;
        let mut removed = 0;
        for key in keys {
            removed += session.delete_property(id, key)?;
        }
        session.commit();
        Ok(removed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// Staged view of the store; see the module documentation.
pub struct Session<'a> {
    event: &'static str,
    guard: MutexGuard<'a, Tables>,
    staged: Tables,
    committed: bool,
}

impl Session<'_> {
    /// Returns a staged resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such resource exists.
    pub fn resource(&self, id: ResourceId) -> Result<&Resource, StoreError> {
        self.staged
            .resources
            .get(&id)
            .ok_or_else(|| StoreError::resource(id))
    }

    /// Returns a staged resource for mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such resource exists.
    pub fn resource_mut(&mut self, id: ResourceId) -> Result<&mut Resource, StoreError> {
        self.staged
            .resources
            .get_mut(&id)
            .ok_or_else(|| StoreError::resource(id))
    }

    /// Iterates every staged resource.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.staged.resources.values()
    }

    /// Inserts or replaces a resource.
    pub fn put_resource(&mut self, resource: Resource) {
        self.staged.resources.insert(resource.id, resource);
    }

    /// Removes a resource and every property it owns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such resource exists.
    pub fn remove_resource(&mut self, id: ResourceId) -> Result<Resource, StoreError> {
        self.staged
            .resources
            .remove(&id)
            .ok_or_else(|| StoreError::resource(id))
    }

    /// Appends a property to a resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the resource does not exist.
    pub fn create_property(
        &mut self,
        id: ResourceId,
        key: &str,
        value: impl Into<String>,
    ) -> Result<PropertyId, StoreError> {
        let property = Property::new(key, value);
        let property_id = property.id;
        self.resource_mut(id)?.properties.push(property);
        Ok(property_id)
    }

    /// Replaces every value of `key` on a resource with a single `value`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the resource does not exist.
    pub fn set_property(
        &mut self,
        id: ResourceId,
        key: &str,
        value: impl Into<String>,
    ) -> Result<(), StoreError> {
        self.resource_mut(id)?.set_property(key, value);
        Ok(())
    }

    /// Deletes every value of `key` from a resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the resource does not exist.
    pub fn delete_property(&mut self, id: ResourceId, key: &str) -> Result<usize, StoreError> {
        Ok(self.resource_mut(id)?.remove_property(key))
    }

    /// Returns a staged resource manager.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such manager exists.
    pub fn manager(&self, id: ManagerId) -> Result<&ResourceManager, StoreError> {
        self.staged
            .managers
            .get(&id)
            .ok_or_else(|| StoreError::manager(id))
    }

    /// Iterates every staged resource manager.
    pub fn managers(&self) -> impl Iterator<Item = &ResourceManager> {
        self.staged.managers.values()
    }

    /// Inserts or replaces a resource manager.
    pub fn put_manager(&mut self, manager: ResourceManager) {
        self.staged.managers.insert(manager.id, manager);
    }

    /// Removes a resource manager.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such manager exists.
    pub fn remove_manager(&mut self, id: ManagerId) -> Result<ResourceManager, StoreError> {
        self.staged
            .managers
            .remove(&id)
            .ok_or_else(|| StoreError::manager(id))
    }

    /// Publishes every staged change.
    pub fn commit(mut self) {
        *self.guard = std::mem::take(&mut self.staged);
        self.committed = true;
        debug!(event = self.event, "store session committed");
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if !self.committed {
            debug!(event = self.event, "store session rolled back");
        }
    }
}

#[cfg(test)]
mod tests;
