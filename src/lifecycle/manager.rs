//! Resource manager registration and cluster import.

use tracing::info;

use crate::context::RequestContext;
use crate::inventory::ClusterSummary;
use crate::model::{
    ManagerId, ManagerUpdate, ManagerView, NewManager, Property, Resource, ResourceId,
    ResourceKind, ResourceManager, ResourceState, keys,
};

use super::{LifecycleError, Operation, Orchestrator, require_field};

/// States an owned resource may be in when its manager is deleted.
const RELEASABLE: [ResourceState; 2] = [ResourceState::Imported, ResourceState::Removed];

fn imported_cluster(manager: &ResourceManager, name: String, summary: ClusterSummary) -> Resource {
    Resource {
        id: ResourceId::generate(),
        name,
        kind: ResourceKind::Cluster,
        state: ResourceState::Imported,
        address: manager.address.clone(),
        username: manager.username.clone(),
        password: manager.password.clone(),
        port: manager.port,
        resource_manager_id: Some(manager.id),
        properties: vec![
            Property::new(keys::CLUSTER_MOID, summary.moid),
            Property::new(keys::DATACENTER, summary.datacenter),
        ],
    }
}

impl Orchestrator {
    /// Registers a resource manager and imports its clusters as `imported`
    /// cluster resources.
    ///
    /// A cluster whose name is already taken is imported as
    /// `<manager>/<cluster>`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Validation`] for incomplete input,
    /// [`LifecycleError::Conflict`] for a taken manager name, and a create
    /// failure when the manager cannot be reached.
    pub async fn create_manager(
        &self,
        ctx: &RequestContext,
        data: NewManager,
    ) -> Result<ManagerView, LifecycleError> {
        require_field(&data.name, "name")?;
        require_field(&data.address, "address")?;
        require_field(&data.username, "username")?;
        if data.password.is_empty() {
            return Err(LifecycleError::Validation(String::from(
                "password must not be empty",
            )));
        }
        let manager = ResourceManager {
            id: ManagerId::generate(),
            name: data.name.trim().to_owned(),
            kind: data.kind,
            address: data.address.trim().to_owned(),
            username: data.username.trim().to_owned(),
            password: data.password,
            port: data.port,
            properties: Vec::new(),
        };
        self.ensure_manager_name(&manager)?;

        let inventory = self.inner.deps.inventory.as_ref();
        inventory
            .check_connection(&manager)
            .await
            .map_err(LifecycleError::during(Operation::Create))?;
        let clusters = inventory
            .list_clusters(&manager)
            .await
            .map_err(LifecycleError::during(Operation::Create))?;
        let count = clusters.len();
        let view = self.import(manager, clusters)?;
        info!(
            request = %ctx.request_id,
            manager = %view.id,
            clusters = count,
            "resource manager registered"
        );
        Ok(view)
    }

    fn ensure_manager_name(&self, manager: &ResourceManager) -> Result<(), LifecycleError> {
        let taken = self
            .store()
            .list_managers()?
            .iter()
            .any(|existing| existing.id != manager.id && existing.name == manager.name);
        if taken {
            return Err(LifecycleError::Conflict(format!(
                "a resource manager named {} already exists",
                manager.name
            )));
        }
        Ok(())
    }

    fn import(
        &self,
        manager: ResourceManager,
        clusters: Vec<ClusterSummary>,
    ) -> Result<ManagerView, LifecycleError> {
        let mut session = self.store().session("create-manager")?;
        if session.managers().any(|existing| existing.name == manager.name) {
            return Err(LifecycleError::Conflict(format!(
                "a resource manager named {} already exists",
                manager.name
            )));
        }
        let mut taken: Vec<String> = session
            .resources()
            .filter(|resource| resource.kind == ResourceKind::Cluster)
            .map(|resource| resource.name.clone())
            .collect();
        for summary in clusters {
            let name = if taken.contains(&summary.name) {
                format!("{}/{}", manager.name, summary.name)
            } else {
                summary.name.clone()
            };
            taken.push(name.clone());
            session.put_resource(imported_cluster(&manager, name, summary));
        }
        let view = manager.view();
        session.put_manager(manager);
        session.commit();
        Ok(view)
    }

    /// Changes a manager's name or connection fields, re-checking the
    /// connection when it changed.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] for unknown ids,
    /// [`LifecycleError::Conflict`] for taken names, and an update failure
    /// when the new connection is refused.
    pub async fn update_manager(
        &self,
        ctx: &RequestContext,
        id: ManagerId,
        update: &ManagerUpdate,
    ) -> Result<ManagerView, LifecycleError> {
        let current = self.store().get_manager(id)?;
        let proposed = update.apply_to(&current);
        require_field(&proposed.name, "name")?;
        require_field(&proposed.address, "address")?;
        self.ensure_manager_name(&proposed)?;
        if update.touches_connection(&current) {
            self.inner
                .deps
                .inventory
                .check_connection(&proposed)
                .await
                .map_err(LifecycleError::during(Operation::Update))?;
        }

        let mut session = self.store().session("update-manager")?;
        session.manager(id)?;
        let view = proposed.view();
        session.put_manager(proposed);
        session.commit();
        info!(request = %ctx.request_id, manager = %id, "resource manager updated");
        Ok(view)
    }

    /// Deletes a manager together with the clusters it still only imported.
    ///
    /// # Errors
    ///
    /// Returns a [`LifecycleError::Failed`] delete while the manager owns a
    /// resource outside `imported` and `removed`.
    pub fn delete_manager(&self, ctx: &RequestContext, id: ManagerId) -> Result<(), LifecycleError> {
        let mut session = self.store().session("delete-manager")?;
        let name = session.manager(id)?.name.clone();
        let owned: Vec<(ResourceId, String, ResourceState)> = session
            .resources()
            .filter(|resource| resource.resource_manager_id == Some(id))
            .map(|resource| (resource.id, resource.name.clone(), resource.state))
            .collect();
        if let Some((_, busy, state)) = owned
            .iter()
            .find(|(_, _, state)| !RELEASABLE.contains(state))
        {
            return Err(LifecycleError::failed(
                Operation::Delete,
                format!("resource manager {name} still owns {busy} in state {state}"),
            ));
        }
        for (resource, _, _) in &owned {
            session.remove_resource(*resource)?;
        }
        session.remove_manager(id)?;
        session.commit();
        info!(
            request = %ctx.request_id,
            manager = %id,
            resources = owned.len(),
            "resource manager deleted"
        );
        Ok(())
    }

    /// Reads one manager.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] for unknown ids.
    pub fn get_manager(&self, id: ManagerId) -> Result<ManagerView, LifecycleError> {
        Ok(self.store().get_manager(id)?.view())
    }

    /// Lists every manager.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Store`] when the store is unusable.
    pub fn list_managers(&self) -> Result<Vec<ManagerView>, LifecycleError> {
        Ok(self
            .store()
            .list_managers()?
            .iter()
            .map(ResourceManager::view)
            .collect())
    }
}
