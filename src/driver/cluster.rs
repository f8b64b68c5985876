//! Driver for clusters owned by a resource manager.
//!
//! A cluster is deployed by writing its manager coordinates and network
//! configuration into the pass-through entity of the input model. Hosts that
//! join the cluster later are picked up by a host commission.

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::facade::PlaybookRun;
use crate::facade::types::{SITE, STOP_SERVICES};
use crate::inventory::ClusterDetail;
use crate::lifecycle::{
    ActivationRequest, DeactivationRequest, HostCommissionRequest, LifecycleError, Operation,
};
use crate::model::{NewResource, Resource, ResourceKind, ResourceManager, ResourceState, keys};

use super::host::{self, Severity};
use super::model::{self, ModelChange};
use super::{Driver, DriverContext, DriverFuture, pick_properties};

const DEFAULT_MANAGER_PORT: u16 = 443;

/// Lifecycle driver for [`ResourceKind::Cluster`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ClusterDriver;

fn owner(ctx: &DriverContext, resource: &Resource) -> Result<ResourceManager, LifecycleError> {
    let id = resource.resource_manager_id.ok_or_else(|| {
        LifecycleError::Validation(format!("cluster {} has no resource manager", resource.name))
    })?;
    Ok(ctx.store().get_manager(id)?)
}

fn moid(resource: &Resource) -> Result<&str, LifecycleError> {
    resource.property(keys::CLUSTER_MOID).ok_or_else(|| {
        LifecycleError::Validation(format!("cluster {} has no {}", resource.name, keys::CLUSTER_MOID))
    })
}

async fn detail(
    ctx: &DriverContext,
    resource: &Resource,
    operation: Operation,
) -> Result<ClusterDetail, LifecycleError> {
    let manager = owner(ctx, resource)?;
    ctx.inventory()
        .cluster_detail(&manager, moid(resource)?)
        .await
        .map_err(LifecycleError::during(operation))
}

fn network_config(resource: &Resource, request: &ActivationRequest) -> Option<Value> {
    request.network_config.clone().or_else(|| {
        resource
            .property(keys::NETWORK_PROPERTIES)
            .and_then(|raw| serde_json::from_str(raw).ok())
    })
}

fn commissioned(resource: &Resource) -> Vec<String> {
    resource
        .property(keys::COMMISSIONED_HOSTS)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

fn host_names(detail: &ClusterDetail) -> Vec<String> {
    detail.hosts.iter().map(|member| member.name.clone()).collect()
}

fn pass_through_data(manager: &ResourceManager, resource: &Resource, network: &Value) -> Value {
    let vcenter_id = manager
        .property(keys::MANAGER_UUID)
        .map_or_else(|| manager.id.to_string(), ToOwned::to_owned);
    json!({
        "vmware": {
            "vcenter_id": vcenter_id,
            "vcenter_ip": manager.address,
            "vcenter_port": manager.port.unwrap_or(DEFAULT_MANAGER_PORT),
            "vcenter_username": manager.username,
            "cluster_moid": resource.property(keys::CLUSTER_MOID),
            "datacenter": resource.property(keys::DATACENTER),
            "network": network,
        }
    })
}

async fn validate_create(
    ctx: &DriverContext,
    mut data: NewResource,
) -> Result<NewResource, LifecycleError> {
    let Some(manager_id) = data.resource_manager_id else {
        return Err(LifecycleError::Validation(String::from(
            "a cluster requires a resource manager",
        )));
    };
    let manager = ctx.store().get_manager(manager_id)?;
    let Some(cluster) = data.properties.get(keys::CLUSTER_MOID) else {
        return Err(LifecycleError::Validation(format!(
            "a cluster requires the {} property",
            keys::CLUSTER_MOID
        )));
    };
    ctx.inventory()
        .cluster_detail(&manager, cluster)
        .await
        .map_err(LifecycleError::during(Operation::Create))?;
    data.state = Some(ResourceState::Imported);
    Ok(data)
}

async fn pre_activation(
    ctx: &DriverContext,
    resource: &Resource,
    request: &ActivationRequest,
) -> Result<(), LifecycleError> {
    let found = detail(ctx, resource, Operation::Activation).await?;
    if found.hosts.is_empty() {
        host::enforce(
            Severity::Block,
            resource,
            format!("cluster {} has no hosts", resource.name),
        )?;
    }
    if network_config(resource, request).is_none() {
        host::enforce(
            Severity::Block,
            resource,
            format!("cluster {} has no network configuration", resource.name),
        )?;
    }
    if !found.datastores.iter().any(|datastore| datastore.shared) {
        host::enforce(
            Severity::Warn,
            resource,
            format!("cluster {} has no shared datastore", resource.name),
        )?;
    }
    Ok(())
}

/// Writes the cluster's pass-through data and deploys it, then runs the
/// driver's post-activation steps. A failure after the deployment removes
/// the data again.
pub(crate) async fn activate(
    driver: &dyn Driver,
    ctx: &DriverContext,
    resource: &Resource,
    request: &ActivationRequest,
) -> Result<(), LifecycleError> {
    let manager = owner(ctx, resource)?;
    let network = network_config(resource, request).ok_or_else(|| {
        LifecycleError::Validation(format!("cluster {} has no network configuration", resource.name))
    })?;
    ctx.store()
        .set_property(resource.id, keys::NETWORK_PROPERTIES, network.to_string())?;
    let found = detail(ctx, resource, Operation::Activation).await?;

    let server = model::server_id(resource);
    model::deploy(
        ctx,
        &ModelChange::UpsertPassThrough {
            id: server.clone(),
            data: pass_through_data(&manager, resource, &network),
        },
        &model::site_run(&server, request.run_playbook),
        Operation::Activation,
    )
    .await?;
    let finished = match record_deployment(ctx, resource, &server, &found) {
        Ok(()) => driver.post_activation_steps(ctx, resource, request).await,
        Err(err) => Err(err),
    };
    if let Err(err) = finished {
        warn!(resource = %resource.id, error = %err, "activation failed after deployment; removing pass-through data");
        model::undo_pass_through(ctx, &server).await;
        return Err(err);
    }
    Ok(())
}

fn record_deployment(
    ctx: &DriverContext,
    resource: &Resource,
    server: &str,
    found: &ClusterDetail,
) -> Result<(), LifecycleError> {
    ctx.store()
        .set_property(resource.id, keys::SERVER_ID, server)?;
    ctx.store().set_property(
        resource.id,
        keys::COMMISSIONED_HOSTS,
        Value::from(host_names(found)).to_string(),
    )?;
    Ok(())
}

async fn deactivate(
    ctx: &DriverContext,
    resource: &Resource,
    request: &DeactivationRequest,
) -> Result<(), LifecycleError> {
    let Some(server) = resource.property(keys::SERVER_ID) else {
        return Ok(());
    };
    let stop = request
        .run_playbook
        .then(|| (STOP_SERVICES, PlaybookRun::limited_to(server)));
    model::withdraw(
        ctx,
        &ModelChange::RemovePassThrough(server.to_owned()),
        stop,
        Operation::Deactivation,
    )
    .await
}

async fn new_hosts(
    ctx: &DriverContext,
    resource: &Resource,
) -> Result<(ClusterDetail, Vec<String>), LifecycleError> {
    let found = detail(ctx, resource, Operation::HostCommission).await?;
    let known = commissioned(resource);
    let fresh = host_names(&found)
        .into_iter()
        .filter(|name| !known.contains(name))
        .collect();
    Ok((found, fresh))
}

async fn pre_host_commission(ctx: &DriverContext, resource: &Resource) -> Result<(), LifecycleError> {
    let (_, fresh) = new_hosts(ctx, resource).await?;
    if fresh.is_empty() {
        return Err(LifecycleError::Validation(format!(
            "cluster {} has no new hosts to commission",
            resource.name
        )));
    }
    Ok(())
}

async fn host_commission(
    ctx: &DriverContext,
    resource: &Resource,
    request: &HostCommissionRequest,
) -> Result<(), LifecycleError> {
    let (found, fresh) = new_hosts(ctx, resource).await?;
    if request.run_playbook && !fresh.is_empty() {
        let server = model::server_id(resource);
        let run = PlaybookRun::limited_to(server).with_var("hosts", fresh.clone());
        model::run_locked(ctx, SITE, &run, Operation::HostCommission).await?;
    }
    ctx.store().set_property(
        resource.id,
        keys::COMMISSIONED_HOSTS,
        Value::from(host_names(&found)).to_string(),
    )?;
    info!(resource = %resource.id, hosts = ?fresh, "hosts commissioned");
    Ok(())
}

async fn delete(ctx: &DriverContext, resource: &Resource) -> Result<(), LifecycleError> {
    let Some(server) = resource.property(keys::SERVER_ID) else {
        return Ok(());
    };
    model::withdraw(
        ctx,
        &ModelChange::RemovePassThrough(server.to_owned()),
        None,
        Operation::Delete,
    )
    .await
}

impl Driver for ClusterDriver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Cluster
    }

    fn initial_state(&self) -> ResourceState {
        ResourceState::Imported
    }

    fn deletable_states(&self) -> &'static [ResourceState] {
        &[ResourceState::Imported, ResourceState::Removed]
    }

    fn bookkeeping_keys(&self) -> &'static [&'static str] {
        &[
            keys::SERVER_ID,
            keys::ACTIVATED_FROM,
            keys::NETWORK_PROPERTIES,
            keys::COMMISSIONED_HOSTS,
        ]
    }

    fn validate_create<'a>(
        &'a self,
        ctx: &'a DriverContext,
        data: NewResource,
    ) -> DriverFuture<'a, NewResource> {
        Box::pin(validate_create(ctx, data))
    }

    fn validate_update<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        _current: &'a Resource,
        _proposed: &'a Resource,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn get_properties(&self, data: &NewResource) -> Vec<(String, String)> {
        pick_properties(data, &[keys::CLUSTER_MOID, keys::DATACENTER])
    }

    fn pre_activation_steps<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
        request: &'a ActivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(pre_activation(ctx, resource, request))
    }

    fn activate<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
        request: &'a ActivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(activate(self, ctx, resource, request))
    }

    fn deactivate<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
        request: &'a DeactivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(deactivate(ctx, resource, request))
    }

    fn delete<'a>(&'a self, ctx: &'a DriverContext, resource: &'a Resource) -> DriverFuture<'a, ()> {
        Box::pin(delete(ctx, resource))
    }

    fn pre_host_commission_steps<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
        _request: &'a HostCommissionRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(pre_host_commission(ctx, resource))
    }

    fn host_commission<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
        request: &'a HostCommissionRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(host_commission(ctx, resource, request))
    }

    fn get_inventory<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
    ) -> DriverFuture<'a, Value> {
        Box::pin(async move {
            let found = detail(ctx, resource, Operation::Update).await?;
            Ok(json!({
                "hosts": found.hosts,
                "datastores": found.datastores,
            }))
        })
    }
}
