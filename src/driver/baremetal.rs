//! Driver for bare-metal nodes.
//!
//! A node is provisioned by adding it to the input model with its ILO and PXE
//! details, deploying the install server, and installing an operating system.
//! The temporary server entry is removed once the install finishes; the node
//! then continues its life as a hypervisor host of the target kind.

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::facade::types::COBBLER_DEPLOY;
use crate::facade::{OsInstallTarget, PlaybookRun, ServerEntry};
use crate::lifecycle::{ActivationRequest, LifecycleError, Operation, ProvisionRequest};
use crate::model::{NewResource, Resource, ResourceKind, ResourceState, Secret, keys};

use super::model::{self, ModelChange};
use super::{Driver, DriverContext, DriverFuture, hyperv, kvm, pick_properties};

const REQUIRED: [&str; 4] = [
    keys::ILO_ADDRESS,
    keys::ILO_USER,
    keys::ILO_PASSWORD,
    keys::MAC_ADDRESS,
];

/// Lifecycle driver for [`ResourceKind::BareMetalNode`].
#[derive(Clone, Copy, Debug, Default)]
pub struct BareMetalDriver;

/// Returns `true` for six hex pairs separated by `:` or `-`.
fn is_mac_address(value: &str) -> bool {
    let separator = if value.contains('-') { '-' } else { ':' };
    let groups: Vec<&str> = value.split(separator).collect();
    groups.len() == 6
        && groups
            .iter()
            .all(|group| group.len() == 2 && group.chars().all(|ch| ch.is_ascii_hexdigit()))
}

fn validate_create(mut data: NewResource) -> Result<NewResource, LifecycleError> {
    let missing: Vec<&str> = REQUIRED
        .iter()
        .copied()
        .filter(|key| {
            data.properties
                .get(*key)
                .is_none_or(|value| value.trim().is_empty())
        })
        .collect();
    if !missing.is_empty() {
        return Err(LifecycleError::Validation(format!(
            "a bare-metal node requires {}",
            missing.join(", ")
        )));
    }
    let mac = data
        .properties
        .get(keys::MAC_ADDRESS)
        .map(|value| value.trim())
        .unwrap_or_default();
    if !is_mac_address(mac) {
        return Err(LifecycleError::Validation(format!(
            "{mac:?} is not a MAC address"
        )));
    }
    data.state = Some(ResourceState::Imported);
    Ok(data)
}

fn target_role(kind: ResourceKind) -> Result<&'static str, LifecycleError> {
    match kind {
        ResourceKind::LinuxKvmHost => Ok(kvm::DEFAULT_ROLE),
        ResourceKind::WindowsHypervisorHost => Ok(hyperv::DEFAULT_ROLE),
        ResourceKind::Cluster | ResourceKind::BareMetalNode => Err(LifecycleError::Validation(
            format!("cannot provision a node as {kind}"),
        )),
    }
}

fn install_entry(resource: &Resource, role: &str) -> ServerEntry {
    let property = |key: &str| resource.property(key).map(ToOwned::to_owned);
    ServerEntry {
        id: model::server_id(resource),
        ip_addr: resource.address.clone(),
        role: property(keys::SERVER_ROLE).unwrap_or_else(|| role.to_owned()),
        server_group: property(keys::SERVER_GROUP),
        nic_mapping: property(keys::NIC_MAPPING),
        mac_addr: property(keys::MAC_ADDRESS),
        ilo_ip: property(keys::ILO_ADDRESS),
        ilo_user: property(keys::ILO_USER),
        ilo_password: resource.property(keys::ILO_PASSWORD).map(Secret::new),
    }
}

async fn provision(
    ctx: &DriverContext,
    resource: &Resource,
    request: &ProvisionRequest,
) -> Result<(), LifecycleError> {
    let entry = install_entry(resource, target_role(request.target_kind)?);
    let server = entry.id.clone();
    model::deploy(
        ctx,
        &ModelChange::AddServer(entry),
        &[(COBBLER_DEPLOY, PlaybookRun::everywhere())],
        Operation::Provision,
    )
    .await?;

    let install = ctx
        .facade()
        .install_os(
            &ctx.request,
            OsInstallTarget {
                id: server.clone(),
                os_version: request.os_version.clone(),
            },
        )
        .await;
    if let Err(err) = install {
        warn!(resource = %resource.id, error = %err, "operating system install failed");
        model::undo_server(ctx, &server).await;
        return Err(LifecycleError::during(Operation::Provision)(err));
    }

    model::withdraw(
        ctx,
        &ModelChange::RemoveServer(server),
        None,
        Operation::Provision,
    )
    .await?;
    if let Some(version) = &request.os_version {
        ctx.store()
            .set_property(resource.id, keys::OS_VERSION, version.as_str())?;
    }
    info!(resource = %resource.id, kind = %request.target_kind, "node provisioned");
    Ok(())
}

impl Driver for BareMetalDriver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::BareMetalNode
    }

    fn initial_state(&self) -> ResourceState {
        ResourceState::Imported
    }

    fn deletable_states(&self) -> &'static [ResourceState] {
        &[ResourceState::Imported, ResourceState::Removed]
    }

    fn bookkeeping_keys(&self) -> &'static [&'static str] {
        &[keys::SERVER_ID]
    }

    fn validate_create<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        data: NewResource,
    ) -> DriverFuture<'a, NewResource> {
        Box::pin(async move { validate_create(data) })
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
        pick_properties(
            data,
            &[
                keys::ILO_ADDRESS,
                keys::ILO_USER,
                keys::ILO_PASSWORD,
                keys::MAC_ADDRESS,
                keys::SERVER_GROUP,
                keys::SERVER_ROLE,
                keys::NIC_MAPPING,
            ],
        )
    }

    fn pre_activation_steps<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        resource: &'a Resource,
        _request: &'a ActivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            Err(LifecycleError::Validation(format!(
                "bare-metal node {} must be provisioned before activation",
                resource.name
            )))
        })
    }

    fn provision<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
        request: &'a ProvisionRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(provision(ctx, resource, request))
    }

    fn get_inventory<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        resource: &'a Resource,
    ) -> DriverFuture<'a, Value> {
        Box::pin(async move {
            Ok(json!({
                "ilo_address": resource.property(keys::ILO_ADDRESS),
                "mac_addr": resource.property(keys::MAC_ADDRESS),
            }))
        })
    }
}
