//! Steps shared by the hypervisor host drivers.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::facade::types::STOP_SERVICES;
use crate::facade::{PlaybookRun, ServerEntry};
use crate::lifecycle::{
    ActivationRequest, DeactivationRequest, LifecycleError, Operation,
};
use crate::model::{NewResource, Resource, ResourceState, keys};
use crate::remote::{RemoteShell, ShellFlavor, ShellTarget};

use super::model::{self, ModelChange};
use super::{Driver, DriverContext};

/// Whether a failed check stops the workflow or only logs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Severity {
    Block,
    Warn,
}

/// Enforces one check outcome.
pub(crate) fn enforce(
    severity: Severity,
    resource: &Resource,
    message: String,
) -> Result<(), LifecycleError> {
    match severity {
        Severity::Block => Err(LifecycleError::Validation(message)),
        Severity::Warn => {
            warn!(resource = %resource.id, check = %message, "advisory check failed");
            Ok(())
        }
    }
}

fn target(resource: &Resource, flavor: ShellFlavor) -> ShellTarget {
    ShellTarget {
        host: resource.address.clone(),
        port: resource.port,
        username: resource.username.clone(),
        password: resource.password.clone(),
        flavor,
    }
}

/// Opens a shell on `resource`, failing `operation` when it is unreachable.
pub(crate) async fn open_shell(
    ctx: &DriverContext,
    resource: &Resource,
    flavor: ShellFlavor,
    operation: Operation,
) -> Result<Box<dyn RemoteShell>, LifecycleError> {
    let shell = ctx.shells().connect(&target(resource, flavor));
    shell
        .open()
        .await
        .map_err(LifecycleError::during(operation))?;
    Ok(shell)
}

/// Checks that create input carries credentials and that the host accepts
/// them, then injects `initial` as the starting state.
pub(crate) async fn validate_create(
    ctx: &DriverContext,
    mut data: NewResource,
    flavor: ShellFlavor,
    initial: ResourceState,
) -> Result<NewResource, LifecycleError> {
    if data.username.trim().is_empty() || data.password.is_empty() {
        return Err(LifecycleError::Validation(format!(
            "{} requires a username and password",
            data.kind
        )));
    }
    let shell = ctx.shells().connect(&ShellTarget {
        host: data.address.clone(),
        port: data.port,
        username: data.username.clone(),
        password: data.password.clone(),
        flavor,
    });
    shell
        .open()
        .await
        .map_err(LifecycleError::during(Operation::Create))?;
    close(shell.as_ref()).await;
    data.state = Some(initial);
    Ok(data)
}

/// Re-checks connectivity when the connection fields changed.
pub(crate) async fn validate_update(
    ctx: &DriverContext,
    current: &Resource,
    proposed: &Resource,
    flavor: ShellFlavor,
) -> Result<(), LifecycleError> {
    let unchanged = current.address == proposed.address
        && current.username == proposed.username
        && current.password == proposed.password
        && current.port == proposed.port;
    if unchanged {
        return Ok(());
    }
    let shell = open_shell(ctx, proposed, flavor, Operation::Update).await?;
    close(shell.as_ref()).await;
    Ok(())
}

pub(crate) async fn close(shell: &dyn RemoteShell) {
    if let Err(err) = shell.close().await {
        debug!(error = %err, "closing shell failed");
    }
}

/// Compares a host clock, in seconds since the epoch, with ours.
pub(crate) fn clock_skew_message(
    ctx: &DriverContext,
    resource: &Resource,
    remote: &str,
) -> Option<String> {
    let Ok(remote_secs) = remote.trim().parse::<u64>() else {
        return Some(format!(
            "cannot read the clock of {}: {remote:?}",
            resource.name
        ));
    };
    let local_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let skew = local_secs.abs_diff(remote_secs);
    let allowed = ctx.settings().max_clock_skew.as_secs();
    (skew > allowed).then(|| {
        format!(
            "clock of {} is {skew}s away from ours (limit {allowed}s)",
            resource.name
        )
    })
}

fn server_entry(resource: &Resource, request: &ActivationRequest, default_role: &str) -> ServerEntry {
    let property = |key: &str| resource.property(key).map(ToOwned::to_owned);
    ServerEntry {
        id: model::server_id(resource),
        ip_addr: resource.address.clone(),
        role: request
            .server_role
            .clone()
            .or_else(|| property(keys::SERVER_ROLE))
            .unwrap_or_else(|| default_role.to_owned()),
        server_group: request
            .server_group
            .clone()
            .or_else(|| property(keys::SERVER_GROUP)),
        nic_mapping: request
            .nic_mapping
            .clone()
            .or_else(|| property(keys::NIC_MAPPING)),
        ..ServerEntry::default()
    }
}

/// Adds the host's server entry and deploys it, then runs the driver's
/// post-activation steps. A failure after the deployment removes the entry
/// again.
pub(crate) async fn activate(
    driver: &dyn Driver,
    ctx: &DriverContext,
    resource: &Resource,
    request: &ActivationRequest,
    default_role: &str,
) -> Result<(), LifecycleError> {
    let entry = server_entry(resource, request, default_role);
    let server = entry.id.clone();
    model::deploy(
        ctx,
        &ModelChange::AddServer(entry),
        &model::site_run(&server, request.run_playbook),
        Operation::Activation,
    )
    .await?;
    let finished = match ctx
        .store()
        .set_property(resource.id, keys::SERVER_ID, server.as_str())
    {
        Ok(()) => driver.post_activation_steps(ctx, resource, request).await,
        Err(err) => Err(err.into()),
    };
    if let Err(err) = finished {
        warn!(resource = %resource.id, error = %err, "activation failed after deployment; removing server entry");
        model::undo_server(ctx, &server).await;
        return Err(err);
    }
    Ok(())
}

/// Waits for the compute service to register the host and records its
/// hypervisor id.
pub(crate) async fn await_registration(
    ctx: &DriverContext,
    resource: &Resource,
) -> Result<(), LifecycleError> {
    let settings = ctx.settings();
    let attempts = settings.registration_attempts.max(1);
    for attempt in 1..=attempts {
        match ctx
            .compute()
            .find_hypervisor(&ctx.request, &resource.name)
            .await
        {
            Ok(Some(hypervisor)) => {
                info!(resource = %resource.id, hypervisor = %hypervisor.id, attempt, "hypervisor registered");
                ctx.store()
                    .set_property(resource.id, keys::HYPERVISOR_ID, hypervisor.id)?;
                return Ok(());
            }
            Ok(None) => debug!(resource = %resource.id, attempt, "hypervisor not registered yet"),
            Err(err) => warn!(resource = %resource.id, attempt, error = %err, "compute lookup failed"),
        }
        if attempt < attempts {
            sleep(settings.registration_interval).await;
        }
    }
    Err(LifecycleError::failed(
        Operation::Activation,
        format!(
            "hypervisor {} did not register with compute after {attempts} lookups",
            resource.name
        ),
    ))
}

/// Refuses to deactivate a hypervisor that still runs instances.
pub(crate) async fn refuse_busy(
    ctx: &DriverContext,
    resource: &Resource,
) -> Result<(), LifecycleError> {
    let Some(id) = resource.property(keys::HYPERVISOR_ID) else {
        return Ok(());
    };
    let hypervisor = ctx
        .compute()
        .hypervisor(&ctx.request, id)
        .await
        .map_err(LifecycleError::during(Operation::Deactivation))?;
    if hypervisor.running_vms > 0 {
        return Err(LifecycleError::failed(
            Operation::Deactivation,
            format!(
                "{} still runs {} instances; migrate them or force the deactivation",
                resource.name, hypervisor.running_vms
            ),
        ));
    }
    Ok(())
}

/// Removes the host's server entry, stopping its services first when asked.
pub(crate) async fn deactivate(
    ctx: &DriverContext,
    resource: &Resource,
    request: &DeactivationRequest,
) -> Result<(), LifecycleError> {
    let Some(server) = resource.property(keys::SERVER_ID) else {
        debug!(resource = %resource.id, "no server entry to remove");
        return Ok(());
    };
    let stop = request
        .run_playbook
        .then(|| (STOP_SERVICES, PlaybookRun::limited_to(server)));
    model::withdraw(
        ctx,
        &ModelChange::RemoveServer(server.to_owned()),
        stop,
        Operation::Deactivation,
    )
    .await
}

/// Deletes the compute service registration, logging failures.
pub(crate) async fn forget_service(ctx: &DriverContext, resource: &Resource) {
    if let Err(err) = ctx
        .compute()
        .delete_service(&ctx.request, &resource.name)
        .await
    {
        warn!(resource = %resource.id, error = %err, "failed to delete compute service");
    }
}

/// Removes a leftover server entry before the record is deleted.
pub(crate) async fn delete(ctx: &DriverContext, resource: &Resource) -> Result<(), LifecycleError> {
    let Some(server) = resource.property(keys::SERVER_ID) else {
        return Ok(());
    };
    model::withdraw(
        ctx,
        &ModelChange::RemoveServer(server.to_owned()),
        None,
        Operation::Delete,
    )
    .await
}

/// Pushes a changed address of an activated host to its server entry.
pub(crate) async fn update_activated(
    ctx: &DriverContext,
    current: &Resource,
    updated: &Resource,
) -> Result<(), LifecycleError> {
    if current.address == updated.address {
        return Ok(());
    }
    let Some(server) = current.property(keys::SERVER_ID) else {
        return Ok(());
    };
    model::update_server_address(ctx, server, &updated.address).await
}

/// Server entry and hypervisor details of a host.
pub(crate) async fn inventory(
    ctx: &DriverContext,
    resource: &Resource,
) -> Result<Value, LifecycleError> {
    let hypervisor = match resource.property(keys::HYPERVISOR_ID) {
        Some(id) => {
            let found = ctx
                .compute()
                .hypervisor(&ctx.request, id)
                .await
                .map_err(LifecycleError::during(Operation::Update))?;
            json!({ "id": found.id, "running_vms": found.running_vms })
        }
        None => Value::Null,
    };
    Ok(json!({
        "server_id": resource.property(keys::SERVER_ID),
        "hypervisor": hypervisor,
    }))
}
