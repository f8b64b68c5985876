//! Driver for Windows Hyper-V hosts.
//!
//! Hosts are reached over a PowerShell session. An unsupported operating
//! system or a missing Hyper-V role blocks activation; existing virtual
//! machines and clock skew are only reported.

use serde_json::Value;

use crate::lifecycle::{ActivationRequest, DeactivationRequest, LifecycleError, Operation};
use crate::model::{NewResource, Resource, ResourceKind, ResourceState, keys};
use crate::remote::{RemoteShell, ShellFlavor};

use super::host::{self, Severity};
use super::{Driver, DriverContext, DriverFuture, pick_properties};

/// Prints the operating system caption.
pub const OS_CAPTION: &str = "(Get-CimInstance Win32_OperatingSystem).Caption";
/// Prints `True` when the Hyper-V role is installed.
pub const HYPERV_ROLE: &str = "(Get-WindowsFeature -Name Hyper-V).Installed";
/// Prints the number of virtual machines on the host.
pub const VM_COUNT: &str = "(Get-VM | Measure-Object).Count";
/// Prints the host clock in seconds since the epoch.
pub const CLOCK: &str = "[DateTimeOffset]::UtcNow.ToUnixTimeSeconds()";

const SUPPORTED_EDITIONS: [&str; 2] = ["Windows Server", "Hyper-V Server"];
pub(crate) const DEFAULT_ROLE: &str = "HYPERV-COMPUTE-ROLE";

/// Lifecycle driver for [`ResourceKind::WindowsHypervisorHost`].
#[derive(Clone, Copy, Debug, Default)]
pub struct HypervDriver;

async fn query(shell: &dyn RemoteShell, command: &str) -> Result<String, LifecycleError> {
    shell
        .run(command)
        .await
        .map_err(LifecycleError::during(Operation::Activation))
}

async fn check_host(ctx: &DriverContext, resource: &Resource) -> Result<(), LifecycleError> {
    let shell =
        host::open_shell(ctx, resource, ShellFlavor::PowerShell, Operation::Activation).await?;
    let outcome = async {
        let caption = query(shell.as_ref(), OS_CAPTION).await?;
        if !SUPPORTED_EDITIONS
            .iter()
            .any(|edition| caption.contains(edition))
        {
            host::enforce(
                Severity::Block,
                resource,
                format!("{} runs an unsupported edition ({caption})", resource.name),
            )?;
        }

        let role = query(shell.as_ref(), HYPERV_ROLE).await?;
        if !role.trim().eq_ignore_ascii_case("true") {
            host::enforce(
                Severity::Block,
                resource,
                format!("{} does not have the Hyper-V role installed", resource.name),
            )?;
        }

        let vms = query(shell.as_ref(), VM_COUNT).await?;
        if !matches!(vms.trim().parse::<u32>(), Ok(0)) {
            host::enforce(
                Severity::Warn,
                resource,
                format!("{} reports {} existing virtual machines", resource.name, vms.trim()),
            )?;
        }

        let clock = query(shell.as_ref(), CLOCK).await?;
        if let Some(message) = host::clock_skew_message(ctx, resource, &clock) {
            host::enforce(Severity::Warn, resource, message)?;
        }
        Ok::<(), LifecycleError>(())
    }
    .await;
    host::close(shell.as_ref()).await;
    outcome
}

impl Driver for HypervDriver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::WindowsHypervisorHost
    }

    fn initial_state(&self) -> ResourceState {
        ResourceState::Provisioned
    }

    fn deletable_states(&self) -> &'static [ResourceState] {
        &[
            ResourceState::Imported,
            ResourceState::Removed,
            ResourceState::Provisioned,
        ]
    }

    fn bookkeeping_keys(&self) -> &'static [&'static str] {
        &[keys::SERVER_ID, keys::HYPERVISOR_ID, keys::ACTIVATED_FROM]
    }

    fn validate_create<'a>(
        &'a self,
        ctx: &'a DriverContext,
        data: NewResource,
    ) -> DriverFuture<'a, NewResource> {
        Box::pin(host::validate_create(
            ctx,
            data,
            ShellFlavor::PowerShell,
            self.initial_state(),
        ))
    }

    fn validate_update<'a>(
        &'a self,
        ctx: &'a DriverContext,
        current: &'a Resource,
        proposed: &'a Resource,
    ) -> DriverFuture<'a, ()> {
        Box::pin(host::validate_update(
            ctx,
            current,
            proposed,
            ShellFlavor::PowerShell,
        ))
    }

    fn get_properties(&self, data: &NewResource) -> Vec<(String, String)> {
        pick_properties(
            data,
            &[
                keys::SERVER_GROUP,
                keys::SERVER_ROLE,
                keys::NIC_MAPPING,
                keys::OS_VERSION,
            ],
        )
    }

    fn pre_activation_steps<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
        _request: &'a ActivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(check_host(ctx, resource))
    }

    fn activate<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
        request: &'a ActivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(host::activate(self, ctx, resource, request, DEFAULT_ROLE))
    }

    fn post_activation_steps<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
        _request: &'a ActivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(host::await_registration(ctx, resource))
    }

    fn pre_deactivation_steps<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
        _request: &'a DeactivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(host::refuse_busy(ctx, resource))
    }

    fn deactivate<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
        request: &'a DeactivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(host::deactivate(ctx, resource, request))
    }

    fn post_deactivation_steps<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
        _request: &'a DeactivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            host::forget_service(ctx, resource).await;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, ctx: &'a DriverContext, resource: &'a Resource) -> DriverFuture<'a, ()> {
        Box::pin(host::delete(ctx, resource))
    }

    fn update_activated<'a>(
        &'a self,
        ctx: &'a DriverContext,
        current: &'a Resource,
        updated: &'a Resource,
    ) -> DriverFuture<'a, ()> {
        Box::pin(host::update_activated(ctx, current, updated))
    }

    fn get_inventory<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
    ) -> DriverFuture<'a, Value> {
        Box::pin(host::inventory(ctx, resource))
    }
}
