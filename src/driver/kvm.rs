//! Driver for Linux KVM hypervisor hosts.
//!
//! Hosts are reached over SSH. Pre-activation checks run on the host itself:
//! the operating system must be supported, no virtual machines may exist,
//! and the clock must be close to ours. All three block activation.

use serde_json::Value;

use crate::lifecycle::{ActivationRequest, DeactivationRequest, LifecycleError, Operation};
use crate::model::{NewResource, Resource, ResourceKind, ResourceState, keys};
use crate::remote::ShellFlavor;

use super::host::{self, Severity};
use super::{Driver, DriverContext, DriverFuture, pick_properties};

/// Prints the host's `os-release` record.
pub const OS_RELEASE: &str = "cat /etc/os-release";
/// Lists every defined libvirt domain, one name per line.
pub const LIST_VMS: &str = "virsh list --all --name";
/// Prints the host clock in seconds since the epoch.
pub const CLOCK: &str = "date +%s";

const SUPPORTED_OS: [&str; 3] = ["rhel", "centos", "sles"];
pub(crate) const DEFAULT_ROLE: &str = "KVM-COMPUTE-ROLE";

/// Lifecycle driver for [`ResourceKind::LinuxKvmHost`].
#[derive(Clone, Copy, Debug, Default)]
pub struct KvmDriver;

fn os_id(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        line.trim()
            .strip_prefix("ID=")
            .map(|value| value.trim_matches(|ch| ch == '"' || ch == '\'').to_ascii_lowercase())
    })
}

async fn check_host(ctx: &DriverContext, resource: &Resource) -> Result<(), LifecycleError> {
    let shell = host::open_shell(ctx, resource, ShellFlavor::Posix, Operation::Activation).await?;
    let outcome = async {
        let release = shell
            .run(OS_RELEASE)
            .await
            .map_err(LifecycleError::during(Operation::Activation))?;
        match os_id(&release) {
            Some(id) if SUPPORTED_OS.contains(&id.as_str()) => {}
            other => host::enforce(
                Severity::Block,
                resource,
                format!(
                    "{} runs an unsupported operating system ({})",
                    resource.name,
                    other.as_deref().unwrap_or("unknown")
                ),
            )?,
        }

        let domains = shell
            .run(LIST_VMS)
            .await
            .map_err(LifecycleError::during(Operation::Activation))?;
        let count = domains.lines().filter(|line| !line.trim().is_empty()).count();
        if count > 0 {
            host::enforce(
                Severity::Block,
                resource,
                format!("{} already hosts {count} virtual machines", resource.name),
            )?;
        }

        let clock = shell
            .run(CLOCK)
            .await
            .map_err(LifecycleError::during(Operation::Activation))?;
        if let Some(message) = host::clock_skew_message(ctx, resource, &clock) {
            host::enforce(Severity::Block, resource, message)?;
        }
        Ok::<(), LifecycleError>(())
    }
    .await;
    host::close(shell.as_ref()).await;
    outcome
}

impl Driver for KvmDriver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::LinuxKvmHost
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
            ShellFlavor::Posix,
            self.initial_state(),
        ))
    }

    fn validate_update<'a>(
        &'a self,
        ctx: &'a DriverContext,
        current: &'a Resource,
        proposed: &'a Resource,
    ) -> DriverFuture<'a, ()> {
        Box::pin(host::validate_update(ctx, current, proposed, ShellFlavor::Posix))
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
