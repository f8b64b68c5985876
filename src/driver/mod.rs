//! Kind-specific lifecycle drivers.
//!
//! Every [`ResourceKind`] has exactly one stateless driver implementing
//! [`Driver`]. The orchestrator owns state transitions and persistence; a
//! driver only talks to collaborators (the facade, remote shells, the
//! compute service, and manager inventory) and reports success or failure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::compute::ComputeApi;
use crate::concurrency::ModelLock;
use crate::config::ComputeConfig;
use crate::context::RequestContext;
use crate::facade::FacadeClient;
use crate::inventory::ClusterInventory;
use crate::lifecycle::{
    ActivationRequest, DeactivationRequest, HostCommissionRequest, LifecycleError,
    ProvisionRequest, Verb,
};
use crate::model::{NewResource, Resource, ResourceKind, ResourceState};
use crate::remote::ShellConnector;
use crate::store::MemoryStore;

pub mod baremetal;
pub mod cluster;
mod host;
pub mod hyperv;
pub mod kvm;
pub mod model;

pub use baremetal::BareMetalDriver;
pub use cluster::ClusterDriver;
pub use hyperv::HypervDriver;
pub use kvm::KvmDriver;

/// Future returned by driver operations.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LifecycleError>> + Send + 'a>>;

/// Timing knobs for host drivers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DriverSettings {
    /// Compute registration lookups before giving up.
    pub registration_attempts: u32,
    /// Sleep between registration lookups.
    pub registration_interval: Duration,
    /// Largest tolerated difference between a host clock and ours.
    pub max_clock_skew: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            registration_attempts: 30,
            registration_interval: Duration::from_secs(10),
            max_clock_skew: Duration::from_secs(60),
        }
    }
}

impl From<&ComputeConfig> for DriverSettings {
    fn from(config: &ComputeConfig) -> Self {
        Self {
            registration_attempts: config.registration_attempts,
            registration_interval: config.registration_interval(),
            max_clock_skew: Duration::from_secs(config.max_clock_skew_secs),
        }
    }
}

/// Long-lived collaborators shared by every request.
pub struct Collaborators {
    /// Resource and manager records.
    pub store: Arc<MemoryStore>,
    /// Remote configuration service.
    pub facade: FacadeClient,
    /// Remote shell factory.
    pub shells: Arc<dyn ShellConnector>,
    /// Compute service.
    pub compute: Arc<dyn ComputeApi>,
    /// Manager inventory reader.
    pub inventory: Arc<dyn ClusterInventory>,
    /// Lock guarding input-model mutation.
    pub lock: ModelLock,
    /// Host driver timings.
    pub settings: DriverSettings,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("facade", &self.facade)
            .field("lock", &self.lock)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Request context plus collaborators, handed to every driver call.
#[derive(Clone, Debug)]
pub struct DriverContext {
    /// Caller identity and correlation id.
    pub request: RequestContext,
    deps: Arc<Collaborators>,
}

impl DriverContext {
    /// Binds `request` to the shared collaborators.
    #[must_use]
    pub const fn new(request: RequestContext, deps: Arc<Collaborators>) -> Self {
        Self { request, deps }
    }

    /// Facade client.
    #[must_use]
    pub fn facade(&self) -> &FacadeClient {
        &self.deps.facade
    }

    /// Remote shell factory.
    #[must_use]
    pub fn shells(&self) -> &dyn ShellConnector {
        self.deps.shells.as_ref()
    }

    /// Compute service.
    #[must_use]
    pub fn compute(&self) -> &dyn ComputeApi {
        self.deps.compute.as_ref()
    }

    /// Manager inventory.
    #[must_use]
    pub fn inventory(&self) -> &dyn ClusterInventory {
        self.deps.inventory.as_ref()
    }

    /// Record store.
    #[must_use]
    pub fn store(&self) -> &MemoryStore {
        &self.deps.store
    }

    /// Input-model lock.
    #[must_use]
    pub fn lock(&self) -> &ModelLock {
        &self.deps.lock
    }

    /// Host driver timings.
    #[must_use]
    pub fn settings(&self) -> DriverSettings {
        self.deps.settings
    }
}

/// Lifecycle capabilities of one resource kind.
///
/// Operations a kind does not support keep their default body, which fails
/// with [`LifecycleError::Unsupported`]. Drivers never change a resource's
/// state; they may persist bookkeeping properties through
/// [`DriverContext::store`].
pub trait Driver: Send + Sync {
    /// Kind served by this driver.
    fn kind(&self) -> ResourceKind;

    /// State a newly created resource starts in.
    fn initial_state(&self) -> ResourceState;

    /// States a resource may be deleted from.
    fn deletable_states(&self) -> &'static [ResourceState];

    /// Property keys recording workflow progress, cleared on deactivation.
    fn bookkeeping_keys(&self) -> &'static [&'static str];

    /// Validates create input, possibly contacting the target, and injects
    /// the initial state.
    fn validate_create<'a>(
        &'a self,
        ctx: &'a DriverContext,
        data: NewResource,
    ) -> DriverFuture<'a, NewResource>;

    /// Validates an update; connectivity is re-checked only when the
    /// connection fields change.
    fn validate_update<'a>(
        &'a self,
        ctx: &'a DriverContext,
        current: &'a Resource,
        proposed: &'a Resource,
    ) -> DriverFuture<'a, ()>;

    /// Rejects deletion outside [`Driver::deletable_states`].
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`].
    fn validate_delete(&self, current: &Resource) -> Result<(), LifecycleError> {
        let allowed = self.deletable_states();
        if allowed.contains(&current.state) {
            return Ok(());
        }
        Err(LifecycleError::InvalidState {
            id: current.id,
            state: current.state,
            verb: Verb::Delete,
            allowed: allowed.to_vec(),
        })
    }

    /// Picks the create input fields persisted as properties.
    fn get_properties(&self, data: &NewResource) -> Vec<(String, String)>;

    /// Runs blocking and advisory checks before activation is accepted.
    fn pre_activation_steps<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        _resource: &'a Resource,
        _request: &'a ActivationRequest,
    ) -> DriverFuture<'a, ()> {
        unsupported(self.kind(), Verb::Activate)
    }

    /// Deploys the resource, rolling its model changes back on failure.
    fn activate<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        _resource: &'a Resource,
        _request: &'a ActivationRequest,
    ) -> DriverFuture<'a, ()> {
        unsupported(self.kind(), Verb::Activate)
    }

    /// Work after the deployment playbooks succeeded.
    fn post_activation_steps<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        _resource: &'a Resource,
        _request: &'a ActivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Blocking checks before a deactivation is accepted.
    fn pre_deactivation_steps<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        _resource: &'a Resource,
        _request: &'a DeactivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Withdraws the resource from the input model.
    fn deactivate<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        _resource: &'a Resource,
        _request: &'a DeactivationRequest,
    ) -> DriverFuture<'a, ()> {
        unsupported(self.kind(), Verb::Deactivate)
    }

    /// Cleanup after a deactivation.
    fn post_deactivation_steps<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        _resource: &'a Resource,
        _request: &'a DeactivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Removes whatever the resource left behind remotely before its record
    /// is deleted.
    fn delete<'a>(&'a self, _ctx: &'a DriverContext, _resource: &'a Resource) -> DriverFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Installs an operating system.
    fn provision<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        _resource: &'a Resource,
        _request: &'a ProvisionRequest,
    ) -> DriverFuture<'a, ()> {
        unsupported(self.kind(), Verb::Provision)
    }

    /// Checks before a host commission is accepted.
    fn pre_host_commission_steps<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        _resource: &'a Resource,
        _request: &'a HostCommissionRequest,
    ) -> DriverFuture<'a, ()> {
        unsupported(self.kind(), Verb::HostCommission)
    }

    /// Commissions hosts that joined an activated cluster.
    fn host_commission<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        _resource: &'a Resource,
        _request: &'a HostCommissionRequest,
    ) -> DriverFuture<'a, ()> {
        unsupported(self.kind(), Verb::HostCommission)
    }

    /// Pushes changed connection fields of an activated resource to the
    /// input model.
    fn update_activated<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        _current: &'a Resource,
        _updated: &'a Resource,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Reads a kind-specific inventory snapshot.
    fn get_inventory<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
    ) -> DriverFuture<'a, Value>;
}

fn unsupported<'a>(kind: ResourceKind, verb: Verb) -> DriverFuture<'a, ()> {
    Box::pin(async move { Err(LifecycleError::Unsupported { kind, verb }) })
}

/// Maps each kind to its driver.
#[derive(Clone, Copy, Debug, Default)]
pub struct DriverRegistry {
    cluster: ClusterDriver,
    kvm: KvmDriver,
    hyperv: HypervDriver,
    baremetal: BareMetalDriver,
}

impl DriverRegistry {
    /// Creates the registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cluster: ClusterDriver,
            kvm: KvmDriver,
            hyperv: HypervDriver,
            baremetal: BareMetalDriver,
        }
    }

    /// Returns the driver for `kind`.
    #[must_use]
    pub fn driver(&self, kind: ResourceKind) -> &dyn Driver {
        match kind {
            ResourceKind::Cluster => &self.cluster,
            ResourceKind::LinuxKvmHost => &self.kvm,
            ResourceKind::WindowsHypervisorHost => &self.hyperv,
            ResourceKind::BareMetalNode => &self.baremetal,
        }
    }
}

/// Copies the listed keys present in `data` into property pairs.
pub(crate) fn pick_properties(data: &NewResource, keys: &[&str]) -> Vec<(String, String)> {
    keys.iter()
        .filter_map(|key| {
            data.properties
                .get(*key)
                .map(|value| ((*key).to_owned(), value.trim().to_owned()))
        })
        .filter(|(_, value)| !value.is_empty())
        .collect()
}

#[cfg(test)]
mod tests;
