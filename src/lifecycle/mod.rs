//! Resource lifecycle orchestration.
//!
//! Lifecycle verbs run in two phases. Phase one runs on the caller's task:
//! it loads the resource, checks the verb's precondition states, runs the
//! driver's pre-step, and records the intermediate state with a
//! compare-and-set. Phase two runs as a detached task: it moves the resource
//! to the running state, runs the driver workflow, and records either the
//! success state or the rollback state. Phase-two errors never reach the
//! caller; they are logged and published as [`LifecycleEvent`]s.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::context::RequestContext;
use crate::driver::{Collaborators, Driver, DriverContext, DriverRegistry};
use crate::concurrency::BackgroundTasks;
use crate::model::{
    NewResource, Property, Resource, ResourceId, ResourceKind, ResourceState, ResourceUpdate,
    ResourceView, keys,
};
use crate::store::{MemoryStore, ResourceFilter};

mod error;
mod manager;
mod transitions;

pub use error::{Failure, LifecycleError, Operation};
pub use transitions::{Transition, UPDATABLE, Verb, deactivated_state};

use transitions::{ACTIVATE, DEACTIVATE, HOST_COMMISSION, PROVISION};

const EVENT_CAPACITY: usize = 64;

const fn run_playbook_default() -> bool {
    true
}

/// Options of an activation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ActivationRequest {
    /// Runs the site playbook after the deployment is prepared.
    #[serde(default = "run_playbook_default")]
    pub run_playbook: bool,
    /// Network configuration of a cluster.
    #[serde(default)]
    pub network_config: Option<Value>,
    /// Input-model server group, overriding the stored property.
    #[serde(default)]
    pub server_group: Option<String>,
    /// Input-model server role, overriding the stored property.
    #[serde(default)]
    pub server_role: Option<String>,
    /// Input-model NIC mapping, overriding the stored property.
    #[serde(default)]
    pub nic_mapping: Option<String>,
}

impl Default for ActivationRequest {
    fn default() -> Self {
        Self {
            run_playbook: true,
            network_config: None,
            server_group: None,
            server_role: None,
            nic_mapping: None,
        }
    }
}

/// Options of a deactivation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeactivationRequest {
    /// Skips the precondition check and the pre-step, and always clears
    /// bookkeeping properties.
    #[serde(default)]
    pub forced: bool,
    /// Stops services on the resource before it leaves the input model.
    #[serde(default = "run_playbook_default")]
    pub run_playbook: bool,
}

impl Default for DeactivationRequest {
    fn default() -> Self {
        Self {
            forced: false,
            run_playbook: true,
        }
    }
}

/// Options of a provision.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProvisionRequest {
    /// Hypervisor kind the node becomes.
    pub target_kind: ResourceKind,
    /// Operating system to install; the install server's default otherwise.
    #[serde(default)]
    pub os_version: Option<String>,
}

/// Options of a host commission.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HostCommissionRequest {
    /// Runs the site playbook on the new hosts.
    #[serde(default = "run_playbook_default")]
    pub run_playbook: bool,
}

impl Default for HostCommissionRequest {
    fn default() -> Self {
        Self { run_playbook: true }
    }
}

/// How a background workflow ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The workflow reached its success state.
    Succeeded,
    /// The workflow failed and the resource was rolled back.
    Failed {
        /// Cause of the failure.
        message: String,
    },
}

/// Published when a background workflow finishes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LifecycleEvent {
    /// Resource the workflow ran on.
    pub resource_id: ResourceId,
    /// Verb that started the workflow.
    pub verb: Verb,
    /// Result of the workflow.
    pub outcome: Outcome,
    /// State recorded afterwards.
    pub state: ResourceState,
}

/// A resource with its optional driver inventory.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceDetail {
    /// Stored fields.
    #[serde(flatten)]
    pub resource: ResourceView,
    /// Kind-specific inventory, when requested and readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Value>,
}

struct Inner {
    deps: Arc<Collaborators>,
    registry: DriverRegistry,
    tasks: BackgroundTasks,
    events: broadcast::Sender<LifecycleEvent>,
}

/// Entry point for every resource and resource manager operation.
///
/// Clones share the same collaborators, background tasks, and event channel.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("deps", &self.inner.deps)
            .field("in_flight", &self.inner.tasks.in_flight())
            .finish_non_exhaustive()
    }
}

fn require_state(
    resource: &Resource,
    verb: Verb,
    allowed: &[ResourceState],
) -> Result<(), LifecycleError> {
    if allowed.contains(&resource.state) {
        return Ok(());
    }
    Err(LifecycleError::InvalidState {
        id: resource.id,
        state: resource.state,
        verb,
        allowed: allowed.to_vec(),
    })
}

fn require_field(value: &str, field: &str) -> Result<(), LifecycleError> {
    if value.trim().is_empty() {
        return Err(LifecycleError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Reports why `candidate` cannot coexist with `existing`.
fn collision(existing: &Resource, candidate: &Resource) -> Option<String> {
    if existing.id == candidate.id {
        return None;
    }
    if existing.kind.is_comparable_to(candidate.kind) && existing.name == candidate.name {
        return Some(format!(
            "a {} named {} already exists",
            existing.kind, existing.name
        ));
    }
    if existing.kind.is_host() && candidate.kind.is_host() && existing.address == candidate.address
    {
        return Some(format!(
            "address {} already belongs to {}",
            existing.address, existing.name
        ));
    }
    None
}

fn strip(resource: &mut Resource, names: &[&str]) {
    for key in names {
        resource.remove_property(key);
    }
}

impl Orchestrator {
    /// Builds an orchestrator over `deps`.
    #[must_use]
    pub fn new(deps: Collaborators) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                deps: Arc::new(deps),
                registry: DriverRegistry::new(),
                tasks: BackgroundTasks::new(),
                events,
            }),
        }
    }

    /// Subscribes to workflow completions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Number of background workflows still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.in_flight()
    }

    /// Waits for every background workflow to finish.
    pub async fn drain(&self) {
        self.inner.tasks.drain().await;
    }

    fn store(&self) -> &MemoryStore {
        &self.inner.deps.store
    }

    fn driver(&self, kind: ResourceKind) -> &dyn Driver {
        self.inner.registry.driver(kind)
    }

    pub(crate) fn driver_context(&self, ctx: &RequestContext) -> DriverContext {
        DriverContext::new(ctx.clone(), Arc::clone(&self.inner.deps))
    }

    /// Registers a resource.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Validation`] for incomplete input,
    /// [`LifecycleError::Conflict`] when the name or host address is taken,
    /// and a create failure when the driver cannot reach the target.
    pub async fn create_resource(
        &self,
        ctx: &RequestContext,
        data: NewResource,
    ) -> Result<ResourceView, LifecycleError> {
        require_field(&data.name, "name")?;
        require_field(&data.address, "address")?;
        let input = NewResource {
            name: data.name.trim().to_owned(),
            address: data.address.trim().to_owned(),
            username: data.username.trim().to_owned(),
            state: None,
            ..data
        };
        let candidate = Resource {
            id: ResourceId::generate(),
            name: input.name.clone(),
            kind: input.kind,
            state: ResourceState::Imported,
            address: input.address.clone(),
            username: input.username.clone(),
            password: input.password.clone(),
            port: input.port,
            resource_manager_id: input.resource_manager_id,
            properties: Vec::new(),
        };
        self.ensure_unique(&candidate)?;

        let driver = self.driver(input.kind);
        let validated = driver
            .validate_create(&self.driver_context(ctx), input)
            .await?;
        let properties = driver
            .get_properties(&validated)
            .into_iter()
            .map(|(key, value)| Property::new(key, value))
            .collect();
        let resource = Resource {
            state: validated.state.unwrap_or_else(|| driver.initial_state()),
            properties,
            ..candidate
        };
        let created = self.insert(resource)?;
        info!(
            request = %ctx.request_id,
            resource = %created.id,
            kind = %created.kind,
            state = %created.state,
            "resource created"
        );
        Ok(created.view())
    }

    fn ensure_unique(&self, candidate: &Resource) -> Result<(), LifecycleError> {
        let existing = self.store().list_resources(&ResourceFilter::default())?;
        match existing.iter().find_map(|resource| collision(resource, candidate)) {
            Some(reason) => Err(LifecycleError::Conflict(reason)),
            None => Ok(()),
        }
    }

    fn insert(&self, resource: Resource) -> Result<Resource, LifecycleError> {
        let mut session = self.store().session("create-resource")?;
        if let Some(reason) = session
            .resources()
            .find_map(|existing| collision(existing, &resource))
        {
            return Err(LifecycleError::Conflict(reason));
        }
        session.put_resource(resource.clone());
        session.commit();
        Ok(resource)
    }

    /// Changes a resource's name, address, credentials, or port.
    ///
    /// An activated host's new address is pushed to the input model before
    /// the record is saved.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] outside [`UPDATABLE`],
    /// [`LifecycleError::Conflict`] for taken names, and an update failure
    /// when the target or the input model rejects the change.
    pub async fn update_resource(
        &self,
        ctx: &RequestContext,
        id: ResourceId,
        update: &ResourceUpdate,
    ) -> Result<ResourceView, LifecycleError> {
        let current = self.store().get_resource(id)?;
        require_state(&current, Verb::Update, UPDATABLE)?;
        let proposed = update.apply_to(&current);
        require_field(&proposed.name, "name")?;
        require_field(&proposed.address, "address")?;
        self.ensure_unique(&proposed)?;

        let driver = self.driver(current.kind);
        let dctx = self.driver_context(ctx);
        driver.validate_update(&dctx, &current, &proposed).await?;
        if current.state == ResourceState::Activated && current.address != proposed.address {
            driver.update_activated(&dctx, &current, &proposed).await?;
        }

        let saved = self.transition(
            "update-resource",
            id,
            &[current.state],
            current.state,
            Verb::Update,
            |resource| {
                resource.name.clone_from(&proposed.name);
                resource.address.clone_from(&proposed.address);
                resource.username.clone_from(&proposed.username);
                resource.password = proposed.password.clone();
                resource.port = proposed.port;
            },
        )?;
        info!(request = %ctx.request_id, resource = %id, "resource updated");
        Ok(saved.view())
    }

    /// Deletes a resource after the driver removed what it left behind.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] outside the kind's deletable
    /// states and a delete failure, with the state restored, when the
    /// driver cleanup fails.
    pub async fn delete_resource(
        &self,
        ctx: &RequestContext,
        id: ResourceId,
    ) -> Result<(), LifecycleError> {
        let current = self.store().get_resource(id)?;
        let driver = self.driver(current.kind);
        driver.validate_delete(&current)?;
        let removing = self.transition(
            "delete-resource",
            id,
            &[current.state],
            ResourceState::Removing,
            Verb::Delete,
            |_| {},
        )?;

        if let Err(err) = driver.delete(&self.driver_context(ctx), &removing).await {
            warn!(resource = %id, error = %err, "delete cleanup failed; restoring state");
            if let Err(restore) = self.transition(
                "delete-rollback",
                id,
                &[ResourceState::Removing],
                current.state,
                Verb::Delete,
                |_| {},
            ) {
                warn!(resource = %id, error = %restore, "failed to restore state");
            }
            return Err(err);
        }

        let mut session = self.store().session("delete-resource")?;
        session.remove_resource(id)?;
        session.commit();
        info!(request = %ctx.request_id, resource = %id, "resource deleted");
        Ok(())
    }

    /// Reads one resource, attaching the driver inventory when asked.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] for unknown ids. Inventory
    /// failures are logged and leave `inventory` empty.
    pub async fn get_resource(
        &self,
        ctx: &RequestContext,
        id: ResourceId,
        with_inventory: bool,
    ) -> Result<ResourceDetail, LifecycleError> {
        let resource = self.store().get_resource(id)?;
        let inventory = if with_inventory {
            match self
                .driver(resource.kind)
                .get_inventory(&self.driver_context(ctx), &resource)
                .await
            {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(resource = %id, error = %err, "inventory unavailable");
                    None
                }
            }
        } else {
            None
        };
        Ok(ResourceDetail {
            resource: resource.view(),
            inventory,
        })
    }

    /// Lists resources matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Store`] when the store is unusable.
    pub fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<ResourceView>, LifecycleError> {
        Ok(self
            .store()
            .list_resources(filter)?
            .iter()
            .map(Resource::view)
            .collect())
    }

    /// Starts an activation and returns the resource in
    /// `activation-initiated`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] outside the activation
    /// preconditions and whatever the driver's blocking checks raise.
    pub async fn activate(
        &self,
        ctx: &RequestContext,
        id: ResourceId,
        request: ActivationRequest,
    ) -> Result<ResourceView, LifecycleError> {
        let current = self.store().get_resource(id)?;
        require_state(&current, Verb::Activate, ACTIVATE.preconditions)?;
        let dctx = self.driver_context(ctx);
        self.driver(current.kind)
            .pre_activation_steps(&dctx, &current, &request)
            .await?;

        let previous = current.state;
        let initiated = self.transition(
            "activate",
            id,
            &[previous],
            ACTIVATE.initiated,
            Verb::Activate,
            |resource| resource.set_property(keys::ACTIVATED_FROM, previous.as_str()),
        )?;
        let this = self.clone();
        self.inner.tasks.spawn(format!("activate {id}"), async move {
            this.run_activation(&dctx, id, previous, &request).await;
        });
        Ok(initiated.view())
    }

    async fn run_activation(
        &self,
        ctx: &DriverContext,
        id: ResourceId,
        previous: ResourceState,
        request: &ActivationRequest,
    ) {
        let Some(resource) = self.begin(id, Verb::Activate, ACTIVATE) else {
            return;
        };
        let driver = self.driver(resource.kind);
        match driver.activate(ctx, &resource, request).await {
            Ok(()) => self.land(
                id,
                Verb::Activate,
                ACTIVATE.running,
                ResourceState::Activated,
                |_| {},
                Ok(()),
            ),
            Err(err) => {
                let bookkeeping = driver.bookkeeping_keys();
                self.land(
                    id,
                    Verb::Activate,
                    ACTIVATE.running,
                    previous,
                    |record| strip(record, bookkeeping),
                    Err(err),
                );
            }
        }
    }

    /// Starts a deactivation and returns the resource in `deactivating`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] outside the deactivation
    /// preconditions and whatever the driver's blocking checks raise. A
    /// forced deactivation skips both.
    pub async fn deactivate(
        &self,
        ctx: &RequestContext,
        id: ResourceId,
        request: DeactivationRequest,
    ) -> Result<ResourceView, LifecycleError> {
        let current = self.store().get_resource(id)?;
        let dctx = self.driver_context(ctx);
        if request.forced {
            warn!(resource = %id, state = %current.state, "forced deactivation");
        } else {
            require_state(&current, Verb::Deactivate, DEACTIVATE.preconditions)?;
            self.driver(current.kind)
                .pre_deactivation_steps(&dctx, &current, &request)
                .await?;
        }

        let previous = current.state;
        let initiated = self.transition(
            "deactivate",
            id,
            &[previous],
            DEACTIVATE.initiated,
            Verb::Deactivate,
            |_| {},
        )?;
        let this = self.clone();
        self.inner.tasks.spawn(format!("deactivate {id}"), async move {
            this.run_deactivation(&dctx, id, previous, request).await;
        });
        Ok(initiated.view())
    }

    async fn run_deactivation(
        &self,
        ctx: &DriverContext,
        id: ResourceId,
        previous: ResourceState,
        request: DeactivationRequest,
    ) {
        let Some(resource) = self.begin(id, Verb::Deactivate, DEACTIVATE) else {
            return;
        };
        let driver = self.driver(resource.kind);
        let result = match driver.deactivate(ctx, &resource, &request).await {
            Ok(()) => {
                driver
                    .post_deactivation_steps(ctx, &resource, &request)
                    .await
            }
            Err(err) => Err(err),
        };
        let bookkeeping = driver.bookkeeping_keys();
        if result.is_ok() {
            let activated_from = resource
                .property(keys::ACTIVATED_FROM)
                .and_then(|value| value.parse().ok());
            let landed = deactivated_state(previous, activated_from, driver.initial_state());
            self.land(
                id,
                Verb::Deactivate,
                DEACTIVATE.running,
                landed,
                |record| strip(record, bookkeeping),
                result,
            );
            return;
        }
        let rollback = if previous.is_stable() {
            previous
        } else {
            ResourceState::Activated
        };
        let forced = request.forced;
        self.land(
            id,
            Verb::Deactivate,
            DEACTIVATE.running,
            rollback,
            |record| {
                if forced {
                    strip(record, bookkeeping);
                }
            },
            result,
        );
    }

    /// Starts provisioning a bare-metal node and returns it in
    /// `provision-initiated`, already carrying its target kind.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Unsupported`] for other kinds,
    /// [`LifecycleError::InvalidState`] outside `imported`, and
    /// [`LifecycleError::Validation`] for a target that is not a hypervisor
    /// host kind.
    pub fn provision(
        &self,
        ctx: &RequestContext,
        id: ResourceId,
        request: ProvisionRequest,
    ) -> Result<ResourceView, LifecycleError> {
        let current = self.store().get_resource(id)?;
        if current.kind != ResourceKind::BareMetalNode {
            return Err(LifecycleError::Unsupported {
                kind: current.kind,
                verb: Verb::Provision,
            });
        }
        require_state(&current, Verb::Provision, PROVISION.preconditions)?;
        let target = request.target_kind;
        if !matches!(
            target,
            ResourceKind::LinuxKvmHost | ResourceKind::WindowsHypervisorHost
        ) {
            return Err(LifecycleError::Validation(format!(
                "a node cannot be provisioned as {target}"
            )));
        }

        let initiated = self.transition(
            "provision",
            id,
            &[current.state],
            PROVISION.initiated,
            Verb::Provision,
            |resource| {
                let original = resource.kind;
                resource.set_property(keys::PRE_PROVISION_KIND, original.as_str());
                resource.kind = target;
            },
        )?;
        let dctx = self.driver_context(ctx);
        let this = self.clone();
        self.inner.tasks.spawn(format!("provision {id}"), async move {
            this.run_provision(&dctx, id, &request).await;
        });
        Ok(initiated.view())
    }

    async fn run_provision(&self, ctx: &DriverContext, id: ResourceId, request: &ProvisionRequest) {
        let Some(resource) = self.begin(id, Verb::Provision, PROVISION) else {
            return;
        };
        let result = self
            .driver(ResourceKind::BareMetalNode)
            .provision(ctx, &resource, request)
            .await;
        if result.is_ok() {
            self.land(
                id,
                Verb::Provision,
                PROVISION.running,
                ResourceState::Provisioned,
                |record| {
                    record.remove_property(keys::PRE_PROVISION_KIND);
                },
                result,
            );
            return;
        }
        self.land(
            id,
            Verb::Provision,
            PROVISION.running,
            ResourceState::Imported,
            |record| {
                record.kind = record
                    .property(keys::PRE_PROVISION_KIND)
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(ResourceKind::BareMetalNode);
                record.remove_property(keys::PRE_PROVISION_KIND);
            },
            result,
        );
    }

    /// Starts commissioning new hosts of an activated cluster and returns it
    /// in `host-commission-initiated`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Unsupported`] for other kinds,
    /// [`LifecycleError::InvalidState`] outside `activated`, and
    /// [`LifecycleError::Validation`] when no new host joined.
    pub async fn host_commission(
        &self,
        ctx: &RequestContext,
        id: ResourceId,
        request: HostCommissionRequest,
    ) -> Result<ResourceView, LifecycleError> {
        let current = self.store().get_resource(id)?;
        if current.kind != ResourceKind::Cluster {
            return Err(LifecycleError::Unsupported {
                kind: current.kind,
                verb: Verb::HostCommission,
            });
        }
        require_state(&current, Verb::HostCommission, HOST_COMMISSION.preconditions)?;
        let dctx = self.driver_context(ctx);
        self.driver(current.kind)
            .pre_host_commission_steps(&dctx, &current, &request)
            .await?;

        let initiated = self.transition(
            "host-commission",
            id,
            &[current.state],
            HOST_COMMISSION.initiated,
            Verb::HostCommission,
            |_| {},
        )?;
        let this = self.clone();
        self.inner
            .tasks
            .spawn(format!("host-commission {id}"), async move {
                this.run_host_commission(&dctx, id, request).await;
            });
        Ok(initiated.view())
    }

    async fn run_host_commission(
        &self,
        ctx: &DriverContext,
        id: ResourceId,
        request: HostCommissionRequest,
    ) {
        let Some(resource) = self.begin(id, Verb::HostCommission, HOST_COMMISSION) else {
            return;
        };
        let result = self
            .driver(resource.kind)
            .host_commission(ctx, &resource, &request)
            .await;
        self.land(
            id,
            Verb::HostCommission,
            HOST_COMMISSION.running,
            ResourceState::Activated,
            |_| {},
            result,
        );
    }

    /// Moves `id` from one of `expected` to `to` in one session, applying
    /// `edit` to the staged record.
    fn transition(
        &self,
        event: &'static str,
        id: ResourceId,
        expected: &[ResourceState],
        to: ResourceState,
        verb: Verb,
        edit: impl FnOnce(&mut Resource),
    ) -> Result<Resource, LifecycleError> {
        let mut session = self.store().session(event)?;
        let resource = session.resource_mut(id)?;
        require_state(resource, verb, expected)?;
        let from = resource.state;
        resource.state = to;
        edit(resource);
        let updated = resource.clone();
        session.commit();
        if from != to {
            debug!(resource = %id, %verb, from = %from, to = %to, "state changed");
        }
        Ok(updated)
    }

    /// Moves a workflow into its running state. Returns `None`, after
    /// logging, when the resource changed underneath the workflow.
    fn begin(&self, id: ResourceId, verb: Verb, table: Transition) -> Option<Resource> {
        match self.transition("workflow-start", id, &[table.initiated], table.running, verb, |_| {}) {
            Ok(resource) => Some(resource),
            Err(err) => {
                warn!(resource = %id, %verb, error = %err, "workflow abandoned");
                None
            }
        }
    }

    /// Records how a workflow ended and publishes the outcome.
    fn land(
        &self,
        id: ResourceId,
        verb: Verb,
        running: ResourceState,
        to: ResourceState,
        edit: impl FnOnce(&mut Resource),
        result: Result<(), LifecycleError>,
    ) {
        let outcome = match result {
            Ok(()) => Outcome::Succeeded,
            Err(err) => {
                error!(resource = %id, %verb, error = %err, "background workflow failed");
                Outcome::Failed {
                    message: err.to_string(),
                }
            }
        };
        match self.transition("workflow-end", id, &[running], to, verb, edit) {
            Ok(resource) => {
                info!(resource = %id, %verb, state = %resource.state, "workflow finished");
                self.notify(LifecycleEvent {
                    resource_id: id,
                    verb,
                    outcome,
                    state: resource.state,
                });
            }
            Err(err) => warn!(resource = %id, %verb, error = %err, "failed to record workflow outcome"),
        }
    }

    fn notify(&self, event: LifecycleEvent) {
        if let Err(err) = self.inner.events.send(event) {
            debug!(error = %err, "no lifecycle event subscribers");
        }
    }
}
