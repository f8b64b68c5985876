//! Test support utilities shared across unit and integration tests.
//!
//! Every double records what it was asked to do and answers with healthy
//! defaults unless a test scripts a failure, so scenarios only describe what
//! goes wrong.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value, json};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, Semaphore};

use crate::compute::{ComputeApi, ComputeFuture, Hypervisor};
use crate::concurrency::ModelLock;
use crate::context::RequestContext;
use crate::driver::{Collaborators, DriverSettings, hyperv, kvm};
use crate::facade::{
    FacadeClient, FacadeFuture, FacadePolicies, FacadeRequest, FacadeResponse, FacadeTransport,
    Method,
};
use crate::inventory::{
    ClusterDetail, ClusterInventory, ClusterSummary, Datastore, InventoryError, InventoryFuture,
    InventoryHost,
};
use crate::lifecycle::Orchestrator;
use crate::model::{
    ManagerKind, NewManager, NewResource, ResourceKind, ResourceManager, Secret, keys,
};
use crate::remote::{
    CommandOutput, CommandRunner, RemoteShell, ShellConnector, ShellError, ShellFuture,
    ShellTarget,
};
use crate::store::MemoryStore;

const SERVERS: &str = "/api/v2/model/entities/servers";
const ENTITIES: &str = "/api/v2/model/entities/";
const PLAYBOOKS: &str = "/api/v2/playbooks/";
const PLAYS: &str = "/api/v2/plays/";
const OS_INSTALL: &str = "/api/v2/osinstall";

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables set for the program.
    pub envs: Vec<(OsString, OsString)>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        locked(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        locked(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        envs: &[(OsString, OsString)],
    ) -> Result<CommandOutput, ShellError> {
        locked(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            envs: envs.to_vec(),
        });
        locked(&self.responses)
            .pop_front()
            .ok_or_else(|| ShellError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// A request seen by [`ScriptedTransport`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    /// Request verb.
    pub method: Method,
    /// Request path.
    pub path: String,
    /// Request body.
    pub body: Option<Value>,
    /// Forwarded token.
    pub token: Option<Secret>,
}

impl RecordedRequest {
    /// Renders `METHOD path` for sequence assertions.
    #[must_use]
    pub fn line(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

#[derive(Debug, Default)]
struct TransportState {
    scripted: BTreeMap<(String, String), VecDeque<FacadeResponse>>,
    servers: BTreeMap<String, Value>,
    entities: BTreeMap<String, Value>,
    installs: BTreeSet<String>,
    requests: Vec<RecordedRequest>,
    gates: BTreeMap<(String, String), Arc<Semaphore>>,
}

/// In-memory facade keeping a server list and answering jobs as finished.
///
/// Responses pushed with [`ScriptedTransport::push_response`] for a method
/// and path are consumed before the built-in behaviour applies.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl ScriptedTransport {
    /// Creates an empty facade.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next `method` request to `path`.
    pub fn push_response(&self, method: Method, path: &str, status: u16, body: Value) {
        locked(&self.state)
            .scripted
            .entry((method.to_string(), path.to_owned()))
            .or_default()
            .push_back(FacadeResponse { status, body });
    }

    /// Makes the named playbook fail when polled.
    pub fn fail_playbook(&self, name: &str, code: i64) {
        self.push_response(
            Method::Get,
            &format!("{PLAYS}{name}"),
            200,
            json!({ "alive": false, "code": code }),
        );
    }

    /// Holds every `method` request to `path` until
    /// [`ScriptedTransport::release`] is called.
    pub fn hold(&self, method: Method, path: &str) {
        locked(&self.state)
            .gates
            .insert((method.to_string(), path.to_owned()), Arc::new(Semaphore::new(0)));
    }

    /// Lets held requests through and stops holding new ones.
    pub fn release(&self) {
        let gates = std::mem::take(&mut locked(&self.state).gates);
        for gate in gates.into_values() {
            gate.close();
        }
    }

    /// Waits until a request rendering as `line` has been answered,
    /// sleeping a millisecond between checks. Returns `false` after
    /// `attempts` checks.
    pub async fn wait_for(&self, line: &str, attempts: u32) -> bool {
        for _ in 0..attempts {
            if self.requests().iter().any(|request| request.line() == line) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        false
    }

    /// Returns every request seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        locked(&self.state).requests.clone()
    }

    /// Returns `METHOD path` lines for every request seen so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.requests().iter().map(RecordedRequest::line).collect()
    }

    /// Returns the ids of the server entries currently in the model.
    #[must_use]
    pub fn server_ids(&self) -> Vec<String> {
        locked(&self.state).servers.keys().cloned().collect()
    }

    /// Returns one server entry as stored.
    #[must_use]
    pub fn server(&self, id: &str) -> Option<Value> {
        locked(&self.state).servers.get(id).cloned()
    }

    /// Returns a stored entity.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<Value> {
        locked(&self.state).entities.get(name).cloned()
    }

    fn respond(state: &mut TransportState, request: &FacadeRequest) -> FacadeResponse {
        let key = (request.method.to_string(), request.path.clone());
        if let Some(response) = state
            .scripted
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }
        let path = request.path.as_str();
        let body = request.body.clone().unwrap_or(Value::Null);
        match request.method {
            Method::Get if path == SERVERS => {
                ok(Value::Array(state.servers.values().cloned().collect()))
            }
            Method::Post if path == SERVERS => {
                let id = body
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                if state.servers.contains_key(&id) {
                    return status(409, json!({ "message": format!("server {id} exists") }));
                }
                state.servers.insert(id, body);
                ok(json!({}))
            }
            Method::Put if path.starts_with(SERVERS) => {
                let id = path.trim_start_matches(SERVERS).trim_start_matches('/');
                state.servers.insert(id.to_owned(), body);
                ok(json!({}))
            }
            Method::Delete if path.starts_with(SERVERS) => {
                let id = path.trim_start_matches(SERVERS).trim_start_matches('/');
                if state.servers.remove(id).is_some() {
                    ok(json!({}))
                } else {
                    status(404, json!({ "message": format!("no server {id}") }))
                }
            }
            Method::Get if path.starts_with(ENTITIES) => {
                let name = path.trim_start_matches(ENTITIES);
                ok(state
                    .entities
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new())))
            }
            Method::Put if path.starts_with(ENTITIES) => {
                let name = path.trim_start_matches(ENTITIES);
                state.entities.insert(name.to_owned(), body);
                ok(json!({}))
            }
            Method::Post if path.starts_with(PLAYBOOKS) => {
                ok(json!({ "id": path.trim_start_matches(PLAYBOOKS) }))
            }
            Method::Get if path.starts_with(PLAYS) => ok(json!({ "alive": false, "code": 0 })),
            Method::Post if path == OS_INSTALL => {
                let ids = body
                    .get("servers")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|server| server.get("id").and_then(Value::as_str));
                state.installs.extend(ids.map(ToOwned::to_owned));
                ok(json!({}))
            }
            Method::Get if path == OS_INSTALL => {
                let servers: Map<String, Value> = state
                    .installs
                    .iter()
                    .map(|id| (id.clone(), json!("complete")))
                    .collect();
                ok(json!({ "servers": servers }))
            }
            _ => ok(json!({})),
        }
    }
}

fn ok(body: Value) -> FacadeResponse {
    status(200, body)
}

const fn status(code: u16, body: Value) -> FacadeResponse {
    FacadeResponse { status: code, body }
}

impl FacadeTransport for ScriptedTransport {
    fn send(&self, request: FacadeRequest) -> FacadeFuture<'_, FacadeResponse> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let key = (request.method.to_string(), request.path.clone());
            let gate = locked(&self.state).gates.get(&key).cloned();
            if let Some(gate) = gate {
                drop(gate.acquire().await);
            }
            let mut state = locked(&self.state);
            let response = Self::respond(&mut state, &request);
            state.requests.push(RecordedRequest {
                method: request.method,
                path: request.path,
                body: request.body,
                token: request.token,
            });
            Ok(response)
        })
    }
}

#[derive(Debug, Default)]
struct ShellState {
    unreachable: BTreeSet<String>,
    rules: Vec<(String, String, CommandOutput)>,
    commands: Vec<(String, String)>,
}

/// Connector whose shells answer from scripted rules.
///
/// Unscripted commands get answers describing a healthy, empty hypervisor
/// host with a synchronised clock.
#[derive(Clone, Debug, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ShellState>>,
}

impl ScriptedConnector {
    /// Creates a connector where every host is reachable and healthy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes logins to `host` fail.
    pub fn set_unreachable(&self, host: &str) {
        locked(&self.state).unreachable.insert(host.to_owned());
    }

    /// Answers commands on `host` containing `fragment` with `stdout`.
    pub fn respond(&self, host: &str, fragment: &str, stdout: &str) {
        self.respond_with(
            host,
            fragment,
            CommandOutput {
                code: Some(0),
                stdout: stdout.to_owned(),
                stderr: String::new(),
            },
        );
    }

    /// Answers commands on `host` containing `fragment` with `output`.
    /// Later rules win over earlier ones.
    pub fn respond_with(&self, host: &str, fragment: &str, output: CommandOutput) {
        locked(&self.state)
            .rules
            .push((host.to_owned(), fragment.to_owned(), output));
    }

    /// Returns `(host, command)` pairs in execution order.
    #[must_use]
    pub fn commands(&self) -> Vec<(String, String)> {
        locked(&self.state).commands.clone()
    }
}

impl ShellConnector for ScriptedConnector {
    fn connect(&self, target: &ShellTarget) -> Box<dyn RemoteShell> {
        Box::new(ScriptedShell {
            host: target.host.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

/// Shell handed out by [`ScriptedConnector`].
#[derive(Debug)]
pub struct ScriptedShell {
    host: String,
    state: Arc<Mutex<ShellState>>,
}

impl ScriptedShell {
    fn answer(&self, command: &str) -> CommandOutput {
        let mut state = locked(&self.state);
        state.commands.push((self.host.clone(), command.to_owned()));
        let scripted = state
            .rules
            .iter()
            .rev()
            .find(|(host, fragment, _)| host == &self.host && command.contains(fragment.as_str()))
            .map(|(_, _, output)| output.clone());
        scripted.unwrap_or_else(|| healthy_answer(command))
    }
}

fn healthy_answer(command: &str) -> CommandOutput {
    let stdout = match command {
        kvm::OS_RELEASE => String::from("NAME=\"Red Hat Enterprise Linux\"\nID=\"rhel\"\n"),
        hyperv::OS_CAPTION => String::from("Microsoft Windows Server 2016 Datacenter"),
        hyperv::HYPERV_ROLE => String::from("True"),
        hyperv::VM_COUNT => String::from("0"),
        kvm::CLOCK | hyperv::CLOCK => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string(),
        _ => String::new(),
    };
    CommandOutput {
        code: Some(0),
        stdout,
        stderr: String::new(),
    }
}

impl RemoteShell for ScriptedShell {
    fn open(&self) -> ShellFuture<'_, ()> {
        Box::pin(async move {
            if locked(&self.state).unreachable.contains(&self.host) {
                return Err(ShellError::Connection {
                    host: self.host.clone(),
                    message: String::from("connection refused"),
                });
            }
            Ok(())
        })
    }

    fn exec<'a>(&'a self, command: &'a str) -> ShellFuture<'a, CommandOutput> {
        Box::pin(async move { Ok(self.answer(command)) })
    }

    fn close(&self) -> ShellFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

#[derive(Debug, Default)]
struct ComputeState {
    never_register: bool,
    lookups_before_registration: u32,
    lookups: BTreeMap<String, u32>,
    running_vms: BTreeMap<String, u32>,
    deleted_services: Vec<String>,
}

/// Compute service where hypervisors register after a number of lookups.
#[derive(Clone, Debug, Default)]
pub struct FakeCompute {
    state: Arc<Mutex<ComputeState>>,
}

impl FakeCompute {
    /// Creates a service where hosts register on the first lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes lookups return nothing forever.
    pub fn never_register(&self) {
        locked(&self.state).never_register = true;
    }

    /// Makes every host register only after `lookups` empty answers.
    pub fn register_after(&self, lookups: u32) {
        locked(&self.state).lookups_before_registration = lookups;
    }

    /// Sets the number of instances running on `hostname`.
    pub fn set_running_vms(&self, hostname: &str, count: u32) {
        locked(&self.state)
            .running_vms
            .insert(hostname.to_owned(), count);
    }

    /// Returns how often `hostname` was looked up.
    #[must_use]
    pub fn lookups(&self, hostname: &str) -> u32 {
        locked(&self.state)
            .lookups
            .get(hostname)
            .copied()
            .unwrap_or_default()
    }

    /// Returns the host names whose service registration was deleted.
    #[must_use]
    pub fn deleted_services(&self) -> Vec<String> {
        locked(&self.state).deleted_services.clone()
    }

    fn hypervisor_for(state: &ComputeState, hostname: &str) -> Hypervisor {
        Hypervisor {
            id: format!("hv-{hostname}"),
            hypervisor_hostname: hostname.to_owned(),
            running_vms: state.running_vms.get(hostname).copied().unwrap_or_default(),
        }
    }
}

impl ComputeApi for FakeCompute {
    fn find_hypervisor<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        hostname: &'a str,
    ) -> ComputeFuture<'a, Option<Hypervisor>> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            let counter = state.lookups.entry(hostname.to_owned()).or_default();
            *counter += 1;
            let seen = *counter;
            if state.never_register || seen <= state.lookups_before_registration {
                return Ok(None);
            }
            Ok(Some(Self::hypervisor_for(&state, hostname)))
        })
    }

    fn hypervisor<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        id: &'a str,
    ) -> ComputeFuture<'a, Hypervisor> {
        Box::pin(async move {
            let state = locked(&self.state);
            let hostname = id.trim_start_matches("hv-");
            Ok(Self::hypervisor_for(&state, hostname))
        })
    }

    fn delete_service<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        hostname: &'a str,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            locked(&self.state)
                .deleted_services
                .push(hostname.to_owned());
            Ok(())
        })
    }
}

#[derive(Debug, Default)]
struct InventoryState {
    unreachable: bool,
    clusters: Vec<(ClusterSummary, ClusterDetail)>,
}

/// Manager inventory held in memory.
#[derive(Clone, Debug, Default)]
pub struct FakeInventory {
    state: Arc<Mutex<InventoryState>>,
}

impl FakeInventory {
    /// Creates a reachable manager with no clusters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cluster with the given member hosts and one datastore.
    pub fn add_cluster(&self, moid: &str, name: &str, hosts: &[&str], shared_datastore: bool) {
        let detail = ClusterDetail {
            hosts: hosts.iter().map(|host| inventory_host(host)).collect(),
            datastores: vec![Datastore {
                name: format!("{name}-ds"),
                shared: shared_datastore,
            }],
        };
        locked(&self.state).clusters.push((
            ClusterSummary {
                moid: moid.to_owned(),
                name: name.to_owned(),
                datacenter: String::from("dc-1"),
            },
            detail,
        ));
    }

    /// Adds a host to an existing cluster.
    pub fn add_host(&self, moid: &str, host: &str) {
        let mut state = locked(&self.state);
        if let Some((_, detail)) = state
            .clusters
            .iter_mut()
            .find(|(summary, _)| summary.moid == moid)
        {
            detail.hosts.push(inventory_host(host));
        }
    }

    /// Makes every request fail as unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        locked(&self.state).unreachable = unreachable;
    }

    fn reachable(&self, manager: &ResourceManager) -> Result<(), InventoryError> {
        if locked(&self.state).unreachable {
            return Err(InventoryError::Unreachable {
                address: manager.address.clone(),
                message: String::from("connection refused"),
            });
        }
        Ok(())
    }
}

fn inventory_host(name: &str) -> InventoryHost {
    InventoryHost {
        moid: format!("host-{name}"),
        name: name.to_owned(),
        connection_state: String::from("CONNECTED"),
    }
}

impl ClusterInventory for FakeInventory {
    fn check_connection<'a>(&'a self, manager: &'a ResourceManager) -> InventoryFuture<'a, ()> {
        Box::pin(async move { self.reachable(manager) })
    }

    fn list_clusters<'a>(
        &'a self,
        manager: &'a ResourceManager,
    ) -> InventoryFuture<'a, Vec<ClusterSummary>> {
        Box::pin(async move {
            self.reachable(manager)?;
            Ok(locked(&self.state)
                .clusters
                .iter()
                .map(|(summary, _)| summary.clone())
                .collect())
        })
    }

    fn cluster_detail<'a>(
        &'a self,
        manager: &'a ResourceManager,
        moid: &'a str,
    ) -> InventoryFuture<'a, ClusterDetail> {
        Box::pin(async move {
            self.reachable(manager)?;
            locked(&self.state)
                .clusters
                .iter()
                .find(|(summary, _)| summary.moid == moid)
                .map(|(_, detail)| detail.clone())
                .ok_or_else(|| InventoryError::UnknownCluster {
                    moid: moid.to_owned(),
                })
        })
    }
}

/// An orchestrator wired to in-memory doubles with millisecond timings.
#[derive(Clone, Debug)]
pub struct TestRig {
    /// Orchestrator under test.
    pub orchestrator: Orchestrator,
    /// Facade double.
    pub transport: ScriptedTransport,
    /// Remote shell double.
    pub shells: ScriptedConnector,
    /// Compute service double.
    pub compute: FakeCompute,
    /// Manager inventory double.
    pub inventory: FakeInventory,
    /// Backing store.
    pub store: Arc<MemoryStore>,
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRig {
    /// Builds a rig over an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Builds a rig over `store`.
    #[must_use]
    pub fn with_store(store: MemoryStore) -> Self {
        let transport = ScriptedTransport::new();
        let shells = ScriptedConnector::new();
        let compute = FakeCompute::new();
        let inventory = FakeInventory::new();
        let store = Arc::new(store);
        let policies = FacadePolicies::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
            5,
            10,
            10,
        );
        let orchestrator = Orchestrator::new(Collaborators {
            store: Arc::clone(&store),
            facade: FacadeClient::new(Arc::new(transport.clone()), policies),
            shells: Arc::new(shells.clone()),
            compute: Arc::new(compute.clone()),
            inventory: Arc::new(inventory.clone()),
            lock: ModelLock::new("test-model"),
            settings: DriverSettings {
                registration_attempts: 3,
                registration_interval: Duration::from_millis(1),
                max_clock_skew: Duration::from_secs(60),
            },
        });
        Self {
            orchestrator,
            transport,
            shells,
            compute,
            inventory,
            store,
        }
    }

    /// Request context carrying a fixed token.
    #[must_use]
    pub fn ctx() -> RequestContext {
        RequestContext::new(Some(Secret::new("token-123")))
    }
}

/// Create input for a pre-imaged KVM host.
#[must_use]
pub fn kvm_host(name: &str, address: &str) -> NewResource {
    host_input(name, ResourceKind::LinuxKvmHost, address, "stack")
}

/// Create input for a pre-imaged Windows hypervisor host.
#[must_use]
pub fn hyperv_host(name: &str, address: &str) -> NewResource {
    host_input(
        name,
        ResourceKind::WindowsHypervisorHost,
        address,
        "Administrator",
    )
}

/// Create input for a bare-metal node with ILO details.
#[must_use]
pub fn bare_metal_node(name: &str, address: &str) -> NewResource {
    let mut input = host_input(name, ResourceKind::BareMetalNode, address, "root");
    for (key, value) in [
        (keys::ILO_ADDRESS, "10.1.0.10"),
        (keys::ILO_USER, "admin"),
        (keys::ILO_PASSWORD, "ilo-secret"),
        (keys::MAC_ADDRESS, "52:54:00:12:34:56"),
    ] {
        input.properties.insert(key.to_owned(), value.to_owned());
    }
    input
}

fn host_input(name: &str, kind: ResourceKind, address: &str, username: &str) -> NewResource {
    NewResource {
        name: name.to_owned(),
        kind,
        address: address.to_owned(),
        username: username.to_owned(),
        password: Secret::new("host-secret"),
        port: None,
        resource_manager_id: None,
        properties: BTreeMap::new(),
        state: None,
    }
}

/// Registration input for a vCenter-style manager.
#[must_use]
pub fn vcenter(name: &str, address: &str) -> NewManager {
    NewManager {
        name: name.to_owned(),
        kind: ManagerKind::Vcenter,
        address: address.to_owned(),
        username: String::from("administrator@vsphere.local"),
        password: Secret::new("vc-secret"),
        port: None,
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
