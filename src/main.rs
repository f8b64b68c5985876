//! Binary entry point for the Hostward CLI.
//!
//! Every invocation loads the store snapshot, runs one verb, waits for the
//! background workflows it started, saves the snapshot, and prints the result
//! as JSON on stdout. Logs go to stderr, filtered by `HOSTWARD_LOG`.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::process;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt as log_fmt, prelude::*};

use hostward::compute::HttpCompute;
use hostward::concurrency::ModelLock;
use hostward::config::{ComputeConfig, ConfigError, FacadeConfig, ShellConfig, StoreConfig};
use hostward::context::RequestContext;
use hostward::driver::{Collaborators, DriverSettings};
use hostward::facade::{FacadeClient, FacadeError, HttpTransport};
use hostward::inventory::HttpInventory;
use hostward::lifecycle::{
    ActivationRequest, DeactivationRequest, HostCommissionRequest, LifecycleError, Orchestrator,
    ProvisionRequest,
};
use hostward::model::{
    ManagerId, ManagerKind, NewManager, NewResource, ResourceId, ResourceUpdate, Secret,
};
use hostward::remote::SshConnector;
use hostward::store::{MemoryStore, ResourceFilter, SnapshotFile, StoreError};

mod cli;

use cli::{
    ActivateArgs, AddManagerArgs, Cli, Command, CreateResourceArgs, DeactivateArgs,
    HostCommissionArgs, ListResourcesArgs, ManagerCommand, ProvisionArgs, ResourceCommand,
    UpdateResourceArgs,
};

const LOG_ENV: &str = "HOSTWARD_LOG";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("state file error: {0}")]
    Store(#[from] StoreError),
    #[error("facade setup failed: {0}")]
    Facade(#[from] FacadeError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(log_fmt::layer().with_writer(io::stderr))
        .with(filter)
        .try_init()
        .ok();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let store_config = StoreConfig::load_without_cli_args()?;
    store_config.validate()?;
    let snapshot = SnapshotFile::new(store_config.state_file);
    let store = Arc::new(MemoryStore::from_tables(snapshot.load()?));
    let orchestrator = build_orchestrator(Arc::clone(&store))?;
    let ctx = RequestContext::new(cli.token.map(Secret::new));

    let outcome = dispatch(&orchestrator, &ctx, cli.command).await;
    if orchestrator.in_flight() > 0 {
        info!(tasks = orchestrator.in_flight(), "waiting for background workflows");
    }
    orchestrator.drain().await;
    snapshot.save(&store.tables()?)?;
    debug!(path = %snapshot.path(), "saved store snapshot");

    write_json(io::stdout(), &outcome?)
}

fn build_orchestrator(store: Arc<MemoryStore>) -> Result<Orchestrator, CliError> {
    let facade_config = FacadeConfig::load_without_cli_args()?;
    facade_config.validate()?;
    let shell_config = ShellConfig::load_without_cli_args()?;
    shell_config.validate()?;
    let compute_config = ComputeConfig::load_without_cli_args()?;
    compute_config.validate()?;

    let transport = HttpTransport::new(&facade_config.url, facade_config.timeout())?;
    Ok(Orchestrator::new(Collaborators {
        store,
        facade: FacadeClient::new(Arc::new(transport), facade_config.policies()),
        shells: Arc::new(SshConnector::with_process_runner(shell_config)),
        compute: Arc::new(HttpCompute::new(&compute_config.url)),
        inventory: Arc::new(HttpInventory),
        lock: ModelLock::global(),
        settings: DriverSettings::from(&compute_config),
    }))
}

async fn dispatch(
    orchestrator: &Orchestrator,
    ctx: &RequestContext,
    command: Command,
) -> Result<Value, CliError> {
    match command {
        Command::Resource(verb) => dispatch_resource(orchestrator, ctx, verb).await,
        Command::Manager(verb) => dispatch_manager(orchestrator, ctx, verb).await,
        Command::Activate(args) => {
            let id = parse_arg::<ResourceId>(&args.id, "resource id")?;
            let request = activation(args)?;
            to_json(&orchestrator.activate(ctx, id, request).await?)
        }
        Command::Deactivate(args) => {
            let id = parse_arg::<ResourceId>(&args.id, "resource id")?;
            to_json(&orchestrator.deactivate(ctx, id, deactivation(&args)).await?)
        }
        Command::Provision(args) => {
            let id = parse_arg::<ResourceId>(&args.id, "resource id")?;
            to_json(&orchestrator.provision(ctx, id, provisioning(args)?)?)
        }
        Command::HostCommission(args) => {
            let id = parse_arg::<ResourceId>(&args.id, "cluster id")?;
            to_json(
                &orchestrator
                    .host_commission(ctx, id, host_commission(&args))
                    .await?,
            )
        }
    }
}

async fn dispatch_resource(
    orchestrator: &Orchestrator,
    ctx: &RequestContext,
    verb: ResourceCommand,
) -> Result<Value, CliError> {
    match verb {
        ResourceCommand::Create(args) => {
            to_json(&orchestrator.create_resource(ctx, new_resource(args)?).await?)
        }
        ResourceCommand::List(args) => to_json(&orchestrator.list_resources(&filter(&args)?)?),
        ResourceCommand::Show(args) => {
            let id = parse_arg::<ResourceId>(&args.id, "resource id")?;
            to_json(&orchestrator.get_resource(ctx, id, args.inventory).await?)
        }
        ResourceCommand::Update(args) => {
            let id = parse_arg::<ResourceId>(&args.id, "resource id")?;
            let update = resource_update(args);
            to_json(&orchestrator.update_resource(ctx, id, &update).await?)
        }
        ResourceCommand::Delete(args) => {
            let id = parse_arg::<ResourceId>(&args.id, "resource id")?;
            orchestrator.delete_resource(ctx, id).await?;
            Ok(json!({ "id": id, "deleted": true }))
        }
    }
}

async fn dispatch_manager(
    orchestrator: &Orchestrator,
    ctx: &RequestContext,
    verb: ManagerCommand,
) -> Result<Value, CliError> {
    match verb {
        ManagerCommand::Add(args) => {
            to_json(&orchestrator.create_manager(ctx, new_manager(args)).await?)
        }
        ManagerCommand::List => to_json(&orchestrator.list_managers()?),
        ManagerCommand::Show(args) => {
            let id = parse_arg::<ManagerId>(&args.id, "manager id")?;
            to_json(&orchestrator.get_manager(id)?)
        }
        ManagerCommand::Delete(args) => {
            let id = parse_arg::<ManagerId>(&args.id, "manager id")?;
            orchestrator.delete_manager(ctx, id)?;
            Ok(json!({ "id": id, "deleted": true }))
        }
    }
}

fn parse_arg<T>(raw: &str, what: &str) -> Result<T, CliError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse()
        .map_err(|err| CliError::InvalidArgument(format!("{what} {raw:?}: {err}")))
}

fn parse_optional<T>(raw: Option<&str>, what: &str) -> Result<Option<T>, CliError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.map(|value| parse_arg(value, what)).transpose()
}

fn parse_properties(raw: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    let mut properties = BTreeMap::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(CliError::InvalidArgument(format!(
                "property {entry:?} must look like KEY=VALUE"
            )));
        };
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(CliError::InvalidArgument(format!(
                "property {entry:?} has an empty key"
            )));
        }
        properties.insert(trimmed.to_owned(), value.trim().to_owned());
    }
    Ok(properties)
}

fn new_resource(args: CreateResourceArgs) -> Result<NewResource, CliError> {
    Ok(NewResource {
        kind: parse_arg(&args.kind, "resource kind")?,
        resource_manager_id: parse_optional(args.manager.as_deref(), "manager id")?,
        properties: parse_properties(&args.properties)?,
        name: args.name,
        address: args.address,
        username: args.username,
        password: Secret::new(args.password.unwrap_or_default()),
        port: args.port,
        state: None,
    })
}

fn filter(args: &ListResourcesArgs) -> Result<ResourceFilter, CliError> {
    Ok(ResourceFilter {
        kind: parse_optional(args.kind.as_deref(), "resource kind")?,
        state: parse_optional(args.state.as_deref(), "resource state")?,
        manager: parse_optional(args.manager.as_deref(), "manager id")?,
    })
}

fn resource_update(args: UpdateResourceArgs) -> ResourceUpdate {
    ResourceUpdate {
        name: args.name,
        address: args.address,
        username: args.username,
        password: args.password.map(Secret::new),
        port: args.port,
    }
}

fn new_manager(args: AddManagerArgs) -> NewManager {
    NewManager {
        name: args.name,
        kind: ManagerKind::default(),
        address: args.address,
        username: args.username,
        password: Secret::new(args.password),
        port: args.port,
    }
}

fn activation(args: ActivateArgs) -> Result<ActivationRequest, CliError> {
    let network_config = args
        .network_config
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|err| CliError::InvalidArgument(format!("network config: {err}")))?;
    Ok(ActivationRequest {
        run_playbook: !args.no_playbook,
        network_config,
        server_group: args.server_group,
        server_role: args.server_role,
        nic_mapping: args.nic_mapping,
    })
}

const fn deactivation(args: &DeactivateArgs) -> DeactivationRequest {
    DeactivationRequest {
        forced: args.force,
        run_playbook: !args.no_playbook,
    }
}

fn provisioning(args: ProvisionArgs) -> Result<ProvisionRequest, CliError> {
    Ok(ProvisionRequest {
        target_kind: parse_arg(&args.target_kind, "target kind")?,
        os_version: args.os_version,
    })
}

const fn host_commission(args: &HostCommissionArgs) -> HostCommissionRequest {
    HostCommissionRequest {
        run_playbook: !args.no_playbook,
    }
}

fn to_json(value: &impl Serialize) -> Result<Value, CliError> {
    Ok(serde_json::to_value(value)?)
}

fn write_json(mut target: impl Write, value: &Value) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut target, value)?;
    writeln!(target)?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostward::model::{ResourceKind, ResourceState};
    use rstest::rstest;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap_or_else(|err| panic!("arguments should parse: {err}"))
    }

    #[rstest]
    fn properties_split_on_the_first_equals_sign() {
        let parsed = parse_properties(&[
            String::from("server_group=RACK1"),
            String::from(" nic_mapping = A=B "),
        ])
        .unwrap_or_else(|err| panic!("properties should parse: {err}"));

        assert_eq!(parsed.get("server_group").map(String::as_str), Some("RACK1"));
        assert_eq!(parsed.get("nic_mapping").map(String::as_str), Some("A=B"));
    }

    #[rstest]
    #[case("server_group")]
    #[case("=RACK1")]
    fn malformed_properties_are_rejected(#[case] raw: &str) {
        let err = parse_properties(&[String::from(raw)]).expect_err("property should be rejected");

        assert!(matches!(err, CliError::InvalidArgument(_)), "got {err:?}");
    }

    #[rstest]
    fn unknown_kinds_name_the_argument() {
        let err = parse_arg::<ResourceKind>("toaster", "resource kind")
            .expect_err("kind should be rejected");

        assert!(
            err.to_string().contains("resource kind \"toaster\""),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn list_filters_parse_every_tag() {
        let Command::Resource(ResourceCommand::List(args)) = parse(&[
            "hostward",
            "resource",
            "list",
            "--kind",
            "linux-kvm-host",
            "--state",
            "activated",
        ])
        .command
        else {
            panic!("expected resource list");
        };

        let parsed = filter(&args).unwrap_or_else(|err| panic!("filter should parse: {err}"));

        assert_eq!(parsed.kind, Some(ResourceKind::LinuxKvmHost));
        assert_eq!(parsed.state, Some(ResourceState::Activated));
        assert_eq!(parsed.manager, None);
    }

    #[rstest]
    fn create_collects_repeated_properties() {
        let Command::Resource(ResourceCommand::Create(args)) = parse(&[
            "hostward",
            "resource",
            "create",
            "--name",
            "kvm-1",
            "--kind",
            "linux-kvm-host",
            "--address",
            "10.0.0.5",
            "--username",
            "stack",
            "--password",
            "secret",
            "--property",
            "server_group=RACK1",
            "--property",
            "server_role=KVM-COMPUTE-ROLE",
        ])
        .command
        else {
            panic!("expected resource create");
        };

        let input = new_resource(args).unwrap_or_else(|err| panic!("input should build: {err}"));

        assert_eq!(input.kind, ResourceKind::LinuxKvmHost);
        assert_eq!(input.password, Secret::new("secret"));
        assert_eq!(input.properties.len(), 2);
        assert_eq!(input.state, None);
    }

    #[rstest]
    fn activation_flags_map_onto_the_request() {
        let Command::Activate(args) = parse(&[
            "hostward",
            "activate",
            "5f0c2a54-62a4-4c4c-9a8e-6a3f1f0e2a11",
            "--no-playbook",
            "--network-config",
            r#"{"vlan": 120}"#,
        ])
        .command
        else {
            panic!("expected activate");
        };

        let request = activation(args).unwrap_or_else(|err| panic!("request should build: {err}"));

        assert!(!request.run_playbook);
        assert_eq!(request.network_config, Some(json!({ "vlan": 120 })));
    }

    #[rstest]
    fn activation_rejects_malformed_network_config() {
        let Command::Activate(args) = parse(&[
            "hostward",
            "activate",
            "5f0c2a54-62a4-4c4c-9a8e-6a3f1f0e2a11",
            "--network-config",
            "{vlan",
        ])
        .command
        else {
            panic!("expected activate");
        };

        let err = activation(args).expect_err("config should be rejected");

        assert!(err.to_string().contains("network config"), "got {err}");
    }

    #[rstest]
    #[case(&["hostward", "deactivate", "x"], false, true)]
    #[case(&["hostward", "deactivate", "x", "--force", "--no-playbook"], true, false)]
    fn deactivation_flags_map_onto_the_request(
        #[case] args: &[&str],
        #[case] forced: bool,
        #[case] run_playbook: bool,
    ) {
        let Command::Deactivate(parsed) = parse(args).command else {
            panic!("expected deactivate");
        };

        assert_eq!(
            deactivation(&parsed),
            DeactivationRequest {
                forced,
                run_playbook
            }
        );
    }

    #[rstest]
    fn write_json_ends_with_a_newline() {
        let mut buf = Vec::new();
        write_json(&mut buf, &json!([]))
            .unwrap_or_else(|err| panic!("json should be written: {err}"));

        assert_eq!(buf, b"[]\n");
    }

    #[rstest]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::InvalidArgument(String::from("resource id \"x\""));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).unwrap_or_else(|utf8| panic!("utf8: {utf8}"));

        assert_eq!(rendered, "invalid argument: resource id \"x\"\n");
    }
}
