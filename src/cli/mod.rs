//! Command-line interface definitions for the `hostward` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! only depends on clap; arguments stay as plain strings and the binary turns
//! them into model types.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `hostward` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hostward",
    about = "Register, activate, and retire cloud hosts and clusters",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Bearer token forwarded to the configuration facade.
    #[arg(
        long,
        global = true,
        env = "HOSTWARD_TOKEN",
        hide_env_values = true,
        value_name = "TOKEN"
    )]
    pub(crate) token: Option<String>,
    /// Verb to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Verbs accepted by `hostward`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Manage resource records.
    #[command(subcommand)]
    Resource(ResourceCommand),
    /// Manage resource managers.
    #[command(subcommand)]
    Manager(ManagerCommand),
    /// Deploy a resource into the cloud.
    Activate(ActivateArgs),
    /// Withdraw a resource from the cloud.
    Deactivate(DeactivateArgs),
    /// Install an operating system on a bare-metal node.
    Provision(ProvisionArgs),
    /// Add a cluster's new hosts to the cloud.
    #[command(name = "host-commission")]
    HostCommission(HostCommissionArgs),
}

/// `hostward resource` verbs.
#[derive(Debug, Subcommand)]
pub(crate) enum ResourceCommand {
    /// Register a resource.
    Create(CreateResourceArgs),
    /// List resources, optionally filtered.
    List(ListResourcesArgs),
    /// Show one resource.
    Show(ShowResourceArgs),
    /// Change a resource's name or connection fields.
    Update(UpdateResourceArgs),
    /// Delete a resource.
    Delete(IdArg),
}

/// `hostward manager` verbs.
#[derive(Debug, Subcommand)]
pub(crate) enum ManagerCommand {
    /// Register a resource manager and import its clusters.
    Add(AddManagerArgs),
    /// List resource managers.
    List,
    /// Show one resource manager.
    Show(IdArg),
    /// Delete a resource manager and the clusters it only imported.
    Delete(IdArg),
}

/// A single record identifier.
#[derive(Debug, Args)]
pub(crate) struct IdArg {
    /// Record identifier (UUID).
    #[arg(value_name = "ID")]
    pub(crate) id: String,
}

/// Arguments for `hostward resource create`.
#[derive(Debug, Args)]
pub(crate) struct CreateResourceArgs {
    /// Human name of the resource.
    #[arg(long)]
    pub(crate) name: String,
    /// Resource kind: cluster, linux-kvm-host, windows-hypervisor-host, or
    /// bare-metal-node.
    #[arg(long, value_name = "KIND")]
    pub(crate) kind: String,
    /// Network address of the resource.
    #[arg(long)]
    pub(crate) address: String,
    /// Login user.
    #[arg(long, default_value = "")]
    pub(crate) username: String,
    /// Login password.
    #[arg(long, env = "HOSTWARD_RESOURCE_PASSWORD", hide_env_values = true)]
    pub(crate) password: Option<String>,
    /// Login port.
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Owning resource manager (UUID); required for clusters.
    #[arg(long, value_name = "ID")]
    pub(crate) manager: Option<String>,
    /// Kind-specific input field, repeatable.
    #[arg(long = "property", value_name = "KEY=VALUE")]
    pub(crate) properties: Vec<String>,
}

/// Arguments for `hostward resource list`.
#[derive(Debug, Args)]
pub(crate) struct ListResourcesArgs {
    /// Only resources of this kind.
    #[arg(long, value_name = "KIND")]
    pub(crate) kind: Option<String>,
    /// Only resources in this state.
    #[arg(long, value_name = "STATE")]
    pub(crate) state: Option<String>,
    /// Only resources owned by this manager (UUID).
    #[arg(long, value_name = "ID")]
    pub(crate) manager: Option<String>,
}

/// Arguments for `hostward resource show`.
#[derive(Debug, Args)]
pub(crate) struct ShowResourceArgs {
    /// Resource identifier (UUID).
    #[arg(value_name = "ID")]
    pub(crate) id: String,
    /// Attach the live inventory read from the resource.
    #[arg(long)]
    pub(crate) inventory: bool,
}

/// Arguments for `hostward resource update`.
#[derive(Debug, Args)]
pub(crate) struct UpdateResourceArgs {
    /// Resource identifier (UUID).
    #[arg(value_name = "ID")]
    pub(crate) id: String,
    /// New name.
    #[arg(long)]
    pub(crate) name: Option<String>,
    /// New network address.
    #[arg(long)]
    pub(crate) address: Option<String>,
    /// New login user.
    #[arg(long)]
    pub(crate) username: Option<String>,
    /// New login password.
    #[arg(long, env = "HOSTWARD_RESOURCE_PASSWORD", hide_env_values = true)]
    pub(crate) password: Option<String>,
    /// New login port.
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

/// Arguments for `hostward manager add`.
#[derive(Debug, Args)]
pub(crate) struct AddManagerArgs {
    /// Human name of the manager.
    #[arg(long)]
    pub(crate) name: String,
    /// Network address of the manager.
    #[arg(long)]
    pub(crate) address: String,
    /// Login user.
    #[arg(long)]
    pub(crate) username: String,
    /// Login password.
    #[arg(long, env = "HOSTWARD_MANAGER_PASSWORD", hide_env_values = true)]
    pub(crate) password: String,
    /// Login port.
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

/// Arguments for `hostward activate`.
#[derive(Debug, Args)]
pub(crate) struct ActivateArgs {
    /// Resource identifier (UUID).
    #[arg(value_name = "ID")]
    pub(crate) id: String,
    /// Prepare the deployment without running the site playbook.
    #[arg(long)]
    pub(crate) no_playbook: bool,
    /// Cluster network configuration as a JSON document.
    #[arg(long, value_name = "JSON")]
    pub(crate) network_config: Option<String>,
    /// Input-model server group.
    #[arg(long)]
    pub(crate) server_group: Option<String>,
    /// Input-model server role.
    #[arg(long)]
    pub(crate) server_role: Option<String>,
    /// Input-model NIC mapping.
    #[arg(long)]
    pub(crate) nic_mapping: Option<String>,
}

/// Arguments for `hostward deactivate`.
#[derive(Debug, Args)]
pub(crate) struct DeactivateArgs {
    /// Resource identifier (UUID).
    #[arg(value_name = "ID")]
    pub(crate) id: String,
    /// Skip the precondition checks and always clear bookkeeping.
    #[arg(long)]
    pub(crate) force: bool,
    /// Leave services running on the resource.
    #[arg(long)]
    pub(crate) no_playbook: bool,
}

/// Arguments for `hostward provision`.
#[derive(Debug, Args)]
pub(crate) struct ProvisionArgs {
    /// Resource identifier (UUID).
    #[arg(value_name = "ID")]
    pub(crate) id: String,
    /// Hypervisor kind the node becomes.
    #[arg(long, value_name = "KIND")]
    pub(crate) target_kind: String,
    /// Operating system to install; the install server's default otherwise.
    #[arg(long, value_name = "VERSION")]
    pub(crate) os_version: Option<String>,
}

/// Arguments for `hostward host-commission`.
#[derive(Debug, Args)]
pub(crate) struct HostCommissionArgs {
    /// Cluster identifier (UUID).
    #[arg(value_name = "ID")]
    pub(crate) id: String,
    /// Register the hosts without running the site playbook.
    #[arg(long)]
    pub(crate) no_playbook: bool,
}
