//! Resource kinds and lifecycle states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of resource kinds managed by the orchestrator.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// A virtualization cluster owned by a resource manager.
    Cluster,
    /// A Linux host running KVM.
    LinuxKvmHost,
    /// A Windows host running the Hyper-V role.
    WindowsHypervisorHost,
    /// A node with no operating system, reachable through its ILO.
    BareMetalNode,
}

impl ResourceKind {
    /// Every kind, in registry order.
    pub const ALL: [Self; 4] = [
        Self::Cluster,
        Self::LinuxKvmHost,
        Self::WindowsHypervisorHost,
        Self::BareMetalNode,
    ];

    /// Returns the wire tag for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::LinuxKvmHost => "linux-kvm-host",
            Self::WindowsHypervisorHost => "windows-hypervisor-host",
            Self::BareMetalNode => "bare-metal-node",
        }
    }

    /// Returns `true` for kinds that share the host name and address space.
    #[must_use]
    pub const fn is_host(self) -> bool {
        !matches!(self, Self::Cluster)
    }

    /// Kinds are comparable when their names must be unique together.
    #[must_use]
    pub const fn is_comparable_to(self, other: Self) -> bool {
        self.is_host() == other.is_host()
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a kind or state tag is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown {what}: {value}")]
pub struct ParseTagError {
    /// Which tag family failed to parse.
    pub what: &'static str,
    /// The rejected input.
    pub value: String,
}

impl FromStr for ResourceKind {
    type Err = ParseTagError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value.trim())
            .ok_or_else(|| ParseTagError {
                what: "resource kind",
                value: value.to_owned(),
            })
    }
}

/// Lifecycle state of a resource.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceState {
    /// Known to the system, not yet deployed.
    Imported,
    /// Provision accepted, background work not started.
    ProvisionInitiated,
    /// Operating system install in progress.
    Provisioning,
    /// Operating system installed, not a hypervisor yet.
    Provisioned,
    /// Activation accepted, background work not started.
    ActivationInitiated,
    /// Activation workflow running.
    Activating,
    /// Deployed as a hypervisor.
    Activated,
    /// Deactivation workflow running.
    Deactivating,
    /// Host commission accepted, background work not started.
    HostCommissionInitiated,
    /// Host commission workflow running.
    HostCommissioning,
    /// Delete in progress.
    Removing,
    /// Marked removed; only delete applies.
    Removed,
}

impl ResourceState {
    const ALL: [Self; 12] = [
        Self::Imported,
        Self::ProvisionInitiated,
        Self::Provisioning,
        Self::Provisioned,
        Self::ActivationInitiated,
        Self::Activating,
        Self::Activated,
        Self::Deactivating,
        Self::HostCommissionInitiated,
        Self::HostCommissioning,
        Self::Removing,
        Self::Removed,
    ];

    /// Returns the wire tag for this state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Imported => "imported",
            Self::ProvisionInitiated => "provision-initiated",
            Self::Provisioning => "provisioning",
            Self::Provisioned => "provisioned",
            Self::ActivationInitiated => "activation-initiated",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Deactivating => "deactivating",
            Self::HostCommissionInitiated => "host-commission-initiated",
            Self::HostCommissioning => "host-commissioning",
            Self::Removing => "removing",
            Self::Removed => "removed",
        }
    }

    /// Stable rest states; every other state has a workflow in flight.
    #[must_use]
    pub const fn is_stable(self) -> bool {
        matches!(
            self,
            Self::Imported | Self::Provisioned | Self::Activated | Self::Removed
        )
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceState {
    type Err = ParseTagError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == value.trim())
            .ok_or_else(|| ParseTagError {
                what: "resource state",
                value: value.to_owned(),
            })
    }
}

/// Kinds of upstream resource manager.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManagerKind {
    /// A vCenter-style virtualization manager.
    #[default]
    Vcenter,
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vcenter => f.write_str("vcenter"),
        }
    }
}
