//! Verb transition tables.

use std::fmt;

use crate::model::ResourceState;

/// Caller-facing operations on a resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verb {
    /// Register a resource.
    Create,
    /// Change a resource's top-level fields.
    Update,
    /// Remove a resource.
    Delete,
    /// Deploy a resource as a hypervisor.
    Activate,
    /// Withdraw a resource from service.
    Deactivate,
    /// Install an operating system on a bare-metal node.
    Provision,
    /// Commission new hosts of an activated cluster.
    HostCommission,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Provision => "provision",
            Self::HostCommission => "host-commission",
        })
    }
}

/// States a two-phase verb moves through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Transition {
    /// States the verb may start from.
    pub preconditions: &'static [ResourceState],
    /// State persisted by phase one.
    pub initiated: ResourceState,
    /// State persisted when phase two starts.
    pub running: ResourceState,
}

pub(crate) const ACTIVATE: Transition = Transition {
    preconditions: &[ResourceState::Imported, ResourceState::Provisioned],
    initiated: ResourceState::ActivationInitiated,
    running: ResourceState::Activating,
};

pub(crate) const DEACTIVATE: Transition = Transition {
    preconditions: &[ResourceState::Provisioned, ResourceState::Activated],
    initiated: ResourceState::Deactivating,
    running: ResourceState::Deactivating,
};

pub(crate) const PROVISION: Transition = Transition {
    preconditions: &[ResourceState::Imported],
    initiated: ResourceState::ProvisionInitiated,
    running: ResourceState::Provisioning,
};

pub(crate) const HOST_COMMISSION: Transition = Transition {
    preconditions: &[ResourceState::Activated],
    initiated: ResourceState::HostCommissionInitiated,
    running: ResourceState::HostCommissioning,
};

/// States an update may be applied in.
pub const UPDATABLE: &[ResourceState] = &[
    ResourceState::Imported,
    ResourceState::Provisioned,
    ResourceState::Activated,
];

impl Verb {
    /// Returns the two-phase transition of this verb, if it has one.
    #[must_use]
    pub const fn transition(self) -> Option<Transition> {
        match self {
            Self::Activate => Some(ACTIVATE),
            Self::Deactivate => Some(DEACTIVATE),
            Self::Provision => Some(PROVISION),
            Self::HostCommission => Some(HOST_COMMISSION),
            Self::Create | Self::Update | Self::Delete => None,
        }
    }
}

/// State a deactivation lands in.
///
/// A resource that was never activated keeps its provisioned state.
/// Otherwise the state recorded at activation wins, falling back to the
/// kind's initial state when the record is missing.
#[must_use]
pub fn deactivated_state(
    previous: ResourceState,
    activated_from: Option<ResourceState>,
    initial: ResourceState,
) -> ResourceState {
    if previous == ResourceState::Provisioned {
        return ResourceState::Provisioned;
    }
    activated_from
        .filter(|state| matches!(state, ResourceState::Imported | ResourceState::Provisioned))
        .unwrap_or(initial)
}
