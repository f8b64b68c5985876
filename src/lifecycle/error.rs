//! Error taxonomy of lifecycle operations.

use std::fmt;

use thiserror::Error;

use crate::compute::ComputeError;
use crate::facade::FacadeError;
use crate::inventory::InventoryError;
use crate::model::{ResourceId, ResourceKind, ResourceState};
use crate::remote::ShellError;
use crate::store::StoreError;

use super::Verb;

/// Workflow a [`LifecycleError::Failed`] or [`LifecycleError::Timeout`]
/// happened in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Resource or manager creation.
    Create,
    /// Resource or manager update.
    Update,
    /// Resource or manager deletion.
    Delete,
    /// Activation workflow.
    Activation,
    /// Deactivation workflow.
    Deactivation,
    /// Operating system provisioning.
    Provision,
    /// Cluster host commissioning.
    HostCommission,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Activation => "activation",
            Self::Deactivation => "deactivation",
            Self::Provision => "provision",
            Self::HostCommission => "host commission",
        })
    }
}

/// Errors surfaced by the orchestrator and its drivers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LifecycleError {
    /// Raised when caller input or a blocking check is rejected.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Raised when a verb is requested from a state outside its
    /// precondition set.
    #[error("cannot {verb} resource {id} in state {state} (allowed: {})", list_states(.allowed))]
    InvalidState {
        /// Resource the verb targeted.
        id: ResourceId,
        /// State the resource was in.
        state: ResourceState,
        /// Rejected verb.
        verb: Verb,
        /// States the verb accepts.
        allowed: Vec<ResourceState>,
    },
    /// Raised when a record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Record family.
        entity: &'static str,
        /// Requested identifier.
        id: String,
    },
    /// Raised when a request collides with existing records.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Raised when a kind has no implementation of a verb.
    #[error("{kind} resources do not support {verb}")]
    Unsupported {
        /// Resource kind.
        kind: ResourceKind,
        /// Rejected verb.
        verb: Verb,
    },
    /// Raised when a collaborator fails during a workflow.
    #[error("{operation} failed: {message}")]
    Failed {
        /// Workflow that failed.
        operation: Operation,
        /// Cause.
        message: String,
    },
    /// Raised when a remote job never finished.
    #[error("{operation} timed out: {message}")]
    Timeout {
        /// Workflow that timed out.
        operation: Operation,
        /// Cause.
        message: String,
    },
    /// Raised when the store cannot be read or written.
    #[error(transparent)]
    Store(StoreError),
}

/// Collaborator errors that can end a workflow.
pub trait Failure: fmt::Display {
    /// Returns `true` when the failure is an exhausted poll budget.
    fn is_timeout(&self) -> bool {
        false
    }
}

impl Failure for FacadeError {
    fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl Failure for ShellError {}
impl Failure for ComputeError {}
impl Failure for InventoryError {}

impl LifecycleError {
    /// Returns a mapper turning a collaborator error into a failure of
    /// `operation`.
    pub fn during<E: Failure>(operation: Operation) -> impl FnOnce(E) -> Self {
        move |err| {
            let message = err.to_string();
            if err.is_timeout() {
                Self::Timeout { operation, message }
            } else {
                Self::Failed { operation, message }
            }
        }
    }

    /// Builds a [`LifecycleError::Failed`].
    #[must_use]
    pub fn failed(operation: Operation, message: impl Into<String>) -> Self {
        Self::Failed {
            operation,
            message: message.into(),
        }
    }

    /// Returns `true` for errors caused by the request rather than the
    /// system, which an outer REST layer reports as 4xx.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InvalidState { .. }
                | Self::NotFound { .. }
                | Self::Conflict(_)
                | Self::Unsupported { .. }
        )
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Store(other),
        }
    }
}

fn list_states(states: &[ResourceState]) -> String {
    states
        .iter()
        .map(|state| state.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
