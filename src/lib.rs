//! Core library for the Hostward resource lifecycle orchestrator.
//!
//! The crate tracks cloud resources (hypervisor hosts, clusters imported from
//! a resource manager, and bare-metal nodes) and drives them through their
//! lifecycle (register → activate → deactivate → delete) by talking to a
//! remote configuration facade, the hosts themselves over SSH, a compute
//! service, and the resource manager's inventory API.
//!
//! [`Orchestrator`] is the entry point. Kind-specific work lives behind the
//! [`driver::Driver`] trait.

pub mod compute;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod driver;
pub mod facade;
pub mod inventory;
pub mod lifecycle;
pub mod model;
pub mod remote;
pub mod store;
pub mod test_support;

pub use config::{ComputeConfig, ConfigError, FacadeConfig, ShellConfig, StoreConfig};
pub use context::RequestContext;
pub use driver::{Collaborators, Driver, DriverSettings};
pub use facade::{FacadeClient, FacadeError, FacadePolicies};
pub use lifecycle::{
    ActivationRequest, DeactivationRequest, HostCommissionRequest, LifecycleError,
    LifecycleEvent, Orchestrator, Outcome, ProvisionRequest, ResourceDetail,
};
pub use model::{
    ManagerId, NewManager, NewResource, Resource, ResourceId, ResourceKind, ResourceManager,
    ResourceState, Secret,
};
pub use store::{MemoryStore, ResourceFilter, SnapshotFile, StoreError};
