//! Shared fixtures for lifecycle BDD scenarios.

use std::cell::RefCell;
use std::future::Future;

use hostward::test_support::TestRig;
use hostward::{LifecycleError, Resource, ResourceId};
use rstest::fixture;
use tokio::runtime::Runtime;

/// One scenario's orchestrator, doubles, and observations.
pub struct LifecycleWorld {
    pub rig: TestRig,
    runtime: Runtime,
    current: RefCell<Option<ResourceId>>,
    rejection: RefCell<Option<LifecycleError>>,
}

impl LifecycleWorld {
    fn new() -> Self {
        let runtime =
            Runtime::new().unwrap_or_else(|err| panic!("tokio runtime should start: {err}"));
        Self {
            rig: TestRig::new(),
            runtime,
            current: RefCell::new(None),
            rejection: RefCell::new(None),
        }
    }

    /// Runs `future` on the scenario runtime; background workflows it starts
    /// keep running on the runtime's workers.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn remember(&self, id: ResourceId) {
        self.current.replace(Some(id));
    }

    pub fn current(&self) -> ResourceId {
        self.current
            .borrow()
            .unwrap_or_else(|| panic!("no resource was registered in this scenario"))
    }

    pub fn stored(&self) -> Resource {
        let id = self.current();
        self.rig
            .store
            .get_resource(id)
            .unwrap_or_else(|err| panic!("resource {id} should be stored: {err}"))
    }

    /// Keeps the error of a refused verb for later assertions.
    pub fn record<T>(&self, result: Result<T, LifecycleError>) {
        if let Err(err) = result {
            self.rejection.replace(Some(err));
        }
    }

    pub fn rejection(&self) -> Option<LifecycleError> {
        self.rejection.borrow().clone()
    }

    pub fn drain(&self) {
        self.block_on(self.rig.orchestrator.drain());
    }
}

#[fixture]
pub fn lifecycle_world() -> LifecycleWorld {
    LifecycleWorld::new()
}
