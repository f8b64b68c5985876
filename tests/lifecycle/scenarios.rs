//! BDD scenarios for the resource lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleWorld, lifecycle_world};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Activate a pre-imaged KVM host"
)]
fn scenario_activate_kvm_host(lifecycle_world: LifecycleWorld) {
    drop(lifecycle_world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Roll back a failed activation"
)]
fn scenario_rollback_activation(lifecycle_world: LifecycleWorld) {
    drop(lifecycle_world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Withdraw an activated host"
)]
fn scenario_withdraw_host(lifecycle_world: LifecycleWorld) {
    drop(lifecycle_world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Refuse verbs outside their preconditions"
)]
fn scenario_refuse_invalid_state(lifecycle_world: LifecycleWorld) {
    drop(lifecycle_world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Provision a bare-metal node as a KVM host"
)]
fn scenario_provision_node(lifecycle_world: LifecycleWorld) {
    drop(lifecycle_world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Import clusters from a resource manager"
)]
fn scenario_import_clusters(lifecycle_world: LifecycleWorld) {
    drop(lifecycle_world);
}
