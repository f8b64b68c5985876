//! BDD step definitions for resource lifecycle verbs.

use hostward::test_support::{TestRig, bare_metal_node, kvm_host, vcenter};
use hostward::{
    ActivationRequest, DeactivationRequest, LifecycleError, ProvisionRequest, ResourceFilter,
    ResourceKind, ResourceState,
};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::LifecycleWorld;

fn register_kvm(world: &LifecycleWorld, name: &str, address: &str) {
    let view = world
        .block_on(
            world
                .rig
                .orchestrator
                .create_resource(&TestRig::ctx(), kvm_host(name, address)),
        )
        .unwrap_or_else(|err| panic!("host {name} should register: {err}"));
    world.remember(view.id);
}

fn activate(world: &LifecycleWorld) {
    let id = world.current();
    let result = world.block_on(world.rig.orchestrator.activate(
        &TestRig::ctx(),
        id,
        ActivationRequest::default(),
    ));
    world.record(result);
}

#[given("a registered KVM host \"{name}\" at \"{address}\"")]
fn registered_kvm_host(lifecycle_world: &LifecycleWorld, name: String, address: String) {
    register_kvm(lifecycle_world, &name, &address);
}

#[given("an activated KVM host \"{name}\" at \"{address}\"")]
fn activated_kvm_host(lifecycle_world: &LifecycleWorld, name: String, address: String) {
    register_kvm(lifecycle_world, &name, &address);
    activate(lifecycle_world);
    lifecycle_world.drain();
    assert_eq!(lifecycle_world.stored().state, ResourceState::Activated);
}

#[given("a bare-metal node \"{name}\" at \"{address}\"")]
fn registered_node(lifecycle_world: &LifecycleWorld, name: String, address: String) {
    let view = lifecycle_world
        .block_on(
            lifecycle_world
                .rig
                .orchestrator
                .create_resource(&TestRig::ctx(), bare_metal_node(&name, &address)),
        )
        .unwrap_or_else(|err| panic!("node {name} should register: {err}"));
    lifecycle_world.remember(view.id);
}

#[given("the \"{playbook}\" playbook fails with exit code \"{code}\"")]
fn playbook_fails(lifecycle_world: &LifecycleWorld, playbook: String, code: i64) {
    lifecycle_world.rig.transport.fail_playbook(&playbook, code);
}

#[given("a resource manager \"{name}\" reporting cluster \"{cluster}\"")]
fn manager_with_cluster(lifecycle_world: &LifecycleWorld, name: String, cluster: String) {
    let rig = &lifecycle_world.rig;
    rig.inventory
        .add_cluster("domain-c7", &cluster, &["esx-1"], true);
    let manager = lifecycle_world
        .block_on(
            rig.orchestrator
                .create_manager(&TestRig::ctx(), vcenter(&name, "10.0.0.2")),
        )
        .unwrap_or_else(|err| panic!("manager {name} should register: {err}"));
    let owned = ResourceFilter {
        manager: Some(manager.id),
        ..ResourceFilter::default()
    };
    let clusters = rig
        .orchestrator
        .list_resources(&owned)
        .unwrap_or_else(|err| panic!("list should succeed: {err}"));
    let Some(imported) = clusters.first() else {
        panic!("manager {name} should import a cluster");
    };
    lifecycle_world.remember(imported.id);
}

#[when("I activate the resource")]
fn activate_resource(lifecycle_world: &LifecycleWorld) {
    activate(lifecycle_world);
}

#[when("I deactivate the resource")]
fn deactivate_resource(lifecycle_world: &LifecycleWorld) {
    let id = lifecycle_world.current();
    let result = lifecycle_world.block_on(lifecycle_world.rig.orchestrator.deactivate(
        &TestRig::ctx(),
        id,
        DeactivationRequest::default(),
    ));
    lifecycle_world.record(result);
}

#[when("I provision the node as a \"{kind}\"")]
fn provision_node(lifecycle_world: &LifecycleWorld, kind: String) {
    let target_kind: ResourceKind = kind
        .parse()
        .unwrap_or_else(|err| panic!("kind should parse: {err}"));
    let id = lifecycle_world.current();
    let orchestrator = &lifecycle_world.rig.orchestrator;
    let result = lifecycle_world.block_on(async {
        orchestrator.provision(
            &TestRig::ctx(),
            id,
            ProvisionRequest {
                target_kind,
                os_version: None,
            },
        )
    });
    lifecycle_world.record(result);
}

#[when("the background workflows finish")]
fn workflows_finish(lifecycle_world: &LifecycleWorld) {
    lifecycle_world.drain();
    assert_eq!(lifecycle_world.rig.orchestrator.in_flight(), 0);
}

#[then("the resource is \"{state}\"")]
fn resource_state(lifecycle_world: &LifecycleWorld, state: String) {
    let expected: ResourceState = state
        .parse()
        .unwrap_or_else(|err| panic!("state should parse: {err}"));
    assert_eq!(lifecycle_world.stored().state, expected);
}

#[then("the resource kind is \"{kind}\"")]
fn resource_kind(lifecycle_world: &LifecycleWorld, kind: String) {
    let expected: ResourceKind = kind
        .parse()
        .unwrap_or_else(|err| panic!("kind should parse: {err}"));
    assert_eq!(lifecycle_world.stored().kind, expected);
}

#[then("the resource is named \"{name}\"")]
fn resource_name(lifecycle_world: &LifecycleWorld, name: String) {
    assert_eq!(lifecycle_world.stored().name, name);
}

#[then("the facade lists server \"{id}\"")]
fn facade_lists_server(lifecycle_world: &LifecycleWorld, id: String) {
    let servers = lifecycle_world.rig.transport.server_ids();
    assert!(servers.contains(&id), "servers: {servers:?}");
}

#[then("the facade lists no servers")]
fn facade_lists_no_servers(lifecycle_world: &LifecycleWorld) {
    let servers = lifecycle_world.rig.transport.server_ids();
    assert!(servers.is_empty(), "servers: {servers:?}");
}

#[then("the request is rejected because of the resource state")]
fn rejected_for_state(lifecycle_world: &LifecycleWorld) {
    let rejection = lifecycle_world.rejection();
    assert!(
        matches!(rejection, Some(LifecycleError::InvalidState { .. })),
        "got {rejection:?}"
    );
}
