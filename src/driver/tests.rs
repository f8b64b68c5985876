//! Unit tests for the lifecycle drivers.

use std::collections::BTreeMap;

use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;
use crate::facade::Method;
use crate::lifecycle::Operation;
use crate::model::{NewResource, ResourceId, ResourceState, Secret, keys};
use crate::store::ResourceFilter;
use crate::test_support::{TestRig, bare_metal_node, hyperv_host, kvm_host, vcenter};

const KVM_ADDRESS: &str = "10.0.0.5";
const HYPERV_ADDRESS: &str = "10.0.0.6";

#[fixture]
fn rig() -> TestRig {
    TestRig::new()
}

fn resource(kind: ResourceKind, state: ResourceState) -> Resource {
    Resource {
        id: ResourceId::generate(),
        name: String::from("host-1"),
        kind,
        state,
        address: String::from("10.0.0.9"),
        username: String::from("stack"),
        password: Secret::new("host-secret"),
        port: None,
        resource_manager_id: None,
        properties: Vec::new(),
    }
}

async fn stored(rig: &TestRig, input: NewResource) -> Resource {
    let view = rig
        .orchestrator
        .create_resource(&TestRig::ctx(), input)
        .await
        .unwrap_or_else(|err| panic!("create should succeed: {err}"));
    rig.store
        .get_resource(view.id)
        .unwrap_or_else(|err| panic!("resource should be stored: {err}"))
}

fn context(rig: &TestRig) -> DriverContext {
    rig.orchestrator.driver_context(&TestRig::ctx())
}

fn reload(rig: &TestRig, id: ResourceId) -> Resource {
    rig.store
        .get_resource(id)
        .unwrap_or_else(|err| panic!("resource should be stored: {err}"))
}

async fn imported_cluster(rig: &TestRig, shared_datastore: bool) -> Resource {
    rig.inventory
        .add_cluster("domain-c7", "prod", &["esx-1"], shared_datastore);
    rig.orchestrator
        .create_manager(&TestRig::ctx(), vcenter("vc-1", "10.0.0.2"))
        .await
        .unwrap_or_else(|err| panic!("manager should register: {err}"));
    let filter = ResourceFilter {
        kind: Some(ResourceKind::Cluster),
        ..ResourceFilter::default()
    };
    let clusters = rig
        .store
        .list_resources(&filter)
        .unwrap_or_else(|err| panic!("list should succeed: {err}"));
    let Some(cluster) = clusters.into_iter().next() else {
        panic!("the manager's cluster should be imported");
    };
    cluster
}

fn network() -> ActivationRequest {
    ActivationRequest {
        network_config: Some(json!({ "vlan": 120 })),
        ..ActivationRequest::default()
    }
}

#[rstest]
fn registry_serves_every_kind() {
    let registry = DriverRegistry::new();
    for kind in ResourceKind::ALL {
        assert_eq!(registry.driver(kind).kind(), kind);
    }
}

#[rstest]
#[case(ResourceKind::Cluster, ResourceState::Imported)]
#[case(ResourceKind::LinuxKvmHost, ResourceState::Provisioned)]
#[case(ResourceKind::WindowsHypervisorHost, ResourceState::Provisioned)]
#[case(ResourceKind::BareMetalNode, ResourceState::Imported)]
fn kinds_start_in_their_initial_state(#[case] kind: ResourceKind, #[case] state: ResourceState) {
    assert_eq!(DriverRegistry::new().driver(kind).initial_state(), state);
}

#[rstest]
#[case(ResourceKind::LinuxKvmHost, ResourceState::Provisioned, true)]
#[case(ResourceKind::LinuxKvmHost, ResourceState::Activated, false)]
#[case(ResourceKind::Cluster, ResourceState::Imported, true)]
#[case(ResourceKind::Cluster, ResourceState::Provisioned, false)]
#[case(ResourceKind::BareMetalNode, ResourceState::Provisioning, false)]
fn deletion_is_limited_to_resting_states(
    #[case] kind: ResourceKind,
    #[case] state: ResourceState,
    #[case] allowed: bool,
) {
    let target = resource(kind, state);
    let outcome = DriverRegistry::new().driver(kind).validate_delete(&target);
    assert_eq!(outcome.is_ok(), allowed, "got {outcome:?}");
    if let Err(err) = outcome {
        assert!(
            matches!(err, LifecycleError::InvalidState { verb: Verb::Delete, .. }),
            "got {err:?}"
        );
    }
}

#[rstest]
fn picked_properties_are_trimmed_and_filtered() {
    let mut input = kvm_host("kvm-1", KVM_ADDRESS);
    input.properties = BTreeMap::from([
        (keys::SERVER_GROUP.to_owned(), String::from(" rack-1 ")),
        (keys::NIC_MAPPING.to_owned(), String::from("  ")),
        (String::from("colour"), String::from("blue")),
    ]);

    let picked = KvmDriver.get_properties(&input);

    assert_eq!(
        picked,
        vec![(keys::SERVER_GROUP.to_owned(), String::from("rack-1"))]
    );
}

#[rstest]
fn server_ids_prefer_the_recorded_value() {
    let mut target = resource(ResourceKind::LinuxKvmHost, ResourceState::Provisioned);
    target.name = String::from("KVM Host_01");
    assert_eq!(model::server_id(&target), "kvm-host-01");

    target.set_property(keys::SERVER_ID, "compute-0007");
    assert_eq!(model::server_id(&target), "compute-0007");
}

#[rstest]
fn pass_through_entries_toggle_the_managed_flag() {
    let data = json!({ "vmware": { "cluster_moid": "domain-c7" } });

    let added = model::with_pass_through(&json!({}), "prod", Some(&data));
    assert_eq!(
        added,
        json!({
            "servers": [{ "id": "prod", "data": data }],
            "global": { "esx_cloud": true },
        })
    );

    let removed = model::with_pass_through(&added, "prod", None);
    assert_eq!(
        removed,
        json!({ "servers": [], "global": { "esx_cloud": false } })
    );
}

#[rstest]
#[tokio::test]
async fn kvm_activation_deploys_and_records_ids(rig: TestRig) {
    let host = stored(&rig, kvm_host("kvm-1", KVM_ADDRESS)).await;
    let ctx = context(&rig);

    KvmDriver
        .activate(&ctx, &host, &ActivationRequest::default())
        .await
        .unwrap_or_else(|err| panic!("activation should succeed: {err}"));

    assert_eq!(
        rig.transport.lines(),
        vec![
            String::from("GET /api/v2/model/entities/servers"),
            String::from("POST /api/v2/model/entities/servers"),
            String::from("POST /api/v2/model/commit"),
            String::from("POST /api/v2/config_processor"),
            String::from("POST /api/v2/playbooks/ready_deployment"),
            String::from("GET /api/v2/plays/ready_deployment"),
            String::from("POST /api/v2/playbooks/site"),
            String::from("GET /api/v2/plays/site"),
        ]
    );
    assert_eq!(rig.transport.server_ids(), vec![String::from("kvm-1")]);
    let entry = rig
        .transport
        .server("kvm-1")
        .unwrap_or_else(|| panic!("server entry should exist"));
    assert_eq!(entry.get("role"), Some(&json!(kvm::DEFAULT_ROLE)));
    let updated = reload(&rig, host.id);
    assert_eq!(updated.property(keys::SERVER_ID), Some("kvm-1"));
    assert_eq!(updated.property(keys::HYPERVISOR_ID), Some("hv-kvm-1"));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn losing_the_record_after_deployment_removes_the_server_entry(rig: TestRig) {
    let host = stored(&rig, kvm_host("kvm-1", KVM_ADDRESS)).await;
    let ctx = context(&rig);
    let driver = KvmDriver;
    rig.transport.hold(Method::Post, "/api/v2/playbooks/site");

    let request = ActivationRequest::default();
    let activation = driver.activate(&ctx, &host, &request);
    let removal = async {
        assert!(
            rig.transport
                .wait_for("GET /api/v2/plays/ready_deployment", 1_000)
                .await,
            "deployment should reach ready_deployment"
        );
        let mut session = rig
            .store
            .session("remove")
            .unwrap_or_else(|err| panic!("open session: {err}"));
        session
            .remove_resource(host.id)
            .unwrap_or_else(|err| panic!("remove resource: {err}"));
        session.commit();
        rig.transport.release();
    };
    let (result, ()) = tokio::join!(activation, removal);

    let err = result.expect_err("a vanished record should fail the activation");
    assert!(matches!(err, LifecycleError::NotFound { .. }), "got {err:?}");
    assert!(
        rig.transport
            .lines()
            .contains(&String::from("DELETE /api/v2/model/entities/servers/kvm-1"))
    );
    assert!(rig.transport.server_ids().is_empty());
}

#[rstest]
#[tokio::test]
async fn skipping_the_site_playbook_only_prepares_the_deployment(rig: TestRig) {
    let host = stored(&rig, kvm_host("kvm-1", KVM_ADDRESS)).await;
    let request = ActivationRequest {
        run_playbook: false,
        ..ActivationRequest::default()
    };

    KvmDriver
        .activate(&context(&rig), &host, &request)
        .await
        .unwrap_or_else(|err| panic!("activation should succeed: {err}"));

    assert!(
        !rig.transport
            .lines()
            .contains(&String::from("POST /api/v2/playbooks/site"))
    );
}

#[rstest]
#[tokio::test]
async fn failed_site_playbook_rolls_the_model_back(rig: TestRig) {
    let host = stored(&rig, kvm_host("kvm-1", KVM_ADDRESS)).await;
    rig.transport.fail_playbook("site", 2);

    let err = KvmDriver
        .activate(&context(&rig), &host, &ActivationRequest::default())
        .await
        .expect_err("activation should fail");

    assert!(
        matches!(
            err,
            LifecycleError::Failed {
                operation: Operation::Activation,
                ..
            }
        ),
        "got {err:?}"
    );
    let lines = rig.transport.lines();
    assert!(lines.contains(&String::from("DELETE /api/v2/model/changes")));
    assert!(lines.contains(&String::from(
        "DELETE /api/v2/model/entities/servers/kvm-1"
    )));
    assert!(rig.transport.server_ids().is_empty());
    assert_eq!(reload(&rig, host.id).property(keys::SERVER_ID), None);
}

#[rstest]
#[tokio::test]
async fn hosts_that_never_register_are_removed_again(rig: TestRig) {
    let host = stored(&rig, kvm_host("kvm-1", KVM_ADDRESS)).await;
    rig.compute.never_register();

    let err = KvmDriver
        .activate(&context(&rig), &host, &ActivationRequest::default())
        .await
        .expect_err("activation should fail");

    assert!(err.to_string().contains("did not register"), "got {err}");
    assert_eq!(rig.compute.lookups("kvm-1"), 3);
    assert!(rig.transport.server_ids().is_empty());
}

#[rstest]
#[tokio::test]
async fn late_registration_is_still_recorded(rig: TestRig) {
    let host = stored(&rig, kvm_host("kvm-1", KVM_ADDRESS)).await;
    rig.compute.register_after(2);

    KvmDriver
        .activate(&context(&rig), &host, &ActivationRequest::default())
        .await
        .unwrap_or_else(|err| panic!("activation should succeed: {err}"));

    assert_eq!(rig.compute.lookups("kvm-1"), 3);
    assert_eq!(
        reload(&rig, host.id).property(keys::HYPERVISOR_ID),
        Some("hv-kvm-1")
    );
}

#[rstest]
#[case(kvm::OS_RELEASE, "NAME=Ubuntu\nID=ubuntu\n", "unsupported operating system")]
#[case(kvm::LIST_VMS, "guest-1\nguest-2\n", "already hosts 2 virtual machines")]
#[case(kvm::CLOCK, "0", "away from ours")]
#[tokio::test]
async fn kvm_checks_block_activation(
    rig: TestRig,
    #[case] command: &str,
    #[case] answer: &str,
    #[case] reason: &str,
) {
    let host = stored(&rig, kvm_host("kvm-1", KVM_ADDRESS)).await;
    rig.shells.respond(KVM_ADDRESS, command, answer);

    let err = KvmDriver
        .pre_activation_steps(&context(&rig), &host, &ActivationRequest::default())
        .await
        .expect_err("check should block");

    let LifecycleError::Validation(message) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert!(message.contains(reason), "got {message}");
}

#[rstest]
#[tokio::test]
async fn healthy_kvm_hosts_pass_every_check(rig: TestRig) {
    let host = stored(&rig, kvm_host("kvm-1", KVM_ADDRESS)).await;

    KvmDriver
        .pre_activation_steps(&context(&rig), &host, &ActivationRequest::default())
        .await
        .unwrap_or_else(|err| panic!("checks should pass: {err}"));

    let commands: Vec<String> = rig
        .shells
        .commands()
        .into_iter()
        .map(|(_, command)| command)
        .collect();
    assert_eq!(
        commands,
        vec![
            kvm::OS_RELEASE.to_owned(),
            kvm::LIST_VMS.to_owned(),
            kvm::CLOCK.to_owned(),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn unreachable_hosts_fail_the_checks(rig: TestRig) {
    let host = stored(&rig, kvm_host("kvm-1", KVM_ADDRESS)).await;
    rig.shells.set_unreachable(KVM_ADDRESS);

    let err = KvmDriver
        .pre_activation_steps(&context(&rig), &host, &ActivationRequest::default())
        .await
        .expect_err("check should fail");

    assert!(
        matches!(
            err,
            LifecycleError::Failed {
                operation: Operation::Activation,
                ..
            }
        ),
        "got {err:?}"
    );
}

#[rstest]
#[case(hyperv::OS_CAPTION, "Microsoft Windows 10 Pro", "unsupported edition")]
#[case(hyperv::HYPERV_ROLE, "False", "Hyper-V role")]
#[tokio::test]
async fn hyperv_checks_block_activation(
    rig: TestRig,
    #[case] command: &str,
    #[case] answer: &str,
    #[case] reason: &str,
) {
    let host = stored(&rig, hyperv_host("hv-1", HYPERV_ADDRESS)).await;
    rig.shells.respond(HYPERV_ADDRESS, command, answer);

    let err = HypervDriver
        .pre_activation_steps(&context(&rig), &host, &ActivationRequest::default())
        .await
        .expect_err("check should block");

    let LifecycleError::Validation(message) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert!(message.contains(reason), "got {message}");
}

#[rstest]
#[tokio::test]
async fn hyperv_advisories_do_not_block(rig: TestRig) {
    let host = stored(&rig, hyperv_host("hv-1", HYPERV_ADDRESS)).await;
    rig.shells.respond(HYPERV_ADDRESS, hyperv::VM_COUNT, "3");
    rig.shells.respond(HYPERV_ADDRESS, hyperv::CLOCK, "0");

    HypervDriver
        .pre_activation_steps(&context(&rig), &host, &ActivationRequest::default())
        .await
        .unwrap_or_else(|err| panic!("advisories should not block: {err}"));
}

#[rstest]
#[tokio::test]
async fn busy_hypervisors_refuse_deactivation(rig: TestRig) {
    let mut host = resource(ResourceKind::LinuxKvmHost, ResourceState::Activated);
    host.set_property(keys::HYPERVISOR_ID, "hv-host-1");
    rig.compute.set_running_vms("host-1", 2);

    let err = KvmDriver
        .pre_deactivation_steps(&context(&rig), &host, &DeactivationRequest::default())
        .await
        .expect_err("busy host should refuse");

    assert!(
        matches!(
            err,
            LifecycleError::Failed {
                operation: Operation::Deactivation,
                ref message,
            } if message.contains("2 instances")
        ),
        "got {err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn idle_hypervisors_may_deactivate(rig: TestRig) {
    let mut host = resource(ResourceKind::WindowsHypervisorHost, ResourceState::Activated);
    host.set_property(keys::HYPERVISOR_ID, "hv-host-1");

    HypervDriver
        .pre_deactivation_steps(&context(&rig), &host, &DeactivationRequest::default())
        .await
        .unwrap_or_else(|err| panic!("idle host should deactivate: {err}"));
}

#[rstest]
#[tokio::test]
async fn host_deactivation_stops_services_before_removal(rig: TestRig) {
    let host = stored(&rig, kvm_host("kvm-1", KVM_ADDRESS)).await;
    let ctx = context(&rig);
    KvmDriver
        .activate(&ctx, &host, &ActivationRequest::default())
        .await
        .unwrap_or_else(|err| panic!("activation should succeed: {err}"));
    let activated = reload(&rig, host.id);
    let before = rig.transport.lines().len();

    KvmDriver
        .deactivate(&ctx, &activated, &DeactivationRequest::default())
        .await
        .unwrap_or_else(|err| panic!("deactivation should succeed: {err}"));

    let lines = rig.transport.lines();
    let Some(withdrawal) = lines.get(before..) else {
        panic!("deactivation should issue requests");
    };
    assert_eq!(
        withdrawal.first(),
        Some(&String::from("POST /api/v2/playbooks/hlm_stop"))
    );
    assert!(withdrawal.contains(&String::from(
        "DELETE /api/v2/model/entities/servers/kvm-1"
    )));
    assert!(rig.transport.server_ids().is_empty());
}

#[rstest]
#[tokio::test]
async fn cluster_activation_needs_network_configuration(rig: TestRig) {
    let cluster = imported_cluster(&rig, true).await;

    let err = ClusterDriver
        .pre_activation_steps(&context(&rig), &cluster, &ActivationRequest::default())
        .await
        .expect_err("missing network should block");

    assert!(err.to_string().contains("no network configuration"), "got {err}");
}

#[rstest]
#[tokio::test]
async fn unshared_datastores_only_warn(rig: TestRig) {
    let cluster = imported_cluster(&rig, false).await;

    ClusterDriver
        .pre_activation_steps(&context(&rig), &cluster, &network())
        .await
        .unwrap_or_else(|err| panic!("advisory should not block: {err}"));
}

#[rstest]
#[tokio::test]
async fn cluster_activation_writes_pass_through_data(rig: TestRig) {
    let cluster = imported_cluster(&rig, true).await;

    ClusterDriver
        .activate(&context(&rig), &cluster, &network())
        .await
        .unwrap_or_else(|err| panic!("activation should succeed: {err}"));

    let entity = rig
        .transport
        .entity(model::PASS_THROUGH)
        .unwrap_or_else(|| panic!("pass-through entity should be written"));
    assert_eq!(
        entity.pointer("/global/esx_cloud"),
        Some(&Value::Bool(true))
    );
    assert_eq!(
        entity.pointer("/servers/0/data/vmware/cluster_moid"),
        Some(&json!("domain-c7"))
    );
    assert_eq!(
        entity.pointer("/servers/0/data/vmware/network"),
        Some(&json!({ "vlan": 120 }))
    );
    let updated = reload(&rig, cluster.id);
    assert_eq!(updated.property(keys::SERVER_ID), Some("prod"));
    assert_eq!(updated.property(keys::COMMISSIONED_HOSTS), Some("[\"esx-1\"]"));
}

/// Cluster driver whose post-activation steps always fail.
struct FailingFollowUp {
    inner: ClusterDriver,
}

impl Driver for FailingFollowUp {
    fn kind(&self) -> ResourceKind {
        self.inner.kind()
    }

    fn initial_state(&self) -> ResourceState {
        self.inner.initial_state()
    }

    fn deletable_states(&self) -> &'static [ResourceState] {
        self.inner.deletable_states()
    }

    fn bookkeeping_keys(&self) -> &'static [&'static str] {
        self.inner.bookkeeping_keys()
    }

    fn validate_create<'a>(
        &'a self,
        ctx: &'a DriverContext,
        data: NewResource,
    ) -> DriverFuture<'a, NewResource> {
        self.inner.validate_create(ctx, data)
    }

    fn validate_update<'a>(
        &'a self,
        ctx: &'a DriverContext,
        current: &'a Resource,
        proposed: &'a Resource,
    ) -> DriverFuture<'a, ()> {
        self.inner.validate_update(ctx, current, proposed)
    }

    fn get_properties(&self, data: &NewResource) -> Vec<(String, String)> {
        self.inner.get_properties(data)
    }

    fn get_inventory<'a>(
        &'a self,
        ctx: &'a DriverContext,
        resource: &'a Resource,
    ) -> DriverFuture<'a, Value> {
        self.inner.get_inventory(ctx, resource)
    }

    fn post_activation_steps<'a>(
        &'a self,
        _ctx: &'a DriverContext,
        resource: &'a Resource,
        _request: &'a ActivationRequest,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            Err(LifecycleError::failed(
                Operation::Activation,
                format!("follow-up for {} failed", resource.name),
            ))
        })
    }
}

#[rstest]
#[tokio::test]
async fn cluster_follow_up_failures_remove_pass_through_data(rig: TestRig) {
    let cluster = imported_cluster(&rig, true).await;
    let driver = FailingFollowUp {
        inner: ClusterDriver,
    };

    let err = super::cluster::activate(&driver, &context(&rig), &cluster, &network())
        .await
        .expect_err("a failed follow-up should fail the activation");

    assert!(
        matches!(
            err,
            LifecycleError::Failed {
                operation: Operation::Activation,
                ..
            }
        ),
        "got {err:?}"
    );
    let entity = rig
        .transport
        .entity(model::PASS_THROUGH)
        .unwrap_or_else(|| panic!("pass-through entity should be written"));
    assert_eq!(entity.pointer("/servers"), Some(&json!([])));
    assert_eq!(
        entity.pointer("/global/esx_cloud"),
        Some(&Value::Bool(false))
    );
}

#[rstest]
#[tokio::test]
async fn host_commission_needs_new_hosts(rig: TestRig) {
    let cluster = imported_cluster(&rig, true).await;
    let ctx = context(&rig);
    ClusterDriver
        .activate(&ctx, &cluster, &network())
        .await
        .unwrap_or_else(|err| panic!("activation should succeed: {err}"));
    let activated = reload(&rig, cluster.id);

    let err = ClusterDriver
        .pre_host_commission_steps(&ctx, &activated, &HostCommissionRequest::default())
        .await
        .expect_err("no new hosts should refuse");
    assert!(err.to_string().contains("no new hosts"), "got {err}");

    rig.inventory.add_host("domain-c7", "esx-2");
    ClusterDriver
        .host_commission(&ctx, &activated, &HostCommissionRequest::default())
        .await
        .unwrap_or_else(|err| panic!("commission should succeed: {err}"));

    let site = rig
        .transport
        .requests()
        .into_iter()
        .rev()
        .find(|request| request.line() == "POST /api/v2/playbooks/site")
        .unwrap_or_else(|| panic!("site playbook should run"));
    assert_eq!(
        site.body,
        Some(json!({ "limit": "prod", "extra-vars": { "hosts": ["esx-2"] } }))
    );
    assert_eq!(
        reload(&rig, cluster.id).property(keys::COMMISSIONED_HOSTS),
        Some("[\"esx-1\",\"esx-2\"]")
    );
}

#[rstest]
#[tokio::test]
async fn bare_metal_provisioning_installs_then_releases_the_entry(rig: TestRig) {
    let node = stored(&rig, bare_metal_node("node-1", "10.0.0.7")).await;
    let request = ProvisionRequest {
        target_kind: ResourceKind::LinuxKvmHost,
        os_version: Some(String::from("rhel75")),
    };

    BareMetalDriver
        .provision(&context(&rig), &node, &request)
        .await
        .unwrap_or_else(|err| panic!("provision should succeed: {err}"));

    let requests = rig.transport.requests();
    let Some(added) = requests
        .iter()
        .find(|request| request.method == Method::Post && request.line().ends_with("/servers"))
    else {
        panic!("server entry should be added");
    };
    let body = added.body.clone().unwrap_or_default();
    assert_eq!(body.get("role"), Some(&json!(kvm::DEFAULT_ROLE)));
    assert_eq!(body.get("ilo-password"), Some(&json!("ilo-secret")));
    assert_eq!(body.get("mac-addr"), Some(&json!("52:54:00:12:34:56")));
    let lines = rig.transport.lines();
    assert!(lines.contains(&String::from("POST /api/v2/playbooks/cobbler_deploy")));
    assert!(lines.contains(&String::from("POST /api/v2/osinstall")));
    assert!(rig.transport.server_ids().is_empty());
    assert_eq!(reload(&rig, node.id).property(keys::OS_VERSION), Some("rhel75"));
}

#[rstest]
#[tokio::test]
async fn failed_installs_remove_the_entry(rig: TestRig) {
    let node = stored(&rig, bare_metal_node("node-1", "10.0.0.7")).await;
    rig.transport.push_response(
        Method::Get,
        "/api/v2/osinstall",
        200,
        json!({ "servers": { "node-1": "error" } }),
    );
    let request = ProvisionRequest {
        target_kind: ResourceKind::WindowsHypervisorHost,
        os_version: None,
    };

    let err = BareMetalDriver
        .provision(&context(&rig), &node, &request)
        .await
        .expect_err("provision should fail");

    assert!(
        matches!(
            err,
            LifecycleError::Failed {
                operation: Operation::Provision,
                ..
            }
        ),
        "got {err:?}"
    );
    assert!(rig.transport.server_ids().is_empty());
}

#[rstest]
#[tokio::test]
async fn bare_metal_nodes_need_ilo_details(rig: TestRig) {
    let mut input = bare_metal_node("node-1", "10.0.0.7");
    input.properties.remove(keys::ILO_USER);

    let err = BareMetalDriver
        .validate_create(&context(&rig), input)
        .await
        .expect_err("missing ILO user should be rejected");

    assert!(err.to_string().contains(keys::ILO_USER), "got {err}");
}

#[rstest]
#[tokio::test]
async fn unsupported_verbs_name_the_kind(rig: TestRig) {
    let cluster = resource(ResourceKind::Cluster, ResourceState::Imported);
    let request = ProvisionRequest {
        target_kind: ResourceKind::LinuxKvmHost,
        os_version: None,
    };

    let err = ClusterDriver
        .provision(&context(&rig), &cluster, &request)
        .await
        .expect_err("clusters cannot be provisioned");

    assert_eq!(
        err,
        LifecycleError::Unsupported {
            kind: ResourceKind::Cluster,
            verb: Verb::Provision,
        }
    );
}

#[rstest]
#[tokio::test]
async fn host_inventory_reports_the_hypervisor(rig: TestRig) {
    let mut host = resource(ResourceKind::LinuxKvmHost, ResourceState::Activated);
    host.set_property(keys::SERVER_ID, "host-1");
    host.set_property(keys::HYPERVISOR_ID, "hv-host-1");
    rig.compute.set_running_vms("host-1", 4);

    let inventory = KvmDriver
        .get_inventory(&context(&rig), &host)
        .await
        .unwrap_or_else(|err| panic!("inventory should load: {err}"));

    assert_eq!(
        inventory,
        json!({
            "server_id": "host-1",
            "hypervisor": { "id": "hv-host-1", "running_vms": 4 },
        })
    );
}
