//! Tests for transactional sessions and snapshot persistence.

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::model::{ManagerKind, Secret};

fn resource(name: &str, kind: ResourceKind, state: ResourceState) -> Resource {
    Resource {
        id: ResourceId::generate(),
        name: name.to_owned(),
        kind,
        state,
        address: String::from("10.0.0.1"),
        username: String::from("root"),
        password: Secret::new("pw"),
        port: None,
        resource_manager_id: None,
        properties: Vec::new(),
    }
}

#[fixture]
fn seeded() -> (MemoryStore, ResourceId) {
    let store = MemoryStore::new();
    let record = resource("kvm-1", ResourceKind::LinuxKvmHost, ResourceState::Provisioned);
    let id = record.id;
    let mut session = store
        .session("seed")
        .unwrap_or_else(|err| panic!("open session: {err}"));
    session.put_resource(record);
    session.commit();
    (store, id)
}

#[rstest]
fn committed_session_is_visible(seeded: (MemoryStore, ResourceId)) {
    let (store, id) = seeded;

    let loaded = store
        .get_resource(id)
        .unwrap_or_else(|err| panic!("load resource: {err}"));

    assert_eq!(loaded.name, "kvm-1");
}

#[rstest]
fn dropped_session_discards_every_staged_change(seeded: (MemoryStore, ResourceId)) {
    let (store, id) = seeded;
    {
        let mut session = store
            .session("abandoned")
            .unwrap_or_else(|err| panic!("open session: {err}"));
        session
            .resource_mut(id)
            .unwrap_or_else(|err| panic!("stage resource: {err}"))
            .state = ResourceState::Activating;
        session
            .set_property(id, "server_id", "kvm-1")
            .unwrap_or_else(|err| panic!("stage property: {err}"));
    }

    let loaded = store
        .get_resource(id)
        .unwrap_or_else(|err| panic!("load resource: {err}"));
    assert_eq!(loaded.state, ResourceState::Provisioned);
    assert!(loaded.properties.is_empty());
}

#[rstest]
fn set_property_replaces_every_value(seeded: (MemoryStore, ResourceId)) {
    let (store, id) = seeded;
    let mut session = store
        .session("dup")
        .unwrap_or_else(|err| panic!("open session: {err}"));
    for value in ["a", "b"] {
        session
            .create_property(id, "server_group", value)
            .unwrap_or_else(|err| panic!("create property: {err}"));
    }
    session.commit();

    store
        .set_property(id, "server_group", "c")
        .unwrap_or_else(|err| panic!("set property: {err}"));

    let loaded = store
        .get_resource(id)
        .unwrap_or_else(|err| panic!("load resource: {err}"));
    let values: Vec<_> = loaded
        .properties
        .iter()
        .filter(|p| p.key == "server_group")
        .map(|p| p.value.as_str())
        .collect();
    assert_eq!(values, vec!["c"]);
}

#[rstest]
fn delete_properties_counts_removed_records(seeded: (MemoryStore, ResourceId)) {
    let (store, id) = seeded;
    store
        .set_property(id, "server_id", "kvm-1")
        .unwrap_or_else(|err| panic!("set property: {err}"));
    store
        .set_property(id, "hypervisor_id", "7")
        .unwrap_or_else(|err| panic!("set property: {err}"));

    let removed = store
        .delete_properties(id, &["server_id", "hypervisor_id", "absent"])
        .unwrap_or_else(|err| panic!("delete properties: {err}"));

    assert_eq!(removed, 2);
}

#[test]
fn missing_resource_is_not_found() {
    let store = MemoryStore::new();
    let id = ResourceId::generate();

    let err = store.get_resource(id).expect_err("nothing stored");

    assert_eq!(
        err,
        StoreError::NotFound {
            entity: "resource",
            id: id.to_string(),
        }
    );
}

#[rstest]
#[case(ResourceFilter { kind: Some(ResourceKind::Cluster), ..ResourceFilter::default() }, 1)]
#[case(ResourceFilter { state: Some(ResourceState::Imported), ..ResourceFilter::default() }, 2)]
#[case(ResourceFilter::default(), 3)]
fn list_applies_filters(#[case] filter: ResourceFilter, #[case] expected: usize) {
    let store = MemoryStore::new();
    let mut session = store
        .session("seed")
        .unwrap_or_else(|err| panic!("open session: {err}"));
    session.put_resource(resource("c1", ResourceKind::Cluster, ResourceState::Imported));
    session.put_resource(resource("n1", ResourceKind::BareMetalNode, ResourceState::Imported));
    session.put_resource(resource(
        "k1",
        ResourceKind::LinuxKvmHost,
        ResourceState::Provisioned,
    ));
    session.commit();

    let listed = store
        .list_resources(&filter)
        .unwrap_or_else(|err| panic!("list resources: {err}"));

    assert_eq!(listed.len(), expected);
}

fn snapshot_path(tmp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(tmp.path().join("state").join("hostward.json"))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()))
}

#[test]
fn snapshot_round_trips_through_disk() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let file = SnapshotFile::new(snapshot_path(&tmp));
    let (store, id) = seeded();
    let mut session = store
        .session("manager")
        .unwrap_or_else(|err| panic!("open session: {err}"));
    session.put_manager(ResourceManager {
        id: ManagerId::generate(),
        name: String::from("vc-1"),
        kind: ManagerKind::Vcenter,
        address: String::from("10.0.0.2"),
        username: String::from("admin"),
        password: Secret::new("pw"),
        port: Some(443),
        properties: Vec::new(),
    });
    session.commit();
    let tables = store
        .tables()
        .unwrap_or_else(|err| panic!("snapshot tables: {err}"));

    file.save(&tables)
        .unwrap_or_else(|err| panic!("save snapshot: {err}"));
    let restored = MemoryStore::from_tables(
        file.load()
            .unwrap_or_else(|err| panic!("load snapshot: {err}")),
    );

    assert_eq!(
        restored
            .get_resource(id)
            .unwrap_or_else(|err| panic!("restored resource: {err}"))
            .name,
        "kvm-1"
    );
    assert_eq!(
        restored
            .list_managers()
            .unwrap_or_else(|err| panic!("restored managers: {err}"))
            .len(),
        1
    );
}

#[test]
fn absent_snapshot_loads_empty() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let file = SnapshotFile::new(snapshot_path(&tmp));

    let tables = file
        .load()
        .unwrap_or_else(|err| panic!("load snapshot: {err}"));

    assert_eq!(tables, Tables::default());
}

#[test]
fn corrupt_snapshot_reports_parse_error() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("hostward.json"))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    std::fs::write(&path, "{not json").unwrap_or_else(|err| panic!("write: {err}"));

    let err = SnapshotFile::new(path).load().expect_err("corrupt file");

    assert!(matches!(err, StoreError::Parse { .. }), "got {err:?}");
}
