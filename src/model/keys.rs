//! Documented property keys.
//!
//! Keys under [`TRANSIENT_PREFIX`] are workflow markers: they exist only while
//! a verb is in flight and are never returned by read APIs.

/// Prefix reserved for workflow markers.
pub const TRANSIENT_PREFIX: &str = "transient:";

/// Kind a resource had before provisioning changed it.
pub const PRE_PROVISION_KIND: &str = "transient:pre_provision_kind";

/// Identifier of the resource's server entry in the input model.
pub const SERVER_ID: &str = "server_id";
/// Identifier assigned by the compute service once the hypervisor registers.
pub const HYPERVISOR_ID: &str = "hypervisor_id";
/// Stable state the resource was in before it was activated.
pub const ACTIVATED_FROM: &str = "activated_from";
/// Serialised JSON network configuration supplied at activation.
pub const NETWORK_PROPERTIES: &str = "network_properties";
/// Serialised JSON list of cluster hosts already commissioned.
pub const COMMISSIONED_HOSTS: &str = "commissioned_hosts";
/// Inventory identifier of a cluster within its manager.
pub const CLUSTER_MOID: &str = "cluster_moid";
/// Datacenter that contains a cluster.
pub const DATACENTER: &str = "datacenter";
/// Identifier of the manager endpoint, stored on managers.
pub const MANAGER_UUID: &str = "manager_uuid";
/// ILO address of a bare-metal node.
pub const ILO_ADDRESS: &str = "ilo_address";
/// ILO user of a bare-metal node.
pub const ILO_USER: &str = "ilo_user";
/// ILO password of a bare-metal node.
pub const ILO_PASSWORD: &str = "ilo_password";
/// PXE MAC address of a bare-metal node.
pub const MAC_ADDRESS: &str = "mac_addr";
/// Input-model server group.
pub const SERVER_GROUP: &str = "server_group";
/// Input-model server role.
pub const SERVER_ROLE: &str = "server_role";
/// Input-model NIC mapping name.
pub const NIC_MAPPING: &str = "nic_mapping";
/// Operating system installed during provisioning.
pub const OS_VERSION: &str = "os_version";

const SENSITIVE: [&str; 1] = [ILO_PASSWORD];

/// Returns `true` for workflow markers.
#[must_use]
pub fn is_transient(key: &str) -> bool {
    key.starts_with(TRANSIENT_PREFIX)
}

/// Returns `true` for keys whose values must be masked on read.
#[must_use]
pub fn is_sensitive(key: &str) -> bool {
    SENSITIVE.contains(&key)
}
