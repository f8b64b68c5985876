//! Wire types exchanged with the facade.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::Secret;

/// Playbook that prepares the deployment tree after a config build.
pub const READY_DEPLOYMENT: &str = "ready_deployment";
/// Playbook that deploys services onto newly added servers.
pub const SITE: &str = "site";
/// Playbook that stops services on a server ahead of its removal.
pub const STOP_SERVICES: &str = "hlm_stop";
/// Playbook that registers bare-metal nodes with the PXE installer.
pub const COBBLER_DEPLOY: &str = "cobbler_deploy";

/// One server entry in the input model.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServerEntry {
    /// Server identifier, unique in the model.
    pub id: String,
    /// Management address.
    #[serde(rename = "ip-addr")]
    pub ip_addr: String,
    /// Server role.
    #[serde(default)]
    pub role: String,
    /// Server group.
    #[serde(rename = "server-group", default, skip_serializing_if = "Option::is_none")]
    pub server_group: Option<String>,
    /// NIC mapping name.
    #[serde(rename = "nic-mapping", default, skip_serializing_if = "Option::is_none")]
    pub nic_mapping: Option<String>,
    /// PXE MAC address.
    #[serde(rename = "mac-addr", default, skip_serializing_if = "Option::is_none")]
    pub mac_addr: Option<String>,
    /// ILO address.
    #[serde(rename = "ilo-ip", default, skip_serializing_if = "Option::is_none")]
    pub ilo_ip: Option<String>,
    /// ILO user.
    #[serde(rename = "ilo-user", default, skip_serializing_if = "Option::is_none")]
    pub ilo_user: Option<String>,
    /// ILO password.
    #[serde(rename = "ilo-password", default, skip_serializing_if = "Option::is_none")]
    pub ilo_password: Option<Secret>,
}

/// Body of a playbook run request.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PlaybookRun {
    /// Restricts the run to these hosts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    /// Extra variables passed to the playbook.
    #[serde(rename = "extra-vars", default, skip_serializing_if = "Map::is_empty")]
    pub extra_vars: Map<String, Value>,
}

impl PlaybookRun {
    /// Runs against every host.
    #[must_use]
    pub fn everywhere() -> Self {
        Self::default()
    }

    /// Runs against one host.
    #[must_use]
    pub fn limited_to(host: impl Into<String>) -> Self {
        Self {
            limit: Some(host.into()),
            extra_vars: Map::new(),
        }
    }

    /// Adds an extra variable.
    #[must_use]
    pub fn with_var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra_vars.insert(key.to_owned(), value.into());
        self
    }
}

/// Body of an operating system install request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OsInstallRequest {
    /// Servers to install, by input-model id.
    pub servers: Vec<OsInstallTarget>,
}

/// One server in an [`OsInstallRequest`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OsInstallTarget {
    /// Input-model server id.
    pub id: String,
    /// Operating system image to install.
    #[serde(rename = "os-version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
}
