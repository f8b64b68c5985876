//! Cluster inventory read from a resource manager.
//!
//! The production client speaks the vCenter REST API: a session is opened
//! with basic authentication, then clusters, hosts, and datastores are read
//! with the session header.

use std::future::Future;
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::ResourceManager;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SESSION_HEADER: &str = "vmware-api-session-id";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Future returned by inventory operations.
pub type InventoryFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, InventoryError>> + Send + 'a>>;

/// Errors raised while reading manager inventory.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InventoryError {
    /// Raised when the manager cannot be reached.
    #[error("cannot reach manager at {address}: {message}")]
    Unreachable {
        /// Manager address.
        address: String,
        /// Client error message.
        message: String,
    },
    /// Raised when the manager rejects the credentials.
    #[error("manager at {address} rejected the credentials")]
    Unauthorized {
        /// Manager address.
        address: String,
    },
    /// Raised when the manager reports an unknown cluster.
    #[error("cluster {moid} not found")]
    UnknownCluster {
        /// Cluster inventory identifier.
        moid: String,
    },
    /// Raised for other failure statuses or malformed bodies.
    #[error("unexpected manager response: {message}")]
    Protocol {
        /// Description of the failure.
        message: String,
    },
}

/// A cluster as listed by its manager.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClusterSummary {
    /// Manager-side identifier.
    pub moid: String,
    /// Cluster name.
    pub name: String,
    /// Datacenter containing the cluster.
    pub datacenter: String,
}

/// A host inside a cluster.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InventoryHost {
    /// Manager-side identifier.
    pub moid: String,
    /// Host name or address.
    pub name: String,
    /// Connection state reported by the manager.
    pub connection_state: String,
}

/// A datastore visible to a cluster.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Datastore {
    /// Datastore name.
    pub name: String,
    /// Whether more than one host can mount it.
    pub shared: bool,
}

/// Hosts and storage of one cluster.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClusterDetail {
    /// Member hosts.
    pub hosts: Vec<InventoryHost>,
    /// Datastores reachable from the cluster.
    pub datastores: Vec<Datastore>,
}

/// Reads clusters from a resource manager.
pub trait ClusterInventory: Send + Sync {
    /// Verifies the manager accepts the stored credentials.
    fn check_connection<'a>(&'a self, manager: &'a ResourceManager) -> InventoryFuture<'a, ()>;

    /// Lists every cluster the manager owns.
    fn list_clusters<'a>(
        &'a self,
        manager: &'a ResourceManager,
    ) -> InventoryFuture<'a, Vec<ClusterSummary>>;

    /// Reads hosts and datastores of one cluster.
    fn cluster_detail<'a>(
        &'a self,
        manager: &'a ResourceManager,
        moid: &'a str,
    ) -> InventoryFuture<'a, ClusterDetail>;
}

/// [`ClusterInventory`] over the vCenter REST API.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpInventory;

#[derive(Deserialize)]
struct Envelope<T> {
    value: T,
}

#[derive(Deserialize)]
struct DatacenterItem {
    datacenter: String,
}

#[derive(Deserialize)]
struct ClusterItem {
    cluster: String,
    name: String,
}

#[derive(Deserialize)]
struct HostItem {
    host: String,
    name: String,
    #[serde(default)]
    connection_state: String,
}

#[derive(Deserialize)]
struct DatastoreItem {
    datastore: String,
    name: String,
}

#[derive(Deserialize)]
struct DatastoreInfo {
    #[serde(default)]
    multiple_host_access: bool,
}

struct Session<'a> {
    base: String,
    address: &'a str,
    token: String,
}

impl HttpInventory {
    async fn login<'a>(&self, manager: &'a ResourceManager) -> Result<Session<'a>, InventoryError> {
        let base = format!(
            "https://{}:{}/rest",
            manager.address,
            manager.port.unwrap_or(443)
        );
        let response = HTTP_CLIENT
            .post(format!("{base}/com/vmware/cis/session"))
            .basic_auth(&manager.username, Some(manager.password.expose()))
            .send()
            .await
            .map_err(|err| InventoryError::Unreachable {
                address: manager.address.clone(),
                message: err.to_string(),
            })?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(InventoryError::Unauthorized {
                address: manager.address.clone(),
            });
        }
        if !status.is_success() {
            return Err(InventoryError::Protocol {
                message: format!("session request returned {status}"),
            });
        }
        let envelope: Envelope<String> =
            response
                .json()
                .await
                .map_err(|err| InventoryError::Protocol {
                    message: err.to_string(),
                })?;
        debug!(manager = %manager.address, "opened manager session");
        Ok(Session {
            base,
            address: &manager.address,
            token: envelope.value,
        })
    }

    async fn clusters(
        &self,
        manager: &ResourceManager,
    ) -> Result<Vec<ClusterSummary>, InventoryError> {
        let session = self.login(manager).await?;
        let datacenters: Vec<DatacenterItem> = session.get("/vcenter/datacenter").await?;
        let mut clusters = Vec::new();
        for datacenter in datacenters {
            let items: Vec<ClusterItem> = session
                .get(&format!(
                    "/vcenter/cluster?filter.datacenters={}",
                    datacenter.datacenter
                ))
                .await?;
            clusters.extend(items.into_iter().map(|item| ClusterSummary {
                moid: item.cluster,
                name: item.name,
                datacenter: datacenter.datacenter.clone(),
            }));
        }
        Ok(clusters)
    }

    async fn detail(
        &self,
        manager: &ResourceManager,
        moid: &str,
    ) -> Result<ClusterDetail, InventoryError> {
        let session = self.login(manager).await?;
        let hosts: Vec<HostItem> = session
            .get(&format!("/vcenter/host?filter.clusters={moid}"))
            .await
            .map_err(|err| match err {
                InventoryError::Protocol { .. } => InventoryError::UnknownCluster {
                    moid: moid.to_owned(),
                },
                other => other,
            })?;
        let listed: Vec<DatastoreItem> = session.get("/vcenter/datastore").await?;
        let mut datastores = Vec::with_capacity(listed.len());
        for item in listed {
            let info: DatastoreInfo = session
                .get(&format!("/vcenter/datastore/{}", item.datastore))
                .await?;
            datastores.push(Datastore {
                name: item.name,
                shared: info.multiple_host_access,
            });
        }
        Ok(ClusterDetail {
            hosts: hosts
                .into_iter()
                .map(|host| InventoryHost {
                    moid: host.host,
                    name: host.name,
                    connection_state: host.connection_state,
                })
                .collect(),
            datastores,
        })
    }
}

impl Session<'_> {
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, InventoryError> {
        let response = HTTP_CLIENT
            .get(format!("{}{path}", self.base))
            .header(SESSION_HEADER, &self.token)
            .send()
            .await
            .map_err(|err| InventoryError::Unreachable {
                address: self.address.to_owned(),
                message: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(InventoryError::Protocol {
                message: format!("GET {path} returned {status}"),
            });
        }
        let envelope: Envelope<T> =
            response
                .json()
                .await
                .map_err(|err| InventoryError::Protocol {
                    message: err.to_string(),
                })?;
        Ok(envelope.value)
    }
}

impl ClusterInventory for HttpInventory {
    fn check_connection<'a>(&'a self, manager: &'a ResourceManager) -> InventoryFuture<'a, ()> {
        Box::pin(async move { self.login(manager).await.map(drop) })
    }

    fn list_clusters<'a>(
        &'a self,
        manager: &'a ResourceManager,
    ) -> InventoryFuture<'a, Vec<ClusterSummary>> {
        Box::pin(self.clusters(manager))
    }

    fn cluster_detail<'a>(
        &'a self,
        manager: &'a ResourceManager,
        moid: &'a str,
    ) -> InventoryFuture<'a, ClusterDetail> {
        Box::pin(self.detail(manager, moid))
    }
}
