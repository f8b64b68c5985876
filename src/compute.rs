//! Compute service queries about registered hypervisors.

use std::future::Future;
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::context::RequestContext;
use crate::facade::AUTH_HEADER;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Future returned by compute operations.
pub type ComputeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ComputeError>> + Send + 'a>>;

/// Errors raised by the compute service client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ComputeError {
    /// Raised when the request never produced a response.
    #[error("compute transport error: {message}")]
    Transport {
        /// Underlying client error.
        message: String,
    },
    /// Raised when the service answers with a failure status.
    #[error("compute request failed with status {status}: {message}")]
    Remote {
        /// HTTP status.
        status: u16,
        /// Response body.
        message: String,
    },
    /// Raised when a response body does not have the expected shape.
    #[error("unexpected compute response: {message}")]
    Decode {
        /// Decoder error message.
        message: String,
    },
}

/// A hypervisor registered with the compute service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Hypervisor {
    /// Compute-side identifier.
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    /// Host name the hypervisor registered under.
    pub hypervisor_hostname: String,
    /// Number of instances currently running on it.
    #[serde(default)]
    pub running_vms: u32,
}

/// Read and cleanup operations against the compute service.
pub trait ComputeApi: Send + Sync {
    /// Looks up a hypervisor by host name; `None` until it registers.
    fn find_hypervisor<'a>(
        &'a self,
        ctx: &'a RequestContext,
        hostname: &'a str,
    ) -> ComputeFuture<'a, Option<Hypervisor>>;

    /// Loads a hypervisor with its current instance count.
    fn hypervisor<'a>(
        &'a self,
        ctx: &'a RequestContext,
        id: &'a str,
    ) -> ComputeFuture<'a, Hypervisor>;

    /// Removes the compute service registration of a host.
    fn delete_service<'a>(
        &'a self,
        ctx: &'a RequestContext,
        hostname: &'a str,
    ) -> ComputeFuture<'a, ()>;
}

/// [`ComputeApi`] over the compute REST API.
#[derive(Clone, Debug)]
pub struct HttpCompute {
    base_url: String,
}

#[derive(Deserialize)]
struct HypervisorList {
    #[serde(default)]
    hypervisors: Vec<Hypervisor>,
}

#[derive(Deserialize)]
struct HypervisorEnvelope {
    hypervisor: Hypervisor,
}

#[derive(Deserialize)]
struct ServiceList {
    #[serde(default)]
    services: Vec<Service>,
}

#[derive(Deserialize)]
struct Service {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
}

impl HttpCompute {
    /// Builds a client for the API rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    async fn request(
        &self,
        ctx: &RequestContext,
        method: reqwest::Method,
        path: &str,
    ) -> Result<(u16, Vec<u8>), ComputeError> {
        let mut builder = HTTP_CLIENT.request(method, format!("{}{path}", self.base_url));
        if let Some(token) = &ctx.auth_token {
            builder = builder.header(AUTH_HEADER, token.expose());
        }
        let response = builder.send().await.map_err(|err| ComputeError::Transport {
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| ComputeError::Transport {
                message: err.to_string(),
            })?;
        Ok((status, body.to_vec()))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<Option<T>, ComputeError> {
        let (status, body) = self.request(ctx, reqwest::Method::GET, path).await?;
        if status == 404 {
            return Ok(None);
        }
        if !(200..300).contains(&status) {
            return Err(ComputeError::Remote {
                status,
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|err| ComputeError::Decode {
                message: err.to_string(),
            })
    }

    async fn lookup(
        &self,
        ctx: &RequestContext,
        hostname: &str,
    ) -> Result<Option<Hypervisor>, ComputeError> {
        let list: Option<HypervisorList> = self
            .get(ctx, &format!("/os-hypervisors/{hostname}/search"))
            .await?;
        Ok(list.and_then(|found| {
            found
                .hypervisors
                .into_iter()
                .find(|hypervisor| hypervisor.hypervisor_hostname == hostname)
        }))
    }

    async fn load(&self, ctx: &RequestContext, id: &str) -> Result<Hypervisor, ComputeError> {
        let envelope: Option<HypervisorEnvelope> =
            self.get(ctx, &format!("/os-hypervisors/{id}")).await?;
        envelope
            .map(|found| found.hypervisor)
            .ok_or_else(|| ComputeError::Remote {
                status: 404,
                message: format!("hypervisor {id} not found"),
            })
    }

    async fn remove_service(&self, ctx: &RequestContext, hostname: &str) -> Result<(), ComputeError> {
        let list: Option<ServiceList> = self
            .get(ctx, &format!("/os-services?host={hostname}&binary=nova-compute"))
            .await?;
        for service in list.map(|found| found.services).unwrap_or_default() {
            let (status, body) = self
                .request(
                    ctx,
                    reqwest::Method::DELETE,
                    &format!("/os-services/{}", service.id),
                )
                .await?;
            if !(200..300).contains(&status) && status != 404 {
                return Err(ComputeError::Remote {
                    status,
                    message: String::from_utf8_lossy(&body).into_owned(),
                });
            }
        }
        Ok(())
    }
}

impl ComputeApi for HttpCompute {
    fn find_hypervisor<'a>(
        &'a self,
        ctx: &'a RequestContext,
        hostname: &'a str,
    ) -> ComputeFuture<'a, Option<Hypervisor>> {
        Box::pin(self.lookup(ctx, hostname))
    }

    fn hypervisor<'a>(
        &'a self,
        ctx: &'a RequestContext,
        id: &'a str,
    ) -> ComputeFuture<'a, Hypervisor> {
        Box::pin(self.load(ctx, id))
    }

    fn delete_service<'a>(
        &'a self,
        ctx: &'a RequestContext,
        hostname: &'a str,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(self.remove_service(ctx, hostname))
    }
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(id) => Ok(id),
        serde_json::Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hypervisor_ids_accept_numbers_and_strings() {
        let numeric: Hypervisor = serde_json::from_str(
            r#"{"id": 7, "hypervisor_hostname": "kvm-1", "running_vms": 2}"#,
        )
        .unwrap_or_else(|err| panic!("decode numeric: {err}"));
        let textual: Hypervisor =
            serde_json::from_str(r#"{"id": "a-b", "hypervisor_hostname": "kvm-2"}"#)
                .unwrap_or_else(|err| panic!("decode textual: {err}"));

        assert_eq!(numeric.id, "7");
        assert_eq!(numeric.running_vms, 2);
        assert_eq!(textual.id, "a-b");
        assert_eq!(textual.running_vms, 0);
    }
}
