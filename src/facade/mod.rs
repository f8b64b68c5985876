//! Client for the remote configuration service ("facade").
//!
//! The facade owns the input model (a document of server entries and other
//! entities), builds deployment configuration from it, and runs playbooks as
//! asynchronous jobs. [`FacadeClient`] exposes the typed operations drivers
//! need and polls jobs through [`poll_until`].

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::context::RequestContext;

mod error;
mod poll;
mod transport;
pub mod types;

pub use error::FacadeError;
pub use poll::{JobStatus, PollPolicy, poll_until};
pub use transport::{
    AUTH_HEADER, FacadeFuture, FacadeRequest, FacadeResponse, FacadeTransport, HttpTransport,
    Method,
};
pub use types::{OsInstallRequest, OsInstallTarget, PlaybookRun, ServerEntry};

const SERVERS: &str = "/api/v2/model/entities/servers";
const ENTITIES: &str = "/api/v2/model/entities";
const COMMIT: &str = "/api/v2/model/commit";
const CHANGES: &str = "/api/v2/model/changes";
const CONFIG_PROCESSOR: &str = "/api/v2/config_processor";
const PLAYBOOKS: &str = "/api/v2/playbooks";
const PLAYS: &str = "/api/v2/plays";
const OS_INSTALL: &str = "/api/v2/osinstall";

/// Poll budgets for the different job families.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FacadePolicies {
    /// Short jobs such as `ready_deployment`.
    pub quick: PollPolicy,
    /// Deployment playbooks.
    pub playbook: PollPolicy,
    /// Operating system installs.
    pub os_install: PollPolicy,
}

impl Default for FacadePolicies {
    fn default() -> Self {
        let base = PollPolicy::default();
        Self {
            quick: base,
            playbook: base.with_retries(120),
            os_install: base.with_retries(240),
        }
    }
}

impl FacadePolicies {
    /// Builds policies sharing one backoff unit and cap.
    #[must_use]
    pub const fn new(
        unit: Duration,
        max_delay: Duration,
        quick: u32,
        playbook: u32,
        os_install: u32,
    ) -> Self {
        let base = PollPolicy {
            retries: quick,
            unit,
            max_delay,
        };
        Self {
            quick: base,
            playbook: base.with_retries(playbook),
            os_install: base.with_retries(os_install),
        }
    }
}

/// Typed facade operations over a [`FacadeTransport`].
#[derive(Clone)]
pub struct FacadeClient {
    transport: Arc<dyn FacadeTransport>,
    policies: FacadePolicies,
}

impl std::fmt::Debug for FacadeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacadeClient")
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

impl FacadeClient {
    /// Creates a client over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn FacadeTransport>, policies: FacadePolicies) -> Self {
        Self {
            transport,
            policies,
        }
    }

    /// Returns the poll budgets in use.
    #[must_use]
    pub const fn policies(&self) -> FacadePolicies {
        self.policies
    }

    /// Lists every server entry in the input model.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the request fails or the body is not a
    /// server list.
    pub async fn list_servers(&self, ctx: &RequestContext) -> Result<Vec<ServerEntry>, FacadeError> {
        let body = self.call(ctx, Method::Get, SERVERS.to_owned(), None).await?;
        decode(body)
    }

    /// Adds a server entry to the input model.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the facade rejects the entry.
    pub async fn add_server(
        &self,
        ctx: &RequestContext,
        entry: &ServerEntry,
    ) -> Result<(), FacadeError> {
        self.call(ctx, Method::Post, SERVERS.to_owned(), Some(encode(entry)?))
            .await
            .map(drop)
    }

    /// Replaces a server entry in the input model.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the facade rejects the entry.
    pub async fn update_server(
        &self,
        ctx: &RequestContext,
        entry: &ServerEntry,
    ) -> Result<(), FacadeError> {
        let path = format!("{SERVERS}/{}", entry.id);
        self.call(ctx, Method::Put, path, Some(encode(entry)?))
            .await
            .map(drop)
    }

    /// Removes a server entry from the input model.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the request fails.
    pub async fn delete_server(&self, ctx: &RequestContext, id: &str) -> Result<(), FacadeError> {
        self.call(ctx, Method::Delete, format!("{SERVERS}/{id}"), None)
            .await
            .map(drop)
    }

    /// Reads an input-model entity verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the request fails.
    pub async fn get_entity(&self, ctx: &RequestContext, entity: &str) -> Result<Value, FacadeError> {
        self.call(ctx, Method::Get, format!("{ENTITIES}/{entity}"), None)
            .await
    }

    /// Replaces an input-model entity verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the facade rejects the value.
    pub async fn put_entity(
        &self,
        ctx: &RequestContext,
        entity: &str,
        value: &Value,
    ) -> Result<(), FacadeError> {
        self.call(
            ctx,
            Method::Put,
            format!("{ENTITIES}/{entity}"),
            Some(value.clone()),
        )
        .await
        .map(drop)
    }

    /// Commits staged input-model changes.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the commit fails.
    pub async fn commit(&self, ctx: &RequestContext, message: &str) -> Result<(), FacadeError> {
        let body = json!({ "message": message });
        self.call(ctx, Method::Post, COMMIT.to_owned(), Some(body))
            .await
            .map(drop)
    }

    /// Discards uncommitted input-model changes.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the request fails.
    pub async fn revert_changes(&self, ctx: &RequestContext) -> Result<(), FacadeError> {
        self.call(ctx, Method::Delete, CHANGES.to_owned(), None)
            .await
            .map(drop)
    }

    /// Builds deployment configuration from the committed model.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the build fails.
    pub async fn run_config_processor(&self, ctx: &RequestContext) -> Result<(), FacadeError> {
        self.call(ctx, Method::Post, CONFIG_PROCESSOR.to_owned(), Some(json!({})))
            .await
            .map(drop)
    }

    /// Starts a playbook and returns its play identifier.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the facade refuses the run or omits the
    /// play identifier.
    pub async fn start_playbook(
        &self,
        ctx: &RequestContext,
        name: &str,
        run: &PlaybookRun,
    ) -> Result<String, FacadeError> {
        let body = self
            .call(
                ctx,
                Method::Post,
                format!("{PLAYBOOKS}/{name}"),
                Some(encode(run)?),
            )
            .await?;
        match body.get("id") {
            Some(Value::String(id)) => Ok(id.clone()),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(FacadeError::Decode {
                message: format!("playbook {name} response carries no play id"),
            }),
        }
    }

    /// Polls a play once.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::Transport`] when the request fails and
    /// [`FacadeError::Decode`] for an unrecognised body.
    pub async fn play_status(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<JobStatus<()>, FacadeError> {
        let response = self.send(ctx, Method::Get, format!("{PLAYS}/{id}"), None).await?;
        if !response.is_success() {
            return Ok(JobStatus::Failed {
                code: i64::from(response.status),
                message: remote_message(&response.body),
            });
        }
        if response.body.get("alive").and_then(Value::as_bool) == Some(true) {
            return Ok(JobStatus::Pending);
        }
        match response.body.get("code").and_then(Value::as_i64) {
            Some(0) => Ok(JobStatus::Done(())),
            Some(code) => Ok(JobStatus::Failed {
                code,
                message: format!("play {id} exited with code {code}"),
            }),
            None => Err(FacadeError::Decode {
                message: format!("play {id} status carries neither alive nor code"),
            }),
        }
    }

    /// Stops a running play.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the request fails.
    pub async fn kill_play(&self, ctx: &RequestContext, id: &str) -> Result<(), FacadeError> {
        self.call(ctx, Method::Delete, format!("{PLAYS}/{id}"), None)
            .await
            .map(drop)
    }

    /// Runs a playbook to completion, killing the play if it never finishes.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::Remote`] when the play fails and
    /// [`FacadeError::Timeout`] when the poll budget runs out.
    pub async fn run_playbook(
        &self,
        ctx: &RequestContext,
        name: &str,
        run: &PlaybookRun,
    ) -> Result<(), FacadeError> {
        let id = self.start_playbook(ctx, name, run).await?;
        debug!(playbook = name, play = %id, "playbook started");
        let policy = if name == types::READY_DEPLOYMENT {
            self.policies.quick
        } else {
            self.policies.playbook
        };
        let play = id.as_str();
        poll_until(
            name,
            policy,
            move || self.play_status(ctx, play),
            || async move {
                if let Err(err) = self.kill_play(ctx, play).await {
                    warn!(playbook = name, play, error = %err, "failed to kill play");
                }
            },
        )
        .await
    }

    /// Starts an operating system install.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError`] when the facade refuses the install.
    pub async fn start_os_install(
        &self,
        ctx: &RequestContext,
        request: &OsInstallRequest,
    ) -> Result<(), FacadeError> {
        self.call(
            ctx,
            Method::Post,
            OS_INSTALL.to_owned(),
            Some(encode(request)?),
        )
        .await
        .map(drop)
    }

    /// Polls the install status of one server.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::Transport`] when the request fails.
    pub async fn os_install_status(
        &self,
        ctx: &RequestContext,
        server_id: &str,
    ) -> Result<JobStatus<()>, FacadeError> {
        let response = self.send(ctx, Method::Get, OS_INSTALL.to_owned(), None).await?;
        if !response.is_success() {
            return Ok(JobStatus::Failed {
                code: i64::from(response.status),
                message: remote_message(&response.body),
            });
        }
        let status = response
            .body
            .get("servers")
            .and_then(|servers| servers.get(server_id))
            .and_then(Value::as_str);
        Ok(match status {
            Some("complete") => JobStatus::Done(()),
            Some("error") => JobStatus::Failed {
                code: 1,
                message: format!("operating system install failed on {server_id}"),
            },
            _ => JobStatus::Pending,
        })
    }

    /// Installs an operating system on one server and waits for completion.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::Remote`] when the install fails and
    /// [`FacadeError::Timeout`] when the poll budget runs out.
    pub async fn install_os(
        &self,
        ctx: &RequestContext,
        target: OsInstallTarget,
    ) -> Result<(), FacadeError> {
        let server_id = target.id.clone();
        self.start_os_install(
            ctx,
            &OsInstallRequest {
                servers: vec![target],
            },
        )
        .await?;
        let server = server_id.as_str();
        poll_until(
            "osinstall",
            self.policies.os_install,
            move || self.os_install_status(ctx, server),
            || async move {
                warn!(server, "operating system install still running; giving up");
            },
        )
        .await
    }

    async fn send(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: String,
        body: Option<Value>,
    ) -> Result<FacadeResponse, FacadeError> {
        debug!(request_id = %ctx.request_id, %method, %path, "facade request");
        self.transport
            .send(FacadeRequest {
                method,
                path,
                body,
                token: ctx.auth_token.clone(),
            })
            .await
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: String,
        body: Option<Value>,
    ) -> Result<Value, FacadeError> {
        let response = self.send(ctx, method, path, body).await?;
        if response.is_success() {
            return Ok(response.body);
        }
        Err(FacadeError::Remote {
            code: i64::from(response.status),
            message: remote_message(&response.body),
        })
    }
}

fn remote_message(body: &Value) -> String {
    match body {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| other.to_string(), ToOwned::to_owned),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, FacadeError> {
    serde_json::to_value(value).map_err(|err| FacadeError::Decode {
        message: err.to_string(),
    })
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, FacadeError> {
    serde_json::from_value(value).map_err(|err| FacadeError::Decode {
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests;
