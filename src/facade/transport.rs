//! HTTP-shaped transport for facade requests.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;

use crate::model::Secret;

use super::FacadeError;

/// Header carrying the caller's token.
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// Future returned by transport operations.
pub type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FacadeError>> + Send + 'a>>;

/// Request verbs used against the facade.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    /// Read.
    Get,
    /// Create or trigger.
    Post,
    /// Replace.
    Put,
    /// Remove.
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

/// One request to the facade.
#[derive(Clone, Debug, PartialEq)]
pub struct FacadeRequest {
    /// Request verb.
    pub method: Method,
    /// Path below the service root, starting with `/`.
    pub path: String,
    /// Optional JSON body.
    pub body: Option<Value>,
    /// Token forwarded as [`AUTH_HEADER`].
    pub token: Option<Secret>,
}

/// The facade's answer to a [`FacadeRequest`].
#[derive(Clone, Debug, PartialEq)]
pub struct FacadeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON body; [`Value::Null`] when empty.
    pub body: Value,
}

impl FacadeResponse {
    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Sends requests to the facade.
pub trait FacadeTransport: Send + Sync {
    /// Sends `request` and returns the raw response.
    ///
    /// Non-2xx responses are returned as values; only failures to obtain a
    /// response at all surface as [`FacadeError::Transport`].
    fn send(&self, request: FacadeRequest) -> FacadeFuture<'_, FacadeResponse>;
}

/// [`FacadeTransport`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a transport for the service rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::Transport`] when the HTTP client cannot be
    /// constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FacadeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FacadeError::Transport {
                message: err.to_string(),
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    async fn dispatch(&self, request: FacadeRequest) -> Result<FacadeResponse, FacadeError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(method, &url);
        if let Some(token) = &request.token {
            builder = builder.header(AUTH_HEADER, token.expose());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| FacadeError::Transport {
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| FacadeError::Transport {
                message: err.to_string(),
            })?;

        Ok(FacadeResponse {
            status,
            body: decode_body(&bytes),
        })
    }
}

impl FacadeTransport for HttpTransport {
    fn send(&self, request: FacadeRequest) -> FacadeFuture<'_, FacadeResponse> {
        Box::pin(self.dispatch(request))
    }
}

fn decode_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
