//! Per-request caller context.

use uuid::Uuid;

use crate::model::Secret;

/// Identity and correlation data for one caller request.
///
/// Drivers forward the token to the facade as `X-Auth-Token`; background
/// tasks carry a clone so their logs correlate with the originating request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequestContext {
    /// Correlation identifier attached to log spans.
    pub request_id: String,
    /// Caller token forwarded to remote services.
    pub auth_token: Option<Secret>,
}

impl RequestContext {
    /// Creates a context with a fresh request identifier.
    #[must_use]
    pub fn new(auth_token: Option<Secret>) -> Self {
        Self {
            request_id: format!("req-{}", Uuid::new_v4().simple()),
            auth_token,
        }
    }
}
