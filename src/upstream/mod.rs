/// Upstream Access
///
/// Outbound calls to the Mojang API: the HTTP dispatcher and the
/// outbound identity (bind address / proxy) rotation it relies on.

pub mod dispatcher;
pub mod outbound;

pub use dispatcher::{HttpDispatcher, UpstreamConfig};
pub use outbound::{OutboundIdentity, OutboundStrategy, ProxyEntry};

use crate::error::ProxyResult;
use async_trait::async_trait;

/// Raw upstream answer; any HTTP status is a valid outcome here
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Mojang API backend trait
///
/// Implementations only fail for transport problems (`Timeout`,
/// `Transport`); HTTP error statuses come back as responses.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// POST a list of usernames to one of the bulk lookup endpoints
    async fn lookup_names(&self, names: &[String]) -> ProxyResult<UpstreamResponse>;

    /// GET the session profile for an undashed UUID
    async fn fetch_profile(&self, undashed_id: &str) -> ProxyResult<UpstreamResponse>;
}
