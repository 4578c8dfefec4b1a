/// Rate Limiting System
///
/// Per-client quota keyed by the `CF-Connecting-IP` header when the proxy
/// sits behind Cloudflare, otherwise by the peer address.
use crate::{
    context::AppContext,
    error::{ProxyError, ProxyResult},
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorLimiter};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
};
use tracing::debug;

/// Header set by Cloudflare with the original client address
pub const CLIENT_IP_HEADER: &str = "cf-connecting-ip";

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    clients: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    requests_per_minute: u32,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Self {
            clients: Arc::new(GovernorLimiter::keyed(Quota::per_minute(per_minute))),
            requests_per_minute: per_minute.get(),
        }
    }

    /// Check rate limit for one client
    pub fn check(&self, client: IpAddr) -> ProxyResult<()> {
        self.clients
            .check_key(&client)
            .map_err(|_| ProxyError::RateLimitExceeded)
    }

    /// Drop state for clients whose quota has fully replenished
    pub fn prune(&self) -> usize {
        self.clients.retain_recent();
        self.clients.shrink_to_fit();
        self.clients.len()
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }
}

/// Resolve the client address for rate limiting
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    headers
        .get(CLIENT_IP_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    // Without any address there is nothing to key on
    let Some(client) = client_ip(request.headers(), peer) else {
        return next.run(request).await;
    };

    match ctx.rate_limiter.check(client) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            debug!("Rate limit exceeded for {}", client);
            e.into_response()
        }
    }
}
