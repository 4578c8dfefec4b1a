/// Mojang API proxy
///
/// Resolves Minecraft usernames to UUIDs and UUIDs to skin properties,
/// shielding callers from Mojang's latency and rate limits with
/// in-memory caching, request batching and outbound address rotation.

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod jobs;
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod upstream;
pub mod validation;

pub use context::AppContext;
pub use error::{ProxyError, ProxyResult};
