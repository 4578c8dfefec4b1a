/// Application context and dependency injection
use crate::{
    config::ServerConfig,
    error::ProxyResult,
    identity::{BatchCoalescer, IdentityCaches, ProfileResolver},
    rate_limit::RateLimiter,
    upstream::{HttpDispatcher, Upstream},
};
use std::sync::Arc;
use tracing::info;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub caches: Arc<IdentityCaches>,
    /// username → UUID, batched
    pub coalescer: Arc<BatchCoalescer>,
    /// UUID → skin property, direct
    pub profiles: Arc<ProfileResolver>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    ///
    /// Must run inside a tokio runtime; the coalescer worker is spawned here.
    pub fn new(config: ServerConfig) -> ProxyResult<Self> {
        config.validate()?;

        let strategy = config.outbound.build_strategy()?;
        let dispatcher = HttpDispatcher::new(config.upstream.clone(), strategy)?;

        Self::with_upstream(config, Arc::new(dispatcher))
    }

    /// Create a context around an existing upstream backend
    pub fn with_upstream(config: ServerConfig, upstream: Arc<dyn Upstream>) -> ProxyResult<Self> {
        let caches = Arc::new(IdentityCaches::new(&config.name_cache, &config.profile_cache));

        let coalescer = BatchCoalescer::start(
            config.batch.clone(),
            caches.names.clone(),
            upstream.clone(),
        )?;
        let profiles = ProfileResolver::new(caches.profiles.clone(), upstream);
        let rate_limiter = RateLimiter::new(config.rate_limit.requests_per_minute);

        info!(
            "Identity services ready (batch size {}, flush every {:?})",
            config.batch.batch_size, config.batch.flush_interval
        );

        Ok(Self {
            config: Arc::new(config),
            caches,
            coalescer: Arc::new(coalescer),
            profiles: Arc::new(profiles),
            rate_limiter: Arc::new(rate_limiter),
        })
    }

    /// Flush queued lookups and release both caches
    pub async fn shutdown(&self) {
        self.coalescer.shutdown().await;
        self.caches.profiles.clear();
        info!("Identity services stopped");
    }
}
