/// Configuration management for the Mojang API proxy
use crate::{
    error::{ProxyError, ProxyResult},
    identity::{BatchConfig, CacheConfig},
    upstream::{outbound::load_proxy_file, OutboundStrategy, UpstreamConfig},
};
use std::{env, net::IpAddr, path::PathBuf, str::FromStr, time::Duration};
use tracing::info;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub name_cache: CacheConfig,
    pub profile_cache: CacheConfig,
    pub batch: BatchConfig,
    pub upstream: UpstreamConfig,
    pub outbound: OutboundConfig,
    pub rate_limit: RateLimitConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

/// Listen address
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub version: String,
}

/// Outbound identity strategy selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundConfig {
    Direct,
    /// `IP_BASE` with `IP_RANGE` random trailing bits
    LocalAddress { base: IpAddr, random_bits: u8 },
    /// `PROXY_FILE`, read once at startup
    ProxyFile(PathBuf),
}

impl OutboundConfig {
    /// Build the runtime strategy, loading the proxy list if configured
    pub fn build_strategy(&self) -> ProxyResult<OutboundStrategy> {
        match self {
            OutboundConfig::Direct => Ok(OutboundStrategy::Direct),
            OutboundConfig::LocalAddress { base, random_bits } => {
                info!("Outbound address: {} with {} random bits", base, random_bits);
                OutboundStrategy::local_address(*base, *random_bits)
            }
            OutboundConfig::ProxyFile(path) => {
                let proxies = load_proxy_file(path)?;
                info!("Loaded {} proxies from {:?}", proxies.len(), path);
                Ok(OutboundStrategy::Proxies(proxies))
            }
        }
    }
}

/// Per-client rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
}

/// Telemetry report cycle
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub report_interval: Duration,
    /// Discord webhook receiving each report, if any
    pub discord_webhook: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ProxyResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> ProxyResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let host = var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_var(&var, "SERVER_PORT", 3000u16)?;

        // Shared cache defaults, overridable per cache
        let cache_max_size = parse_var(&var, "CACHE_MAX_SIZE", 10_000u64)?;
        let cache_ttl_secs = parse_var(&var, "CACHE_TTL_SECS", 6 * 60 * 60u64)?;
        let name_cache = CacheConfig {
            max_size: parse_var(&var, "NAME_CACHE_MAX_SIZE", cache_max_size)?,
            ttl: Duration::from_secs(parse_var(&var, "NAME_CACHE_TTL_SECS", cache_ttl_secs)?),
        };
        let profile_cache = CacheConfig {
            max_size: parse_var(&var, "PROFILE_CACHE_MAX_SIZE", cache_max_size)?,
            ttl: Duration::from_secs(parse_var(&var, "PROFILE_CACHE_TTL_SECS", cache_ttl_secs)?),
        };

        let batch = BatchConfig {
            batch_size: parse_var(&var, "BATCH_SIZE", 10usize)?,
            flush_interval: Duration::from_millis(parse_var(&var, "BATCH_INTERVAL_MS", 3000u64)?),
        };

        let defaults = UpstreamConfig::default();
        let batch_urls = var("UPSTREAM_BATCH_URLS")
            .map(|urls| {
                urls.split(',')
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.batch_urls);
        let upstream = UpstreamConfig {
            batch_urls,
            profile_url: var("UPSTREAM_PROFILE_URL").unwrap_or(defaults.profile_url),
            request_timeout: Duration::from_secs(parse_var(&var, "REQUEST_TIMEOUT_SECS", 15u64)?),
            user_agent: var("USER_AGENT").unwrap_or(defaults.user_agent),
        };

        let outbound = match (var("IP_BASE"), var("PROXY_FILE")) {
            (Some(_), Some(_)) => {
                return Err(ProxyError::Config(
                    "IP_BASE and PROXY_FILE are mutually exclusive".to_string(),
                ))
            }
            (Some(base), None) => OutboundConfig::LocalAddress {
                base: base
                    .parse()
                    .map_err(|_| ProxyError::Config(format!("Invalid IP_BASE: {}", base)))?,
                random_bits: parse_var(&var, "IP_RANGE", 0u8)?,
            },
            (None, Some(path)) => OutboundConfig::ProxyFile(PathBuf::from(path)),
            (None, None) => OutboundConfig::Direct,
        };

        let rate_limit = RateLimitConfig {
            requests_per_minute: parse_var(&var, "RATE_LIMIT_PER_MINUTE", 1000u32)?,
        };

        let telemetry = TelemetryConfig {
            report_interval: Duration::from_secs(parse_var(
                &var,
                "TELEMETRY_REPORT_INTERVAL_SECS",
                300u64,
            )?),
            discord_webhook: var("DISCORD_WEBHOOK"),
        };

        let level = var("RUST_LOG")
            .unwrap_or_else(|| "mojang_api_proxy=info,tower_http=info".to_string());

        let config = ServerConfig {
            service: ServiceConfig {
                host,
                port,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            name_cache,
            profile_cache,
            batch,
            upstream,
            outbound,
            rate_limit,
            telemetry,
            logging: LoggingConfig { level },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> ProxyResult<()> {
        self.batch.validate()?;

        if self.upstream.batch_urls.is_empty() {
            return Err(ProxyError::Config(
                "UPSTREAM_BATCH_URLS must name at least one endpoint".to_string(),
            ));
        }

        if !self.upstream.profile_url.contains("{id}") {
            return Err(ProxyError::Config(
                "UPSTREAM_PROFILE_URL must contain an {id} placeholder".to_string(),
            ));
        }

        if self.upstream.request_timeout.is_zero() {
            return Err(ProxyError::Config(
                "REQUEST_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        for (name, cache) in [("name", &self.name_cache), ("profile", &self.profile_cache)] {
            if cache.max_size == 0 || cache.ttl.is_zero() {
                return Err(ProxyError::Config(format!(
                    "The {} cache needs a positive size and TTL",
                    name
                )));
            }
        }

        if let OutboundConfig::LocalAddress { base, random_bits } = &self.outbound {
            // Width check lives with the strategy
            OutboundStrategy::local_address(*base, *random_bits)?;
        }

        if self.rate_limit.requests_per_minute == 0 {
            return Err(ProxyError::Config(
                "RATE_LIMIT_PER_MINUTE must be greater than zero".to_string(),
            ));
        }

        if self.telemetry.report_interval.is_zero() {
            return Err(ProxyError::Config(
                "TELEMETRY_REPORT_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Socket address string to bind
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.host, self.service.port)
    }
}

fn parse_var<T, V>(var: &V, key: &str, default: T) -> ProxyResult<T>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ProxyError::Config(format!("Invalid value for {}: {}", key, raw))),
        None => Ok(default),
    }
}
