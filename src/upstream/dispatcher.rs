/// Upstream dispatcher - executes GET/POST calls against the Mojang API
use crate::{
    error::{ProxyError, ProxyResult},
    metrics,
    upstream::{
        outbound::{choose_endpoint, OutboundIdentity, OutboundStrategy, ProxyEntry},
        Upstream, UpstreamResponse,
    },
};
use async_trait::async_trait;
use moka::sync::Cache;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE},
    Client, ClientBuilder, Proxy, RequestBuilder,
};
use std::{collections::HashMap, net::IpAddr, time::Duration};
use tracing::{debug, warn};

/// Bind-address clients kept warm for reuse
const LOCAL_CLIENT_CAPACITY: u64 = 256;

/// Upstream endpoints and client settings
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Functionally equivalent bulk name lookup endpoints
    pub batch_urls: Vec<String>,
    /// Session profile URL; `{id}` is replaced by the undashed UUID
    pub profile_url: String,
    /// Deadline for one complete request/response exchange
    pub request_timeout: Duration,
    /// User-Agent header for outbound requests
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            batch_urls: vec![
                "https://api.mojang.com/profiles/minecraft".to_string(),
                "https://api.minecraftservices.com/minecraft/profile/lookup/bulk/byname"
                    .to_string(),
            ],
            profile_url:
                "https://sessionserver.mojang.com/session/minecraft/profile/{id}?unsigned=false"
                    .to_string(),
            request_timeout: Duration::from_secs(15),
            user_agent: "SRMojangAPI".to_string(),
        }
    }
}

impl UpstreamConfig {
    /// Expand the profile URL template
    pub fn profile_url_for(&self, undashed_id: &str) -> String {
        self.profile_url.replace("{id}", undashed_id)
    }
}

/// HTTP dispatcher with per-call outbound identity
pub struct HttpDispatcher {
    config: UpstreamConfig,
    strategy: OutboundStrategy,
    /// Shared client for calls that need no bind address or proxy
    direct_client: Client,
    /// One client per configured proxy, built up front
    proxy_clients: HashMap<ProxyEntry, Client>,
    /// Clients per bind address, built on first use
    local_clients: Cache<IpAddr, Client>,
}

impl HttpDispatcher {
    /// Create a new dispatcher
    pub fn new(config: UpstreamConfig, strategy: OutboundStrategy) -> ProxyResult<Self> {
        if config.batch_urls.is_empty() {
            return Err(ProxyError::Config(
                "At least one batch lookup URL is required".to_string(),
            ));
        }

        let direct_client = client_builder(&config)
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let mut proxy_clients = HashMap::new();
        if let OutboundStrategy::Proxies(entries) = &strategy {
            for entry in entries {
                let proxy = Proxy::all(entry.to_url()?).map_err(|e| {
                    ProxyError::Config(format!("Invalid proxy {}: {}", entry.host, e))
                })?;
                let client = client_builder(&config).proxy(proxy).build().map_err(|e| {
                    ProxyError::Config(format!("Failed to create client for {}: {}", entry.host, e))
                })?;
                proxy_clients.insert(entry.clone(), client);
            }
        }

        Ok(Self {
            config,
            strategy,
            direct_client,
            proxy_clients,
            local_clients: Cache::new(LOCAL_CLIENT_CAPACITY),
        })
    }

    /// GET `url`; non-2xx statuses are returned, not raised
    pub async fn get(&self, url: &str) -> ProxyResult<UpstreamResponse> {
        let identity = self.strategy.choose(&mut rand::thread_rng());
        debug!("GET {} via {}", url, identity);

        let client = self.client_for(&identity)?;
        self.execute(client.get(url), 0).await
    }

    /// POST a JSON body to `url`; non-2xx statuses are returned, not raised
    pub async fn post(&self, url: &str, body: &serde_json::Value) -> ProxyResult<UpstreamResponse> {
        let identity = self.strategy.choose(&mut rand::thread_rng());
        debug!("POST {} via {}", url, identity);

        let payload = serde_json::to_vec(body)
            .map_err(|e| ProxyError::Internal(format!("Failed to encode request body: {}", e)))?;
        let bytes_sent = payload.len();

        let client = self.client_for(&identity)?;
        let request = client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload);

        self.execute(request, bytes_sent).await
    }

    /// Client bound to the chosen identity
    fn client_for(&self, identity: &OutboundIdentity) -> ProxyResult<Client> {
        match identity {
            OutboundIdentity::Direct => Ok(self.direct_client.clone()),
            OutboundIdentity::LocalAddress(addr) => self
                .local_clients
                .try_get_with(*addr, || {
                    client_builder(&self.config).local_address(*addr).build()
                })
                .map_err(|e| {
                    ProxyError::Transport(format!("Failed to create client for {}: {}", addr, e))
                }),
            OutboundIdentity::Proxy(entry) => {
                self.proxy_clients.get(entry).cloned().ok_or_else(|| {
                    ProxyError::Internal(format!("No client for proxy {}", entry.host))
                })
            }
        }
    }

    async fn execute(&self, request: RequestBuilder, bytes_sent: usize) -> ProxyResult<UpstreamResponse> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_upstream_request(bytes_sent, 0, None);
                return Err(map_transport_error(e));
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                metrics::record_upstream_request(bytes_sent, 0, None);
                return Err(map_transport_error(e));
            }
        };

        metrics::record_upstream_request(bytes_sent, body.len(), Some(status));
        if !(200..300).contains(&status) {
            warn!("Mojang returned HTTP {}", status);
        }

        Ok(UpstreamResponse { status, body })
    }
}

#[async_trait]
impl Upstream for HttpDispatcher {
    async fn lookup_names(&self, names: &[String]) -> ProxyResult<UpstreamResponse> {
        let url = choose_endpoint(&self.config.batch_urls, &mut rand::thread_rng())
            .ok_or_else(|| ProxyError::Config("No batch lookup URL configured".to_string()))?
            .to_string();

        let body = serde_json::to_value(names)
            .map_err(|e| ProxyError::Internal(format!("Failed to encode usernames: {}", e)))?;

        self.post(&url, &body).await
    }

    async fn fetch_profile(&self, undashed_id: &str) -> ProxyResult<UpstreamResponse> {
        let url = self.config.profile_url_for(undashed_id);
        self.get(&url).await
    }
}

fn client_builder(config: &UpstreamConfig) -> ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en"));

    Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .timeout(config.request_timeout)
}

/// Deadline overruns are reported apart from other network failures
fn map_transport_error(e: reqwest::Error) -> ProxyError {
    if e.is_timeout() {
        ProxyError::Timeout
    } else {
        ProxyError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UpstreamConfig::default();
        assert_eq!(config.batch_urls.len(), 2);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_profile_url_for() {
        let config = UpstreamConfig::default();
        assert_eq!(
            config.profile_url_for("069a79f444e94726a5befca90e38aaf6"),
            "https://sessionserver.mojang.com/session/minecraft/profile/069a79f444e94726a5befca90e38aaf6?unsigned=false"
        );
    }

    #[test]
    fn test_proxy_clients_built_up_front() {
        let proxies = crate::upstream::outbound::parse_proxy_list(
            "10.0.0.1:8080\nsocks5://10.0.0.2:1080:u:p",
        )
        .unwrap();
        let dispatcher =
            HttpDispatcher::new(UpstreamConfig::default(), OutboundStrategy::Proxies(proxies.clone()))
                .unwrap();

        assert_eq!(dispatcher.proxy_clients.len(), 2);
        for entry in proxies {
            assert!(dispatcher.client_for(&OutboundIdentity::Proxy(entry)).is_ok());
        }
    }

    #[test]
    fn test_local_clients_are_reused() {
        let strategy = OutboundStrategy::local_address("127.0.0.1".parse().unwrap(), 0).unwrap();
        let dispatcher = HttpDispatcher::new(UpstreamConfig::default(), strategy).unwrap();
        let identity = OutboundIdentity::LocalAddress("127.0.0.1".parse().unwrap());

        assert!(dispatcher.client_for(&identity).is_ok());
        assert!(dispatcher.client_for(&identity).is_ok());

        dispatcher.local_clients.run_pending_tasks();
        assert_eq!(dispatcher.local_clients.entry_count(), 1);
    }

    #[test]
    fn test_requires_batch_urls() {
        let config = UpstreamConfig {
            batch_urls: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            HttpDispatcher::new(config, OutboundStrategy::Direct),
            Err(ProxyError::Config(_))
        ));
    }
}
