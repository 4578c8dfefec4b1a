/// Batch coalescer - merges concurrent username lookups into bulk upstream calls
///
/// A single worker task owns the batch window. Callers talk to it over a
/// channel and wait on a oneshot reply, so claiming requests for a flush is
/// a plain synchronous drain that finishes before any network call starts.
use crate::{
    error::{ProxyError, ProxyResult},
    identity::{cache::TtlCache, parse_canonical_id, NameResolution},
    metrics,
    upstream::{Upstream, UpstreamResponse},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::{JoinHandle, JoinSet},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

/// Largest batch the bulk endpoints accept
pub const MAX_BATCH_SIZE: usize = 10;

/// Coalescer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Flush as soon as this many requests are queued (default: 10)
    pub batch_size: usize,
    /// Periodic flush interval (default: 3 seconds)
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            flush_interval: Duration::from_millis(3000),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> ProxyResult<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ProxyError::Config(format!(
                "Batch size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }

        if self.flush_interval.is_zero() {
            return Err(ProxyError::Config(
                "Batch flush interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// One queued lookup and the handle that completes it
struct PendingRequest {
    name: String,
    reply: oneshot::Sender<ProxyResult<NameResolution>>,
}

impl PendingRequest {
    fn resolve(self, result: ProxyResult<NameResolution>) {
        // Caller may have gone away; nothing to do then
        let _ = self.reply.send(result);
    }
}

enum Command {
    Enqueue(PendingRequest),
    Shutdown,
}

/// Entry of a bulk lookup response
///
/// Fields stay loosely typed so one malformed entry only fails the request
/// it answers.
#[derive(Debug, Deserialize)]
struct ProfileName {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    name: Value,
}

/// Handle to the coalescer worker
pub struct BatchCoalescer {
    cache: Arc<TtlCache<String>>,
    commands: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchCoalescer {
    /// Validate the config and spawn the worker task
    pub fn start(
        config: BatchConfig,
        cache: Arc<TtlCache<String>>,
        upstream: Arc<dyn Upstream>,
    ) -> ProxyResult<Self> {
        config.validate()?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            config,
            cache: cache.clone(),
            upstream,
            window: VecDeque::new(),
            in_flight: JoinSet::new(),
        };
        let handle = tokio::spawn(worker.run(receiver));

        Ok(Self {
            cache,
            commands,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Resolve a username to its UUID
    ///
    /// Cache hits (positive or negative) return immediately; misses wait
    /// for the flush that claims them.
    pub async fn resolve_name(&self, name: &str) -> ProxyResult<NameResolution> {
        metrics::record_lookup(metrics::KIND_NAME);

        if let Some(entry) = self.cache.get(name) {
            return Ok(entry.into());
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Enqueue(PendingRequest {
                name: name.to_string(),
                reply,
            }))
            .map_err(|_| ProxyError::ShuttingDown)?;

        response.await.map_err(|_| ProxyError::ShuttingDown)?
    }

    /// Flush everything still queued, wait for in-flight batches and clear
    /// the name cache. Later lookups fail with `ShuttingDown`.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Batch coalescer worker failed: {}", e);
            }
        }
    }
}

struct Worker {
    config: BatchConfig,
    cache: Arc<TtlCache<String>>,
    upstream: Arc<dyn Upstream>,
    window: VecDeque<PendingRequest>,
    in_flight: JoinSet<()>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let period = self.config.flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Enqueue(request)) => {
                        self.window.push_back(request);
                        if self.window.len() >= self.config.batch_size {
                            self.flush();
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
                _ = ticker.tick() => self.flush(),
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("Batch dispatch task failed: {}", e);
                    }
                }
            }
        }

        // Stop accepting, then pick up anything sent before the close
        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let Command::Enqueue(request) = command {
                self.window.push_back(request);
            }
        }

        if !self.window.is_empty() {
            info!(
                "Flushing {} queued username lookups before shutdown",
                self.window.len()
            );
        }
        while !self.window.is_empty() {
            self.flush();
        }

        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Batch dispatch task failed: {}", e);
            }
        }

        self.cache.clear();
        info!("Batch coalescer stopped");
    }

    /// Claim up to `batch_size` requests from the head of the window and
    /// dispatch them without waiting for the result
    fn flush(&mut self) {
        let take = self.window.len().min(self.config.batch_size);
        if take == 0 {
            return;
        }

        let batch: Vec<PendingRequest> = self.window.drain(..take).collect();
        self.in_flight.spawn(dispatch_batch(
            batch,
            self.cache.clone(),
            self.upstream.clone(),
        ));
    }
}

async fn dispatch_batch(
    batch: Vec<PendingRequest>,
    cache: Arc<TtlCache<String>>,
    upstream: Arc<dyn Upstream>,
) {
    let names: Vec<String> = batch.iter().map(|request| request.name.clone()).collect();
    metrics::record_batch(names.len());
    debug!("Dispatching batch of {} usernames", names.len());

    let found = match upstream.lookup_names(&names).await.and_then(parse_batch_response) {
        Ok(found) => found,
        Err(e) => {
            warn!("Batch of {} usernames failed: {}", names.len(), e);
            for request in batch {
                request.resolve(Err(e.clone()));
            }
            return;
        }
    };

    let now = Utc::now();
    for request in batch {
        let result = match found.get(&request.name.to_lowercase()) {
            Some(raw_id) => match raw_id.as_str().and_then(parse_canonical_id) {
                Some(id) => {
                    cache.put(&request.name, Some(id.clone()), now);
                    Ok(NameResolution::found(id))
                }
                None => {
                    warn!("Upstream returned unparseable id {} for {}", raw_id, request.name);
                    Err(ProxyError::DataIntegrity(format!(
                        "Unparseable id {} for {}",
                        raw_id, request.name
                    )))
                }
            },
            None => {
                cache.put(&request.name, None, now);
                Ok(NameResolution::missing())
            }
        };
        request.resolve(result);
    }
}

/// Classify a bulk lookup response into lowercased name → raw id
fn parse_batch_response(response: UpstreamResponse) -> ProxyResult<HashMap<String, Value>> {
    if response.status == 400 {
        return Err(ProxyError::Validation(
            "Upstream rejected the username batch".to_string(),
        ));
    }

    if !response.is_success() {
        return Err(ProxyError::UpstreamStatus(response.status));
    }

    if response.body.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let entries: Vec<ProfileName> = serde_json::from_str(&response.body).map_err(|e| {
        ProxyError::DataIntegrity(format!("Malformed batch response: {}", e))
    })?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry.name {
            Value::String(name) => Some((name.to_lowercase(), entry.id)),
            other => {
                warn!("Skipping batch entry without a usable name: {}", other);
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::cache::{CacheConfig, KeyNormalizer};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    const NOTCH_RAW: &str = "069a79f444e94726a5befca90e38aaf6";
    const NOTCH_ID: &str = "069a79f4-44e9-4726-a5be-fca90e38aaf6";

    type Responder = Box<dyn Fn(&[String]) -> ProxyResult<UpstreamResponse> + Send + Sync>;

    /// Records every batch and answers with a canned response
    struct FakeUpstream {
        batches: StdMutex<Vec<Vec<String>>>,
        respond: Responder,
    }

    impl FakeUpstream {
        fn new(
            respond: impl Fn(&[String]) -> ProxyResult<UpstreamResponse> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                batches: StdMutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn replying(status: u16, body: serde_json::Value) -> Arc<Self> {
            let body = body.to_string();
            Self::new(move |_| Ok(UpstreamResponse::new(status, body.clone())))
        }

        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Upstream for FakeUpstream {
        async fn lookup_names(&self, names: &[String]) -> ProxyResult<UpstreamResponse> {
            self.batches.lock().unwrap().push(names.to_vec());
            (self.respond)(names)
        }

        async fn fetch_profile(&self, _undashed_id: &str) -> ProxyResult<UpstreamResponse> {
            unreachable!("profile lookups never go through the coalescer")
        }
    }

    fn create_cache() -> Arc<TtlCache<String>> {
        Arc::new(TtlCache::new(
            metrics::KIND_NAME,
            KeyNormalizer::Lowercase,
            &CacheConfig::default(),
        ))
    }

    fn start(
        batch_size: usize,
        cache: Arc<TtlCache<String>>,
        upstream: Arc<FakeUpstream>,
    ) -> BatchCoalescer {
        let config = BatchConfig {
            batch_size,
            flush_interval: Duration::from_millis(3000),
        };
        BatchCoalescer::start(config, cache, upstream).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(BatchConfig::default().validate().is_ok());
        assert!(BatchConfig { batch_size: 0, ..Default::default() }.validate().is_err());
        assert!(BatchConfig { batch_size: 11, ..Default::default() }.validate().is_err());
        assert!(BatchConfig {
            flush_interval: Duration::ZERO,
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_parse_batch_response() {
        let found = parse_batch_response(UpstreamResponse::new(
            200,
            json!([{ "id": NOTCH_RAW, "name": "Notch" }]).to_string(),
        ))
        .unwrap();
        assert_eq!(found.get("notch").and_then(Value::as_str), Some(NOTCH_RAW));

        let loose = parse_batch_response(UpstreamResponse::new(
            200,
            json!([{ "id": 12345, "name": "Alice" }, { "id": NOTCH_RAW }]).to_string(),
        ))
        .unwrap();
        assert_eq!(loose.len(), 1);
        assert_eq!(loose.get("alice"), Some(&json!(12345)));

        assert!(matches!(
            parse_batch_response(UpstreamResponse::new(200, json!({ "id": NOTCH_RAW }).to_string())),
            Err(ProxyError::DataIntegrity(_))
        ));

        assert!(parse_batch_response(UpstreamResponse::new(200, "")).unwrap().is_empty());
        assert!(matches!(
            parse_batch_response(UpstreamResponse::new(200, "<html>")),
            Err(ProxyError::DataIntegrity(_))
        ));
        assert!(matches!(
            parse_batch_response(UpstreamResponse::new(400, "")),
            Err(ProxyError::Validation(_))
        ));
        assert_eq!(
            parse_batch_response(UpstreamResponse::new(429, "")),
            Err(ProxyError::UpstreamStatus(429))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger_resolves_found_and_missing() {
        let cache = create_cache();
        let upstream =
            FakeUpstream::replying(200, json!([{ "id": NOTCH_RAW, "name": "Alice" }]));
        let coalescer = start(2, cache.clone(), upstream.clone());

        let started = Instant::now();
        let (alice, bob) = tokio::join!(
            coalescer.resolve_name("Alice"),
            coalescer.resolve_name("Bob")
        );

        assert!(started.elapsed() < Duration::from_millis(3000));
        assert_eq!(alice.unwrap(), NameResolution::found(NOTCH_ID.to_string()));
        assert_eq!(bob.unwrap(), NameResolution::missing());
        assert_eq!(upstream.batches(), vec![vec!["Alice".to_string(), "Bob".to_string()]]);

        assert_eq!(cache.get("alice").unwrap().value.as_deref(), Some(NOTCH_ID));
        assert!(cache.get("bob").unwrap().value.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_lookup_is_served_from_cache() {
        let upstream =
            FakeUpstream::replying(200, json!([{ "id": NOTCH_RAW, "name": "Alice" }]));
        let coalescer = start(2, create_cache(), upstream.clone());

        let _ = tokio::join!(
            coalescer.resolve_name("Alice"),
            coalescer.resolve_name("Bob")
        );

        assert_eq!(
            coalescer.resolve_name("ALICE").await.unwrap(),
            NameResolution::found(NOTCH_ID.to_string())
        );
        assert_eq!(coalescer.resolve_name("bob").await.unwrap(), NameResolution::missing());
        assert_eq!(upstream.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_trigger() {
        let upstream = FakeUpstream::replying(200, json!([]));
        let coalescer = start(10, create_cache(), upstream.clone());

        let started = Instant::now();
        let result = coalescer.resolve_name("lonely").await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert!(!result.exists);
        assert_eq!(upstream.batches(), vec![vec!["lonely".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_failure_is_not_cached() {
        let cache = create_cache();
        let upstream = FakeUpstream::replying(400, json!({ "error": "bad request" }));
        let coalescer = start(2, cache.clone(), upstream);

        let (a, b) = tokio::join!(
            coalescer.resolve_name("Alice"),
            coalescer.resolve_name("Bob")
        );

        assert!(matches!(a, Err(ProxyError::Validation(_))));
        assert!(matches!(b, Err(ProxyError::Validation(_))));
        assert!(cache.get("alice").is_none());
        assert!(cache.get("bob").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_fails_whole_batch() {
        let cache = create_cache();
        let upstream = FakeUpstream::replying(503, json!(null));
        let coalescer = start(2, cache.clone(), upstream);

        let (a, b) = tokio::join!(
            coalescer.resolve_name("Alice"),
            coalescer.resolve_name("Bob")
        );

        assert_eq!(a, Err(ProxyError::UpstreamStatus(503)));
        assert_eq!(b, Err(ProxyError::UpstreamStatus(503)));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_whole_batch() {
        let cache = create_cache();
        let upstream = FakeUpstream::new(|_| Err(ProxyError::Timeout));
        let coalescer = start(2, cache.clone(), upstream);

        let (a, b) = tokio::join!(
            coalescer.resolve_name("Alice"),
            coalescer.resolve_name("Bob")
        );

        assert_eq!(a, Err(ProxyError::Timeout));
        assert_eq!(b, Err(ProxyError::Timeout));
        assert!(cache.get("alice").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_id_only_fails_its_own_request() {
        let cache = create_cache();
        let upstream = FakeUpstream::replying(
            200,
            json!([
                { "id": "not-a-uuid", "name": "Alice" },
                { "id": NOTCH_RAW, "name": "Bob" }
            ]),
        );
        let coalescer = start(2, cache.clone(), upstream);

        let (alice, bob) = tokio::join!(
            coalescer.resolve_name("Alice"),
            coalescer.resolve_name("Bob")
        );

        assert!(matches!(alice, Err(ProxyError::DataIntegrity(_))));
        assert_eq!(bob.unwrap(), NameResolution::found(NOTCH_ID.to_string()));
        assert!(cache.get("alice").is_none());
        assert!(cache.get("bob").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_string_id_only_fails_its_own_request() {
        let cache = create_cache();
        let upstream = FakeUpstream::replying(
            200,
            json!([
                { "id": 12345, "name": "Alice" },
                { "id": NOTCH_RAW, "name": "Bob" }
            ]),
        );
        let coalescer = start(2, cache.clone(), upstream);

        let (alice, bob) = tokio::join!(
            coalescer.resolve_name("Alice"),
            coalescer.resolve_name("Bob")
        );

        assert!(matches!(alice, Err(ProxyError::DataIntegrity(_))));
        assert_eq!(bob.unwrap(), NameResolution::found(NOTCH_ID.to_string()));
        assert!(cache.get("alice").is_none());
        assert_eq!(cache.get("bob").unwrap().value.as_deref(), Some(NOTCH_ID));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_names_are_sent_as_is() {
        let upstream =
            FakeUpstream::replying(200, json!([{ "id": NOTCH_RAW, "name": "Steve" }]));
        let coalescer = start(2, create_cache(), upstream.clone());

        let (a, b) = tokio::join!(
            coalescer.resolve_name("Steve"),
            coalescer.resolve_name("steve")
        );

        assert_eq!(a.unwrap(), NameResolution::found(NOTCH_ID.to_string()));
        assert_eq!(b.unwrap(), NameResolution::found(NOTCH_ID.to_string()));
        assert_eq!(upstream.batches(), vec![vec!["Steve".to_string(), "steve".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_every_queued_request_once() {
        let cache = create_cache();
        let upstream = FakeUpstream::replying(200, json!([]));
        let coalescer = Arc::new(start(3, cache.clone(), upstream.clone()));

        let mut lookups = Vec::new();
        for i in 0..5 {
            let coalescer = coalescer.clone();
            lookups.push(tokio::spawn(async move {
                coalescer.resolve_name(&format!("player{}", i)).await
            }));
        }

        // Let every lookup reach the queue, well before the timer fires
        tokio::time::sleep(Duration::from_millis(10)).await;
        coalescer.shutdown().await;

        for lookup in lookups {
            assert_eq!(lookup.await.unwrap().unwrap(), NameResolution::missing());
        }

        let mut sent: Vec<String> = upstream.batches().into_iter().flatten().collect();
        sent.sort();
        assert_eq!(
            sent,
            (0..5).map(|i| format!("player{}", i)).collect::<Vec<_>>()
        );
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_after_shutdown_fails() {
        let upstream = FakeUpstream::replying(200, json!([]));
        let coalescer = start(2, create_cache(), upstream.clone());

        coalescer.shutdown().await;
        coalescer.shutdown().await;

        assert_eq!(
            coalescer.resolve_name("late").await,
            Err(ProxyError::ShuttingDown)
        );
        assert!(upstream.batches().is_empty());
    }
}
