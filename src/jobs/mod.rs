use crate::{
    context::AppContext,
    error::{ProxyError, ProxyResult},
};
use reqwest::Client;
use std::sync::{Arc, Mutex};
use tokio::{
    task::JoinHandle,
    time::{interval, Duration, Instant},
};
use tracing::{debug, error, info};

pub mod tasks;

/// Rate limiter pruning and cache maintenance cadence
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
    /// Client for the telemetry webhook; upstream traffic never uses it
    webhook_client: Client,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> ProxyResult<Self> {
        let webhook_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to create webhook client: {}", e)))?;

        Ok(Self {
            context,
            webhook_client,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Start all background jobs
    pub fn start(self: &Arc<Self>) {
        info!("Starting background job scheduler");

        let jobs = vec![
            tokio::spawn(Self::telemetry_report_job(Arc::clone(self))),
            tokio::spawn(Self::rate_limit_cleanup_job(Arc::clone(self))),
            tokio::spawn(Self::cache_maintenance_job(Arc::clone(self))),
        ];

        if let Ok(mut handles) = self.handles.lock() {
            handles.extend(jobs);
        }

        if self.context.config.telemetry.discord_webhook.is_none() {
            info!("DISCORD_WEBHOOK not set, telemetry reports are logged only");
        }
        info!("Background jobs started");
    }

    /// Abort all running jobs
    pub fn stop(&self) {
        if let Ok(mut handles) = self.handles.lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
        info!("Background jobs stopped");
    }

    /// Telemetry report (every TELEMETRY_REPORT_INTERVAL_SECS)
    async fn telemetry_report_job(scheduler: Arc<Self>) {
        let period = scheduler.context.config.telemetry.report_interval;
        let started_at = Instant::now();
        let mut last_report = started_at;

        let mut interval = interval(period);
        // First tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let now = Instant::now();

            match tasks::report_telemetry(
                &scheduler.context,
                &scheduler.webhook_client,
                now - started_at,
                now - last_report,
            )
            .await
            {
                Ok(snapshot) => debug!("Reported {} lookups", snapshot.total_lookups()),
                Err(e) => error!("Failed to send telemetry report: {}", e),
            }

            last_report = now;
        }
    }

    /// Prune idle rate limiter keys (runs every minute)
    async fn rate_limit_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(HOUSEKEEPING_INTERVAL);

        loop {
            interval.tick().await;

            let tracked = tasks::prune_rate_limits(&scheduler.context);
            debug!("Rate limiter tracking {} clients", tracked);
        }
    }

    /// Apply cache evictions and update size gauges (runs every minute)
    async fn cache_maintenance_job(scheduler: Arc<Self>) {
        let mut interval = interval(HOUSEKEEPING_INTERVAL);

        loop {
            interval.tick().await;

            let (names, profiles) = tasks::maintain_caches(&scheduler.context);
            debug!("Cache sizes: {} names, {} profiles", names, profiles);
        }
    }
}
