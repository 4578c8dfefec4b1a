/// Background task implementations
use crate::{
    context::AppContext,
    error::{ProxyError, ProxyResult},
    metrics::{self, TelemetrySnapshot},
};
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Embed colors by upstream error count
const COLOR_HEALTHY: u32 = 0x2ecc71;
const COLOR_DEGRADED: u32 = 0xf39c12;
const COLOR_FAILING: u32 = 0xe74c3c;

/// Read and reset the telemetry counters, log them and post them to the
/// Discord webhook if one is configured
pub async fn report_telemetry(
    ctx: &AppContext,
    client: &Client,
    uptime: Duration,
    period: Duration,
) -> ProxyResult<TelemetrySnapshot> {
    let snapshot = TelemetrySnapshot::collect_and_reset();

    info!(
        lookups = snapshot.total_lookups(),
        name_lookups = snapshot.name_lookups,
        profile_lookups = snapshot.profile_lookups,
        batches = snapshot.batches_processed,
        upstream_requests = snapshot.upstream_requests,
        upstream_errors = snapshot.upstream_errors,
        "Telemetry report"
    );

    if let Some(webhook) = &ctx.config.telemetry.discord_webhook {
        let payload = build_discord_report(&snapshot, uptime, period, &ctx.config.service.version);

        let response = client
            .post(webhook)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProxyError::Transport(format!("Discord webhook failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ProxyError::UpstreamStatus(response.status().as_u16()));
        }
        debug!("Telemetry report delivered to Discord");
    }

    Ok(snapshot)
}

/// Discord webhook payload for one reporting period
pub fn build_discord_report(
    snapshot: &TelemetrySnapshot,
    uptime: Duration,
    period: Duration,
    version: &str,
) -> Value {
    let color = match snapshot.upstream_errors {
        0 => COLOR_HEALTHY,
        1..=10 => COLOR_DEGRADED,
        _ => COLOR_FAILING,
    };

    let minutes = period.as_secs_f64() / 60.0;
    let per_minute = if minutes > 0.0 {
        format!("{:.1}", snapshot.total_lookups() as f64 / minutes)
    } else {
        "N/A".to_string()
    };
    let hit_rate = snapshot
        .cache_hit_rate()
        .map(|rate| format!("{:.1}%", rate * 100.0))
        .unwrap_or_else(|| "N/A".to_string());
    let average_batch = snapshot
        .average_batch_size()
        .map(|size| format!("{:.1}", size))
        .unwrap_or_else(|| "N/A".to_string());

    let requests = [
        format!("**Total:** {}", snapshot.total_lookups()),
        format!("**UUID Lookups:** {}", snapshot.name_lookups),
        format!("**Skin Lookups:** {}", snapshot.profile_lookups),
        format!("**Req/min:** {}", per_minute),
    ]
    .join("\n");
    let cache = [
        format!("**Hit Rate:** {}", hit_rate),
        format!(
            "**UUID:** {} hit / {} miss",
            snapshot.name_cache_hits, snapshot.name_cache_misses
        ),
        format!(
            "**Skin:** {} hit / {} miss",
            snapshot.profile_cache_hits, snapshot.profile_cache_misses
        ),
    ]
    .join("\n");
    let batching = [
        format!("**Batches:** {}", snapshot.batches_processed),
        format!("**Usernames:** {}", snapshot.names_batched),
        format!("**Avg Size:** {}", average_batch),
    ]
    .join("\n");
    let backend = [
        format!("**Requests:** {}", snapshot.upstream_requests),
        format!("**Errors:** {}", snapshot.upstream_errors),
        format!("**Sent:** {}", format_bytes(snapshot.bytes_sent)),
        format!("**Received:** {}", format_bytes(snapshot.bytes_received)),
    ]
    .join("\n");

    json!({
        "embeds": [{
            "title": "Mojang API Proxy - Status Report",
            "color": color,
            "fields": [
                { "name": "Server", "value": format!("**Uptime:** {}", format_uptime(uptime)), "inline": false },
                { "name": "Requests", "value": requests, "inline": true },
                { "name": "Cache", "value": cache, "inline": true },
                { "name": "Batching", "value": batching, "inline": true },
                { "name": "Mojang Backend", "value": backend, "inline": true }
            ],
            "timestamp": Utc::now().to_rfc3339(),
            "footer": { "text": format!("mojang-api-proxy v{}", version) }
        }]
    })
}

/// Drop rate limiter state for idle clients
pub fn prune_rate_limits(ctx: &AppContext) -> usize {
    ctx.rate_limiter.prune()
}

/// Run pending cache evictions and publish cache sizes
pub fn maintain_caches(ctx: &AppContext) -> (u64, u64) {
    let names = ctx.caches.names.run_maintenance();
    let profiles = ctx.caches.profiles.run_maintenance();

    metrics::record_cache_size(metrics::KIND_NAME, names);
    metrics::record_cache_size(metrics::KIND_PROFILE, profiles);

    (names, profiles)
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    if bytes < KIB {
        format!("{} B", bytes)
    } else if bytes < MIB {
        format!("{:.2} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    }
}

fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        (total % 86_400) / 3600,
        (total % 3600) / 60,
        total % 60,
    );

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    parts.push(format!("{}s", seconds));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(42)), "42s");
        assert_eq!(format_uptime(Duration::from_secs(3661)), "1h 1m 1s");
        assert_eq!(format_uptime(Duration::from_secs(90_000)), "1d 1h 0s");
    }

    #[test]
    fn test_discord_report() {
        let snapshot = TelemetrySnapshot {
            name_lookups: 90,
            profile_lookups: 30,
            name_cache_hits: 60,
            name_cache_misses: 30,
            upstream_errors: 3,
            ..Default::default()
        };

        let report = build_discord_report(
            &snapshot,
            Duration::from_secs(600),
            Duration::from_secs(300),
            "1.0.0",
        );
        let embed = &report["embeds"][0];

        assert_eq!(embed["color"], COLOR_DEGRADED);
        let requests = embed["fields"][1]["value"].as_str().unwrap();
        assert!(requests.contains("**Total:** 120"));
        assert!(requests.contains("**Req/min:** 24.0"));
        let cache = embed["fields"][2]["value"].as_str().unwrap();
        assert!(cache.contains("66.7%"));
    }
}
