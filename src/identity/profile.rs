/// Profile resolver - UUID to skin property, straight through cache and upstream
///
/// The session server has no bulk form, so these lookups skip the coalescer.
use crate::{
    error::{ProxyError, ProxyResult},
    identity::{cache::TtlCache, require_canonical_id, undashed_id, ProfileResolution, SkinProperty},
    metrics,
    upstream::Upstream,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const TEXTURES_PROPERTY: &str = "textures";

/// Session server profile document (only the parts we use)
#[derive(Debug, Deserialize)]
struct SessionProfile {
    #[serde(default)]
    properties: Vec<ProfileProperty>,
}

#[derive(Debug, Deserialize)]
struct ProfileProperty {
    name: String,
    value: String,
    #[serde(default)]
    signature: String,
}

pub struct ProfileResolver {
    cache: Arc<TtlCache<SkinProperty>>,
    upstream: Arc<dyn Upstream>,
}

impl ProfileResolver {
    pub fn new(cache: Arc<TtlCache<SkinProperty>>, upstream: Arc<dyn Upstream>) -> Self {
        Self { cache, upstream }
    }

    /// Resolve a dashed or undashed UUID to its skin property
    pub async fn resolve_profile(&self, id: &str) -> ProxyResult<ProfileResolution> {
        metrics::record_lookup(metrics::KIND_PROFILE);

        let canonical = require_canonical_id(id)?;

        if let Some(entry) = self.cache.get(&canonical) {
            return Ok(entry.into());
        }

        debug!("Fetching profile {} from session server", canonical);
        let response = self.upstream.fetch_profile(&undashed_id(&canonical)).await?;

        let skin = match response.status {
            204 | 404 => None,
            status if !response.is_success() => {
                warn!("Session server returned HTTP {} for {}", status, canonical);
                return Err(ProxyError::UpstreamStatus(status));
            }
            _ => parse_textures(&response.body)?,
        };

        self.cache.put(&canonical, skin.clone(), Utc::now());

        Ok(ProfileResolution {
            exists: skin.is_some(),
            skin_property: skin,
        })
    }
}

/// Extract the `textures` property from a profile document
fn parse_textures(body: &str) -> ProxyResult<Option<SkinProperty>> {
    if body.trim().is_empty() {
        return Ok(None);
    }

    let profile: SessionProfile = serde_json::from_str(body)
        .map_err(|e| ProxyError::DataIntegrity(format!("Malformed profile response: {}", e)))?;

    Ok(profile
        .properties
        .into_iter()
        .find(|property| property.name == TEXTURES_PROPERTY)
        .map(|property| SkinProperty {
            value: property.value,
            signature: property.signature,
        }))
}
