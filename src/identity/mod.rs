/// Identity Resolution System
///
/// Handles username→UUID and UUID→skin resolution, caching
/// and batching of upstream Mojang lookups.

pub mod cache;
pub mod coalescer;
pub mod profile;

pub use cache::{CacheConfig, CacheEntry, IdentityCaches, KeyNormalizer, TtlCache};
pub use coalescer::{BatchCoalescer, BatchConfig};
pub use profile::ProfileResolver;

use crate::error::{ProxyError, ProxyResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Signed skin texture property as served by the session server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkinProperty {
    pub value: String,
    pub signature: String,
}

/// Username resolution result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameResolution {
    pub exists: bool,
    /// Canonical dashed lowercase UUID
    pub id: Option<String>,
}

impl NameResolution {
    pub fn found(id: String) -> Self {
        Self {
            exists: true,
            id: Some(id),
        }
    }

    pub fn missing() -> Self {
        Self {
            exists: false,
            id: None,
        }
    }
}

impl From<CacheEntry<String>> for NameResolution {
    fn from(entry: CacheEntry<String>) -> Self {
        match entry.value {
            Some(id) => Self::found(id),
            None => Self::missing(),
        }
    }
}

/// Profile resolution result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileResolution {
    pub exists: bool,
    pub skin_property: Option<SkinProperty>,
}

impl From<CacheEntry<SkinProperty>> for ProfileResolution {
    fn from(entry: CacheEntry<SkinProperty>) -> Self {
        Self {
            exists: entry.value.is_some(),
            skin_property: entry.value,
        }
    }
}

/// Parse a dashed or undashed UUID into canonical dashed lowercase form
///
/// Braced and URN forms are rejected; Mojang never produces them.
pub fn parse_canonical_id(raw: &str) -> Option<String> {
    if raw.len() != 32 && raw.len() != 36 {
        return None;
    }

    Uuid::try_parse(raw)
        .ok()
        .map(|uuid| uuid.hyphenated().to_string())
}

/// Parse an id, failing with `InvalidId`
pub fn require_canonical_id(raw: &str) -> ProxyResult<String> {
    parse_canonical_id(raw).ok_or_else(|| ProxyError::InvalidId(raw.to_string()))
}

/// Undashed form used in session server URLs
pub fn undashed_id(canonical: &str) -> String {
    canonical.replace('-', "")
}
