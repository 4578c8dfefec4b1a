/// Mojang API endpoints
///
/// `/mojang/uuid/:name` resolves a username through the batch coalescer,
/// `/mojang/skin/:uuid` resolves a profile straight through the cache.
use crate::{
    context::AppContext,
    error::ProxyResult,
    identity::{NameResolution, ProfileResolution, SkinProperty},
    validation::validate_username,
};
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

/// Downstream caches may keep answers for 15 minutes
pub const CACHE_CONTROL: &str = "public, max-age=900";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UuidResponse {
    pub exists: bool,
    pub uuid: Option<String>,
}

impl From<NameResolution> for UuidResponse {
    fn from(resolution: NameResolution) -> Self {
        Self {
            exists: resolution.exists,
            uuid: resolution.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub exists: bool,
    pub skin_property: Option<SkinProperty>,
}

impl From<ProfileResolution> for ProfileResponse {
    fn from(resolution: ProfileResolution) -> Self {
        Self {
            exists: resolution.exists,
            skin_property: resolution.skin_property,
        }
    }
}

/// Build Mojang routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/mojang/uuid/:name", get(name_to_uuid))
        .route("/mojang/skin/:uuid", get(uuid_to_skin))
}

/// GET /mojang/uuid/:name
pub async fn name_to_uuid(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> ProxyResult<Response> {
    validate_username(&name)?;

    let resolution = ctx.coalescer.resolve_name(&name).await?;

    Ok(cacheable(UuidResponse::from(resolution)))
}

/// GET /mojang/skin/:uuid
pub async fn uuid_to_skin(
    State(ctx): State<AppContext>,
    Path(uuid): Path<String>,
) -> ProxyResult<Response> {
    let resolution = ctx.profiles.resolve_profile(&uuid).await?;

    Ok(cacheable(ProfileResponse::from(resolution)))
}

fn cacheable<T: Serialize>(body: T) -> Response {
    let mut response = Json(body).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    response
}
