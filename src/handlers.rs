use std::collections::BTreeMap;
use std::time::Instant;

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::client::CachedTenantClient;
use crate::decode;
use crate::error::{ErrorKind, UpstreamError};
use crate::models::{
    CacheStats, ErrorResponse, HealthcheckResponse, Region, ResetResponse, SecretEntry,
    SecretResponse, StatsResponse,
};
use crate::state::AppState;

pub type ApiResult<T> = Result<T, ApiError>;

/// Endpoint groups the prometheus middleware reports on.
const TRACKED_ENDPOINTS: &[&str] = &["/reset", "/id", "/key"];

/// HTTP-facing error: the upstream taxonomy plus the request-shape failures
/// only this layer can produce.
#[derive(Debug)]
pub enum ApiError {
    Upstream(UpstreamError),
    MissingAuthorization,
    MissingRegion,
    InvalidRegionHeaders(String),
    InvalidSecretId(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::Upstream(err) => (status_for(err.kind()), err.to_string()),
            ApiError::MissingAuthorization => {
                (StatusCode::UNAUTHORIZED, "Invalid token".to_string())
            }
            ApiError::MissingRegion => (
                StatusCode::BAD_REQUEST,
                "No default region configured and no region headers supplied".to_string(),
            ),
            ApiError::InvalidRegionHeaders(detail) => (StatusCode::BAD_REQUEST, detail.clone()),
            ApiError::InvalidSecretId(raw) => {
                (StatusCode::BAD_REQUEST, format!("Invalid secret id: {raw}"))
            }
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        Self::Upstream(err)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized | ErrorKind::InvalidToken => StatusCode::UNAUTHORIZED,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::MissingSecret | ErrorKind::UnknownKey | ErrorKind::UnknownOrg => {
            StatusCode::NOT_FOUND
        }
        ErrorKind::InvalidSecretId => StatusCode::BAD_REQUEST,
        ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::MissingAuthorization)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Region headers override the configured default. A custom endpoint pair
/// must be supplied together; `BWS_REGION=NONE` deployments require one of
/// the header forms on every request.
fn resolve_region(state: &AppState, headers: &HeaderMap) -> Result<Region, ApiError> {
    let api_url = header_value(headers, "X-BWS-API-URL");
    let identity_url = header_value(headers, "X-BWS-IDENTITY-URL");

    match (api_url, identity_url) {
        (Some(api_url), Some(identity_url)) => {
            return Ok(Region {
                api_url,
                identity_url,
            })
        }
        (None, None) => {}
        _ => {
            return Err(ApiError::InvalidRegionHeaders(
                "X-BWS-API-URL and X-BWS-IDENTITY-URL must be supplied together".to_string(),
            ))
        }
    }

    if let Some(named) = header_value(headers, "X-BWS-REGION") {
        return match named.to_uppercase().as_str() {
            "DEFAULT" => Ok(Region::bitwarden_com()),
            "EU" => Ok(Region::bitwarden_eu()),
            other => Err(ApiError::InvalidRegionHeaders(format!(
                "Unrecognized X-BWS-REGION value: {other}"
            ))),
        };
    }

    state
        .config
        .default_region
        .clone()
        .ok_or(ApiError::MissingRegion)
}

/// Resolves the caller's tenant, creating it on first use.
fn client_for(state: &AppState, headers: &HeaderMap) -> Result<CachedTenantClient, ApiError> {
    let token = bearer_token(headers)?;
    let region = resolve_region(state, headers)?;
    let tenant = state.registry.get_or_create(&token, &region);
    Ok(CachedTenantClient::new(
        tenant,
        state.pacer.clone(),
        state.metrics.clone(),
    ))
}

fn secret_response(state: &AppState, entry: SecretEntry) -> SecretResponse {
    SecretResponse {
        id: entry.id.to_string(),
        key: entry.key,
        value: decode::render_value(&entry.value, state.config.parse_secret_values),
    }
}

/// GET /id/{secret_id} - Fetch a secret by UUID
#[utoipa::path(
    get,
    path = "/id/{secret_id}",
    params(("secret_id" = String, Path, description = "Secret UUID")),
    responses(
        (status = 200, description = "Secret found", body = SecretResponse),
        (status = 400, description = "Malformed secret id", body = ErrorResponse),
        (status = 401, description = "Invalid or unauthorized token", body = ErrorResponse),
        (status = 404, description = "Secret not found", body = ErrorResponse),
        (status = 429, description = "Upstream rate limited", body = ErrorResponse),
    ),
    tag = "Secrets"
)]
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(secret_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<SecretResponse>> {
    let client = client_for(&state, &headers)?;
    let id =
        Uuid::parse_str(&secret_id).map_err(|_| ApiError::InvalidSecretId(secret_id.clone()))?;
    let entry = client.get_by_id(id).await?;
    Ok(Json(secret_response(&state, entry)))
}

/// GET /key/{secret_key} - Fetch a secret by its human-readable key
#[utoipa::path(
    get,
    path = "/key/{secret_key}",
    params(("secret_key" = String, Path, description = "Secret key")),
    responses(
        (status = 200, description = "Secret found", body = SecretResponse),
        (status = 401, description = "Invalid or unauthorized token", body = ErrorResponse),
        (status = 404, description = "Key not found", body = ErrorResponse),
        (status = 429, description = "Upstream rate limited", body = ErrorResponse),
    ),
    tag = "Secrets"
)]
pub async fn get_by_key(
    State(state): State<AppState>,
    Path(secret_key): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<SecretResponse>> {
    let client = client_for(&state, &headers)?;
    let entry = client.get_by_key(&secret_key).await?;
    Ok(Json(secret_response(&state, entry)))
}

/// GET /reset - Clear the caller's tenant cache
#[utoipa::path(
    get,
    path = "/reset",
    responses(
        (status = 200, description = "Cache cleared", body = ResetResponse),
        (status = 401, description = "Invalid or unauthorized token", body = ErrorResponse),
    ),
    tag = "Cache"
)]
pub async fn reset_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ResetResponse>> {
    let client = client_for(&state, &headers)?;
    let before = client.reset();
    Ok(Json(ResetResponse {
        status: "success".to_string(),
        before,
        after: CacheStats::default(),
    }))
}

/// GET /stats - Aggregate cache sizes across all tenants
#[utoipa::path(
    get,
    path = "/stats",
    responses((status = 200, description = "Aggregated tenant stats", body = StatsResponse)),
    tag = "Cache"
)]
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let tenants = state.registry.snapshot();
    let mut client_stats = BTreeMap::new();
    let mut total_stats = CacheStats::default();

    for tenant in &tenants {
        let stats = tenant.cache.stats();
        total_stats.secret_cache_size += stats.secret_cache_size;
        total_stats.keymap_cache_size += stats.keymap_cache_size;
        state
            .metrics
            .set_cache_size("secret", tenant.fingerprint(), stats.secret_cache_size);
        state
            .metrics
            .set_cache_size("keymap", tenant.fingerprint(), stats.keymap_cache_size);
        client_stats.insert(tenant.fingerprint().to_string(), stats);
    }
    state
        .metrics
        .set_cache_size("secret", "total", total_stats.secret_cache_size);
    state
        .metrics
        .set_cache_size("keymap", "total", total_stats.keymap_cache_size);
    state.metrics.set_num_clients(tenants.len());

    Json(StatsResponse {
        num_clients: tenants.len(),
        client_stats,
        total_stats,
    })
}

/// GET /metrics - Prometheus exposition
#[utoipa::path(
    get,
    path = "/metrics",
    responses((status = 200, description = "Metrics in prometheus text format")),
    tag = "Observability"
)]
pub async fn metrics_exposition(State(state): State<AppState>) -> Response {
    let (body, content_type) = state.metrics.render();
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// GET /healthcheck - Liveness probe
#[utoipa::path(
    get,
    path = "/healthcheck",
    responses((status = 200, description = "Process is alive", body = HealthcheckResponse)),
    tag = "Observability"
)]
pub async fn healthcheck() -> Json<HealthcheckResponse> {
    Json(HealthcheckResponse::alive())
}

/// GET /openapi.json - Machine-readable API description
pub async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    use utoipa::OpenApi;
    Json(crate::openapi::ApiDoc::openapi())
}

/// Counts requests and records durations for the cache-facing endpoints.
pub async fn track_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let endpoint = TRACKED_ENDPOINTS
        .iter()
        .find(|prefix| req.uri().path().starts_with(**prefix))
        .copied();

    let started = Instant::now();
    let response = next.run(req).await;

    if let Some(endpoint) = endpoint {
        state
            .metrics
            .tick_http_request(endpoint, response.status().as_str());
        state
            .metrics
            .observe_http_duration(endpoint, started.elapsed().as_secs_f64());
    }
    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/id/:secret_id", get(get_by_id))
        .route("/key/:secret_key", get(get_by_key))
        .route("/reset", get(reset_cache))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics_exposition))
        .route("/healthcheck", get(healthcheck))
        .route("/openapi.json", get(openapi_spec))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
