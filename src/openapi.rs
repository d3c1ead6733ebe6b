use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "bws-cache",
        version = "1.0.0",
        description = "Multi-tenant caching proxy for the Bitwarden Secrets Manager API"
    ),
    paths(
        crate::handlers::get_by_id,
        crate::handlers::get_by_key,
        crate::handlers::reset_cache,
        crate::handlers::stats,
        crate::handlers::metrics_exposition,
        crate::handlers::healthcheck,
    ),
    components(
        schemas(
            crate::models::SecretResponse,
            crate::models::ResetResponse,
            crate::models::StatsResponse,
            crate::models::CacheStats,
            crate::models::HealthcheckResponse,
            crate::models::ErrorResponse,
        )
    ),
    tags(
        (name = "Secrets", description = "Cached secret lookups by id or key"),
        (name = "Cache", description = "Cache management and statistics"),
        (name = "Observability", description = "Liveness and metrics endpoints")
    )
)]
pub struct ApiDoc;
