use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the session provider.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::session::create_session,
        crate::routes::session::get_session_by_code,
        crate::routes::session::get_session_by_id,
        crate::routes::session::update_state,
        crate::routes::session::deactivate_session,
        crate::routes::session::join_link,
        crate::routes::sse::session_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::SessionRecord,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::JoinLinkResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Shared session records"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
/// OpenAPI root for the REST and SSE routes.
pub struct ApiDoc;
