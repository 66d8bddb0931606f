use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
};
use axum_valid::Valid;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    dto::session::{CreateSessionRequest, JoinLinkResponse, SessionRecord, Writer},
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Header identifying the host on state writes and deactivation.
pub const HOST_ID_HEADER: &str = "x-host-id";

/// Session record endpoints used by host and controller devices.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{code}", get(get_session_by_code))
        .route("/sessions/id/{id}", get(get_session_by_id))
        .route("/sessions/id/{id}/state", patch(update_state))
        .route("/sessions/id/{id}/deactivate", post(deactivate_session))
        .route("/join/{code}", get(join_link))
}

fn host_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(HOST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
}

#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = SessionRecord),
        (status = 400, description = "Malformed code or host id"),
        (status = 409, description = "Session code already in use")
    )
)]
/// Create a session under the code picked by the host device.
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionRecord>), AppError> {
    let record = session_service::create(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[utoipa::path(
    get,
    path = "/sessions/{code}",
    tag = "sessions",
    params(("code" = String, Path, description = "Session code, any case")),
    responses(
        (status = 200, description = "Active session", body = SessionRecord),
        (status = 404, description = "No active session with this code")
    )
)]
/// Look up an active session by its code.
pub async fn get_session_by_code(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<SessionRecord>, AppError> {
    let record = session_service::fetch_by_code(&state, &code).await?;
    Ok(Json(record))
}

#[utoipa::path(
    get,
    path = "/sessions/id/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session, active or ended", body = SessionRecord),
        (status = 404, description = "Unknown session")
    )
)]
/// Fetch a session by identifier, including ended ones.
pub async fn get_session_by_id(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionRecord>, AppError> {
    let record = session_service::fetch_by_id(&state, id).await?;
    Ok(Json(record))
}

#[utoipa::path(
    patch,
    path = "/sessions/id/{id}/state",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-host-id" = Option<String>, Header, description = "Host id; omitted by controllers")
    ),
    request_body(content = Object, description = "Top-level game state keys to replace"),
    responses(
        (status = 200, description = "Merged session", body = SessionRecord),
        (status = 401, description = "Writer may not touch these keys"),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Session has ended")
    )
)]
/// Shallow-merge a patch into the session's game state.
pub async fn update_state(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(patch): Json<Map<String, Value>>,
) -> Result<Json<SessionRecord>, AppError> {
    let writer = Writer::from_header(host_id(&headers));
    let record = session_service::update_state(&state, id, writer, patch).await?;
    Ok(Json(record))
}

#[utoipa::path(
    post,
    path = "/sessions/id/{id}/deactivate",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("x-host-id" = String, Header, description = "Id of the host that created the session")
    ),
    responses(
        (status = 200, description = "Session ended", body = SessionRecord),
        (status = 401, description = "Missing or foreign host id"),
        (status = 409, description = "Session already ended")
    )
)]
/// End a session; only its host may do this.
pub async fn deactivate_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<SessionRecord>, AppError> {
    let host_id = host_id(&headers)
        .ok_or_else(|| AppError::Unauthorized("missing host id header `X-Host-Id`".into()))?;
    let record = session_service::deactivate(&state, id, host_id).await?;
    Ok(Json(record))
}

#[utoipa::path(
    get,
    path = "/join/{code}",
    tag = "sessions",
    params(("code" = String, Path, description = "Session code, any case")),
    responses(
        (status = 200, description = "Join link for controllers", body = JoinLinkResponse),
        (status = 404, description = "No active session with this code")
    )
)]
/// Return the URL a controller opens to join, as encoded in the host's QR code.
pub async fn join_link(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<JoinLinkResponse>, AppError> {
    let link = session_service::join_link(&state, &code).await?;
    Ok(Json(link))
}
