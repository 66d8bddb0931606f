use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

/// Liveness and readiness routes.
pub mod health;
/// Session CRUD routes.
pub mod session;
/// Push stream route.
pub mod sse;

/// Interactive API browser.
pub const SWAGGER_UI_PATH: &str = "/docs";
/// Generated OpenAPI document the browser loads.
pub const OPENAPI_JSON_PATH: &str = "/api-doc/openapi.json";

/// Compose the session, push and health routes plus the API browser.
pub fn router(state: SharedState) -> Router<()> {
    let api = health::router()
        .merge(session::router())
        .merge(sse::router())
        .with_state(state);

    api.merge(SwaggerUi::new(SWAGGER_UI_PATH).url(OPENAPI_JSON_PATH, ApiDoc::openapi()))
}
