mod common;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use party_wheel_back::routes;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn app() -> Router {
    routes::router(common::provider().await)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    host_id: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(host_id) = host_id {
        request = request.header("x-host-id", host_id);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn session_lifecycle_over_http() {
    let app = app().await;

    let (status, created) = send(
        &app,
        Method::POST,
        "/sessions",
        None,
        Some(json!({"sessionCode": "kolo-4321", "hostId": "host-1", "gameState": {"round": 1}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["sessionCode"], "KOLO-4321");
    assert_eq!(created["isActive"], true);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        Method::POST,
        "/sessions",
        None,
        Some(json!({"sessionCode": "KOLO-4321", "hostId": "host-2"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, fetched) = send(&app, Method::GET, "/sessions/kolo-4321", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], id);

    let state_uri = format!("/sessions/id/{id}/state");
    let (status, body) = send(&app, Method::PATCH, &state_uri, None, Some(json!({"round": 5}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap().contains("mailbox"));

    let (status, merged) = send(
        &app,
        Method::PATCH,
        &state_uri,
        None,
        Some(json!({"_pendingCommand": {"type": "toggle-sound"}, "_commandTimestamp": 7})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(merged["gameState"]["round"], 1);

    let (status, merged) = send(
        &app,
        Method::PATCH,
        &state_uri,
        Some("host-1"),
        Some(json!({"round": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(merged["gameState"]["round"], 2);
    assert_eq!(merged["gameState"]["_commandTimestamp"], 7);

    let (status, link) = send(&app, Method::GET, "/join/KOLO-4321", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(link["url"], "http://localhost:8080/remote/KOLO-4321");

    let deactivate_uri = format!("/sessions/id/{id}/deactivate");
    let (status, _) = send(&app, Method::POST, &deactivate_uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, ended) = send(&app, Method::POST, &deactivate_uri, Some("host-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["isActive"], false);

    let (status, _) = send(&app, Method::GET, "/sessions/KOLO-4321", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::GET, &format!("/sessions/id/{id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(
        &app,
        Method::PATCH,
        &state_uri,
        Some("host-1"),
        Some(json!({"round": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_codes_are_rejected() {
    let app = app().await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/sessions",
        None,
        Some(json!({"sessionCode": "KOLO-12", "hostId": "host-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, "/sessions/nonsense", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn healthcheck_reports_ok_with_a_store() {
    let app = app().await;

    let (status, body) = send(&app, Method::GET, "/healthcheck", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["watched_sessions"], 0);
}

#[tokio::test]
async fn unknown_session_stream_is_not_found() {
    let app = app().await;

    let (status, _) = send(
        &app,
        Method::GET,
        "/sessions/id/6f2a4c1e-8d0b-4a7e-9f31-2b5c8d7e1a90/events",
        None,
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn openapi_document_lists_the_session_routes() {
    let app = app().await;

    let (status, document) = send(&app, Method::GET, routes::OPENAPI_JSON_PATH, None, None).await;
    assert_eq!(status, StatusCode::OK);
    let paths = document["paths"].as_object().unwrap();
    assert!(paths.contains_key("/sessions"));
    assert!(paths.contains_key("/sessions/id/{id}/events"));
}
