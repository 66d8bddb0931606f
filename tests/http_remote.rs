#![cfg(feature = "http-remote")]

mod common;

use std::sync::Arc;

use party_wheel_back::{
    config::SyncTimings,
    routes,
    sync::{
        SyncContext,
        clock::SystemClock,
        controller::ControllerView,
        envelope::{Command, OutcomeKind},
        error::{RemoteError, SyncError},
        host::HostSession,
        reconcile::ViewEvent,
        remote::HttpRemote,
        session_code::SessionCodec,
        settings::SettingsContext,
    },
};
use tokio::net::TcpListener;

use common::{game, next_matching, provider};

async fn serve() -> SyncContext {
    let state = provider().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, routes::router(state)).await.unwrap();
    });

    let remote = HttpRemote::new(format!("http://{addr}")).unwrap();
    SyncContext::new(
        Arc::new(remote),
        SessionCodec::new("KOLO"),
        SyncTimings::default(),
        SystemClock::shared(),
    )
}

#[tokio::test]
async fn command_round_trip_over_http_and_sse() {
    let ctx = serve().await;
    let settings = SettingsContext::default();
    let host = HostSession::start(ctx.clone(), "host-1", game(), settings.clone())
        .await
        .unwrap();
    let controller = ControllerView::join(ctx.clone(), host.session_code())
        .await
        .unwrap();
    let mut events = controller.events();

    controller.submit(Command::ToggleSound).await.unwrap();

    let result = next_matching(&mut events, |event| match event {
        ViewEvent::CommandResult(result) => Some(result),
        _ => None,
    })
    .await;
    assert_eq!(result.kind, OutcomeKind::Success);
    assert!(!settings.get().sound_enabled);
    assert!(!controller.confirmed().envelope.settings.sound_enabled);
}

#[tokio::test]
async fn provider_errors_map_onto_remote_errors() {
    let ctx = serve().await;
    let host = HostSession::start(ctx.clone(), "host-1", game(), SettingsContext::default())
        .await
        .unwrap();
    let id = host.record().id;
    let client = ctx.client();

    let foreign = client
        .update(
            id,
            party_wheel_back::dto::session::Writer::Host("host-2".into()),
            Default::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(foreign, SyncError::Remote(RemoteError::Rejected(_))));

    host.end_game().await.unwrap();
    let ended = client
        .update(
            id,
            party_wheel_back::dto::session::Writer::Controller,
            Default::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(ended, SyncError::Remote(RemoteError::SessionEnded)));
    assert!(client.fetch_by_id(id).await.unwrap().is_some_and(|r| !r.is_active));
}
