mod common;

use std::time::Duration;

use party_wheel_back::{
    dto::session::Writer,
    sync::{
        controller::ControllerView,
        envelope::{Command, GameStateEnvelope, GameStatePatch, OutcomeKind},
        error::SyncError,
        host::{HostSession, HostSynchronizer},
        reconcile::ViewEvent,
        settings::SettingsContext,
    },
};
use tokio::time::{sleep, timeout};

use common::{game, next_matching, provider, system_context};

#[tokio::test]
async fn spin_from_the_remote_reaches_the_host_and_reports_back() {
    let state = provider().await;
    let ctx = system_context(&state);
    let host = HostSession::start(ctx.clone(), "host-1", game(), SettingsContext::default())
        .await
        .unwrap();

    let controller = ControllerView::join(ctx.clone(), &host.session_code().to_lowercase())
        .await
        .unwrap();
    let mut events = controller.events();
    assert!(controller.controls().spin);

    controller
        .submit(Command::SpinWheel { power: 70 })
        .await
        .unwrap();

    let sent = next_matching(&mut events, |event| match event {
        ViewEvent::CommandSent(command) => Some(command),
        _ => None,
    })
    .await;
    assert_eq!(sent, Command::SpinWheel { power: 70 });

    let result = next_matching(&mut events, |event| match event {
        ViewEvent::CommandResult(result) => Some(result),
        _ => None,
    })
    .await;
    assert_eq!(result.kind, OutcomeKind::Success);

    assert!(host.with(|sync| sync.game().snapshot().is_spinning).await);
    let confirmed = controller.confirmed();
    assert!(confirmed.envelope.game.is_spinning);
    assert!(confirmed.envelope.pending_command.is_none());
    assert!(confirmed.envelope.command_timestamp.is_none());
    assert!(!controller.controls().spin);
}

#[tokio::test]
async fn illegal_spin_is_answered_with_an_error() {
    let state = provider().await;
    let ctx = system_context(&state);
    let host = HostSession::start(ctx.clone(), "host-1", game(), SettingsContext::default())
        .await
        .unwrap();
    host.mutate(|game| {
        game.apply(
            &Command::SpinWheel { power: 1 },
            &SettingsContext::default(),
        )
    })
    .await
    .unwrap();

    let controller = ControllerView::join(ctx.clone(), host.session_code())
        .await
        .unwrap();
    let mut events = controller.events();

    controller
        .submit(Command::SpinWheel { power: 50 })
        .await
        .unwrap();

    let result = next_matching(&mut events, |event| match event {
        ViewEvent::CommandResult(result) => Some(result),
        _ => None,
    })
    .await;
    assert_eq!(result.kind, OutcomeKind::Error);
    assert!(!result.message.is_empty());
    // still spinning from the host's own spin, nothing else changed
    assert!(host.with(|sync| sync.game().history_len()).await == 1);
}

#[tokio::test]
async fn only_the_latest_mailbox_command_is_applied() {
    let state = provider().await;
    let ctx = system_context(&state);
    let client = ctx.client();
    let game = game();
    let settings = SettingsContext::default();
    let initial = GameStatePatch::snapshot(&game.snapshot(), &settings.get(), &game.dialogs())
        .unwrap()
        .into_map();
    let record = client.create("host-1", initial).await.unwrap();

    // two remotes write before the host looks
    for (command, timestamp) in [(Command::ToggleSound, 10), (Command::ToggleEffects, 11)] {
        client
            .update(
                record.id,
                Writer::Controller,
                GameStatePatch::mailbox(&command, timestamp).unwrap().into_map(),
            )
            .await
            .unwrap();
    }

    let host = HostSession::resume(ctx.clone(), "host-1", &record.session_code)
        .await
        .unwrap();

    let processed = timeout(Duration::from_secs(5), async {
        loop {
            if let Some(result) = host.with(|sync| sync.last_result().cloned()).await {
                return result;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(processed.kind, OutcomeKind::Success);

    let settings = host.with(|sync| sync.settings().get()).await;
    assert!(settings.sound_enabled, "overwritten command must not run");
    assert!(!settings.effects_enabled);

    let stored = client.fetch_by_id(record.id).await.unwrap().unwrap();
    let envelope = GameStateEnvelope::from_map(&stored.game_state).unwrap();
    assert!(envelope.command_timestamp.is_none());
    assert_eq!(envelope.last_command_result, Some(processed));
}

#[tokio::test]
async fn redelivered_snapshot_is_processed_once() {
    let state = provider().await;
    let ctx = system_context(&state);
    let client = ctx.client();
    let record = client
        .create("host-1", Default::default())
        .await
        .unwrap();
    let with_command = client
        .update(
            record.id,
            Writer::Controller,
            GameStatePatch::mailbox(&Command::ToggleSound, 42)
                .unwrap()
                .into_map(),
        )
        .await
        .unwrap();

    let mut host = HostSynchronizer::new(
        &ctx,
        record.id,
        "host-1",
        game(),
        SettingsContext::default(),
    );

    let first = host.on_remote(&with_command).await.unwrap();
    let second = host.on_remote(&with_command).await.unwrap();

    assert_eq!(first.map(|inbound| inbound.timestamp), Some(42));
    assert!(second.is_none());
    assert!(!host.settings().get().sound_enabled);
}

#[tokio::test]
async fn ended_sessions_cannot_be_joined() {
    let state = provider().await;
    let ctx = system_context(&state);
    let host = HostSession::start(ctx.clone(), "host-1", game(), SettingsContext::default())
        .await
        .unwrap();
    let code = host.session_code().to_string();

    let ended = host.end_game().await.unwrap();
    assert!(!ended.is_active);

    assert!(matches!(
        ControllerView::join(ctx.clone(), &code).await,
        Err(SyncError::NotFound)
    ));
    assert!(matches!(
        ControllerView::join(ctx.clone(), "KOLO-12").await,
        Err(SyncError::InvalidCode(_))
    ));
}

#[tokio::test]
async fn only_the_creating_host_may_resume() {
    let state = provider().await;
    let ctx = system_context(&state);
    let host = HostSession::start(ctx.clone(), "host-1", game(), SettingsContext::default())
        .await
        .unwrap();

    assert!(matches!(
        HostSession::resume(ctx.clone(), "host-2", host.session_code()).await,
        Err(SyncError::NotHost)
    ));
}

#[tokio::test]
async fn new_game_replaces_the_session() {
    let state = provider().await;
    let ctx = system_context(&state);
    let host = HostSession::start(ctx.clone(), "host-1", game(), SettingsContext::default())
        .await
        .unwrap();
    let old_id = host.record().id;

    let next = host.new_game(game()).await.unwrap();

    assert_ne!(next.record().id, old_id);
    let old = ctx.client().fetch_by_id(old_id).await.unwrap().unwrap();
    assert!(!old.is_active);
    assert!(next.record().is_active);
}
