mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, future::BoxFuture, stream};
use party_wheel_back::{
    config::SyncTimings,
    dto::session::{CreateSessionRequest, SessionRecord, Writer},
    state::SharedState,
    sync::{
        SyncContext,
        clock::{ManualClock, SharedClock, SystemClock},
        controller::ControllerView,
        envelope::{Command, GameStatePatch},
        error::RemoteError,
        reconcile::{HostStatus, ViewEvent},
        remote::{LocalRemote, RecordStream, RemoteResult, SessionRemote},
        session_code::SessionCodec,
        subscription::ConnectionStatus,
    },
};
use serde_json::{Map, Value};
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use common::{context, next_matching, provider, system_context};

/// In-process provider with a misbehaving push channel: the first
/// `refused` subscribe calls fail, and with `silent` set every stream goes
/// quiet after its first record.
struct FlakyPush {
    inner: LocalRemote,
    refused: u32,
    silent: bool,
    subscribes: AtomicU32,
}

impl FlakyPush {
    fn new(state: &SharedState, refused: u32, silent: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalRemote::new(state.clone()),
            refused,
            silent,
            subscribes: AtomicU32::new(0),
        })
    }

    fn subscribes(&self) -> u32 {
        self.subscribes.load(Ordering::SeqCst)
    }

    fn context(self: &Arc<Self>, clock: SharedClock) -> SyncContext {
        SyncContext::new(
            self.clone(),
            SessionCodec::new("KOLO"),
            SyncTimings::default(),
            clock,
        )
    }
}

impl SessionRemote for FlakyPush {
    fn insert(&self, request: CreateSessionRequest) -> BoxFuture<'static, RemoteResult<SessionRecord>> {
        self.inner.insert(request)
    }

    fn find_by_code(&self, code: String) -> BoxFuture<'static, RemoteResult<Option<SessionRecord>>> {
        self.inner.find_by_code(code)
    }

    fn find_by_id(&self, id: Uuid) -> BoxFuture<'static, RemoteResult<Option<SessionRecord>>> {
        self.inner.find_by_id(id)
    }

    fn update(
        &self,
        id: Uuid,
        writer: Writer,
        patch: Map<String, Value>,
    ) -> BoxFuture<'static, RemoteResult<SessionRecord>> {
        self.inner.update(id, writer, patch)
    }

    fn deactivate(&self, id: Uuid, host_id: String) -> BoxFuture<'static, RemoteResult<SessionRecord>> {
        self.inner.deactivate(id, host_id)
    }

    fn subscribe(&self, id: Uuid) -> BoxFuture<'static, RemoteResult<RecordStream>> {
        let call = self.subscribes.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.refused {
            return Box::pin(async { Err(RemoteError::Transport("push refused".into())) });
        }
        let upstream = self.inner.subscribe(id);
        let silent = self.silent;
        Box::pin(async move {
            let mut updates = upstream.await?;
            if !silent {
                return Ok(updates);
            }
            let first = updates.next().await;
            Ok(stream::iter(first).chain(stream::pending()).boxed())
        })
    }
}

/// Let background tasks run until `done` holds.
async fn settle(mut done: impl FnMut() -> bool) {
    timeout(Duration::from_secs(30), async {
        while !done() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn heartbeat(ctx: &SyncContext, id: Uuid, at: i64) {
    ctx.client()
        .update(
            id,
            Writer::Host("host-1".into()),
            GameStatePatch::new().heartbeat(at).into_map(),
        )
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn stale_push_is_replaced_after_a_poll() {
    let state = provider().await;
    let setup = system_context(&state);
    let record = setup.client().create("host-1", Map::new()).await.unwrap();
    heartbeat(&setup, record.id, record.created_at).await;

    let remote = FlakyPush::new(&state, 0, true);
    let controller = ControllerView::join(remote.context(SystemClock::shared()), &record.session_code)
        .await
        .unwrap();
    let mut events = controller.events();
    settle(|| controller.connection() == ConnectionStatus::Connected).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(remote.subscribes(), 1);

    // the host keeps beating but the push channel never says so
    heartbeat(&setup, record.id, record.created_at + 20_000).await;

    next_matching(&mut events, |event| {
        matches!(event, ViewEvent::Rejoined).then_some(())
    })
    .await;
    settle(|| remote.subscribes() == 2).await;
    assert_eq!(
        controller.confirmed().envelope.host_heartbeat,
        Some(record.created_at + 20_000)
    );
}

#[tokio::test(start_paused = true)]
async fn refresh_recovers_a_disconnected_controller() {
    let state = provider().await;
    let setup = system_context(&state);
    let record = setup.client().create("host-1", Map::new()).await.unwrap();

    // the first subscribe plus every scheduled reconnect is refused
    let remote = FlakyPush::new(&state, 6, false);
    let controller = ControllerView::join(remote.context(SystemClock::shared()), &record.session_code)
        .await
        .unwrap();
    let mut events = controller.events();

    next_matching(&mut events, |event| {
        matches!(event, ViewEvent::ConnectionLost).then_some(())
    })
    .await;
    assert_eq!(controller.connection(), ConnectionStatus::Disconnected);

    controller.refresh().await.unwrap();
    next_matching(&mut events, |event| {
        matches!(event, ViewEvent::Rejoined).then_some(())
    })
    .await;
    settle(|| controller.connection() == ConnectionStatus::Connected).await;
    assert_eq!(remote.subscribes(), 7);

    controller.submit(Command::ToggleSound).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn command_to_a_vanished_host_is_given_up() {
    let state = provider().await;
    let setup = system_context(&state);
    let record = setup.client().create("host-1", Map::new()).await.unwrap();
    heartbeat(&setup, record.id, record.created_at).await;

    let clock = Arc::new(ManualClock::new(record.created_at + 1_000));
    let controller = ControllerView::join(context(&state, clock.clone()), &record.session_code)
        .await
        .unwrap();
    let mut events = controller.events();

    controller.submit(Command::ToggleSound).await.unwrap();
    assert!(controller.intent().pending.is_some());
    assert!(!controller.controls().toggles);

    // nobody answers and the heartbeat ages past the liveness threshold
    clock.set(record.created_at + 12_000);
    let unanswered = next_matching(&mut events, |event| match event {
        ViewEvent::CommandUnanswered(command) => Some(command),
        _ => None,
    })
    .await;

    assert_eq!(unanswered, Command::ToggleSound);
    assert_eq!(controller.host_status(), Some(HostStatus::Offline));
    assert!(controller.intent().pending.is_none());
    assert!(controller.controls().toggles);
}
