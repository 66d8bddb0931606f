#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use party_wheel_back::{
    config::{AppConfig, SyncTimings},
    dao::session_store::memory::MemorySessionStore,
    state::{AppState, SharedState},
    sync::{
        SyncContext,
        clock::{SharedClock, SystemClock},
        envelope::{Player, Puzzle},
        game::WheelGame,
        reconcile::ViewEvent,
        remote::LocalRemote,
        session_code::SessionCodec,
    },
};
use tokio::{sync::broadcast, time::timeout};

pub async fn provider() -> SharedState {
    let state = AppState::new(AppConfig::default());
    state
        .install_session_store(Arc::new(MemorySessionStore::new()))
        .await;
    state
}

pub fn context(state: &SharedState, clock: SharedClock) -> SyncContext {
    SyncContext::new(
        Arc::new(LocalRemote::new(state.clone())),
        SessionCodec::new("KOLO"),
        SyncTimings::default(),
        clock,
    )
}

pub fn system_context(state: &SharedState) -> SyncContext {
    context(state, SystemClock::shared())
}

pub fn game() -> WheelGame {
    WheelGame::new(
        vec![Player::new("p1", "Ana"), Player::new("p2", "Bo")],
        Puzzle {
            phrase: "KOLO SREĆE".into(),
            category: "Show".into(),
        },
    )
}

/// Wait for the first event matching `pick`, skipping everything else.
pub async fn next_matching<T>(
    events: &mut broadcast::Receiver<ViewEvent>,
    mut pick: impl FnMut(ViewEvent) -> Option<T>,
) -> T {
    timeout(Duration::from_secs(120), async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}
