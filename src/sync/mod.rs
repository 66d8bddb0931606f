//! Device-side remote-control synchronization.
//!
//! A host device owns the authoritative game state and mirrors it into a
//! shared session record; controller devices observe that record and hand
//! commands to the host through a single-slot mailbox inside it. Everything
//! here talks to the provider through [`remote::SessionRemote`].

/// Typed operations on the provider.
pub mod client;
/// Injectable wall clock.
pub mod clock;
/// Command mailbox on both sides.
pub mod command;
/// Controller device view.
pub mod controller;
/// Reserved keys and typed view of `gameState`.
pub mod envelope;
/// Sync error types.
pub mod error;
/// Wheel game rules applied by the host.
pub mod game;
/// Host device session lifecycle.
pub mod host;
/// Persisted host identity.
pub mod identity;
/// Controller-side state reconciliation.
pub mod reconcile;
/// Provider seam.
pub mod remote;
/// Session code generation and normalization.
pub mod session_code;
/// Device-local sound and effect settings.
pub mod settings;
/// Push subscription with reconnect.
pub mod subscription;

use std::sync::Arc;

use crate::config::SyncTimings;

use self::{
    client::SessionClient, clock::SharedClock, remote::SessionRemote,
    session_code::SessionCodec, subscription::SubscriptionManager,
};

/// Dependencies shared by every synchronization component of one device.
#[derive(Clone)]
pub struct SyncContext {
    remote: Arc<dyn SessionRemote>,
    codec: SessionCodec,
    timings: SyncTimings,
    clock: SharedClock,
}

impl SyncContext {
    /// Bundle the dependencies of one device.
    pub fn new(
        remote: Arc<dyn SessionRemote>,
        codec: SessionCodec,
        timings: SyncTimings,
        clock: SharedClock,
    ) -> Self {
        Self {
            remote,
            codec,
            timings,
            clock,
        }
    }

    /// Provider every call goes to.
    pub fn remote(&self) -> &Arc<dyn SessionRemote> {
        &self.remote
    }

    /// Session code rules.
    pub fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    /// Protocol timings.
    pub fn timings(&self) -> &SyncTimings {
        &self.timings
    }

    /// Timestamp source.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Store client bound to this context.
    pub fn client(&self) -> SessionClient {
        SessionClient::new(
            self.remote.clone(),
            self.codec.clone(),
            self.timings.create_code_attempts,
        )
    }

    /// Fresh subscription manager bound to this context.
    pub fn subscription(&self) -> SubscriptionManager {
        SubscriptionManager::new(
            self.remote.clone(),
            self.clock.clone(),
            self.timings.reconnect_schedule.clone(),
            self.timings.subscribe_timeout,
        )
    }
}
