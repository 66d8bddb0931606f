//! Sound and effect switches shared by every audio/visual call site.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Feedback switches owned by the host and mirrored to controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Sound cues play.
    pub sound_enabled: bool,
    /// Visual effects play.
    pub effects_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            effects_enabled: true,
        }
    }
}

/// Kind of feedback a call site is about to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// Audio feedback.
    Sound,
    /// Visual effect.
    Effect,
}

/// Explicit shared settings object.
///
/// Cloning hands out another handle to the same settings; every change is
/// observable through [`SettingsContext::subscribe`].
#[derive(Debug, Clone)]
pub struct SettingsContext {
    sender: Arc<watch::Sender<Settings>>,
}

impl Default for SettingsContext {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl SettingsContext {
    /// Context starting from `initial`.
    pub fn new(initial: Settings) -> Self {
        let (sender, _receiver) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Current settings.
    pub fn get(&self) -> Settings {
        *self.sender.borrow()
    }

    /// Apply `change` and notify subscribers, returning the new settings.
    pub fn update<F>(&self, change: F) -> Settings
    where
        F: FnOnce(&mut Settings),
    {
        self.sender.send_modify(change);
        self.get()
    }

    /// Replace the settings wholesale, e.g. when restoring a session.
    pub fn replace(&self, settings: Settings) {
        self.sender.send_replace(settings);
    }

    /// Receiver woken on every change.
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.sender.subscribe()
    }

    /// Whether a cue of this kind may play right now.
    pub fn allows(&self, cue: Cue) -> bool {
        let settings = self.get();
        match cue {
            Cue::Sound => settings.sound_enabled,
            Cue::Effect => settings.effects_enabled,
        }
    }
}
