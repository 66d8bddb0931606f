//! Typed schema of the `gameState` document shared by host and controllers.
//!
//! The provider stores the document as an untyped JSON object and merges it
//! key by key. This module is the one place where those keys are named.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::sync::settings::Settings;

/// Version stamped into every host snapshot.
pub const SCHEMA_VERSION: u32 = 1;

/// Envelope schema version written by the host.
pub const SCHEMA_VERSION_KEY: &str = "_schemaVersion";
/// Mailbox slot holding the command awaiting the host.
pub const PENDING_COMMAND_KEY: &str = "_pendingCommand";
/// Submission time of the pending command, also its identity.
pub const COMMAND_TIMESTAMP_KEY: &str = "_commandTimestamp";
/// Last time the host proved it was alive.
pub const HOST_HEARTBEAT_KEY: &str = "_hostHeartbeat";
/// Outcome of the most recently processed command.
pub const LAST_COMMAND_RESULT_KEY: &str = "_lastCommandResult";

/// Keys a controller is allowed to write.
pub const MAILBOX_KEYS: [&str; 2] = [PENDING_COMMAND_KEY, COMMAND_TIMESTAMP_KEY];

/// Whether `key` belongs to the single-slot command mailbox.
pub fn is_mailbox_key(key: &str) -> bool {
    MAILBOX_KEYS.contains(&key)
}

/// One contestant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Stable identifier used by commands.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Points this round.
    #[serde(default)]
    pub score: i64,
    /// Tokens still to place.
    #[serde(default)]
    pub tokens: u32,
}

impl Player {
    /// Player with no points and no tokens.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            score: 0,
            tokens: 0,
        }
    }
}

/// Phrase to be uncovered letter by letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Puzzle {
    /// Hidden phrase.
    pub phrase: String,
    /// Hint shown to everyone.
    #[serde(default)]
    pub category: String,
}

/// Core game fields as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameSnapshot {
    /// Contestants in turn order.
    pub players: Vec<Player>,
    /// Current puzzle, if a round is set up.
    pub puzzle: Option<Puzzle>,
    /// Sorted, upper-case single letters.
    pub used_letters: Vec<String>,
    /// One-based round number.
    pub round: u32,
    /// Index into `players` of whoever has the turn.
    pub current_player_index: usize,
    /// A spin is in flight.
    pub is_spinning: bool,
    /// The spin landed on a value and a letter is expected.
    pub show_letter_selector: bool,
    /// Token placement phase.
    pub is_placing_tokens: bool,
    /// Index of the segment the wheel last landed on.
    pub last_segment: Option<usize>,
    /// Segment under the pointer when the wheel is at rest.
    pub wheel_offset: usize,
    /// Segment the running spin will land on.
    pub spin_target: Option<usize>,
    /// The phrase was guessed; the round is over.
    pub round_solved: bool,
}

/// Host-side dialog state mirrored to controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DialogFlags {
    /// Phrase guess dialog is showing.
    pub guess_dialog_open: bool,
    /// Scoreboard overlay is showing.
    pub scoreboard_open: bool,
}

/// Closed set of intents a controller can hand to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Command {
    /// Spin with a strength from 1 to 10.
    SpinWheel {
        /// Spin strength.
        power: u8,
    },
    /// Guess one letter of the puzzle.
    SelectLetter {
        /// Single letter; case is ignored.
        letter: String,
    },
    /// Put a token on the wheel for a player.
    PlaceToken {
        /// Player receiving the token.
        player_id: String,
        /// Target segment; the segment under the pointer when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        segment_index: Option<usize>,
    },
    /// Try to solve the whole puzzle.
    GuessPhrase {
        /// Proposed solution.
        phrase: String,
    },
    /// Pass the turn.
    AdvanceToNextPlayer,
    /// Restore the state before the last game step.
    UndoLastStep,
    /// Hand the turn to a specific player.
    SetActivePlayer {
        /// Player taking the turn.
        player_id: String,
    },
    /// Flip the host's sound setting.
    ToggleSound,
    /// Flip the host's visual effects setting.
    #[serde(alias = "toggel-effects")]
    ToggleEffects,
}

impl Command {
    /// Wire tag, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::SpinWheel { .. } => "spin-wheel",
            Command::SelectLetter { .. } => "select-letter",
            Command::PlaceToken { .. } => "place-token",
            Command::GuessPhrase { .. } => "guess-phrase",
            Command::AdvanceToNextPlayer => "advance-to-next-player",
            Command::UndoLastStep => "undo-last-step",
            Command::SetActivePlayer { .. } => "set-active-player",
            Command::ToggleSound => "toggle-sound",
            Command::ToggleEffects => "toggle-effects",
        }
    }
}

/// Whether a command was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// The command changed the game.
    Success,
    /// The command was refused; the message says why.
    Error,
}

/// Result of applying one command, before it is stamped for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Success or refusal.
    pub kind: OutcomeKind,
    /// Human-readable explanation.
    pub message: String,
}

impl CommandOutcome {
    /// Applied outcome.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Success,
            message: message.into(),
        }
    }

    /// Refused outcome.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Error,
            message: message.into(),
        }
    }

    /// Whether the command was applied.
    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }

    /// Attach the delivery timestamp controllers correlate on.
    pub fn stamp(self, timestamp: i64) -> CommandResult {
        CommandResult {
            kind: self.kind,
            message: self.message,
            timestamp,
        }
    }
}

/// `_lastCommandResult` as written by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Success or refusal.
    #[serde(rename = "type")]
    pub kind: OutcomeKind,
    /// Text shown on the controller.
    pub message: String,
    /// `_commandTimestamp` of the command this answers.
    pub timestamp: i64,
}

/// Decoded view of a whole `gameState` document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GameStateEnvelope {
    /// Zero before the host wrote its first snapshot.
    #[serde(rename = "_schemaVersion", default)]
    pub schema_version: u32,
    /// Game fields.
    #[serde(flatten)]
    pub game: GameSnapshot,
    /// Host settings.
    #[serde(flatten)]
    pub settings: Settings,
    /// Host dialogs.
    #[serde(flatten)]
    pub dialogs: DialogFlags,
    /// Raw mailbox content; decoded lazily so an unknown tag does not poison
    /// the rest of the document.
    #[serde(
        rename = "_pendingCommand",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pending_command: Option<Value>,
    /// Identity of the pending command.
    #[serde(
        rename = "_commandTimestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub command_timestamp: Option<i64>,
    /// Host liveness stamp, in epoch milliseconds.
    #[serde(
        rename = "_hostHeartbeat",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub host_heartbeat: Option<i64>,
    /// Answer to the most recent command.
    #[serde(
        rename = "_lastCommandResult",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_command_result: Option<CommandResult>,
}

impl GameStateEnvelope {
    /// Decode a raw `gameState` object.
    pub fn from_map(state: &Map<String, Value>) -> serde_json::Result<Self> {
        serde_json::from_value(Value::Object(state.clone()))
    }

    /// Decode the mailbox command, if any.
    pub fn command(&self) -> Option<serde_json::Result<Command>> {
        self.pending_command
            .clone()
            .map(serde_json::from_value::<Command>)
    }
}

/// Builder for a shallow-merge patch. Keys left out are preserved by the
/// provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameStatePatch {
    fields: Map<String, Value>,
}

impl GameStatePatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every host-owned field, stamped with the current schema version.
    pub fn snapshot(
        game: &GameSnapshot,
        settings: &Settings,
        dialogs: &DialogFlags,
    ) -> serde_json::Result<Self> {
        let mut patch = Self::new();
        patch.extend_with(game)?;
        patch.extend_with(settings)?;
        patch.extend_with(dialogs)?;
        patch
            .fields
            .insert(SCHEMA_VERSION_KEY.into(), json!(SCHEMA_VERSION));
        Ok(patch)
    }

    /// Set `_hostHeartbeat`.
    pub fn heartbeat(mut self, timestamp: i64) -> Self {
        self.fields.insert(HOST_HEARTBEAT_KEY.into(), json!(timestamp));
        self
    }

    /// Set `_lastCommandResult`.
    pub fn result(mut self, result: &CommandResult) -> serde_json::Result<Self> {
        self.fields
            .insert(LAST_COMMAND_RESULT_KEY.into(), serde_json::to_value(result)?);
        Ok(self)
    }

    /// Null out both mailbox keys.
    pub fn clear_mailbox(mut self) -> Self {
        for key in MAILBOX_KEYS {
            self.fields.insert(key.into(), Value::Null);
        }
        self
    }

    /// Fill the mailbox with `command` identified by `timestamp`.
    pub fn mailbox(command: &Command, timestamp: i64) -> serde_json::Result<Self> {
        let mut patch = Self::new();
        patch
            .fields
            .insert(PENDING_COMMAND_KEY.into(), serde_json::to_value(command)?);
        patch
            .fields
            .insert(COMMAND_TIMESTAMP_KEY.into(), json!(timestamp));
        Ok(patch)
    }

    /// Whether any mailbox key is part of the patch.
    pub fn touches_mailbox(&self) -> bool {
        self.fields.keys().any(|key| is_mailbox_key(key))
    }

    /// Raw object handed to the provider.
    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    fn extend_with<T: Serialize>(&mut self, part: &T) -> serde_json::Result<()> {
        if let Value::Object(map) = serde_json::to_value(part)? {
            self.fields.extend(map);
        }
        Ok(())
    }
}
