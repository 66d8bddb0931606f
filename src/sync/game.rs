//! Minimal wheel game rules: one legality check and one mutation per command.

use std::collections::{BTreeSet, VecDeque};

use thiserror::Error;

use crate::sync::{
    envelope::{Command, CommandOutcome, DialogFlags, GameSnapshot, Player, Puzzle},
    settings::SettingsContext,
};

/// Segments on the wheel.
pub const SEGMENT_COUNT: usize = 24;
/// Undo keeps this many previous states.
pub const HISTORY_LIMIT: usize = 10;
const SOLVE_BONUS: i64 = 1_000;
const MAX_POWER: u8 = 100;

/// What the pointer can land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// Value of each uncovered letter.
    Points(u32),
    /// Round score drops to zero.
    Bankrupt,
    /// Turn passes without a guess.
    LoseTurn,
    /// Player places a token.
    Token,
}

use Segment::{Bankrupt, LoseTurn, Points, Token};

/// Wheel layout, clockwise from segment 0.
pub const WHEEL: [Segment; SEGMENT_COUNT] = [
    Points(500),
    Points(300),
    Token,
    Points(400),
    Bankrupt,
    Points(600),
    Points(200),
    LoseTurn,
    Points(800),
    Points(350),
    Points(450),
    Token,
    Points(700),
    Points(300),
    Bankrupt,
    Points(550),
    Points(250),
    Points(900),
    LoseTurn,
    Points(400),
    Points(650),
    Token,
    Points(500),
    Points(1000),
];

/// Reasons a command is not legal in the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum GameError {
    #[error("the wheel is already spinning")]
    AlreadySpinning,
    #[error("the wheel is not spinning")]
    NotSpinning,
    #[error("a letter has to be picked first")]
    LetterPending,
    #[error("a token has to be placed first")]
    TokenPending,
    #[error("the round is already solved")]
    RoundSolved,
    #[error("spin power must be between 1 and {MAX_POWER} (got {0})")]
    InvalidPower(u8),
    #[error("no letter can be picked right now")]
    SelectorClosed,
    #[error("`{0}` is not a single letter")]
    InvalidLetter(String),
    #[error("letter {0} was already used")]
    LetterUsed(char),
    #[error("no token can be placed right now")]
    NotPlacingTokens,
    #[error("unknown player `{0}`")]
    UnknownPlayer(String),
    #[error("segment {0} does not exist")]
    InvalidSegment(usize),
    #[error("no puzzle is loaded")]
    NoPuzzle,
    #[error("the guess is empty")]
    EmptyGuess,
    #[error("there is nothing to undo")]
    NothingToUndo,
    #[error("there are no players")]
    NoPlayers,
}

/// Whether `command` is allowed by `snapshot`.
///
/// Shared by the host, which enforces it, and controllers, which only use it
/// to grey out controls.
pub fn legality(snapshot: &GameSnapshot, command: &Command) -> Result<(), GameError> {
    match command {
        Command::SpinWheel { power } => {
            ensure_idle(snapshot)?;
            if snapshot.round_solved {
                return Err(GameError::RoundSolved);
            }
            if snapshot.puzzle.is_none() {
                return Err(GameError::NoPuzzle);
            }
            if snapshot.players.is_empty() {
                return Err(GameError::NoPlayers);
            }
            if *power == 0 || *power > MAX_POWER {
                return Err(GameError::InvalidPower(*power));
            }
            Ok(())
        }
        Command::SelectLetter { letter } => {
            if !snapshot.show_letter_selector {
                return Err(GameError::SelectorClosed);
            }
            let letter = parse_letter(letter)?;
            if snapshot
                .used_letters
                .iter()
                .any(|used| used.starts_with(letter))
            {
                return Err(GameError::LetterUsed(letter));
            }
            Ok(())
        }
        Command::PlaceToken {
            player_id,
            segment_index,
        } => {
            if !snapshot.is_placing_tokens {
                return Err(GameError::NotPlacingTokens);
            }
            find_player(&snapshot.players, player_id)?;
            match segment_index {
                Some(index) if *index >= SEGMENT_COUNT => Err(GameError::InvalidSegment(*index)),
                _ => Ok(()),
            }
        }
        Command::GuessPhrase { phrase } => {
            if snapshot.is_spinning {
                return Err(GameError::AlreadySpinning);
            }
            if snapshot.show_letter_selector {
                return Err(GameError::LetterPending);
            }
            if snapshot.round_solved {
                return Err(GameError::RoundSolved);
            }
            if snapshot.puzzle.is_none() {
                return Err(GameError::NoPuzzle);
            }
            if phrase.trim().is_empty() {
                return Err(GameError::EmptyGuess);
            }
            Ok(())
        }
        Command::AdvanceToNextPlayer => {
            if snapshot.is_spinning {
                return Err(GameError::AlreadySpinning);
            }
            if snapshot.players.is_empty() {
                return Err(GameError::NoPlayers);
            }
            Ok(())
        }
        Command::UndoLastStep => {
            if snapshot.is_spinning {
                return Err(GameError::AlreadySpinning);
            }
            Ok(())
        }
        Command::SetActivePlayer { player_id } => {
            if snapshot.is_spinning {
                return Err(GameError::AlreadySpinning);
            }
            find_player(&snapshot.players, player_id).map(|_| ())
        }
        Command::ToggleSound | Command::ToggleEffects => Ok(()),
    }
}

fn ensure_idle(snapshot: &GameSnapshot) -> Result<(), GameError> {
    if snapshot.is_spinning {
        Err(GameError::AlreadySpinning)
    } else if snapshot.show_letter_selector {
        Err(GameError::LetterPending)
    } else if snapshot.is_placing_tokens {
        Err(GameError::TokenPending)
    } else {
        Ok(())
    }
}

fn parse_letter(raw: &str) -> Result<char, GameError> {
    let mut chars = raw.trim().chars().flat_map(char::to_uppercase);
    match (chars.next(), chars.next()) {
        (Some(letter), None) if letter.is_alphabetic() => Ok(letter),
        _ => Err(GameError::InvalidLetter(raw.to_string())),
    }
}

fn find_player(players: &[Player], id: &str) -> Result<usize, GameError> {
    players
        .iter()
        .position(|player| player.id == id)
        .ok_or_else(|| GameError::UnknownPlayer(id.to_string()))
}

fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Authoritative round state as the host keeps it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct RoundState {
    players: Vec<Player>,
    puzzle: Option<Puzzle>,
    used_letters: BTreeSet<char>,
    round: u32,
    current_player_index: usize,
    is_spinning: bool,
    show_letter_selector: bool,
    is_placing_tokens: bool,
    last_segment: Option<usize>,
    wheel_offset: usize,
    spin_target: Option<usize>,
    round_solved: bool,
}

impl From<&GameSnapshot> for RoundState {
    fn from(snapshot: &GameSnapshot) -> Self {
        Self {
            players: snapshot.players.clone(),
            puzzle: snapshot.puzzle.clone(),
            used_letters: snapshot
                .used_letters
                .iter()
                .filter_map(|letter| parse_letter(letter).ok())
                .collect(),
            round: snapshot.round,
            current_player_index: snapshot.current_player_index,
            is_spinning: snapshot.is_spinning,
            show_letter_selector: snapshot.show_letter_selector,
            is_placing_tokens: snapshot.is_placing_tokens,
            last_segment: snapshot.last_segment,
            wheel_offset: snapshot.wheel_offset % SEGMENT_COUNT,
            spin_target: snapshot.spin_target,
            round_solved: snapshot.round_solved,
        }
    }
}

impl From<&RoundState> for GameSnapshot {
    fn from(state: &RoundState) -> Self {
        Self {
            players: state.players.clone(),
            puzzle: state.puzzle.clone(),
            used_letters: state.used_letters.iter().map(char::to_string).collect(),
            round: state.round,
            current_player_index: state.current_player_index,
            is_spinning: state.is_spinning,
            show_letter_selector: state.show_letter_selector,
            is_placing_tokens: state.is_placing_tokens,
            last_segment: state.last_segment,
            wheel_offset: state.wheel_offset,
            spin_target: state.spin_target,
            round_solved: state.round_solved,
        }
    }
}

impl RoundState {
    fn advance_player(&mut self) {
        if !self.players.is_empty() {
            self.current_player_index = (self.current_player_index + 1) % self.players.len();
        }
    }

    fn current_player_mut(&mut self) -> Option<&mut Player> {
        self.players.get_mut(self.current_player_index)
    }

    fn is_fully_revealed(&self) -> bool {
        self.puzzle.as_ref().is_some_and(|puzzle| {
            puzzle
                .phrase
                .chars()
                .flat_map(char::to_uppercase)
                .filter(|c| c.is_alphabetic())
                .all(|c| self.used_letters.contains(&c))
        })
    }
}

/// Host-owned game with a bounded undo history.
#[derive(Debug, Clone, Default)]
pub struct WheelGame {
    state: RoundState,
    dialogs: DialogFlags,
    history: VecDeque<RoundState>,
}

impl WheelGame {
    /// First round of a fresh game.
    pub fn new(players: Vec<Player>, puzzle: Puzzle) -> Self {
        Self {
            state: RoundState {
                players,
                puzzle: Some(puzzle),
                round: 1,
                ..RoundState::default()
            },
            ..Self::default()
        }
    }

    /// Rebuild a game from a previously synchronized snapshot; history is lost.
    pub fn from_snapshot(snapshot: &GameSnapshot, dialogs: DialogFlags) -> Self {
        Self {
            state: RoundState::from(snapshot),
            dialogs,
            history: VecDeque::new(),
        }
    }

    /// Wire form of the round state, with the used-letter set flattened to a
    /// sorted list.
    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot::from(&self.state)
    }

    /// Dialog state as mirrored to controllers.
    pub fn dialogs(&self) -> DialogFlags {
        self.dialogs
    }

    /// Mutable access for host UI interactions.
    pub fn dialogs_mut(&mut self) -> &mut DialogFlags {
        &mut self.dialogs
    }

    /// Number of steps [`Command::UndoLastStep`] can revert.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Legality of `command` without applying it.
    pub fn check(&self, command: &Command) -> Result<(), GameError> {
        legality(&self.snapshot(), command)?;
        if matches!(command, Command::UndoLastStep) && self.history.is_empty() {
            return Err(GameError::NothingToUndo);
        }
        Ok(())
    }

    /// Route one command: illegal commands become error outcomes and leave the
    /// state untouched.
    pub fn apply(&mut self, command: &Command, settings: &SettingsContext) -> CommandOutcome {
        if let Err(err) = self.check(command) {
            return CommandOutcome::error(err.to_string());
        }

        let message = match command {
            Command::ToggleSound => {
                let updated = settings.update(|s| s.sound_enabled = !s.sound_enabled);
                on_off("sound", updated.sound_enabled)
            }
            Command::ToggleEffects => {
                let updated = settings.update(|s| s.effects_enabled = !s.effects_enabled);
                on_off("effects", updated.effects_enabled)
            }
            Command::UndoLastStep => {
                if let Some(previous) = self.history.pop_back() {
                    self.state = previous;
                }
                "last step undone".to_string()
            }
            other => {
                self.remember();
                self.execute(other)
            }
        };

        CommandOutcome::success(message)
    }

    /// Land the running spin and resolve its segment.
    pub fn finish_spin(&mut self) -> Result<Segment, GameError> {
        if !self.state.is_spinning {
            return Err(GameError::NotSpinning);
        }

        let target = self
            .state
            .spin_target
            .take()
            .unwrap_or(self.state.wheel_offset);
        let segment = WHEEL[target % SEGMENT_COUNT];
        self.state.is_spinning = false;
        self.state.wheel_offset = target;
        self.state.last_segment = Some(target);

        match segment {
            Points(_) => self.state.show_letter_selector = true,
            Token => self.state.is_placing_tokens = true,
            Bankrupt => {
                if let Some(player) = self.state.current_player_mut() {
                    player.score = 0;
                }
                self.state.advance_player();
            }
            LoseTurn => self.state.advance_player(),
        }

        Ok(segment)
    }

    /// Load the next puzzle, keeping players and scores.
    pub fn start_round(&mut self, puzzle: Puzzle) {
        self.remember();
        let state = &mut self.state;
        state.puzzle = Some(puzzle);
        state.round += 1;
        state.used_letters.clear();
        state.is_spinning = false;
        state.show_letter_selector = false;
        state.is_placing_tokens = false;
        state.spin_target = None;
        state.last_segment = None;
        state.round_solved = false;
    }

    fn remember(&mut self) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(self.state.clone());
    }

    fn execute(&mut self, command: &Command) -> String {
        let state = &mut self.state;
        match command {
            Command::SpinWheel { power } => {
                let target = (state.wheel_offset + usize::from(*power)) % SEGMENT_COUNT;
                state.is_spinning = true;
                state.spin_target = Some(target);
                "the wheel is spinning".to_string()
            }
            Command::SelectLetter { letter } => {
                let Ok(letter) = parse_letter(letter) else {
                    return "letter ignored".to_string();
                };
                state.used_letters.insert(letter);
                state.show_letter_selector = false;

                let hits = state.puzzle.as_ref().map_or(0, |puzzle| {
                    puzzle
                        .phrase
                        .chars()
                        .flat_map(char::to_uppercase)
                        .filter(|c| *c == letter)
                        .count()
                });
                let value = match state.last_segment.map(|index| WHEEL[index % SEGMENT_COUNT]) {
                    Some(Points(value)) => i64::from(value),
                    _ => 0,
                };

                if hits == 0 {
                    state.advance_player();
                } else if let Some(player) = state.current_player_mut() {
                    player.score += value * hits as i64;
                }
                if state.is_fully_revealed() {
                    state.round_solved = true;
                }
                format!("{letter}: {hits} found")
            }
            Command::PlaceToken { player_id, .. } => {
                if let Some(player) = state.players.iter_mut().find(|p| &p.id == player_id) {
                    player.tokens += 1;
                }
                state.is_placing_tokens = false;
                "token placed".to_string()
            }
            Command::GuessPhrase { phrase } => {
                let solved = state
                    .puzzle
                    .as_ref()
                    .is_some_and(|puzzle| normalize_phrase(&puzzle.phrase) == normalize_phrase(phrase));
                if solved {
                    let letters: Vec<char> = state
                        .puzzle
                        .iter()
                        .flat_map(|puzzle| puzzle.phrase.chars())
                        .flat_map(char::to_uppercase)
                        .filter(|c| c.is_alphabetic())
                        .collect();
                    state.used_letters.extend(letters);
                    state.round_solved = true;
                    if let Some(player) = state.current_player_mut() {
                        player.score += SOLVE_BONUS;
                    }
                    "puzzle solved".to_string()
                } else {
                    state.advance_player();
                    "wrong guess".to_string()
                }
            }
            Command::AdvanceToNextPlayer => {
                state.advance_player();
                state.show_letter_selector = false;
                "next player".to_string()
            }
            Command::SetActivePlayer { player_id } => {
                if let Some(index) = state.players.iter().position(|p| &p.id == player_id) {
                    state.current_player_index = index;
                }
                "active player changed".to_string()
            }
            Command::UndoLastStep | Command::ToggleSound | Command::ToggleEffects => {
                String::new()
            }
        }
    }
}

fn on_off(what: &str, enabled: bool) -> String {
    format!("{what} {}", if enabled { "on" } else { "off" })
}
