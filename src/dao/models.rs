use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Coarse lifecycle of a game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Created, players may claim seats, no round played yet.
    Lobby,
    /// Rounds are being played.
    InProgress,
    /// Every round has been played.
    Finished,
}

impl GameStatus {
    /// Stable wire name, also used as the stored value.
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Lobby => "lobby",
            GameStatus::InProgress => "in_progress",
            GameStatus::Finished => "finished",
        }
    }
}

/// Phase driving what every consumer displays and allows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Waiting for the GM to start the game.
    Lobby,
    /// The item of the current round is being presented.
    Listening,
    /// Players may submit guesses.
    Guessing,
    /// Guessing is over, price still hidden.
    Closed,
    /// The actual price is shown.
    Revealing,
    /// Round deltas are shown.
    Results,
    /// Intermission between two blocks of rounds.
    Break,
    /// Final leaderboard.
    Finished,
}

impl GamePhase {
    /// Stable wire name, also used as the stored value.
    pub fn as_str(&self) -> &'static str {
        match self {
            GamePhase::Lobby => "lobby",
            GamePhase::Listening => "listening",
            GamePhase::Guessing => "guessing",
            GamePhase::Closed => "closed",
            GamePhase::Revealing => "revealing",
            GamePhase::Results => "results",
            GamePhase::Break => "break",
            GamePhase::Finished => "finished",
        }
    }
}

/// Per-round lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Not reached yet.
    Pending,
    /// Current round, item presented.
    Listening,
    /// Accepting guesses.
    Guessing,
    /// No more player guesses.
    Closed,
    /// Price revealed.
    Revealed,
    /// Deltas written to the ledger.
    Scored,
}

/// Kind of balance-affecting ledger entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BalanceEventKind {
    /// Starting money credited by `start_game`.
    Deposit,
    /// Penalty equal to the guess error for one round.
    RoundDelta,
    /// Bonus for an exact guess.
    ExactBonus,
    /// Correction entered by the GM.
    ManualAdjust,
}

/// Game row, looked up by its human-readable `code`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameEntity {
    /// Stable identifier.
    pub id: Uuid,
    /// Join code shown on the shared display (uppercase).
    pub code: String,
    /// PIN protecting the GM console.
    pub gm_pin: String,
    /// Coarse lifecycle.
    pub status: GameStatus,
    /// Current phase.
    pub current_phase: GamePhase,
    /// 1-based index of the current round, 0 before the game starts.
    pub current_round_index: u32,
    /// Number of rounds created with the game.
    pub total_rounds: u32,
    /// Bonus credited for an exact guess.
    pub exact_bonus_amount: i64,
    /// Guess used for players who did not submit.
    pub default_missing_guess_value: i64,
    /// Length of the guessing window.
    pub guessing_duration_seconds: u32,
    /// When the current guessing window opened.
    pub guessing_start_time: Option<SystemTime>,
    /// Advisory pause flag.
    pub is_paused: bool,
    /// Round indexes followed by a break.
    pub break_after_rounds: Vec<u32>,
    /// Amount credited to each player by `start_game`.
    pub starting_deposit: i64,
    /// Incremented on every committed transition.
    pub version: u64,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last write timestamp.
    pub updated_at: SystemTime,
    /// When `start_game` was applied.
    pub started_at: Option<SystemTime>,
}

/// Player seat inside a game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning game.
    pub game_id: Uuid,
    /// Display name.
    pub name: String,
    /// Avatar chosen at setup.
    pub avatar_id: Option<String>,
    /// Display and turn order.
    pub order: u32,
    /// Cached sum of this player's ledger entries.
    pub balance: i64,
    /// Time spent before first submissions, summed over rounds.
    pub cumulative_answer_time_ms: u64,
    /// Token bound to the device that claimed this seat.
    pub session_token: Option<String>,
    /// Last time the claiming device was seen.
    pub last_seen_at: Option<SystemTime>,
}

/// Item to be priced during one round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundEntity {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning game.
    pub game_id: Uuid,
    /// 1-based position.
    pub index: u32,
    /// Item shown to players.
    pub item_name: String,
    /// Price to guess.
    pub actual_price: i64,
    /// Lowest value a player may submit.
    pub min_guess: i64,
    /// Highest value a player may submit.
    pub max_guess: i64,
    /// Optional hint.
    pub hint_text: Option<String>,
    /// Optional picture of the item.
    pub item_photo_url: Option<String>,
    /// Lifecycle status.
    pub status: RoundStatus,
    /// Closest guesser once scored.
    pub closest_winner_id: Option<Uuid>,
    /// Exact guessers once scored.
    pub exact_guessers: Vec<Uuid>,
    /// When guessing opened for this round.
    pub guessing_start_time: Option<SystemTime>,
}

/// Latest guess of a player for a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuessEntity {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning game.
    pub game_id: Uuid,
    /// Round guessed.
    pub round_id: Uuid,
    /// Author (or subject of a GM override).
    pub player_id: Uuid,
    /// Guessed price.
    pub value: i64,
    /// Refreshed on each edit, used for tie-breaks.
    pub submitted_at: SystemTime,
    /// 1 on creation, incremented on each edit.
    pub revision: u32,
    /// Entered by the GM on behalf of the player.
    pub is_override: bool,
}

/// Append-only ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceEventEntity {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning game.
    pub game_id: Uuid,
    /// Player credited or debited.
    pub player_id: Uuid,
    /// Round the entry belongs to, if produced by scoring.
    pub round_id: Option<Uuid>,
    /// Entry kind.
    pub kind: BalanceEventKind,
    /// Signed amount in dollars.
    pub amount: i64,
    /// Human-readable explanation.
    pub note: String,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

/// Operational audit entry, never read by game logic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameEventLogEntity {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning game.
    pub game_id: Uuid,
    /// Free-form tag such as `round_scored`.
    pub kind: String,
    /// Transition-specific payload.
    pub payload: serde_json::Value,
    /// Creation timestamp.
    pub created_at: SystemTime,
}
