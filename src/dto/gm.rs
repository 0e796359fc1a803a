//! DTO definitions used by the GM console endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{GameEntity, GamePhase, GameStatus},
    state::scoring::{PlayerDelta, RoundScore},
};

/// Game state after a GM command.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransitionResponse {
    pub code: String,
    pub version: u64,
    pub status: GameStatus,
    pub phase: GamePhase,
    pub round_index: u32,
    pub is_paused: bool,
}

impl From<&GameEntity> for TransitionResponse {
    fn from(game: &GameEntity) -> Self {
        Self {
            code: game.code.clone(),
            version: game.version,
            status: game.status,
            phase: game.current_phase,
            round_index: game.current_round_index,
            is_paused: game.is_paused,
        }
    }
}

/// Outcome of one player for the scored round.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerDeltaView {
    pub player_id: Uuid,
    pub resolved_guess: i64,
    /// False when the default guess was used.
    pub submitted: bool,
    pub diff: i64,
    pub bonus: i64,
    /// Net balance change.
    pub delta: i64,
}

impl From<&PlayerDelta> for PlayerDeltaView {
    fn from(delta: &PlayerDelta) -> Self {
        Self {
            player_id: delta.player_id,
            resolved_guess: delta.resolved_guess,
            submitted: delta.submitted,
            diff: delta.diff,
            bonus: delta.bonus,
            delta: delta.total(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScoreResponse {
    #[serde(flatten)]
    pub game: TransitionResponse,
    pub deltas: Vec<PlayerDeltaView>,
    pub exact_guessers: Vec<Uuid>,
    pub closest_winner_id: Option<Uuid>,
}

impl ScoreResponse {
    pub fn new(game: &GameEntity, score: &RoundScore) -> Self {
        Self {
            game: game.into(),
            deltas: score.deltas.iter().map(PlayerDeltaView::from).collect(),
            exact_guessers: score.exact_guessers.clone(),
            closest_winner_id: score.closest_winner_id,
        }
    }
}

/// Manual balance correction.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ManualAdjustRequest {
    pub player_id: Uuid,
    /// Signed amount, never zero.
    #[validate(range(min = -1_000_000_000, max = 1_000_000_000))]
    pub amount: i64,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub note: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ManualAdjustResponse {
    #[serde(flatten)]
    pub game: TransitionResponse,
    pub player_id: Uuid,
    pub amount: i64,
}

/// Guess entered by the GM for a player.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct OverrideGuessRequest {
    pub player_id: Uuid,
    #[validate(range(min = 0, max = 1_000_000_000))]
    pub value: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OverrideGuessResponse {
    #[serde(flatten)]
    pub game: TransitionResponse,
    pub player_id: Uuid,
    pub value: i64,
    pub revision: u32,
}

/// Cached balance against the ledger for one player.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerAudit {
    pub player_id: Uuid,
    pub name: String,
    pub cached_balance: i64,
    pub ledger_balance: i64,
    pub consistent: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoundPlayerTotal {
    pub player_id: Uuid,
    pub amount: i64,
}

/// Ledger sums of one scored round.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundAudit {
    pub round_id: Uuid,
    pub round_index: u32,
    pub totals: Vec<RoundPlayerTotal>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditResponse {
    pub code: String,
    /// Every cached balance equals its ledger sum.
    pub consistent: bool,
    pub players: Vec<PlayerAudit>,
    pub rounds: Vec<RoundAudit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjustment_and_override_are_bounded() {
        let adjust = |amount: i64| ManualAdjustRequest {
            player_id: Uuid::nil(),
            amount,
            note: None,
        };
        assert!(adjust(-1_000_000_000).validate().is_ok());
        assert!(adjust(i64::MAX).validate().is_err());
        assert!(adjust(i64::MIN).validate().is_err());

        let guess = |value: i64| OverrideGuessRequest {
            player_id: Uuid::nil(),
            value,
        };
        assert!(guess(1_000_000_000).validate().is_ok());
        assert!(guess(1_000_000_001).validate().is_err());
    }
}
