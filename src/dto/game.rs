use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    dao::models::{
        BalanceEventEntity, BalanceEventKind, GameEntity, GameEventLogEntity, GamePhase,
        GameStatus, GuessEntity, PlayerEntity, RoundEntity, RoundStatus,
    },
    dto::{
        format_system_time,
        validation::{validate_display_name, validate_game_code, validate_pin},
    },
    state::{guess::time_remaining_seconds, session::GameSession},
};

/// Payload used to set up a brand-new game.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct CreateGameRequest {
    /// Join code; generated when omitted. Stored uppercase.
    #[serde(default)]
    #[validate(custom(function = "validate_game_code"))]
    pub code: Option<String>,
    #[validate(custom(function = "validate_pin"))]
    pub gm_pin: String,
    #[validate(nested)]
    pub players: Vec<NewPlayer>,
    #[validate(length(min = 1, message = "at least one round is required"), nested)]
    pub rounds: Vec<NewRound>,
    #[serde(default)]
    #[validate(range(min = 0, max = 1_000_000_000))]
    pub exact_bonus_amount: Option<i64>,
    #[serde(default)]
    #[validate(range(min = 1, max = 1_000_000_000))]
    pub default_missing_guess_value: Option<i64>,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub guessing_duration_seconds: Option<u32>,
    #[serde(default)]
    pub break_after_rounds: Option<Vec<u32>>,
    #[serde(default)]
    #[validate(range(min = 0, max = 1_000_000_000))]
    pub starting_deposit: Option<i64>,
}

/// Player seat created with the game.
#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
pub struct NewPlayer {
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
    #[serde(default)]
    pub avatar_id: Option<String>,
}

/// Item to price, in play order.
#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "validate_round_bounds"))]
pub struct NewRound {
    #[validate(custom(function = "validate_display_name"))]
    pub item_name: String,
    #[validate(range(min = 0, max = 1_000_000_000))]
    pub actual_price: i64,
    /// Defaults to the configured minimum.
    #[serde(default)]
    #[validate(range(min = 0, max = 1_000_000_000))]
    pub min_guess: Option<i64>,
    /// Defaults to the configured maximum.
    #[serde(default)]
    #[validate(range(min = 0, max = 1_000_000_000))]
    pub max_guess: Option<i64>,
    #[serde(default)]
    pub hint_text: Option<String>,
    #[serde(default)]
    #[validate(url)]
    pub item_photo_url: Option<String>,
}

fn validate_round_bounds(round: &NewRound) -> Result<(), ValidationError> {
    if let (Some(min), Some(max)) = (round.min_guess, round.max_guess) {
        if min > max {
            let mut err = ValidationError::new("guess_bounds");
            err.message = Some(format!("min_guess {min} is above max_guess {max}").into());
            return Err(err);
        }
    }
    let price = round.actual_price;
    let below = round.min_guess.is_some_and(|min| price < min);
    let above = round.max_guess.is_some_and(|max| price > max);
    if below || above {
        let mut err = ValidationError::new("price_outside_bounds");
        err.message =
            Some(format!("actual_price {price} cannot be guessed within the bounds").into());
        return Err(err);
    }
    Ok(())
}

/// Returned once a game has been created.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateGameResponse {
    pub id: Uuid,
    pub code: String,
    pub players: Vec<PlayerView>,
    pub total_rounds: u32,
}

/// Game-level fields shared by every view.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameView {
    pub id: Uuid,
    pub code: String,
    pub status: GameStatus,
    pub phase: GamePhase,
    pub current_round_index: u32,
    pub total_rounds: u32,
    pub is_paused: bool,
    /// Incremented on every committed change.
    pub version: u64,
    pub exact_bonus_amount: i64,
    pub default_missing_guess_value: i64,
    pub guessing_duration_seconds: u32,
    pub guessing_start_time: Option<String>,
    /// Seconds left to submit a first guess, rounded up; only while guessing.
    pub time_remaining_seconds: Option<u64>,
    pub break_after_rounds: Vec<u32>,
    pub starting_deposit: i64,
    pub created_at: String,
    pub started_at: Option<String>,
}

impl GameView {
    fn build(game: &GameEntity, now: SystemTime) -> Self {
        Self {
            id: game.id,
            code: game.code.clone(),
            status: game.status,
            phase: game.current_phase,
            current_round_index: game.current_round_index,
            total_rounds: game.total_rounds,
            is_paused: game.is_paused,
            version: game.version,
            exact_bonus_amount: game.exact_bonus_amount,
            default_missing_guess_value: game.default_missing_guess_value,
            guessing_duration_seconds: game.guessing_duration_seconds,
            guessing_start_time: game.guessing_start_time.map(format_system_time),
            time_remaining_seconds: time_remaining_seconds(game, now),
            break_after_rounds: game.break_after_rounds.clone(),
            starting_deposit: game.starting_deposit,
            created_at: format_system_time(game.created_at),
            started_at: game.started_at.map(format_system_time),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerView {
    pub id: Uuid,
    pub name: String,
    pub avatar_id: Option<String>,
    pub order: u32,
    pub balance: i64,
    pub cumulative_answer_time_ms: u64,
    /// A device holds this seat.
    pub claimed: bool,
}

impl From<&PlayerEntity> for PlayerView {
    fn from(player: &PlayerEntity) -> Self {
        Self {
            id: player.id,
            name: player.name.clone(),
            avatar_id: player.avatar_id.clone(),
            order: player.order,
            balance: player.balance,
            cumulative_answer_time_ms: player.cumulative_answer_time_ms,
            claimed: player.session_token.is_some(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoundView {
    pub id: Uuid,
    pub index: u32,
    pub item_name: String,
    /// Hidden from players until the price is revealed.
    pub actual_price: Option<i64>,
    pub min_guess: i64,
    pub max_guess: i64,
    pub hint_text: Option<String>,
    pub item_photo_url: Option<String>,
    pub status: RoundStatus,
    pub closest_winner_id: Option<Uuid>,
    pub exact_guessers: Vec<Uuid>,
}

impl RoundView {
    fn build(round: &RoundEntity, redact: bool) -> Self {
        let hide_price = redact && !round.status.price_is_public();
        Self {
            id: round.id,
            index: round.index,
            item_name: round.item_name.clone(),
            actual_price: (!hide_price).then_some(round.actual_price),
            min_guess: round.min_guess,
            max_guess: round.max_guess,
            hint_text: round.hint_text.clone(),
            item_photo_url: round.item_photo_url.clone(),
            status: round.status,
            closest_winner_id: round.closest_winner_id,
            exact_guessers: round.exact_guessers.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GuessView {
    pub player_id: Uuid,
    /// Hidden from players while guessing is open.
    pub value: Option<i64>,
    pub submitted_at: String,
    pub revision: u32,
    pub is_override: bool,
}

impl GuessView {
    fn build(guess: &GuessEntity, hide_value: bool) -> Self {
        Self {
            player_id: guess.player_id,
            value: (!hide_value).then_some(guess.value),
            submitted_at: format_system_time(guess.submitted_at),
            revision: guess.revision,
            is_override: guess.is_override,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LeaderboardEntry {
    /// 1-based; players with equal balances share a rank.
    pub rank: u32,
    pub player_id: Uuid,
    pub name: String,
    pub balance: i64,
}

/// Players by balance, highest first, ties kept in seat order.
pub fn leaderboard(players: &[PlayerEntity]) -> Vec<LeaderboardEntry> {
    let mut sorted: Vec<&PlayerEntity> = players.iter().collect();
    sorted.sort_by(|a, b| b.balance.cmp(&a.balance).then(a.order.cmp(&b.order)));

    let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(sorted.len());
    for (position, player) in sorted.into_iter().enumerate() {
        let rank = match entries.last() {
            Some(previous) if previous.balance == player.balance => previous.rank,
            _ => position as u32 + 1,
        };
        entries.push(LeaderboardEntry {
            rank,
            player_id: player.id,
            name: player.name.clone(),
            balance: player.balance,
        });
    }
    entries
}

/// Read model served to the shared display and player devices.
#[derive(Debug, Serialize, ToSchema)]
pub struct PublicGameView {
    pub game: GameView,
    pub players: Vec<PlayerView>,
    pub rounds: Vec<RoundView>,
    pub current_guesses: Vec<GuessView>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl PublicGameView {
    pub fn build(session: &GameSession, now: SystemTime) -> Self {
        Self::project(session, now, true)
    }

    fn project(session: &GameSession, now: SystemTime, redact: bool) -> Self {
        let hide_values = redact
            && session
                .current_round()
                .is_some_and(|round| round.status == RoundStatus::Guessing);
        Self {
            game: GameView::build(&session.game, now),
            players: session.players.iter().map(PlayerView::from).collect(),
            rounds: session
                .rounds
                .iter()
                .map(|round| RoundView::build(round, redact))
                .collect(),
            current_guesses: session
                .current_guesses
                .iter()
                .map(|guess| GuessView::build(guess, hide_values))
                .collect(),
            leaderboard: leaderboard(&session.players),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceEventView {
    pub id: Uuid,
    pub player_id: Uuid,
    pub round_id: Option<Uuid>,
    pub kind: BalanceEventKind,
    pub amount: i64,
    pub note: String,
    pub created_at: String,
}

impl From<&BalanceEventEntity> for BalanceEventView {
    fn from(event: &BalanceEventEntity) -> Self {
        Self {
            id: event.id,
            player_id: event.player_id,
            round_id: event.round_id,
            kind: event.kind,
            amount: event.amount,
            note: event.note.clone(),
            created_at: format_system_time(event.created_at),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventLogView {
    pub id: Uuid,
    pub kind: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub created_at: String,
}

impl From<GameEventLogEntity> for EventLogView {
    fn from(entry: GameEventLogEntity) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind,
            payload: entry.payload,
            created_at: format_system_time(entry.created_at),
        }
    }
}

/// Unredacted read model for the GM console.
#[derive(Debug, Serialize, ToSchema)]
pub struct GmGameView {
    #[serde(flatten)]
    pub view: PublicGameView,
    pub balance_events: Vec<BalanceEventView>,
    pub event_log: Vec<EventLogView>,
}

impl GmGameView {
    pub fn build(
        session: &GameSession,
        event_log: Vec<GameEventLogEntity>,
        now: SystemTime,
    ) -> Self {
        Self {
            view: PublicGameView::project(session, now, false),
            balance_events: session
                .balance_events
                .iter()
                .map(BalanceEventView::from)
                .collect(),
            event_log: event_log.into_iter().map(EventLogView::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(order: u32, balance: i64) -> PlayerEntity {
        PlayerEntity {
            id: Uuid::new_v4(),
            game_id: Uuid::nil(),
            name: format!("P{order}"),
            avatar_id: None,
            order,
            balance,
            cumulative_answer_time_ms: 0,
            session_token: None,
            last_seen_at: None,
        }
    }

    #[test]
    fn leaderboard_shares_ranks_on_ties() {
        let players = [player(0, 12), player(1, 20), player(2, 12), player(3, 3)];
        let board = leaderboard(&players);

        let ranks: Vec<_> = board.iter().map(|e| (e.name.as_str(), e.rank)).collect();
        assert_eq!(ranks, vec![("P1", 1), ("P0", 2), ("P2", 2), ("P3", 4)]);
    }

    #[test]
    fn create_request_rules_are_checked() {
        let request: CreateGameRequest = serde_json::from_value(serde_json::json!({
            "gm_pin": "1234",
            "players": [{ "name": "Ada" }, { "name": " " }],
            "rounds": [{ "item_name": "Kettle", "actual_price": 30, "min_guess": 40, "max_guess": 10 }],
            "exact_bonus_amount": -1
        }))
        .unwrap();

        let errors = request.validate().unwrap_err().to_string();
        assert!(errors.contains("players"));
        assert!(errors.contains("rounds"));
        assert!(errors.contains("exact_bonus_amount"));
    }

    #[test]
    fn empty_rounds_are_rejected() {
        let request = CreateGameRequest {
            gm_pin: "1234".into(),
            ..Default::default()
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("rounds"));
    }

    #[test]
    fn amounts_are_capped() {
        let request: CreateGameRequest = serde_json::from_value(serde_json::json!({
            "gm_pin": "1234",
            "players": [{ "name": "Ada" }],
            "rounds": [{ "item_name": "Yacht", "actual_price": 9_000_000_000i64 }],
            "starting_deposit": i64::MAX
        }))
        .unwrap();

        let errors = request.validate().unwrap_err().to_string();
        assert!(errors.contains("actual_price"));
        assert!(errors.contains("starting_deposit"));
    }

    #[test]
    fn price_must_be_reachable_within_the_bounds() {
        let round = |price: i64| NewRound {
            item_name: "Lamp".into(),
            actual_price: price,
            min_guess: Some(10),
            max_guess: Some(50),
            hint_text: None,
            item_photo_url: None,
        };
        assert!(round(10).validate().is_ok());
        assert!(round(50).validate().is_ok());
        assert!(round(9).validate().is_err());
        assert!(round(51).validate().is_err());
    }
}
