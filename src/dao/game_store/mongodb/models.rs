//! BSON document shapes. Identifiers are stored as hyphenated strings and timestamps as BSON
//! dates so filters built with `doc!` match what serde writes.

use std::str::FromStr;

use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{
    BalanceEventEntity, BalanceEventKind, GameEntity, GameEventLogEntity, GamePhase, GameStatus,
    GuessEntity, PlayerEntity, RoundEntity, RoundStatus,
};

pub const GAMES: &str = "games";
pub const PLAYERS: &str = "players";
pub const ROUNDS: &str = "rounds";
pub const GUESSES: &str = "guesses";
pub const BALANCE_EVENTS: &str = "balance_events";
pub const EVENT_LOG: &str = "game_event_log";

pub fn doc_id(id: Uuid) -> Document {
    doc! { "_id": id.to_string() }
}

fn parse_uuid(collection: &'static str, raw: &str) -> MongoResult<Uuid> {
    Uuid::from_str(raw).map_err(|err| MongoDaoError::CorruptDocument {
        collection,
        id: raw.to_owned(),
        message: err.to_string(),
    })
}

/// Unsigned counters are stored as `i64`; values past `i64::MAX` saturate.
pub fn to_stored(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_stored<T: TryFrom<i64>>(
    collection: &'static str,
    id: &str,
    field: &'static str,
    raw: i64,
) -> MongoResult<T> {
    T::try_from(raw).map_err(|_| MongoDaoError::CorruptDocument {
        collection,
        id: id.to_owned(),
        message: format!("`{field}` is out of range: {raw}"),
    })
}

fn parse_uuids(collection: &'static str, raw: &[String]) -> MongoResult<Vec<Uuid>> {
    raw.iter().map(|id| parse_uuid(collection, id)).collect()
}

fn parse_optional(collection: &'static str, raw: Option<&str>) -> MongoResult<Option<Uuid>> {
    raw.map(|id| parse_uuid(collection, id)).transpose()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameDocument {
    #[serde(rename = "_id")]
    id: String,
    code: String,
    gm_pin: String,
    status: GameStatus,
    current_phase: GamePhase,
    current_round_index: i64,
    total_rounds: i64,
    exact_bonus_amount: i64,
    default_missing_guess_value: i64,
    guessing_duration_seconds: i64,
    guessing_start_time: Option<DateTime>,
    is_paused: bool,
    break_after_rounds: Vec<i64>,
    starting_deposit: i64,
    version: i64,
    created_at: DateTime,
    updated_at: DateTime,
    started_at: Option<DateTime>,
}

impl From<GameEntity> for GameDocument {
    fn from(value: GameEntity) -> Self {
        Self {
            id: value.id.to_string(),
            code: value.code,
            gm_pin: value.gm_pin,
            status: value.status,
            current_phase: value.current_phase,
            current_round_index: i64::from(value.current_round_index),
            total_rounds: i64::from(value.total_rounds),
            exact_bonus_amount: value.exact_bonus_amount,
            default_missing_guess_value: value.default_missing_guess_value,
            guessing_duration_seconds: i64::from(value.guessing_duration_seconds),
            guessing_start_time: value.guessing_start_time.map(DateTime::from_system_time),
            is_paused: value.is_paused,
            break_after_rounds: value.break_after_rounds.into_iter().map(i64::from).collect(),
            starting_deposit: value.starting_deposit,
            version: to_stored(value.version),
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
            started_at: value.started_at.map(DateTime::from_system_time),
        }
    }
}

impl TryFrom<GameDocument> for GameEntity {
    type Error = MongoDaoError;

    fn try_from(value: GameDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_uuid(GAMES, &value.id)?,
            code: value.code,
            gm_pin: value.gm_pin,
            status: value.status,
            current_phase: value.current_phase,
            current_round_index: from_stored(
                GAMES,
                &value.id,
                "current_round_index",
                value.current_round_index,
            )?,
            total_rounds: from_stored(GAMES, &value.id, "total_rounds", value.total_rounds)?,
            exact_bonus_amount: value.exact_bonus_amount,
            default_missing_guess_value: value.default_missing_guess_value,
            guessing_duration_seconds: from_stored(
                GAMES,
                &value.id,
                "guessing_duration_seconds",
                value.guessing_duration_seconds,
            )?,
            guessing_start_time: value.guessing_start_time.map(DateTime::to_system_time),
            is_paused: value.is_paused,
            break_after_rounds: value
                .break_after_rounds
                .iter()
                .map(|&index| from_stored(GAMES, &value.id, "break_after_rounds", index))
                .collect::<MongoResult<_>>()?,
            starting_deposit: value.starting_deposit,
            version: from_stored(GAMES, &value.id, "version", value.version)?,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
            started_at: value.started_at.map(DateTime::to_system_time),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerDocument {
    #[serde(rename = "_id")]
    id: String,
    game_id: String,
    name: String,
    avatar_id: Option<String>,
    order: i64,
    balance: i64,
    cumulative_answer_time_ms: i64,
    session_token: Option<String>,
    last_seen_at: Option<DateTime>,
}

impl From<PlayerEntity> for PlayerDocument {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_id: value.game_id.to_string(),
            name: value.name,
            avatar_id: value.avatar_id,
            order: i64::from(value.order),
            balance: value.balance,
            cumulative_answer_time_ms: to_stored(value.cumulative_answer_time_ms),
            session_token: value.session_token,
            last_seen_at: value.last_seen_at.map(DateTime::from_system_time),
        }
    }
}

impl TryFrom<PlayerDocument> for PlayerEntity {
    type Error = MongoDaoError;

    fn try_from(value: PlayerDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_uuid(PLAYERS, &value.id)?,
            game_id: parse_uuid(PLAYERS, &value.game_id)?,
            name: value.name,
            avatar_id: value.avatar_id,
            order: from_stored(PLAYERS, &value.id, "order", value.order)?,
            balance: value.balance,
            cumulative_answer_time_ms: from_stored(
                PLAYERS,
                &value.id,
                "cumulative_answer_time_ms",
                value.cumulative_answer_time_ms,
            )?,
            session_token: value.session_token,
            last_seen_at: value.last_seen_at.map(DateTime::to_system_time),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundDocument {
    #[serde(rename = "_id")]
    id: String,
    game_id: String,
    index: i64,
    item_name: String,
    actual_price: i64,
    min_guess: i64,
    max_guess: i64,
    hint_text: Option<String>,
    item_photo_url: Option<String>,
    status: RoundStatus,
    closest_winner_id: Option<String>,
    exact_guessers: Vec<String>,
    guessing_start_time: Option<DateTime>,
}

impl From<RoundEntity> for RoundDocument {
    fn from(value: RoundEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_id: value.game_id.to_string(),
            index: i64::from(value.index),
            item_name: value.item_name,
            actual_price: value.actual_price,
            min_guess: value.min_guess,
            max_guess: value.max_guess,
            hint_text: value.hint_text,
            item_photo_url: value.item_photo_url,
            status: value.status,
            closest_winner_id: value.closest_winner_id.map(|id| id.to_string()),
            exact_guessers: value
                .exact_guessers
                .iter()
                .map(|id| id.to_string())
                .collect(),
            guessing_start_time: value.guessing_start_time.map(DateTime::from_system_time),
        }
    }
}

impl TryFrom<RoundDocument> for RoundEntity {
    type Error = MongoDaoError;

    fn try_from(value: RoundDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_uuid(ROUNDS, &value.id)?,
            game_id: parse_uuid(ROUNDS, &value.game_id)?,
            index: from_stored(ROUNDS, &value.id, "index", value.index)?,
            item_name: value.item_name,
            actual_price: value.actual_price,
            min_guess: value.min_guess,
            max_guess: value.max_guess,
            hint_text: value.hint_text,
            item_photo_url: value.item_photo_url,
            status: value.status,
            closest_winner_id: parse_optional(ROUNDS, value.closest_winner_id.as_deref())?,
            exact_guessers: parse_uuids(ROUNDS, &value.exact_guessers)?,
            guessing_start_time: value.guessing_start_time.map(DateTime::to_system_time),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuessDocument {
    #[serde(rename = "_id")]
    id: String,
    game_id: String,
    round_id: String,
    player_id: String,
    value: i64,
    submitted_at: DateTime,
    revision: i64,
    is_override: bool,
}

impl From<GuessEntity> for GuessDocument {
    fn from(value: GuessEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_id: value.game_id.to_string(),
            round_id: value.round_id.to_string(),
            player_id: value.player_id.to_string(),
            value: value.value,
            submitted_at: DateTime::from_system_time(value.submitted_at),
            revision: i64::from(value.revision),
            is_override: value.is_override,
        }
    }
}

impl TryFrom<GuessDocument> for GuessEntity {
    type Error = MongoDaoError;

    fn try_from(value: GuessDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_uuid(GUESSES, &value.id)?,
            game_id: parse_uuid(GUESSES, &value.game_id)?,
            round_id: parse_uuid(GUESSES, &value.round_id)?,
            player_id: parse_uuid(GUESSES, &value.player_id)?,
            value: value.value,
            submitted_at: value.submitted_at.to_system_time(),
            revision: from_stored(GUESSES, &value.id, "revision", value.revision)?,
            is_override: value.is_override,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceEventDocument {
    #[serde(rename = "_id")]
    id: String,
    game_id: String,
    player_id: String,
    round_id: Option<String>,
    kind: BalanceEventKind,
    amount: i64,
    note: String,
    created_at: DateTime,
}

impl From<BalanceEventEntity> for BalanceEventDocument {
    fn from(value: BalanceEventEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_id: value.game_id.to_string(),
            player_id: value.player_id.to_string(),
            round_id: value.round_id.map(|id| id.to_string()),
            kind: value.kind,
            amount: value.amount,
            note: value.note,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<BalanceEventDocument> for BalanceEventEntity {
    type Error = MongoDaoError;

    fn try_from(value: BalanceEventDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_uuid(BALANCE_EVENTS, &value.id)?,
            game_id: parse_uuid(BALANCE_EVENTS, &value.game_id)?,
            player_id: parse_uuid(BALANCE_EVENTS, &value.player_id)?,
            round_id: parse_optional(BALANCE_EVENTS, value.round_id.as_deref())?,
            kind: value.kind,
            amount: value.amount,
            note: value.note,
            created_at: value.created_at.to_system_time(),
        })
    }
}

/// The payload is kept as JSON text; it is only ever read back for export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogDocument {
    #[serde(rename = "_id")]
    id: String,
    game_id: String,
    kind: String,
    payload: String,
    created_at: DateTime,
}

impl From<GameEventLogEntity> for EventLogDocument {
    fn from(value: GameEventLogEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_id: value.game_id.to_string(),
            kind: value.kind,
            payload: value.payload.to_string(),
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<EventLogDocument> for GameEventLogEntity {
    type Error = MongoDaoError;

    fn try_from(value: EventLogDocument) -> MongoResult<Self> {
        let payload =
            serde_json::from_str(&value.payload).map_err(|err| MongoDaoError::CorruptDocument {
                collection: EVENT_LOG,
                id: value.id.clone(),
                message: err.to_string(),
            })?;
        Ok(Self {
            id: parse_uuid(EVENT_LOG, &value.id)?,
            game_id: parse_uuid(EVENT_LOG, &value.game_id)?,
            kind: value.kind,
            payload,
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn round_document(index: i64) -> RoundDocument {
        let mut document = RoundDocument::from(RoundEntity {
            id: Uuid::new_v4(),
            game_id: Uuid::new_v4(),
            index: 1,
            item_name: "Teapot".into(),
            actual_price: 12,
            min_guess: 1,
            max_guess: 50,
            hint_text: None,
            item_photo_url: None,
            status: RoundStatus::Pending,
            closest_winner_id: None,
            exact_guessers: vec![],
            guessing_start_time: None,
        });
        document.index = index;
        document
    }

    #[test]
    fn out_of_range_counters_are_corrupt() {
        assert_eq!(RoundEntity::try_from(round_document(3)).unwrap().index, 3);

        for index in [-1, i64::from(u32::MAX) + 1] {
            match RoundEntity::try_from(round_document(index)) {
                Err(MongoDaoError::CorruptDocument { collection, message, .. }) => {
                    assert_eq!(collection, ROUNDS);
                    assert!(message.contains("index"));
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[test]
    fn negative_answer_time_is_corrupt() {
        let mut document = PlayerDocument::from(PlayerEntity {
            id: Uuid::new_v4(),
            game_id: Uuid::new_v4(),
            name: "Ada".into(),
            avatar_id: None,
            order: 0,
            balance: 20,
            cumulative_answer_time_ms: u64::MAX,
            session_token: None,
            last_seen_at: Some(SystemTime::UNIX_EPOCH),
        });
        assert_eq!(document.cumulative_answer_time_ms, i64::MAX);

        document.cumulative_answer_time_ms = -5;
        assert!(matches!(
            PlayerEntity::try_from(document),
            Err(MongoDaoError::CorruptDocument { .. })
        ));
    }
}
