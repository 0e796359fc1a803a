//! Operational history of a game, kept apart from the ledger.

use std::time::SystemTime;

use serde_json::Value;
use uuid::Uuid;

use crate::dao::{game_store::Mutation, models::GameEventLogEntity};

/// Tags written to the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    GameCreated,
    GameStarted,
    RoundStart,
    GuessingOpen,
    GuessingClosed,
    PriceRevealed,
    RoundScored,
    BreakStarted,
    BreakEnded,
    GameFinished,
    GamePaused,
    GameResumed,
    RoundUndone,
    GameReset,
    ManualBalance,
    GuessOverride,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::GameCreated => "game_created",
            EventKind::GameStarted => "game_started",
            EventKind::RoundStart => "round_start",
            EventKind::GuessingOpen => "guessing_open",
            EventKind::GuessingClosed => "guessing_closed",
            EventKind::PriceRevealed => "price_revealed",
            EventKind::RoundScored => "round_scored",
            EventKind::BreakStarted => "break_started",
            EventKind::BreakEnded => "break_ended",
            EventKind::GameFinished => "game_finished",
            EventKind::GamePaused => "game_paused",
            EventKind::GameResumed => "game_resumed",
            EventKind::RoundUndone => "round_undone",
            EventKind::GameReset => "game_reset",
            EventKind::ManualBalance => "manual_balance",
            EventKind::GuessOverride => "guess_override",
        }
    }
}

/// Build the append mutation for one log entry.
pub fn entry(game_id: Uuid, kind: EventKind, payload: Value, now: SystemTime) -> Mutation {
    Mutation::AppendEventLog(GameEventLogEntity {
        id: Uuid::new_v4(),
        game_id,
        kind: kind.as_str().to_owned(),
        payload,
        created_at: now,
    })
}
