use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::models::GameEntity,
    dto::sse::{GameChangedEvent, GuessRecordedEvent, PlayerClaimedEvent, ServerEvent, SystemStatus},
    state::SharedState,
};

pub const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_GAME_CHANGED: &str = "game.changed";
const EVENT_GUESS_RECORDED: &str = "guess.recorded";
const EVENT_PLAYER_CLAIMED: &str = "player.claimed";
const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Tell subscribers of the game to re-read it.
pub fn broadcast_game_changed(state: &SharedState, game: &GameEntity, reason: &str) {
    let payload = GameChangedEvent {
        code: game.code.clone(),
        version: game.version,
        status: game.status,
        phase: game.current_phase,
        round_index: game.current_round_index,
        is_paused: game.is_paused,
        reason: reason.to_owned(),
    };
    send_game_event(state, &game.code, EVENT_GAME_CHANGED, &payload);
}

/// Announce that a player stored a guess, without its value.
pub fn broadcast_guess_recorded(
    state: &SharedState,
    code: &str,
    round_index: u32,
    player_id: Uuid,
    revision: u32,
) {
    let payload = GuessRecordedEvent {
        code: code.to_owned(),
        round_index,
        player_id,
        revision,
    };
    send_game_event(state, code, EVENT_GUESS_RECORDED, &payload);
}

/// Announce that a device claimed a player seat.
pub fn broadcast_player_claimed(state: &SharedState, code: &str, player_id: Uuid) {
    let payload = PlayerClaimedEvent {
        code: code.to_owned(),
        player_id,
    };
    send_game_event(state, code, EVENT_PLAYER_CLAIMED, &payload);
}

/// Broadcast degraded mode changes to every stream.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    match ServerEvent::json(Some(EVENT_SYSTEM_STATUS.to_string()), &SystemStatus { degraded }) {
        Ok(event) => state.sse().broadcast(event),
        Err(err) => warn!(error = %err, "failed to serialize system status SSE payload"),
    }
}

fn send_game_event(state: &SharedState, code: &str, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.sse().broadcast(event.for_game(code)),
        Err(err) => warn!(event, error = %err, "failed to serialize game SSE payload"),
    }
}
