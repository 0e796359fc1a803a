use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::{GamePhase, GameStatus};

#[derive(Clone, Debug)]
/// Dispatched payload carried across the SSE hub.
pub struct ServerEvent {
    /// Game code the event belongs to; `None` reaches every subscriber.
    pub game_code: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            game_code: None,
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Restrict the event to subscribers of one game.
    pub fn for_game(mut self, code: impl Into<String>) -> Self {
        self.game_code = Some(code.into());
        self
    }

    /// Whether a subscriber of `code` should receive this event.
    pub fn is_visible_to(&self, code: &str) -> bool {
        self.game_code.as_deref().is_none_or(|scope| scope == code)
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Game code the stream is bound to.
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Broadcast after any committed change of a game; consumers re-read the view.
pub struct GameChangedEvent {
    pub code: String,
    pub version: u64,
    pub status: GameStatus,
    pub phase: GamePhase,
    pub round_index: u32,
    pub is_paused: bool,
    /// Command that produced the change, e.g. `score_round`.
    pub reason: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a player stored or edited a guess. The value stays private.
pub struct GuessRecordedEvent {
    pub code: String,
    pub round_index: u32,
    pub player_id: Uuid,
    pub revision: u32,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a device claimed a player seat.
pub struct PlayerClaimedEvent {
    pub code: String,
    pub player_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_events_only_reach_their_game() {
        let event = ServerEvent::json(Some("game.changed".to_string()), &SystemStatus {
            degraded: false,
        })
        .unwrap();
        assert!(event.is_visible_to("SNOW100"));

        let scoped = event.for_game("SNOW100");
        assert!(scoped.is_visible_to("SNOW100"));
        assert!(!scoped.is_visible_to("BELL200"));
    }
}
