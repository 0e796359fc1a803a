//! Payloads used by player devices.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Claim a seat, or resume it with the token issued earlier.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ClaimPlayerRequest {
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClaimPlayerResponse {
    pub player_id: Uuid,
    pub name: String,
    /// Send back as `x-player-token` when submitting guesses.
    pub session_token: String,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitGuessRequest {
    pub player_id: Uuid,
    #[validate(range(min = 0))]
    pub value: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitGuessResponse {
    pub player_id: Uuid,
    pub round_index: u32,
    pub value: i64,
    /// 1 for the first submission of the round.
    pub revision: u32,
    pub submitted_at: String,
}
