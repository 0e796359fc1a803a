use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::player::{
        ClaimPlayerRequest, ClaimPlayerResponse, SubmitGuessRequest, SubmitGuessResponse,
    },
    error::AppError,
    services::{game_service, guess_service},
    state::SharedState,
};

const PLAYER_TOKEN_HEADER: &str = "x-player-token";

/// Endpoints used by player devices.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games/{code}/players/{player_id}/claim", post(claim_player))
        .route("/games/{code}/guesses", post(submit_guess))
}

/// Bind this device to a player seat, or resume it with the token issued earlier.
#[utoipa::path(
    post,
    path = "/games/{code}/players/{player_id}/claim",
    tag = "players",
    params(
        ("code" = String, Path, description = "Join code of the game"),
        ("player_id" = Uuid, Path, description = "Seat to claim")
    ),
    request_body = ClaimPlayerRequest,
    responses(
        (status = 200, description = "Seat claimed", body = ClaimPlayerResponse),
        (status = 404, description = "Unknown game or player"),
        (status = 409, description = "Seat already claimed by another device")
    )
)]
pub async fn claim_player(
    State(state): State<SharedState>,
    Path((code, player_id)): Path<(String, Uuid)>,
    payload: Option<Json<ClaimPlayerRequest>>,
) -> Result<Json<ClaimPlayerResponse>, AppError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    Ok(Json(
        game_service::claim_player(&state, &code, player_id, request).await?,
    ))
}

/// Submit or edit the guess of the claimed player for the current round.
#[utoipa::path(
    post,
    path = "/games/{code}/guesses",
    tag = "players",
    params(
        ("code" = String, Path, description = "Join code of the game"),
        ("X-Player-Token" = String, Header, description = "Session token returned by the claim endpoint")
    ),
    request_body = SubmitGuessRequest,
    responses(
        (status = 200, description = "Guess stored", body = SubmitGuessResponse),
        (status = 400, description = "Guess outside the round bounds"),
        (status = 401, description = "Missing or mismatching session token"),
        (status = 409, description = "Round not accepting guesses")
    )
)]
pub async fn submit_guess(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Valid(Json(payload)): Valid<Json<SubmitGuessRequest>>,
) -> Result<Json<SubmitGuessResponse>, AppError> {
    let token = headers
        .get(PLAYER_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("missing player token header `X-Player-Token`".into())
        })?;
    Ok(Json(
        guess_service::submit_guess(&state, &code, token, payload).await?,
    ))
}
