use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        game::GmGameView,
        gm::{
            AuditResponse, ManualAdjustRequest, ManualAdjustResponse, OverrideGuessRequest,
            OverrideGuessResponse, ScoreResponse, TransitionResponse,
        },
    },
    error::AppError,
    services::{game_service, gm_service},
    state::{SharedState, state_machine::GameEvent},
};

const GM_PIN_HEADER: &str = "x-gm-pin";

/// Game master console endpoints, all guarded by the PIN of the game.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/gm/games/{code}", get(get_game))
        .route("/gm/games/{code}/audit", get(audit))
        .route("/gm/games/{code}/start", post(start_game))
        .route("/gm/games/{code}/round/start", post(start_round))
        .route("/gm/games/{code}/guessing/open", post(open_guessing))
        .route("/gm/games/{code}/guessing/close", post(close_guessing))
        .route("/gm/games/{code}/reveal", post(reveal_price))
        .route("/gm/games/{code}/score", post(score_round))
        .route("/gm/games/{code}/round/end", post(end_round))
        .route("/gm/games/{code}/break/continue", post(continue_from_break))
        .route("/gm/games/{code}/pause", post(toggle_pause))
        .route("/gm/games/{code}/undo", post(undo_round))
        .route("/gm/games/{code}/reset", post(reset_game))
        .route("/gm/games/{code}/balance", post(manual_adjust))
        .route("/gm/games/{code}/guesses/override", post(override_guess))
        .route_layer(middleware::from_fn_with_state(state, require_gm_pin))
}

async fn command(
    state: &SharedState,
    code: &str,
    event: GameEvent,
) -> Result<Json<TransitionResponse>, AppError> {
    Ok(Json(gm_service::transition(state, code, event).await?))
}

/// Full game view including ledger history and event log.
#[utoipa::path(
    get,
    path = "/gm/games/{code}",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses((status = 200, description = "GM game view", body = GmGameView))
)]
pub async fn get_game(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<GmGameView>, AppError> {
    Ok(Json(game_service::gm_view(&state, &code).await?))
}

/// Compare cached balances with the ledger.
#[utoipa::path(
    get,
    path = "/gm/games/{code}/audit",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses((status = 200, description = "Ledger audit", body = AuditResponse))
)]
pub async fn audit(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<AuditResponse>, AppError> {
    Ok(Json(game_service::audit(&state, &code).await?))
}

/// Credit starting deposits and enter round 1.
#[utoipa::path(
    post,
    path = "/gm/games/{code}/start",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses(
        (status = 200, description = "Game started", body = TransitionResponse),
        (status = 409, description = "Command not allowed in the current phase")
    )
)]
pub async fn start_game(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    command(&state, &code, GameEvent::StartGame).await
}

/// Announce the next round after a break.
#[utoipa::path(
    post,
    path = "/gm/games/{code}/round/start",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses(
        (status = 200, description = "Round announced", body = TransitionResponse),
        (status = 409, description = "Command not allowed in the current phase")
    )
)]
pub async fn start_round(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    command(&state, &code, GameEvent::StartRound).await
}

/// Open the guessing window and start its deadline.
#[utoipa::path(
    post,
    path = "/gm/games/{code}/guessing/open",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses(
        (status = 200, description = "Guessing open", body = TransitionResponse),
        (status = 409, description = "Command not allowed in the current phase")
    )
)]
pub async fn open_guessing(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    command(&state, &code, GameEvent::OpenGuessing).await
}

#[utoipa::path(
    post,
    path = "/gm/games/{code}/guessing/close",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses(
        (status = 200, description = "Guessing closed", body = TransitionResponse),
        (status = 409, description = "Command not allowed in the current phase")
    )
)]
pub async fn close_guessing(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    command(&state, &code, GameEvent::CloseGuessing).await
}

#[utoipa::path(
    post,
    path = "/gm/games/{code}/reveal",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses(
        (status = 200, description = "Price revealed", body = TransitionResponse),
        (status = 409, description = "Command not allowed in the current phase")
    )
)]
pub async fn reveal_price(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    command(&state, &code, GameEvent::RevealPrice).await
}

/// Score the revealed round into the ledger. A round is scored at most once.
#[utoipa::path(
    post,
    path = "/gm/games/{code}/score",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses(
        (status = 200, description = "Round scored", body = ScoreResponse),
        (status = 409, description = "Round not revealed or already scored")
    )
)]
pub async fn score_round(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<ScoreResponse>, AppError> {
    Ok(Json(gm_service::score_round(&state, &code).await?))
}

/// Leave the results screen for the next round, a break, or the end of the game.
#[utoipa::path(
    post,
    path = "/gm/games/{code}/round/end",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses(
        (status = 200, description = "Round ended", body = TransitionResponse),
        (status = 409, description = "Command not allowed in the current phase")
    )
)]
pub async fn end_round(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    command(&state, &code, GameEvent::EndRound).await
}

#[utoipa::path(
    post,
    path = "/gm/games/{code}/break/continue",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses(
        (status = 200, description = "Break over", body = TransitionResponse),
        (status = 409, description = "Game is not on a break")
    )
)]
pub async fn continue_from_break(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    command(&state, &code, GameEvent::ContinueFromBreak).await
}

/// Flip the pause flag shown to players.
#[utoipa::path(
    post,
    path = "/gm/games/{code}/pause",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses(
        (status = 200, description = "Pause toggled", body = TransitionResponse),
        (status = 409, description = "Game not in progress")
    )
)]
pub async fn toggle_pause(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    command(&state, &code, GameEvent::TogglePause).await
}

/// Reverse the current round's ledger entries and replay it from the start.
#[utoipa::path(
    post,
    path = "/gm/games/{code}/undo",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses(
        (status = 200, description = "Round undone", body = TransitionResponse),
        (status = 409, description = "Command not allowed in the current phase")
    )
)]
pub async fn undo_round(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    command(&state, &code, GameEvent::UndoRound).await
}

/// Wipe guesses and the ledger and return to the lobby.
#[utoipa::path(
    post,
    path = "/gm/games/{code}/reset",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    responses((status = 200, description = "Game reset", body = TransitionResponse))
)]
pub async fn reset_game(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    command(&state, &code, GameEvent::ResetGame).await
}

/// Credit or debit a player outside round scoring.
#[utoipa::path(
    post,
    path = "/gm/games/{code}/balance",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    request_body = ManualAdjustRequest,
    responses(
        (status = 200, description = "Balance adjusted", body = ManualAdjustResponse),
        (status = 400, description = "Zero amount"),
        (status = 404, description = "Unknown player")
    )
)]
pub async fn manual_adjust(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<ManualAdjustRequest>>,
) -> Result<Json<ManualAdjustResponse>, AppError> {
    Ok(Json(gm_service::manual_adjust(&state, &code, payload).await?))
}

/// Enter a guess for a player, any time before the round is scored.
#[utoipa::path(
    post,
    path = "/gm/games/{code}/guesses/override",
    tag = "gm",
    params(
        ("X-Gm-Pin" = String, Header, description = "PIN chosen when the game was created"),
        ("code" = String, Path, description = "Join code of the game")
    ),
    request_body = OverrideGuessRequest,
    responses(
        (status = 200, description = "Guess overridden", body = OverrideGuessResponse),
        (status = 409, description = "Round already scored")
    )
)]
pub async fn override_guess(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<OverrideGuessRequest>>,
) -> Result<Json<OverrideGuessResponse>, AppError> {
    Ok(Json(gm_service::override_guess(&state, &code, payload).await?))
}

async fn require_gm_pin(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(GM_PIN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned())
        .ok_or_else(|| AppError::Unauthorized("missing GM PIN header `X-Gm-Pin`".into()))?;

    game_service::verify_gm_pin(&state, &code, &provided).await?;
    Ok(next.run(req).await)
}
