use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::game::{CreateGameRequest, CreateGameResponse, PublicGameView},
    error::AppError,
    services::game_service,
    state::SharedState,
};

/// Routes creating games and serving the public read model.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games", post(create_game))
        .route("/games/{code}", get(get_game))
}

/// Create a game with its players and rounds.
#[utoipa::path(
    post,
    path = "/games",
    tag = "games",
    request_body = CreateGameRequest,
    responses(
        (status = 200, description = "Game created", body = CreateGameResponse),
        (status = 400, description = "Invalid game definition"),
        (status = 409, description = "Game code already taken")
    )
)]
pub async fn create_game(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateGameRequest>>,
) -> Result<Json<CreateGameResponse>, AppError> {
    let created = game_service::create_game(&state, payload).await?;
    Ok(Json(created))
}

/// Public view of a game: prices and guess values stay hidden until revealed.
#[utoipa::path(
    get,
    path = "/games/{code}",
    tag = "games",
    params(("code" = String, Path, description = "Join code of the game")),
    responses(
        (status = 200, description = "Public game view", body = PublicGameView),
        (status = 404, description = "Unknown game code")
    )
)]
pub async fn get_game(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<PublicGameView>, AppError> {
    Ok(Json(game_service::public_view(&state, &code).await?))
}
