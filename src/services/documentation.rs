use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Price Guess Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::game::create_game,
        crate::routes::game::get_game,
        crate::routes::player::claim_player,
        crate::routes::player::submit_guess,
        crate::routes::gm::get_game,
        crate::routes::gm::audit,
        crate::routes::gm::start_game,
        crate::routes::gm::start_round,
        crate::routes::gm::open_guessing,
        crate::routes::gm::close_guessing,
        crate::routes::gm::reveal_price,
        crate::routes::gm::score_round,
        crate::routes::gm::end_round,
        crate::routes::gm::continue_from_break,
        crate::routes::gm::toggle_pause,
        crate::routes::gm::undo_round,
        crate::routes::gm::reset_game,
        crate::routes::gm::manual_adjust,
        crate::routes::gm::override_guess,
        crate::routes::sse::game_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::game::CreateGameRequest,
            crate::dto::game::NewPlayer,
            crate::dto::game::NewRound,
            crate::dto::game::CreateGameResponse,
            crate::dto::game::GameView,
            crate::dto::game::PlayerView,
            crate::dto::game::RoundView,
            crate::dto::game::GuessView,
            crate::dto::game::LeaderboardEntry,
            crate::dto::game::PublicGameView,
            crate::dto::game::BalanceEventView,
            crate::dto::game::EventLogView,
            crate::dto::game::GmGameView,
            crate::dto::player::ClaimPlayerRequest,
            crate::dto::player::ClaimPlayerResponse,
            crate::dto::player::SubmitGuessRequest,
            crate::dto::player::SubmitGuessResponse,
            crate::dto::gm::TransitionResponse,
            crate::dto::gm::PlayerDeltaView,
            crate::dto::gm::ScoreResponse,
            crate::dto::gm::ManualAdjustRequest,
            crate::dto::gm::ManualAdjustResponse,
            crate::dto::gm::OverrideGuessRequest,
            crate::dto::gm::OverrideGuessResponse,
            crate::dto::gm::PlayerAudit,
            crate::dto::gm::RoundPlayerTotal,
            crate::dto::gm::RoundAudit,
            crate::dto::gm::AuditResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::GameChangedEvent,
            crate::dto::sse::GuessRecordedEvent,
            crate::dto::sse::PlayerClaimedEvent,
            crate::dao::models::GameStatus,
            crate::dao::models::GamePhase,
            crate::dao::models::RoundStatus,
            crate::dao::models::BalanceEventKind,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "games", description = "Game creation and public read model"),
        (name = "players", description = "Seat claims and guess submission"),
        (name = "gm", description = "Game master console, guarded by the game PIN"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
