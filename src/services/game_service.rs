use std::time::SystemTime;

use rand::{Rng, rng, seq::IndexedRandom};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        game_store::{Mutation, WriteBatch},
        models::{GameEntity, GamePhase, GameStatus, PlayerEntity, RoundEntity, RoundStatus},
    },
    dto::{
        game::{CreateGameRequest, CreateGameResponse, GmGameView, PlayerView, PublicGameView},
        gm::{AuditResponse, PlayerAudit, RoundAudit, RoundPlayerTotal},
        player::{ClaimPlayerRequest, ClaimPlayerResponse},
    },
    error::ServiceError,
    services::sse_events::{broadcast_game_changed, broadcast_player_claimed},
    state::{
        SharedState,
        event_log::{self, EventKind},
        ledger::{replay_balances, round_totals},
        session::GameSession,
    },
};

const CODE_WORDS: [&str; 10] = [
    "SNOW", "BELL", "TREE", "GIFT", "STAR", "JOLLY", "MERRY", "CANDY", "FROST", "HOLLY",
];
const CODE_ATTEMPTS: usize = 5;

/// Create a game in the lobby with its players and rounds.
pub async fn create_game(
    state: &SharedState,
    request: CreateGameRequest,
) -> Result<CreateGameResponse, ServiceError> {
    let config = state.config();
    let player_count = request.players.len();
    if player_count < config.min_players || player_count > config.max_players {
        return Err(ServiceError::InvalidInput(format!(
            "a game needs {} to {} players (got {player_count})",
            config.min_players, config.max_players
        )));
    }
    if request.gm_pin.chars().count() < config.min_pin_length {
        return Err(ServiceError::InvalidInput(format!(
            "GM PIN must be at least {} characters",
            config.min_pin_length
        )));
    }
    if request.rounds.is_empty() {
        return Err(ServiceError::InvalidInput("at least one round is required".into()));
    }

    let store = state.require_game_store().await?;
    let code = match &request.code {
        Some(code) => code.to_uppercase(),
        None => {
            let mut generated = None;
            for _ in 0..CODE_ATTEMPTS {
                let candidate = generate_code();
                if store.find_game_by_code(candidate.clone()).await?.is_none() {
                    generated = Some(candidate);
                    break;
                }
            }
            generated.ok_or_else(|| {
                ServiceError::Conflict("could not find a free game code".into())
            })?
        }
    };

    let now = SystemTime::now();
    let rules = &config.rules;
    let game = GameEntity {
        id: Uuid::new_v4(),
        code,
        gm_pin: request.gm_pin,
        status: GameStatus::Lobby,
        current_phase: GamePhase::Lobby,
        current_round_index: 0,
        total_rounds: request.rounds.len() as u32,
        exact_bonus_amount: request
            .exact_bonus_amount
            .unwrap_or(rules.exact_bonus_amount),
        default_missing_guess_value: request
            .default_missing_guess_value
            .unwrap_or(rules.default_missing_guess_value),
        guessing_duration_seconds: request
            .guessing_duration_seconds
            .unwrap_or(rules.guessing_duration_seconds),
        guessing_start_time: None,
        is_paused: false,
        break_after_rounds: request
            .break_after_rounds
            .unwrap_or_else(|| rules.break_after_rounds.clone()),
        starting_deposit: request.starting_deposit.unwrap_or(rules.starting_deposit),
        version: 0,
        created_at: now,
        updated_at: now,
        started_at: None,
    };

    let players: Vec<PlayerEntity> = request
        .players
        .into_iter()
        .enumerate()
        .map(|(order, player)| PlayerEntity {
            id: Uuid::new_v4(),
            game_id: game.id,
            name: player.name.trim().to_owned(),
            avatar_id: player.avatar_id,
            order: order as u32,
            balance: 0,
            cumulative_answer_time_ms: 0,
            session_token: None,
            last_seen_at: None,
        })
        .collect();

    let mut rounds = Vec::with_capacity(request.rounds.len());
    for (position, round) in request.rounds.into_iter().enumerate() {
        let min_guess = round.min_guess.unwrap_or(config.default_min_guess);
        let max_guess = round.max_guess.unwrap_or(config.default_max_guess);
        if min_guess > max_guess {
            return Err(ServiceError::InvalidInput(format!(
                "round {}: min_guess {min_guess} is above max_guess {max_guess}",
                position + 1
            )));
        }
        if !(min_guess..=max_guess).contains(&round.actual_price) {
            return Err(ServiceError::InvalidInput(format!(
                "round {}: actual_price {} is outside {min_guess}..={max_guess}",
                position + 1,
                round.actual_price
            )));
        }
        rounds.push(RoundEntity {
            id: Uuid::new_v4(),
            game_id: game.id,
            index: position as u32 + 1,
            item_name: round.item_name.trim().to_owned(),
            actual_price: round.actual_price,
            min_guess,
            max_guess,
            hint_text: round.hint_text,
            item_photo_url: round.item_photo_url,
            status: RoundStatus::Pending,
            closest_winner_id: None,
            exact_guessers: vec![],
            guessing_start_time: None,
        });
    }

    let mut batch = WriteBatch::new(game.id);
    batch.push(Mutation::InsertGame(game.clone()));
    batch.extend(players.iter().cloned().map(Mutation::InsertPlayer));
    batch.extend(rounds.iter().cloned().map(Mutation::InsertRound));
    batch.push(event_log::entry(
        game.id,
        EventKind::GameCreated,
        json!({ "players": players.len(), "rounds": rounds.len() }),
        now,
    ));
    store.commit(batch).await?;

    info!(code = %game.code, game_id = %game.id, players = players.len(), rounds = rounds.len(), "game created");
    broadcast_game_changed(state, &game, "create_game");

    Ok(CreateGameResponse {
        id: game.id,
        code: game.code,
        players: players.iter().map(PlayerView::from).collect(),
        total_rounds: game.total_rounds,
    })
}

fn generate_code() -> String {
    let mut rng = rng();
    let word = CODE_WORDS.choose(&mut rng).copied().unwrap_or("STAR");
    let number: u16 = rng.random_range(100..1000);
    format!("{word}{number}")
}

async fn load_session(state: &SharedState, code: &str) -> Result<GameSession, ServiceError> {
    let store = state.require_game_store().await?;
    let game = state.find_game(code).await?;
    Ok(GameSession::load(store.as_ref(), game).await?)
}

/// Read model for the shared display and player devices.
pub async fn public_view(state: &SharedState, code: &str) -> Result<PublicGameView, ServiceError> {
    let session = load_session(state, code).await?;
    Ok(PublicGameView::build(&session, SystemTime::now()))
}

/// Unredacted read model including the ledger and the event log.
pub async fn gm_view(state: &SharedState, code: &str) -> Result<GmGameView, ServiceError> {
    let store = state.require_game_store().await?;
    let session = load_session(state, code).await?;
    let event_log = store.list_event_log(session.game.id).await?;
    Ok(GmGameView::build(&session, event_log, SystemTime::now()))
}

/// Compare every cached balance with the ledger, and sum each scored round.
pub async fn audit(state: &SharedState, code: &str) -> Result<AuditResponse, ServiceError> {
    let session = load_session(state, code).await?;
    let ledger = replay_balances(&session.balance_events);

    let players: Vec<PlayerAudit> = session
        .players
        .iter()
        .map(|player| {
            let ledger_balance = ledger.get(&player.id).copied().unwrap_or(0);
            PlayerAudit {
                player_id: player.id,
                name: player.name.clone(),
                cached_balance: player.balance,
                ledger_balance,
                consistent: ledger_balance == player.balance,
            }
        })
        .collect();

    let rounds = session
        .rounds
        .iter()
        .filter(|round| round.status == RoundStatus::Scored)
        .map(|round| RoundAudit {
            round_id: round.id,
            round_index: round.index,
            totals: round_totals(round.id, &session.balance_events)
                .into_iter()
                .map(|(player_id, amount)| RoundPlayerTotal { player_id, amount })
                .collect(),
        })
        .collect();

    Ok(AuditResponse {
        code: session.game.code.clone(),
        consistent: players.iter().all(|player| player.consistent),
        players,
        rounds,
    })
}

/// Check the GM PIN of a game.
pub async fn verify_gm_pin(state: &SharedState, code: &str, pin: &str) -> Result<(), ServiceError> {
    let game = state.find_game(code).await?;
    if game.gm_pin != pin {
        return Err(ServiceError::Unauthorized("invalid GM PIN".into()));
    }
    Ok(())
}

/// Bind a device to a player seat, or resume a seat with its token.
pub async fn claim_player(
    state: &SharedState,
    code: &str,
    player_id: Uuid,
    request: ClaimPlayerRequest,
) -> Result<ClaimPlayerResponse, ServiceError> {
    let response = state
        .run_exclusive(code, |session, now| {
            let player = session
                .player(player_id)
                .ok_or_else(|| ServiceError::NotFound(format!("player {player_id}")))?;

            let token = match (&player.session_token, &request.session_token) {
                (Some(current), Some(presented)) if current == presented => current.clone(),
                (Some(_), _) => {
                    return Err(ServiceError::Conflict(format!(
                        "player {} is already claimed on another device",
                        player.name
                    )));
                }
                (None, _) => Uuid::new_v4().simple().to_string(),
            };

            let mut batch = WriteBatch::new(session.game.id);
            batch.push(Mutation::UpdatePlayerSession {
                player_id,
                session_token: Some(token.clone()),
                last_seen_at: now,
            });
            Ok((
                batch,
                ClaimPlayerResponse {
                    player_id,
                    name: player.name.clone(),
                    session_token: token,
                },
            ))
        })
        .await?;

    info!(code, %player_id, "player seat claimed");
    broadcast_player_claimed(state, &code.to_uppercase(), player_id);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::game_store::memory::MemoryGameStore,
        dto::game::{NewPlayer, NewRound},
        state::AppState,
    };

    async fn state() -> SharedState {
        let state = AppState::new(AppConfig::default());
        state.set_game_store(Arc::new(MemoryGameStore::new())).await;
        state
    }

    fn request(code: Option<&str>) -> CreateGameRequest {
        CreateGameRequest {
            code: code.map(str::to_owned),
            gm_pin: "9876".into(),
            players: ["Ada", "Bob", "Cy"]
                .into_iter()
                .map(|name| NewPlayer {
                    name: name.into(),
                    avatar_id: None,
                })
                .collect(),
            rounds: (1..=3)
                .map(|i| NewRound {
                    item_name: format!("Item {i}"),
                    actual_price: i * 3,
                    min_guess: None,
                    max_guess: None,
                    hint_text: None,
                    item_photo_url: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn generated_codes_follow_word_and_digits() {
        for _ in 0..20 {
            let code = generate_code();
            let digits = &code[code.len() - 3..];
            assert!(CODE_WORDS.contains(&&code[..code.len() - 3]));
            assert!(digits.parse::<u16>().is_ok_and(|n| (100..1000).contains(&n)));
        }
    }

    #[tokio::test]
    async fn create_game_uses_config_defaults() {
        let state = state().await;
        let created = create_game(&state, request(Some("tree555"))).await.unwrap();
        assert_eq!(created.code, "TREE555");
        assert_eq!(created.total_rounds, 3);

        let view = public_view(&state, "tree555").await.unwrap();
        assert_eq!(view.game.phase, GamePhase::Lobby);
        assert_eq!(view.game.exact_bonus_amount, 5);
        assert_eq!(view.game.break_after_rounds, vec![5, 10, 15, 20]);
        assert_eq!(view.players.len(), 3);
        assert!(view.rounds.iter().all(|round| round.actual_price.is_none()));
        assert_eq!(view.rounds[0].max_guess, 10);

        let gm = gm_view(&state, "TREE555").await.unwrap();
        assert_eq!(gm.view.rounds[2].actual_price, Some(9));
        assert_eq!(gm.event_log.len(), 1);
        assert_eq!(gm.event_log[0].kind, "game_created");
    }

    #[tokio::test]
    async fn duplicate_code_conflicts() {
        let state = state().await;
        create_game(&state, request(Some("GIFT100"))).await.unwrap();
        assert!(matches!(
            create_game(&state, request(Some("gift100"))).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn player_count_and_pin_come_from_config() {
        let state = state().await;
        let mut lonely = request(None);
        lonely.players.truncate(1);
        assert!(matches!(
            create_game(&state, lonely).await,
            Err(ServiceError::InvalidInput(_))
        ));

        let mut short_pin = request(None);
        short_pin.gm_pin = "12".into();
        assert!(matches!(
            create_game(&state, short_pin).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn price_outside_the_configured_bounds_is_refused() {
        let state = state().await;
        let mut unreachable = request(Some("LAMP404"));
        // Bounds come from the config defaults, 1..=10.
        unreachable.rounds[1].actual_price = 11;
        match create_game(&state, unreachable).await {
            Err(ServiceError::InvalidInput(message)) => assert!(message.contains("round 2")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            public_view(&state, "LAMP404").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn pin_check() {
        let state = state().await;
        create_game(&state, request(Some("BELL777"))).await.unwrap();
        assert!(verify_gm_pin(&state, "BELL777", "9876").await.is_ok());
        assert!(matches!(
            verify_gm_pin(&state, "BELL777", "0000").await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn claimed_seat_can_only_be_resumed_with_its_token() {
        let state = state().await;
        let created = create_game(&state, request(Some("SNOW321"))).await.unwrap();
        let player_id = created.players[0].id;

        let first = claim_player(&state, "SNOW321", player_id, ClaimPlayerRequest::default())
            .await
            .unwrap();
        assert_eq!(first.name, "Ada");

        assert!(matches!(
            claim_player(&state, "SNOW321", player_id, ClaimPlayerRequest::default()).await,
            Err(ServiceError::Conflict(_))
        ));

        let resumed = claim_player(
            &state,
            "SNOW321",
            player_id,
            ClaimPlayerRequest {
                session_token: Some(first.session_token.clone()),
            },
        )
        .await
        .unwrap();
        assert_eq!(resumed.session_token, first.session_token);

        let view = public_view(&state, "SNOW321").await.unwrap();
        assert!(view.players[0].claimed);
        assert!(!view.players[1].claimed);
    }
}
