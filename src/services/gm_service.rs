use tracing::info;

use crate::{
    dto::gm::{
        ManualAdjustRequest, ManualAdjustResponse, OverrideGuessRequest, OverrideGuessResponse,
        ScoreResponse, TransitionResponse,
    },
    error::ServiceError,
    state::{SharedState, state_machine::GameEvent, transitions::run_transition_with_broadcast},
};

/// Apply one state machine command to the game identified by `code`.
pub async fn transition(
    state: &SharedState,
    code: &str,
    event: GameEvent,
) -> Result<TransitionResponse, ServiceError> {
    let (transition, ()) = run_transition_with_broadcast(state, code, |session, now| {
        Ok((session.apply(event, now)?, ()))
    })
    .await?;
    Ok(TransitionResponse::from(&transition.game))
}

/// Score the current round and return the per-player outcome.
pub async fn score_round(state: &SharedState, code: &str) -> Result<ScoreResponse, ServiceError> {
    let (transition, ()) = run_transition_with_broadcast(state, code, |session, now| {
        Ok((session.apply(GameEvent::ScoreRound, now)?, ()))
    })
    .await?;

    let score = transition
        .score
        .as_ref()
        .ok_or_else(|| ServiceError::InvalidState("scoring produced no result".into()))?;
    info!(
        code = %transition.game.code,
        round = transition.game.current_round_index,
        closest_winner = ?score.closest_winner_id,
        exact_guessers = score.exact_guessers.len(),
        "round scored"
    );
    Ok(ScoreResponse::new(&transition.game, score))
}

/// Credit or debit a player outside round scoring.
pub async fn manual_adjust(
    state: &SharedState,
    code: &str,
    request: ManualAdjustRequest,
) -> Result<ManualAdjustResponse, ServiceError> {
    let ManualAdjustRequest {
        player_id,
        amount,
        note,
    } = request;
    let (transition, ()) = run_transition_with_broadcast(state, code, |session, now| {
        Ok((session.manual_adjust(player_id, amount, note.clone(), now)?, ()))
    })
    .await?;

    Ok(ManualAdjustResponse {
        game: TransitionResponse::from(&transition.game),
        player_id,
        amount,
    })
}

/// Enter a guess on behalf of a player until the round is scored.
pub async fn override_guess(
    state: &SharedState,
    code: &str,
    request: OverrideGuessRequest,
) -> Result<OverrideGuessResponse, ServiceError> {
    let (transition, guess) = run_transition_with_broadcast(state, code, |session, now| {
        session.override_guess(request.player_id, request.value, now)
    })
    .await?;

    Ok(OverrideGuessResponse {
        game: TransitionResponse::from(&transition.game),
        player_id: guess.player_id,
        value: guess.value,
        revision: guess.revision,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{game_store::memory::MemoryGameStore, models::GamePhase},
        dto::game::{CreateGameRequest, NewPlayer, NewRound},
        services::game_service,
        state::AppState,
    };

    async fn started_game() -> (SharedState, Vec<uuid::Uuid>) {
        let state = AppState::new(AppConfig::default());
        state.set_game_store(Arc::new(MemoryGameStore::new())).await;
        let created = game_service::create_game(
            &state,
            CreateGameRequest {
                code: Some("CANDY404".into()),
                gm_pin: "1111".into(),
                players: vec![
                    NewPlayer { name: "Ada".into(), avatar_id: None },
                    NewPlayer { name: "Bob".into(), avatar_id: None },
                ],
                rounds: vec![NewRound {
                    item_name: "Scarf".into(),
                    actual_price: 8,
                    min_guess: None,
                    max_guess: None,
                    hint_text: None,
                    item_photo_url: None,
                }],
                ..Default::default()
            },
        )
        .await
        .unwrap();
        transition(&state, "CANDY404", GameEvent::StartGame).await.unwrap();
        (state, created.players.iter().map(|p| p.id).collect())
    }

    #[tokio::test]
    async fn commands_report_the_new_phase() {
        let (state, _) = started_game().await;
        let response = transition(&state, "CANDY404", GameEvent::OpenGuessing)
            .await
            .unwrap();
        assert_eq!(response.phase, GamePhase::Guessing);
        assert_eq!(response.version, 2);

        assert!(matches!(
            transition(&state, "CANDY404", GameEvent::RevealPrice).await,
            Err(ServiceError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn override_counts_as_the_players_guess() {
        let (state, players) = started_game().await;
        for event in [
            GameEvent::OpenGuessing,
            GameEvent::CloseGuessing,
            GameEvent::RevealPrice,
        ] {
            transition(&state, "CANDY404", event).await.unwrap();
        }

        let overridden = override_guess(
            &state,
            "CANDY404",
            OverrideGuessRequest {
                player_id: players[1],
                value: 8,
            },
        )
        .await
        .unwrap();
        assert_eq!(overridden.revision, 1);

        let score = score_round(&state, "CANDY404").await.unwrap();
        assert_eq!(score.closest_winner_id, Some(players[1]));
        assert_eq!(score.exact_guessers, vec![players[1]]);
        let bob = score.deltas.iter().find(|d| d.player_id == players[1]).unwrap();
        assert_eq!(bob.delta, 5);
        let ada = score.deltas.iter().find(|d| d.player_id == players[0]).unwrap();
        assert!(!ada.submitted);
        assert_eq!(ada.delta, -7);
    }

    #[tokio::test]
    async fn oversized_amounts_are_refused_before_the_store() {
        let (state, players) = started_game().await;
        for amount in [i64::MAX, i64::MIN] {
            assert!(matches!(
                manual_adjust(
                    &state,
                    "CANDY404",
                    ManualAdjustRequest {
                        player_id: players[0],
                        amount,
                        note: None,
                    },
                )
                .await,
                Err(ServiceError::InvalidInput(_))
            ));
        }

        transition(&state, "CANDY404", GameEvent::OpenGuessing).await.unwrap();
        assert!(matches!(
            override_guess(
                &state,
                "CANDY404",
                OverrideGuessRequest {
                    player_id: players[1],
                    value: i64::MAX,
                },
            )
            .await,
            Err(ServiceError::InvalidInput(_))
        ));

        let audit = game_service::audit(&state, "CANDY404").await.unwrap();
        assert!(audit.consistent);
        assert!(audit.players.iter().all(|p| p.cached_balance == 20));
    }

    #[tokio::test]
    async fn manual_adjustment_moves_balance() {
        let (state, players) = started_game().await;
        let response = manual_adjust(
            &state,
            "CANDY404",
            ManualAdjustRequest {
                player_id: players[0],
                amount: -3,
                note: Some("Peeked".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(response.game.phase, GamePhase::Listening);

        let audit = game_service::audit(&state, "CANDY404").await.unwrap();
        assert!(audit.consistent);
        assert_eq!(audit.players[0].cached_balance, 17);
    }
}
