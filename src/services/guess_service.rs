use tracing::info;
use uuid::Uuid;

use crate::{
    dao::game_store::WriteBatch,
    dto::{
        format_system_time,
        player::{SubmitGuessRequest, SubmitGuessResponse},
    },
    error::ServiceError,
    services::sse_events::broadcast_guess_recorded,
    state::SharedState,
};

/// Store or edit the guess of a player for the current round.
///
/// `session_token` must be the token issued when the seat was claimed.
pub async fn submit_guess(
    state: &SharedState,
    code: &str,
    session_token: &str,
    request: SubmitGuessRequest,
) -> Result<SubmitGuessResponse, ServiceError> {
    let SubmitGuessRequest { player_id, value } = request;

    let (game_code, guess, round_index) = state
        .run_shared(code, |session, now| {
            let player = session
                .player(player_id)
                .ok_or_else(|| ServiceError::NotFound(format!("player {player_id}")))?;
            ensure_token(player.session_token.as_deref(), session_token, player_id)?;
            let plan = session.submit_guess(player_id, value, now)?;
            let mut batch = WriteBatch::new(session.game.id);
            batch.extend(plan.mutations);
            Ok((
                batch,
                (
                    session.game.code.clone(),
                    plan.guess,
                    session.game.current_round_index,
                ),
            ))
        })
        .await?;

    info!(code = %game_code, %player_id, round = round_index, revision = guess.revision, "guess recorded");
    broadcast_guess_recorded(state, &game_code, round_index, player_id, guess.revision);

    Ok(SubmitGuessResponse {
        player_id,
        round_index,
        value: guess.value,
        revision: guess.revision,
        submitted_at: format_system_time(guess.submitted_at),
    })
}

fn ensure_token(
    stored: Option<&str>,
    presented: &str,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    match stored {
        Some(token) if token == presented => Ok(()),
        Some(_) => Err(ServiceError::Unauthorized(format!(
            "session token does not match player {player_id}"
        ))),
        None => Err(ServiceError::Unauthorized(format!(
            "player {player_id} has not been claimed"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::game_store::memory::MemoryGameStore,
        dto::{
            game::{CreateGameRequest, NewPlayer, NewRound},
            player::ClaimPlayerRequest,
        },
        services::{game_service, gm_service},
        state::{AppState, state_machine::GameEvent},
    };

    async fn guessing_game() -> (SharedState, Uuid, String) {
        let state = AppState::new(AppConfig::default());
        state.set_game_store(Arc::new(MemoryGameStore::new())).await;
        let created = game_service::create_game(
            &state,
            CreateGameRequest {
                code: Some("MERRY808".into()),
                gm_pin: "5555".into(),
                players: vec![
                    NewPlayer { name: "Ada".into(), avatar_id: None },
                    NewPlayer { name: "Bob".into(), avatar_id: None },
                ],
                rounds: vec![NewRound {
                    item_name: "Socks".into(),
                    actual_price: 4,
                    min_guess: Some(1),
                    max_guess: Some(10),
                    hint_text: None,
                    item_photo_url: None,
                }],
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let player_id = created.players[0].id;
        let claim = game_service::claim_player(
            &state,
            "MERRY808",
            player_id,
            ClaimPlayerRequest::default(),
        )
        .await
        .unwrap();
        gm_service::transition(&state, "MERRY808", GameEvent::StartGame)
            .await
            .unwrap();
        gm_service::transition(&state, "MERRY808", GameEvent::OpenGuessing)
            .await
            .unwrap();
        (state, player_id, claim.session_token)
    }

    #[tokio::test]
    async fn submissions_upsert_one_guess() {
        let (state, player_id, token) = guessing_game().await;

        let first = submit_guess(&state, "MERRY808", &token, SubmitGuessRequest { player_id, value: 3 })
            .await
            .unwrap();
        assert_eq!(first.revision, 1);
        let second = submit_guess(&state, "merry808", &token, SubmitGuessRequest { player_id, value: 5 })
            .await
            .unwrap();
        assert_eq!(second.revision, 2);

        let gm = game_service::gm_view(&state, "MERRY808").await.unwrap();
        assert_eq!(gm.view.current_guesses.len(), 1);
        assert_eq!(gm.view.current_guesses[0].value, Some(5));

        let public = game_service::public_view(&state, "MERRY808").await.unwrap();
        assert_eq!(public.current_guesses[0].value, None);
        assert!(public.game.time_remaining_seconds.is_some());
    }

    #[tokio::test]
    async fn wrong_token_is_unauthorized() {
        let (state, player_id, _) = guessing_game().await;
        assert!(matches!(
            submit_guess(&state, "MERRY808", "forged", SubmitGuessRequest { player_id, value: 3 }).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn out_of_bounds_is_invalid_input() {
        let (state, player_id, token) = guessing_game().await;
        assert!(matches!(
            submit_guess(&state, "MERRY808", &token, SubmitGuessRequest { player_id, value: 11 }).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }
}
