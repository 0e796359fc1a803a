use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    error::ServiceError,
    services::sse_events::EVENT_HANDSHAKE,
    state::SharedState,
};

/// Subscription to the events of one game.
pub struct GameSubscription {
    pub code: String,
    pub receiver: broadcast::Receiver<ServerEvent>,
    pub handshake: ServerEvent,
}

/// Subscribe to the change notifications of the game identified by `code`.
pub async fn subscribe_game(
    state: &SharedState,
    code: &str,
) -> Result<GameSubscription, ServiceError> {
    let game = state.find_game(code).await?;
    // Subscribe before building the handshake so nothing committed afterwards is missed.
    let receiver = state.sse().subscribe();
    let handshake = ServerEvent::json(
        Some(EVENT_HANDSHAKE.to_string()),
        &Handshake {
            stream: game.code.clone(),
            message: format!("subscribed to game {}", game.code),
            degraded: state.is_degraded().await,
        },
    )
    .map_err(|err| ServiceError::InvalidState(format!("failed to encode handshake: {err}")))?;

    Ok(GameSubscription {
        code: game.code,
        receiver,
        handshake,
    })
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

/// Convert a game subscription into an SSE response, forwarding matching events until the client
/// disconnects.
pub fn to_sse_stream(
    subscription: GameSubscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let GameSubscription {
        code,
        mut receiver,
        handshake,
    } = subscription;

    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if tx.send(Ok(to_event(handshake))).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) if payload.is_visible_to(&code) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => continue,
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Consumers re-read on the next event anyway.
                            debug!(%code, skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!(%code, "game SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::game_store::memory::MemoryGameStore,
        dto::game::{CreateGameRequest, NewPlayer, NewRound},
        services::{game_service, sse_events::broadcast_player_claimed},
        state::AppState,
    };

    #[tokio::test]
    async fn subscription_requires_existing_game() {
        let state = AppState::new(AppConfig::default());
        state.set_game_store(Arc::new(MemoryGameStore::new())).await;

        assert!(matches!(
            subscribe_game(&state, "MISSING1").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn subscription_receives_scoped_events() {
        let state = AppState::new(AppConfig::default());
        state.set_game_store(Arc::new(MemoryGameStore::new())).await;
        let request = CreateGameRequest {
            code: Some("HOLLY123".into()),
            gm_pin: "2468".into(),
            players: vec![
                NewPlayer { name: "Ada".into(), avatar_id: None },
                NewPlayer { name: "Bob".into(), avatar_id: None },
            ],
            rounds: vec![NewRound {
                item_name: "Lamp".into(),
                actual_price: 12,
                min_guess: None,
                max_guess: Some(50),
                hint_text: None,
                item_photo_url: None,
            }],
            ..Default::default()
        };
        game_service::create_game(&state, request).await.unwrap();

        let mut subscription = subscribe_game(&state, "holly123").await.unwrap();
        assert_eq!(subscription.code, "HOLLY123");
        assert_eq!(subscription.handshake.event.as_deref(), Some(EVENT_HANDSHAKE));

        broadcast_player_claimed(&state, "OTHER999", uuid::Uuid::new_v4());
        broadcast_player_claimed(&state, "HOLLY123", uuid::Uuid::new_v4());

        let first = subscription.receiver.recv().await.unwrap();
        assert!(!first.is_visible_to("HOLLY123"));
        let second = subscription.receiver.recv().await.unwrap();
        assert!(second.is_visible_to("HOLLY123"));
        assert_eq!(second.event.as_deref(), Some("player.claimed"));
    }
}
