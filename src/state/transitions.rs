use std::{mem, time::SystemTime};

use tracing::info;

use crate::{
    error::ServiceError,
    services::sse_events::broadcast_game_changed,
    state::{
        SharedState,
        session::{GameSession, Transition},
    },
};

/// Commit a game-level change planned by `plan`, then tell every subscriber of the game.
pub async fn run_transition_with_broadcast<F, T>(
    state: &SharedState,
    code: &str,
    mut plan: F,
) -> Result<(Transition, T), ServiceError>
where
    F: FnMut(&GameSession, SystemTime) -> Result<(Transition, T), ServiceError> + Send,
    T: Send,
{
    let (transition, extra) = state
        .run_exclusive(code, |session, now| {
            let (mut transition, extra) = plan(session, now)?;
            let batch = mem::take(&mut transition.batch);
            Ok((batch, (transition, extra)))
        })
        .await?;

    info!(
        code = %transition.game.code,
        reason = transition.reason,
        from = transition.from.as_str(),
        to = transition.game.current_phase.as_str(),
        version = transition.game.version,
        "game transition committed"
    );
    broadcast_game_changed(state, &transition.game, transition.reason);
    Ok((transition, extra))
}
