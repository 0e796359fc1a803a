use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod game;
pub mod gm;
pub mod health;
pub mod player;
pub mod sse;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(game::router())
        .merge(player::router())
        .merge(gm::router(state.clone()))
        .merge(sse::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
