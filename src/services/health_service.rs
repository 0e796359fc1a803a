use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report `degraded` while no store is installed or the installed one fails its ping.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let store = match state.require_game_store().await {
        Ok(store) => store,
        Err(_) => {
            warn!("storage unavailable (degraded mode)");
            return HealthResponse::degraded();
        }
    };

    match store.health_check().await {
        Ok(()) => HealthResponse::ok(),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            HealthResponse::degraded()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::AppConfig, dao::game_store::memory::MemoryGameStore, state::AppState};

    #[tokio::test]
    async fn degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        state.set_game_store(Arc::new(MemoryGameStore::new())).await;
        assert_eq!(health_status(&state).await.status, "ok");

        state.clear_game_store().await;
        assert_eq!(health_status(&state).await.status, "degraded");
    }
}
