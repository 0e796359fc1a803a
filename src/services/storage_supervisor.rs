use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{game_store::GameStore, storage::StorageError},
    services::sse_events::broadcast_system_status,
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a storage backend installed in the shared state.
///
/// While the backend is unreachable every command fails with a degraded error and
/// subscribers receive a `system.status` event on each change of mode.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn GameStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.set_game_store(store.clone()).await;
                broadcast_system_status(&state, false);
                info!("storage connection established; accepting commands");
                delay = INITIAL_DELAY;

                watch_store(&state, store.as_ref()).await;
                warn!("lost storage backend; connecting from scratch");
                state.clear_game_store().await;
                broadcast_system_status(&state, true);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
            }
        }
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Poll the backend until it stays unreachable after [`MAX_RECONNECT_ATTEMPTS`].
async fn watch_store(state: &SharedState, store: &dyn GameStore) {
    loop {
        if store.health_check().await.is_ok() {
            set_degraded(state, false).await;
            sleep(HEALTH_POLL_INTERVAL).await;
            continue;
        }

        let mut backoff = INITIAL_DELAY;
        let mut recovered = false;
        for attempt in 0..MAX_RECONNECT_ATTEMPTS {
            match store.try_reconnect().await {
                Ok(()) => {
                    info!(attempt, "storage reconnected after failed health check");
                    recovered = true;
                    break;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "storage reconnect attempt failed");
                    set_degraded(state, true).await;
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_DELAY);
                }
            }
        }

        if !recovered {
            return;
        }
        set_degraded(state, false).await;
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

async fn set_degraded(state: &SharedState, degraded: bool) {
    if state.is_degraded().await == degraded {
        return;
    }
    state.update_degraded(degraded).await;
    broadcast_system_status(state, degraded);
    if degraded {
        warn!("entering degraded mode; commands are rejected");
    } else {
        info!("leaving degraded mode");
    }
}
