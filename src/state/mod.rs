pub mod event_log;
pub mod guess;
pub mod ledger;
pub mod round;
pub mod scoring;
pub mod session;
mod sse;
pub mod state_machine;
pub mod transitions;

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use rand::{Rng, rng};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        game_store::{GameStore, WriteBatch},
        models::GameEntity,
        storage::StorageError,
    },
    error::ServiceError,
    state::session::GameSession,
};

pub use self::sse::SseHub;

pub type SharedState = Arc<AppState>;

/// Attempts made for one command before a storage conflict is reported.
pub const MAX_COMMIT_ATTEMPTS: u32 = 5;
/// Upper bound of the random pause before a retry, scaled by the attempt number.
const RETRY_JITTER_MS: u64 = 20;
const SSE_CAPACITY: usize = 64;

/// Central application state storing the storage handle, per-game gates and the SSE hub.
pub struct AppState {
    game_store: RwLock<Option<Arc<dyn GameStore>>>,
    sse: SseHub,
    game_gates: DashMap<Uuid, Arc<RwLock<()>>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            game_store: RwLock::new(None),
            sse: SseHub::new(SSE_CAPACITY),
            game_gates: DashMap::new(),
            degraded: degraded_tx,
            config,
        })
    }

    /// Obtain the installed store, failing while degraded.
    pub async fn require_game_store(&self) -> Result<Arc<dyn GameStore>, ServiceError> {
        if self.is_degraded().await {
            return Err(ServiceError::Degraded);
        }
        let guard = self.game_store.read().await;
        guard.as_ref().cloned().ok_or(ServiceError::Degraded)
    }

    /// Install a new game store implementation and leave degraded mode.
    pub async fn set_game_store(&self, store: Arc<dyn GameStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current game store and enter degraded mode.
    pub async fn clear_game_store(&self) {
        {
            let mut guard = self.game_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Broadcast hub shared by every game stream.
    pub fn sse(&self) -> &SseHub {
        &self.sse
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn game_gate(&self, game_id: Uuid) -> Arc<RwLock<()>> {
        self.game_gates
            .entry(game_id)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Resolve a join code into its game row.
    pub async fn find_game(&self, code: &str) -> Result<GameEntity, ServiceError> {
        let store = self.require_game_store().await?;
        store
            .find_game_by_code(code.to_uppercase())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("game {code}")))
    }

    /// Run a GM command: no other command or guess of the same game runs meanwhile.
    pub async fn run_exclusive<F, T>(&self, code: &str, plan: F) -> Result<T, ServiceError>
    where
        F: FnMut(&GameSession, SystemTime) -> Result<(WriteBatch, T), ServiceError> + Send,
        T: Send,
    {
        self.with_timeout(self.run_command(code, true, plan)).await
    }

    /// Run a player command: concurrent with other player commands, never with a GM command.
    pub async fn run_shared<F, T>(&self, code: &str, plan: F) -> Result<T, ServiceError>
    where
        F: FnMut(&GameSession, SystemTime) -> Result<(WriteBatch, T), ServiceError> + Send,
        T: Send,
    {
        self.with_timeout(self.run_command(code, false, plan)).await
    }

    async fn with_timeout<T>(
        &self,
        work: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        match timeout(self.config.transition_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout),
        }
    }

    /// Load, plan and commit, starting over from fresh data when the commit loses a race.
    async fn run_command<F, T>(
        &self,
        code: &str,
        exclusive: bool,
        mut plan: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut(&GameSession, SystemTime) -> Result<(WriteBatch, T), ServiceError> + Send,
        T: Send,
    {
        let store = self.require_game_store().await?;
        let game_id = self.find_game(code).await?.id;
        let gate = self.game_gate(game_id);
        let _guards: (Option<OwnedRwLockWriteGuard<()>>, Option<OwnedRwLockReadGuard<()>>) =
            if exclusive {
                (Some(gate.write_owned().await), None)
            } else {
                (None, Some(gate.read_owned().await))
            };

        let mut attempt = 1;
        loop {
            let game = store
                .find_game(game_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("game {code}")))?;
            let session = GameSession::load(store.as_ref(), game).await?;
            let (batch, outcome) = match plan(&session, SystemTime::now()) {
                Ok(planned) => planned,
                Err(err) => {
                    debug!(code, error = %err, "command rejected");
                    return Err(err);
                }
            };

            let mutations = batch.mutations.len();
            match store.commit(batch).await {
                Ok(()) => {
                    debug!(code, %game_id, attempt, mutations, "committed game batch");
                    return Ok(outcome);
                }
                Err(StorageError::Conflict { message }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(code, %game_id, attempt, %message, "commit conflict; retrying");
                    let pause = rng().random_range(1..=RETRY_JITTER_MS) * u64::from(attempt);
                    sleep(Duration::from_millis(pause)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::game_store::memory::MemoryGameStore;

    #[tokio::test]
    async fn starts_degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert!(state.is_degraded().await);
        assert!(matches!(
            state.require_game_store().await,
            Err(ServiceError::Degraded)
        ));

        state.set_game_store(Arc::new(MemoryGameStore::new())).await;
        assert!(!state.is_degraded().await);
        assert!(state.require_game_store().await.is_ok());

        state.update_degraded(true).await;
        assert!(matches!(
            state.require_game_store().await,
            Err(ServiceError::Degraded)
        ));
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let state = AppState::new(AppConfig::default());
        state.set_game_store(Arc::new(MemoryGameStore::new())).await;

        let result = state
            .run_exclusive("NOPE000", |_, _| Ok((WriteBatch::default(), ())))
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }
}
