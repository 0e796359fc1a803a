pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use crate::dao::models::{
    BalanceEventEntity, GameEntity, GameEventLogEntity, GamePhase, GuessEntity, PlayerEntity,
    RoundEntity,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Abstraction over the persistence layer for games and their dependent rows.
///
/// Reads are typed per entity. Writes go through [`GameStore::commit`], which applies a
/// [`WriteBatch`] all-or-nothing and fails with a conflict when one of its guards does not hold.
pub trait GameStore: Send + Sync {
    fn find_game_by_code(&self, code: String)
    -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    fn list_games(&self) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>>;
    /// Players of a game ordered by `order`.
    fn list_players(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;
    /// Rounds of a game ordered by `index`.
    fn list_rounds(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>>;
    fn list_guesses(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<GuessEntity>>>;
    /// Ledger entries of a game in creation order.
    fn list_balance_events(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<BalanceEventEntity>>>;
    /// Event log of a game in creation order.
    fn list_event_log(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameEventLogEntity>>>;
    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Unit of work committed atomically by a [`GameStore`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Game the batch belongs to, used for logging and error context.
    pub game_id: Uuid,
    /// Mutations applied in order.
    pub mutations: Vec<Mutation>,
}

impl WriteBatch {
    /// Start an empty batch for `game_id`.
    pub fn new(game_id: Uuid) -> Self {
        Self {
            game_id,
            mutations: Vec::new(),
        }
    }

    /// Append a mutation.
    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    /// Append every mutation of `iter`.
    pub fn extend(&mut self, iter: impl IntoIterator<Item = Mutation>) {
        self.mutations.extend(iter);
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Typed write against one entity collection.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Create a game; conflicts when the id or the code already exists.
    InsertGame(GameEntity),
    /// Replace a game only if its stored version equals `expected_version`.
    UpdateGame {
        game: GameEntity,
        expected_version: u64,
    },
    /// Fail the batch unless the game is in `phase` at `round_index`.
    AssertGamePhase {
        game_id: Uuid,
        phase: GamePhase,
        round_index: u32,
    },
    InsertPlayer(PlayerEntity),
    /// Update the device binding of a player. Never touches balances.
    UpdatePlayerSession {
        player_id: Uuid,
        session_token: Option<String>,
        last_seen_at: SystemTime,
    },
    /// Atomically add `delta` to the cached balance.
    IncrementBalance { player_id: Uuid, delta: i64 },
    /// Atomically add to the cumulative answer time.
    AddAnswerTime { player_id: Uuid, millis: u64 },
    /// Zero the cached balance and answer time of a player.
    ResetPlayerTotals { player_id: Uuid },
    InsertRound(RoundEntity),
    UpdateRound(RoundEntity),
    /// Create a guess; conflicts when the (round, player) pair already has one.
    InsertGuess(GuessEntity),
    /// Replace a guess only if its stored revision equals `expected_revision`.
    UpdateGuess {
        guess: GuessEntity,
        expected_revision: u32,
    },
    DeleteRoundGuesses { round_id: Uuid },
    DeleteGameGuesses { game_id: Uuid },
    AppendBalanceEvent(BalanceEventEntity),
    DeleteBalanceEvent { event_id: Uuid },
    DeleteGameBalanceEvents { game_id: Uuid },
    AppendEventLog(GameEventLogEntity),
}
