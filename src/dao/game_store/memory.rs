//! In-process [`GameStore`] used when no database is configured and by the test-suite.

use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{GameStore, Mutation, WriteBatch};
use crate::dao::{
    models::{
        BalanceEventEntity, GameEntity, GameEventLogEntity, GuessEntity, PlayerEntity, RoundEntity,
    },
    storage::{StorageError, StorageResult},
};

#[derive(Clone, Default)]
pub struct MemoryGameStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Clone, Default)]
struct MemoryState {
    games: HashMap<Uuid, GameEntity>,
    players: HashMap<Uuid, PlayerEntity>,
    rounds: HashMap<Uuid, RoundEntity>,
    guesses: HashMap<Uuid, GuessEntity>,
    balance_events: Vec<BalanceEventEntity>,
    event_log: Vec<GameEventLogEntity>,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        let guard = self.inner.lock().await;
        f(&guard)
    }

    /// Apply every mutation to a scratch copy and swap it in only when all of them succeed.
    async fn commit_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut guard = self.inner.lock().await;
        let mut scratch = guard.clone();
        for mutation in batch.mutations {
            scratch.apply(mutation)?;
        }
        *guard = scratch;
        debug!(game_id = %batch.game_id, "memory batch committed");
        Ok(())
    }
}

impl MemoryState {
    fn apply(&mut self, mutation: Mutation) -> StorageResult<()> {
        match mutation {
            Mutation::InsertGame(game) => {
                if self.games.contains_key(&game.id)
                    || self.games.values().any(|existing| existing.code == game.code)
                {
                    return Err(StorageError::conflict(format!(
                        "game code `{}` already exists",
                        game.code
                    )));
                }
                self.games.insert(game.id, game);
            }
            Mutation::UpdateGame {
                game,
                expected_version,
            } => {
                let stored = self.game(game.id)?;
                if stored.version != expected_version {
                    return Err(StorageError::conflict(format!(
                        "game `{}` is at version {}, expected {expected_version}",
                        game.id, stored.version
                    )));
                }
                self.games.insert(game.id, game);
            }
            Mutation::AssertGamePhase {
                game_id,
                phase,
                round_index,
            } => {
                let stored = self.game(game_id)?;
                if stored.current_phase != phase || stored.current_round_index != round_index {
                    return Err(StorageError::conflict(format!(
                        "game `{game_id}` left phase {} of round {round_index}",
                        phase.as_str()
                    )));
                }
            }
            Mutation::InsertPlayer(player) => {
                if self.players.contains_key(&player.id) {
                    return Err(StorageError::conflict(format!(
                        "player `{}` already exists",
                        player.id
                    )));
                }
                self.players.insert(player.id, player);
            }
            Mutation::UpdatePlayerSession {
                player_id,
                session_token,
                last_seen_at,
            } => {
                let player = self.player_mut(player_id)?;
                player.session_token = session_token;
                player.last_seen_at = Some(last_seen_at);
            }
            Mutation::IncrementBalance { player_id, delta } => {
                let player = self.player_mut(player_id)?;
                player.balance = player.balance.checked_add(delta).ok_or_else(|| {
                    StorageError::rejected(format!(
                        "balance of player `{player_id}` would overflow"
                    ))
                })?;
            }
            Mutation::AddAnswerTime { player_id, millis } => {
                let player = self.player_mut(player_id)?;
                player.cumulative_answer_time_ms =
                    player.cumulative_answer_time_ms.saturating_add(millis);
            }
            Mutation::ResetPlayerTotals { player_id } => {
                let player = self.player_mut(player_id)?;
                player.balance = 0;
                player.cumulative_answer_time_ms = 0;
            }
            Mutation::InsertRound(round) => {
                if self.rounds.contains_key(&round.id) {
                    return Err(StorageError::conflict(format!(
                        "round `{}` already exists",
                        round.id
                    )));
                }
                self.rounds.insert(round.id, round);
            }
            Mutation::UpdateRound(round) => {
                if !self.rounds.contains_key(&round.id) {
                    return Err(StorageError::conflict(format!(
                        "round `{}` does not exist",
                        round.id
                    )));
                }
                self.rounds.insert(round.id, round);
            }
            Mutation::InsertGuess(guess) => {
                if self.guesses.values().any(|existing| {
                    existing.round_id == guess.round_id && existing.player_id == guess.player_id
                }) {
                    return Err(StorageError::conflict(format!(
                        "player `{}` already guessed round `{}`",
                        guess.player_id, guess.round_id
                    )));
                }
                self.guesses.insert(guess.id, guess);
            }
            Mutation::UpdateGuess {
                guess,
                expected_revision,
            } => {
                let stored = self.guesses.get(&guess.id).ok_or_else(|| {
                    StorageError::conflict(format!("guess `{}` does not exist", guess.id))
                })?;
                if stored.revision != expected_revision {
                    return Err(StorageError::conflict(format!(
                        "guess `{}` is at revision {}, expected {expected_revision}",
                        guess.id, stored.revision
                    )));
                }
                self.guesses.insert(guess.id, guess);
            }
            Mutation::DeleteRoundGuesses { round_id } => {
                self.guesses.retain(|_, guess| guess.round_id != round_id);
            }
            Mutation::DeleteGameGuesses { game_id } => {
                self.guesses.retain(|_, guess| guess.game_id != game_id);
            }
            Mutation::AppendBalanceEvent(event) => self.balance_events.push(event),
            Mutation::DeleteBalanceEvent { event_id } => {
                let position = self
                    .balance_events
                    .iter()
                    .position(|event| event.id == event_id)
                    .ok_or_else(|| {
                        StorageError::conflict(format!("balance event `{event_id}` is gone"))
                    })?;
                self.balance_events.remove(position);
            }
            Mutation::DeleteGameBalanceEvents { game_id } => {
                self.balance_events.retain(|event| event.game_id != game_id);
            }
            Mutation::AppendEventLog(entry) => self.event_log.push(entry),
        }
        Ok(())
    }

    fn game(&self, id: Uuid) -> StorageResult<&GameEntity> {
        self.games
            .get(&id)
            .ok_or_else(|| StorageError::conflict(format!("game `{id}` does not exist")))
    }

    fn player_mut(&mut self, id: Uuid) -> StorageResult<&mut PlayerEntity> {
        self.players
            .get_mut(&id)
            .ok_or_else(|| StorageError::conflict(format!("player `{id}` does not exist")))
    }
}

impl GameStore for MemoryGameStore {
    fn find_game_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .read(|state| state.games.values().find(|game| game.code == code).cloned())
                .await)
        })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.read(|state| state.games.get(&id).cloned()).await) })
    }

    fn list_games(&self) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut games = store
                .read(|state| state.games.values().cloned().collect::<Vec<_>>())
                .await;
            games.sort_by_key(|game| game.created_at);
            Ok(games)
        })
    }

    fn list_players(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut players = store
                .read(|state| {
                    state
                        .players
                        .values()
                        .filter(|player| player.game_id == game_id)
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .await;
            players.sort_by_key(|player| player.order);
            Ok(players)
        })
    }

    fn list_rounds(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut rounds = store
                .read(|state| {
                    state
                        .rounds
                        .values()
                        .filter(|round| round.game_id == game_id)
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .await;
            rounds.sort_by_key(|round| round.index);
            Ok(rounds)
        })
    }

    fn list_guesses(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<GuessEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut guesses = store
                .read(|state| {
                    state
                        .guesses
                        .values()
                        .filter(|guess| guess.round_id == round_id)
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .await;
            guesses.sort_by_key(|guess| guess.submitted_at);
            Ok(guesses)
        })
    }

    fn list_balance_events(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<BalanceEventEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .read(|state| {
                    state
                        .balance_events
                        .iter()
                        .filter(|event| event.game_id == game_id)
                        .cloned()
                        .collect()
                })
                .await)
        })
    }

    fn list_event_log(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameEventLogEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .read(|state| {
                    state
                        .event_log
                        .iter()
                        .filter(|entry| entry.game_id == game_id)
                        .cloned()
                        .collect()
                })
                .await)
        })
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.commit_batch(batch).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::models::{GamePhase, GameStatus};

    fn game(code: &str) -> GameEntity {
        let now = SystemTime::now();
        GameEntity {
            id: Uuid::new_v4(),
            code: code.into(),
            gm_pin: "1234".into(),
            status: GameStatus::Lobby,
            current_phase: GamePhase::Lobby,
            current_round_index: 0,
            total_rounds: 1,
            exact_bonus_amount: 5,
            default_missing_guess_value: 1,
            guessing_duration_seconds: 10,
            guessing_start_time: None,
            is_paused: false,
            break_after_rounds: vec![],
            starting_deposit: 20,
            version: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
        }
    }

    fn player(game_id: Uuid, order: u32) -> PlayerEntity {
        PlayerEntity {
            id: Uuid::new_v4(),
            game_id,
            name: format!("P{order}"),
            avatar_id: None,
            order,
            balance: 0,
            cumulative_answer_time_ms: 0,
            session_token: None,
            last_seen_at: None,
        }
    }

    #[tokio::test]
    async fn failed_batch_leaves_state_untouched() {
        let store = MemoryGameStore::new();
        let game = game("STAR100");
        let player = player(game.id, 0);
        let mut batch = WriteBatch::new(game.id);
        batch.push(Mutation::InsertGame(game.clone()));
        batch.push(Mutation::InsertPlayer(player.clone()));
        store.commit(batch).await.unwrap();

        let mut stale = game.clone();
        stale.version = 1;
        let mut batch = WriteBatch::new(game.id);
        batch.push(Mutation::IncrementBalance {
            player_id: player.id,
            delta: 20,
        });
        batch.push(Mutation::UpdateGame {
            game: stale,
            expected_version: 7,
        });

        match store.commit(batch).await {
            Err(StorageError::Conflict { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }

        let players = store.list_players(game.id).await.unwrap();
        assert_eq!(players[0].balance, 0);
        let stored = store.find_game(game.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn balance_overflow_is_rejected_without_partial_writes() {
        let store = MemoryGameStore::new();
        let game = game("STAR300");
        let player = player(game.id, 0);
        let mut batch = WriteBatch::new(game.id);
        batch.push(Mutation::InsertGame(game.clone()));
        batch.push(Mutation::InsertPlayer(player.clone()));
        batch.push(Mutation::IncrementBalance {
            player_id: player.id,
            delta: i64::MAX,
        });
        store.commit(batch).await.unwrap();

        let mut batch = WriteBatch::new(game.id);
        batch.push(Mutation::AddAnswerTime {
            player_id: player.id,
            millis: 500,
        });
        batch.push(Mutation::IncrementBalance {
            player_id: player.id,
            delta: 1,
        });
        assert!(matches!(
            store.commit(batch).await,
            Err(StorageError::Rejected { .. })
        ));

        let players = store.list_players(game.id).await.unwrap();
        assert_eq!(players[0].balance, i64::MAX);
        assert_eq!(players[0].cumulative_answer_time_ms, 0);
    }

    #[tokio::test]
    async fn phase_guard_conflicts_once_the_game_moves_on() {
        let store = MemoryGameStore::new();
        let mut game = game("STAR400");
        game.current_phase = GamePhase::Guessing;
        game.current_round_index = 1;
        let mut batch = WriteBatch::new(game.id);
        batch.push(Mutation::InsertGame(game.clone()));
        store.commit(batch).await.unwrap();

        let guard = || Mutation::AssertGamePhase {
            game_id: game.id,
            phase: GamePhase::Guessing,
            round_index: 1,
        };
        let mut batch = WriteBatch::new(game.id);
        batch.push(guard());
        store.commit(batch).await.unwrap();

        let mut closed = game.clone();
        closed.current_phase = GamePhase::Closed;
        closed.version = 1;
        let mut batch = WriteBatch::new(game.id);
        batch.push(Mutation::UpdateGame {
            game: closed,
            expected_version: 0,
        });
        store.commit(batch).await.unwrap();

        let mut batch = WriteBatch::new(game.id);
        batch.push(guard());
        assert!(matches!(
            store.commit(batch).await,
            Err(StorageError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_code_is_a_conflict() {
        let store = MemoryGameStore::new();
        let first = game("BELL200");
        let mut batch = WriteBatch::new(first.id);
        batch.push(Mutation::InsertGame(first));
        store.commit(batch).await.unwrap();

        let second = game("BELL200");
        let mut batch = WriteBatch::new(second.id);
        batch.push(Mutation::InsertGame(second));
        assert!(matches!(
            store.commit(batch).await,
            Err(StorageError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn second_insert_for_same_round_and_player_conflicts() {
        let store = MemoryGameStore::new();
        let round_id = Uuid::new_v4();
        let player_id = Uuid::new_v4();
        let guess = |value| GuessEntity {
            id: Uuid::new_v4(),
            game_id: Uuid::nil(),
            round_id,
            player_id,
            value,
            submitted_at: SystemTime::now(),
            revision: 1,
            is_override: false,
        };

        let mut batch = WriteBatch::new(Uuid::nil());
        batch.push(Mutation::InsertGuess(guess(3)));
        store.commit(batch).await.unwrap();

        let mut batch = WriteBatch::new(Uuid::nil());
        batch.push(Mutation::InsertGuess(guess(4)));
        assert!(store.commit(batch).await.is_err());

        let guesses = store.list_guesses(round_id).await.unwrap();
        assert_eq!(guesses.len(), 1);
        assert_eq!(guesses[0].value, 3);
    }

    #[tokio::test]
    async fn players_are_listed_in_order() {
        let store = MemoryGameStore::new();
        let game = game("TREE300");
        let mut batch = WriteBatch::new(game.id);
        batch.push(Mutation::InsertPlayer(player(game.id, 2)));
        batch.push(Mutation::InsertPlayer(player(game.id, 0)));
        batch.push(Mutation::InsertPlayer(player(game.id, 1)));
        batch.push(Mutation::InsertGame(game.clone()));
        store.commit(batch).await.unwrap();

        let orders: Vec<u32> = store
            .list_players(game.id)
            .await
            .unwrap()
            .iter()
            .map(|player| player.order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }
}
