use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, ClientSession, Database, IndexModel,
    bson::{DateTime, Document, doc},
    options::IndexOptions,
};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        BALANCE_EVENTS, BalanceEventDocument, EVENT_LOG, EventLogDocument, GAMES, GUESSES,
        GameDocument, GuessDocument, PLAYERS, PlayerDocument, ROUNDS, RoundDocument, doc_id,
        to_stored,
    },
};
use crate::dao::{
    game_store::{GameStore, Mutation, WriteBatch},
    models::{
        BalanceEventEntity, GameEntity, GameEventLogEntity, GuessEntity, PlayerEntity, RoundEntity,
    },
    storage::StorageResult,
};

/// MongoDB-backed [`GameStore`]. Batches run inside a multi-document transaction, which
/// requires the server to be a replica set member.
#[derive(Clone)]
pub struct MongoGameStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoGameStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;
        let indexes: [(&'static str, &'static str, Document, bool); 6] = [
            (GAMES, "game_code_idx", doc! { "code": 1 }, true),
            (PLAYERS, "player_game_idx", doc! { "game_id": 1, "order": 1 }, false),
            (ROUNDS, "round_game_idx", doc! { "game_id": 1, "index": 1 }, true),
            (
                GUESSES,
                "guess_round_player_idx",
                doc! { "round_id": 1, "player_id": 1 },
                true,
            ),
            (
                BALANCE_EVENTS,
                "balance_event_game_idx",
                doc! { "game_id": 1, "created_at": 1 },
                false,
            ),
            (
                EVENT_LOG,
                "event_log_game_idx",
                doc! { "game_id": 1, "created_at": 1 },
                false,
            ),
        ];

        for (collection, name, keys, unique) in indexes {
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(name.to_owned()))
                        .unique(Some(unique))
                        .build(),
                )
                .build();

            database
                .collection::<Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index: name,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn find_all<D, E>(
        &self,
        collection: &'static str,
        filter: Document,
        sort: Document,
    ) -> MongoResult<Vec<E>>
    where
        D: DeserializeOwned + Unpin + Send + Sync,
        E: TryFrom<D, Error = MongoDaoError>,
    {
        let documents: Vec<D> = self
            .database()
            .await
            .collection::<D>(collection)
            .find(filter)
            .sort(sort)
            .await
            .map_err(|source| MongoDaoError::Query { collection, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Query { collection, source })?;

        documents.into_iter().map(E::try_from).collect()
    }

    async fn find_game_matching(&self, filter: Document) -> MongoResult<Option<GameEntity>> {
        let document = self
            .database()
            .await
            .collection::<GameDocument>(GAMES)
            .find_one(filter)
            .await
            .map_err(|source| MongoDaoError::Query {
                collection: GAMES,
                source,
            })?;

        document.map(GameEntity::try_from).transpose()
    }

    async fn commit(&self, batch: WriteBatch) -> MongoResult<()> {
        let game_id = batch.game_id;
        let database = self.database().await;
        let mut session = self
            .client()
            .await
            .start_session()
            .await
            .map_err(|source| MongoDaoError::Transaction { game_id, source })?;
        session
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction { game_id, source })?;

        for mutation in batch.mutations {
            if let Err(err) = apply(&database, &mut session, game_id, mutation).await {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!(%game_id, error = %abort_err, "failed to abort MongoDB transaction");
                }
                return Err(err);
            }
        }

        session
            .commit_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction { game_id, source })?;
        debug!(%game_id, "MongoDB batch committed");
        Ok(())
    }
}

/// Counter bumped by phase guards on the game document.
const GUARD_SEQ: &str = "guard_seq";

fn by_game(game_id: Uuid) -> Document {
    doc! { "game_id": game_id.to_string() }
}

/// Filter on the current balance that only matches when adding `delta` cannot overflow.
fn balance_headroom(delta: i64) -> Document {
    if delta >= 0 {
        doc! { "$lte": i64::MAX - delta }
    } else {
        doc! { "$gte": i64::MIN - delta }
    }
}

async fn apply(
    database: &Database,
    session: &mut ClientSession,
    game_id: Uuid,
    mutation: Mutation,
) -> MongoResult<()> {
    let write_err = |collection: &'static str| {
        move |source: mongodb::error::Error| MongoDaoError::Write {
            collection,
            game_id,
            source,
        }
    };
    let conflict = |message: String| MongoDaoError::Conflict { game_id, message };

    let games = database.collection::<GameDocument>(GAMES);
    let players = database.collection::<PlayerDocument>(PLAYERS);
    let rounds = database.collection::<RoundDocument>(ROUNDS);
    let guesses = database.collection::<GuessDocument>(GUESSES);
    let balance_events = database.collection::<BalanceEventDocument>(BALANCE_EVENTS);
    let event_log = database.collection::<EventLogDocument>(EVENT_LOG);

    match mutation {
        Mutation::InsertGame(game) => {
            let existing = games
                .find_one(doc! { "code": game.code.as_str() })
                .session(&mut *session)
                .await
                .map_err(write_err(GAMES))?;
            if existing.is_some() {
                return Err(conflict(format!("game code `{}` already exists", game.code)));
            }
            games
                .insert_one(GameDocument::from(game))
                .session(&mut *session)
                .await
                .map_err(write_err(GAMES))?;
        }
        Mutation::UpdateGame {
            game,
            expected_version,
        } => {
            let mut filter = doc_id(game.id);
            filter.insert("version", to_stored(expected_version));
            let result = games
                .replace_one(filter, GameDocument::from(game))
                .session(&mut *session)
                .await
                .map_err(write_err(GAMES))?;
            if result.matched_count == 0 {
                return Err(conflict(format!(
                    "game is no longer at version {expected_version}"
                )));
            }
        }
        Mutation::AssertGamePhase {
            game_id: target,
            phase,
            round_index,
        } => {
            // Bumping a counter makes the check a write, so a concurrent game update in
            // another transaction raises a write conflict instead of being missed.
            let mut filter = doc_id(target);
            filter.insert("current_phase", phase.as_str());
            filter.insert("current_round_index", i64::from(round_index));
            let result = games
                .update_one(filter, doc! { "$inc": { GUARD_SEQ: 1_i64 } })
                .session(&mut *session)
                .await
                .map_err(write_err(GAMES))?;
            if result.matched_count == 0 {
                return Err(conflict(format!(
                    "game left phase {} of round {round_index}",
                    phase.as_str()
                )));
            }
        }
        Mutation::InsertPlayer(player) => {
            players
                .insert_one(PlayerDocument::from(player))
                .session(&mut *session)
                .await
                .map_err(write_err(PLAYERS))?;
        }
        Mutation::UpdatePlayerSession {
            player_id,
            session_token,
            last_seen_at,
        } => {
            let update = doc! {
                "$set": {
                    "session_token": session_token,
                    "last_seen_at": DateTime::from_system_time(last_seen_at),
                }
            };
            update_player(&players, session, player_id, update, game_id).await?;
        }
        Mutation::IncrementBalance { player_id, delta } => {
            let mut filter = doc_id(player_id);
            filter.insert("balance", balance_headroom(delta));
            let result = players
                .update_one(filter, doc! { "$inc": { "balance": delta } })
                .session(&mut *session)
                .await
                .map_err(write_err(PLAYERS))?;
            if result.matched_count == 0 {
                let exists = players
                    .count_documents(doc_id(player_id))
                    .session(&mut *session)
                    .await
                    .map_err(write_err(PLAYERS))?;
                return Err(if exists == 0 {
                    conflict(format!("player `{player_id}` does not exist"))
                } else {
                    MongoDaoError::BalanceOverflow { game_id, player_id }
                });
            }
        }
        Mutation::AddAnswerTime { player_id, millis } => {
            let millis = i64::try_from(millis).unwrap_or(i64::MAX);
            let update = doc! { "$inc": { "cumulative_answer_time_ms": millis } };
            update_player(&players, session, player_id, update, game_id).await?;
        }
        Mutation::ResetPlayerTotals { player_id } => {
            let update = doc! { "$set": { "balance": 0_i64, "cumulative_answer_time_ms": 0_i64 } };
            update_player(&players, session, player_id, update, game_id).await?;
        }
        Mutation::InsertRound(round) => {
            rounds
                .insert_one(RoundDocument::from(round))
                .session(&mut *session)
                .await
                .map_err(write_err(ROUNDS))?;
        }
        Mutation::UpdateRound(round) => {
            let id = round.id;
            let result = rounds
                .replace_one(doc_id(id), RoundDocument::from(round))
                .session(&mut *session)
                .await
                .map_err(write_err(ROUNDS))?;
            if result.matched_count == 0 {
                return Err(conflict(format!("round `{id}` does not exist")));
            }
        }
        Mutation::InsertGuess(guess) => {
            let existing = guesses
                .find_one(doc! {
                    "round_id": guess.round_id.to_string(),
                    "player_id": guess.player_id.to_string(),
                })
                .session(&mut *session)
                .await
                .map_err(write_err(GUESSES))?;
            if existing.is_some() {
                return Err(conflict(format!(
                    "player `{}` already guessed round `{}`",
                    guess.player_id, guess.round_id
                )));
            }
            guesses
                .insert_one(GuessDocument::from(guess))
                .session(&mut *session)
                .await
                .map_err(write_err(GUESSES))?;
        }
        Mutation::UpdateGuess {
            guess,
            expected_revision,
        } => {
            let mut filter = doc_id(guess.id);
            filter.insert("revision", i64::from(expected_revision));
            let result = guesses
                .replace_one(filter, GuessDocument::from(guess))
                .session(&mut *session)
                .await
                .map_err(write_err(GUESSES))?;
            if result.matched_count == 0 {
                return Err(conflict(format!(
                    "guess is no longer at revision {expected_revision}"
                )));
            }
        }
        Mutation::DeleteRoundGuesses { round_id } => {
            guesses
                .delete_many(doc! { "round_id": round_id.to_string() })
                .session(&mut *session)
                .await
                .map_err(write_err(GUESSES))?;
        }
        Mutation::DeleteGameGuesses { game_id: target } => {
            guesses
                .delete_many(by_game(target))
                .session(&mut *session)
                .await
                .map_err(write_err(GUESSES))?;
        }
        Mutation::AppendBalanceEvent(event) => {
            balance_events
                .insert_one(BalanceEventDocument::from(event))
                .session(&mut *session)
                .await
                .map_err(write_err(BALANCE_EVENTS))?;
        }
        Mutation::DeleteBalanceEvent { event_id } => {
            let result = balance_events
                .delete_one(doc_id(event_id))
                .session(&mut *session)
                .await
                .map_err(write_err(BALANCE_EVENTS))?;
            if result.deleted_count == 0 {
                return Err(conflict(format!("balance event `{event_id}` is gone")));
            }
        }
        Mutation::DeleteGameBalanceEvents { game_id: target } => {
            balance_events
                .delete_many(by_game(target))
                .session(&mut *session)
                .await
                .map_err(write_err(BALANCE_EVENTS))?;
        }
        Mutation::AppendEventLog(entry) => {
            event_log
                .insert_one(EventLogDocument::from(entry))
                .session(&mut *session)
                .await
                .map_err(write_err(EVENT_LOG))?;
        }
    }

    Ok(())
}

async fn update_player(
    players: &mongodb::Collection<PlayerDocument>,
    session: &mut ClientSession,
    player_id: Uuid,
    update: Document,
    game_id: Uuid,
) -> MongoResult<()> {
    let result = players
        .update_one(doc_id(player_id), update)
        .session(&mut *session)
        .await
        .map_err(|source| MongoDaoError::Write {
            collection: PLAYERS,
            game_id,
            source,
        })?;
    if result.matched_count == 0 {
        return Err(MongoDaoError::Conflict {
            game_id,
            message: format!("player `{player_id}` does not exist"),
        });
    }
    Ok(())
}

impl GameStore for MongoGameStore {
    fn find_game_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_game_matching(doc! { "code": code })
                .await
                .map_err(Into::into)
        })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_game_matching(doc_id(id)).await.map_err(Into::into) })
    }

    fn list_games(&self) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_all::<GameDocument, GameEntity>(GAMES, doc! {}, doc! { "created_at": 1 })
                .await
                .map_err(Into::into)
        })
    }

    fn list_players(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_all::<PlayerDocument, PlayerEntity>(
                    PLAYERS,
                    by_game(game_id),
                    doc! { "order": 1 },
                )
                .await
                .map_err(Into::into)
        })
    }

    fn list_rounds(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_all::<RoundDocument, RoundEntity>(
                    ROUNDS,
                    by_game(game_id),
                    doc! { "index": 1 },
                )
                .await
                .map_err(Into::into)
        })
    }

    fn list_guesses(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<GuessEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_all::<GuessDocument, GuessEntity>(
                    GUESSES,
                    doc! { "round_id": round_id.to_string() },
                    doc! { "submitted_at": 1 },
                )
                .await
                .map_err(Into::into)
        })
    }

    fn list_balance_events(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<BalanceEventEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_all::<BalanceEventDocument, BalanceEventEntity>(
                    BALANCE_EVENTS,
                    by_game(game_id),
                    doc! { "created_at": 1 },
                )
                .await
                .map_err(Into::into)
        })
    }

    fn list_event_log(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameEventLogEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_all::<EventLogDocument, GameEventLogEntity>(
                    EVENT_LOG,
                    by_game(game_id),
                    doc! { "created_at": 1 },
                )
                .await
                .map_err(Into::into)
        })
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.commit(batch).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
