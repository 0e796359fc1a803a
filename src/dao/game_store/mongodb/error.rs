use mongodb::error::{Error as MongoError, TRANSIENT_TRANSACTION_ERROR};
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to query collection `{collection}`")]
    Query {
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to write collection `{collection}` for game `{game_id}`")]
    Write {
        collection: &'static str,
        game_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("transaction failed for game `{game_id}`")]
    Transaction {
        game_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("conflicting write for game `{game_id}`: {message}")]
    Conflict { game_id: Uuid, message: String },
    #[error("balance of player `{player_id}` in game `{game_id}` would overflow")]
    BalanceOverflow { game_id: Uuid, player_id: Uuid },
    #[error("corrupt document `{id}` in collection `{collection}`: {message}")]
    CorruptDocument {
        collection: &'static str,
        id: String,
        message: String,
    },
}

impl MongoDaoError {
    /// Whether the failure is a lost race the caller may retry after reloading.
    pub fn is_conflict(&self) -> bool {
        match self {
            MongoDaoError::Conflict { .. } => true,
            MongoDaoError::Write { source, .. } | MongoDaoError::Transaction { source, .. } => {
                source.contains_label(TRANSIENT_TRANSACTION_ERROR)
            }
            _ => false,
        }
    }
}
