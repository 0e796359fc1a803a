/// `GameStore` trait, write batches and the memory and MongoDB backends.
pub mod game_store;
/// Persisted entities: games, players, rounds, guesses, ledger and event log.
pub mod models;
/// Backend-independent storage errors.
pub mod storage;
