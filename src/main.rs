//! Price Guess Back binary entrypoint wiring REST, SSE and the storage backend.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use price_guess_back::{
    config::AppConfig,
    dao::game_store::memory::MemoryGameStore,
    routes,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let app_state = AppState::new(AppConfig::load());
    install_storage(app_state.clone()).await;

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Supervise MongoDB when `MONGO_URI` is set, otherwise keep games in memory.
async fn install_storage(state: SharedState) {
    match env::var("MONGO_URI") {
        Ok(uri) if !uri.is_empty() => spawn_mongo_supervisor(state, uri),
        _ => {
            warn!("MONGO_URI not set; games are kept in memory and lost on restart");
            state.set_game_store(Arc::new(MemoryGameStore::new())).await;
        }
    }
}

#[cfg(feature = "mongo-store")]
fn spawn_mongo_supervisor(state: SharedState, uri: String) {
    use price_guess_back::{
        dao::{
            game_store::{
                GameStore,
                mongodb::{MongoConfig, MongoGameStore},
            },
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    let db_name = env::var("MONGO_DB").ok();
    tokio::spawn(storage_supervisor::run(state, move || {
        let uri = uri.clone();
        let db_name = db_name.clone();
        async move {
            let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
            let store = MongoGameStore::connect(config).await?;
            Ok::<Arc<dyn GameStore>, StorageError>(Arc::new(store))
        }
    }));
}

#[cfg(not(feature = "mongo-store"))]
fn spawn_mongo_supervisor(state: SharedState, _uri: String) {
    warn!("built without the mongo-store feature; ignoring MONGO_URI");
    tokio::spawn(async move {
        state.set_game_store(Arc::new(MemoryGameStore::new())).await;
    });
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
