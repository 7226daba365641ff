pub mod appresult;
pub mod client;
pub mod clock;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod rooms;

pub use appresult::{AppError, AppResult};

use axum::{extract::FromRef, Router};
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use db::Database;
use directory::Directory;
use rooms::SessionRegistry;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub directory: Directory,
    pub sessions: SessionRegistry,
}

impl AppState {
    /// Wires the directory to the session registry: newly created rooms get
    /// their session started ahead of the first connection.
    pub fn new(db: Database, config: &Config) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let directory = Directory::new(db.clone()).with_provisioner(tx);
        let sessions = SessionRegistry::new(db, directory.clone(), config.session.clone());
        sessions.spawn_provisioner(rx);

        Self {
            directory,
            sessions,
        }
    }
}

pub fn app(state: AppState, config: &Config) -> Router {
    let origin = match &config.cors_allow_origin {
        Some(origin) => AllowOrigin::exact(origin.clone()),
        None => AllowOrigin::any(),
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/rooms", directory::router())
        .nest("/r", rooms::router())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
