//! SQLite pool setup. Holds the directory's room records and the room logs.

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connects and applies migrations. `":memory:"` gives a private in-memory database.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let pool = if url == ":memory:" {
            // each parse of `sqlite::memory:` names a fresh shared-cache database
            let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

            // the database lives only as long as its last connection
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(16)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .connect(url)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(url = %url, "database ready");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
