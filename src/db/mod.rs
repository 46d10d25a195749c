//! Sessions, eager loading, persistence helpers and transactions.

mod backend;
pub mod blocking;
mod crud;
mod loader;
mod record;
mod session;
mod transaction;

pub use backend::{Connection, SqliteBackend};
pub use record::{Record, Relation};
pub use session::Session;
pub use transaction::{Transaction, TxHandle, TxState};

use crate::error::AppError;
use crate::model::Registry;
use crate::settings::Settings;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Connection pool plus the metadata every session needs.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    registry: Arc<Registry>,
    settings: Arc<Settings>,
}

impl Database {
    /// Opens the pool for `settings.database_url`, creating the file when missing.
    pub async fn connect(settings: Settings, registry: Arc<Registry>) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(&settings.database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .connect_with(options)
            .await?;
        tracing::info!(url = %settings.database_url, "database pool ready");
        Ok(Database::from_pool(pool, registry, settings))
    }

    pub fn from_pool(pool: SqlitePool, registry: Arc<Registry>, settings: Settings) -> Self {
        Database {
            pool,
            registry,
            settings: Arc::new(settings),
        }
    }

    /// A fresh session on its own pooled connection.
    pub async fn session(&self) -> Result<Session, AppError> {
        let conn = self.pool.acquire().await?;
        Ok(Session::new(
            Box::new(SqliteBackend::new(conn)),
            self.registry.clone(),
            self.settings.clone(),
        ))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }
}
