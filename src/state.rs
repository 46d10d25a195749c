//! Shared application state for all routes.

use crate::db::Database;
use crate::model::Registry;
use crate::settings::Settings;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        AppState { db }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.db.registry()
    }

    pub fn settings(&self) -> &Settings {
        self.db.settings()
    }

    pub fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }
}
