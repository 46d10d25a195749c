//! Synchronous facade over [`Database`] for scripts and worker threads.
//!
//! Each facade owns a current-thread runtime and blocks on it, so it must not be
//! used from inside another tokio runtime.

use super::{Database, Record, Session, TxHandle, TxState};
use crate::error::AppError;
use crate::model::{ColumnType, Registry};
use crate::query::{Fragment, Select};
use crate::settings::Settings;
use serde_json::{Map, Value};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::runtime::Runtime;

pub struct BlockingFactory {
    // Dropped before the runtime it was opened on.
    inner: Database,
    runtime: Arc<Runtime>,
}

impl BlockingFactory {
    pub fn connect(settings: Settings, registry: Arc<Registry>) -> Result<Self, AppError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| AppError::Internal(format!("failed to start runtime: {}", e)))?;
        let inner = runtime.block_on(Database::connect(settings, registry))?;
        Ok(BlockingFactory {
            inner,
            runtime: Arc::new(runtime),
        })
    }

    pub fn session(&self) -> Result<BlockingSession, AppError> {
        let session = self.runtime.block_on(self.inner.session())?;
        Ok(BlockingSession {
            runtime: self.runtime.clone(),
            session: Some(session),
        })
    }

    /// Runs an async operation against the underlying database, e.g. migrations.
    pub fn block_on<F: std::future::Future>(&self, f: F) -> F::Output {
        self.runtime.block_on(f)
    }

    pub fn database(&self) -> &Database {
        &self.inner
    }
}

/// Blocking counterpart of [`Session`].
pub struct BlockingSession {
    runtime: Arc<Runtime>,
    session: Option<Session>,
}

impl BlockingSession {
    fn inner(&mut self) -> Result<&mut Session, AppError> {
        self.session
            .as_mut()
            .ok_or_else(|| AppError::Internal("session already closed".to_string()))
    }

    fn block<'a, T, F>(&'a mut self, f: impl FnOnce(&'a mut Session) -> F) -> Result<T, AppError>
    where
        F: std::future::Future<Output = Result<T, AppError>>,
    {
        let runtime = self.runtime.clone();
        let session = self.inner()?;
        runtime.block_on(f(session))
    }

    pub fn select(&mut self, model: &str) -> Result<Select, AppError> {
        self.inner()?.select(model)
    }

    pub fn in_transaction(&self) -> bool {
        self.session.as_ref().map(Session::in_transaction).unwrap_or(false)
    }

    pub fn execute(&mut self, statement: &Fragment) -> Result<u64, AppError> {
        self.block(|s| s.execute(statement))
    }

    pub fn fetch_raw(&mut self, statement: &Fragment, shape: &[ColumnType]) -> Result<Vec<Vec<Value>>, AppError> {
        self.block(|s| s.fetch_raw(statement, shape))
    }

    pub fn all(&mut self, query: &Select) -> Result<Vec<Record>, AppError> {
        self.block(|s| s.all(query))
    }

    pub fn first(&mut self, query: &Select) -> Result<Option<Record>, AppError> {
        self.block(|s| s.first(query))
    }

    pub fn one(&mut self, query: &Select) -> Result<Record, AppError> {
        self.block(|s| s.one(query))
    }

    pub fn one_or_none(&mut self, query: &Select) -> Result<Option<Record>, AppError> {
        self.block(|s| s.one_or_none(query))
    }

    pub fn count(&mut self, query: &Select) -> Result<u64, AppError> {
        self.block(|s| s.count(query))
    }

    pub fn get(&mut self, model: &str, id: Value) -> Result<Option<Record>, AppError> {
        self.block(|s| s.get(model, id))
    }

    pub fn create(&mut self, model: &str, data: Map<String, Value>) -> Result<Record, AppError> {
        self.block(|s| s.create(model, data))
    }

    pub fn save(&mut self, record: &mut Record, patch: Map<String, Value>) -> Result<(), AppError> {
        self.block(|s| s.save(record, patch))
    }

    pub fn delete(&mut self, record: &Record) -> Result<(), AppError> {
        self.block(|s| s.delete(record))
    }

    pub fn refresh(&mut self, record: &mut Record) -> Result<(), AppError> {
        self.block(|s| s.refresh(record))
    }

    pub fn find_or_create(&mut self, model: &str, data: Map<String, Value>, find_by: &[&str]) -> Result<Record, AppError> {
        self.block(|s| s.find_or_create(model, data, find_by))
    }

    pub fn upsert(&mut self, model: &str, data: Map<String, Value>, find_by: &[&str]) -> Result<Record, AppError> {
        self.block(|s| s.upsert(model, data, find_by))
    }

    /// Runs `f` inside a scope: committed when it returns `Ok`, rolled back on `Err`
    /// or when the scope's force-rollback flag was set. The closure's error is
    /// returned unchanged.
    pub fn transaction<T, F>(&mut self, nested: bool, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut BlockingScope<'_>) -> Result<T, AppError>,
    {
        let handle = self.block(|s| s.begin(nested))?;
        let mut scope = BlockingScope { session: self, handle };
        let result = f(&mut scope);
        let BlockingScope { session, handle } = scope;
        let ended = session.block(|s| s.end(&handle, result.is_err()));
        match (result, ended) {
            (Err(e), Err(rollback_err)) => {
                tracing::error!(error = %rollback_err, "rollback failed");
                Err(e)
            }
            (Err(e), Ok(_)) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(v), Ok(_)) => Ok(v),
        }
    }

    /// Rolls back anything still open and returns the connection.
    pub fn close(mut self) -> Result<(), AppError> {
        let runtime = self.runtime.clone();
        match self.session.take() {
            Some(session) => runtime.block_on(session.close()),
            None => Ok(()),
        }
    }
}

impl Drop for BlockingSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.runtime.block_on(session.close()) {
                tracing::warn!(error = %e, "failed to close dropped session");
            }
        }
    }
}

/// A scope opened by [`BlockingSession::transaction`].
pub struct BlockingScope<'a> {
    session: &'a mut BlockingSession,
    handle: TxHandle,
}

impl BlockingScope<'_> {
    pub fn state(&self) -> TxState {
        self.handle.state()
    }

    pub fn set_force_rollback(&mut self) {
        self.handle.set_force_rollback();
    }

    pub fn force_commit(&mut self) -> Result<(), AppError> {
        let handle = &mut self.handle;
        self.session.block(|s| s.force_commit(handle))
    }

    pub fn force_rollback(&mut self) -> Result<(), AppError> {
        let handle = &mut self.handle;
        self.session.block(|s| s.force_rollback(handle))
    }
}

impl Deref for BlockingScope<'_> {
    type Target = BlockingSession;

    fn deref(&self) -> &BlockingSession {
        self.session
    }
}

impl DerefMut for BlockingScope<'_> {
    fn deref_mut(&mut self) -> &mut BlockingSession {
        self.session
    }
}
