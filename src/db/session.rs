use super::backend::Connection;
use super::record::Record;
use super::transaction::Frame;
use super::{BoxFuture, TxHandle};
use crate::error::AppError;
use crate::model::{ColumnType, Registry};
use crate::query::{Fragment, QueryBuf, Select};
use crate::settings::Settings;
use serde_json::Value;
use std::sync::Arc;

/// One connection and its transaction stack.
///
/// Statements run strictly one after another: a session has one logical writer
/// and must not be shared between concurrent tasks. Sessions are cheap; open one
/// per request or job.
pub struct Session {
    conn: Box<dyn Connection>,
    registry: Arc<Registry>,
    settings: Arc<Settings>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) next_frame: u64,
    /// Scopes dropped without finishing; rolled back before the next statement.
    pub(crate) pending: Vec<TxHandle>,
}

impl Session {
    pub fn new(conn: Box<dyn Connection>, registry: Arc<Registry>, settings: Arc<Settings>) -> Self {
        Session {
            conn,
            registry,
            settings,
            frames: Vec::new(),
            next_frame: 1,
            pending: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn select(&self, model: &str) -> Result<Select, AppError> {
        Ok(Select::new(&self.registry, model)?)
    }

    /// Transaction control and other statements that must not flush pending scopes.
    pub(crate) async fn raw_execute(&mut self, sql: &str) -> Result<(), AppError> {
        tracing::debug!(sql = %sql, "transaction");
        self.conn.execute(sql, &[]).await?;
        Ok(())
    }

    pub(crate) async fn run(&mut self, q: &QueryBuf) -> Result<u64, AppError> {
        self.flush_pending().await?;
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        self.conn.execute(&q.sql, &q.params).await
    }

    pub(crate) async fn run_fetch(&mut self, q: &QueryBuf, shape: &[ColumnType]) -> Result<Vec<Vec<Value>>, AppError> {
        self.flush_pending().await?;
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        self.conn.fetch(&q.sql, &q.params, shape).await
    }

    /// Executes a raw statement built from a fragment.
    pub async fn execute(&mut self, statement: &Fragment) -> Result<u64, AppError> {
        let mut q = QueryBuf::new();
        q.push(statement);
        self.run(&q).await
    }

    /// Runs a raw query and decodes its rows by `shape`.
    pub async fn fetch_raw(&mut self, statement: &Fragment, shape: &[ColumnType]) -> Result<Vec<Vec<Value>>, AppError> {
        let mut q = QueryBuf::new();
        q.push(statement);
        self.run_fetch(&q, shape).await
    }

    pub async fn all(&mut self, query: &Select) -> Result<Vec<Record>, AppError> {
        let rows = self.fetch_owned(query.clone()).await?;
        Ok(rows.into_iter().map(|(_, r)| r).collect())
    }

    pub async fn first(&mut self, query: &Select) -> Result<Option<Record>, AppError> {
        let q = query.clone().limit(1);
        Ok(self.all(&q).await?.into_iter().next())
    }

    /// At most one row; more than one is a conflict.
    pub async fn one_or_none(&mut self, query: &Select) -> Result<Option<Record>, AppError> {
        let q = query.clone().limit(2);
        let mut rows = self.all(&q).await?;
        if rows.len() > 1 {
            return Err(AppError::Conflict(format!("multiple {} rows found", query.model().name)));
        }
        Ok(rows.pop())
    }

    pub async fn one(&mut self, query: &Select) -> Result<Record, AppError> {
        self.one_or_none(query)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} not found", query.model().name)))
    }

    pub async fn count(&mut self, query: &Select) -> Result<u64, AppError> {
        let q = query.render_count();
        let rows = self.run_fetch(&q, &[ColumnType::Integer]).await?;
        Ok(rows
            .first()
            .and_then(|r| r.first())
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    /// Primary-key lookup.
    pub async fn get(&mut self, model: &str, id: Value) -> Result<Option<Record>, AppError> {
        let q = self.select(model)?.find_id(id, &[] as &[&str])?;
        self.first(&q).await
    }

    /// Renders, fetches, hydrates and eager-loads. Each row carries the owner key
    /// selected by batch loading, if any.
    pub(crate) fn fetch_owned(&mut self, query: Select) -> BoxFuture<'_, Result<Vec<(Option<Value>, Record)>, AppError>> {
        Box::pin(async move {
            let (buf, layout) = query.render()?;
            let rows = self.run_fetch(&buf, &layout.shape()).await?;
            let mut owners = Vec::with_capacity(rows.len());
            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                let mut cells = row.into_iter();
                let owner = if layout.owner.is_some() { cells.next() } else { None };
                if let Some(record) = Record::hydrate(&layout.root, &mut cells) {
                    owners.push(owner);
                    records.push(record);
                }
            }
            let records = self
                .load_relations(query.model().clone(), records, query.plan())
                .await?;
            Ok(owners.into_iter().zip(records).collect())
        })
    }

    /// Rolls back whatever is still open and returns the connection to the pool.
    pub async fn close(mut self) -> Result<(), AppError> {
        self.flush_pending().await?;
        if !self.frames.is_empty() {
            tracing::debug!(depth = self.frames.len(), "closing session with open transaction, rolling back");
            self.raw_execute("ROLLBACK").await?;
            self.frames.clear();
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.frames.is_empty() || !self.pending.is_empty() {
            tracing::warn!("session dropped inside a transaction, discarding connection");
            self.conn.discard();
        }
    }
}
