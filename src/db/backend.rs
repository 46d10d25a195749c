//! Statement execution against SQLite through sqlx.

use crate::error::AppError;
use crate::model::ColumnType;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Row, ValueRef};

/// One database connection owned by a session.
///
/// Statements arrive rendered with `?N` placeholders; rows come back decoded
/// according to `shape`, one entry per selected column.
#[async_trait]
pub trait Connection: Send {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, AppError>;

    async fn fetch(
        &mut self,
        sql: &str,
        params: &[Value],
        shape: &[ColumnType],
    ) -> Result<Vec<Vec<Value>>, AppError>;

    /// Drop the connection instead of returning it to the pool.
    fn discard(&mut self);
}

pub struct SqliteBackend {
    conn: PoolConnection<Sqlite>,
}

impl SqliteBackend {
    pub fn new(conn: PoolConnection<Sqlite>) -> Self {
        SqliteBackend { conn }
    }
}

#[async_trait]
impl Connection for SqliteBackend {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, AppError> {
        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch(
        &mut self,
        sql: &str,
        params: &[Value],
        shape: &[ColumnType],
    ) -> Result<Vec<Vec<Value>>, AppError> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut *self.conn)
            .await?;
        rows.iter().map(|r| decode_row(r, shape)).collect()
    }

    fn discard(&mut self) {
        self.conn.close_on_drop();
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for p in params {
        query = match p {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn decode_row(row: &SqliteRow, shape: &[ColumnType]) -> Result<Vec<Value>, AppError> {
    shape
        .iter()
        .enumerate()
        .map(|(i, ty)| cell_to_value(row, i, *ty))
        .collect()
}

fn cell_to_value(row: &SqliteRow, index: usize, ty: ColumnType) -> Result<Value, AppError> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }
    Ok(match ty {
        ColumnType::Integer => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        ColumnType::Float => serde_json::Number::from_f64(row.try_get_unchecked::<f64, _>(index)?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ColumnType::Boolean => Value::Bool(row.try_get_unchecked::<bool, _>(index)?),
        ColumnType::Json => {
            let raw = row.try_get_unchecked::<String, _>(index)?;
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        }
        ColumnType::Text | ColumnType::Date | ColumnType::DateTime | ColumnType::Uuid => {
            Value::String(row.try_get_unchecked::<String, _>(index)?)
        }
    })
}
