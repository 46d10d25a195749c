//! Persistence helpers: create, save, delete, find-or-create, upsert.

use super::{Record, Session};
use crate::error::{AppError, ConfigError};
use crate::model::{Attr, ColumnDefault, Link, Model, Relationship};
use crate::query::{qualified, quoted, Expr, QueryBuf};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Incoming data split by what each key resolves to.
struct Changes {
    columns: Vec<(String, Value)>,
    relations: Vec<(String, Relationship, Vec<Value>)>,
}

impl Session {
    fn split_changes(&self, model: &Model, data: Map<String, Value>) -> Changes {
        let mut changes = Changes {
            columns: Vec::new(),
            relations: Vec::new(),
        };
        for (key, value) in data {
            match self.registry().resolve(&model.name, &key) {
                Some(Attr::Column(c)) => changes.columns.push((c.name.clone(), value)),
                Some(Attr::Relationship { relationship, .. }) => match value {
                    Value::Array(ids) if ids.iter().all(|v| v.is_number() || v.is_string()) => {
                        changes.relations.push((key.clone(), relationship.clone(), ids));
                    }
                    _ => tracing::debug!(model = %model.name, key = %key, "relationship value is not an id list, ignored"),
                },
                _ => tracing::debug!(model = %model.name, key = %key, "unknown attribute, ignored"),
            }
        }
        changes
    }

    /// Inserts a row and returns it re-read from the database.
    ///
    /// Relationship keys given as id lists link the existing related rows; every
    /// id must exist or the call fails with `400 Invalid <key> value`.
    pub async fn create(&mut self, model: &str, data: Map<String, Value>) -> Result<Record, AppError> {
        let model = self.registry().model(model)?.clone();
        let pk = model.single_pk()?.clone();
        let changes = self.split_changes(&model, data);
        let related = self.resolve_related(&changes.relations).await?;

        let mut columns = changes.columns;
        for c in &model.columns {
            if columns.iter().any(|(name, _)| name == &c.name) {
                continue;
            }
            match &c.default {
                Some(ColumnDefault::Value(v)) => columns.push((c.name.clone(), v.clone())),
                Some(ColumnDefault::NewUuid) => {
                    columns.push((c.name.clone(), Value::String(uuid::Uuid::new_v4().to_string())))
                }
                _ => {}
            }
        }
        if let Some(inh) = &model.inherits {
            let base = self.registry().model(&inh.base)?.clone();
            if let Some(poly) = &base.polymorphic {
                if columns.iter().all(|(name, _)| name != &poly.discriminator) {
                    columns.push((poly.discriminator.clone(), Value::String(inh.identity.clone())));
                }
            }
        }

        let mut q = QueryBuf::new();
        q.push_str(&format!("INSERT INTO {}", quoted(&model.table)));
        if columns.is_empty() {
            q.push_str(" DEFAULT VALUES");
        } else {
            let names: Vec<String> = columns.iter().map(|(n, _)| quoted(n)).collect();
            let marks: Vec<String> = columns
                .into_iter()
                .map(|(_, v)| format!("?{}", q.push_param(v)))
                .collect();
            q.push_str(&format!(" ({}) VALUES ({})", names.join(", "), marks.join(", ")));
        }
        q.push_str(&format!(" RETURNING {}", quoted(&pk.name)));
        let id = self
            .run_fetch(&q, &[pk.ty])
            .await?
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;

        for (rel, ids) in related {
            self.link_related(&model, &id, &rel, &ids).await?;
        }
        self.get(&model.name, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} not found", model.name)))
    }

    /// Applies `patch` to the record's row, touching `updated_at`, then reloads its values.
    pub async fn save(&mut self, record: &mut Record, patch: Map<String, Value>) -> Result<(), AppError> {
        let model = self.registry().model(&record.model)?.clone();
        let pk = model.single_pk()?.name.clone();
        let id = record.get(&pk).cloned().unwrap_or(Value::Null);
        let changes = self.split_changes(&model, patch);
        let related = self.resolve_related(&changes.relations).await?;

        let columns: Vec<(String, Value)> = changes.columns.into_iter().filter(|(n, _)| n != &pk).collect();
        if !columns.is_empty() {
            let mut q = QueryBuf::new();
            let mut sets: Vec<String> = columns
                .into_iter()
                .map(|(name, v)| format!("{} = ?{}", quoted(&name), q.push_param(v)))
                .collect();
            if model.timestamps {
                sets.push(format!("{} = CURRENT_TIMESTAMP", quoted("updated_at")));
            }
            let id_param = q.push_param(id.clone());
            q.sql = format!(
                "UPDATE {} SET {} WHERE {} = ?{}",
                quoted(&model.table),
                sets.join(", "),
                quoted(&pk),
                id_param
            );
            self.run(&q).await?;
        }
        for (rel, ids) in &related {
            self.link_related(&model, &id, rel, ids).await?;
            record.relations.remove(&rel.name);
        }
        let fresh = self
            .get(&model.name, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} not found", model.name)))?;
        record.values = fresh.values;
        Ok(())
    }

    /// Deletes the row and its association-table links.
    pub async fn delete(&mut self, record: &Record) -> Result<(), AppError> {
        let model = self.registry().model(&record.model)?.clone();
        let pk = model.single_pk()?.name.clone();
        let id = record.get(&pk).cloned().unwrap_or(Value::Null);
        for rel in &model.relationships {
            if let Link::Secondary { table, local, .. } = &rel.link {
                let mut q = QueryBuf::new();
                q.push_str(&format!("DELETE FROM {} WHERE ", quoted(table)));
                q.push(&Expr::column(table, local).eq(id.clone()));
                self.run(&q).await?;
            }
        }
        let mut q = QueryBuf::new();
        q.push_str(&format!("DELETE FROM {} WHERE ", quoted(&model.table)));
        q.push(&Expr::column(&model.table, &pk).eq(id));
        self.run(&q).await?;
        Ok(())
    }

    /// Reloads column values; loaded relations are dropped.
    pub async fn refresh(&mut self, record: &mut Record) -> Result<(), AppError> {
        let model = self.registry().model(&record.model)?.clone();
        let pk = model.single_pk()?.name.clone();
        let id = record.get(&pk).cloned().unwrap_or(Value::Null);
        let fresh = self
            .get(&model.name, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} not found", model.name)))?;
        record.values = fresh.values;
        record.relations.clear();
        Ok(())
    }

    /// Returns the row matching `data` on the `find_by` columns, creating it if absent.
    pub async fn find_or_create(
        &mut self,
        model: &str,
        data: Map<String, Value>,
        find_by: &[&str],
    ) -> Result<Record, AppError> {
        if let Some(found) = self.find_by_columns(model, &data, find_by).await? {
            return Ok(found);
        }
        self.create(model, data).await
    }

    /// Updates the row matching `find_by` (or the primary key when empty), else creates it.
    pub async fn upsert(&mut self, model: &str, data: Map<String, Value>, find_by: &[&str]) -> Result<Record, AppError> {
        let m = self.registry().model(model)?.clone();
        let keys: Vec<String> = if find_by.is_empty() {
            m.primary_keys().iter().map(|c| c.name.clone()).collect()
        } else {
            find_by.iter().map(|k| k.to_string()).collect()
        };
        if keys.is_empty() || keys.iter().any(|k| !data.contains_key(k)) {
            return Err(ConfigError::UpsertKey(m.name.clone()).into());
        }
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        match self.find_by_columns(model, &data, &key_refs).await? {
            Some(mut found) => {
                let patch: Map<String, Value> = data.into_iter().filter(|(k, _)| !keys.contains(k)).collect();
                self.save(&mut found, patch).await?;
                Ok(found)
            }
            None => self.create(model, data).await,
        }
    }

    async fn find_by_columns(
        &mut self,
        model: &str,
        data: &Map<String, Value>,
        find_by: &[&str],
    ) -> Result<Option<Record>, AppError> {
        let mut q = self.select(model)?;
        for key in find_by {
            let column = self
                .registry()
                .resolve_column(model, key)
                .ok_or_else(|| ConfigError::UnknownColumn {
                    table: q.table().to_string(),
                    column: key.to_string(),
                })?
                .name
                .clone();
            let value = data.get(*key).cloned().unwrap_or(Value::Null);
            let condition = q.col(&column).eq(value);
            q = q.filter(condition);
        }
        self.one_or_none(&q).await
    }

    /// Checks that every id exists on the target model.
    async fn resolve_related(
        &mut self,
        relations: &[(String, Relationship, Vec<Value>)],
    ) -> Result<Vec<(Relationship, Vec<Value>)>, AppError> {
        let mut out = Vec::with_capacity(relations.len());
        for (key, rel, ids) in relations {
            if !ids.is_empty() {
                let target: Arc<Model> = self.registry().model(&rel.target)?.clone();
                let target_pk = target.single_pk()?.name.clone();
                let q = self.select(&target.name)?;
                let condition = q.col(&target_pk).in_list(ids.clone());
                let found = self.count(&q.filter(condition)).await?;
                if found != ids.len() as u64 {
                    return Err(AppError::BadRequest(format!("Invalid {} value. Invalid relationships", key)));
                }
            }
            out.push((rel.clone(), ids.clone()));
        }
        Ok(out)
    }

    /// Replaces the set of rows linked through `rel`.
    async fn link_related(&mut self, model: &Model, id: &Value, rel: &Relationship, ids: &[Value]) -> Result<(), AppError> {
        match &rel.link {
            Link::Secondary { table, local, remote } => {
                let mut q = QueryBuf::new();
                q.push_str(&format!("DELETE FROM {} WHERE ", quoted(table)));
                q.push(&Expr::column(table, local).eq(id.clone()));
                self.run(&q).await?;
                for related in ids {
                    let mut q = QueryBuf::new();
                    let a = q.push_param(id.clone());
                    let b = q.push_param(related.clone());
                    q.push_str(&format!(
                        "INSERT INTO {} ({}, {}) VALUES (?{}, ?{})",
                        quoted(table),
                        quoted(local),
                        quoted(remote),
                        a,
                        b
                    ));
                    self.run(&q).await?;
                }
            }
            Link::HasForeign { fk } => {
                let target = self.registry().model(&rel.target)?.clone();
                let target_pk = target.single_pk()?.name.clone();
                let nullable = target.column(fk).map(|c| c.nullable).unwrap_or(false);
                if nullable {
                    let mut q = QueryBuf::new();
                    q.push_str(&format!("UPDATE {} SET {} = NULL WHERE ", quoted(&target.table), quoted(fk)));
                    q.push(&Expr::column(&target.table, fk).eq(id.clone()));
                    if !ids.is_empty() {
                        q.push_str(" AND ");
                        q.push(&Expr::column(&target.table, &target_pk).in_list(ids.to_vec()).not());
                    }
                    self.run(&q).await?;
                }
                if !ids.is_empty() {
                    let mut q = QueryBuf::new();
                    let n = q.push_param(id.clone());
                    q.push_str(&format!("UPDATE {} SET {} = ?{} WHERE ", quoted(&target.table), quoted(fk), n));
                    q.push(&Expr::column(&target.table, &target_pk).in_list(ids.to_vec()));
                    self.run(&q).await?;
                }
            }
            Link::BelongsTo { fk } => {
                tracing::debug!(
                    model = %model.name,
                    relationship = %rel.name,
                    column = %qualified(&model.table, fk),
                    "to-one relationship takes its foreign key column, id list ignored"
                );
            }
        }
        Ok(())
    }
}
