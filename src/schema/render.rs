//! Turning records into JSON through a compiled schema.

use super::{FieldKind, FieldSel, FieldSet, Schema};
use crate::case::to_snake_case;
use crate::db::{Record, Relation};
use crate::error::AppError;
use crate::model::{ColumnType, VirtualSource};
use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use serde_json::{Map, Value};

/// A single record or a list of records.
pub trait Renderable {
    fn render_with(&self, schema: &Schema, lazy_first_level: bool, prune: bool) -> Result<Value, AppError>;
}

impl Renderable for Record {
    fn render_with(&self, schema: &Schema, lazy_first_level: bool, prune: bool) -> Result<Value, AppError> {
        schema.render_record(self, lazy_first_level, prune).map(Value::Object)
    }
}

impl Renderable for [Record] {
    fn render_with(&self, schema: &Schema, lazy_first_level: bool, prune: bool) -> Result<Value, AppError> {
        self.iter()
            .map(|r| r.render_with(schema, lazy_first_level, prune))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }
}

impl Renderable for Vec<Record> {
    fn render_with(&self, schema: &Schema, lazy_first_level: bool, prune: bool) -> Result<Value, AppError> {
        self.as_slice().render_with(schema, lazy_first_level, prune)
    }
}

impl Schema {
    /// Every schema field under its camelCase name, nulls included.
    ///
    /// With `lazy_first_level`, top-level relationships that were not loaded are
    /// left out instead of rendering as `null`. Dynamic relationship fields are
    /// always left out when unloaded.
    pub fn render_model<R: Renderable + ?Sized>(&self, result: &R, lazy_first_level: bool) -> Result<Value, AppError> {
        result.render_with(self, lazy_first_level || self.lazy_first_level, false)
    }

    /// Like [`render_model`](Schema::render_model) with unset and null fields suppressed.
    pub fn render_json<R: Renderable + ?Sized>(&self, result: &R, lazy_first_level: bool) -> Result<Value, AppError> {
        result.render_with(self, lazy_first_level || self.lazy_first_level, true)
    }

    /// [`render_json`](Schema::render_json), then drops `exclude` keys and keeps
    /// only `include` keys when given. Keys match in either casing.
    pub fn render_json_filtered<R: Renderable + ?Sized>(
        &self,
        result: &R,
        exclude: &FieldSet,
        include: Option<&FieldSet>,
        lazy_first_level: bool,
    ) -> Result<Value, AppError> {
        let mut value = self.render_json(result, lazy_first_level)?;
        filter_keys(&mut value, exclude, include);
        Ok(value)
    }

    fn render_record(&self, record: &Record, lazy: bool, prune: bool) -> Result<Map<String, Value>, AppError> {
        let mut out = Map::new();
        for f in &self.fields {
            let value = match &f.kind {
                FieldKind::Column(ty) => format_value(record.get(&f.name), *ty),
                FieldKind::Virtual(ty) => {
                    let computed = self.model.virtuals.iter().find(|v| v.name == f.name).and_then(|v| {
                        match &v.source {
                            VirtualSource::Computed(func) => Some(func(record)),
                            VirtualSource::Expression(_) => None,
                        }
                    });
                    match computed {
                        Some(v) => v,
                        None => format_value(record.get(&f.name), *ty),
                    }
                }
                FieldKind::Extra(_) => record.get(&f.name).cloned().unwrap_or(Value::Null),
                FieldKind::Relationship { schema, dynamic, .. } => match record.relation(&f.name) {
                    None if *dynamic || lazy => continue,
                    None | Some(Relation::One(None)) => Value::Null,
                    Some(Relation::One(Some(related))) => Value::Object(schema.render_record(related, false, prune)?),
                    Some(Relation::Many(items)) => Value::Array(
                        items
                            .iter()
                            .map(|r| schema.render_record(r, false, prune).map(Value::Object))
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                },
            };
            if value.is_null() {
                if f.required {
                    return Err(AppError::Internal(format!(
                        "{}: field {} is required but missing",
                        self.name, f.alias
                    )));
                }
                if prune {
                    continue;
                }
            }
            out.insert(f.alias.clone(), value);
        }
        Ok(out)
    }
}

fn format_value(value: Option<&Value>, ty: ColumnType) -> Value {
    match (value, ty) {
        (None, _) => Value::Null,
        (Some(Value::String(raw)), ColumnType::DateTime) => {
            Value::String(iso_datetime(raw).unwrap_or_else(|| raw.clone()))
        }
        (Some(v), _) => v.clone(),
    }
}

/// ISO-8601 with seconds precision; naive timestamps get a `Z` suffix.
pub(crate) fn iso_datetime(raw: &str) -> Option<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.to_rfc3339_opts(SecondsFormat::Secs, false));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| format!("{}Z", naive.format("%Y-%m-%dT%H:%M:%S")))
}

fn filter_keys(value: &mut Value, exclude: &FieldSet, include: Option<&FieldSet>) {
    match value {
        Value::Array(items) => {
            for item in items {
                filter_keys(item, exclude, include);
            }
        }
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                let snake = to_snake_case(&key);
                let lookup = |set: &FieldSet| set.get(&key).or_else(|| set.get(&snake)).cloned();
                let excluded = lookup(exclude);
                if excluded == Some(FieldSel::All) {
                    map.remove(&key);
                    continue;
                }
                let nested_exclude = match excluded {
                    Some(FieldSel::Nested(set)) => set,
                    _ => FieldSet::new(),
                };
                let nested_include = match include.map(lookup) {
                    None => None,
                    Some(None) | Some(Some(FieldSel::Off)) => {
                        map.remove(&key);
                        continue;
                    }
                    Some(Some(FieldSel::All)) => None,
                    Some(Some(FieldSel::Nested(set))) => Some(set),
                };
                if let Some(child) = map.get_mut(&key) {
                    filter_keys(child, &nested_exclude, nested_include.as_ref());
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, Model, Registry, Relationship};
    use crate::schema::SchemaSpec;
    use serde_json::json;
    use std::sync::Arc;

    fn accounts() -> Arc<Registry> {
        let user = Model::define("User", "user")
            .id()
            .column(Column::text("email"))
            .column(Column::text("password_hash"))
            .column(Column::text("nick_name").nullable())
            .column(Column::new("last_seen", ColumnType::DateTime).nullable())
            .relationship(Relationship::has_many("posts", "Article", "user_id").back_populates("user"))
            .computed("display", ColumnType::Text, |r: &Record| {
                json!(format!("<{}>", r.get_str("email").unwrap_or_default()))
            })
            .build();
        let article = Model::define("Article", "article")
            .id()
            .column(Column::text("title"))
            .column(Column::integer("user_id").references("user", "id"))
            .relationship(Relationship::belongs_to("user", "User", "user_id").back_populates("posts"))
            .build();
        Registry::build(vec![user, article]).unwrap()
    }

    fn user() -> Record {
        let mut r = Record::new("User");
        r.set("id", json!(1));
        r.set("email", json!("a@b.c"));
        r.set("password_hash", json!("secret"));
        r.set("nick_name", Value::Null);
        r.set("last_seen", json!("2024-03-01 10:20:30"));
        r
    }

    #[test]
    fn password_columns_are_hidden_unless_included() {
        let registry = accounts();
        let strict = registry
            .response_schema("User", &SchemaSpec::default().all_optional(false))
            .unwrap();
        let out = strict.render_json(&user(), false).unwrap();
        assert!(out.get("passwordHash").is_none());
        assert_eq!(out["email"], "a@b.c");

        let opened = registry
            .response_schema("User", &SchemaSpec::default().include(["id", "password_hash"]))
            .unwrap();
        let out = opened.render_json(&user(), false).unwrap();
        assert_eq!(out, json!({"id": 1, "passwordHash": "secret"}));
    }

    #[test]
    fn render_json_drops_nulls_and_formats_datetimes() {
        let registry = accounts();
        let schema = registry.response_schema("User", &SchemaSpec::default()).unwrap();
        let full = schema.render_model(&user(), false).unwrap();
        assert_eq!(full["nickName"], Value::Null);
        assert_eq!(full["lastSeen"], "2024-03-01T10:20:30Z");
        assert_eq!(full["display"], "<a@b.c>");

        let pruned = schema.render_json(&user(), false).unwrap();
        assert!(pruned.get("nickName").is_none());
    }

    #[test]
    fn dynamic_relationships_render_only_when_loaded() {
        let registry = accounts();
        let schema = registry
            .response_schema("User", &SchemaSpec::default().relationships(["posts"]))
            .unwrap();
        let mut r = user();
        assert!(schema.render_model(&r, false).unwrap().get("posts").is_none());

        let mut post = Record::new("Article");
        post.set("id", json!(7));
        post.set("title", json!("hello"));
        r.set_relation("posts", Relation::Many(vec![post]));
        let out = schema.render_json(&r, false).unwrap();
        assert_eq!(out["posts"], json!([{"id": 7, "title": "hello"}]));
    }

    #[test]
    fn lazy_first_level_hides_unloaded_static_relationships() {
        let registry = accounts();
        let spec = SchemaSpec::default()
            .use_dynamic_relationships(false)
            .relationships(["posts"]);
        let schema = registry.response_schema("User", &spec).unwrap();
        assert_eq!(schema.render_model(&user(), false).unwrap()["posts"], Value::Null);
        assert!(schema.render_model(&user(), true).unwrap().get("posts").is_none());
    }

    #[test]
    fn required_field_missing_fails_render() {
        let registry = accounts();
        let schema = registry
            .response_schema("User", &SchemaSpec::default().all_optional(false))
            .unwrap();
        let mut r = user();
        r.values.remove("email");
        assert!(schema.render_model(&r, false).is_err());
    }

    #[test]
    fn filtered_render_excludes_and_includes_by_either_casing() {
        let registry = accounts();
        let schema = registry.response_schema("User", &SchemaSpec::default()).unwrap();
        let out = schema
            .render_json_filtered(&user(), &FieldSet::from(["nick_name", "display"]), None, false)
            .unwrap();
        assert!(out.get("display").is_none());
        assert!(out.get("email").is_some());

        let out = schema
            .render_json_filtered(&vec![user()], &FieldSet::new(), Some(&FieldSet::from(["lastSeen"])), false)
            .unwrap();
        assert_eq!(out, json!([{"lastSeen": "2024-03-01T10:20:30Z"}]));
    }

    #[test]
    fn offset_datetimes_keep_their_offset() {
        assert_eq!(
            iso_datetime("2024-03-01T10:20:30.123+02:00").as_deref(),
            Some("2024-03-01T10:20:30+02:00")
        );
        assert_eq!(iso_datetime("not a date"), None);
    }
}
