//! `filter[...]` handling: scopes first, then typed column filters.

use super::{Fragment, Select};
use crate::error::AppError;
use crate::model::{Column, ColumnType, FilterScope, FilterValue};
use crate::settings::Settings;
use regex::Regex;
use std::sync::OnceLock;

/// Splits `col[json_key]` into its parts.
pub(crate) fn bracket_key(key: &str) -> Option<(&str, &str)> {
    static BRACKET: OnceLock<Option<Regex>> = OnceLock::new();
    let re = BRACKET
        .get_or_init(|| Regex::new(r"^([^\[]*)\[(.*)\]$").ok())
        .as_ref()?;
    let caps = re.captures(key)?;
    let col = caps.get(1)?.as_str();
    let json_key = caps.get(2)?.as_str();
    Some((col, json_key))
}

/// `"true"` / `"false"` after trimming, anything else is `None`.
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

impl Select {
    /// Applies each filter in order.
    ///
    /// Nothing is applied when the model was not declared queryable. For each key:
    /// `col[json_key]` goes to the json filter scope `col`; otherwise a filter scope
    /// named `key` wins; otherwise a queryable column gets a typed comparison.
    /// Unknown keys and values that do not coerce to the column type are skipped.
    pub fn query_by(mut self, filters: &[(String, FilterValue)], settings: &Settings) -> Result<Self, AppError> {
        let registry = self.registry().clone();
        let model = self.model().name.clone();
        let Some(queryable) = registry.queryable_columns(&model) else {
            if !filters.is_empty() {
                tracing::debug!(model = %model, "model is not queryable, filters ignored");
            }
            return Ok(self);
        };

        for (key, value) in filters {
            if let Some((col, json_key)) = bracket_key(key) {
                match registry.filter_scope(&model, col) {
                    Some(FilterScope::Json(scope)) => self = scope(self, json_key, value)?,
                    _ => tracing::debug!(model = %model, key = %key, "no json filter scope, skipped"),
                }
                continue;
            }
            match registry.filter_scope(&model, key) {
                Some(FilterScope::Value(scope)) => {
                    self = scope(self, value)?;
                    continue;
                }
                Some(FilterScope::Json(_)) => {
                    tracing::debug!(model = %model, key = %key, "json filter scope needs col[key] syntax, skipped");
                    continue;
                }
                None => {}
            }
            let snake = crate::case::to_snake_case(key);
            if !queryable.contains(key.as_str()) && !queryable.contains(&snake) {
                tracing::debug!(model = %model, key = %key, "filter key not queryable, skipped");
                continue;
            }
            let Some(column) = registry.resolve_column(&model, key) else {
                tracing::debug!(model = %model, key = %key, "filter key is not a column, skipped");
                continue;
            };
            match self.column_filter(column, value, settings.queryable_use_like) {
                Ok(condition) => self = self.filter(condition),
                Err(reason) => tracing::warn!(
                    model = %model,
                    column = %column.name,
                    value = ?value,
                    reason = %reason,
                    "invalid filter value, skipping filter"
                ),
            }
        }
        Ok(self)
    }

    fn column_filter(&self, column: &Column, value: &FilterValue, use_like: bool) -> Result<Fragment, String> {
        let col = self.col(&column.name);
        if column.ty.is_temporal() {
            return match value {
                FilterValue::One(s) if s.contains(',') => match s.split(',').collect::<Vec<_>>().as_slice() {
                    [from, to] => Ok(col.date().between(from.trim(), to.trim())),
                    _ => Err("date range needs exactly two values".into()),
                },
                FilterValue::Many(v) => match v.as_slice() {
                    [from, to] => Ok(col.date().between(from.as_str(), to.as_str())),
                    _ => Err("date range needs exactly two values".into()),
                },
                FilterValue::One(s) => Ok(col.date().eq(s.as_str())),
            };
        }
        let raw = value.as_str().ok_or_else(|| "list value for a scalar column".to_string())?;
        Ok(match column.ty {
            ColumnType::Boolean => match parse_bool(raw) {
                Some(b) => col.eq(b),
                None => col.is_null(),
            },
            ColumnType::Integer => col.eq(raw.trim().parse::<i64>().map_err(|e| e.to_string())?),
            ColumnType::Float => col.eq(raw.trim().parse::<f64>().map_err(|e| e.to_string())?),
            ColumnType::Text if use_like => col.icontains(raw),
            _ => col.eq(raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::blog;

    fn f(k: &str, v: &str) -> (String, FilterValue) {
        (k.to_string(), FilterValue::from(v))
    }

    fn where_sql(q: &Select) -> String {
        let (buf, _) = q.render().unwrap();
        buf.sql.split(" WHERE ").nth(1).unwrap_or("").to_string()
    }

    fn events() -> std::sync::Arc<crate::model::Registry> {
        use crate::model::{Column, Model, Registry};
        let event = Model::define("Event", "event")
            .id()
            .column(Column::new("day", ColumnType::Date))
            .column(Column::new("at", ColumnType::DateTime))
            .column(Column::new("active", ColumnType::Boolean).nullable())
            .column(Column::new("data", ColumnType::Json))
            .json_filter_scope("data", |q: Select, key: &str, v: &FilterValue| {
                let member = q.col("data").json(key);
                Ok(q.filter(member.eq(v.as_str().unwrap_or_default())))
            })
            .queryable_all()
            .build();
        Registry::build(vec![event]).unwrap()
    }

    #[test]
    fn date_filters_match_days_and_ranges() {
        let reg = events();
        let settings = Settings::default();
        let q = Select::new(&reg, "Event")
            .unwrap()
            .query_by(&[f("day", "2024-01-02")], &settings)
            .unwrap();
        assert_eq!(where_sql(&q), "(date(\"event\".\"day\") = ?1)");

        let q = Select::new(&reg, "Event")
            .unwrap()
            .query_by(&[f("at", "2024-01-01, 2024-01-31")], &settings)
            .unwrap();
        assert_eq!(where_sql(&q), "(date(\"event\".\"at\") BETWEEN ?1 AND ?2)");
        let (buf, _) = q.render().unwrap();
        assert_eq!(buf.params, vec![serde_json::json!("2024-01-01"), serde_json::json!("2024-01-31")]);

        let range = FilterValue::Many(vec!["2024-02-01".into(), "2024-02-29".into()]);
        let q = Select::new(&reg, "Event")
            .unwrap()
            .query_by(&[("day".to_string(), range)], &settings)
            .unwrap();
        assert_eq!(where_sql(&q), "(date(\"event\".\"day\") BETWEEN ?1 AND ?2)");
    }

    #[test]
    fn malformed_date_range_is_skipped() {
        let reg = events();
        let q = Select::new(&reg, "Event")
            .unwrap()
            .query_by(&[f("day", "2024-01-01,2024-01-02,2024-01-03"), f("id", "1")], &Settings::default())
            .unwrap();
        assert_eq!(where_sql(&q), "(\"event\".\"id\" = ?1)");
    }

    #[test]
    fn boolean_filter_words() {
        let reg = events();
        let settings = Settings::default();
        let render = |raw: &str| {
            let q = Select::new(&reg, "Event")
                .unwrap()
                .query_by(&[f("active", raw)], &settings)
                .unwrap();
            let (buf, _) = q.render().unwrap();
            (where_sql(&q), buf.params)
        };
        assert_eq!(render(" true "), ("(\"event\".\"active\" = ?1)".to_string(), vec![serde_json::json!(true)]));
        assert_eq!(render("false"), ("(\"event\".\"active\" = ?1)".to_string(), vec![serde_json::json!(false)]));
        assert_eq!(render("maybe"), ("(\"event\".\"active\" IS NULL)".to_string(), vec![]));
    }

    #[test]
    fn bracket_keys_reach_json_scopes() {
        let reg = events();
        let q = Select::new(&reg, "Event")
            .unwrap()
            .query_by(&[f("data[colour]", "red"), f("data", "ignored")], &Settings::default())
            .unwrap();
        assert_eq!(where_sql(&q), "(json_extract(\"event\".\"data\", ?1) = ?2)");
        let (buf, _) = q.render().unwrap();
        assert_eq!(buf.params, vec![serde_json::json!("$.\"colour\""), serde_json::json!("red")]);
    }

    #[test]
    fn brackets() {
        assert_eq!(bracket_key("json_field[k]"), Some(("json_field", "k")));
        assert_eq!(bracket_key("a[b[c]]"), Some(("a", "b[c]")));
        assert_eq!(bracket_key("plain"), None);
    }

    #[test]
    fn typed_column_filters() {
        let reg = blog();
        let settings = Settings::default();
        let q = Select::new(&reg, "Post")
            .unwrap()
            .query_by(&[f("rating", " 3 "), f("title", "hi")], &settings)
            .unwrap();
        assert_eq!(where_sql(&q), "(\"post\".\"rating\" = ?1) AND (\"post\".\"title\" = ?2)");
    }

    #[test]
    fn bad_numbers_and_unknown_keys_are_skipped() {
        let reg = blog();
        let q = Select::new(&reg, "Post")
            .unwrap()
            .query_by(&[f("rating", "abc"), f("doesNotExist", "x"), f("id", "1")], &Settings::default())
            .unwrap();
        assert_eq!(where_sql(&q), "(\"post\".\"id\" = ?1)");
    }

    #[test]
    fn like_toggle_uses_icontains() {
        let reg = blog();
        let settings = Settings {
            queryable_use_like: true,
            ..Settings::default()
        };
        let q = Select::new(&reg, "Tag")
            .unwrap()
            .query_by(&[f("name", "Ta")], &settings)
            .unwrap();
        assert_eq!(where_sql(&q), "(LOWER(\"tag\".\"name\") LIKE LOWER(?1))");
    }

    #[test]
    fn non_queryable_model_ignores_everything() {
        let reg = blog();
        let q = Select::new(&reg, "Message")
            .unwrap()
            .query_by(&[f("text", "msg1")], &Settings::default())
            .unwrap();
        assert_eq!(where_sql(&q), "");
    }

    #[test]
    fn queryable_subset_is_enforced() {
        let reg = blog();
        let q = Select::new(&reg, "Tag")
            .unwrap()
            .query_by(&[f("id", "1")], &Settings::default())
            .unwrap();
        assert_eq!(where_sql(&q), "");
    }
}
