//! Validating request bodies against a request schema.

use super::{FieldKind, FieldType, Schema};
use crate::error::AppError;
use crate::model::{Cardinality, ColumnType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Number, Value};

impl Schema {
    /// Validates `body` and returns the accepted fields keyed by attribute name.
    ///
    /// Keys are accepted in camelCase or snake_case. Unknown keys, nulls and
    /// absent optional fields are dropped. A missing required field or a value
    /// that does not coerce to the field type fails with 422 naming the field.
    pub fn parse_request(&self, body: &Value) -> Result<Map<String, Value>, AppError> {
        let Value::Object(obj) = body else {
            return Err(AppError::Validation("request body must be a JSON object".to_string()));
        };
        let mut out = Map::new();
        for f in &self.fields {
            let raw = obj.get(&f.alias).or_else(|| obj.get(&f.name));
            let value = match raw {
                None | Some(Value::Null) => {
                    if f.required {
                        return Err(AppError::Validation(format!("{}: field required", f.alias)));
                    }
                    continue;
                }
                Some(v) => v,
            };
            let coerced = match &f.kind {
                FieldKind::Column(ty) | FieldKind::Virtual(ty) => coerce_scalar(*ty, value),
                FieldKind::Extra(ft) => coerce_field(ft, value),
                FieldKind::Relationship { cardinality, schema, .. } => match (cardinality, value) {
                    (Cardinality::One, v) => schema.parse_nested(v),
                    (Cardinality::Many, Value::Array(items)) => items
                        .iter()
                        .map(|v| schema.parse_nested(v))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array),
                    (Cardinality::Many, _) => Err("expected a list".to_string()),
                },
            }
            .map_err(|reason| AppError::Validation(format!("{}: {}", f.alias, reason)))?;
            out.insert(f.name.clone(), coerced);
        }
        Ok(out)
    }

    fn parse_nested(&self, value: &Value) -> Result<Value, String> {
        self.parse_request(value).map(Value::Object).map_err(|e| e.to_string())
    }
}

fn coerce_field(ty: &FieldType, value: &Value) -> Result<Value, String> {
    match ty {
        FieldType::Scalar(t) => coerce_scalar(*t, value),
        FieldType::Optional(_) if value.is_null() => Ok(Value::Null),
        FieldType::Optional(inner) => coerce_field(inner, value),
        FieldType::List(inner) => match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| coerce_field(inner, v).map_err(|e| format!("item {}: {}", i, e)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Err("expected a list".to_string()),
        },
        FieldType::Any => Ok(value.clone()),
    }
}

fn coerce_scalar(ty: ColumnType, value: &Value) -> Result<Value, String> {
    match ty {
        ColumnType::Integer => match value {
            Value::Number(n) if n.is_i64() => Ok(value.clone()),
            // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| Value::from(f as i64))
                .ok_or_else(|| "expected an integer".to_string()),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| "expected an integer".to_string()),
            _ => Err("expected an integer".to_string()),
        },
        ColumnType::Float => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| "expected a number".to_string()),
            _ => Err("expected a number".to_string()),
        },
        ColumnType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err("expected a boolean".to_string()),
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err("expected a boolean".to_string()),
            },
            _ => Err("expected a boolean".to_string()),
        },
        ColumnType::Text => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err("expected a string".to_string()),
        },
        ColumnType::Date => match value {
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .map_err(|_| "expected a date (YYYY-MM-DD)".to_string()),
            _ => Err("expected a date (YYYY-MM-DD)".to_string()),
        },
        ColumnType::DateTime => match value {
            Value::String(s) => parse_datetime(s.trim())
                .map(|dt| Value::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
                .ok_or_else(|| "expected an ISO-8601 datetime".to_string()),
            _ => Err("expected an ISO-8601 datetime".to_string()),
        },
        ColumnType::Json => Ok(value.clone()),
        ColumnType::Uuid => match value {
            Value::String(s) => uuid::Uuid::parse_str(s.trim())
                .map(|u| Value::String(u.to_string()))
                .map_err(|_| "expected a uuid".to_string()),
            _ => Err("expected a uuid".to_string()),
        },
    }
}

/// Offset timestamps are converted to UTC; naive ones are taken as UTC.
fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

#[cfg(test)]
mod tests {
    use crate::error::AppError;
    use crate::model::ColumnType;
    use crate::query::tests::blog;
    use crate::schema::{Extras, FieldType, SchemaSpec};
    use serde_json::json;

    #[test]
    fn accepts_both_casings_and_drops_unknown_keys() {
        let registry = blog();
        let schema = registry.request_schema("Post", &SchemaSpec::request()).unwrap();
        let parsed = schema
            .parse_request(&json!({"title": "t", "jsonField": {"a": 1}, "id": 9, "nope": true}))
            .unwrap();
        assert_eq!(parsed.get("title"), Some(&json!("t")));
        assert_eq!(parsed.get("json_field"), Some(&json!({"a": 1})));
        assert!(parsed.get("id").is_none());
        assert!(parsed.get("nope").is_none());
    }

    #[test]
    fn missing_required_field_names_it() {
        let registry = blog();
        let schema = registry.request_schema("Post", &SchemaSpec::request()).unwrap();
        let err = schema.parse_request(&json!({"rating": 3})).unwrap_err();
        match err {
            AppError::Validation(msg) => assert_eq!(msg, "title: field required"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn optional_schema_drops_nulls() {
        let registry = blog();
        let schema = registry
            .request_schema("Post", &SchemaSpec::request().all_optional(true))
            .unwrap();
        let parsed = schema.parse_request(&json!({"title": null, "rating": "4"})).unwrap();
        assert!(parsed.get("title").is_none());
        assert_eq!(parsed.get("rating"), Some(&json!(4)));
    }

    #[test]
    fn type_mismatch_is_a_validation_error() {
        let registry = blog();
        let schema = registry.request_schema("Post", &SchemaSpec::request()).unwrap();
        let err = schema.parse_request(&json!({"title": "t", "rating": "high"})).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.starts_with("rating:")));
        assert!(schema.parse_request(&json!([1, 2])).is_err());
    }

    #[test]
    fn extras_carry_relationship_ids() {
        let registry = blog();
        let spec = SchemaSpec::request()
            .all_optional(true)
            .extras(Extras::new().field("messages", FieldType::list(ColumnType::Integer.into())));
        let schema = registry.request_schema("Post", &spec).unwrap();
        let parsed = schema.parse_request(&json!({"messages": [1, "2"]})).unwrap();
        assert_eq!(parsed.get("messages"), Some(&json!([1, 2])));
        let err = schema.parse_request(&json!({"messages": ["x"]})).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "messages: item 0: expected an integer"));
    }

    #[test]
    fn integers_outside_i64_are_rejected() {
        let registry = blog();
        let schema = registry.request_schema("Post", &SchemaSpec::request()).unwrap();
        let parsed = schema.parse_request(&json!({"title": "t", "rating": 4.0})).unwrap();
        assert_eq!(parsed.get("rating"), Some(&json!(4)));
        for huge in [json!(1e30), json!(-1e30), json!(u64::MAX)] {
            let err = schema.parse_request(&json!({"title": "t", "rating": huge})).unwrap_err();
            assert!(matches!(err, AppError::Validation(ref m) if m == "rating: expected an integer"));
        }
    }
}
