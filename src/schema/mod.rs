//! Response and request schemas synthesised from model metadata.
//!
//! A [`Schema`] is compiled once per (model, canonical spec) pair and cached on
//! the [`Registry`]; equal specs hand back the same `Arc`.

mod render;
mod request;
mod spec;

pub use spec::{Extra, Extras, FieldSel, FieldSet, FieldType, SchemaSpec};

use crate::case::to_camel_case;
use crate::error::ConfigError;
use crate::model::{Cardinality, ColumnType, Model, Registry};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum FieldKind {
    Column(ColumnType),
    Virtual(ColumnType),
    Extra(FieldType),
    Relationship {
        cardinality: Cardinality,
        schema: Arc<Schema>,
        /// Rendered only when loaded on the record.
        dynamic: bool,
    },
}

#[derive(Debug, Clone)]
pub struct SchemaField {
    /// Attribute name on the model (snake case).
    pub name: String,
    /// Wire name (camel case).
    pub alias: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// A compiled, immutable schema.
#[derive(Debug)]
pub struct Schema {
    name: String,
    model: Arc<Model>,
    fields: Vec<SchemaField>,
    lazy_first_level: bool,
}

impl Schema {
    /// `"<Model>$<digest>"`, also the cache key.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == key || f.alias == key)
    }

    /// Default for the `lazy_first_level` render flag, taken from its `SchemaSpec`.
    pub fn lazy_first_level(&self) -> bool {
        self.lazy_first_level
    }

    /// Relationship paths a non-dynamic schema renders eagerly and therefore
    /// needs loaded, e.g. `["messages", "messages.tags"]`.
    pub fn eager_includes(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_includes("", &mut out);
        out
    }

    fn collect_includes(&self, prefix: &str, out: &mut Vec<String>) {
        for f in &self.fields {
            if let FieldKind::Relationship { schema, dynamic: false, .. } = &f.kind {
                let path = if prefix.is_empty() {
                    f.name.clone()
                } else {
                    format!("{}.{}", prefix, f.name)
                };
                out.push(path.clone());
                schema.collect_includes(&path, out);
            }
        }
    }
}

impl Registry {
    /// The response schema of `model` for `spec`, compiled on first use.
    pub fn response_schema(&self, model: &str, spec: &SchemaSpec) -> Result<Arc<Schema>, ConfigError> {
        let m = self.model(model)?.clone();
        let normalized = spec.normalized(&m)?;
        self.generate(&m, &normalized, spec.lazy_first_level)
    }

    /// The request schema of `model`: primary key and timestamps excluded,
    /// no virtual fields and no lazy relationships.
    pub fn request_schema(&self, model: &str, spec: &SchemaSpec) -> Result<Arc<Schema>, ConfigError> {
        let spec = SchemaSpec {
            exclude_pk: true,
            exclude_timestamps: true,
            include_virtuals: false,
            use_dynamic_relationships: false,
            lazy_first_level: false,
            ..spec.clone()
        };
        self.response_schema(model, &spec)
    }

    fn generate(&self, model: &Arc<Model>, spec: &SchemaSpec, lazy: bool) -> Result<Arc<Schema>, ConfigError> {
        let name = format!("{}${}", model.name, spec.digest());
        if let Some(hit) = self.schemas.lock().get(&name) {
            if hit.lazy_first_level == lazy {
                return Ok(hit.clone());
            }
            return Ok(Arc::new(Schema {
                name: hit.name.clone(),
                model: hit.model.clone(),
                fields: hit.fields.clone(),
                lazy_first_level: lazy,
            }));
        }

        let fields = self.compile(model, spec)?;
        tracing::debug!(schema = %name, fields = fields.len(), "schema compiled");
        let compiled = Arc::new(Schema {
            name: name.clone(),
            model: model.clone(),
            fields,
            lazy_first_level: false,
        });
        let cached = self.schemas.lock().entry(name).or_insert(compiled).clone();
        if lazy {
            return Ok(Arc::new(Schema {
                name: cached.name.clone(),
                model: cached.model.clone(),
                fields: cached.fields.clone(),
                lazy_first_level: true,
            }));
        }
        Ok(cached)
    }

    fn compile(&self, model: &Arc<Model>, spec: &SchemaSpec) -> Result<Vec<SchemaField>, ConfigError> {
        let include = spec.include.as_ref();
        let selected = |name: &str| -> bool {
            if spec.exclude.contains_leaf(name) {
                return false;
            }
            include.map(|i| i.contains(name)).unwrap_or(true)
        };

        let mut fields = Vec::new();
        for c in &model.columns {
            if !selected(&c.name) {
                continue;
            }
            if c.name.contains("password") && !include.map(|i| i.contains(&c.name)).unwrap_or(false) {
                continue;
            }
            fields.push(SchemaField {
                name: c.name.clone(),
                alias: to_camel_case(&c.name),
                kind: FieldKind::Column(c.ty),
                required: !(spec.all_optional || c.nullable || c.has_default()),
            });
        }

        if spec.include_virtuals {
            for v in &model.virtuals {
                if !selected(&v.name) {
                    continue;
                }
                fields.push(SchemaField {
                    name: v.name.clone(),
                    alias: to_camel_case(&v.name),
                    kind: FieldKind::Virtual(v.ty),
                    required: false,
                });
            }
        }

        for key in spec.relationships.keys() {
            let Some((_, rel)) = self.resolve_relationship(&model.name, key) else {
                tracing::debug!(model = %model.name, relationship = %key, "unknown relationship in schema, skipped");
                continue;
            };
            let target = self.model(&rel.target)?.clone();
            let child = SchemaSpec {
                exclude: spec.exclude.child(key),
                include: include.map(|i| i.child(key)).filter(|i| !i.is_empty()),
                relationships: spec.relationships.child(key),
                extras: spec.extras.child(key),
                lazy_first_level: false,
                ..spec.clone()
            }
            .normalized(&target)?;
            let schema = self.generate(&target, &child, false)?;
            fields.push(SchemaField {
                name: rel.name.clone(),
                alias: to_camel_case(&rel.name),
                kind: FieldKind::Relationship {
                    cardinality: rel.cardinality,
                    schema,
                    dynamic: spec.use_dynamic_relationships,
                },
                required: false,
            });
        }

        for (name, ty) in spec.extras.fields() {
            fields.push(SchemaField {
                name: name.to_string(),
                alias: to_camel_case(name),
                kind: FieldKind::Extra(ty.clone()),
                required: !(spec.all_optional || ty.is_optional()),
            });
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::blog;

    #[test]
    fn equal_specs_share_one_schema() {
        let registry = blog();
        let a = SchemaSpec::default()
            .exclude(["json_field", "rating"])
            .relationships(FieldSet::new().nested("messages", ["tags"]));
        let b = SchemaSpec::default()
            .relationships(FieldSet::new().nested("messages", ["tags"]))
            .exclude(["rating", "json_field"]);
        let sa = registry.response_schema("Post", &a).unwrap();
        let sb = registry.response_schema("Post", &b).unwrap();
        assert!(Arc::ptr_eq(&sa, &sb));
        assert!(sa.name().starts_with("Post$"));
        assert!(sa.field("json_field").is_none());
        assert!(sa.field("messages").is_some());
    }

    #[test]
    fn request_schema_drops_pk_and_virtuals() {
        let registry = blog();
        let schema = registry.request_schema("Post", &SchemaSpec::request()).unwrap();
        assert!(schema.field("id").is_none());
        assert!(schema.field("title").map(|f| f.required).unwrap_or(false));
        assert!(!schema.field("rating").map(|f| f.required).unwrap_or(true));
    }

    #[test]
    fn unknown_relationship_is_skipped() {
        let registry = blog();
        let spec = SchemaSpec::default().relationships(["doesNotExist", "messages"]);
        let schema = registry.response_schema("Post", &spec).unwrap();
        assert!(schema.field("doesNotExist").is_none());
        assert!(schema.field("messages").is_some());
    }

    #[test]
    fn include_list_selects_fields_and_relationships() {
        let registry = blog();
        let spec = SchemaSpec::default().include(FieldSet::new().field("title").nested("messages", ["text"]));
        let schema = registry.response_schema("Post", &spec).unwrap();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["title", "messages"]);
        let FieldKind::Relationship { schema: nested, .. } = &schema.field("messages").unwrap().kind else {
            panic!("messages is not a relationship field");
        };
        let nested_names: Vec<&str> = nested.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(nested_names, vec!["text"]);
    }

    #[test]
    fn eager_includes_follow_static_relationships() {
        let registry = blog();
        let spec = SchemaSpec::default()
            .use_dynamic_relationships(false)
            .relationships(FieldSet::new().nested("messages", ["tags"]));
        let schema = registry.response_schema("Post", &spec).unwrap();
        assert_eq!(schema.eager_includes(), vec!["messages", "messages.tags"]);

        let dynamic = registry
            .response_schema("Post", &SchemaSpec::default().relationships(["messages"]))
            .unwrap();
        assert!(dynamic.eager_includes().is_empty());
    }

    #[test]
    fn unknown_model_is_a_config_error() {
        let registry = blog();
        let err = registry.response_schema("Nope", &SchemaSpec::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModel(_)));
    }
}
