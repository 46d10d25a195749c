//! Model metadata: tables, columns, relationships, scopes and polymorphic variants.
//!
//! Models are declared once with [`ModelBuilder`] and frozen into a [`Registry`],
//! which validates them and builds the attribute tables used to resolve
//! filter, sort and include keys.

mod column;
mod registry;
mod relationship;
mod scope;

pub use column::{Column, ColumnDefault, ColumnType};
pub use registry::{Attr, Registry};
pub use relationship::{Cardinality, Link, Relationship};
pub use scope::{FilterScope, FilterValue, ScopeResult, SortScope};

use crate::db::Record;
use crate::query::Select;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Which columns accept plain `filter[col]=value` filtering. Scopes are always reachable.
#[derive(Debug, Clone, Default)]
pub enum Queryable {
    /// `filter[...]` is ignored entirely for the model, scopes included.
    #[default]
    None,
    Columns(BTreeSet<String>),
    All,
}

#[derive(Clone)]
pub enum VirtualSource {
    /// Evaluated against the loaded record at render time.
    Computed(Arc<dyn Fn(&Record) -> Value + Send + Sync>),
    /// SQL expression selected alongside the columns. `{table}` is replaced by the
    /// quoted table or alias the row is read from.
    Expression(String),
}

#[derive(Clone)]
pub struct Virtual {
    pub name: String,
    pub ty: ColumnType,
    pub source: VirtualSource,
}

impl std::fmt::Debug for Virtual {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Virtual").field("name", &self.name).field("ty", &self.ty).finish()
    }
}

/// Marks a model as the base of a single-table hierarchy.
#[derive(Debug, Clone)]
pub struct Polymorphic {
    pub discriminator: String,
    /// `(identity, variant model name)`, filled when the registry is built.
    pub variants: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct Inherits {
    pub base: String,
    pub identity: String,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub table: String,
    pub columns: Vec<Column>,
    /// Base models only: the variants' own columns, nullable, stored in the shared table.
    pub variant_columns: Vec<Column>,
    pub relationships: Vec<Relationship>,
    pub virtuals: Vec<Virtual>,
    pub filter_scopes: HashMap<String, FilterScope>,
    pub sort_scopes: HashMap<String, SortScope>,
    pub queryable: Queryable,
    pub polymorphic: Option<Polymorphic>,
    pub inherits: Option<Inherits>,
    pub timestamps: bool,
}

impl Model {
    pub fn define(name: impl Into<String>, table: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            model: Model {
                name: name.into(),
                table: table.into(),
                columns: Vec::new(),
                variant_columns: Vec::new(),
                relationships: Vec::new(),
                virtuals: Vec::new(),
                filter_scopes: HashMap::new(),
                sort_scopes: HashMap::new(),
                queryable: Queryable::None,
                polymorphic: None,
                inherits: None,
                timestamps: false,
            },
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .chain(self.variant_columns.iter())
            .find(|c| c.name == name)
    }

    /// Every column read from a row of this model, variant columns included.
    pub fn select_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().chain(self.variant_columns.iter())
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn primary_keys(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// The single primary key column. Composite keys are a configuration error here.
    pub fn single_pk(&self) -> Result<&Column, crate::error::ConfigError> {
        let pks = self.primary_keys();
        match pks.as_slice() {
            [pk] => Ok(pk),
            [] => Err(crate::error::ConfigError::MissingPrimaryKey(self.name.clone())),
            _ => Err(crate::error::ConfigError::CompositePrimaryKey(self.name.clone())),
        }
    }

    pub fn is_timestamp(&self, column: &str) -> bool {
        self.timestamps && (column == "created_at" || column == "updated_at")
    }

    pub fn expression_virtuals(&self) -> impl Iterator<Item = (&Virtual, &str)> {
        self.virtuals.iter().filter_map(|v| match &v.source {
            VirtualSource::Expression(sql) => Some((v, sql.as_str())),
            VirtualSource::Computed(_) => None,
        })
    }
}

pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    pub fn column(mut self, column: Column) -> Self {
        self.model.columns.push(column);
        self
    }

    /// Integer primary key named `id`.
    pub fn id(self) -> Self {
        self.column(Column::integer("id").primary_key())
    }

    /// `created_at` and `updated_at`, defaulted by the database; `updated_at` is touched on save.
    pub fn timestamps(mut self) -> Self {
        self.model.timestamps = true;
        for name in ["created_at", "updated_at"] {
            self.model
                .columns
                .push(Column::new(name, ColumnType::DateTime).server_default("CURRENT_TIMESTAMP"));
        }
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.model.relationships.push(relationship);
        self
    }

    pub fn computed<F>(mut self, name: impl Into<String>, ty: ColumnType, f: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.model.virtuals.push(Virtual {
            name: name.into(),
            ty,
            source: VirtualSource::Computed(Arc::new(f)),
        });
        self
    }

    pub fn expression(mut self, name: impl Into<String>, ty: ColumnType, sql: impl Into<String>) -> Self {
        self.model.virtuals.push(Virtual {
            name: name.into(),
            ty,
            source: VirtualSource::Expression(sql.into()),
        });
        self
    }

    /// Registers a scope under its wire key: `filter[<name>]`, camelCase accepted.
    pub fn filter_scope<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Select, &FilterValue) -> ScopeResult + Send + Sync + 'static,
    {
        self.model.filter_scopes.insert(name.into(), FilterScope::Value(Arc::new(f)));
        self
    }

    pub fn json_filter_scope<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Select, &str, &FilterValue) -> ScopeResult + Send + Sync + 'static,
    {
        self.model.filter_scopes.insert(name.into(), FilterScope::Json(Arc::new(f)));
        self
    }

    /// `sort=<name>` / `sort=-<name>`, camelCase accepted.
    pub fn sort_scope<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Select, bool) -> ScopeResult + Send + Sync + 'static,
    {
        self.model.sort_scopes.insert(name.into(), SortScope::Value(Arc::new(f)));
        self
    }

    pub fn json_sort_scope<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Select, &str, bool) -> ScopeResult + Send + Sync + 'static,
    {
        self.model.sort_scopes.insert(name.into(), SortScope::Json(Arc::new(f)));
        self
    }

    pub fn queryable(mut self, columns: &[&str]) -> Self {
        let mut set = match std::mem::take(&mut self.model.queryable) {
            Queryable::Columns(set) => set,
            Queryable::All => {
                self.model.queryable = Queryable::All;
                return self;
            }
            Queryable::None => BTreeSet::new(),
        };
        set.extend(columns.iter().map(|c| c.to_string()));
        self.model.queryable = Queryable::Columns(set);
        self
    }

    pub fn queryable_all(mut self) -> Self {
        self.model.queryable = Queryable::All;
        self
    }

    pub fn polymorphic_on(mut self, discriminator: impl Into<String>) -> Self {
        self.model.polymorphic = Some(Polymorphic {
            discriminator: discriminator.into(),
            variants: Vec::new(),
        });
        self
    }

    /// Declares a variant of `base` stored in the base table with the given discriminator value.
    pub fn inherits(mut self, base: impl Into<String>, identity: impl Into<String>) -> Self {
        self.model.inherits = Some(Inherits {
            base: base.into(),
            identity: identity.into(),
        });
        self
    }

    pub fn build(self) -> Model {
        self.model
    }
}
