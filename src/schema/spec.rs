//! Declarative schema description and its canonical encoding.

use crate::error::ConfigError;
use crate::model::{ColumnType, Model};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Selection state of one key in a [`FieldSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSel {
    All,
    /// Present but switched off; behaves as if the key were absent.
    Off,
    Nested(FieldSet),
}

/// Ordered tree of field / relationship names.
///
/// Dot paths are split on insert: `"messages.text"` becomes
/// `messages -> { text }`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet(BTreeMap<String, FieldSel>);

impl FieldSet {
    pub fn new() -> Self {
        FieldSet::default()
    }

    pub fn field(mut self, path: &str) -> Self {
        self.insert_path(path, FieldSel::All);
        self
    }

    pub fn nested(mut self, key: &str, set: impl Into<FieldSet>) -> Self {
        self.insert_path(key, FieldSel::Nested(set.into()));
        self
    }

    pub fn off(mut self, key: &str) -> Self {
        self.0.insert(key.to_string(), FieldSel::Off);
        self
    }

    fn insert_path(&mut self, path: &str, leaf: FieldSel) {
        match path.split_once('.') {
            None => self.merge_entry(path.to_string(), leaf),
            Some((head, rest)) => {
                let mut child = FieldSet::new();
                child.insert_path(rest, leaf);
                self.merge_entry(head.to_string(), FieldSel::Nested(child));
            }
        }
    }

    fn merge_entry(&mut self, key: String, sel: FieldSel) {
        let merged = match (self.0.remove(&key), sel) {
            (Some(FieldSel::Nested(mut a)), FieldSel::Nested(b)) => {
                a.merge(b);
                FieldSel::Nested(a)
            }
            (Some(FieldSel::Nested(a)), FieldSel::All) => FieldSel::Nested(a),
            (_, sel) => sel,
        };
        self.0.insert(key, merged);
    }

    /// Unions `other` into `self`; nested sets merge key by key.
    pub fn merge(&mut self, other: FieldSet) {
        for (k, v) in other.0 {
            self.merge_entry(k, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldSel> {
        self.0.get(key)
    }

    /// True when `key` is selected (plainly or with a nested set).
    pub fn contains(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(FieldSel::All) | Some(FieldSel::Nested(_)))
    }

    /// True when `key` is selected as a whole, without a nested set.
    pub fn contains_leaf(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(FieldSel::All))
    }

    /// Nested set under `key`, or an empty set.
    pub fn child(&self, key: &str) -> FieldSet {
        match self.0.get(key) {
            Some(FieldSel::Nested(set)) => set.clone(),
            _ => FieldSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| *v == FieldSel::Off)
    }

    /// Selected keys in order, `Off` entries skipped.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, v)| **v != FieldSel::Off)
            .map(|(k, _)| k.as_str())
    }

    /// Only the entries carrying a nested set.
    pub(crate) fn nested_only(&self) -> FieldSet {
        FieldSet(
            self.0
                .iter()
                .filter(|(_, v)| matches!(v, FieldSel::Nested(_)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    fn encode(&self) -> String {
        let mut parts = Vec::new();
        for (k, v) in &self.0 {
            match v {
                FieldSel::All => parts.push(k.clone()),
                FieldSel::Nested(set) if !set.is_empty() => parts.push(format!("{}[{}]", k, set.encode())),
                FieldSel::Nested(_) => parts.push(k.clone()),
                FieldSel::Off => {}
            }
        }
        parts.join(",")
    }
}

impl From<&[&str]> for FieldSet {
    fn from(keys: &[&str]) -> Self {
        keys.iter().fold(FieldSet::new(), |set, k| set.field(k))
    }
}

impl<const N: usize> From<[&str; N]> for FieldSet {
    fn from(keys: [&str; N]) -> Self {
        FieldSet::from(&keys[..])
    }
}

impl From<Vec<&str>> for FieldSet {
    fn from(keys: Vec<&str>) -> Self {
        FieldSet::from(keys.as_slice())
    }
}

/// Declared type of an extra field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Scalar(ColumnType),
    Optional(Box<FieldType>),
    List(Box<FieldType>),
    Any,
}

impl FieldType {
    pub fn optional(inner: FieldType) -> Self {
        FieldType::Optional(Box::new(inner))
    }

    pub fn list(inner: FieldType) -> Self {
        FieldType::List(Box::new(inner))
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, FieldType::Optional(_) | FieldType::Any)
    }

    fn encode(&self) -> String {
        match self {
            FieldType::Scalar(t) => t.name().to_string(),
            FieldType::Optional(inner) => format!("{}?", inner.encode()),
            FieldType::List(inner) => format!("[{}]", inner.encode()),
            FieldType::Any => "any".to_string(),
        }
    }
}

impl From<ColumnType> for FieldType {
    fn from(t: ColumnType) -> Self {
        FieldType::Scalar(t)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extra {
    Field(FieldType),
    /// Extras of the related schema under this relationship key.
    Nested(Extras),
}

/// Synthetic fields not backed by columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extras(BTreeMap<String, Extra>);

impl Extras {
    pub fn new() -> Self {
        Extras::default()
    }

    pub fn field(mut self, name: &str, ty: impl Into<FieldType>) -> Self {
        self.0.insert(name.to_string(), Extra::Field(ty.into()));
        self
    }

    pub fn nested(mut self, relationship: &str, extras: Extras) -> Self {
        self.0.insert(relationship.to_string(), Extra::Nested(extras));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldType)> {
        self.0.iter().filter_map(|(k, v)| match v {
            Extra::Field(t) => Some((k.as_str(), t)),
            Extra::Nested(_) => None,
        })
    }

    pub fn child(&self, relationship: &str) -> Extras {
        match self.0.get(relationship) {
            Some(Extra::Nested(e)) => e.clone(),
            _ => Extras::new(),
        }
    }

    fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| match v {
                Extra::Field(t) => format!("{}:{}", k, t.encode()),
                Extra::Nested(e) => format!("{}[{}]", k, e.encode()),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// How to derive a [`Schema`](super::Schema) from a model.
///
/// `Default` gives response defaults: every field optional, virtuals exposed,
/// relationships rendered only when loaded. [`SchemaSpec::request`] gives the
/// request defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSpec {
    pub exclude: FieldSet,
    pub include: Option<FieldSet>,
    pub relationships: FieldSet,
    pub extras: Extras,
    pub all_optional: bool,
    pub include_virtuals: bool,
    pub use_dynamic_relationships: bool,
    /// Render-time only: top-level relationships that were not loaded are omitted.
    pub lazy_first_level: bool,
    pub exclude_pk: bool,
    pub exclude_timestamps: bool,
}

impl Default for SchemaSpec {
    fn default() -> Self {
        SchemaSpec {
            exclude: FieldSet::new(),
            include: None,
            relationships: FieldSet::new(),
            extras: Extras::new(),
            all_optional: true,
            include_virtuals: true,
            use_dynamic_relationships: true,
            lazy_first_level: false,
            exclude_pk: false,
            exclude_timestamps: false,
        }
    }
}

impl SchemaSpec {
    pub fn request() -> Self {
        SchemaSpec {
            all_optional: false,
            include_virtuals: false,
            use_dynamic_relationships: false,
            exclude_pk: true,
            exclude_timestamps: true,
            ..SchemaSpec::default()
        }
    }

    pub fn exclude(mut self, set: impl Into<FieldSet>) -> Self {
        self.exclude.merge(set.into());
        self
    }

    pub fn include(mut self, set: impl Into<FieldSet>) -> Self {
        let mut include = self.include.take().unwrap_or_default();
        include.merge(set.into());
        self.include = Some(include);
        self
    }

    pub fn relationships(mut self, set: impl Into<FieldSet>) -> Self {
        self.relationships.merge(set.into());
        self
    }

    pub fn extras(mut self, extras: Extras) -> Self {
        self.extras = extras;
        self
    }

    pub fn all_optional(mut self, on: bool) -> Self {
        self.all_optional = on;
        self
    }

    pub fn include_virtuals(mut self, on: bool) -> Self {
        self.include_virtuals = on;
        self
    }

    pub fn use_dynamic_relationships(mut self, on: bool) -> Self {
        self.use_dynamic_relationships = on;
        self
    }

    pub fn lazy_first_level(mut self, on: bool) -> Self {
        self.lazy_first_level = on;
        self
    }

    pub fn exclude_pk(mut self, on: bool) -> Self {
        self.exclude_pk = on;
        self
    }

    pub fn exclude_timestamps(mut self, on: bool) -> Self {
        self.exclude_timestamps = on;
        self
    }

    /// Folds the flags into plain data for `model`: primary key and timestamps
    /// join the exclude set, and an include list takes over the relationship
    /// selection with its nested entries.
    pub(crate) fn normalized(&self, model: &Model) -> Result<SchemaSpec, ConfigError> {
        let mut spec = self.clone();
        if spec.exclude_pk {
            let pk = model.single_pk()?.name.clone();
            spec.exclude = spec.exclude.field(&pk);
        }
        if spec.exclude_timestamps {
            spec.exclude = spec.exclude.field("created_at").field("updated_at");
        }
        spec.exclude_pk = false;
        spec.exclude_timestamps = false;
        if let Some(include) = &spec.include {
            if include.is_empty() {
                spec.include = None;
            } else {
                spec.relationships = include.nested_only();
            }
        }
        Ok(spec)
    }

    /// Deterministic text form; structurally equal specs encode identically.
    pub fn canonical(&self) -> String {
        let mut enc = String::new();
        if !self.exclude.is_empty() {
            enc.push_str(&format!("-({})", self.exclude.encode()));
        }
        if let Some(include) = self.include.as_ref().filter(|i| !i.is_empty()) {
            enc.push_str(&format!("+({})", include.encode()));
        }
        if !self.relationships.is_empty() {
            enc.push_str(&format!("&({})", self.relationships.encode()));
        }
        if !self.extras.is_empty() {
            enc.push_str(&format!("!({})", self.extras.encode()));
        }
        if self.all_optional {
            enc.push('?');
        }
        if self.include_virtuals {
            enc.push('*');
        }
        if !self.use_dynamic_relationships {
            enc.push('!');
        }
        if self.exclude_pk {
            enc.push_str("#pk");
        }
        if self.exclude_timestamps {
            enc.push_str("#ts");
        }
        enc
    }

    /// Short digest of [`canonical`](SchemaSpec::canonical).
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        let hex = format!("{:x}", hasher.finalize());
        hex[..8].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_paths_build_nested_sets() {
        let set = FieldSet::from(["messages.text", "messages.tags.name", "title"]);
        assert!(set.contains_leaf("title"));
        let messages = set.child("messages");
        assert!(messages.contains_leaf("text"));
        assert!(messages.child("tags").contains_leaf("name"));
    }

    #[test]
    fn canonical_ignores_insertion_order() {
        let a = SchemaSpec::default()
            .exclude(["b", "a"])
            .relationships(FieldSet::new().nested("messages", ["tags", "post"]));
        let b = SchemaSpec::default()
            .relationships(FieldSet::new().nested("messages", ["post", "tags"]))
            .exclude(["a", "b"]);
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), "-(a,b)&(messages[post,tags])?*");
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 8);
    }

    #[test]
    fn lazy_flag_is_not_encoded() {
        let a = SchemaSpec::default();
        let b = SchemaSpec::default().lazy_first_level(true);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn off_entries_do_not_count() {
        let a = SchemaSpec::default().relationships(FieldSet::new().off("messages"));
        assert_eq!(a.canonical(), SchemaSpec::default().canonical());
        assert!(!a.relationships.contains("messages"));
    }

    #[test]
    fn extras_encode_their_types() {
        let spec = SchemaSpec::default().all_optional(false).extras(
            Extras::new()
                .field("score", FieldType::optional(ColumnType::Float.into()))
                .nested("messages", Extras::new().field("n", ColumnType::Integer)),
        );
        assert_eq!(spec.canonical(), "!(messages[n:int],score:float?)*");
    }

    #[test]
    fn merge_keeps_nested_over_plain() {
        let mut a = FieldSet::from(["messages"]);
        a.merge(FieldSet::from(["messages.tags"]));
        assert!(a.child("messages").contains("tags"));
        a.merge(FieldSet::from(["messages"]));
        assert!(a.child("messages").contains("tags"));
    }
}
