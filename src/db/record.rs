use crate::query::NodeLayout;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Loaded state of one relationship on a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

/// A row of a model. Relationships that were not eagerly loaded are absent
/// from `relations`, which is what lazy schema fields key off.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub model: String,
    pub values: Map<String, Value>,
    pub relations: BTreeMap<String, Relation>,
}

impl Record {
    pub fn new(model: impl Into<String>) -> Self {
        Record {
            model: model.into(),
            values: Map::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Sets a value, typically an extra field computed by a handler.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn is_loaded(&self, relationship: &str) -> bool {
        self.relations.contains_key(relationship)
    }

    pub fn relation(&self, relationship: &str) -> Option<&Relation> {
        self.relations.get(relationship)
    }

    pub fn set_relation(&mut self, relationship: impl Into<String>, relation: Relation) {
        self.relations.insert(relationship.into(), relation);
    }

    /// The related record of a loaded to-one relationship.
    pub fn one(&self, relationship: &str) -> Option<&Record> {
        match self.relations.get(relationship) {
            Some(Relation::One(Some(r))) => Some(r),
            _ => None,
        }
    }

    /// Records of a loaded to-many relationship; empty when not loaded.
    pub fn many(&self, relationship: &str) -> &[Record] {
        match self.relations.get(relationship) {
            Some(Relation::Many(v)) => v,
            _ => &[],
        }
    }

    /// Builds a record (and its joined to-one relations) from a flat row.
    /// Returns `None` when the primary key is null, i.e. an unmatched LEFT JOIN.
    pub(crate) fn hydrate(layout: &NodeLayout, row: &mut impl Iterator<Item = Value>) -> Option<Record> {
        let mut record = Record::new(layout.model.name.clone());
        let mut pk_null = false;
        for (i, (name, _)) in layout.fields.iter().enumerate() {
            let v = row.next().unwrap_or(Value::Null);
            if layout.pk_index == Some(i) && v.is_null() {
                pk_null = true;
            }
            record.values.insert(name.clone(), v);
        }
        for (name, child) in &layout.joined {
            let related = Record::hydrate(child, row).map(Box::new);
            record.relations.insert(name.clone(), Relation::One(related));
        }
        if pk_null {
            None
        } else {
            Some(record)
        }
    }
}

/// Map key for grouping rows by a column value.
pub(crate) fn key_of(v: &Value) -> String {
    v.to_string()
}
