use super::{
    Column, FilterScope, Link, Model, Polymorphic, Queryable, Relationship, SortScope, Virtual,
};
use crate::case::to_snake_case;
use crate::error::ConfigError;
use crate::schema::Schema;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A resolved model attribute.
#[derive(Debug, Clone)]
pub enum Attr {
    Column(Column),
    /// `owner` is the model declaring the relationship (a variant when reached through its base).
    Relationship { owner: String, relationship: Relationship },
    Virtual(Virtual),
}

#[derive(Default)]
struct AttributeTable {
    attrs: HashMap<String, Attr>,
    filters: HashMap<String, FilterScope>,
    sorts: HashMap<String, SortScope>,
    /// `None` when the model is not queryable.
    queryable: Option<HashSet<String>>,
}

/// Frozen set of models plus everything derived from them at startup:
/// attribute tables for key resolution and the compiled schema cache.
pub struct Registry {
    models: HashMap<String, Arc<Model>>,
    order: Vec<String>,
    tables: HashMap<String, AttributeTable>,
    pub(crate) schemas: Mutex<HashMap<String, Arc<Schema>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("models", &self.order).finish()
    }
}

impl Registry {
    /// Validates the declarations and freezes them.
    ///
    /// Checks: unique names, a primary key on every model, variants pointing at a
    /// polymorphic base, relationship targets, back-references in both directions
    /// and link columns.
    pub fn build(models: Vec<Model>) -> Result<Arc<Registry>, ConfigError> {
        let mut declared: HashMap<String, Model> = HashMap::new();
        let mut order = Vec::with_capacity(models.len());
        for m in models {
            if declared.contains_key(&m.name) {
                return Err(ConfigError::Load(format!("duplicate model {}", m.name)));
            }
            order.push(m.name.clone());
            declared.insert(m.name.clone(), m);
        }

        for name in &order {
            let m = &declared[name];
            if let Some(inh) = &m.inherits {
                let base_ok = declared
                    .get(&inh.base)
                    .map(|b| b.polymorphic.is_some() && b.inherits.is_none())
                    .unwrap_or(false);
                if !base_ok {
                    return Err(ConfigError::InvalidInheritance {
                        variant: m.name.clone(),
                        base: inh.base.clone(),
                    });
                }
            } else if m.primary_keys().is_empty() {
                return Err(ConfigError::MissingPrimaryKey(m.name.clone()));
            }
        }

        let merged = merge_variants(&declared, &order);
        for name in &order {
            validate_relationships(&declared[name], &merged)?;
        }

        let mut tables = HashMap::new();
        for name in &order {
            tables.insert(name.clone(), attribute_table(&merged[name], &merged));
        }

        let models = merged.into_iter().map(|(k, v)| (k, Arc::new(v))).collect();
        Ok(Arc::new(Registry {
            models,
            order,
            tables,
            schemas: Mutex::new(HashMap::new()),
        }))
    }

    pub fn model(&self, name: &str) -> Result<&Arc<Model>, ConfigError> {
        self.models
            .get(name)
            .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))
    }

    /// Models in declaration order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.order.iter().filter_map(|n| self.models.get(n))
    }

    /// Resolves `key` on `model`: verbatim first, then snake_cased. Each attempt
    /// looks at the model's own attributes before its polymorphic variants.
    pub fn resolve(&self, model: &str, key: &str) -> Option<&Attr> {
        let table = self.tables.get(model)?;
        lookup(&table.attrs, key)
    }

    pub fn resolve_column(&self, model: &str, key: &str) -> Option<&Column> {
        match self.resolve(model, key) {
            Some(Attr::Column(c)) => Some(c),
            _ => None,
        }
    }

    /// Resolves a relationship, returning it with the model that declares it.
    pub fn resolve_relationship(&self, model: &str, key: &str) -> Option<(&str, &Relationship)> {
        match self.resolve(model, key) {
            Some(Attr::Relationship { owner, relationship }) => Some((owner.as_str(), relationship)),
            _ => None,
        }
    }

    pub fn filter_scope(&self, model: &str, key: &str) -> Option<&FilterScope> {
        let table = self.tables.get(model)?;
        lookup(&table.filters, key)
    }

    pub fn sort_scope(&self, model: &str, key: &str) -> Option<&SortScope> {
        let table = self.tables.get(model)?;
        lookup(&table.sorts, key)
    }

    /// Queryable column names, `None` when the model was not declared queryable.
    pub fn queryable_columns(&self, model: &str) -> Option<&HashSet<String>> {
        self.tables.get(model)?.queryable.as_ref()
    }

    pub fn schema_cache_len(&self) -> usize {
        self.schemas.lock().len()
    }
}

fn lookup<'a, T>(map: &'a HashMap<String, T>, key: &str) -> Option<&'a T> {
    map.get(key).or_else(|| {
        let snake = to_snake_case(key);
        if snake == key {
            None
        } else {
            map.get(&snake)
        }
    })
}

/// Copies base attributes into variants and variant columns into the base table.
fn merge_variants(declared: &HashMap<String, Model>, order: &[String]) -> HashMap<String, Model> {
    let mut merged: HashMap<String, Model> = declared.clone();
    for name in order {
        let variant = &declared[name];
        let Some(inh) = &variant.inherits else { continue };
        let base = &declared[&inh.base];

        let mut columns = base.columns.clone();
        let own_columns: Vec<Column> = variant
            .columns
            .iter()
            .filter(|c| base.column(&c.name).is_none())
            .cloned()
            .collect();
        columns.extend(own_columns.iter().cloned());

        let mut relationships = base.relationships.clone();
        relationships.extend(variant.relationships.iter().cloned());
        let mut virtuals = base.virtuals.clone();
        virtuals.extend(variant.virtuals.iter().cloned());
        let mut filter_scopes = base.filter_scopes.clone();
        filter_scopes.extend(variant.filter_scopes.clone());
        let mut sort_scopes = base.sort_scopes.clone();
        sort_scopes.extend(variant.sort_scopes.clone());

        let queryable = match (&base.queryable, &variant.queryable) {
            (Queryable::All, _) | (_, Queryable::All) => Queryable::All,
            (Queryable::None, q) | (q, Queryable::None) => q.clone(),
            (Queryable::Columns(a), Queryable::Columns(b)) => {
                Queryable::Columns(a.union(b).cloned().collect())
            }
        };

        if let Some(m) = merged.get_mut(name) {
            m.table = base.table.clone();
            m.columns = columns;
            m.relationships = relationships;
            m.virtuals = virtuals;
            m.filter_scopes = filter_scopes;
            m.sort_scopes = sort_scopes;
            m.queryable = queryable;
            m.timestamps = base.timestamps;
        }
        if let Some(b) = merged.get_mut(&inh.base) {
            for c in own_columns {
                if b.variant_columns.iter().all(|v| v.name != c.name) {
                    b.variant_columns.push(Column { nullable: true, ..c });
                }
            }
            if let Some(Polymorphic { variants, .. }) = b.polymorphic.as_mut() {
                variants.push((inh.identity.clone(), variant.name.clone()));
            }
        }
    }
    merged
}

fn validate_relationships(declared: &Model, merged: &HashMap<String, Model>) -> Result<(), ConfigError> {
    let model = &merged[&declared.name];
    for rel in &declared.relationships {
        let target = merged.get(&rel.target).ok_or_else(|| ConfigError::UnknownTarget {
            model: model.name.clone(),
            relationship: rel.name.clone(),
            target: rel.target.clone(),
        })?;
        let back = rel.back_populates.as_ref().ok_or_else(|| ConfigError::MissingBackReference {
            model: model.name.clone(),
            relationship: rel.name.clone(),
        })?;
        let symmetric = target
            .relationship(back)
            .map(|inverse| {
                inverse.target == model.name && inverse.back_populates.as_deref() == Some(rel.name.as_str())
            })
            .unwrap_or(false);
        if !symmetric {
            return Err(ConfigError::AsymmetricBackReference {
                model: model.name.clone(),
                relationship: rel.name.clone(),
                target: target.name.clone(),
                back: back.clone(),
            });
        }
        let (holder, column) = match &rel.link {
            Link::BelongsTo { fk } => (model, fk),
            Link::HasForeign { fk } => (target, fk),
            Link::Secondary { .. } => continue,
        };
        if holder.column(column).is_none() {
            return Err(ConfigError::UnknownColumn {
                table: holder.table.clone(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

fn attribute_table(model: &Model, merged: &HashMap<String, Model>) -> AttributeTable {
    let mut table = AttributeTable::default();
    let mut sources = vec![model];
    if let Some(poly) = &model.polymorphic {
        sources.extend(poly.variants.iter().filter_map(|(_, v)| merged.get(v)));
    }
    for source in &sources {
        for c in &source.columns {
            table.attrs.entry(c.name.clone()).or_insert_with(|| Attr::Column(c.clone()));
        }
        for r in &source.relationships {
            table.attrs.entry(r.name.clone()).or_insert_with(|| Attr::Relationship {
                owner: source.name.clone(),
                relationship: r.clone(),
            });
        }
        for v in &source.virtuals {
            table.attrs.entry(v.name.clone()).or_insert_with(|| Attr::Virtual(v.clone()));
        }
        for (k, s) in &source.filter_scopes {
            table.filters.entry(k.clone()).or_insert_with(|| s.clone());
        }
        for (k, s) in &source.sort_scopes {
            table.sorts.entry(k.clone()).or_insert_with(|| s.clone());
        }
    }

    let mut queryable: Option<HashSet<String>> = None;
    for source in &sources {
        let names: HashSet<String> = match &source.queryable {
            Queryable::None => continue,
            Queryable::All => source.columns.iter().map(|c| c.name.clone()).collect(),
            Queryable::Columns(set) => set.iter().cloned().collect(),
        };
        queryable.get_or_insert_with(HashSet::new).extend(names);
    }
    table.queryable = queryable;
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, ColumnType};

    fn post() -> Model {
        Model::define("Post", "post")
            .id()
            .column(Column::text("title"))
            .relationship(Relationship::has_many("messages", "Message", "post_id").back_populates("post"))
            .queryable_all()
            .build()
    }

    fn message(back: &str) -> Model {
        Model::define("Message", "message")
            .id()
            .column(Column::text("text"))
            .column(Column::integer("post_id").references("post", "id"))
            .relationship(Relationship::belongs_to("post", "Post", "post_id").back_populates(back))
            .build()
    }

    #[test]
    fn resolves_verbatim_then_snake_case() {
        let reg = Registry::build(vec![post(), message("messages")]).unwrap();
        assert!(matches!(reg.resolve("Message", "post_id"), Some(Attr::Column(_))));
        assert!(matches!(reg.resolve("Message", "postId"), Some(Attr::Column(_))));
        assert!(reg.resolve_relationship("Post", "messages").is_some());
        assert!(reg.resolve("Post", "nothing").is_none());
    }

    #[test]
    fn rejects_asymmetric_back_reference() {
        let err = Registry::build(vec![post(), message("comments")]).unwrap_err();
        assert!(matches!(err, ConfigError::AsymmetricBackReference { .. }));
    }

    #[test]
    fn rejects_missing_back_reference() {
        let lonely = Model::define("Message", "message")
            .id()
            .column(Column::integer("post_id"))
            .relationship(Relationship::belongs_to("post", "Post", "post_id"))
            .build();
        let err = Registry::build(vec![post(), lonely]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingBackReference { .. }));
    }

    #[test]
    fn unknown_model_lookup_fails() {
        let reg = Registry::build(vec![post(), message("messages")]).unwrap();
        assert!(matches!(reg.model("Nope"), Err(ConfigError::UnknownModel(_))));
    }

    #[test]
    fn composite_key_is_rejected_on_use() {
        let link = Model::define("Link", "link")
            .column(Column::integer("a").primary_key())
            .column(Column::integer("b").primary_key())
            .build();
        let reg = Registry::build(vec![link]).unwrap();
        let err = reg.model("Link").unwrap().single_pk().unwrap_err();
        assert!(matches!(err, ConfigError::CompositePrimaryKey(_)));
    }

    #[test]
    fn base_sees_variant_attributes() {
        let base = Model::define("Poly", "poly")
            .id()
            .column(Column::text("type"))
            .polymorphic_on("type")
            .queryable_all()
            .build();
        let a = Model::define("PolyA", "poly")
            .column(Column::new("a", ColumnType::Text))
            .inherits("Poly", "a")
            .queryable_all()
            .build();
        let reg = Registry::build(vec![base, a]).unwrap();
        assert!(reg.resolve_column("Poly", "a").is_some());
        assert!(reg.queryable_columns("Poly").unwrap().contains("a"));
        let variant = reg.model("PolyA").unwrap();
        assert_eq!(variant.table, "poly");
        assert!(variant.column("id").is_some());
        let base = reg.model("Poly").unwrap();
        assert!(base.variant_columns[0].nullable);
    }
}
