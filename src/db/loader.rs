//! Eager loading of relationships for already fetched records.

use super::record::{key_of, Record, Relation};
use super::{BoxFuture, Session};
use crate::error::AppError;
use crate::model::{Link, Model};
use crate::query::{qualified, quoted, Expr, Fragment, LoadNode, LoadPlan, Select, Strategy};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Parent keys bound per `IN (...)`, well below SQLite's bound-parameter limit.
pub(crate) const BATCH_SIZE: usize = 500;

impl Session {
    /// Walks `plan` over `records`. Joined relations are already hydrated and only
    /// recursed into; batch relations cost one statement per node and level.
    pub(crate) fn load_relations<'a>(
        &'a mut self,
        model: Arc<Model>,
        mut records: Vec<Record>,
        plan: &'a LoadPlan,
    ) -> BoxFuture<'a, Result<Vec<Record>, AppError>> {
        Box::pin(async move {
            if records.is_empty() {
                return Ok(records);
            }
            for node in &plan.nodes {
                match node.strategy {
                    Strategy::SelectIn => self.batch_load(&model, &mut records, node).await?,
                    Strategy::Joined if !node.children.is_empty() => {
                        let name = &node.relationship.name;
                        let mut owners = Vec::new();
                        let mut children = Vec::new();
                        for (i, r) in records.iter_mut().enumerate() {
                            if let Some(Relation::One(Some(child))) = r.relations.remove(name) {
                                owners.push(i);
                                children.push(*child);
                            } else {
                                r.relations.insert(name.clone(), Relation::One(None));
                            }
                        }
                        let target = self.registry().model(&node.relationship.target)?.clone();
                        let children = self.load_relations(target, children, &node.children).await?;
                        for (i, child) in owners.into_iter().zip(children) {
                            records[i].set_relation(name.clone(), Relation::One(Some(Box::new(child))));
                        }
                    }
                    Strategy::Joined => {}
                }
            }
            Ok(records)
        })
    }

    async fn batch_load(&mut self, model: &Model, records: &mut [Record], node: &LoadNode) -> Result<(), AppError> {
        let rel = &node.relationship;
        let registry = self.registry().clone();
        let target = registry.model(&rel.target)?.clone();
        let target_pk = target.single_pk()?.name.clone();
        let base = Select::new(&registry, &target.name)?.with_plan(node.children.clone());
        let order = Expr::column(&target.table, &target_pk).asc();

        let (parent_key, child_key) = match &rel.link {
            Link::HasForeign { fk } => (model.single_pk()?.name.clone(), ChildKey::Column(fk.clone())),
            Link::BelongsTo { fk } => (fk.clone(), ChildKey::Column(target_pk.clone())),
            Link::Secondary { .. } => (model.single_pk()?.name.clone(), ChildKey::Owner),
        };
        let keys = distinct_values(records, &parent_key);

        // Every child of one parent key lands in the same batch, so groups stay ordered.
        let mut groups: HashMap<String, Vec<Record>> = HashMap::new();
        for batch in keys.chunks(BATCH_SIZE) {
            let query = match &rel.link {
                Link::HasForeign { fk } => base
                    .clone()
                    .filter(Expr::column(&target.table, fk).in_list(batch.to_vec())),
                Link::BelongsTo { .. } => base
                    .clone()
                    .filter(Expr::column(&target.table, &target_pk).in_list(batch.to_vec())),
                Link::Secondary { table, local, remote } => {
                    let owner_ty = model.single_pk()?.ty;
                    let link_alias = format!("_link_{}", table);
                    let clause = Fragment::raw(
                        format!(
                            "INNER JOIN {} AS {} ON {} = {}",
                            quoted(table),
                            quoted(&link_alias),
                            qualified(&link_alias, remote),
                            qualified(&target.table, &target_pk)
                        ),
                        Vec::new(),
                    );
                    base.clone()
                        .push_join(&link_alias, &link_alias, clause)
                        .filter(Expr::column(&link_alias, local).in_list(batch.to_vec()))
                        .with_owner(qualified(&link_alias, local), owner_ty)
                }
            };
            let rows = self.fetch_owned(query.order_by(order.clone())).await?;
            for (owner, child) in rows {
                let key = match &child_key {
                    ChildKey::Owner => owner.as_ref().map(key_of),
                    ChildKey::Column(c) => child.get(c).map(key_of),
                };
                if let Some(key) = key {
                    groups.entry(key).or_default().push(child);
                }
            }
        }

        for r in records.iter_mut() {
            let related = r
                .get(&parent_key)
                .filter(|v| !v.is_null())
                .and_then(|v| groups.get(&key_of(v)))
                .cloned()
                .unwrap_or_default();
            let relation = if rel.is_many() {
                Relation::Many(related)
            } else {
                Relation::One(related.into_iter().next().map(Box::new))
            };
            r.set_relation(rel.name.clone(), relation);
        }
        Ok(())
    }
}

enum ChildKey {
    /// The `_owner` column selected through the association table.
    Owner,
    Column(String),
}

fn distinct_values(records: &[Record], column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|r| r.get(column))
        .filter(|v| !v.is_null() && seen.insert(key_of(v)))
        .cloned()
        .collect()
}
