//! Select builder and the filter / sort / include / pagination pipeline.
//!
//! A [`Select`] is a value: every builder method consumes it and returns the
//! extended query, so scopes can be plain functions `Select -> Result<Select>`.

pub mod expr;
mod filter;
mod find;
mod include;
mod sort;

pub use expr::{qualified, quoted, Expr, Fragment, QueryBuf};
pub use find::{FindParams, PageSize};
pub(crate) use find::MAX_BOUND;
pub use include::{LoadNode, LoadPlan, Strategy};

use crate::error::{AppError, ConfigError};
use crate::model::{ColumnType, Link, Model, Registry};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct JoinClause {
    path: String,
    alias: String,
    clause: Fragment,
}

#[derive(Clone)]
pub struct Select {
    registry: Arc<Registry>,
    model: Arc<Model>,
    joins: Vec<JoinClause>,
    conditions: Vec<Fragment>,
    order: Vec<Fragment>,
    distinct: bool,
    limit: Option<u64>,
    offset: Option<u64>,
    plan: LoadPlan,
    /// Batch loading: expression selected first to group children by parent key.
    owner: Option<(String, ColumnType)>,
}

impl std::fmt::Debug for Select {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Select")
            .field("model", &self.model.name)
            .field("joins", &self.joins)
            .field("conditions", &self.conditions)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("plan", &self.plan)
            .finish()
    }
}

/// Column positions of one model inside a flat result row.
#[derive(Debug, Clone)]
pub(crate) struct NodeLayout {
    pub model: Arc<Model>,
    pub fields: Vec<(String, ColumnType)>,
    pub pk_index: Option<usize>,
    /// Joined to-one relations hydrated from the same row.
    pub joined: Vec<(String, NodeLayout)>,
}

#[derive(Debug, Clone)]
pub(crate) struct RowLayout {
    pub owner: Option<ColumnType>,
    pub root: NodeLayout,
}

impl NodeLayout {
    fn push_shape(&self, out: &mut Vec<ColumnType>) {
        out.extend(self.fields.iter().map(|(_, t)| *t));
        for (_, child) in &self.joined {
            child.push_shape(out);
        }
    }
}

impl RowLayout {
    pub fn shape(&self) -> Vec<ColumnType> {
        let mut out = Vec::new();
        if let Some(t) = self.owner {
            out.push(t);
        }
        self.root.push_shape(&mut out);
        out
    }
}

impl Select {
    pub fn new(registry: &Arc<Registry>, model: &str) -> Result<Self, ConfigError> {
        let model = registry.model(model)?.clone();
        Ok(Select {
            registry: registry.clone(),
            model,
            joins: Vec::new(),
            conditions: Vec::new(),
            order: Vec::new(),
            distinct: false,
            limit: None,
            offset: None,
            plan: LoadPlan::default(),
            owner: None,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn table(&self) -> &str {
        &self.model.table
    }

    /// Column of the selected model.
    pub fn col(&self, name: &str) -> Expr {
        Expr::column(&self.model.table, name)
    }

    /// Column of a table joined through `path` (see [`Select::join`]).
    pub fn joined_col(&self, path: &str, name: &str) -> Option<Expr> {
        self.alias_of(path).map(|alias| Expr::column(alias, name))
    }

    pub fn alias_of(&self, path: &str) -> Option<&str> {
        self.joins
            .iter()
            .find(|j| j.path == path)
            .map(|j| j.alias.as_str())
    }

    pub fn filter(mut self, condition: Fragment) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn order_by(mut self, term: Fragment) -> Self {
        self.order.push(term);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn limits(&self) -> (Option<u64>, Option<u64>) {
        (self.limit, self.offset)
    }

    pub fn without_pagination(mut self) -> Self {
        self.limit = None;
        self.offset = None;
        self
    }

    pub fn plan(&self) -> &LoadPlan {
        &self.plan
    }

    pub(crate) fn with_plan(mut self, plan: LoadPlan) -> Self {
        self.plan = plan;
        self
    }

    pub(crate) fn with_owner(mut self, sql: String, ty: ColumnType) -> Self {
        self.owner = Some((sql, ty));
        self
    }

    pub(crate) fn push_join(mut self, path: &str, alias: &str, clause: Fragment) -> Self {
        self.joins.push(JoinClause {
            path: path.to_string(),
            alias: alias.to_string(),
            clause,
        });
        self
    }

    /// Inner-joins the relationship chain `path` (dot separated). Joining the same
    /// path twice is a no-op. Each joined table is aliased by its table name, so
    /// scopes can address it with [`Expr::column`] or [`Select::joined_col`].
    pub fn join(self, path: &str) -> Result<Self, AppError> {
        self.join_kind(path, "INNER JOIN")
    }

    pub fn left_join(self, path: &str) -> Result<Self, AppError> {
        self.join_kind(path, "LEFT JOIN")
    }

    fn join_kind(mut self, path: &str, kind: &str) -> Result<Self, AppError> {
        let mut current = self.model.clone();
        let mut from_alias = self.model.table.clone();
        let mut prefix = String::new();
        for seg in path.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            let (_, rel) = self
                .registry
                .resolve_relationship(&current.name, seg)
                .ok_or_else(|| ConfigError::UnknownRelationship {
                    model: current.name.clone(),
                    relationship: seg.to_string(),
                })?;
            let rel = rel.clone();
            prefix.push_str(&rel.name);
            let target = self.registry.model(&rel.target)?.clone();
            if let Some(alias) = self.alias_of(&prefix) {
                from_alias = alias.to_string();
                current = target;
                continue;
            }
            let alias = self.fresh_alias(&target.table);
            let target_pk = target.single_pk()?.name.clone();
            let mut clause = match &rel.link {
                Link::BelongsTo { fk } => Fragment::raw(
                    format!(
                        "{} {} AS {} ON {} = {}",
                        kind,
                        quoted(&target.table),
                        quoted(&alias),
                        qualified(&alias, &target_pk),
                        qualified(&from_alias, fk)
                    ),
                    Vec::new(),
                ),
                Link::HasForeign { fk } => {
                    let pk = current.single_pk()?.name.clone();
                    Fragment::raw(
                        format!(
                            "{} {} AS {} ON {} = {}",
                            kind,
                            quoted(&target.table),
                            quoted(&alias),
                            qualified(&alias, fk),
                            qualified(&from_alias, &pk)
                        ),
                        Vec::new(),
                    )
                }
                Link::Secondary { table, local, remote } => {
                    let pk = current.single_pk()?.name.clone();
                    let link_alias = self.fresh_alias(table);
                    Fragment::raw(
                        format!(
                            "{kind} {} AS {} ON {} = {} {kind} {} AS {} ON {} = {}",
                            quoted(table),
                            quoted(&link_alias),
                            qualified(&link_alias, local),
                            qualified(&from_alias, &pk),
                            quoted(&target.table),
                            quoted(&alias),
                            qualified(&alias, &target_pk),
                            qualified(&link_alias, remote),
                        ),
                        Vec::new(),
                    )
                }
            };
            if let Some((disc, identity)) = discriminator(&self.registry, &target) {
                clause.sql.push_str(&format!(" AND {} = ?", qualified(&alias, &disc)));
                clause.params.push(Value::String(identity));
            }
            self = self.push_join(&prefix, &alias, clause);
            from_alias = alias;
            current = target;
        }
        Ok(self)
    }

    fn fresh_alias(&self, table: &str) -> String {
        let taken = |a: &str| a == self.model.table || self.joins.iter().any(|j| j.alias == a || j.clause.sql.contains(&format!("AS {}", quoted(a))));
        if !taken(table) {
            return table.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", table, n);
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Renders the SELECT together with the layout needed to hydrate its rows.
    pub(crate) fn render(&self) -> Result<(QueryBuf, RowLayout), AppError> {
        let mut q = QueryBuf::new();
        let mut select_list: Vec<(String, Vec<Value>)> = Vec::new();
        if let Some((sql, _)) = &self.owner {
            select_list.push((format!("{} AS \"_owner\"", sql), Vec::new()));
        }
        let mut counter = 0usize;
        let mut load_joins: Vec<Fragment> = Vec::new();
        let root = self.layout_node(
            &self.model,
            &self.model.table,
            &self.plan,
            &mut select_list,
            &mut load_joins,
            &mut counter,
        )?;

        q.push_str(if self.distinct { "SELECT DISTINCT " } else { "SELECT " });
        for (i, (sql, params)) in select_list.iter().enumerate() {
            if i > 0 {
                q.push_str(", ");
            }
            q.push_sql(sql, params);
        }
        q.push_str(" FROM ");
        q.push_str(&quoted(&self.model.table));
        for j in &self.joins {
            q.push_str(" ");
            q.push(&j.clause);
        }
        for j in &load_joins {
            q.push_str(" ");
            q.push(j);
        }
        self.push_where(&mut q);
        if !self.order.is_empty() {
            q.push_str(" ORDER BY ");
            for (i, term) in self.order.iter().enumerate() {
                if i > 0 {
                    q.push_str(", ");
                }
                q.push(term);
            }
        }
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => q.push_str(&format!(" LIMIT {} OFFSET {}", l, o)),
            (Some(l), None) => q.push_str(&format!(" LIMIT {}", l)),
            (None, Some(o)) => q.push_str(&format!(" LIMIT -1 OFFSET {}", o)),
            (None, None) => {}
        }
        Ok((
            q,
            RowLayout {
                owner: self.owner.as_ref().map(|(_, t)| *t),
                root,
            },
        ))
    }

    /// `SELECT COUNT(*)` over the filtered rows, ignoring order and pagination.
    pub(crate) fn render_count(&self) -> QueryBuf {
        let mut q = QueryBuf::new();
        q.push_str("SELECT COUNT(*) FROM (");
        q.push_str(if self.distinct { "SELECT DISTINCT " } else { "SELECT " });
        q.push_str(&format!("{}.*", quoted(&self.model.table)));
        q.push_str(" FROM ");
        q.push_str(&quoted(&self.model.table));
        for j in &self.joins {
            q.push_str(" ");
            q.push(&j.clause);
        }
        self.push_where(&mut q);
        q.push_str(") AS \"sub\"");
        q
    }

    fn push_where(&self, q: &mut QueryBuf) {
        let mut conditions = self.conditions.clone();
        if let Some((disc, identity)) = discriminator(&self.registry, &self.model) {
            conditions.insert(0, self.col(&disc).eq(identity));
        }
        if !conditions.is_empty() {
            q.push_str(" WHERE ");
            q.push(&Fragment::and(conditions));
        }
    }

    fn layout_node(
        &self,
        model: &Arc<Model>,
        alias: &str,
        plan: &LoadPlan,
        select_list: &mut Vec<(String, Vec<Value>)>,
        load_joins: &mut Vec<Fragment>,
        counter: &mut usize,
    ) -> Result<NodeLayout, AppError> {
        let mut fields = Vec::new();
        let mut pk_index = None;
        for c in model.select_columns() {
            if c.primary_key && pk_index.is_none() {
                pk_index = Some(fields.len());
            }
            select_list.push((qualified(alias, &c.name), Vec::new()));
            fields.push((c.name.clone(), c.ty));
        }
        for (v, sql) in model.expression_virtuals() {
            select_list.push((format!("({})", sql.replace("{table}", &quoted(alias))), Vec::new()));
            fields.push((v.name.clone(), v.ty));
        }

        let mut joined = Vec::new();
        for node in plan.nodes.iter().filter(|n| n.strategy == Strategy::Joined) {
            let target = self.registry.model(&node.relationship.target)?.clone();
            *counter += 1;
            let child_alias = format!("_j{}", counter);
            let target_pk = target.single_pk()?.name.clone();
            let on = match &node.relationship.link {
                Link::BelongsTo { fk } => format!(
                    "{} = {}",
                    qualified(&child_alias, &target_pk),
                    qualified(alias, fk)
                ),
                Link::HasForeign { fk } => {
                    let pk = model.single_pk()?.name.clone();
                    format!("{} = {}", qualified(&child_alias, fk), qualified(alias, &pk))
                }
                Link::Secondary { .. } => {
                    return Err(AppError::Internal(format!(
                        "relationship {} cannot be join-loaded",
                        node.relationship.name
                    )))
                }
            };
            let mut clause = Fragment::raw(
                format!(
                    "LEFT JOIN {} AS {} ON {}",
                    quoted(&target.table),
                    quoted(&child_alias),
                    on
                ),
                Vec::new(),
            );
            if let Some((disc, identity)) = discriminator(&self.registry, &target) {
                clause.sql.push_str(&format!(" AND {} = ?", qualified(&child_alias, &disc)));
                clause.params.push(Value::String(identity));
            }
            load_joins.push(clause);
            let child = self.layout_node(&target, &child_alias, &node.children, select_list, load_joins, counter)?;
            joined.push((node.relationship.name.clone(), child));
        }

        Ok(NodeLayout {
            model: model.clone(),
            fields,
            pk_index,
            joined,
        })
    }
}

/// `(discriminator column, identity)` when `model` is a polymorphic variant.
fn discriminator(registry: &Registry, model: &Model) -> Option<(String, String)> {
    let inh = model.inherits.as_ref()?;
    let base = registry.model(&inh.base).ok()?;
    let poly = base.polymorphic.as_ref()?;
    Some((poly.discriminator.clone(), inh.identity.clone()))
}
