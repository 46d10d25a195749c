//! Eager-load directives built from `include=` paths.

use super::Select;
use crate::error::AppError;
use crate::model::{Link, Relationship};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// LEFT JOIN in the parent statement; to-one relationships.
    Joined,
    /// One batched `IN (...)` statement per level; to-many relationships.
    SelectIn,
}

#[derive(Debug, Clone)]
pub struct LoadNode {
    pub relationship: Relationship,
    pub strategy: Strategy,
    pub children: LoadPlan,
}

#[derive(Debug, Clone, Default)]
pub struct LoadPlan {
    pub nodes: Vec<LoadNode>,
}

impl LoadPlan {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, relationship: &str) -> Option<&LoadNode> {
        self.nodes.iter().find(|n| n.relationship.name == relationship)
    }

    /// Inserts a chain, merging with nodes already present for the same relationships.
    fn insert(&mut self, chain: &[Relationship]) {
        let Some((first, rest)) = chain.split_first() else {
            return;
        };
        if let Some(pos) = self.nodes.iter().position(|n| n.relationship.name == first.name) {
            self.nodes[pos].children.insert(rest);
            return;
        }
        let mut node = LoadNode {
            relationship: first.clone(),
            strategy: strategy_for(first),
            children: LoadPlan::default(),
        };
        node.children.insert(rest);
        self.nodes.push(node);
    }

    /// Dotted paths of every node, depth first.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for n in &self.nodes {
            out.push(n.relationship.name.clone());
            for child in n.children.paths() {
                out.push(format!("{}.{}", n.relationship.name, child));
            }
        }
        out
    }
}

fn strategy_for(rel: &Relationship) -> Strategy {
    match (&rel.link, rel.is_many()) {
        (Link::Secondary { .. }, _) | (_, true) => Strategy::SelectIn,
        _ => Strategy::Joined,
    }
}

impl Select {
    /// Adds eager loading for each dotted relationship path.
    ///
    /// `"*"` loads every direct relationship of the model with batch loading and
    /// ignores the other paths; nothing below the first level is loaded.
    /// A segment that does not name a relationship fails with
    /// `422 Invalid relationship <segment>`.
    pub fn includes<S: AsRef<str>>(mut self, paths: &[S]) -> Result<Self, AppError> {
        if paths.iter().any(|p| p.as_ref().trim() == "*") {
            let rels = self.model().relationships.clone();
            for rel in rels {
                if self.plan.get(&rel.name).is_none() {
                    self.plan.nodes.push(LoadNode {
                        relationship: rel,
                        strategy: Strategy::SelectIn,
                        children: LoadPlan::default(),
                    });
                }
            }
            return Ok(self);
        }
        for path in paths {
            let path = path.as_ref().trim();
            if path.is_empty() {
                continue;
            }
            let chain = self.resolve_chain(path)?;
            self.plan.insert(&chain);
        }
        Ok(self)
    }

    fn resolve_chain(&self, path: &str) -> Result<Vec<Relationship>, AppError> {
        let registry = self.registry().clone();
        let mut model = self.model().name.clone();
        let mut chain = Vec::new();
        for seg in path.split('.') {
            let (_, rel) = registry
                .resolve_relationship(&model, seg)
                .ok_or_else(|| AppError::Validation(format!("Invalid relationship {}", seg)))?;
            model = rel.target.clone();
            chain.push(rel.clone());
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::AppError;
    use crate::query::tests::blog;
    use crate::query::{Select, Strategy};

    #[test]
    fn strategies_follow_cardinality() {
        let reg = blog();
        let q = Select::new(&reg, "Message")
            .unwrap()
            .includes(&["post.messages", "tags"])
            .unwrap();
        let post = q.plan().get("post").unwrap();
        assert_eq!(post.strategy, Strategy::Joined);
        assert_eq!(post.children.get("messages").unwrap().strategy, Strategy::SelectIn);
        assert_eq!(q.plan().get("tags").unwrap().strategy, Strategy::SelectIn);
        let (buf, _) = q.render().unwrap();
        assert!(buf.sql.contains("LEFT JOIN \"post\" AS \"_j1\""));
    }

    #[test]
    fn paths_merge_and_trim() {
        let reg = blog();
        let q = Select::new(&reg, "Post")
            .unwrap()
            .includes(&["messages.tags", " messages.post "])
            .unwrap();
        assert_eq!(q.plan().nodes.len(), 1);
        assert_eq!(q.plan().paths(), vec!["messages", "messages.tags", "messages.post"]);
    }

    #[test]
    fn wildcard_is_one_level() {
        let reg = blog();
        let q = Select::new(&reg, "Message")
            .unwrap()
            .includes(&["*", "nope"])
            .unwrap();
        assert_eq!(q.plan().nodes.len(), 2);
        assert!(q.plan().nodes.iter().all(|n| n.children.is_empty()));
    }

    #[test]
    fn invalid_segment_names_the_segment() {
        let reg = blog();
        let err = Select::new(&reg, "Post")
            .unwrap()
            .includes(&["messages.nope"])
            .unwrap_err();
        match err {
            AppError::Validation(msg) => assert_eq!(msg, "Invalid relationship nope"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
