//! Named query customisations registered on a model.

use crate::error::AppError;
use crate::query::Select;
use std::sync::Arc;

/// Raw filter value as it arrived on the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    One(String),
    Many(Vec<String>),
}

impl FilterValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FilterValue::One(s) => Some(s),
            FilterValue::Many(_) => None,
        }
    }

    /// Comma-split for a single value, the items for a list.
    pub fn items(&self) -> Vec<&str> {
        match self {
            FilterValue::One(s) => s.split(',').map(str::trim).collect(),
            FilterValue::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::One(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::One(s)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(v: Vec<String>) -> Self {
        FilterValue::Many(v)
    }
}

pub type ScopeResult = Result<Select, AppError>;

#[derive(Clone)]
pub enum FilterScope {
    /// `filter[key]=value`
    Value(Arc<dyn Fn(Select, &FilterValue) -> ScopeResult + Send + Sync>),
    /// `filter[col[json_key]]=value`
    Json(Arc<dyn Fn(Select, &str, &FilterValue) -> ScopeResult + Send + Sync>),
}

#[derive(Clone)]
pub enum SortScope {
    /// `sort=key` / `sort=-key`
    Value(Arc<dyn Fn(Select, bool) -> ScopeResult + Send + Sync>),
    /// `sort=col[json_key]`
    Json(Arc<dyn Fn(Select, &str, bool) -> ScopeResult + Send + Sync>),
}

impl std::fmt::Debug for FilterScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterScope::Value(_) => f.write_str("FilterScope::Value"),
            FilterScope::Json(_) => f.write_str("FilterScope::Json"),
        }
    }
}

impl std::fmt::Debug for SortScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortScope::Value(_) => f.write_str("SortScope::Value"),
            SortScope::Json(_) => f.write_str("SortScope::Json"),
        }
    }
}
