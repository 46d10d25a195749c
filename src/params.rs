//! Request inputs of list and single-record endpoints.
//!
//! `filter[<key>]=v`, `sort=a,-b`, `include=x.y,z`, `page[number]=n`,
//! `page[size]=n|all`, plus the JSON body of writes.

use crate::error::AppError;
use crate::model::FilterValue;
use crate::query::{FindParams, PageSize, MAX_BOUND};
use crate::settings::Settings;
use async_trait::async_trait;
use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    Json,
};
use serde_json::Value;

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn query_pairs<S: Send + Sync>(parts: &mut Parts, state: &S) -> Result<Vec<(String, String)>, AppError> {
    let Query(pairs) = Query::<Vec<(String, String)>>::from_request_parts(parts, state)
        .await
        .map_err(|e| AppError::Validation(format!("invalid query string: {}", e)))?;
    Ok(pairs)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParams {
    pub include: Vec<String>,
    pub filters: Vec<(String, FilterValue)>,
    pub sort: Vec<String>,
    pub page: u64,
    /// `None` when absent or 0: the configured default applies.
    pub size: Option<PageSize>,
}

impl ListParams {
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, AppError> {
        let mut params = ListParams {
            page: 1,
            ..ListParams::default()
        };
        for (key, value) in pairs {
            match key.as_str() {
                "include" => params.include = split_list(value),
                "sort" => params.sort = split_list(value),
                "page[number]" => {
                    params.page = value
                        .trim()
                        .parse::<u64>()
                        .ok()
                        .filter(|n| (1..=MAX_BOUND).contains(n))
                        .ok_or_else(|| AppError::Validation("page[number]: expected a positive integer".to_string()))?;
                }
                "page[size]" => {
                    let raw = value.trim();
                    params.size = if raw == "all" {
                        Some(PageSize::All)
                    } else {
                        match raw.parse::<u64>() {
                            Ok(0) => None,
                            Ok(n) if n <= MAX_BOUND => Some(PageSize::Count(n)),
                            _ => {
                                return Err(AppError::Validation(
                                    "page[size]: expected an integer or \"all\"".to_string(),
                                ))
                            }
                        }
                    };
                }
                k if k.starts_with("filter[") && k.ends_with(']') && k.len() > "filter[]".len() => {
                    let name = k["filter[".len()..k.len() - 1].to_string();
                    params.filters.retain(|(existing, _)| *existing != name);
                    params.filters.push((name, FilterValue::One(value.clone())));
                }
                _ => {}
            }
        }
        Ok(params)
    }

    pub fn page_size(&self, settings: &Settings) -> PageSize {
        self.size.unwrap_or(PageSize::Count(settings.pagination_size))
    }

    /// Full find pipeline input, pagination included.
    pub fn find_params(&self, settings: &Settings) -> FindParams {
        FindParams {
            include: self.include.clone(),
            filters: self.filters.clone(),
            sort: self.sort.clone(),
            page: Some(self.page),
            size: Some(self.page_size(settings)),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ListParams
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let pairs = query_pairs(parts, state).await?;
        ListParams::from_pairs(&pairs)
    }
}

/// `include=` alone, for show / create / update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncludeParams(pub Vec<String>);

#[async_trait]
impl<S> FromRequestParts<S> for IncludeParams
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let pairs = query_pairs(parts, state).await?;
        let include = pairs
            .iter()
            .rev()
            .find(|(k, _)| k == "include")
            .map(|(_, v)| split_list(v))
            .unwrap_or_default();
        Ok(IncludeParams(include))
    }
}

/// A JSON request body. Malformed JSON or a missing `application/json`
/// content type is a validation error in the usual error envelope.
#[derive(Debug, Clone)]
pub struct JsonBody(pub Value);

#[async_trait]
impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        Ok(JsonBody(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_every_parameter() {
        let p = ListParams::from_pairs(&pairs(&[
            ("include", "messages.tags, post"),
            ("sort", "-id,title"),
            ("filter[title]", "a"),
            ("filter[json_field[key]]", "v"),
            ("page[number]", "2"),
            ("page[size]", "5"),
        ]))
        .unwrap();
        assert_eq!(p.include, vec!["messages.tags", "post"]);
        assert_eq!(p.sort, vec!["-id", "title"]);
        assert_eq!(p.filters[0], ("title".to_string(), FilterValue::One("a".into())));
        assert_eq!(p.filters[1].0, "json_field[key]");
        assert_eq!(p.page, 2);
        assert_eq!(p.size, Some(PageSize::Count(5)));
    }

    #[test]
    fn defaults_and_size_all() {
        let settings = Settings::default();
        let p = ListParams::from_pairs(&[]).unwrap();
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size(&settings), PageSize::Count(settings.pagination_size));

        let p = ListParams::from_pairs(&pairs(&[("page[size]", "0")])).unwrap();
        assert_eq!(p.size, None);
        let p = ListParams::from_pairs(&pairs(&[("page[size]", "all")])).unwrap();
        assert_eq!(p.find_params(&settings).size, Some(PageSize::All));
    }

    #[test]
    fn last_filter_value_wins() {
        let p = ListParams::from_pairs(&pairs(&[("filter[a]", "1"), ("filter[a]", "2")])).unwrap();
        assert_eq!(p.filters, vec![("a".to_string(), FilterValue::One("2".into()))]);
    }

    #[test]
    fn malformed_page_numbers_are_rejected() {
        let err = ListParams::from_pairs(&pairs(&[("page[number]", "x")])).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(ListParams::from_pairs(&pairs(&[("page[size]", "-1")])).is_err());
        assert!(ListParams::from_pairs(&pairs(&[("page[number]", "0")])).is_err());
    }

    #[test]
    fn page_values_past_i64_are_rejected() {
        let too_big = (i64::MAX as u64 + 1).to_string();
        let err = ListParams::from_pairs(&pairs(&[("page[number]", too_big.as_str())])).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        assert!(ListParams::from_pairs(&pairs(&[("page[size]", too_big.as_str())])).is_err());
        let max = i64::MAX.to_string();
        let p = ListParams::from_pairs(&pairs(&[("page[number]", max.as_str())])).unwrap();
        assert_eq!(p.page, i64::MAX as u64);
    }
}
