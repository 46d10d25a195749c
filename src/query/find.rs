use super::Select;
use crate::error::AppError;
use crate::model::FilterValue;
use crate::settings::Settings;
use serde_json::Value;

/// Largest LIMIT/OFFSET literal SQLite accepts.
pub(crate) const MAX_BOUND: u64 = i64::MAX as u64;

/// `page[size]` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Count(u64),
    All,
}

/// Everything a list request can ask for.
#[derive(Debug, Clone, Default)]
pub struct FindParams {
    pub include: Vec<String>,
    pub filters: Vec<(String, FilterValue)>,
    pub sort: Vec<String>,
    pub page: Option<u64>,
    pub size: Option<PageSize>,
}

impl Select {
    /// includes -> query_by -> sort -> paginate. The order matters: scopes may rely
    /// on state added by includes, and pagination must see the final ordering.
    pub fn find(self, params: &FindParams, settings: &Settings) -> Result<Self, AppError> {
        Ok(self
            .includes(&params.include)?
            .query_by(&params.filters, settings)?
            .sort(&params.sort)?
            .paginate(params.page, params.size))
    }

    /// Offset/limit when both page and a numeric size are given.
    ///
    /// Both are capped at `i64::MAX`, the largest value SQLite accepts; an offset
    /// past it simply yields an empty page.
    pub fn paginate(self, page: Option<u64>, size: Option<PageSize>) -> Self {
        match (page, size) {
            (Some(page), Some(PageSize::Count(size))) => {
                let size = size.min(MAX_BOUND);
                let skip = page
                    .saturating_sub(1)
                    .checked_mul(size)
                    .map_or(MAX_BOUND, |skip| skip.min(MAX_BOUND));
                self.offset(skip).limit(size)
            }
            _ => self,
        }
    }

    /// Primary-key lookup with eager loading.
    pub fn find_id<S: AsRef<str>>(self, id: Value, include: &[S]) -> Result<Self, AppError> {
        let q = self.includes(include)?;
        let pk = q.model().single_pk()?.name.clone();
        let condition = q.col(&pk).eq(id);
        Ok(q.filter(condition))
    }
}
