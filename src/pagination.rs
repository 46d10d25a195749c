//! Paginated response envelope: `{"data": [...], "meta": {...}}`.
//!
//! `meta` is omitted entirely when the page size is `all`.

use crate::db::{Record, Session};
use crate::error::AppError;
use crate::query::{PageSize, Select};
use crate::schema::Schema;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total: u64,
    pub page_size: u64,
    pub total_pages: u64,
    pub current_page: u64,
    pub next_page: Option<u64>,
    pub previous_page: Option<u64>,
}

impl PaginationMeta {
    pub fn new(total: u64, page: u64, size: u64) -> Self {
        let total_pages = if size == 0 {
            0
        } else {
            let pages = total / size + 1;
            if total % size == 0 {
                pages - 1
            } else {
                pages
            }
        };
        PaginationMeta {
            total,
            page_size: size,
            total_pages,
            current_page: page,
            next_page: (page < total_pages).then(|| page + 1),
            previous_page: (page > 1).then(|| page - 1),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PaginationMeta>,
}

impl<T> Paginated<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}

impl Paginated<Record> {
    /// Renders `data` with [`Schema::render_model`] and attaches `meta`.
    pub fn render(&self, schema: &Schema) -> Result<Value, AppError> {
        let data = schema.render_model(&self.data, false)?;
        let mut out = json!({ "data": data });
        if let Some(meta) = &self.meta {
            out["meta"] = serde_json::to_value(meta).map_err(|e| AppError::Internal(e.to_string()))?;
        }
        Ok(out)
    }
}

/// Wraps an already limited result page.
pub fn paginate_result<T>(data: Vec<T>, count: u64, page: u64, size: PageSize) -> Paginated<T> {
    match size {
        PageSize::All => Paginated { data, meta: None },
        PageSize::Count(size) => Paginated {
            data,
            meta: Some(PaginationMeta::new(count, page, size)),
        },
    }
}

/// Cuts one page out of a fully materialised list.
pub fn paginate_list<T>(data: Vec<T>, page: u64, size: PageSize) -> Paginated<T> {
    match size {
        PageSize::All => Paginated { data, meta: None },
        PageSize::Count(n) => {
            let total = data.len() as u64;
            let from = page.saturating_sub(1).saturating_mul(n);
            let page_data: Vec<T> = data
                .into_iter()
                .skip(usize::try_from(from).unwrap_or(usize::MAX))
                .take(usize::try_from(n).unwrap_or(usize::MAX))
                .collect();
            paginate_result(page_data, total, page, size)
        }
    }
}

/// Counts the query, then fetches the requested page.
pub async fn paginate_query(
    session: &mut Session,
    query: &Select,
    page: u64,
    size: PageSize,
) -> Result<Paginated<Record>, AppError> {
    if size == PageSize::All {
        let data = session.all(&query.clone().without_pagination()).await?;
        return Ok(Paginated { data, meta: None });
    }
    let count = session.count(query).await?;
    let data = session
        .all(&query.clone().without_pagination().paginate(Some(page), Some(size)))
        .await?;
    Ok(paginate_result(data, count, page, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_items_in_pages_of_three() {
        let items: Vec<u32> = (1..=10).collect();

        let first = paginate_list(items.clone(), 1, PageSize::Count(3));
        assert_eq!(first.data, vec![1, 2, 3]);
        let meta = first.meta.unwrap();
        assert_eq!(meta.total_pages, 4);
        assert_eq!(meta.next_page, Some(2));
        assert_eq!(meta.previous_page, None);

        let last = paginate_list(items.clone(), 4, PageSize::Count(3));
        assert_eq!(last.data, vec![10]);
        let meta = last.meta.unwrap();
        assert_eq!(meta.next_page, None);
        assert_eq!(meta.previous_page, Some(3));

        let past = paginate_list(items, 5, PageSize::Count(3));
        assert!(past.data.is_empty());
        let meta = past.meta.unwrap();
        assert_eq!(meta.next_page, None);
        assert_eq!(meta.previous_page, Some(4));
    }

    #[test]
    fn exact_multiple_does_not_add_a_page() {
        assert_eq!(PaginationMeta::new(9, 1, 3).total_pages, 3);
        assert_eq!(PaginationMeta::new(0, 1, 3).total_pages, 0);
        assert_eq!(PaginationMeta::new(0, 1, 3).next_page, None);
    }

    #[test]
    fn size_all_omits_meta() {
        let page = paginate_list(vec![1, 2, 3], 2, PageSize::All);
        assert_eq!(page.data.len(), 3);
        let json = serde_json::to_value(&page).unwrap();
        assert!(json.get("meta").is_none());
    }

    #[test]
    fn meta_serialises_in_camel_case() {
        let json = serde_json::to_value(PaginationMeta::new(10, 2, 3)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "total": 10,
                "pageSize": 3,
                "totalPages": 4,
                "currentPage": 2,
                "nextPage": 3,
                "previousPage": 1
            })
        );
    }
}
