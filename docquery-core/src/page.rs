//! Length-aware pagination of query results.
//!
//! [`Collection::paginate`](crate::collection::Collection::paginate) runs a count
//! aggregate and a skip/limit read for the requested [`PaginationParams`] and wraps
//! both in a [`Page`].

use serde::{Deserialize, Serialize};

/// One page of matching documents or models plus the navigation metadata.
///
/// # Example
///
/// ```ignore
/// use docquery::page::{Page, PaginationParams};
///
/// let page = Page::for_params(vec!["knife", "fork"], 5, &PaginationParams::new(1, 2));
///
/// assert_eq!(page.next_page, Some(2));
/// assert_eq!(page.last_page(), 3);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matches across all pages.
    pub count: usize,
    /// 1-based number of this page.
    pub current_page: usize,
    pub per_page: usize,
    pub next_page: Option<usize>,
    pub previous_page: Option<usize>,
}

impl<T> Page<T> {
    /// Wraps the items fetched for `params` out of `count` matches in total,
    /// deriving the navigation metadata.
    pub fn for_params(items: Vec<T>, count: usize, params: &PaginationParams) -> Self {
        let end = params.offset().saturating_add(items.len());
        let current_page = params.page.max(1);

        Self {
            items,
            count,
            current_page,
            per_page: params.per_page,
            next_page: (end < count).then(|| current_page + 1),
            previous_page: (current_page > 1).then(|| current_page - 1),
        }
    }

    /// The number of the last page; 1 when nothing matched.
    pub fn last_page(&self) -> usize {
        if self.per_page == 0 {
            return 1;
        }
        self.count.div_ceil(self.per_page).max(1)
    }

    pub fn has_more_pages(&self) -> bool {
        self.next_page.is_some()
    }

    /// Converts the items while keeping the metadata, stopping at the first error.
    pub fn try_map<U, E>(self, convert: impl FnOnce(Vec<T>) -> Result<Vec<U>, E>) -> Result<Page<U>, E> {
        Ok(Page {
            items: convert(self.items)?,
            count: self.count,
            current_page: self.current_page,
            per_page: self.per_page,
            next_page: self.next_page,
            previous_page: self.previous_page,
        })
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            current_page: 1,
            per_page: PaginationParams::default().per_page,
            next_page: None,
            previous_page: None,
        }
    }
}

/// Which page to read and how large pages are. Pages are 1-indexed; page 0 reads
/// as page 1.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationParams {
    pub page: usize,
    pub per_page: usize,
}

impl PaginationParams {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page }
    }

    /// Documents skipped before this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: 15 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middle_page_links_both_ways() {
        let params = PaginationParams::new(2, 10);
        let page = Page::for_params((11..=20).collect::<Vec<_>>(), 35, &params);

        assert_eq!(params.offset(), 10);
        assert_eq!(page.count, 35);
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.previous_page, Some(1));
        assert_eq!(page.last_page(), 4);
    }

    #[test]
    fn last_page_has_no_next() {
        let params = PaginationParams::new(4, 10);
        let page = Page::for_params(vec!["a"; 5], 35, &params);

        assert!(!page.has_more_pages());
        assert_eq!(page.previous_page, Some(3));
    }

    #[test]
    fn empty_results_have_one_page() {
        let page = Page::<u8>::for_params(Vec::new(), 0, &PaginationParams::new(0, 15));

        assert_eq!(page.current_page, 1);
        assert_eq!(page.last_page(), 1);
        assert_eq!(page.previous_page, None);
    }

    #[test]
    fn try_map_keeps_metadata() {
        let page = Page::for_params(vec![1, 2], 4, &PaginationParams::new(1, 2));
        let mapped: Page<String> = page.try_map(|items| Ok::<_, ()>(items.iter().map(ToString::to_string).collect())).unwrap();

        assert_eq!(mapped.items, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(mapped.next_page, Some(2));
    }
}
