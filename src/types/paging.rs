//! Paging primitives for historic queries.
//!
//! Paging parameters are clamped into range, never rejected: a page size of
//! zero becomes one, an oversized page is capped, and an out-of-range page
//! number yields an empty page with the correct total.

use serde::{Deserialize, Serialize};

/// Client-supplied paging parameters (1-based page number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Self {
        Self { page, size }
    }

    /// Clamp into a usable range: page >= 1, 1 <= size <= max_size.
    pub fn normalized(self, max_size: u32) -> Self {
        Self {
            page: self.page.max(1),
            size: self.size.clamp(1, max_size.max(1)),
        }
    }

    /// Item offset of the first entry on this page.
    pub fn offset(self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, size: 20 }
    }
}

/// One page of query results plus paging metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Total matching items across all pages.
    pub total: u64,
    /// The (normalized) page number this page was cut from.
    pub page: u32,
    /// The (normalized) page size.
    pub size: u32,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(total: u64, request: PageRequest, items: Vec<T>) -> Self {
        Self {
            total,
            page: request.page,
            size: request.size,
            items,
        }
    }

    pub fn empty(request: PageRequest) -> Self {
        Self::new(0, request, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of pages needed to cover `total` at this page size.
    pub fn page_count(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalized_clamps_out_of_range_values() {
        let req = PageRequest::new(0, 0).normalized(200);
        assert_eq!(req, PageRequest::new(1, 1));

        let req = PageRequest::new(3, 10_000).normalized(200);
        assert_eq!(req, PageRequest::new(3, 200));
    }

    #[test]
    fn offset_is_zero_based_from_one_based_pages() {
        assert_eq!(PageRequest::new(1, 10).offset(), 0);
        assert_eq!(PageRequest::new(2, 10).offset(), 10);
        assert_eq!(PageRequest::new(5, 25).offset(), 100);
    }

    #[test]
    fn page_count_rounds_up() {
        let page: Page<u32> = Page::new(21, PageRequest::new(1, 10), vec![]);
        assert_eq!(page.page_count(), 3);

        let page: Page<u32> = Page::new(20, PageRequest::new(1, 10), vec![]);
        assert_eq!(page.page_count(), 2);
    }

    proptest! {
        #[test]
        fn normalized_is_always_in_range(page in 0u32..10_000, size in 0u32..10_000) {
            let req = PageRequest::new(page, size).normalized(200);
            prop_assert!(req.page >= 1);
            prop_assert!(req.size >= 1 && req.size <= 200);
        }

        #[test]
        fn offsets_of_consecutive_pages_are_disjoint(page in 1u32..1000, size in 1u32..200) {
            let a = PageRequest::new(page, size);
            let b = PageRequest::new(page + 1, size);
            prop_assert_eq!(a.offset() + u64::from(size), b.offset());
        }
    }
}
