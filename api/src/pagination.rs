use std::cmp::Ordering;

use tally_shared::{PaginationMeta, PostPage, PostSummary};

use crate::error::ValidationError;

/// A validated, 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    page: u64,
    limit: u64,
}

impl PageRequest {
    pub fn new(page: i64, limit: i64, max_limit: u64) -> Result<Self, ValidationError> {
        if page < 1 {
            return Err(ValidationError::Page(page));
        }
        if limit < 1 {
            return Err(ValidationError::Limit(limit));
        }
        if limit as u64 > max_limit {
            return Err(ValidationError::LimitTooLarge {
                limit,
                max: max_limit,
            });
        }
        Ok(Self {
            page: page as u64,
            limit: limit as u64,
        })
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Window {
        Window {
            offset: (self.page - 1).saturating_mul(self.limit),
            limit: self.limit,
        }
    }

    pub fn meta(&self, records: u64) -> PaginationMeta {
        PaginationMeta {
            current: self.page,
            limit: self.limit,
            records,
            pages: records.div_ceil(self.limit),
        }
    }
}

/// `OFFSET`/`LIMIT` pair over an ordered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

impl Window {
    fn bounds(&self, len: usize) -> (usize, usize) {
        let start = usize::try_from(self.offset).unwrap_or(usize::MAX).min(len);
        let end = usize::try_from(self.offset.saturating_add(self.limit))
            .unwrap_or(usize::MAX)
            .min(len);
        (start, end)
    }

    /// Orders `items` by `cmp` and keeps only this window.
    ///
    /// Only the prefix up to the end of the window is sorted. `cmp` has to be
    /// a total order for the result to match a full sort.
    pub fn select<T, F>(&self, mut items: Vec<T>, mut cmp: F) -> Vec<T>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let (start, end) = self.bounds(items.len());
        if start == end {
            return Vec::new();
        }

        if end < items.len() {
            items.select_nth_unstable_by(end - 1, &mut cmp);
            items.truncate(end);
        }
        items.sort_unstable_by(&mut cmp);
        items.drain(..start);
        items
    }
}

/// Same envelope whether the store or [`Window::select`] did the slicing.
pub fn envelope(request: &PageRequest, records: u64, data: Vec<PostSummary>) -> PostPage {
    PostPage {
        pagination: request.meta(records),
        data,
    }
}
