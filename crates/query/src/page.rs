//! Pagination engine.
//!
//! Page count and next-page availability are computed over the raw `data`
//! of the snapshot, not over filtered rows. The page window itself is taken
//! from the sorted rows.

#![forbid(unsafe_code)]

use std::ops::Range;

use serde::Serialize;
use tabula_core::{current_page, data, page_size, Snapshot};

use crate::QueryError;

fn checked_page_size(snap: &Snapshot) -> Result<usize, QueryError> {
    let size = page_size(snap);
    if size < 1 { return Err(QueryError::InvalidPageSize(size)); }
    usize::try_from(size).map_err(|_| QueryError::InvalidPageSize(size))
}

/// `ceil(len / page_size)`, never less than 1.
pub fn max_page_for(len: usize, page_size: usize) -> usize { len.div_ceil(page_size).max(1) }

pub fn max_page(snap: &Snapshot) -> Result<usize, QueryError> {
    Ok(max_page_for(data(snap).len(), checked_page_size(snap)?))
}

pub fn has_next(snap: &Snapshot) -> Result<bool, QueryError> {
    let max = max_page(snap)?;
    Ok(current_page(snap) < i64::try_from(max).unwrap_or(i64::MAX))
}

pub fn has_previous(snap: &Snapshot) -> bool { current_page(snap) > 1 }

/// Index range of the current page within `len` rows. A page past the end is empty.
pub fn page_window(snap: &Snapshot, len: usize) -> Result<Range<usize>, QueryError> {
    let size = checked_page_size(snap)?;
    let page = current_page(snap);
    if page < 1 { return Err(QueryError::InvalidCurrentPage(page)); }
    let skip = usize::try_from(page - 1).unwrap_or(usize::MAX);
    let start = skip.saturating_mul(size).min(len);
    let end = start.saturating_add(size).min(len);
    Ok(start..end)
}

/// Everything a pager control needs in one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub current_page: i64,
    pub page_size: usize,
    pub max_page: usize,
    pub has_next: bool,
    pub has_previous: bool,
    pub total: usize,
    pub filtered: usize,
}

pub fn page_info(snap: &Snapshot, filtered: usize) -> Result<PageInfo, QueryError> {
    Ok(PageInfo {
        current_page: current_page(snap),
        page_size: checked_page_size(snap)?,
        max_page: max_page(snap)?,
        has_next: has_next(snap)?,
        has_previous: has_previous(snap),
        total: data(snap).len(),
        filtered,
    })
}
