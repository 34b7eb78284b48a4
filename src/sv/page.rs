//! Stable paging and search over already-authorized collections.
//!
//! Filtering always runs over the full result set before slicing, so
//! `total` and `pages` describe the filtered collection.

use serde::{Deserialize, Serialize};

use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
  pub data: Vec<T>,
  pub page: u64,
  pub pages: u64,
  pub total: u64,
}

/// Records that can be matched by a free-text search.
pub trait Searchable {
  fn search_fields(&self) -> Vec<&str>;

  fn matches(&self, needle: &str) -> bool {
    self
      .search_fields()
      .into_iter()
      .any(|field| field.to_lowercase().contains(needle))
  }
}

/// Raw paging parameters as they arrive from a caller.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PageQuery {
  pub page: Option<u64>,
  pub limit: Option<u64>,
  #[serde(alias = "search")]
  pub q: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
  pub page: u64,
  pub size: u64,
}

impl Paging {
  pub fn new(page: u64, size: u64) -> Self {
    Self { page, size }
  }
}

impl PageQuery {
  /// Resolve against the configured default and ceiling page sizes.
  pub fn paging(&self, default_size: u64, max_size: u64) -> Result<Paging> {
    let size = match self.limit {
      Some(0) => return Err(Error::invalid("Page size must be positive")),
      Some(limit) => limit.min(max_size),
      None => default_size,
    };
    Ok(Paging { page: self.page.unwrap_or(1), size })
  }

  pub fn search(&self) -> Option<&str> {
    self.q.as_deref()
  }
}

/// Slice `items` into one page. `page` is clamped to `[1, pages]`, and an
/// empty collection still has one (empty) page.
pub fn paginate<T>(items: Vec<T>, paging: Paging) -> Page<T> {
  let size = paging.size.max(1);
  let total = items.len() as u64;
  let pages = total.div_ceil(size).max(1);
  let page = paging.page.clamp(1, pages);
  let skip = ((page - 1) * size) as usize;

  Page {
    data: items.into_iter().skip(skip).take(size as usize).collect(),
    page,
    pages,
    total,
  }
}

pub fn search<T: Searchable>(items: Vec<T>, needle: Option<&str>) -> Vec<T> {
  match needle.map(str::trim).filter(|n| !n.is_empty()) {
    Some(needle) => {
      let needle = needle.to_lowercase();
      items.into_iter().filter(|item| item.matches(&needle)).collect()
    }
    None => items,
  }
}

pub fn filter_page<T: Searchable>(
  items: Vec<T>,
  needle: Option<&str>,
  paging: Paging,
) -> Page<T> {
  paginate(search(items, needle), paging)
}
