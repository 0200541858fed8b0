//! In-memory list state owned by one page, plus the rendering seam.

use std::collections::HashSet;
use std::fmt;

use crate::api::ListPage;
use crate::cache::Cacheable;

/// Transient user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
  Info(String),
  Success(String),
  Warning(String),
  Error(String),
}

impl fmt::Display for Notice {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Notice::Info(msg) => write!(f, "… {}", msg),
      Notice::Success(msg) => write!(f, "✓ {}", msg),
      Notice::Warning(msg) => write!(f, "⚠ {}", msg),
      Notice::Error(msg) => write!(f, "✗ {}", msg),
    }
  }
}

/// Where page state gets drawn.
pub trait View<T> {
  /// Redraw every row.
  fn render_page(&mut self, page: &PageState<T>);

  /// Redraw one row in place.
  fn render_row(&mut self, record: &T, disabled: bool);

  fn notify(&mut self, notice: Notice);
}

/// The list a page shows. `items` order is the render order.
#[derive(Debug, Clone)]
pub struct PageState<T> {
  items: Vec<T>,
  pub page: u32,
  pub limit: u32,
  pub total: u64,
  pub total_pages: u32,
  /// Rows whose action controls are disabled while a write is in flight
  disabled: HashSet<String>,
}

impl<T: Cacheable> PageState<T> {
  pub fn new(page: u32, limit: u32) -> Self {
    Self {
      items: Vec::new(),
      page,
      limit,
      total: 0,
      total_pages: 0,
      disabled: HashSet::new(),
    }
  }

  /// Replace the contents with a freshly loaded page. Controls are re-enabled.
  pub fn load(&mut self, list: ListPage<T>) {
    self.items = list.items;
    self.total = list.total;
    self.total_pages = list.total_pages;
    self.sort();
    self.disabled.clear();
  }

  /// Snapshot for the page's cache entry.
  pub fn to_list_page(&self) -> ListPage<T> {
    ListPage {
      items: self.items.clone(),
      total: self.total,
      page: self.page,
      limit: self.limit,
      total_pages: self.total_pages,
    }
  }

  pub fn items(&self) -> &[T] {
    &self.items
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn position(&self, id: &str) -> Option<usize> {
    self.items.iter().position(|r| r.cache_key() == id)
  }

  pub fn get(&self, id: &str) -> Option<&T> {
    self.items.iter().find(|r| r.cache_key() == id)
  }

  /// Insert at the position the newest-first order dictates. The oldest row
  /// falls off when the page is already full.
  pub fn insert_sorted(&mut self, record: T) -> usize {
    let at = self
      .items
      .iter()
      .position(|r| r.sort_key() < record.sort_key())
      .unwrap_or(self.items.len());
    self.items.insert(at, record);
    self.total += 1;
    if self.limit > 0 {
      self.items.truncate(self.limit as usize);
    }
    at
  }

  /// Swap the record stored under `id` in place, keeping its position.
  /// The row is re-rendered, which re-enables its controls.
  pub fn replace(&mut self, id: &str, record: T) -> bool {
    match self.position(id) {
      Some(at) => {
        self.disabled.remove(id);
        self.disabled.remove(record.cache_key());
        self.items[at] = record;
        true
      }
      None => false,
    }
  }

  pub fn remove(&mut self, id: &str) -> Option<T> {
    let at = self.position(id)?;
    self.disabled.remove(id);
    self.total = self.total.saturating_sub(1);
    Some(self.items.remove(at))
  }

  pub fn clear(&mut self) {
    self.items.clear();
    self.disabled.clear();
    self.total = 0;
    self.total_pages = 0;
  }

  pub fn disable_row(&mut self, id: &str) {
    self.disabled.insert(id.to_string());
  }

  pub fn is_disabled(&self, id: &str) -> bool {
    self.disabled.contains(id)
  }

  /// A full re-render restores every row's controls except those in `busy`,
  /// whose writes have not settled yet.
  pub fn rendered<I: IntoIterator<Item = String>>(&mut self, busy: I) {
    self.disabled = busy.into_iter().collect();
  }

  fn sort(&mut self) {
    // Stable, so equal keys keep server order
    self.items.sort_by(|a, b| b.sort_key().cmp(a.sort_key()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::Order;

  fn order(id: &str, created_at: &str) -> Order {
    serde_json::from_value(serde_json::json!({"id": id, "created_at": created_at})).unwrap()
  }

  fn ids(page: &PageState<Order>) -> Vec<&str> {
    page.items().iter().map(|o| o.id.as_str()).collect()
  }

  #[test]
  fn test_load_sorts_newest_first() {
    let mut page = PageState::new(1, 20);
    page.load(ListPage {
      items: vec![
        order("a", "2026-01-01 10:00:00"),
        order("b", "2026-03-01 10:00:00"),
        order("c", "2026-02-01 10:00:00"),
      ],
      total: 3,
      page: 1,
      limit: 20,
      total_pages: 1,
    });
    assert_eq!(ids(&page), vec!["b", "c", "a"]);
  }

  #[test]
  fn test_insert_sorted_positions() {
    let mut page = PageState::new(1, 20);
    page.insert_sorted(order("a", "2026-01-01 10:00:00"));
    page.insert_sorted(order("c", "2026-03-01 10:00:00"));
    assert_eq!(page.insert_sorted(order("b", "2026-02-01 10:00:00")), 1);
    assert_eq!(ids(&page), vec!["c", "b", "a"]);
    assert_eq!(page.total, 3);
  }

  #[test]
  fn test_replace_reenables_row() {
    let mut page = PageState::new(1, 20);
    page.insert_sorted(order("temp_1", "2026-01-01 10:00:00"));
    page.disable_row("temp_1");
    assert!(page.is_disabled("temp_1"));

    assert!(page.replace("temp_1", order("R1", "2026-01-01 10:00:00")));
    assert!(!page.is_disabled("temp_1"));
    assert!(!page.is_disabled("R1"));
    assert_eq!(ids(&page), vec!["R1"]);
    assert!(!page.replace("missing", order("x", "")));
  }

  #[test]
  fn test_full_render_reenables_settled_rows() {
    let mut page = PageState::new(1, 20);
    page.insert_sorted(order("a", "1"));
    page.insert_sorted(order("b", "2"));
    page.disable_row("a");
    page.disable_row("b");
    page.rendered(vec!["b".to_string()]);
    assert!(!page.is_disabled("a"));
    assert!(page.is_disabled("b"));

    page.rendered(Vec::new());
    assert!(!page.is_disabled("b"));
  }

  #[test]
  fn test_insert_keeps_page_within_limit() {
    let mut page = PageState::new(1, 2);
    page.insert_sorted(order("a", "2026-01-01 10:00:00"));
    page.insert_sorted(order("b", "2026-02-01 10:00:00"));
    page.insert_sorted(order("c", "2026-03-01 10:00:00"));
    assert_eq!(ids(&page), vec!["c", "b"]);
    assert_eq!(page.total, 3);
  }

  #[test]
  fn test_remove_adjusts_total() {
    let mut page = PageState::new(1, 20);
    page.insert_sorted(order("a", "1"));
    assert!(page.remove("a").is_some());
    assert!(page.remove("a").is_none());
    assert_eq!(page.total, 0);
    assert!(page.is_empty());
  }
}
