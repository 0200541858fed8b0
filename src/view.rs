//! Plain-text rendering of pages, rows and notices.

use std::io::Write;

use crate::api::{Movement, Order, Product};
use crate::cache::Cacheable;
use crate::sync::{Notice, PageState, View};

/// A record that can be shown as a table row.
pub trait Columns {
  const HEADERS: &'static [&'static str];

  fn cells(&self) -> Vec<String>;
}

impl Columns for Order {
  const HEADERS: &'static [&'static str] = &["ID", "CUSTOMER", "TOTAL", "STATUS", "CREATED"];

  fn cells(&self) -> Vec<String> {
    vec![
      self.id.clone(),
      self.customer_id.clone(),
      format_price(self.total),
      self.status.to_string(),
      self.created_at.clone(),
    ]
  }
}

impl Columns for Movement {
  const HEADERS: &'static [&'static str] = &["ID", "PRODUCT", "TYPE", "QTY", "UNIT PRICE", "CREATED"];

  fn cells(&self) -> Vec<String> {
    vec![
      self.id.clone(),
      self.product_id.clone(),
      self.movement_type.to_string(),
      self.qty.to_string(),
      format_price(self.unit_price),
      self.created_at.clone(),
    ]
  }
}

impl Columns for Product {
  const HEADERS: &'static [&'static str] = &["ID", "NAME", "PRICE", "STOCK"];

  fn cells(&self) -> Vec<String> {
    vec![
      self.id.clone(),
      self.name.clone(),
      format_price(self.price),
      self.stock.to_string(),
    ]
  }
}

/// Thousands-separated price with no decimals when whole: `1,250,000`.
pub fn format_price(value: f64) -> String {
  let rounded = (value * 100.0).round() / 100.0;
  let whole = rounded.trunc().abs() as u64;
  let digits = whole.to_string();
  let mut grouped = String::new();
  for (i, c) in digits.chars().enumerate() {
    if i > 0 && (digits.len() - i) % 3 == 0 {
      grouped.push(',');
    }
    grouped.push(c);
  }
  let sign = if rounded < 0.0 { "-" } else { "" };
  let cents = ((rounded.abs() - whole as f64) * 100.0).round() as u64;
  if cents == 0 {
    format!("{}{}", sign, grouped)
  } else {
    format!("{}{}.{:02}", sign, grouped, cents)
  }
}

/// Render rows as an aligned table.
pub fn table<T: Columns>(rows: &[T]) -> String {
  let cells: Vec<Vec<String>> = rows.iter().map(Columns::cells).collect();
  let mut widths: Vec<usize> = T::HEADERS.iter().map(|h| h.len()).collect();
  for row in &cells {
    for (width, cell) in widths.iter_mut().zip(row) {
      *width = (*width).max(cell.chars().count());
    }
  }

  let line = |values: Vec<&str>| {
    values
      .iter()
      .zip(&widths)
      .map(|(value, width)| format!("{:<width$}", value, width = *width))
      .collect::<Vec<_>>()
      .join("  ")
      .trim_end()
      .to_string()
  };

  let mut out = line(T::HEADERS.to_vec());
  out.push('\n');
  for row in &cells {
    out.push_str(&line(row.iter().map(String::as_str).collect()));
    out.push('\n');
  }
  out
}

/// Writes pages and rows to `out`, notices to `err`.
pub struct TerminalView<O, E> {
  out: O,
  err: E,
}

impl TerminalView<std::io::Stdout, std::io::Stderr> {
  pub fn stdio() -> Self {
    Self {
      out: std::io::stdout(),
      err: std::io::stderr(),
    }
  }
}

impl<O: Write, E: Write> TerminalView<O, E> {
  #[cfg(test)]
  pub fn new(out: O, err: E) -> Self {
    Self { out, err }
  }

  // Broken pipes and closed terminals are not worth failing a write over
  fn emit(&mut self, text: &str) {
    let _ = self.out.write_all(text.as_bytes());
    let _ = self.out.flush();
  }
}

impl<T: Columns + Cacheable, O: Write, E: Write> View<T> for TerminalView<O, E> {
  fn render_page(&mut self, page: &PageState<T>) {
    if page.is_empty() {
      self.emit("No records.\n");
      return;
    }
    let mut text = table(page.items());
    text.push_str(&format!(
      "Page {}/{} ({} total)\n",
      page.page,
      page.total_pages.max(1),
      page.total
    ));
    self.emit(&text);
  }

  fn render_row(&mut self, record: &T, disabled: bool) {
    let mut line = record.cells().join("  ");
    if disabled {
      line.push_str("  (saving...)");
    }
    line.push('\n');
    self.emit(&line);
  }

  fn notify(&mut self, notice: Notice) {
    let _ = writeln!(self.err, "{}", notice);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::ListPage;
  use serde_json::json;

  fn order(id: &str, total: f64) -> Order {
    serde_json::from_value(json!({
      "id": id,
      "customer_id": "C1",
      "total": total,
      "status": "NEW",
      "created_at": "2026-10-19 10:00:00"
    }))
    .unwrap()
  }

  #[test]
  fn test_format_price() {
    assert_eq!(format_price(0.0), "0");
    assert_eq!(format_price(1_250_000.0), "1,250,000");
    assert_eq!(format_price(325.5), "325.50");
    assert_eq!(format_price(-1000.0), "-1,000");
  }

  #[test]
  fn test_table_aligns_columns() {
    let text = table(&[order("1", 10.0), order("R123", 1500.0)]);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("ID    CUSTOMER"));
    assert!(lines[2].starts_with("R123  C1"));
    assert!(lines[2].contains("1,500"));
  }

  #[test]
  fn test_view_writes_rows_and_notices() {
    let mut view = TerminalView::new(Vec::new(), Vec::new());
    let mut page = PageState::new(1, 20);
    page.load(ListPage {
      items: vec![order("5", 10.0)],
      total: 1,
      page: 1,
      limit: 20,
      total_pages: 1,
    });

    View::<Order>::render_page(&mut view, &page);
    view.render_row(&order("temp_1_1", 20.0), true);
    View::<Order>::notify(&mut view, Notice::Error("Failed".to_string()));

    let out = String::from_utf8(view.out).unwrap();
    assert!(out.contains("Page 1/1 (1 total)"));
    assert!(out.contains("temp_1_1  C1  20  NEW  2026-10-19 10:00:00  (saving...)"));
    assert_eq!(String::from_utf8(view.err).unwrap(), "✗ Failed\n");
  }
}
