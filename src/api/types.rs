//! Wire and domain types for the admin API.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Response envelope returned by both the script API and the edge worker.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
  pub success: bool,
  #[serde(default)]
  pub data: Value,
  #[serde(default)]
  pub error: Option<String>,
  /// Edge worker only: the key is not cached, ask the primary API instead
  #[serde(default)]
  pub fallback: bool,
}

/// Request body for the script API.
#[derive(Debug, Serialize)]
pub struct ApiRequest<'a> {
  pub action: &'a str,
  pub api_key: &'a str,
  pub data: &'a Value,
}

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage<T> {
  #[serde(default = "Vec::new")]
  pub items: Vec<T>,
  #[serde(default)]
  pub total: u64,
  #[serde(default = "first_page")]
  pub page: u32,
  #[serde(default)]
  pub limit: u32,
  #[serde(rename = "totalPages", default)]
  pub total_pages: u32,
}

fn first_page() -> u32 {
  1
}

/// Accept ids the spreadsheet hands back as numbers or strings.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match Value::deserialize(deserializer)? {
    Value::String(s) => s,
    Value::Number(n) => n.to_string(),
    Value::Null => String::new(),
    other => other.to_string(),
  })
}

/// Extract a server-assigned id from a write response.
///
/// Responses carry the id as `<kind>_id` or `id`, string or number.
pub fn server_id(response: &Value, id_field: &str) -> Option<String> {
  [id_field, "id"]
    .iter()
    .filter_map(|field| response.get(*field))
    .find_map(|value| match value {
      Value::String(s) if !s.is_empty() => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      _ => None,
    })
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
  #[default]
  New,
  Confirmed,
  Shipping,
  Done,
  Cancel,
  Return,
}

impl OrderStatus {
  /// Statuses that move stock on the server.
  pub fn moves_stock(self) -> bool {
    matches!(self, OrderStatus::Done | OrderStatus::Return)
  }
}

impl fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      OrderStatus::New => "NEW",
      OrderStatus::Confirmed => "CONFIRMED",
      OrderStatus::Shipping => "SHIPPING",
      OrderStatus::Done => "DONE",
      OrderStatus::Cancel => "CANCEL",
      OrderStatus::Return => "RETURN",
    };
    f.write_str(name)
  }
}

impl FromStr for OrderStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_uppercase().as_str() {
      "NEW" => Ok(OrderStatus::New),
      "CONFIRMED" => Ok(OrderStatus::Confirmed),
      "SHIPPING" => Ok(OrderStatus::Shipping),
      "DONE" => Ok(OrderStatus::Done),
      "CANCEL" => Ok(OrderStatus::Cancel),
      "RETURN" => Ok(OrderStatus::Return),
      other => Err(format!("unknown order status '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
  #[serde(deserialize_with = "string_or_number")]
  pub product_id: String,
  pub qty: u32,
  pub price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShippingInfo {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub address: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub city: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub zipcode: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub note: Option<String>,
}

/// Order row as stored in the sheet. `items_json` and `shipping_info` are
/// JSON documents encoded as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
  #[serde(alias = "order_id", deserialize_with = "string_or_number")]
  pub id: String,
  #[serde(default, deserialize_with = "string_or_number")]
  pub customer_id: String,
  #[serde(default)]
  pub items_json: String,
  #[serde(default)]
  pub total: f64,
  #[serde(default)]
  pub status: OrderStatus,
  #[serde(default)]
  pub created_at: String,
  #[serde(default)]
  pub shipping_info: String,
  #[serde(default)]
  pub note: String,
}

impl Order {
  pub fn items(&self) -> Vec<OrderItem> {
    serde_json::from_str(&self.items_json).unwrap_or_default()
  }
}

/// A validated order form, before anything is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
  pub customer_id: String,
  pub items: Vec<OrderItem>,
  /// Local timestamp, `YYYY-MM-DD HH:MM:SS`
  pub created_at: String,
  pub shipping: ShippingInfo,
  pub note: Option<String>,
}

impl OrderDraft {
  pub fn total(&self) -> f64 {
    self
      .items
      .iter()
      .map(|item| f64::from(item.qty) * item.price)
      .sum()
  }

  fn shipping_json(&self) -> String {
    serde_json::to_string(&self.shipping).unwrap_or_else(|_| "{}".to_string())
  }
}

// ============================================================================
// Inventory movements
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
  #[default]
  In,
  Out,
  Adjust,
}

impl fmt::Display for MovementType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      MovementType::In => "IN",
      MovementType::Out => "OUT",
      MovementType::Adjust => "ADJUST",
    };
    f.write_str(name)
  }
}

impl FromStr for MovementType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_uppercase().as_str() {
      "IN" => Ok(MovementType::In),
      "OUT" => Ok(MovementType::Out),
      "ADJUST" => Ok(MovementType::Adjust),
      other => Err(format!("unknown movement type '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
  #[serde(alias = "movement_id", deserialize_with = "string_or_number")]
  pub id: String,
  #[serde(default, deserialize_with = "string_or_number")]
  pub product_id: String,
  #[serde(rename = "type", default)]
  pub movement_type: MovementType,
  #[serde(default)]
  pub qty: f64,
  #[serde(default)]
  pub unit_price: f64,
  #[serde(default)]
  pub note: String,
  #[serde(default)]
  pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovementDraft {
  pub product_id: String,
  pub movement_type: MovementType,
  pub qty: f64,
  pub unit_price: f64,
  pub note: String,
  pub created_at: String,
}

// ============================================================================
// Products
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
  #[serde(alias = "product_id", deserialize_with = "string_or_number")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub price: f64,
  #[serde(default)]
  pub stock: f64,
}

// ============================================================================
// Draft -> payload / placeholder
// ============================================================================

/// A form that can be turned into a create request and an optimistic record.
pub trait Draft {
  type Record;

  /// Exact request body for the create action.
  fn payload(&self) -> Value;

  /// Record rendered before the server answers, using only local data.
  fn placeholder(&self, temp_id: &str) -> Self::Record;
}

impl Draft for OrderDraft {
  type Record = Order;

  fn payload(&self) -> Value {
    let mut payload = serde_json::json!({
      "customer_id": self.customer_id,
      "items": self.items,
      "created_at": self.created_at,
      "shipping_info": self.shipping_json(),
    });
    if let Some(note) = self.note.as_deref().filter(|n| !n.is_empty()) {
      payload["note"] = Value::String(note.to_string());
    }
    payload
  }

  fn placeholder(&self, temp_id: &str) -> Order {
    Order {
      id: temp_id.to_string(),
      customer_id: self.customer_id.clone(),
      items_json: serde_json::to_string(&self.items).unwrap_or_else(|_| "[]".to_string()),
      total: self.total(),
      status: OrderStatus::New,
      created_at: self.created_at.clone(),
      shipping_info: self.shipping_json(),
      note: self.note.clone().unwrap_or_default(),
    }
  }
}

impl Draft for MovementDraft {
  type Record = Movement;

  fn payload(&self) -> Value {
    serde_json::json!({
      "product_id": self.product_id,
      "type": self.movement_type,
      "qty": self.qty,
      "unit_price": self.unit_price,
      "note": self.note,
    })
  }

  fn placeholder(&self, temp_id: &str) -> Movement {
    Movement {
      id: temp_id.to_string(),
      product_id: self.product_id.clone(),
      movement_type: self.movement_type,
      qty: self.qty,
      unit_price: self.unit_price,
      note: self.note.clone(),
      created_at: self.created_at.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn draft() -> OrderDraft {
    OrderDraft {
      customer_id: "C1".to_string(),
      items: vec![
        OrderItem {
          product_id: "P1".to_string(),
          qty: 2,
          price: 150.0,
        },
        OrderItem {
          product_id: "P2".to_string(),
          qty: 1,
          price: 25.5,
        },
      ],
      created_at: "2026-10-19 10:00:00".to_string(),
      shipping: ShippingInfo {
        address: Some("1 Main St".to_string()),
        ..Default::default()
      },
      note: None,
    }
  }

  #[test]
  fn test_order_accepts_numeric_and_aliased_ids() {
    let order: Order = serde_json::from_value(json!({
      "order_id": 123,
      "customer_id": 7,
      "total": 10,
      "status": "DONE"
    }))
    .unwrap();
    assert_eq!(order.id, "123");
    assert_eq!(order.customer_id, "7");
    assert_eq!(order.status, OrderStatus::Done);
  }

  #[test]
  fn test_server_id_prefers_kind_field() {
    assert_eq!(
      server_id(&json!({"order_id": 42, "id": "x"}), "order_id"),
      Some("42".to_string())
    );
    assert_eq!(
      server_id(&json!({"id": "R123"}), "order_id"),
      Some("R123".to_string())
    );
    assert_eq!(server_id(&json!({"ok": true}), "order_id"), None);
  }

  #[test]
  fn test_order_placeholder_derives_fields_from_draft() {
    let order = draft().placeholder("temp_1_1");
    assert_eq!(order.id, "temp_1_1");
    assert_eq!(order.total, 325.5);
    assert_eq!(order.status, OrderStatus::New);
    assert_eq!(order.items().len(), 2);
    assert_eq!(order.shipping_info, r#"{"address":"1 Main St"}"#);
  }

  #[test]
  fn test_order_payload_omits_empty_note() {
    let payload = draft().payload();
    assert!(payload.get("note").is_none());
    assert_eq!(payload["items"][0]["qty"], 2);

    let mut with_note = draft();
    with_note.note = Some("leave at door".to_string());
    assert_eq!(with_note.payload()["note"], "leave at door");
  }

  #[test]
  fn test_list_page_defaults() {
    let page: ListPage<Order> = serde_json::from_value(json!({
      "items": [{"id": "1"}],
      "total": 1,
      "totalPages": 1
    }))
    .unwrap();
    assert_eq!(page.page, 1);
    assert_eq!(page.total_pages, 1);
    assert_eq!(page.items[0].status, OrderStatus::New);
  }

  #[test]
  fn test_status_parse() {
    assert_eq!("done".parse::<OrderStatus>(), Ok(OrderStatus::Done));
    assert!("lost".parse::<OrderStatus>().is_err());
    assert!(OrderStatus::Return.moves_stock());
    assert!(!OrderStatus::Cancel.moves_stock());
  }
}
