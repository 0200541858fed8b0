//! Command-line commands and their argument parsers.

use clap::{Args, Subcommand};
use serde_json::{Map, Value};

use crate::api::{MovementType, OrderItem, OrderStatus};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Sign in; the password is read from STOCKROOM_PASSWORD
  Login {
    #[arg(long)]
    email: String,
  },
  /// Sign out and drop every cached response
  Logout,
  /// Browse, create and update orders
  #[command(subcommand)]
  Orders(OrdersCommand),
  /// Browse and record stock movements
  #[command(subcommand)]
  Inventory(InventoryCommand),
  /// Browse and edit products
  #[command(subcommand)]
  Products(ProductsCommand),
  /// Show a named report (dashboard, stock_value, low_stock, sales, ...)
  Reports { name: String },
  /// Invoice actions
  #[command(subcommand)]
  Invoices(InvoicesCommand),
  /// Settings actions
  #[command(subcommand)]
  Settings(SettingsCommand),
  /// Replay writes an earlier run left unconfirmed
  Recover,
  /// List writes waiting for confirmation
  Pending,
  /// Inspect or clear the local cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Args, Debug, Clone, Copy)]
pub struct PageArgs {
  #[arg(long, default_value_t = 1)]
  pub page: u32,
}

#[derive(Subcommand, Debug)]
pub enum OrdersCommand {
  List(PageArgs),
  /// Show one order from a list page with its line items
  Show {
    id: String,
    #[command(flatten)]
    page: PageArgs,
  },
  Create(CreateOrderArgs),
  /// Move one or more orders on a list page to a new status
  Status {
    #[arg(value_parser = parse_status)]
    status: OrderStatus,
    #[arg(required = true)]
    ids: Vec<String>,
    #[command(flatten)]
    page: PageArgs,
  },
}

#[derive(Args, Debug)]
pub struct CreateOrderArgs {
  #[arg(long)]
  pub customer: String,
  /// Line item as product:qty:price; repeat for more lines
  #[arg(long = "item", required = true, value_parser = parse_item)]
  pub items: Vec<OrderItem>,
  #[arg(long)]
  pub note: Option<String>,
  #[arg(long)]
  pub address: Option<String>,
  #[arg(long)]
  pub city: Option<String>,
  #[arg(long)]
  pub zipcode: Option<String>,
  #[arg(long)]
  pub shipping_note: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum InventoryCommand {
  List(PageArgs),
  Add {
    #[arg(long)]
    product: String,
    #[arg(long = "type", value_parser = parse_movement_type)]
    movement_type: MovementType,
    #[arg(long)]
    qty: f64,
    #[arg(long, default_value_t = 0.0)]
    unit_price: f64,
    #[arg(long, default_value = "")]
    note: String,
  },
}

#[derive(Subcommand, Debug)]
pub enum ProductsCommand {
  List(PageArgs),
  Show {
    id: String,
  },
  /// Add a product to the catalog
  Create {
    /// Product code; the server assigns one when omitted
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    name: String,
    #[arg(long)]
    price: f64,
    #[command(flatten)]
    fields: ProductFields,
  },
  /// Change fields of an existing product
  Update {
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    price: Option<f64>,
    #[command(flatten)]
    fields: ProductFields,
  },
  Delete {
    id: String,
  },
}

/// Optional product fields shared by create and update.
#[derive(Args, Debug, Default)]
pub struct ProductFields {
  #[arg(long)]
  pub import_price: Option<f64>,
  /// Units in stock
  #[arg(long)]
  pub stock: Option<f64>,
  #[arg(long)]
  pub category: Option<String>,
  #[arg(long)]
  pub description: Option<String>,
}

impl ProductFields {
  /// Request body for `products.create` / `products.update`. Only the fields
  /// that were given are sent.
  pub fn payload(
    &self,
    id: Option<&str>,
    name: Option<&str>,
    price: Option<f64>,
  ) -> Map<String, Value> {
    let mut body = Map::new();
    let mut put = |key: &str, value: Option<Value>| {
      if let Some(value) = value {
        body.insert(key.to_string(), value);
      }
    };
    put("id", id.map(Value::from));
    put("name", name.map(Value::from));
    put("price", price.map(Value::from));
    put("import_price", self.import_price.map(Value::from));
    put("amount_in_stock", self.stock.map(Value::from));
    put("category_id", self.category.as_deref().map(Value::from));
    put("description", self.description.as_deref().map(Value::from));
    body
  }
}

#[derive(Subcommand, Debug)]
pub enum InvoicesCommand {
  /// Issue an invoice for a completed order
  Create {
    #[arg(long)]
    order: String,
    /// VAT percentage
    #[arg(long, default_value_t = 0.0)]
    vat_rate: f64,
    #[arg(long, default_value = "")]
    note: String,
  },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
  Set { key: String, value: String },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Drop cached responses, all of them or those whose key matches a regex
  Clear {
    #[arg(long)]
    pattern: Option<String>,
  },
  /// Print a cached payload
  Get { key: String },
  /// List cached keys
  Keys,
}

/// Parse `product:qty:price`, e.g. `P1:2:150000`.
pub fn parse_item(raw: &str) -> Result<OrderItem, String> {
  let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
  let [product_id, qty, price] = parts.as_slice() else {
    return Err(format!("expected product:qty:price, got '{}'", raw));
  };
  if product_id.is_empty() {
    return Err("product id must not be empty".to_string());
  }
  let qty: u32 = qty
    .parse()
    .map_err(|_| format!("invalid quantity '{}'", qty))?;
  if qty == 0 {
    return Err("quantity must be at least 1".to_string());
  }
  let price: f64 = price
    .parse()
    .map_err(|_| format!("invalid price '{}'", price))?;
  if !price.is_finite() || price < 0.0 {
    return Err(format!("invalid price '{}'", price));
  }
  Ok(OrderItem {
    product_id: product_id.to_string(),
    qty,
    price,
  })
}

fn parse_status(raw: &str) -> Result<OrderStatus, String> {
  raw.parse()
}

fn parse_movement_type(raw: &str) -> Result<MovementType, String> {
  raw.parse()
}
