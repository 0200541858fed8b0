use color_eyre::{eyre::eyre, Report, Result};
use futures::future::join_all;
use serde_json::{json, Value};
use std::io::{Stderr, Stdout};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::{
  server_id, ApiClient, ApiError, Backend, CachedApiClient, EdgeClient, ListPage, Movement,
  MovementDraft, MovementType, Order, OrderDraft, OrderStatus, ShippingInfo,
};
use crate::cache::{CacheManager, CacheResult, KeyValueStore, NoopStorage, TtlTable};
use crate::clock::{Clock, SystemClock};
use crate::commands::{
  CacheCommand, Command, CreateOrderArgs, InventoryCommand, InvoicesCommand, OrdersCommand,
  ProductsCommand, SettingsCommand,
};
use crate::config::Config;
use crate::db::{Database, CACHE_NAMESPACE, PENDING_NAMESPACE, SESSION_NAMESPACE};
use crate::session::{Session, SessionCleanup, SessionStore};
use crate::sync::{
  invalidate, recover, Entity, Notice, Outcome, PageState, PendingQueue, RecoveryReport,
  WriteAction, WriteCoordinator,
};
use crate::view::{table, Columns, TerminalView};

/// A list page driven from the terminal.
type Page<T> = WriteCoordinator<T, TerminalView<Stdout, Stderr>>;

/// Main application state
pub struct App {
  config: Config,
  db: Database,
  cache: Arc<CacheManager>,
  sessions: SessionStore,
  session: Session,
  backend: Arc<dyn Backend>,
  reads: CachedApiClient,
  clock: Arc<dyn Clock>,
  /// Writes still unconfirmed when the command finishes
  unconfirmed: usize,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db = Database::open(&config.api.url)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Box<dyn KeyValueStore> = if config.cache.enabled {
      Box::new(db.storage(CACHE_NAMESPACE, config.cache.max_bytes))
    } else {
      Box::new(NoopStorage)
    };
    let cache = Arc::new(CacheManager::new(
      store,
      TtlTable::with_overrides(&config.cache.ttl_secs),
      Arc::clone(&clock),
    ));

    let sessions = SessionStore::new(Box::new(db.storage(SESSION_NAMESPACE, None)));
    let session = sessions.load();

    let client = ApiClient::new(&config, &session)?;
    let edge = match &config.worker.url {
      Some(url) => Some(EdgeClient::new(
        url,
        client.api_key(),
        Duration::from_secs(config.worker.timeout_secs),
      )?),
      None => None,
    };
    let backend: Arc<dyn Backend> = Arc::new(client);
    let reads = CachedApiClient::new(Arc::clone(&backend), edge, Arc::clone(&cache));

    Ok(Self {
      config,
      db,
      cache,
      sessions,
      session,
      backend,
      reads,
      clock,
      unconfirmed: 0,
    })
  }

  pub async fn run(&mut self, command: Command) -> Result<()> {
    let result = self.dispatch(command).await;
    if self.unconfirmed > 0 {
      eprintln!(
        "⚠ {} write(s) are not confirmed yet. They will be retried on the next run.",
        self.unconfirmed
      );
    }
    result
  }

  async fn dispatch(&mut self, command: Command) -> Result<()> {
    match command {
      Command::Login { email } => self.login(&email).await,
      Command::Logout => {
        self.sessions.reset(&self.cache, &mut ());
        self.session = Session::default();
        println!("Signed out.");
        Ok(())
      }
      Command::Orders(cmd) => self.orders(cmd).await,
      Command::Inventory(cmd) => self.inventory(cmd).await,
      Command::Products(cmd) => self.products(cmd).await,
      Command::Reports { name } => self.report(&name).await,
      Command::Invoices(InvoicesCommand::Create {
        order,
        vat_rate,
        note,
      }) => self.create_invoice(&order, vat_rate, &note).await,
      Command::Settings(SettingsCommand::Set { key, value }) => {
        self.update_setting(&key, &value).await
      }
      Command::Recover => self.recover_all().await,
      Command::Pending => {
        self.print_pending();
        Ok(())
      }
      Command::Cache(cmd) => {
        self.cache_command(cmd);
        Ok(())
      }
    }
  }

  // ==========================================================================
  // Session
  // ==========================================================================

  async fn login(&mut self, email: &str) -> Result<()> {
    let password = Config::get_password()?;
    let base = Session {
      api_url: self.config.api.url.clone(),
      api_key: Config::get_api_key()?,
      ..Session::default()
    };
    let client = ApiClient::new(&self.config, &base)?;
    let session = self.sessions.login(&client, base, email, &password).await?;
    println!("Signed in as {} ({})", session.short_email(), session.role);
    self.session = session;
    Ok(())
  }

  fn require_session(&self) -> Result<()> {
    if self.session.is_signed_in() {
      Ok(())
    } else {
      Err(eyre!(
        "Not signed in. Run `stockroom login --email <email>` first."
      ))
    }
  }

  /// Reset the session and let `cleanup` clear whatever page state it owns.
  fn expire_session(&mut self, cleanup: &mut dyn SessionCleanup) -> Report {
    self.sessions.reset(&self.cache, cleanup);
    self.session = Session::default();
    eyre!("Session expired. Sign in again with `stockroom login`.")
  }

  fn api_failure(&mut self, err: ApiError, cleanup: &mut dyn SessionCleanup) -> Report {
    if err.is_auth_expired() {
      self.expire_session(cleanup)
    } else {
      eyre!("{}", err)
    }
  }

  // ==========================================================================
  // Pages
  // ==========================================================================

  fn coordinator<T: Entity + Columns>(&self, page: u32) -> Page<T> {
    WriteCoordinator::new(
      PageState::new(page, self.config.page_size),
      Arc::clone(&self.cache),
      Arc::clone(&self.backend),
      PendingQueue::new(Box::new(self.db.storage(PENDING_NAMESPACE, None))),
      TerminalView::stdio(),
      Arc::clone(&self.clock),
    )
  }

  /// Show a fetched page, then replay what an earlier run left for it.
  async fn open<T: Entity + Columns>(
    &mut self,
    page: u32,
    fetched: Result<CacheResult<ListPage<T>>, ApiError>,
  ) -> Result<(Page<T>, RecoveryReport)> {
    let mut coordinator = self.coordinator::<T>(page);
    let result = match fetched {
      Ok(result) => result,
      Err(err) => return Err(self.api_failure(err, &mut coordinator)),
    };
    info!(noun = T::NOUN, page, source = %result.source, "Page loaded");
    coordinator.load(result.data);

    let report = recover(&mut coordinator, self.config.sync.stale_after()).await;
    if report.auth_expired {
      return Err(self.expire_session(&mut coordinator));
    }
    Ok((coordinator, report))
  }

  async fn open_orders(&mut self, page: u32) -> Result<(Page<Order>, RecoveryReport)> {
    self.require_session()?;
    let fetched = self.reads.orders(page, self.config.page_size).await;
    self.open(page, fetched).await
  }

  async fn open_movements(&mut self, page: u32) -> Result<(Page<Movement>, RecoveryReport)> {
    self.require_session()?;
    let fetched = self.reads.movements(page, self.config.page_size).await;
    self.open(page, fetched).await
  }

  /// Count unsettled writes and turn rejections into an error exit.
  fn finish<T: Entity + Columns>(&mut self, page: &mut Page<T>, outcomes: Vec<Outcome>) -> Result<()> {
    if page.should_confirm_leave() {
      self.unconfirmed += page.pending().in_flight().count();
    }
    if outcomes.iter().any(Outcome::needs_session_reset) {
      return Err(self.expire_session(page));
    }
    let rejected = outcomes
      .iter()
      .filter(|o| matches!(o, Outcome::RolledBack(_)))
      .count();
    if rejected > 0 {
      return Err(eyre!("{} write(s) were rejected", rejected));
    }
    Ok(())
  }

  // ==========================================================================
  // Orders
  // ==========================================================================

  async fn orders(&mut self, cmd: OrdersCommand) -> Result<()> {
    match cmd {
      OrdersCommand::List(args) => {
        let (mut page, _) = self.open_orders(args.page).await?;
        self.finish(&mut page, Vec::new())
      }
      OrdersCommand::Show { id, page: args } => {
        let (mut page, _) = self.open_orders(args.page).await?;
        let order = page
          .page()
          .get(&id)
          .cloned()
          .ok_or_else(|| eyre!("Order {} is not on page {}", id, args.page))?;
        print_order(&order);
        self.finish(&mut page, Vec::new())
      }
      OrdersCommand::Create(args) => self.create_order(args).await,
      OrdersCommand::Status {
        status,
        ids,
        page: args,
      } => self.change_status(status, &ids, args.page).await,
    }
  }

  async fn create_order(&mut self, args: CreateOrderArgs) -> Result<()> {
    let (mut page, _) = self.open_orders(1).await?;
    let draft = OrderDraft {
      customer_id: args.customer,
      items: args.items,
      created_at: local_timestamp(),
      shipping: ShippingInfo {
        address: args.address,
        city: args.city,
        zipcode: args.zipcode,
        note: args.shipping_note,
      },
      note: args.note,
    };
    let outcome = page.create(&draft).await;
    self.finish(&mut page, vec![outcome])
  }

  /// Apply the change to every order at once; requests run concurrently and
  /// each settles against its own row.
  async fn change_status(&mut self, status: OrderStatus, ids: &[String], page_no: u32) -> Result<()> {
    let (mut page, _) = self.open_orders(page_no).await?;

    let mut tickets = Vec::new();
    for id in ids {
      if page.page().get(id).is_none() {
        page.notify(Notice::Warning(format!("Order {} is not on page {}", id, page_no)));
        continue;
      }
      if let Some(ticket) = page.begin_status_change(id, status) {
        tickets.push(ticket);
      }
    }

    let requests: Vec<_> = tickets.iter().map(|ticket| page.submit(ticket)).collect();
    let results = join_all(requests).await;
    let outcomes = tickets
      .into_iter()
      .zip(results)
      .map(|(ticket, result)| page.settle(ticket, result))
      .collect();
    self.finish(&mut page, outcomes)
  }

  // ==========================================================================
  // Inventory and products
  // ==========================================================================

  async fn inventory(&mut self, cmd: InventoryCommand) -> Result<()> {
    match cmd {
      InventoryCommand::List(args) => {
        let (mut page, _) = self.open_movements(args.page).await?;
        self.finish(&mut page, Vec::new())
      }
      InventoryCommand::Add {
        product,
        movement_type,
        qty,
        unit_price,
        note,
      } => {
        if qty <= 0.0 && movement_type != MovementType::Adjust {
          return Err(eyre!("Quantity must be positive"));
        }
        let (mut page, _) = self.open_movements(1).await?;
        let draft = MovementDraft {
          product_id: product,
          movement_type,
          qty,
          unit_price,
          note,
          created_at: local_timestamp(),
        };
        let outcome = page.create(&draft).await;
        self.finish(&mut page, vec![outcome])
      }
    }
  }

  async fn products(&mut self, cmd: ProductsCommand) -> Result<()> {
    self.require_session()?;
    match cmd {
      ProductsCommand::List(args) => {
        let fetched = self.reads.products(args.page, self.config.page_size).await;
        let result = match fetched {
          Ok(result) => result,
          Err(err) => return Err(self.api_failure(err, &mut ())),
        };
        let list = result.data;
        if list.items.is_empty() {
          println!("No records.");
        } else {
          print!("{}", table(&list.items));
          println!(
            "Page {}/{} ({} total, from {})",
            list.page,
            list.total_pages.max(1),
            list.total,
            result.source
          );
        }
        Ok(())
      }
      ProductsCommand::Show { id } => {
        let fetched = self.reads.product(&id).await;
        let product = match fetched {
          Ok(result) => result.data,
          Err(err) => return Err(self.api_failure(err, &mut ())),
        };
        print!("{}", table(&[product]));
        Ok(())
      }
      ProductsCommand::Create {
        id,
        name,
        price,
        fields,
      } => {
        if name.trim().is_empty() {
          return Err(eyre!("Product name must not be empty"));
        }
        if !price.is_finite() || price < 0.0 {
          return Err(eyre!("Invalid price {}", price));
        }
        let body = fields.payload(id.as_deref(), Some(name.as_str()), Some(price));
        let data = self
          .write_through("products.create", Value::Object(body), WriteAction::ProductChanged)
          .await?;
        let id = server_id(&data, "product_id").or(id).unwrap_or_default();
        println!("✓ Product {} created", id);
        Ok(())
      }
      ProductsCommand::Update {
        id,
        name,
        price,
        fields,
      } => {
        let body = fields.payload(Some(id.as_str()), name.as_deref(), price);
        if body.len() == 1 {
          return Err(eyre!("Nothing to update; pass at least one field"));
        }
        self
          .write_through("products.update", Value::Object(body), WriteAction::ProductChanged)
          .await?;
        println!("✓ Product {} updated", id);
        Ok(())
      }
      ProductsCommand::Delete { id } => {
        self
          .write_through("products.delete", json!({ "id": id }), WriteAction::ProductChanged)
          .await?;
        println!("✓ Product {} deleted", id);
        Ok(())
      }
    }
  }

  async fn report(&mut self, name: &str) -> Result<()> {
    self.require_session()?;
    let fetched = self.reads.report(name).await;
    let result = match fetched {
      Ok(result) => result,
      Err(err) => return Err(self.api_failure(err, &mut ())),
    };
    println!("{}", serde_json::to_string_pretty(&result.data)?);
    Ok(())
  }

  // ==========================================================================
  // Write-through actions
  // ==========================================================================

  /// Send a write with no optimistic row, then drop what it made stale.
  async fn write_through(
    &mut self,
    action: &str,
    payload: Value,
    invalidates: WriteAction,
  ) -> Result<Value> {
    self.require_session()?;
    let response = self.backend.call(action, payload).await;
    let data = match response {
      Ok(data) => data,
      Err(err) => return Err(self.api_failure(err, &mut ())),
    };
    invalidate(&self.cache, &invalidates);
    info!(action, "Write confirmed");
    Ok(data)
  }

  async fn create_invoice(&mut self, order_id: &str, vat_rate: f64, note: &str) -> Result<()> {
    let payload = json!({ "order_id": order_id, "vat_rate": vat_rate, "note": note });
    let invalidates = WriteAction::InvoiceCreated {
      order_id: order_id.to_string(),
    };
    let data = self
      .write_through("invoices.create", payload, invalidates)
      .await?;
    let number = ["invoice_number", "invoice_id", "id"]
      .iter()
      .find_map(|field| data.get(*field))
      .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
      .unwrap_or_default();
    println!("✓ Invoice {} created", number);
    Ok(())
  }

  async fn update_setting(&mut self, key: &str, value: &str) -> Result<()> {
    let payload = json!({ "settings": { key: value } });
    self
      .write_through("settings.update", payload, WriteAction::SettingsUpdated)
      .await?;
    println!("✓ Setting {} updated", key);
    Ok(())
  }

  // ==========================================================================
  // Recovery and local state
  // ==========================================================================

  async fn recover_all(&mut self) -> Result<()> {
    let (mut orders, order_report) = self.open_orders(1).await?;
    self.finish(&mut orders, Vec::new())?;
    let (mut movements, movement_report) = self.open_movements(1).await?;
    self.finish(&mut movements, Vec::new())?;

    for (noun, report) in [("order", order_report), ("stock movement", movement_report)] {
      if report.is_empty() {
        continue;
      }
      println!(
        "{}: {} confirmed, {} still pending, {} rejected, {} expired",
        noun, report.confirmed, report.requeued, report.dropped, report.discarded_stale
      );
    }
    Ok(())
  }

  fn print_pending(&self) {
    let queue = PendingQueue::new(Box::new(self.db.storage(PENDING_NAMESPACE, None)));
    let entries = queue.entries();
    if entries.is_empty() {
      println!("No pending writes.");
      return;
    }
    let now = self.clock.now_ms();
    let window = self.config.sync.stale_after();
    for entry in entries {
      let age = Duration::from_millis((now - entry.created_at).max(0) as u64);
      let marker = if entry.is_stale(now, window) {
        "  (expired)"
      } else {
        ""
      };
      println!(
        "{}  {}  {} min ago{}",
        entry.temp_id,
        entry.action,
        age.as_secs() / 60,
        marker
      );
    }
  }

  fn cache_command(&self, cmd: CacheCommand) {
    match cmd {
      CacheCommand::Clear { pattern } => {
        let removed = match pattern {
          Some(pattern) => self.cache.clear_by_prefix(&pattern),
          None => self.cache.clear_all(),
        };
        println!("Removed {} cached entr{}", removed, if removed == 1 { "y" } else { "ies" });
      }
      CacheCommand::Get { key } => match self.cache.get(&key) {
        Some(payload) => match serde_json::to_string_pretty(&payload) {
          Ok(text) => println!("{}", text),
          Err(e) => warn!(key, error = %e, "Failed to print cached payload"),
        },
        None => println!("{} is not cached or has expired", key),
      },
      CacheCommand::Keys => {
        for key in self.cache.keys() {
          println!("{}", key);
        }
      }
    }
  }
}

fn local_timestamp() -> String {
  chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_order(order: &Order) {
  print!("{}", table(std::slice::from_ref(order)));
  let items = order.items();
  if !items.is_empty() {
    println!();
    println!("Items:");
    for item in items {
      println!(
        "  {} x {} @ {} = {}",
        item.product_id,
        item.qty,
        crate::view::format_price(item.price),
        crate::view::format_price(f64::from(item.qty) * item.price)
      );
    }
  }
  if let Ok(shipping) = serde_json::from_str::<ShippingInfo>(&order.shipping_info) {
    let parts: Vec<String> = [shipping.address, shipping.city, shipping.zipcode]
      .into_iter()
      .flatten()
      .collect();
    if !parts.is_empty() {
      println!("Ship to: {}", parts.join(", "));
    }
    if let Some(note) = shipping.note {
      println!("Shipping note: {}", note);
    }
  }
  if !order.note.is_empty() {
    println!("Note: {}", order.note);
  }
}
