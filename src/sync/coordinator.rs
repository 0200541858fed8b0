//! Optimistic write coordinator.
//!
//! A write shows up in the page, its row and the page's cache entry before the
//! server answers, then converges on whatever the server decides:
//!
//! ```text
//! Drafted -> Optimistic -> Confirmed | RolledBack | Orphaned
//! ```
//!
//! A validated [`Draft`] is the Drafted state and has no side effects.
//! `begin_*` moves it to Optimistic, [`WriteCoordinator::submit`] issues the
//! request, and [`WriteCoordinator::settle`] applies the answer. The phases are
//! split so callers can interleave several writes on one task; every settle is
//! keyed by the ticket's own ids and never depends on another write's state.

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::invalidation::{invalidate, WriteAction};
use super::page::{Notice, PageState, View};
use super::pending::{is_temp_id, next_temp_id, PendingQueue, PendingWrite};
use crate::api::{
  server_id, ApiError, Backend, Draft, ListPage, Movement, Order, OrderStatus, QueryKey,
};
use crate::cache::{CacheManager, Cacheable};
use crate::clock::Clock;
use crate::session::SessionCleanup;

/// A record type that can be written optimistically.
pub trait Entity: Cacheable + 'static {
  /// Action creating a record from a draft payload
  const CREATE_ACTION: &'static str;
  /// Action updating an existing record, if the page offers one
  const UPDATE_ACTION: Option<&'static str> = None;
  /// Field carrying the server id in write responses
  const ID_FIELD: &'static str;
  /// Second segment of the page's cache key
  const LIST_VIEW: &'static str;
  /// Lower-case name used in notices
  const NOUN: &'static str;

  fn set_record_id(&mut self, id: &str);

  /// What a successful create makes stale.
  fn created_action() -> WriteAction;

  /// Record id and invalidation for a replayed update payload.
  fn update_target(_payload: &Value) -> Option<(String, WriteAction)> {
    None
  }

  /// Whether queued writes with `action` belong to pages of this record.
  fn owns(action: &str) -> bool {
    action == Self::CREATE_ACTION || Self::UPDATE_ACTION == Some(action)
  }

  /// This record with the server's fields laid over it and `id` as its id.
  ///
  /// Fields the server leaves out or sends as null keep their local value.
  fn merged(&self, response: &Value, id: &str) -> Self {
    let mut fields = match serde_json::to_value(self) {
      Ok(Value::Object(fields)) => fields,
      _ => serde_json::Map::new(),
    };
    if let Value::Object(server) = response {
      for (key, value) in server {
        if key == "id" || key == Self::ID_FIELD || value.is_null() {
          continue;
        }
        fields.insert(key.clone(), value.clone());
      }
    }
    fields.insert("id".to_string(), Value::String(id.to_string()));

    serde_json::from_value(Value::Object(fields)).unwrap_or_else(|e| {
      debug!(id, error = %e, "Server record did not merge, keeping local fields");
      let mut record = self.clone();
      record.set_record_id(id);
      record
    })
  }
}

/// Where a write stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
  /// Visible locally and waiting on the server
  Optimistic,
  /// The server accepted the write
  Confirmed,
  /// The server refused the write and local state was undone
  RolledBack,
  /// The answer was lost; local state is kept and the write will be replayed
  Orphaned,
}

/// Result of settling a write.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  /// `id` is the server id of the record, or the local id when the server
  /// did not report one.
  Confirmed { id: String },
  RolledBack(ApiError),
  Orphaned,
}

impl Outcome {
  pub fn state(&self) -> WriteState {
    match self {
      Outcome::Confirmed { .. } => WriteState::Confirmed,
      Outcome::RolledBack(_) => WriteState::RolledBack,
      Outcome::Orphaned => WriteState::Orphaned,
    }
  }

  /// The rejection says the session is no longer valid.
  pub fn needs_session_reset(&self) -> bool {
    matches!(self, Outcome::RolledBack(err) if err.is_auth_expired())
  }
}

#[derive(Debug, Clone)]
enum Change<T> {
  /// Placeholder row under the ticket's temp id
  Create,
  /// Existing row edited in place; `original` is restored on rejection
  Update {
    record_id: String,
    original: T,
    invalidates: WriteAction,
  },
}

/// A write that has been applied locally and registered as pending.
#[derive(Debug, Clone)]
pub struct WriteTicket<T> {
  temp_id: String,
  action: &'static str,
  payload: Value,
  change: Change<T>,
}

#[cfg(test)]
impl<T> WriteTicket<T> {
  pub fn temp_id(&self) -> &str {
    &self.temp_id
  }

  /// Id of the row the write shows up under.
  pub fn row_id(&self) -> &str {
    match &self.change {
      Change::Create => &self.temp_id,
      Change::Update { record_id, .. } => record_id,
    }
  }

  pub fn state(&self) -> WriteState {
    WriteState::Optimistic
  }
}

/// Owns one page's list and drives every write issued from that page.
pub struct WriteCoordinator<T, V> {
  page: PageState<T>,
  cache: Arc<CacheManager>,
  backend: Arc<dyn Backend>,
  pending: PendingQueue,
  view: V,
  clock: Arc<dyn Clock>,
}

impl<T: Entity, V: View<T>> WriteCoordinator<T, V> {
  pub fn new(
    page: PageState<T>,
    cache: Arc<CacheManager>,
    backend: Arc<dyn Backend>,
    pending: PendingQueue,
    view: V,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      page,
      cache,
      backend,
      pending,
      view,
      clock,
    }
  }

  pub fn page(&self) -> &PageState<T> {
    &self.page
  }

  #[cfg(test)]
  pub fn view(&self) -> &V {
    &self.view
  }

  pub fn pending(&self) -> &PendingQueue {
    &self.pending
  }

  pub(super) fn pending_mut(&mut self) -> &mut PendingQueue {
    &mut self.pending
  }

  pub(super) fn now_ms(&self) -> i64 {
    self.clock.now_ms()
  }

  /// Show a freshly fetched page.
  pub fn load(&mut self, list: ListPage<T>) {
    self.page.load(list);
    self.render_page();
  }

  /// True while a write from this page has not settled; orphaned writes count.
  pub fn should_confirm_leave(&self) -> bool {
    self.pending.has_in_flight()
  }

  pub fn notify(&mut self, notice: Notice) {
    self.view.notify(notice);
  }

  /// Rows with a queued write of this page's kind: placeholders by temp id,
  /// updated records by their own id.
  fn queued_rows(&self) -> Vec<String> {
    self
      .pending
      .entries()
      .into_iter()
      .filter(|entry| T::owns(&entry.action))
      .filter_map(|entry| {
        if entry.action == T::CREATE_ACTION {
          Some(entry.temp_id)
        } else {
          T::update_target(&entry.payload).map(|(id, _)| id)
        }
      })
      .collect()
  }

  /// Disable exactly the rows whose writes are still queued.
  pub(super) fn guard_queued_rows(&mut self) {
    let busy = self.queued_rows();
    self.page.rendered(busy);
  }

  /// Whether `id` can take a new write: settled on the server and not busy.
  fn accepts_write(&self, id: &str) -> bool {
    !is_temp_id(id)
      && !self.page.is_disabled(id)
      && !self.queued_rows().iter().any(|row| row == id)
  }

  /// Cache key of the page this coordinator owns.
  pub fn page_key(&self) -> String {
    QueryKey::page_of::<T>(T::LIST_VIEW, self.page.page, self.page.limit).cache_key()
  }

  // ==========================================================================
  // Create
  // ==========================================================================

  /// Show the draft as a placeholder row and register it as pending.
  pub fn begin_create<D: Draft<Record = T>>(&mut self, draft: &D) -> WriteTicket<T> {
    let now = self.clock.now_ms();
    let temp_id = next_temp_id(now);
    let placeholder = draft.placeholder(&temp_id);
    let payload = draft.payload();

    self.page.insert_sorted(placeholder.clone());
    self.page.disable_row(&temp_id);
    self.view.render_row(&placeholder, true);
    self.cache_upsert(&placeholder);

    self.pending.start(PendingWrite {
      temp_id: temp_id.clone(),
      action: T::CREATE_ACTION.to_string(),
      payload: payload.clone(),
      created_at: now,
    });
    info!(temp_id = %temp_id, action = T::CREATE_ACTION, "Optimistic create");

    WriteTicket {
      temp_id,
      action: T::CREATE_ACTION,
      payload,
      change: Change::Create,
    }
  }

  /// Issue the request for a ticket. The future owns everything it uses.
  pub fn submit(
    &self,
    ticket: &WriteTicket<T>,
  ) -> BoxFuture<'static, Result<Value, ApiError>> {
    let backend = Arc::clone(&self.backend);
    let action = ticket.action;
    let payload = ticket.payload.clone();
    Box::pin(async move { backend.call(action, payload).await })
  }

  /// Apply the server's answer to a ticket.
  pub fn settle(&mut self, ticket: WriteTicket<T>, result: Result<Value, ApiError>) -> Outcome {
    let outcome = match (&ticket.change, result) {
      (Change::Create, Ok(response)) => self.confirm_create(&ticket.temp_id, &response),
      (Change::Create, Err(err)) if err.is_ambiguous() => {
        warn!(temp_id = %ticket.temp_id, error = %err, "Create outcome unknown, keeping placeholder");
        self.view.notify(Notice::Info(format!(
          "Connection lost. The {} may have been saved and will be verified on the next run.",
          T::NOUN
        )));
        Outcome::Orphaned
      }
      (Change::Create, Err(err)) => {
        self.pending.end(&ticket.temp_id);
        self.drop_placeholder(&ticket.temp_id);
        warn!(temp_id = %ticket.temp_id, error = %err, "Create rejected, rolled back");
        self.view.notify(Notice::Error(format!(
          "Failed to create {}: {}",
          T::NOUN,
          err.message()
        )));
        Outcome::RolledBack(err)
      }
      (
        Change::Update {
          record_id,
          invalidates,
          ..
        },
        Ok(response),
      ) => {
        self.pending.end(&ticket.temp_id);
        self.confirm_update(record_id, &response, invalidates);
        self.view.notify(Notice::Success(format!(
          "{} {} updated",
          capitalize(T::NOUN),
          record_id
        )));
        Outcome::Confirmed {
          id: record_id.clone(),
        }
      }
      (Change::Update { record_id, .. }, Err(err)) if err.is_ambiguous() => {
        warn!(id = %record_id, error = %err, "Update outcome unknown, keeping optimistic row");
        if let Some(record) = self.page.get(record_id).cloned() {
          self.cache_upsert(&record);
        }
        // The server may have moved stock before the answer was lost
        invalidate(&self.cache, &WriteAction::ProductChanged);
        self.view.notify(Notice::Info(
          "Connection lost. The change will be verified on the next run.".to_string(),
        ));
        Outcome::Orphaned
      }
      (
        Change::Update {
          record_id,
          original,
          ..
        },
        Err(err),
      ) => {
        self.pending.end(&ticket.temp_id);
        self.page.replace(record_id, original.clone());
        self.view.render_row(original, false);
        self.cache_upsert(original);
        warn!(id = %record_id, error = %err, "Update rejected, restored original");
        self.view.notify(Notice::Error(format!("Update failed: {}", err.message())));
        Outcome::RolledBack(err)
      }
    };
    debug!(temp_id = %ticket.temp_id, state = ?outcome.state(), "Write settled");
    outcome
  }

  /// Begin, submit and settle a create in one go.
  pub async fn create<D: Draft<Record = T>>(&mut self, draft: &D) -> Outcome {
    let ticket = self.begin_create(draft);
    let result = self.submit(&ticket).await;
    self.settle(ticket, result)
  }

  pub(super) fn confirm_create(&mut self, temp_id: &str, response: &Value) -> Outcome {
    self.pending.end(temp_id);

    let Some(id) = server_id(response, T::ID_FIELD) else {
      // Nothing to reconcile against; the next fetch shows the server's row
      warn!(temp_id, "Create confirmed without an id");
      self.drop_placeholder(temp_id);
      self.cache.remove(&self.page_key());
      self.view.notify(Notice::Success(format!("{} created", capitalize(T::NOUN))));
      return Outcome::Confirmed {
        id: temp_id.to_string(),
      };
    };

    let in_page = self.reconcile(temp_id, &id, response);
    invalidate(&self.cache, &T::created_action());
    if in_page {
      self.cache_seed();
    }
    info!(temp_id, id = %id, "Create confirmed");
    self.view.notify(Notice::Success(format!("{} created", capitalize(T::NOUN))));
    Outcome::Confirmed { id }
  }

  /// Swap the placeholder for the server record in memory, row and cache.
  fn reconcile(&mut self, temp_id: &str, id: &str, response: &Value) -> bool {
    let Some(placeholder) = self.page.get(temp_id).cloned() else {
      // Not on this page; refetch rather than guess where the record lands
      self.cache.remove(&self.page_key());
      return false;
    };
    let record = placeholder.merged(response, id);
    self.page.replace(temp_id, record.clone());
    self.view.render_row(&record, false);
    self.cache_replace(temp_id, &record);
    true
  }

  /// Remove a placeholder from memory, view and cache.
  pub(super) fn drop_placeholder(&mut self, temp_id: &str) {
    self.page.remove(temp_id);
    self.cache_remove(temp_id);
    self.render_page();
  }

  fn confirm_update(&mut self, record_id: &str, response: &Value, invalidates: &WriteAction) {
    if let Some(current) = self.page.get(record_id).cloned() {
      let id = server_id(response, T::ID_FIELD).unwrap_or_else(|| record_id.to_string());
      let record = current.merged(response, &id);
      self.page.replace(record_id, record.clone());
      self.view.render_row(&record, false);
      self.cache_upsert(&record);
    }
    invalidate(&self.cache, invalidates);
    info!(id = record_id, "Update confirmed");
  }

  pub(super) fn backend(&self) -> Arc<dyn Backend> {
    Arc::clone(&self.backend)
  }

  /// Apply a replayed update's confirmation to the row it targets.
  pub(super) fn apply_replayed_update(
    &mut self,
    record_id: &str,
    response: &Value,
    invalidates: &WriteAction,
  ) {
    self.confirm_update(record_id, response, invalidates);
  }

  // ==========================================================================
  // Page cache entry
  // ==========================================================================

  fn cached_page(&self) -> Option<ListPage<T>> {
    self.cache.get_as::<ListPage<T>>(&self.page_key())
  }

  /// Write the in-memory page as the cache entry.
  fn cache_seed(&self) {
    self.cache.set(&self.page_key(), &self.page.to_list_page());
  }

  /// Insert or replace `record` in the cached page, seeding it if absent.
  fn cache_upsert(&self, record: &T) {
    let Some(mut list) = self.cached_page() else {
      self.cache_seed();
      return;
    };
    match list.items.iter().position(|r| r.cache_key() == record.cache_key()) {
      Some(at) => list.items[at] = record.clone(),
      None => {
        let at = list
          .items
          .iter()
          .position(|r| r.sort_key() < record.sort_key())
          .unwrap_or(list.items.len());
        list.items.insert(at, record.clone());
        list.total += 1;
        if self.page.limit > 0 {
          list.items.truncate(self.page.limit as usize);
        }
      }
    }
    self.cache.set(&self.page_key(), &list);
  }

  fn cache_replace(&self, old_id: &str, record: &T) {
    let Some(mut list) = self.cached_page() else {
      self.cache_seed();
      return;
    };
    match list.items.iter().position(|r| r.cache_key() == old_id) {
      Some(at) => {
        list.items[at] = record.clone();
        self.cache.set(&self.page_key(), &list);
      }
      None => self.cache_upsert(record),
    }
  }

  fn cache_remove(&self, id: &str) {
    let Some(mut list) = self.cached_page() else {
      return;
    };
    let before = list.items.len();
    list.items.retain(|r| r.cache_key() != id);
    if list.items.len() != before {
      list.total = list.total.saturating_sub(1);
      self.cache.set(&self.page_key(), &list);
    }
  }

  fn render_page(&mut self) {
    self.guard_queued_rows();
    self.view.render_page(&self.page);
  }
}

impl<V: View<Order>> WriteCoordinator<Order, V> {
  /// Apply a status change to the row and register it as pending.
  ///
  /// Returns `None` when the order is not on this page, has no server id yet
  /// or already has a write waiting on the server.
  pub fn begin_status_change(
    &mut self,
    order_id: &str,
    status: OrderStatus,
  ) -> Option<WriteTicket<Order>> {
    let original = self.page.get(order_id)?.clone();
    if !self.accepts_write(order_id) {
      self.view.notify(Notice::Warning(format!(
        "Order {} is still being saved",
        order_id
      )));
      return None;
    }

    let mut optimistic = original.clone();
    optimistic.status = status;
    self.page.replace(order_id, optimistic.clone());
    self.page.disable_row(order_id);
    self.view.render_row(&optimistic, true);
    self.view.notify(Notice::Info("Updating status...".to_string()));

    let now = self.clock.now_ms();
    let temp_id = next_temp_id(now);
    let payload = serde_json::json!({ "order_id": order_id, "new_status": status });
    self.pending.start(PendingWrite {
      temp_id: temp_id.clone(),
      action: STATUS_ACTION.to_string(),
      payload: payload.clone(),
      created_at: now,
    });
    info!(id = order_id, %status, "Optimistic status change");

    Some(WriteTicket {
      temp_id,
      action: STATUS_ACTION,
      payload,
      change: Change::Update {
        record_id: order_id.to_string(),
        original,
        invalidates: WriteAction::OrderStatusChanged(status),
      },
    })
  }

  /// Begin, submit and settle a status change in one go.
  #[cfg(test)]
  pub async fn change_status(&mut self, order_id: &str, status: OrderStatus) -> Option<Outcome> {
    let ticket = self.begin_status_change(order_id, status)?;
    let result = self.submit(&ticket).await;
    Some(self.settle(ticket, result))
  }
}

/// Pages drop their list when the session resets.
impl<T: Entity, V: View<T>> SessionCleanup for WriteCoordinator<T, V> {
  fn on_session_reset(&mut self) {
    self.page.clear();
    self.render_page();
  }
}

fn capitalize(word: &str) -> String {
  let mut chars = word.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

// ============================================================================
// Entity implementations
// ============================================================================

const STATUS_ACTION: &str = "orders.updateStatus";

impl Entity for Order {
  const CREATE_ACTION: &'static str = "orders.create";
  const UPDATE_ACTION: Option<&'static str> = Some(STATUS_ACTION);
  const ID_FIELD: &'static str = "order_id";
  const LIST_VIEW: &'static str = "list";
  const NOUN: &'static str = "order";

  fn set_record_id(&mut self, id: &str) {
    self.id = id.to_string();
  }

  fn created_action() -> WriteAction {
    WriteAction::OrderCreated
  }

  fn update_target(payload: &Value) -> Option<(String, WriteAction)> {
    let id = server_id(payload, "order_id")?;
    let status = payload.get("new_status")?.as_str()?.parse().ok()?;
    Some((id, WriteAction::OrderStatusChanged(status)))
  }
}

impl Entity for Movement {
  const CREATE_ACTION: &'static str = "inventory.create";
  const ID_FIELD: &'static str = "movement_id";
  const LIST_VIEW: &'static str = "movements";
  const NOUN: &'static str = "stock movement";

  fn set_record_id(&mut self, id: &str) {
    self.id = id.to_string();
  }

  fn created_action() -> WriteAction {
    WriteAction::MovementCreated
  }
}
