//! Replay of writes left unconfirmed by an earlier run.

use std::time::Duration;
use tracing::{info, warn};

use super::coordinator::{Entity, WriteCoordinator};
use super::page::{Notice, View};
use super::pending::PendingWrite;
use crate::api::server_id;

/// What a recovery pass did with the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
  /// Older than the staleness window, removed without being sent
  pub discarded_stale: usize,
  /// Accepted by the server and reconciled
  pub confirmed: usize,
  /// Still unanswered, left for the next run
  pub requeued: usize,
  /// Rejected by the server and removed
  pub dropped: usize,
  /// Replay stopped because the session is no longer valid
  pub auth_expired: bool,
}

impl RecoveryReport {
  pub fn is_empty(&self) -> bool {
    self.discarded_stale + self.confirmed + self.requeued + self.dropped == 0
  }
}

/// Replay the queued writes that belong to `coordinator`'s page.
///
/// Entries are sent one at a time, each resolved before the next is tried.
/// A rejected create also loses its placeholder row if it is still shown.
/// Rows whose writes stay queued keep their controls disabled.
pub async fn recover<T, V>(
  coordinator: &mut WriteCoordinator<T, V>,
  window: Duration,
) -> RecoveryReport
where
  T: Entity,
  V: View<T>,
{
  let mut report = RecoveryReport::default();
  let now = coordinator.now_ms();

  let queued = coordinator.pending().entries().len();
  let fresh = coordinator.pending_mut().take_fresh(now, window);
  report.discarded_stale = queued - fresh.len();

  let replay: Vec<PendingWrite> = fresh
    .into_iter()
    .filter(|entry| T::owns(&entry.action))
    .collect();
  if replay.is_empty() {
    coordinator.guard_queued_rows();
    return report;
  }

  info!(count = replay.len(), action = T::CREATE_ACTION, "Replaying pending writes");
  coordinator.notify(Notice::Info(format!(
    "Recovering {} unsaved {} write(s)...",
    replay.len(),
    T::NOUN
  )));

  let backend = coordinator.backend();
  let mut remaining = replay.into_iter();
  for entry in remaining.by_ref() {
    coordinator.pending_mut().mark_in_flight(&entry.temp_id);
    let result = backend.call(&entry.action, entry.payload.clone()).await;

    match result {
      Ok(response) if entry.action == T::CREATE_ACTION => {
        coordinator.confirm_create(&entry.temp_id, &response);
        info!(temp_id = %entry.temp_id, id = ?server_id(&response, T::ID_FIELD), "Recovered pending write");
        report.confirmed += 1;
      }
      Ok(response) => {
        coordinator.pending_mut().end(&entry.temp_id);
        match T::update_target(&entry.payload) {
          Some((record_id, invalidates)) => {
            coordinator.apply_replayed_update(&record_id, &response, &invalidates);
            report.confirmed += 1;
          }
          None => {
            warn!(temp_id = %entry.temp_id, "Replayed update has no target, dropping");
            report.dropped += 1;
          }
        }
      }
      Err(err) if err.is_ambiguous() => {
        warn!(temp_id = %entry.temp_id, error = %err, "Still offline, will retry next run");
        report.requeued += 1;
      }
      Err(err) if err.is_auth_expired() => {
        // Not a verdict on the write; keep it for after the next sign-in
        warn!(temp_id = %entry.temp_id, error = %err, "Session expired during replay");
        coordinator.pending_mut().unmark_in_flight(&entry.temp_id);
        report.requeued += 1;
        report.auth_expired = true;
        break;
      }
      Err(err) => {
        warn!(temp_id = %entry.temp_id, error = %err, "Pending write rejected, discarding");
        coordinator.pending_mut().end(&entry.temp_id);
        if coordinator.page().get(&entry.temp_id).is_some() {
          coordinator.drop_placeholder(&entry.temp_id);
        }
        report.dropped += 1;
      }
    }
  }
  report.requeued += remaining.count();
  coordinator.guard_queued_rows();

  if report.dropped > 0 {
    coordinator.notify(Notice::Warning(format!(
      "{} unsaved {} write(s) were rejected by the server",
      report.dropped,
      T::NOUN
    )));
  }
  info!(?report, "Recovery finished");
  report
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{ApiError, ListPage, Order, OrderStatus};
  use crate::cache::{CacheManager, MemoryStorage, TtlTable};
  use crate::clock::ManualClock;
  use crate::sync::page::PageState;
  use crate::sync::pending::PendingQueue;
  use crate::sync::testing::{RecordingView, ScriptedBackend};
  use serde_json::json;
  use std::sync::Arc;

  const HOUR: Duration = Duration::from_secs(3600);
  const NOW: i64 = 100 * 3_600_000;

  struct Harness {
    coordinator: WriteCoordinator<Order, RecordingView>,
    backend: Arc<ScriptedBackend>,
    cache: Arc<CacheManager>,
  }

  /// A fresh run whose queue holds `entries` from an earlier one.
  fn harness(entries: &[PendingWrite], rows: &[&str]) -> Harness {
    let clock = Arc::new(ManualClock::new(NOW));
    let cache = Arc::new(CacheManager::new(
      Box::new(MemoryStorage::new()),
      TtlTable::default(),
      clock.clone(),
    ));
    let store = Arc::new(MemoryStorage::new());
    let mut earlier = PendingQueue::new(Box::new(store.clone()));
    for entry in entries {
      earlier.start(entry.clone());
    }

    let backend = Arc::new(ScriptedBackend::new());
    let mut coordinator = WriteCoordinator::new(
      PageState::new(1, 20),
      cache.clone(),
      backend.clone(),
      PendingQueue::new(Box::new(store)),
      RecordingView::default(),
      clock,
    );
    let items = rows
      .iter()
      .map(|id| serde_json::from_value(json!({"id": id, "customer_id": "C2"})).unwrap())
      .collect::<Vec<Order>>();
    let total = items.len() as u64;
    coordinator.load(ListPage {
      items,
      total,
      page: 1,
      limit: 20,
      total_pages: 1,
    });
    Harness {
      coordinator,
      backend,
      cache,
    }
  }

  fn create(temp_id: &str, age_ms: i64) -> PendingWrite {
    PendingWrite {
      temp_id: temp_id.to_string(),
      action: "orders.create".to_string(),
      payload: json!({"customer_id": "C2", "items": []}),
      created_at: NOW - age_ms,
    }
  }

  fn ids(h: &Harness) -> Vec<String> {
    h.coordinator
      .page()
      .items()
      .iter()
      .map(|o| o.id.clone())
      .collect()
  }

  #[tokio::test]
  async fn test_replay_reconciles_placeholder() {
    let mut h = harness(&[create("T2", 5 * 60_000)], &["T2", "8"]);
    h.backend.push_ok(json!({"order_id": "R9"}));

    let report = recover(&mut h.coordinator, HOUR).await;

    assert_eq!(report.confirmed, 1);
    assert_eq!(
      h.backend.calls(),
      vec![(
        "orders.create".to_string(),
        json!({"customer_id": "C2", "items": []})
      )]
    );
    assert!(!h.coordinator.pending().contains("T2"));
    assert_eq!(ids(&h), vec!["R9", "8"]);
    assert!(!h.coordinator.should_confirm_leave());
  }

  #[tokio::test]
  async fn test_stale_entries_are_not_resubmitted() {
    let mut h = harness(&[create("T_old", 2 * 3_600_000)], &[]);

    let report = recover(&mut h.coordinator, HOUR).await;

    assert_eq!(report.discarded_stale, 1);
    assert!(h.backend.calls().is_empty());
    assert!(h.coordinator.pending().entries().is_empty());
    assert!(h.coordinator.view().notices.is_empty());
  }

  #[tokio::test]
  async fn test_ambiguous_failure_stays_queued() {
    let mut h = harness(&[create("T3", 60_000)], &["T3"]);
    h.backend.push_err(ApiError::transport("connection refused"));

    let report = recover(&mut h.coordinator, HOUR).await;

    assert_eq!(report.requeued, 1);
    assert!(h.coordinator.pending().contains("T3"));
    assert_eq!(ids(&h), vec!["T3"]);
    assert!(h.coordinator.should_confirm_leave());
  }

  #[tokio::test]
  async fn test_requeued_create_keeps_row_guarded() {
    let mut h = harness(&[create("T3", 60_000)], &["T3", "8"]);
    h.backend.push_err(ApiError::transport("connection refused"));

    recover(&mut h.coordinator, HOUR).await;

    assert!(h.coordinator.pending().contains("T3"));
    assert!(h.coordinator.page().is_disabled("T3"));
    assert!(!h.coordinator.page().is_disabled("8"));
    assert!(h
      .coordinator
      .begin_status_change("T3", OrderStatus::Done)
      .is_none());
    assert_eq!(h.backend.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_requeued_status_change_blocks_another() {
    let entry = PendingWrite {
      temp_id: "temp_1_2".to_string(),
      action: "orders.updateStatus".to_string(),
      payload: json!({"order_id": "8", "new_status": "DONE"}),
      created_at: NOW - 60_000,
    };
    let mut h = harness(&[entry], &["8", "9"]);
    h.backend.push_err(ApiError::transport("timed out"));

    let report = recover(&mut h.coordinator, HOUR).await;

    assert_eq!(report.requeued, 1);
    assert!(h.coordinator.page().is_disabled("8"));
    assert!(h
      .coordinator
      .begin_status_change("8", OrderStatus::Cancel)
      .is_none());
    assert!(h
      .coordinator
      .begin_status_change("9", OrderStatus::Cancel)
      .is_some());
    assert_eq!(h.backend.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_definite_failure_drops_entry_and_row() {
    let mut h = harness(&[create("T4", 60_000)], &["T4", "8"]);
    h.backend
      .push_err(ApiError::rejected(Some("Duplicate order".to_string())));

    let report = recover(&mut h.coordinator, HOUR).await;

    assert_eq!(report.dropped, 1);
    assert!(h.coordinator.pending().entries().is_empty());
    assert_eq!(ids(&h), vec!["8"]);
    assert!(matches!(
      h.coordinator.view().last_notice(),
      Some(Notice::Warning(_))
    ));
  }

  #[tokio::test]
  async fn test_replay_is_sequential_and_stops_on_auth_expiry() {
    let mut h = harness(
      &[create("T5", 3_000), create("T6", 2_000), create("T7", 1_000)],
      &[],
    );
    h.backend.push_ok(json!({"order_id": "R5"}));
    h.backend
      .push_err(ApiError::rejected(Some("Token expired".to_string())));

    let report = recover(&mut h.coordinator, HOUR).await;

    assert!(report.auth_expired);
    assert_eq!(report.confirmed, 1);
    assert_eq!(report.requeued, 2);
    assert_eq!(h.backend.calls().len(), 2);
    let left: Vec<_> = h
      .coordinator
      .pending()
      .entries()
      .into_iter()
      .map(|e| e.temp_id)
      .collect();
    assert_eq!(left, vec!["T6", "T7"]);
  }

  #[tokio::test]
  async fn test_replayed_status_change_updates_row() {
    let entry = PendingWrite {
      temp_id: "temp_1_1".to_string(),
      action: "orders.updateStatus".to_string(),
      payload: json!({"order_id": "8", "new_status": "DONE"}),
      created_at: NOW - 60_000,
    };
    let mut h = harness(&[entry], &["8"]);
    h.cache.set("product_detail_P1", &json!({}));
    h.backend.push_ok(json!({"order_id": "8", "status": "DONE"}));

    let report = recover(&mut h.coordinator, HOUR).await;

    assert_eq!(report.confirmed, 1);
    assert_eq!(
      h.coordinator.page().get("8").unwrap().status,
      OrderStatus::Done
    );
    assert!(h.cache.get("product_detail_P1").is_none());
  }

  #[tokio::test]
  async fn test_other_pages_entries_are_left_alone() {
    let movement = PendingWrite {
      temp_id: "temp_9_9".to_string(),
      action: "inventory.create".to_string(),
      payload: json!({}),
      created_at: NOW - 60_000,
    };
    let mut h = harness(&[movement], &[]);

    let report = recover(&mut h.coordinator, HOUR).await;

    assert!(report.is_empty());
    assert!(h.backend.calls().is_empty());
    assert!(h.coordinator.pending().contains("temp_9_9"));
  }
}
