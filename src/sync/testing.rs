//! Test doubles for the write path.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::page::{Notice, PageState, View};
use crate::api::{ApiError, Backend};
use crate::cache::Cacheable;

/// Backend answering from a script, recording every call it receives.
///
/// An exhausted script answers with a transport error.
#[derive(Default)]
pub struct ScriptedBackend {
  responses: Mutex<VecDeque<Result<Value, ApiError>>>,
  calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedBackend {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push_ok(&self, data: Value) {
    self.responses.lock().unwrap().push_back(Ok(data));
  }

  pub fn push_err(&self, err: ApiError) {
    self.responses.lock().unwrap().push_back(Err(err));
  }

  pub fn calls(&self) -> Vec<(String, Value)> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Backend for ScriptedBackend {
  async fn call(&self, action: &str, data: Value) -> Result<Value, ApiError> {
    self.calls.lock().unwrap().push((action.to_string(), data));
    self
      .responses
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| Err(ApiError::transport("connection refused")))
  }
}

/// View that remembers what it was asked to draw.
#[derive(Debug, Default)]
pub struct RecordingView {
  /// Row ids of each full render, in render order
  pub pages: Vec<Vec<String>>,
  /// `(id, disabled)` of each single-row render
  pub rows: Vec<(String, bool)>,
  pub notices: Vec<Notice>,
}

impl RecordingView {
  pub fn last_notice(&self) -> Option<&Notice> {
    self.notices.last()
  }
}

impl<T: Cacheable> View<T> for RecordingView {
  fn render_page(&mut self, page: &PageState<T>) {
    self
      .pages
      .push(page.items().iter().map(|r| r.cache_key().to_string()).collect());
  }

  fn render_row(&mut self, record: &T, disabled: bool) {
    self.rows.push((record.cache_key().to_string(), disabled));
  }

  fn notify(&mut self, notice: Notice) {
    self.notices.push(notice);
  }
}
