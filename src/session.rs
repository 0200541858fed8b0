//! Signed-in session and the single session-reset routine.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::api::Backend;
use crate::cache::{CacheManager, KeyValueStore};
use crate::sync::{invalidate, WriteAction};

const SESSION_KEY: &str = "current";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
  #[serde(default)]
  pub api_url: String,
  #[serde(default)]
  pub api_key: String,
  #[serde(default)]
  pub token: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub role: String,
}

impl Session {
  pub fn is_signed_in(&self) -> bool {
    !self.token.is_empty()
  }

  /// `abc...example.com` style short form of the email.
  pub fn short_email(&self) -> String {
    match self.email.split_once('@') {
      Some((local, domain)) if local.chars().count() > 3 => {
        let prefix: String = local.chars().take(3).collect();
        format!("{}...{}", prefix, domain)
      }
      _ => self.email.clone(),
    }
  }
}

/// Page-specific cleanup run after the session is reset.
pub trait SessionCleanup {
  fn on_session_reset(&mut self);
}

/// No page state to clean up.
impl SessionCleanup for () {
  fn on_session_reset(&mut self) {}
}

/// Persists the session in its own namespace, apart from the cache.
pub struct SessionStore {
  store: Box<dyn KeyValueStore>,
}

impl SessionStore {
  pub fn new(store: Box<dyn KeyValueStore>) -> Self {
    Self { store }
  }

  /// Load the saved session, or an empty one.
  pub fn load(&self) -> Session {
    match self.store.get(SESSION_KEY) {
      Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(error = %e, "Discarding unreadable session");
        Session::default()
      }),
      Ok(None) => Session::default(),
      Err(e) => {
        warn!(error = %e, "Failed to read session");
        Session::default()
      }
    }
  }

  pub fn save(&self, session: &Session) -> Result<()> {
    let raw = serde_json::to_string(session).map_err(|e| eyre!("Failed to encode session: {}", e))?;
    self
      .store
      .set(SESSION_KEY, &raw)
      .map_err(|e| eyre!("Failed to save session: {}", e))
  }

  pub fn clear(&self) {
    if let Err(e) = self.store.remove(SESSION_KEY) {
      warn!(error = %e, "Failed to clear session");
    }
  }

  /// Sign in and persist the resulting session.
  pub async fn login(
    &self,
    backend: &dyn Backend,
    mut session: Session,
    email: &str,
    password: &str,
  ) -> Result<Session> {
    if session.api_key.is_empty() || email.is_empty() || password.is_empty() {
      return Err(eyre!("API key, email and password are all required"));
    }

    let data = backend
      .call("auth.login", json!({ "email": email, "password": password }))
      .await
      .map_err(|e| eyre!("Login failed: {}", e))?;

    let field = |name: &str| {
      data
        .get(name)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
    };
    session.token = field("token");
    if session.token.is_empty() {
      return Err(eyre!("Login response did not include a token"));
    }
    session.email = match field("email") {
      e if e.is_empty() => email.to_string(),
      e => e,
    };
    session.role = field("role");

    self.save(&session)?;
    info!(email = %session.short_email(), role = %session.role, "Signed in");
    Ok(session)
  }

  /// Sign out: forget the session, flush the cache, then let the page clean up.
  pub fn reset(&self, cache: &CacheManager, cleanup: &mut dyn SessionCleanup) {
    self.clear();
    invalidate(cache, &WriteAction::Logout);
    cleanup.on_session_reset();
    info!("Session reset");
  }
}
