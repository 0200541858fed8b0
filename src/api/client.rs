use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::session::Session;

use super::error::{ApiError, ErrorKind};
use super::types::{ApiRequest, Envelope};

/// Action that doesn't need an API key on the session yet.
const LOGIN_ACTION: &str = "auth.login";

/// Anything that can execute a named API action.
#[async_trait]
pub trait Backend: Send + Sync {
  async fn call(&self, action: &str, data: Value) -> Result<Value, ApiError>;
}

/// Script API client wrapper
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  url: String,
  api_key: String,
  token: String,
}

impl ApiClient {
  pub fn new(config: &Config, session: &Session) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let url = if session.api_url.is_empty() {
      config.api.url.clone()
    } else {
      session.api_url.clone()
    };
    let api_key = if session.api_key.is_empty() {
      Config::get_api_key().unwrap_or_default()
    } else {
      session.api_key.clone()
    };

    Ok(Self {
      http,
      url,
      api_key,
      token: session.token.clone(),
    })
  }

  pub fn api_key(&self) -> &str {
    &self.api_key
  }

  /// Add the session token to object payloads that don't carry one.
  fn with_token(&self, mut data: Value) -> Value {
    if self.token.is_empty() {
      return data;
    }
    if let Value::Object(map) = &mut data {
      map
        .entry("token")
        .or_insert_with(|| Value::String(self.token.clone()));
    }
    data
  }
}

#[async_trait]
impl Backend for ApiClient {
  async fn call(&self, action: &str, data: Value) -> Result<Value, ApiError> {
    if action != LOGIN_ACTION && self.api_key.is_empty() {
      return Err(ApiError::new(
        ErrorKind::AuthExpired,
        "API key is required. Please log in again.",
      ));
    }

    let data = self.with_token(data);
    let body = serde_json::to_string(&ApiRequest {
      action,
      api_key: &self.api_key,
      data: &data,
    })
    .map_err(|e| ApiError::new(ErrorKind::ValidationFailed, e.to_string()))?;

    debug!(action, "Calling API");
    // text/plain keeps the script endpoint from requiring a CORS preflight
    let response = self
      .http
      .post(&self.url)
      .header("Content-Type", "text/plain;charset=utf-8")
      .body(body)
      .send()
      .await
      .map_err(ApiError::transport)?;

    let text = response.text().await.map_err(ApiError::transport)?;
    let envelope: Envelope = serde_json::from_str(&text).map_err(ApiError::unparseable)?;

    if envelope.success {
      Ok(envelope.data)
    } else {
      Err(ApiError::rejected(envelope.error))
    }
  }
}
