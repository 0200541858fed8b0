//! Edge key-value read client.
//!
//! Reads only. Every failure (cache miss, timeout, bad body) turns into `None`
//! so the caller falls back to the primary API.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::types::Envelope;

#[derive(Clone)]
pub struct EdgeClient {
  http: reqwest::Client,
  base: Url,
  api_key: String,
}

impl EdgeClient {
  pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
    let base = Url::parse(base_url).map_err(|e| eyre!("Invalid worker URL {}: {}", base_url, e))?;
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      api_key: api_key.to_string(),
    })
  }

  /// GET `endpoint` with query parameters. `None` means "ask the primary API".
  pub async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Option<Value> {
    if self.api_key.is_empty() {
      debug!("No API key for edge reads");
      return None;
    }

    let mut url = match self.base.join(endpoint) {
      Ok(url) => url,
      Err(e) => {
        warn!(endpoint, error = %e, "Bad edge endpoint");
        return None;
      }
    };
    {
      let mut query = url.query_pairs_mut();
      query.append_pair("api_key", &self.api_key);
      for (name, value) in params {
        query.append_pair(name, value);
      }
    }

    let response = match self.http.get(url).send().await {
      Ok(response) => response,
      Err(e) => {
        warn!(endpoint, error = %e, "Edge read failed, falling back");
        return None;
      }
    };

    let body = match response.text().await {
      Ok(body) => body,
      Err(e) => {
        warn!(endpoint, error = %e, "Edge read failed, falling back");
        return None;
      }
    };

    let envelope: Envelope = match serde_json::from_str(&body) {
      Ok(envelope) => envelope,
      Err(e) => {
        warn!(endpoint, error = %e, "Edge returned an unreadable body, falling back");
        return None;
      }
    };

    if envelope.success {
      return Some(envelope.data);
    }
    if envelope.fallback {
      debug!(endpoint, "Edge cache miss, falling back");
    } else {
      warn!(endpoint, error = ?envelope.error, "Edge error, falling back");
    }
    None
  }
}
