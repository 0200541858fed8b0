//! Typed API failures.
//!
//! The kind is decided once, where the error is produced, so callers branch on
//! `kind()` instead of searching message text.

use std::fmt;

/// Classification of a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Session token expired or credentials rejected
  AuthExpired,
  /// Payload rejected by server-side validation
  ValidationFailed,
  /// Write conflicts with existing data (duplicates and the like)
  Conflict,
  /// Transport failure or unparseable response; the server may have applied the write
  NetworkError,
  /// Structured server error that matches no other kind
  Unknown,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ErrorKind::AuthExpired => "auth expired",
      ErrorKind::ValidationFailed => "validation failed",
      ErrorKind::Conflict => "conflict",
      ErrorKind::NetworkError => "network error",
      ErrorKind::Unknown => "error",
    };
    f.write_str(name)
  }
}

const AUTH_MARKERS: &[&str] = &["token expired", "unauthorized", "auth_error", "hết hạn"];
const CONFLICT_MARKERS: &[&str] = &["duplicate", "already exists", "conflict"];
const VALIDATION_MARKERS: &[&str] = &["invalid", "validation", "required", "must be"];

/// A failed API call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
  kind: ErrorKind,
  message: String,
}

impl ApiError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  /// The request never produced a readable response.
  pub fn transport(err: impl fmt::Display) -> Self {
    Self::new(ErrorKind::NetworkError, err.to_string())
  }

  /// The response body was not a JSON envelope.
  pub fn unparseable(err: impl fmt::Display) -> Self {
    Self::new(
      ErrorKind::NetworkError,
      format!("unreadable response: {}", err),
    )
  }

  /// A well-formed `{success: false, error}` response from the server.
  pub fn rejected(message: Option<String>) -> Self {
    let message = message
      .filter(|m| !m.trim().is_empty())
      .unwrap_or_else(|| "request rejected".to_string());
    Self::new(classify(&message), message)
  }

  pub fn kind(&self) -> ErrorKind {
    self.kind
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  /// True when it can't be known whether the server applied the write.
  pub fn is_ambiguous(&self) -> bool {
    self.kind == ErrorKind::NetworkError
  }

  pub fn is_auth_expired(&self) -> bool {
    self.kind == ErrorKind::AuthExpired
  }
}

fn classify(message: &str) -> ErrorKind {
  let lower = message.to_lowercase();
  let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
  if has(AUTH_MARKERS) {
    ErrorKind::AuthExpired
  } else if has(CONFLICT_MARKERS) {
    ErrorKind::Conflict
  } else if has(VALIDATION_MARKERS) {
    ErrorKind::ValidationFailed
  } else {
    ErrorKind::Unknown
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_rejected_classification() {
    let cases = [
      ("Token expired", ErrorKind::AuthExpired),
      ("Unauthorized", ErrorKind::AuthExpired),
      ("AUTH_ERROR: bad key", ErrorKind::AuthExpired),
      ("Duplicate order", ErrorKind::Conflict),
      ("Validation failed", ErrorKind::ValidationFailed),
      ("customer_id is required", ErrorKind::ValidationFailed),
      ("Sheet locked", ErrorKind::Unknown),
    ];
    for (message, kind) in cases {
      let err = ApiError::rejected(Some(message.to_string()));
      assert_eq!(err.kind(), kind, "{}", message);
      assert!(!err.is_ambiguous());
    }
  }

  #[test]
  fn test_empty_rejection_message() {
    let err = ApiError::rejected(Some("  ".to_string()));
    assert_eq!(err.message(), "request rejected");
    assert_eq!(err.kind(), ErrorKind::Unknown);
  }

  #[test]
  fn test_transport_and_parse_are_ambiguous() {
    assert!(ApiError::transport("connection refused").is_ambiguous());
    assert!(ApiError::unparseable("expected value at line 1").is_ambiguous());
  }
}
