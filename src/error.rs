//! Error types for the synchronization engine.

/// Errors raised while deriving keys, talking to the cache, or fetching pages.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// Key derivation was handed something other than a JSON object.
  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// The blob store failed while overwriting an existing entry.
  #[error("error updating cache: {0}")]
  CacheUpdate(String),

  /// The number of pages could not be derived from the first response.
  #[error("error determining number of pages: {0}")]
  PageCount(String),

  /// Enumerating or deleting cache partitions failed.
  #[error("error clearing cache: {0}")]
  CacheClear(String),

  /// Generic blob store failure (lookups and writes).
  #[error("cache store error: {0}")]
  Store(String),

  /// The request never produced a response.
  #[error("transport error: {0}")]
  Transport(String),

  /// The API answered with a non-success status.
  #[error("HTTP {status} from {url}")]
  Http { status: u16, url: String },

  /// The response body was not valid JSON.
  #[error("failed to decode response: {0}")]
  Decode(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for SyncError {
  fn from(err: rusqlite::Error) -> Self {
    SyncError::Store(err.to_string())
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(err: reqwest::Error) -> Self {
    match err.status() {
      Some(status) => SyncError::Http {
        status: status.as_u16(),
        url: err.url().map(|u| u.to_string()).unwrap_or_default(),
      },
      None => SyncError::Transport(err.to_string()),
    }
  }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_display() {
    let err = SyncError::PageCount("page size is zero".to_string());
    assert!(err.to_string().contains("number of pages"));
    assert!(err.to_string().contains("page size is zero"));
  }

  #[test]
  fn test_http_error_display() {
    let err = SyncError::Http {
      status: 503,
      url: "https://api.example.com/items".to_string(),
    };
    assert_eq!(err.to_string(), "HTTP 503 from https://api.example.com/items");
  }

  #[test]
  fn test_decode_error_from_serde() {
    let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
    let err: SyncError = parse.unwrap_err().into();
    assert!(matches!(err, SyncError::Decode(_)));
  }
}
