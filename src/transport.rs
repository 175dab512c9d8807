//! Network transport for page requests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::cache::CachedResponse;
use crate::error::{Result, SyncError};
use crate::request::RequestDescriptor;

/// Sends a request descriptor and hands back the complete response.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn fetch(&self, request: &RequestDescriptor) -> Result<CachedResponse>;
}

/// HTTP transport backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: Client,
  base_url: Option<Url>,
}

impl HttpTransport {
  /// Create a transport resolving relative descriptor URLs against `base_url`.
  pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
    let base_url = base_url
      .map(|raw| {
        Url::parse(raw).map_err(|e| SyncError::Transport(format!("Invalid base URL {}: {}", raw, e)))
      })
      .transpose()?;

    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SyncError::Transport(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self { client, base_url })
  }

  fn resolve(&self, url: &str) -> Result<Url> {
    let resolved = match &self.base_url {
      Some(base) => base.join(url),
      None => Url::parse(url),
    };
    resolved.map_err(|e| SyncError::Transport(format!("Invalid request URL {}: {}", url, e)))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn fetch(&self, request: &RequestDescriptor) -> Result<CachedResponse> {
    let url = self.resolve(&request.url)?;
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| SyncError::Transport(format!("Invalid method {}: {}", request.method, e)))?;

    let mut builder = self.client.request(method, url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(SyncError::Http {
        status: status.as_u16(),
        url: url.to_string(),
      });
    }

    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|value| (name.to_string(), value.to_string()))
      })
      .collect();
    let body = response.bytes().await?.to_vec();

    Ok(CachedResponse::new(status.as_u16(), headers, body))
  }
}

#[cfg(test)]
pub(crate) mod mock {
  //! Scripted transport for engine tests.

  use super::*;
  use serde_json::{json, Value};
  use std::sync::Mutex;
  use url::form_urlencoded;

  type Handler = Box<dyn Fn(&RequestDescriptor) -> Result<CachedResponse> + Send + Sync>;

  /// Records every descriptor it is handed and answers through a handler.
  pub struct MockTransport {
    handler: Handler,
    delay: Option<Duration>,
    requests: Mutex<Vec<RequestDescriptor>>,
  }

  impl MockTransport {
    pub fn new(handler: impl Fn(&RequestDescriptor) -> Result<CachedResponse> + Send + Sync + 'static) -> Self {
      Self {
        handler: Box::new(handler),
        delay: None,
        requests: Mutex::new(Vec::new()),
      }
    }

    /// API that answers every page with `items` rows tagged with the page.
    pub fn dataset(items: usize) -> Self {
      Self::new(move |request| {
        let page = page_of(request);
        let rows: Vec<Value> = (0..items).map(|i| json!({"page": page, "row": i})).collect();
        Ok(CachedResponse::from_json(&Value::Array(rows)))
      })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
      self.delay = Some(delay);
      self
    }

    pub fn requests(&self) -> Vec<RequestDescriptor> {
      self.requests.lock().unwrap().clone()
    }

    pub fn pages(&self) -> Vec<u32> {
      self.requests().iter().map(page_of).collect()
    }

    pub fn count(&self) -> usize {
      self.requests.lock().unwrap().len()
    }
  }

  #[async_trait]
  impl Transport for MockTransport {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<CachedResponse> {
      self.requests.lock().unwrap().push(request.clone());
      if let Some(delay) = self.delay {
        tokio::time::sleep(delay).await;
      }
      (self.handler)(request)
    }
  }

  /// Page number carried by a descriptor's JSON body or query string.
  pub fn page_of(request: &RequestDescriptor) -> u32 {
    if let Some(body) = &request.body {
      let body: Value = serde_json::from_str(body).unwrap();
      return body["page"].as_u64().unwrap() as u32;
    }
    let query = request.url.split_once('?').map(|(_, q)| q).unwrap_or_default();
    form_urlencoded::parse(query.as_bytes())
      .find(|(k, _)| k == "page")
      .map(|(_, v)| v.parse().unwrap())
      .unwrap()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_against_base_url() {
    let transport =
      HttpTransport::new(Some("https://api.example.com/v1/"), Duration::from_secs(5)).unwrap();
    assert_eq!(
      transport.resolve("items?page=2").unwrap().as_str(),
      "https://api.example.com/v1/items?page=2"
    );
    assert_eq!(
      transport.resolve("/api").unwrap().as_str(),
      "https://api.example.com/api"
    );
  }

  #[test]
  fn test_resolve_without_base_requires_absolute_url() {
    let transport = HttpTransport::new(None, Duration::from_secs(5)).unwrap();
    assert!(transport.resolve("https://api.example.com/api").is_ok());
    assert!(matches!(
      transport.resolve("/api"),
      Err(SyncError::Transport(_))
    ));
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    assert!(HttpTransport::new(Some("not a url"), Duration::from_secs(5)).is_err());
  }
}
