//! Request descriptors for the cache key and the network call.
//!
//! Every page query produces two descriptors: a GET whose URL carries the
//! whole query (the only thing ever used as a cache key) and a POST that
//! carries the same data as a JSON body (the only thing sent to the API
//! under the read-through policy). Building them does no I/O.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::codec::{self, render_scalar};
use crate::error::Result;
use crate::query::Query;

/// HTTP method of a descriptor. Unknown methods pass through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Other(String),
}

impl Method {
  pub fn parse(raw: &str) -> Self {
    if raw.eq_ignore_ascii_case("get") {
      Method::Get
    } else if raw.eq_ignore_ascii_case("post") {
      Method::Post
    } else {
      Method::Other(raw.to_string())
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Other(raw) => raw,
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// How sort/filter payloads end up in the cache key URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
  /// Depth-suffixed flattened parameters (readable, may collide)
  #[default]
  Flattened,
  /// A single `digest` parameter hashing the nested payloads
  Structural,
}

/// A fully resolved request, ready for a transport or a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
  pub url: String,
  pub method: Method,
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
}

impl RequestDescriptor {
  /// Key under which this request's response is stored.
  pub fn cache_key(&self) -> String {
    format!("{} {}", self.method, self.url)
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::Get
  }
}

/// The two descriptors built for one query.
#[derive(Debug, Clone)]
pub struct RequestPair {
  /// GET descriptor, used as the cache key
  pub cache: RequestDescriptor,
  /// POST descriptor, sent over the wire
  pub network: RequestDescriptor,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestBuilder {
  key_mode: KeyMode,
}

impl RequestBuilder {
  pub fn new(key_mode: KeyMode) -> Self {
    Self { key_mode }
  }

  /// Build a descriptor for `url` with the given method and body.
  ///
  /// GET requests fold the body into the query string; anything else
  /// carries it as JSON.
  pub fn build(&self, url: &str, method: &str, body: &Map<String, Value>) -> Result<RequestDescriptor> {
    let method = Method::parse(method);
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());

    if method != Method::Get {
      return Ok(RequestDescriptor {
        url: url.to_string(),
        method,
        headers,
        body: Some(Value::Object(body.clone()).to_string()),
      });
    }

    let params = self.query_params(body)?;
    let url = if params.is_empty() {
      url.to_string()
    } else {
      let separator = if url.contains('?') { '&' } else { '?' };
      let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish();
      format!("{}{}{}", url, separator, query)
    };

    Ok(RequestDescriptor {
      url,
      method,
      headers,
      body: None,
    })
  }

  /// Build the cache key (GET) and network (POST) descriptors for a query.
  pub fn pair(&self, query: &Query) -> Result<RequestPair> {
    let body = query.body();
    Ok(RequestPair {
      cache: self.build(&query.url, "GET", &body)?,
      network: self.build(&query.url, "POST", &body)?,
    })
  }

  /// Normalised query parameters, sorted by name.
  ///
  /// Every pair is kept, so a flattened leaf that shares a name with a top
  /// level parameter (`page`, say) sits next to it instead of replacing it.
  /// On equal names the top level value comes first.
  fn query_params(&self, body: &Map<String, Value>) -> Result<Vec<(String, String)>> {
    let mut params = Vec::new();
    let mut flattened = Vec::new();
    let mut nested = Map::new();

    for (name, value) in body {
      match value {
        Value::Object(_) | Value::Array(_) => match self.key_mode {
          KeyMode::Flattened => flattened.extend(codec::flatten(value)?),
          KeyMode::Structural => {
            nested.insert(name.clone(), value.clone());
          }
        },
        scalar => params.push((name.clone(), render_scalar(scalar))),
      }
    }

    if !nested.is_empty() {
      flattened.push((
        "digest".to_string(),
        codec::structural_digest(&Value::Object(nested)),
      ));
    }

    params.extend(flattened);
    // Stable, so ties keep top level values ahead of flattened ones
    params.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(params)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn body(value: Value) -> Map<String, Value> {
    match value {
      Value::Object(map) => map,
      _ => panic!("test body must be an object"),
    }
  }

  #[test]
  fn test_method_parse_is_case_insensitive_and_permissive() {
    assert_eq!(Method::parse("get"), Method::Get);
    assert_eq!(Method::parse("Post"), Method::Post);
    assert_eq!(Method::parse("patch"), Method::Other("patch".to_string()));
    assert_eq!(Method::parse("patch").as_str(), "patch");
  }

  #[test]
  fn test_get_folds_body_into_sorted_query() {
    let builder = RequestBuilder::default();
    let request = builder
      .build(
        "/api",
        "GET",
        &body(json!({"pageSize": 10, "page": 2, "filter": {"status": "open"}})),
      )
      .unwrap();

    assert_eq!(request.method, Method::Get);
    assert_eq!(request.url, "/api?page=2&pageSize=10&status=open");
    assert_eq!(request.body, None);
    assert_eq!(
      request.headers.get("Content-Type").map(String::as_str),
      Some("application/json")
    );
  }

  #[test]
  fn test_get_appends_to_existing_query() {
    let request = RequestBuilder::default()
      .build("/api?v=2", "get", &body(json!({"page": 1})))
      .unwrap();
    assert_eq!(request.url, "/api?v=2&page=1");
  }

  #[test]
  fn test_get_with_empty_body_leaves_url_alone() {
    let request = RequestBuilder::default()
      .build("/api", "GET", &Map::new())
      .unwrap();
    assert_eq!(request.url, "/api");
  }

  #[test]
  fn test_get_flattens_top_level_arrays_by_index() {
    let request = RequestBuilder::default()
      .build("/api", "GET", &body(json!({"page": 1, "sort": ["name"]})))
      .unwrap();
    assert_eq!(request.url, "/api?0=name&page=1");
  }

  #[test]
  fn test_sort_leaf_named_page_does_not_hide_pagination() {
    let builder = RequestBuilder::default();
    let query = Query::new("/api", 1, 10).with_sort(json!({"page": "asc"}));

    let first = builder.pair(&query).unwrap().cache.cache_key();
    let second = builder.pair(&query.with_page(2)).unwrap().cache.cache_key();

    assert_ne!(first, second);
    assert_eq!(first, "GET /api?page=1&page=asc&pageSize=10");
    assert_eq!(second, "GET /api?page=2&page=asc&pageSize=10");
  }

  #[test]
  fn test_filter_leaf_named_page_size_keeps_both_values() {
    let request = RequestBuilder::default()
      .build(
        "/api",
        "GET",
        &body(json!({"pageSize": 10, "filter": {"pageSize": 99}})),
      )
      .unwrap();
    assert_eq!(request.url, "/api?pageSize=10&pageSize=99");
  }

  #[test]
  fn test_post_carries_json_body_and_plain_url() {
    let request = RequestBuilder::default()
      .build("/api", "POST", &body(json!({"page": 1, "sort": {"field": "a"}})))
      .unwrap();

    assert_eq!(request.url, "/api");
    let sent: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    assert_eq!(sent, json!({"page": 1, "sort": {"field": "a"}}));
  }

  #[test]
  fn test_other_methods_pass_through() {
    let request = RequestBuilder::default()
      .build("/api", "PUT", &body(json!({"page": 1})))
      .unwrap();
    assert_eq!(request.method, Method::Other("PUT".to_string()));
    assert_eq!(request.url, "/api");
    assert!(request.body.is_some());
  }

  #[test]
  fn test_pair_shares_url_and_body() {
    let query = Query::new("/api", 3, 20).with_sort(json!({"field": "name"}));
    let pair = RequestBuilder::default().pair(&query).unwrap();

    assert_eq!(pair.cache.cache_key(), "GET /api?field=name&page=3&pageSize=20");
    assert_eq!(pair.network.method, Method::Post);
    assert_eq!(pair.network.url, "/api");
  }

  #[test]
  fn test_same_query_from_two_call_sites_yields_same_key() {
    let a = Query::new("/api", 1, 10).with_filter(json!({"status": "open", "owner": {"id": 3}}));
    let b = Query::new("/api", 1, 10).with_filter(json!({"owner": {"id": 3}, "status": "open"}));
    let builder = RequestBuilder::default();
    assert_eq!(
      builder.pair(&a).unwrap().cache.cache_key(),
      builder.pair(&b).unwrap().cache.cache_key()
    );
  }

  #[test]
  fn test_structural_mode_uses_digest_param() {
    let builder = RequestBuilder::new(KeyMode::Structural);
    let query = Query::new("/api", 1, 10).with_filter(json!({"a": {"x": 1}, "c": {"x": 2}}));
    let other = Query::new("/api", 1, 10).with_filter(json!({"a": {"x": 2}, "c": {"x": 2}}));

    let key = builder.pair(&query).unwrap().cache.url;
    assert!(key.starts_with("/api?digest="));
    assert!(key.ends_with("&page=1&pageSize=10"));
    assert_ne!(key, builder.pair(&other).unwrap().cache.url);
  }

  #[test]
  fn test_flattened_mode_collides_where_structural_does_not() {
    let a = Query::new("/api", 1, 10).with_filter(json!({"a": {"b": {"x": 1}}, "c": {"x": 2}}));
    let b = Query::new("/api", 1, 10).with_filter(json!({"a": {"b": {"x": 9}}, "c": {"x": 2}}));

    let flattened = RequestBuilder::new(KeyMode::Flattened);
    assert_eq!(
      flattened.pair(&a).unwrap().cache.url,
      flattened.pair(&b).unwrap().cache.url
    );

    let structural = RequestBuilder::new(KeyMode::Structural);
    assert_ne!(
      structural.pair(&a).unwrap().cache.url,
      structural.pair(&b).unwrap().cache.url
    );
  }
}
