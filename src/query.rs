//! Page queries as sent by the host.
//!
//! A [`Query`] is one host request for one page. Its sort and filter
//! payloads are arbitrary JSON objects owned by the API; the engine only
//! compares them and derives cache keys from them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A request for a single page of data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
  /// API endpoint, relative to the configured base URL or absolute
  pub url: String,
  /// 1-based page number
  pub page: u32,
  /// Items per page
  pub page_size: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sort: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub filter: Option<Value>,
}

impl Query {
  pub fn new(url: impl Into<String>, page: u32, page_size: u32) -> Self {
    Self {
      url: url.into(),
      page,
      page_size,
      sort: None,
      filter: None,
    }
  }

  pub fn with_sort(mut self, sort: Value) -> Self {
    self.sort = Some(sort);
    self
  }

  pub fn with_filter(mut self, filter: Value) -> Self {
    self.filter = Some(filter);
    self
  }

  /// Copy of this query pointing at another page.
  pub fn with_page(&self, page: u32) -> Self {
    Self {
      page,
      ..self.clone()
    }
  }

  /// Copy of this query carrying the given sort/filter instead of its own.
  pub fn with_sort_filter(&self, sort_filter: &SortFilter) -> Self {
    Self {
      sort: sort_filter.sort.clone(),
      filter: sort_filter.filter.clone(),
      ..self.clone()
    }
  }

  /// Request body shared by the cache key and the network request.
  ///
  /// Everything but the URL, with wire (camelCase) property names.
  pub fn body(&self) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("page".to_string(), Value::from(self.page));
    body.insert("pageSize".to_string(), Value::from(self.page_size));
    if let Some(sort) = &self.sort {
      body.insert("sort".to_string(), sort.clone());
    }
    if let Some(filter) = &self.filter {
      body.insert("filter".to_string(), filter.clone());
    }
    body
  }
}

/// The sort and filter parameters that define a cache epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortFilter {
  pub sort: Option<Value>,
  pub filter: Option<Value>,
}

impl SortFilter {
  /// Replace sort and/or filter with whatever the query carries.
  ///
  /// Absent fields keep their previous value, so a host that only sends
  /// the sort on change keeps its filter.
  pub fn merge(&mut self, query: &Query) {
    if let Some(sort) = &query.sort {
      self.sort = Some(sort.clone());
    }
    if let Some(filter) = &query.filter {
      self.filter = Some(filter.clone());
    }
  }

  pub fn is_empty(&self) -> bool {
    self.sort.is_none() && self.filter.is_none()
  }

  /// Both parameters as one JSON object, absent ones omitted.
  pub fn to_value(&self) -> Value {
    let mut map = Map::new();
    if let Some(sort) = &self.sort {
      map.insert("sort".to_string(), sort.clone());
    }
    if let Some(filter) = &self.filter {
      map.insert("filter".to_string(), filter.clone());
    }
    Value::Object(map)
  }
}
