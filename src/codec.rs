//! Cache key derivation for sort and filter payloads.
//!
//! The API only accepts POST, which the cache cannot key on, so every
//! request also gets a GET-shaped twin whose URL carries the query. This
//! module turns a nested sort/filter object into the flat parameters of
//! that URL.
//!
//! Flattening suffixes nested leaf names with a traversal counter. The
//! counter does not encode the real path, so two leaves with the same name
//! that end up with the same counter collide and the later one wins. Keys
//! stay stable across versions as long as that scheme stays the same; use
//! [`structural_digest`] when exact keys matter more than readable URLs.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};
use url::form_urlencoded;

use crate::error::{Result, SyncError};

/// Comparator functions ride along in sort payloads but are not data.
const COMPARATOR_KEY: &str = "compare";

/// Flat mapping of synthetic keys to rendered scalar values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatKey(BTreeMap<String, String>);

impl FlatKey {
  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Serialize as an `application/x-www-form-urlencoded` query string.
  pub fn to_query_string(&self) -> String {
    form_urlencoded::Serializer::new(String::new())
      .extend_pairs(self.0.iter())
      .finish()
  }
}

impl IntoIterator for FlatKey {
  type Item = (String, String);
  type IntoIter = std::collections::btree_map::IntoIter<String, String>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.into_iter()
  }
}

/// Flatten a nested JSON object or array into depth-suffixed scalar pairs.
///
/// Array elements are keyed by their index. Each level keeps its own
/// counter, bumped once before every descent into a nested value. A leaf visited while the counter is `d` is emitted as
/// `name` when `d == 0` and `name{d}` otherwise.
pub fn flatten(node: &Value) -> Result<FlatKey> {
  let Some(entries) = children(node) else {
    return Err(SyncError::InvalidInput(format!(
      "expected an object or array to flatten, got {}",
      kind(node)
    )));
  };

  let mut out = BTreeMap::new();
  flatten_entries(entries, 0, &mut out);
  Ok(FlatKey(out))
}

fn flatten_entries(entries: Vec<(String, &Value)>, mut counter: u32, out: &mut BTreeMap<String, String>) {
  for (key, value) in entries {
    if key == COMPARATOR_KEY {
      continue;
    }

    match children(value) {
      Some(nested) => {
        counter += 1;
        flatten_entries(nested, counter, out);
      }
      None => {
        let name = if counter == 0 {
          key
        } else {
          format!("{}{}", key, counter)
        };
        out.insert(name, render_scalar(value));
      }
    }
  }
}

/// Entries of a container value, or `None` for scalars.
fn children(value: &Value) -> Option<Vec<(String, &Value)>> {
  match value {
    Value::Object(map) => Some(map.iter().map(|(k, v)| (k.clone(), v)).collect()),
    Value::Array(items) => Some(
      items
        .iter()
        .enumerate()
        .map(|(i, v)| (i.to_string(), v))
        .collect(),
    ),
    _ => None,
  }
}

/// Render a scalar the way it appears in a query string.
pub(crate) fn render_scalar(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}

/// SHA-256 over the canonical JSON of a payload, comparator keys removed.
///
/// Object keys serialize in sorted order, so structurally equal payloads
/// hash identically regardless of how they were built.
pub fn structural_digest(payload: &Value) -> String {
  let canonical = strip_comparators(payload);
  let mut hasher = Sha256::new();
  hasher.update(canonical.to_string().as_bytes());
  hex::encode(hasher.finalize())
}

fn strip_comparators(value: &Value) -> Value {
  match value {
    Value::Object(map) => Value::Object(
      map
        .iter()
        .filter(|(k, _)| k.as_str() != COMPARATOR_KEY)
        .map(|(k, v)| (k.clone(), strip_comparators(v)))
        .collect(),
    ),
    Value::Array(items) => Value::Array(items.iter().map(strip_comparators).collect()),
    other => other.clone(),
  }
}
