//! Host message loop.
//!
//! The host talks to the engine over line-delimited JSON: one page query
//! per input line, one reply per output line, in order. Sweep results are
//! never posted back.

use color_eyre::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::cache::BlobStore;
use crate::engine::SyncEngine;
use crate::query::Query;
use crate::transport::Transport;

/// Messages arriving from the host
#[derive(Debug)]
pub enum Event {
  /// A well-formed page query
  Request(Query),
  /// A line that did not parse as a query
  Invalid(String),
}

/// Reads host messages on a background task
pub struct HostReader {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl HostReader {
  /// Spawn a task turning lines of `input` into events
  pub fn spawn<R>(input: R) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = input.lines();
      loop {
        let line = match lines.next_line().await {
          Ok(Some(line)) => line,
          Ok(None) => break,
          Err(e) => {
            warn!(error = %e, "failed to read host input");
            break;
          }
        };

        if line.trim().is_empty() {
          continue;
        }

        let event = match serde_json::from_str::<Query>(&line) {
          Ok(query) => Event::Request(query),
          Err(e) => Event::Invalid(e.to_string()),
        };
        if tx.send(event).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

fn error_reply(message: String) -> Value {
  json!({ "error": message })
}

/// Answer host events until the input closes. Returns how many were handled.
pub async fn serve<S, T, W>(engine: &SyncEngine<S, T>, mut reader: HostReader, mut output: W) -> Result<usize>
where
  S: BlobStore + 'static,
  T: Transport + 'static,
  W: AsyncWrite + Unpin,
{
  let mut handled = 0;

  while let Some(event) = reader.next().await {
    let reply = match event {
      Event::Request(query) => {
        let page = query.page;
        match engine.handle_request(query).await {
          Ok(data) => data,
          Err(e) => {
            warn!(page, error = %e, "request failed");
            error_reply(e.to_string())
          }
        }
      }
      Event::Invalid(message) => error_reply(format!("invalid request: {}", message)),
    };

    let mut line = serde_json::to_vec(&reply)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    handled += 1;
  }

  Ok(handled)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheStore, MemoryStore};
  use crate::request::RequestBuilder;
  use crate::transport::mock::MockTransport;
  use tokio::io::BufReader;

  fn engine() -> SyncEngine<MemoryStore, MockTransport> {
    SyncEngine::new(
      CacheStore::new(MemoryStore::new(), "pages"),
      MockTransport::dataset(3),
      RequestBuilder::default(),
    )
  }

  fn replies(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
      .lines()
      .map(|line| serde_json::from_str(line).unwrap())
      .collect()
  }

  #[tokio::test]
  async fn test_one_reply_per_request_in_order() {
    let input: &'static [u8] = b"{\"url\":\"/api\",\"page\":1,\"pageSize\":10}\n\n{\"url\":\"/api\",\"page\":2,\"pageSize\":10}\n";
    let engine = engine();
    let mut output = Vec::new();

    let handled = serve(&engine, HostReader::spawn(BufReader::new(input)), &mut output)
      .await
      .unwrap();

    let replies = replies(&output);
    assert_eq!(handled, 2);
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0][0]["page"], json!(1));
    assert_eq!(replies[1][0]["page"], json!(2));
  }

  #[tokio::test]
  async fn test_bad_lines_get_error_replies() {
    let input: &'static [u8] = b"not json\n{\"url\":\"/api\",\"page\":1,\"pageSize\":0}\n";
    let engine = engine();
    let mut output = Vec::new();

    serve(&engine, HostReader::spawn(BufReader::new(input)), &mut output)
      .await
      .unwrap();

    let replies = replies(&output);
    assert!(replies[0]["error"]
      .as_str()
      .unwrap()
      .starts_with("invalid request"));
    assert!(replies[1]["error"]
      .as_str()
      .unwrap()
      .contains("number of pages"));
  }
}
