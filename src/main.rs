use clap::Parser;
use color_eyre::Result;
use pagesync::cache::{BlobStore, CacheStore, MemoryStore, SqliteStore};
use pagesync::config::{Backend, Config};
use pagesync::request::RequestBuilder;
use pagesync::transport::HttpTransport;
use pagesync::worker::{self, HostReader};
use pagesync::SyncEngine;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pagesync")]
#[command(about = "Prefetch and cache pages of a paginated API for a host process")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./pagesync.yaml or $XDG_CONFIG_HOME/pagesync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API base URL that request URLs are resolved against
  #[arg(short, long)]
  base_url: Option<String>,

  /// Wait for the running background sweep before exiting
  #[arg(long)]
  drain: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Logs go to stderr; stdout carries host replies
  let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pagesync=info")),
    )
    .with_writer(writer)
    .init();

  let config = Config::load(args.config.as_deref())?;
  let base_url = config.base_url(args.base_url);
  let transport = HttpTransport::new(base_url.as_deref(), config.api.timeout())?;

  match config.cache.backend {
    Backend::Memory => run(MemoryStore::new(), transport, &config, args.drain).await,
    Backend::Sqlite => {
      let store = SqliteStore::open(config.cache.path.as_deref())?;
      run(store, transport, &config, args.drain).await
    }
  }
}

async fn run<S: BlobStore + 'static>(
  store: S,
  transport: HttpTransport,
  config: &Config,
  drain: bool,
) -> Result<()> {
  let cache = CacheStore::new(store, config.cache.partition.as_str())
    .with_page_limit(config.cache.page_limit)
    .with_policy(config.cache.policy);
  let engine = SyncEngine::new(cache, transport, RequestBuilder::new(config.cache.key_mode));

  info!(partition = %config.cache.partition, "waiting for host requests on stdin");
  let reader = HostReader::spawn(BufReader::new(tokio::io::stdin()));
  let handled = worker::serve(&engine, reader, tokio::io::stdout()).await?;
  info!(handled, "host input closed");

  if drain {
    let state = engine.wait_for_sweep().await;
    info!(?state, "background sweep drained");
  }

  Ok(())
}
