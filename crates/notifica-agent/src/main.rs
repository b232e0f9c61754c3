//! notifica - command-line host for the offline-caching and push agent.
//!
//! Runs the agent against an on-disk cache store and the real network so
//! operators can pre-cache a deployment, retire old cache generations, fetch
//! through the cache and preview push notifications from a terminal.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use notifica_core::{
    Agent, AgentConfig, AgentEvent, DiskCacheStorage, EventOutcome, FetchOutcome, Host,
    HttpNetwork, Request, TracingNotifier, TracingScope,
};

// ============================================================================
// Constants
// ============================================================================

/// Buffer for background cache write reports
const CHANNEL_BUFFER_SIZE: usize = 16;

/// How long `fetch` waits for the background cache write before exiting
const CACHE_WRITE_TIMEOUT_SECS: u64 = 10;

/// Directory for rolling log files, logging to stderr only when unset
const ENV_LOG_DIR: &str = "NOTIFICA_LOG_DIR";

const USAGE: &str = "\
Usage: notifica [--config <path>] <command>

Commands:
  install          Pre-cache the asset manifest for the current generation
  activate         Delete stale cache generations
  fetch <url>      Fetch a URL or root-relative path through the cache
  push <json>      Show a notification for a push payload
  click <json>     Show a notification, then click it
  caches           List cache generations
  help             Show this message";

/// Initialize the tracing subscriber for logging.
///
/// Returns the file writer guard, which must live until exit so buffered
/// lines are flushed.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "notifica.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Parsed command line.
struct Cli {
    config: Option<PathBuf>,
    command: String,
    argument: Option<String>,
}

impl Cli {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut config = None;
        let mut positional = Vec::new();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args.next().context("--config requires a path")?;
                    config = Some(PathBuf::from(path));
                }
                "-h" | "--help" => positional.insert(0, "help".to_string()),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let command = match positional.next() {
            Some(command) => command,
            None => bail!("{}", USAGE),
        };

        Ok(Self {
            config,
            command,
            argument: positional.next(),
        })
    }

    fn require_argument(&self) -> Result<&str> {
        match self.argument.as_deref() {
            Some(arg) => Ok(arg),
            None => bail!("`{}` needs an argument\n\n{}", self.command, USAGE),
        }
    }
}

/// The agent plus the concrete host pieces the commands inspect.
struct Runtime {
    agent: Agent,
    storage: Arc<DiskCacheStorage>,
    writes: mpsc::Receiver<notifica_core::CacheWrite>,
}

impl Runtime {
    fn new(config: AgentConfig) -> Result<Self> {
        let cache_dir = config.cache_dir()?;
        let origin = config.origin_url()?;

        let storage = Arc::new(
            DiskCacheStorage::new(cache_dir.clone())
                .with_context(|| format!("Failed to open cache directory {}", cache_dir.display()))?,
        );
        let host = Host {
            caches: storage.clone(),
            network: Arc::new(HttpNetwork::new(origin)?),
            notifier: Arc::new(TracingNotifier::new()),
            scope: Arc::new(TracingScope::new()),
        };

        let (tx, writes) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let agent = Agent::new(config, host)?.with_cache_write_channel(tx);

        Ok(Self {
            agent,
            storage,
            writes,
        })
    }

    /// Resolve a root-relative path or absolute URL against the origin.
    fn resolve(&self, target: &str) -> Result<reqwest::Url> {
        self.agent
            .origin()
            .join(target)
            .with_context(|| format!("Invalid URL: {}", target))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse(std::env::args().skip(1))?;
    if cli.command == "help" {
        println!("{}", USAGE);
        return Ok(());
    }

    // Initialize logging
    let _guard = init_tracing();

    let config = AgentConfig::load(cli.config.as_deref())?;
    info!(cache = %config.cache_name(), origin = %config.origin, "notifica starting");

    let mut runtime = Runtime::new(config)?;

    match cli.command.as_str() {
        "install" => install(&runtime).await,
        "activate" => activate(&runtime).await,
        "fetch" => fetch(&mut runtime, cli.require_argument()?).await,
        "push" => push(&runtime, cli.require_argument()?, false).await,
        "click" => push(&runtime, cli.require_argument()?, true).await,
        "caches" => list_caches(&runtime).await,
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

async fn install(runtime: &Runtime) -> Result<()> {
    let report = match runtime.agent.dispatch(AgentEvent::Install).await? {
        EventOutcome::Installed(report) => report,
        other => bail!("Unexpected outcome: {:?}", other),
    };

    println!(
        "Installed {}: {} cached, {} failed",
        report.cache_name,
        report.stored.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        println!("  ✗ {} ({})", failure.url, failure.reason);
    }
    Ok(())
}

async fn activate(runtime: &Runtime) -> Result<()> {
    let deleted = match runtime.agent.dispatch(AgentEvent::Activate).await? {
        EventOutcome::Activated(deleted) => deleted,
        other => bail!("Unexpected outcome: {:?}", other),
    };

    if deleted.is_empty() {
        println!("No stale caches");
    }
    for name in deleted {
        println!("Removed {}", name);
    }
    Ok(())
}

async fn fetch(runtime: &mut Runtime, target: &str) -> Result<()> {
    let request = Request::get(runtime.resolve(target)?);
    let outcome = match runtime.agent.dispatch(AgentEvent::Fetch(request)).await? {
        EventOutcome::Fetched(outcome) => outcome,
        other => bail!("Unexpected outcome: {:?}", other),
    };

    match &outcome {
        FetchOutcome::Passthrough => println!("Not intercepted (cross-origin)"),
        FetchOutcome::NoResponse => println!("No response (network unavailable)"),
        FetchOutcome::Cached(r) => println!("cache    {} {} bytes", r.status, r.body.len()),
        FetchOutcome::Network(r) => println!("network  {} {} bytes", r.status, r.body.len()),
    }

    // The write runs detached; wait for it so the process does not exit first.
    if let FetchOutcome::Network(r) = &outcome {
        if r.is_cacheable() {
            let wait = Duration::from_secs(CACHE_WRITE_TIMEOUT_SECS);
            match tokio::time::timeout(wait, runtime.writes.recv()).await {
                Ok(Some(write)) => match write.result {
                    Ok(()) => println!("Stored in {}", write.cache_name),
                    Err(e) => println!("Not stored: {}", e),
                },
                Ok(None) | Err(_) => println!("Cache write did not complete"),
            }
        }
    }
    Ok(())
}

async fn push(runtime: &Runtime, payload: &str, click: bool) -> Result<()> {
    let body = Bytes::copy_from_slice(payload.as_bytes());
    let notification = match runtime.agent.dispatch(AgentEvent::Push(Some(body))).await? {
        EventOutcome::NotificationShown(notification) => notification,
        other => bail!("Unexpected outcome: {:?}", other),
    };
    println!("{}", serde_json::to_string_pretty(&notification)?);

    if click {
        let url = match runtime
            .agent
            .dispatch(AgentEvent::NotificationClick(notification))
            .await?
        {
            EventOutcome::WindowOpened(url) => url,
            other => bail!("Unexpected outcome: {:?}", other),
        };
        println!("Opened {}", runtime.resolve(&url)?);
    }
    Ok(())
}

async fn list_caches(runtime: &Runtime) -> Result<()> {
    let stats = runtime.storage.stats().await?;
    if stats.is_empty() {
        println!("No caches in {}", runtime.storage.cache_dir().display());
    }
    for cache in stats {
        let marker = if cache.name == runtime.agent.cache_name() {
            "*"
        } else {
            " "
        };
        if cache.unreadable {
            println!("{} {}  (unreadable, removed on next activate)", marker, cache.name);
            continue;
        }
        println!(
            "{} {}  {} entries, updated {}",
            marker,
            cache.name,
            cache.entries,
            cache.age_display()
        );
    }
    Ok(())
}
