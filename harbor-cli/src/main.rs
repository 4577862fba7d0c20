//! harbor command-line driver
//!
//! Runs the sync engine against a local SQLite file and an HTTP document
//! store. Every command opens the store, recovers operations interrupted by
//! a previous run, does its work and exits.
//!
//! Usage:
//!   harbor --session u1 enqueue create items t1 --payload '{"name":"x"}'
//!   harbor --session u1 --server https://docs.example.com sync
//!   harbor --session u1 show items
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use harbor_storage::SqliteKvStore;
use harbor_sync::{
    ConnectivityMonitor, HttpProbe, HttpRemoteConfig, HttpRemoteStore, SyncConfig, SyncEngine,
};
use harbor_types::{Fields, OperationKind, OwnerId, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "harbor")]
#[command(about = "Offline-first sync engine driver")]
struct Args {
    /// Path to the local SQLite store
    #[arg(long, global = true, default_value = "harbor.db")]
    db: PathBuf,

    /// Base URL of the remote document store
    #[arg(long, global = true)]
    server: Option<String>,

    /// Bearer token for the remote document store
    #[arg(long, global = true)]
    token: Option<String>,

    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Identity whose operations may be sent; omit for the anonymous namespace
    #[arg(long, global = true)]
    session: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue a write and apply it to the local cache
    Enqueue {
        kind: KindArg,
        collection: String,
        document_id: String,
        /// JSON object with the fields to write
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Print the cached documents of a collection
    Show { collection: String },
    /// Print queue statistics and connectivity
    Status,
    /// Drain the queue against the remote store
    Sync,
    /// Fetch a collection from the remote store and merge it into the cache
    Pull { collection: String },
    /// Give failed operations a fresh retry budget
    Retry,
    /// Move cached data and queued operations to a permanent identity
    Migrate {
        /// Identity to move from; omit to adopt the anonymous namespace
        #[arg(long)]
        from: Option<String>,
        to: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Create,
    Update,
    Delete,
}

impl From<KindArg> for OperationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Create => OperationKind::Create,
            KindArg::Update => OperationKind::Update,
            KindArg::Delete => OperationKind::Delete,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => SyncConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SyncConfig::default(),
    };
    let session = args.session.as_deref().map(OwnerId::new);
    let engine = open_engine(&args, config).await?;
    let _listener = engine.start().await;
    engine.set_session(session.clone()).await;

    match args.command {
        Command::Enqueue {
            kind,
            collection,
            document_id,
            payload,
        } => {
            let payload = parse_payload(&payload)?;
            let id = engine
                .enqueue(kind.into(), &collection, document_id, session, payload)
                .await;
            print_json(&serde_json::json!({ "operationId": id.to_string() }))?;
        }
        Command::Show { collection } => {
            let docs = engine.get_from_cache(&collection, session.as_ref()).await;
            print_json(&docs)?;
        }
        Command::Status => {
            let stats = engine.stats().await;
            print_json(&serde_json::json!({
                "online": engine.is_online(),
                "session": session.as_ref().map(OwnerId::as_str),
                "queue": stats,
            }))?;
        }
        Command::Sync => {
            let report = engine.process_queue().await;
            print_json(&report)?;
        }
        Command::Pull { collection } => {
            let owner = session.context("pull requires --session")?;
            let docs = engine
                .pull(&collection, &owner)
                .await
                .with_context(|| format!("pulling {collection}"))?;
            print_json(&docs)?;
        }
        Command::Retry => {
            let reset = engine.retry_failed().await.context("resetting failed operations")?;
            info!("{} operations queued for retry", reset);
            let report = engine.process_queue().await;
            print_json(&report)?;
        }
        Command::Migrate { from, to } => {
            let to = OwnerId::new(to);
            let report = match from {
                Some(from) => engine.migrate(&OwnerId::new(from), &to).await,
                None => engine.adopt_anonymous(&to).await,
            }
            .context("migrating identity")?;
            print_json(&report)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn open_engine(args: &Args, config: SyncConfig) -> Result<SyncEngine> {
    let kv = SqliteKvStore::open(&args.db)
        .with_context(|| format!("opening store at {}", args.db.display()))?;

    let remote_config = HttpRemoteConfig {
        base_url: args
            .server
            .clone()
            .unwrap_or_else(|| HttpRemoteConfig::default().base_url),
        token: args.token.clone(),
        timeout_ms: config.request_timeout_ms,
    };
    let probe = HttpProbe::new(&remote_config.base_url, config.read_timeout())
        .context("creating reachability probe")?;
    let remote = HttpRemoteStore::new(remote_config).context("creating remote store client")?;

    let connectivity = Arc::new(
        ConnectivityMonitor::new(false, Duration::from_millis(config.reconnect_delay_ms))
            .with_probe(Arc::new(probe)),
    );
    let online = if args.server.is_some() {
        connectivity.refresh().await
    } else {
        false
    };
    debug!("Remote store reachable: {}", online);

    Ok(SyncEngine::new(config, Arc::new(kv), Arc::new(remote), connectivity))
}

fn parse_payload(raw: &str) -> Result<Fields> {
    let json: serde_json::Value = serde_json::from_str(raw).context("parsing --payload")?;
    match Value::from(json) {
        Value::Map(fields) => Ok(fields),
        _ => bail!("--payload must be a JSON object"),
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
