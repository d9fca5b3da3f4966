use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use conductor::config::{EngineConfig, load_config};
use conductor::logging::{LogLevel, init_logging};
use conductor::runtime::engine::Engine;
use conductor::runtime::redis_storage::{RedisSnapshotStore, RedisTransport};
use conductor::runtime::storage::{InMemorySnapshotStore, InMemoryTransport, SnapshotStore};
use conductor::worker::{EchoWork, Worker};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration (YAML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log level; overrides CONDUCTOR_LOG
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,

    /// Redis connection URL; overrides the config file
    #[arg(long, global = true)]
    redis: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompose and run a request in memory with echo workers (Standalone Mode)
    Run {
        /// Free-text request
        request: String,

        /// Workflow context variables (key=value)
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, Value)>,

        #[arg(long, default_value = "cli")]
        creator: String,
    },

    /// Serve dispatches for one worker identity from Redis (Distributed Mode)
    Worker {
        /// Worker identity, e.g. researcher
        #[arg(long)]
        name: String,
    },

    /// Create a workflow over Redis and wait for its terminal snapshot (Client Mode)
    Submit {
        request: String,

        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, Value)>,

        #[arg(long, default_value = "cli")]
        creator: String,
    },

    /// Print the persisted snapshot of a workflow
    Status { id: Uuid },
}

fn parse_key_val(s: &str) -> Result<(String, Value), String> {
    let pos = s.find('=').ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].to_string();
    let val_str = &s[pos + 1..];
    // Try parsing as JSON, otherwise treat as string
    let val = serde_json::from_str(val_str).unwrap_or_else(|_| Value::String(val_str.to_string()));
    Ok((key, val))
}

fn redis_client(config: &EngineConfig) -> Result<redis::Client> {
    redis::Client::open(config.redis.url.as_str()).context("Invalid Redis URL")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level)?;

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    if let Some(url) = cli.redis {
        config.redis.url = url;
    }

    match cli.command {
        Commands::Run { request, vars, creator } => {
            info!("Running in Standalone Memory Mode");
            let transport = Arc::new(InMemoryTransport::new());
            let snapshots = Arc::new(InMemorySnapshotStore::new());

            let mut identities = vec!["researcher", "writer", "reviewer"];
            if !identities.contains(&config.fallback_worker.as_str()) {
                identities.push(config.fallback_worker.as_str());
            }
            for identity in identities {
                let worker = Worker::new(identity, transport.clone(), Arc::new(EchoWork));
                tokio::spawn(async move { worker.run().await });
            }

            let engine = Engine::new(config.clone(), transport, snapshots);
            engine.spawn_dispatcher().await?;

            let context: Map<String, Value> = vars.into_iter().collect();
            let id = engine.create(&request, &creator, context).await;
            info!(workflow_id = %id, "Workflow started");

            match engine.wait_for(id, POLL_INTERVAL).await? {
                Some(snapshot) => print_json(&snapshot)?,
                None => bail!("workflow {} disappeared", id),
            }
            print_json(&engine.metrics())?;
        }

        Commands::Worker { name } => {
            info!(worker = %name, redis = %config.redis.url, "Starting worker");
            let client = redis_client(&config)?;
            let channel = Arc::new(RedisTransport::new(client, &config.redis));
            let worker = Worker::new(&name, channel, Arc::new(EchoWork));
            worker.run().await;
        }

        Commands::Submit { request, vars, creator } => {
            info!(redis = %config.redis.url, "Submitting to Redis");
            let client = redis_client(&config)?;
            let transport = Arc::new(RedisTransport::new(client.clone(), &config.redis));
            let snapshots = Arc::new(RedisSnapshotStore::new(client, &config.snapshot_prefix));

            let engine = Engine::new(config.clone(), transport, snapshots);
            engine.spawn_dispatcher().await?;

            let context: Map<String, Value> = vars.into_iter().collect();
            let id = engine.create(&request, &creator, context).await;
            info!(workflow_id = %id, "Workflow submitted");

            match engine.wait_for(id, POLL_INTERVAL).await? {
                Some(snapshot) => print_json(&snapshot)?,
                None => bail!("workflow {} disappeared", id),
            }
        }

        Commands::Status { id } => {
            let client = redis_client(&config)?;
            let store = RedisSnapshotStore::new(client, &config.snapshot_prefix);
            match store.load(id).await? {
                Some(snapshot) => print_json(&snapshot)?,
                None => bail!("no snapshot for workflow {}", id),
            }
        }
    }

    Ok(())
}
