//! Argument parsing and command execution for the `unistore` binary.
//!
//! Each invocation bootstraps one repository from the config file, runs a
//! single command, waits for the sync handlers it triggered, and returns the
//! result as JSON.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};
use unistore_model::{Cursor, FieldMap};
use unistore_repo::{Domain, SyncDispatch, UnifiedRepository, UnistoreConfig, WriteOutcome, bootstrap};

/// Upper bound on waiting for handlers before the process exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "unistore")]
#[command(about = "Query and modify entities through the unified repository", version)]
pub struct Cli {
    /// TOML config file; without one both stores are in memory
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Per-call timeout in milliseconds (overrides the configured default)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List registered entity types by domain
    Types,

    /// Create an entity from a JSON object
    Create { entity_type: String, data: String },

    /// Fetch one entity by id
    Get { entity_type: String, id: String },

    /// List entities matching a flat JSON filter
    Query {
        entity_type: String,
        /// e.g. '{"status": "pending", "priority": {"$gte": 2}}'
        #[arg(long, default_value = "{}")]
        filter: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Cursor from a previous page
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Merge a JSON object into an existing entity
    Update {
        entity_type: String,
        id: String,
        data: String,
    },

    /// Delete an entity
    Delete { entity_type: String, id: String },

    /// Follow a named relation
    Related {
        entity_type: String,
        id: String,
        relation: String,
    },
}

impl Cli {
    pub fn load_config(&self) -> Result<UnistoreConfig> {
        match &self.config {
            Some(path) => UnistoreConfig::load(path).with_context(|| format!("loading {}", path.display())),
            None => Ok(UnistoreConfig::default()),
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Bootstraps a repository, runs the command, and drains pending sync work.
pub async fn run(cli: &Cli, config: &UnistoreConfig) -> Result<Value> {
    let repo = bootstrap(config)?;
    let output = execute(&repo, &cli.command, cli.timeout()).await?;

    repo.drain(DRAIN_TIMEOUT).await?;
    let dead_letters = repo.registry().dead_letters();
    for letter in &dead_letters {
        warn!(
            handler = %letter.handler,
            event_type = %letter.event.event_type,
            entity_id = %letter.event.entity_id,
            error = %letter.last_error,
            "sync handler gave up"
        );
    }
    repo.registry().close();
    Ok(output)
}

/// Runs one command against an already bootstrapped repository.
pub async fn execute(repo: &UnifiedRepository, command: &Command, timeout: Option<Duration>) -> Result<Value> {
    debug!(?command, "executing");
    let value = match command {
        Command::Types => {
            let mut out = serde_json::Map::new();
            for domain in Domain::ALL {
                out.insert(domain.to_string(), json!(repo.router().entity_types(domain)));
            }
            Value::Object(out)
        }
        Command::Create { entity_type, data } => {
            let outcome = repo.create(entity_type, parse_object(data)?, timeout).await?;
            write_json(outcome)?
        }
        Command::Get { entity_type, id } => to_json(&repo.get_by_id(entity_type, id, timeout).await?)?,
        Command::Query {
            entity_type,
            filter,
            limit,
            cursor,
        } => {
            let filter: Value = serde_json::from_str(filter).context("filter is not valid JSON")?;
            let cursor = cursor.clone().map(Cursor::from_token);
            to_json(&repo.query(entity_type, &filter, *limit, cursor.as_ref(), timeout).await?)?
        }
        Command::Update { entity_type, id, data } => {
            let outcome = repo.update(entity_type, id, parse_object(data)?, timeout).await?;
            write_json(outcome)?
        }
        Command::Delete { entity_type, id } => {
            let outcome = repo.delete(entity_type, id, timeout).await?;
            write_json(outcome)?
        }
        Command::Related {
            entity_type,
            id,
            relation,
        } => to_json(&repo.get_related(entity_type, id, relation, timeout).await?)?,
    };
    Ok(value)
}

fn parse_object(data: &str) -> Result<FieldMap> {
    match serde_json::from_str(data).context("data is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("data must be a JSON object, got {other}"),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn write_json<T: Serialize>(outcome: WriteOutcome<T>) -> Result<Value> {
    match outcome {
        WriteOutcome::Committed { value, sync } => Ok(json!({
            "committed": true,
            "value": to_json(&value)?,
            "sync": sync.iter().map(dispatch_json).collect::<Vec<_>>(),
        })),
        WriteOutcome::Unknown(warning) => Ok(json!({
            "committed": null,
            "warning": warning.to_string(),
        })),
    }
}

fn dispatch_json(dispatch: &SyncDispatch) -> Value {
    match dispatch {
        SyncDispatch::Emitted(handle) => json!({
            "event_type": handle.event_type(),
            "sequence": handle.sequence(),
        }),
        SyncDispatch::Rejected { event_type, error } => json!({
            "event_type": event_type,
            "rejected": error.to_string(),
        }),
    }
}
