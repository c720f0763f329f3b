use anyhow::{Context, Result, bail};
use std::{collections::HashMap, env, time::Duration};
use uuid::Uuid;

const DEFAULT_DATABASE_URLS: &str = "main=sqlite://./data/meta/metabase.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// One physical metadata backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardConfig {
    pub name: String,
    pub database_url: String,
}

/// Centralized metabase configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct MetabaseConfig {
    pub shards: Vec<ShardConfig>,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    /// Projects routed to a named shard instead of by hash.
    pub project_pins: HashMap<Uuid, String>,
}

impl MetabaseConfig {
    /// Single-shard configuration for one database URL.
    pub fn single(database_url: impl Into<String>) -> Self {
        Self {
            shards: vec![ShardConfig {
                name: "main".into(),
                database_url: database_url.into(),
            }],
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            project_pins: HashMap::new(),
        }
    }

    /// Parse `METABASE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from any variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let urls = lookup("METABASE_DATABASE_URLS").unwrap_or_else(|| DEFAULT_DATABASE_URLS.into());
        let shards = parse_shards(&urls)
            .with_context(|| format!("parsing METABASE_DATABASE_URLS value `{}`", urls))?;

        let max_connections = match lookup("METABASE_MAX_CONNECTIONS") {
            Some(value) => value
                .parse::<u32>()
                .with_context(|| format!("parsing METABASE_MAX_CONNECTIONS value `{}`", value))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        if max_connections == 0 {
            bail!("METABASE_MAX_CONNECTIONS must be at least 1");
        }

        let busy_timeout_ms = match lookup("METABASE_BUSY_TIMEOUT_MS") {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("parsing METABASE_BUSY_TIMEOUT_MS value `{}`", value))?,
            None => DEFAULT_BUSY_TIMEOUT_MS,
        };

        let project_pins = match lookup("METABASE_PROJECT_PINS") {
            Some(value) => parse_pins(&value, &shards)
                .with_context(|| format!("parsing METABASE_PROJECT_PINS value `{}`", value))?,
            None => HashMap::new(),
        };

        Ok(Self {
            shards,
            max_connections,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
            project_pins,
        })
    }
}

fn parse_shards(raw: &str) -> Result<Vec<ShardConfig>> {
    let mut shards: Vec<ShardConfig> = Vec::new();
    for (i, entry) in raw.split(',').map(str::trim).filter(|s| !s.is_empty()).enumerate() {
        // a URL contains "://", a named entry puts its name before the first '='
        let shard = match entry.split_once('=') {
            Some((name, url)) if !name.contains("://") => ShardConfig {
                name: name.trim().to_string(),
                database_url: url.trim().to_string(),
            },
            _ => ShardConfig {
                name: format!("shard{}", i),
                database_url: entry.to_string(),
            },
        };
        if shard.name.is_empty() || shard.database_url.is_empty() {
            bail!("shard entry `{}` is missing a name or URL", entry);
        }
        if shards.iter().any(|s| s.name == shard.name) {
            bail!("duplicate shard name `{}`", shard.name);
        }
        shards.push(shard);
    }
    if shards.is_empty() {
        bail!("at least one database URL is required");
    }
    Ok(shards)
}

fn parse_pins(raw: &str, shards: &[ShardConfig]) -> Result<HashMap<Uuid, String>> {
    let mut pins = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (project, shard) = entry
            .split_once('=')
            .with_context(|| format!("pin `{}` is not of the form project=shard", entry))?;
        let project = Uuid::parse_str(project.trim())
            .with_context(|| format!("pin `{}` has an invalid project id", entry))?;
        let shard = shard.trim();
        if !shards.iter().any(|s| s.name == shard) {
            bail!("pin `{}` names unknown shard `{}`", entry, shard);
        }
        pins.insert(project, shard.to_string());
    }
    Ok(pins)
}
