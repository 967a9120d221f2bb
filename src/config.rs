//! Configuration
//!
//! Store identity (token, owner, repo) is resolved once per process:
//! 1. A server-side config endpoint (`PICKS_CONFIG_URL`), if one is set
//! 2. Local environment (`GITHUB_TOKEN`, `GITHUB_REPO_OWNER`, `GITHUB_REPO_NAME`, `.env`)
//!
//! League settings (players, season start) live in `config.json`. The web
//! binary's own settings come from `PICKS_*` environment variables.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub const DEFAULT_OWNER: &str = "jmhale15";
pub const DEFAULT_REPO: &str = "nfl-picks";

const CONFIG_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity of the picks repository. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
}

impl StoreConfig {
    /// Read identity from the environment, with defaults for owner and repo
    pub fn from_env() -> Self {
        Self {
            token: non_empty_env("GITHUB_TOKEN"),
            owner: Some(non_empty_env("GITHUB_REPO_OWNER").unwrap_or_else(|| DEFAULT_OWNER.to_string())),
            repo: Some(non_empty_env("GITHUB_REPO_NAME").unwrap_or_else(|| DEFAULT_REPO.to_string())),
        }
    }

    /// True when token, owner and repo are all present and non-empty
    pub fn is_ready(&self) -> bool {
        [&self.token, &self.owner, &self.repo]
            .iter()
            .all(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// A place store identity can be read from
#[async_trait]
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<StoreConfig>;
}

/// The server-side config endpoint (`GET` returning `{token, owner, repo}`)
pub struct HttpConfigSource {
    url: String,
    client: reqwest::Client,
}

impl HttpConfigSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CONFIG_ENDPOINT_TIMEOUT)
            .build()
            .context("Failed to build config endpoint client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<StoreConfig> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to reach config endpoint")?;

        if !response.status().is_success() {
            anyhow::bail!("Config endpoint returned error: {}", response.status());
        }

        response
            .json()
            .await
            .context("Failed to parse config endpoint response")
    }
}

/// Local override read from the process environment
pub struct EnvConfigSource;

#[async_trait]
impl ConfigSource for EnvConfigSource {
    fn name(&self) -> &str {
        "environment"
    }

    async fn fetch(&self) -> Result<StoreConfig> {
        Ok(StoreConfig::from_env())
    }
}

/// Resolves store identity at most once, primary source first.
///
/// Never fails: if every source fails the result is an empty, not-ready config.
pub struct ConfigResolver {
    primary: Option<Box<dyn ConfigSource>>,
    secondary: Box<dyn ConfigSource>,
    resolved: OnceCell<StoreConfig>,
}

impl ConfigResolver {
    pub fn new(primary: Option<Box<dyn ConfigSource>>, secondary: Box<dyn ConfigSource>) -> Self {
        Self {
            primary,
            secondary,
            resolved: OnceCell::new(),
        }
    }

    /// Endpoint from `PICKS_CONFIG_URL` (when set), then the environment
    pub fn from_env() -> Self {
        let primary = non_empty_env("PICKS_CONFIG_URL").and_then(|url| {
            match HttpConfigSource::new(url) {
                Ok(source) => Some(Box::new(source) as Box<dyn ConfigSource>),
                Err(e) => {
                    warn!("Ignoring config endpoint: {:#}", e);
                    None
                }
            }
        });
        Self::new(primary, Box::new(EnvConfigSource))
    }

    pub async fn resolve(&self) -> StoreConfig {
        self.resolved
            .get_or_init(|| async {
                if let Some(primary) = &self.primary {
                    match primary.fetch().await {
                        Ok(config) => {
                            info!(source = primary.name(), ready = config.is_ready(), "Resolved store config");
                            return config;
                        }
                        Err(e) => warn!(
                            source = primary.name(),
                            "Config source failed, falling back to {}: {:#}",
                            self.secondary.name(),
                            e
                        ),
                    }
                }

                match self.secondary.fetch().await {
                    Ok(config) => {
                        info!(source = self.secondary.name(), ready = config.is_ready(), "Resolved store config");
                        config
                    }
                    Err(e) => {
                        warn!(source = self.secondary.name(), "Config source failed: {:#}", e);
                        StoreConfig::default()
                    }
                }
            })
            .await
            .clone()
    }

    /// False until [`ConfigResolver::resolve`] has completed with a complete config
    pub fn is_ready(&self) -> bool {
        self.resolved.get().is_some_and(StoreConfig::is_ready)
    }

    /// Forget the resolved config so the next `resolve` asks the sources again
    pub fn reset(&mut self) {
        self.resolved = OnceCell::new();
    }
}

/// League settings shared with the games feed (`config.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeagueConfig {
    pub players: Vec<String>,
    pub season_start_date: NaiveDate,
}

impl LeagueConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read league config: {:?}", path))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse league config: {:?}", path))
    }
}

/// Settings for the web binary
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Directory for the local picks fallback
    pub data_dir: PathBuf,
    /// Local copy of the games document
    pub games_file: PathBuf,
    /// Working directory for trigger commands
    pub scripts_dir: PathBuf,
    pub scraper_command: String,
    pub sheets_command: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            data_dir: PathBuf::from("local_picks"),
            games_file: PathBuf::from("games.json"),
            scripts_dir: PathBuf::from("."),
            scraper_command: "python3 scrape.py".to_string(),
            sheets_command: "python3 sync-to-sheets.py".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(val) = non_empty_env("PICKS_BIND_ADDR") {
            config.bind_addr = val;
        }
        if let Some(val) = non_empty_env("PICKS_DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }
        if let Some(val) = non_empty_env("PICKS_GAMES_FILE") {
            config.games_file = PathBuf::from(val);
        }
        if let Some(val) = non_empty_env("SCRIPTS_DIR") {
            config.scripts_dir = PathBuf::from(val);
        }
        if let Some(val) = non_empty_env("SCRAPER_COMMAND") {
            config.scraper_command = val;
        }
        if let Some(val) = non_empty_env("SHEETS_SYNC_COMMAND") {
            config.sheets_command = val;
        }
        config
    }
}
