use anyhow::{Context, Result, anyhow, bail};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: AppConfig,
}

impl LoadedConfig {
    pub fn resolve(&self, maybe_relative: &Path) -> Result<PathBuf> {
        resolve_path(&self.path, maybe_relative)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        match self.mail.mode {
            MailMode::Gmail => {
                if self.mail.api_base.trim().is_empty() {
                    bail!("mail.api_base must not be empty for gmail mode");
                }
                if self.mail.token_env.trim().is_empty() {
                    bail!("mail.token_env must not be empty for gmail mode");
                }
            }
            MailMode::Directory => {
                if self.mail.inbox_dir.is_none() {
                    bail!("mail.inbox_dir is required for directory mode");
                }
                if self.mail.read_dir_name.contains(['/', '\\']) {
                    bail!("mail.read_dir_name must be a plain directory name");
                }
            }
        }

        if self.pipeline.workers == 0 {
            bail!("pipeline.workers must be at least 1");
        }
        self.pipeline.timezone()?;

        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("server.bind is not a socket address: {}", self.server.bind))?;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MailMode {
    #[default]
    Gmail,
    Directory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub mode: MailMode,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_query")]
    pub query: String,
    /// Environment variable holding an already issued OAuth access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u8,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub inbox_dir: Option<PathBuf>,
    #[serde(default = "default_read_dir_name")]
    pub read_dir_name: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            mode: MailMode::Gmail,
            api_base: default_api_base(),
            user_id: default_user_id(),
            query: default_query(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            user_agent: None,
            inbox_dir: None,
            read_dir_name: default_read_dir_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl PipelineConfig {
    pub fn timezone(&self) -> Result<Tz> {
        match self.timezone.as_deref() {
            None => Ok(Tz::UTC),
            Some(name) => name
                .parse::<Tz>()
                .map_err(|err| anyhow!("pipeline.timezone {name:?} is not an IANA zone: {err}")),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timezone: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// A missing file yields the defaults, anchored at the would-be location.
pub fn load_config(path: &Path) -> Result<LoadedConfig> {
    let config = if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        toml::from_str::<AppConfig>(&text)
            .with_context(|| format!("failed to parse toml in {}", path.display()))?
    } else {
        AppConfig::default()
    };

    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;

    Ok(LoadedConfig {
        path: path.to_path_buf(),
        config,
    })
}

pub fn resolve_path(base_config_path: &Path, maybe_relative: &Path) -> Result<PathBuf> {
    if maybe_relative.is_absolute() {
        return Ok(maybe_relative.to_path_buf());
    }

    let parent = base_config_path
        .parent()
        .ok_or_else(|| anyhow!("config has no parent directory: {}", base_config_path.display()))?;

    Ok(parent.join(maybe_relative))
}

fn default_api_base() -> String {
    "https://gmail.googleapis.com/gmail/v1".to_string()
}

fn default_user_id() -> String {
    "me".to_string()
}

fn default_query() -> String {
    "is:unread".to_string()
}

fn default_token_env() -> String {
    "GMAIL_ACCESS_TOKEN".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_retry_attempts() -> u8 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_read_dir_name() -> String {
    "read".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/sightings.sqlite")
}

fn default_workers() -> usize {
    4
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
