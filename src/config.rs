use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    pub twitter: Option<TwitterConfig>,
    pub sqlite: Option<SqliteConfig>,
    pub dropbox: Option<DropboxConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// The chat the bot watches, replies in and pins its config to
    pub chat_id: i64,
    /// Users whose messages are handled. Empty means everyone in the chat.
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
    /// Username (without `@`) mentioned on failures
    #[serde(default)]
    pub mention_username: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Reserved leading token of control commands
    #[serde(default = "default_command")]
    pub command: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwitterConfig {
    /// Base URL of an fxtwitter-compatible status API
    #[serde(default = "default_twitter_api")]
    pub api_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqliteConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DropboxConfig {
    /// Absolute Dropbox folder media are written under, e.g. "/stash"
    pub base_dir: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
    /// Long-lived access token used when no OAuth token has been saved
    #[serde(default)]
    pub token: Option<String>,
}

fn default_command() -> String {
    "stash".to_string()
}

fn default_twitter_api() -> String {
    "https://api.fxtwitter.com".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("stash.db")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;

        if config.engine.command.is_empty() || config.engine.command.contains(char::is_whitespace)
        {
            anyhow::bail!("engine.command must be a single non-empty word");
        }

        if let Some(dropbox) = &config.dropbox {
            if !dropbox.base_dir.starts_with('/') {
                anyhow::bail!(
                    "dropbox.base_dir must be an absolute path, got {:?}",
                    dropbox.base_dir
                );
            }
        }

        Ok(config)
    }
}
