//! Configuration loader and validator for the poem-archiving bot.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Which bot account this process runs as. Two accounts may share the same
/// archive; each gets its own token and lock file. Resolved once at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Identity {
    Primary,
    Secondary,
}

impl Identity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Identity::Primary => "primary",
            Identity::Secondary => "secondary",
        }
    }

    /// Resolve the running identity: an explicit CLI value wins, then the
    /// `BOT_TYPE` environment variable, then primary.
    pub fn resolve(cli: Option<&str>) -> Result<Identity, ConfigError> {
        let raw = match cli {
            Some(value) => Some(value.to_string()),
            None => std::env::var("BOT_TYPE").ok(),
        };
        match raw.as_deref() {
            None => Ok(Identity::Primary),
            Some(value) => Identity::from_name(value),
        }
    }

    pub fn from_name(value: &str) -> Result<Identity, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "primary" => Ok(Identity::Primary),
            "secondary" => Ok(Identity::Secondary),
            _ => Err(ConfigError::Invalid(
                "identity must be \"primary\" or \"secondary\"",
            )),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    pub vision: Vision,
    pub drive: Drive,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub collect_window_ms: u64,
    pub language: String,
}

/// Telegram bot accounts. `secondary` is optional; it is only required when
/// the process runs with the secondary identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub primary: BotAccount,
    pub secondary: Option<BotAccount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BotAccount {
    pub bot_token: String,
}

/// Transcription providers: the chat-vision primary and the document-text
/// fallback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vision {
    pub chat: ChatVision,
    pub document: DocumentVision,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatVision {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentVision {
    pub access_token: String,
    pub language_hints: Vec<String>,
}

/// Archive storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Drive {
    pub access_token: String,
    pub root_folder_id: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Bot token for the resolved identity.
    pub fn bot_token(&self, identity: Identity) -> Result<&str, ConfigError> {
        match identity {
            Identity::Primary => Ok(&self.telegram.primary.bot_token),
            Identity::Secondary => self
                .telegram
                .secondary
                .as_ref()
                .map(|account| account.bot_token.as_str())
                .ok_or(ConfigError::Invalid(
                    "telegram.secondary must be configured for the secondary identity",
                )),
        }
    }

    /// Well-known lock file location for the given identity.
    pub fn lock_path(&self, identity: Identity) -> PathBuf {
        Path::new(&self.app.data_dir).join(format!(".tg-poembot-{}.pid", identity))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.collect_window_ms == 0 {
        return Err(ConfigError::Invalid("app.collect_window_ms must be > 0"));
    }
    if cfg.app.language.trim().is_empty() {
        return Err(ConfigError::Invalid("app.language must be non-empty"));
    }

    if cfg.telegram.primary.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "telegram.primary.bot_token must be non-empty",
        ));
    }
    if let Some(secondary) = &cfg.telegram.secondary {
        if secondary.bot_token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "telegram.secondary.bot_token must be non-empty when present",
            ));
        }
    }

    if cfg.vision.chat.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("vision.chat.api_key must be non-empty"));
    }
    if cfg.vision.chat.model.trim().is_empty() {
        return Err(ConfigError::Invalid("vision.chat.model must be non-empty"));
    }
    if cfg.vision.document.access_token.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "vision.document.access_token must be non-empty",
        ));
    }
    if cfg.vision.document.language_hints.is_empty() {
        return Err(ConfigError::Invalid(
            "vision.document.language_hints must list at least one hint",
        ));
    }

    if cfg.drive.access_token.trim().is_empty() {
        return Err(ConfigError::Invalid("drive.access_token must be non-empty"));
    }
    if cfg.drive.root_folder_id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "drive.root_folder_id must be non-empty",
        ));
    }

    Ok(())
}

/// Example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  collect_window_ms: 1000
  language: "es"

telegram:
  primary:
    bot_token: "YOUR_PRIMARY_BOT_TOKEN"
  secondary:
    bot_token: "YOUR_SECONDARY_BOT_TOKEN"

vision:
  chat:
    api_key: "YOUR_OPENAI_API_KEY"
    model: "gpt-4o"
  document:
    access_token: "YOUR_GOOGLE_ACCESS_TOKEN"
    language_hints:
      - "es-419"
      - "es"
      - "en"

drive:
  access_token: "YOUR_GOOGLE_ACCESS_TOKEN"
  root_folder_id: "DRIVE_ROOT_FOLDER_ID"
"#
}
