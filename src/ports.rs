use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::models::AppConfig;

#[derive(Debug)]
pub enum ConfigError {
    /// No settings file yet, i.e. first run.
    NotFound(PathBuf),
    /// The document exists but cannot be parsed. Never overwritten.
    Malformed(String),
    /// The document parses but lacks credentials.
    Incomplete(String),
    Io(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotFound(path) => write!(f, "no settings file at {}", path.display()),
            ConfigError::Malformed(e) => write!(f, "unreadable settings: {}", e),
            ConfigError::Incomplete(e) => write!(f, "incomplete settings: {}", e),
            ConfigError::Io(e) => write!(f, "settings I/O error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Port for the persisted settings document.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Loads and validates the settings. Missing credentials are `Incomplete`.
    async fn load(&self) -> Result<AppConfig, ConfigError>;
    async fn save_credentials(&self, username: &str, encoded_secret: &str) -> Result<(), ConfigError>;
}

// Port for asking the user for a username and password.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// `None` when the user declines.
    async fn ask_for_credentials(&self) -> Option<(String, String)>;
}

// Port for user-facing notifications. Fire-and-forget: implementations must
// not wait for the user to dismiss anything.
pub trait Notifier: Send + Sync {
    fn alert(&self, title: &str, message: &str);
    fn info(&self, title: &str, message: &str);
}
