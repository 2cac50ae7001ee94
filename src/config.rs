use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::fs;

use crate::models::{AppConfig, CredentialsConfig, CURRENT_CONFIG_VERSION};
use crate::ports::{ConfigError, ConfigStore};

const CONFIG_DIR_NAME: &str = "portal-autologin";
const CONFIG_FILE_NAME: &str = "settings.json";

/// Key used by documents written before `config_version` existed.
const LEGACY_INTERVAL_KEY: &str = "interval_mins";

pub fn encode_secret(plain: &str) -> String {
    STANDARD.encode(plain.as_bytes())
}

pub fn decode_secret(encoded: &str) -> Result<String, String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|err| format!("password is not valid base64: {err}"))?;
    String::from_utf8(bytes).map_err(|err| format!("password is not valid UTF-8: {err}"))
}

/// Apply forward migrations to the raw document before typed parsing.
fn migrate(raw_json: &str) -> Result<AppConfig, String> {
    let mut doc: Value =
        serde_json::from_str(raw_json).map_err(|err| format!("invalid settings JSON: {err}"))?;

    let from = doc
        .get("config_version")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;

    // version 0 → 1: interval_mins renamed to interval_minutes
    if from < 1 {
        if let Some(obj) = doc.as_object_mut() {
            if let Some(legacy) = obj.remove(LEGACY_INTERVAL_KEY) {
                if !obj.contains_key("interval_minutes") {
                    info!("migrating settings v{from} → v1 (interval_mins → interval_minutes)");
                    obj.insert("interval_minutes".to_string(), legacy);
                }
            }
        }
    }

    serde_json::from_value(doc).map_err(|err| format!("invalid settings document: {err}"))
}

fn is_valid_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// Clamp, trim, and sanitise every field so the rest of the app can trust it.
/// Replaced values the user should know about are listed in `cfg.warnings`.
pub fn validate(mut cfg: AppConfig) -> AppConfig {
    cfg.warnings.clear();
    cfg.credentials.username = cfg.credentials.username.trim().to_string();
    cfg.credentials.password = cfg.credentials.password.trim().to_string();

    if !cfg.interval_minutes.is_finite() || cfg.interval_minutes <= 0.0 {
        warn!(
            "config: invalid interval_minutes '{}', resetting to default",
            cfg.interval_minutes
        );
        cfg.interval_minutes = AppConfig::default().interval_minutes;
        cfg.warnings.push(format!(
            "Invalid interval_minutes found in settings, using {} minutes.",
            cfg.interval_minutes
        ));
    }
    cfg.interval_minutes = cfg.interval_minutes.clamp(1.0 / 60.0, 1_440.0);

    let before = cfg.endpoints.len();
    cfg.endpoints = cfg
        .endpoints
        .iter()
        .map(|url| url.trim().to_string())
        .filter(|url| {
            let valid = is_valid_url(url);
            if !valid {
                warn!("config: dropping invalid endpoint '{url}'");
            }
            valid
        })
        .collect();
    let dropped = before - cfg.endpoints.len();
    if dropped > 0 {
        cfg.warnings
            .push(format!("Ignoring {dropped} invalid endpoint(s) in settings."));
    }
    if cfg.endpoints.is_empty() {
        warn!("config: no usable endpoints, restoring defaults");
        cfg.endpoints = AppConfig::default().endpoints;
    }

    let webdriver_url = cfg.webdriver_url.trim().trim_end_matches('/').to_string();
    if !is_valid_url(&webdriver_url) {
        warn!(
            "config: invalid webdriver_url '{}', resetting to default",
            cfg.webdriver_url
        );
        cfg.webdriver_url = AppConfig::default().webdriver_url;
        cfg.warnings.push(format!(
            "Invalid webdriver_url found in settings, using {}.",
            cfg.webdriver_url
        ));
    } else {
        cfg.webdriver_url = webdriver_url;
    }

    cfg.probe_timeout_secs = cfg.probe_timeout_secs.clamp(1, 60);
    cfg.freshness_hours = cfg.freshness_hours.clamp(1, 168);
    cfg.max_log_days = cfg.max_log_days.clamp(1, 365);

    cfg.portal.success_markers = cfg
        .portal
        .success_markers
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    if cfg.portal.success_markers.is_empty() {
        cfg.portal.success_markers = vec![cfg.portal.logoff_button.clone()];
    }

    cfg.log_directory = cfg.log_directory.and_then(|path| {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    });

    // stamp current version
    cfg.config_version = CURRENT_CONFIG_VERSION;
    cfg
}

/// Credentials are the only fields without a usable default.
pub fn require_credentials(cfg: &AppConfig) -> Result<(), ConfigError> {
    if cfg.credentials.username.is_empty() {
        return Err(ConfigError::Incomplete("credentials.username is missing".into()));
    }
    if cfg.credentials.password.is_empty() {
        return Err(ConfigError::Incomplete("credentials.password is missing".into()));
    }
    Ok(())
}

pub fn default_config_path() -> Result<PathBuf, String> {
    let mut base = dirs::config_dir().ok_or_else(|| "failed to resolve config dir".to_string())?;
    base.push(CONFIG_DIR_NAME);
    base.push(CONFIG_FILE_NAME);
    Ok(base)
}

/// Default directory for the daily activity logs.
pub fn default_log_dir() -> Option<PathBuf> {
    let mut base = dirs::data_local_dir()?;
    base.push(CONFIG_DIR_NAME);
    base.push("logs");
    Some(base)
}

async fn read_document(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    debug!("loading settings from {}", path.display());

    let content = fs::read_to_string(path)
        .await
        .map_err(|err| ConfigError::Io(format!("failed to read settings: {err}")))?;

    let migrated = migrate(&content).map_err(ConfigError::Malformed)?;
    Ok(validate(migrated))
}

async fn write_document(path: &Path, cfg: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| ConfigError::Io(format!("failed to create settings directory: {err}")))?;
    }

    let serialized = serde_json::to_string_pretty(cfg)
        .map_err(|err| ConfigError::Io(format!("failed to serialize settings: {err}")))?;

    fs::write(path, serialized)
        .await
        .map_err(|err| ConfigError::Io(format!("failed to write settings: {err}")))
}

/// Settings kept in one human-editable JSON document.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> Result<AppConfig, ConfigError> {
        let cfg = read_document(&self.path).await?;
        require_credentials(&cfg)?;
        Ok(cfg)
    }

    async fn save_credentials(&self, username: &str, encoded_secret: &str) -> Result<(), ConfigError> {
        // Keep every other field of an existing document; a document that
        // cannot be parsed is left for the user to fix.
        let mut cfg = match read_document(&self.path).await {
            Ok(cfg) => cfg,
            Err(ConfigError::NotFound(_)) => AppConfig::default(),
            Err(err) => {
                warn!("not saving credentials over {}: {}", self.path.display(), err);
                return Err(err);
            }
        };
        cfg.credentials = CredentialsConfig {
            username: username.trim().to_string(),
            password: encoded_secret.trim().to_string(),
        };

        info!("saving credentials to {}", self.path.display());
        write_document(&self.path, &validate(cfg)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_encoding_is_reversible() {
        let encoded = encode_secret("hunter2 ünïcode");
        assert_ne!(encoded, "hunter2 ünïcode");
        assert_eq!(decode_secret(&encoded).unwrap(), "hunter2 ünïcode");
    }

    #[test]
    fn undecodable_secrets_are_rejected() {
        assert!(decode_secret("not base64!!").is_err());
        // valid base64, invalid UTF-8
        assert!(decode_secret(&STANDARD.encode([0xff, 0xfe, 0xfd])).is_err());
    }

    #[test]
    fn validate_resets_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.interval_minutes = -3.0;
        cfg.endpoints = vec!["ftp://nope".into(), " https://portal.example/login ".into()];
        cfg.webdriver_url = "chromedriver".into();
        cfg.probe_timeout_secs = 0;
        cfg.portal.success_markers = vec!["  ".into()];
        cfg.config_version = 0;

        let cfg = validate(cfg);
        assert_eq!(cfg.warnings.len(), 3);
        assert_eq!(cfg.interval_minutes, 0.5);
        assert_eq!(cfg.endpoints, vec!["https://portal.example/login".to_string()]);
        assert_eq!(cfg.webdriver_url, "http://localhost:9515");
        assert_eq!(cfg.probe_timeout_secs, 1);
        assert_eq!(cfg.portal.success_markers, vec![cfg.portal.logoff_button.clone()]);
        assert_eq!(cfg.config_version, CURRENT_CONFIG_VERSION);
    }

    #[tokio::test]
    async fn invalid_interval_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"credentials": {"username": "u", "password": "cA=="}, "interval_minutes": -1}"#,
        )
        .unwrap();

        let cfg = FileConfigStore::new(path).load().await.unwrap();
        assert_eq!(cfg.interval_minutes, 0.5);
        assert_eq!(
            cfg.warnings,
            vec!["Invalid interval_minutes found in settings, using 0.5 minutes.".to_string()]
        );
    }

    #[test]
    fn clean_settings_have_no_warnings() {
        assert!(validate(AppConfig::default()).warnings.is_empty());
    }

    #[test]
    fn legacy_interval_key_is_migrated() {
        let cfg = migrate(r#"{"credentials": {"username": "u", "password": "cA=="}, "interval_mins": 10}"#)
            .unwrap();
        assert_eq!(cfg.interval_minutes, 10.0);
    }

    #[tokio::test]
    async fn load_reports_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("settings.json"));
        assert!(matches!(store.load().await, Err(ConfigError::NotFound(_))));
    }

    #[tokio::test]
    async fn load_rejects_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"interval_minutes": 2}"#).unwrap();

        let store = FileConfigStore::new(path);
        assert!(matches!(store.load().await, Err(ConfigError::Incomplete(_))));
    }

    #[tokio::test]
    async fn save_credentials_keeps_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"interval_minutes": 15, "headless": false}"#).unwrap();

        let store = FileConfigStore::new(path);
        store
            .save_credentials("ra2111", &encode_secret("secret"))
            .await
            .unwrap();

        let cfg = store.load().await.unwrap();
        assert_eq!(cfg.credentials.username, "ra2111");
        assert_eq!(decode_secret(&cfg.credentials.password).unwrap(), "secret");
        assert_eq!(cfg.interval_minutes, 15.0);
        assert!(!cfg.headless);
    }

    #[tokio::test]
    async fn malformed_document_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let broken = r#"{"interval_minutes": 15, "headless": false,}"#;
        std::fs::write(&path, broken).unwrap();

        let store = FileConfigStore::new(path.clone());
        assert!(matches!(store.load().await, Err(ConfigError::Malformed(_))));
        assert!(matches!(
            store.save_credentials("ra2111", &encode_secret("secret")).await,
            Err(ConfigError::Malformed(_))
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), broken);
    }

    #[tokio::test]
    async fn save_credentials_creates_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("a").join("settings.json"));
        store.save_credentials("u", &encode_secret("p")).await.unwrap();
        assert!(store.path().exists());
        assert_eq!(store.load().await.unwrap().interval_minutes, 0.5);
    }
}
