use std::fmt;

use serde::{Deserialize, Serialize};

pub const CURRENT_CONFIG_VERSION: u32 = 1;
pub const MAX_ATTEMPTS: u32 = 5;

fn default_interval_minutes() -> f64 {
    0.5
}

fn default_endpoints() -> Vec<String> {
    vec![
        "https://iac.srmist.edu.in/Connect/PortalMain".to_string(),
        "https://iach.srmist.edu.in/Connect/PortalMain".to_string(),
    ]
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_freshness_hours() -> u64 {
    12
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_headless() -> bool {
    true
}

fn default_max_log_days() -> u64 {
    7
}

fn default_logging() -> bool {
    true
}

/// Username in plain text, password base64-encoded. The encoding keeps the
/// secret from being read at a glance; it is not a security boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
}

/// Element ids of the portal login page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalLayout {
    pub username_field: String,
    pub password_field: String,
    pub submit_button: String,
    pub logoff_button: String,
    /// Any of these being present means the session is authenticated.
    /// They are checked together, none takes precedence.
    pub success_markers: Vec<String>,
    /// Element whose text changes once the portal accepts a login.
    /// Empty disables the check.
    pub title_element: String,
}

impl Default for PortalLayout {
    fn default() -> Self {
        Self {
            username_field: "LoginUserPassword_auth_username".to_string(),
            password_field: "LoginUserPassword_auth_password".to_string(),
            submit_button: "UserCheck_Login_Button".to_string(),
            logoff_button: "UserCheck_Logoff_Button".to_string(),
            success_markers: vec!["UserCheck_Logoff_Button".to_string()],
            title_element: "usercheck_title_div".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub credentials: CredentialsConfig,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: f64,
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: u64,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_headless")]
    pub headless: bool,
    pub portal: PortalLayout,
    #[serde(default)]
    pub log_directory: Option<String>,
    #[serde(default = "default_max_log_days")]
    pub max_log_days: u64,
    #[serde(default = "default_logging")]
    pub logging: bool,
    #[serde(default)]
    pub config_version: u32,
    /// Values `validate` had to replace, shown to the user at startup.
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            credentials: CredentialsConfig::default(),
            interval_minutes: default_interval_minutes(),
            endpoints: default_endpoints(),
            probe_timeout_secs: default_probe_timeout_secs(),
            freshness_hours: default_freshness_hours(),
            webdriver_url: default_webdriver_url(),
            headless: default_headless(),
            portal: PortalLayout::default(),
            log_directory: None,
            max_log_days: default_max_log_days(),
            logging: default_logging(),
            config_version: CURRENT_CONFIG_VERSION,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    NotLoggedIn,
    WaitingForNetwork,
    Pending,
    Success,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SessionStatus::NotLoggedIn => "Not logged in.",
            SessionStatus::WaitingForNetwork => "Waiting for the portal network.",
            SessionStatus::Pending => "Login in progress.",
            SessionStatus::Success => "Login successful.",
            SessionStatus::Failed => "Login failed.",
        };
        f.write_str(text)
    }
}

/// Result of one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success(String),
    AlreadyAuthenticated(String),
    NoPortalReachable,
    InvalidCredentials,
    SecretUndecodable,
    PageTimeout,
    ElementMissing,
    NotInteractable,
    BrowserUnavailable(String),
    ConfigInvalid(String),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Success(url) => write!(f, "logged in via {url}"),
            AttemptOutcome::AlreadyAuthenticated(url) => write!(f, "already authenticated on {url}"),
            AttemptOutcome::NoPortalReachable => f.write_str("no portal reachable"),
            AttemptOutcome::InvalidCredentials => f.write_str("invalid credentials"),
            AttemptOutcome::SecretUndecodable => f.write_str("stored password could not be decoded"),
            AttemptOutcome::PageTimeout => f.write_str("login page took too long to load"),
            AttemptOutcome::ElementMissing => f.write_str("login page elements missing"),
            AttemptOutcome::NotInteractable => f.write_str("login page elements not interactable"),
            AttemptOutcome::BrowserUnavailable(err) => write!(f, "browser unavailable: {err}"),
            AttemptOutcome::ConfigInvalid(err) => write!(f, "invalid configuration: {err}"),
        }
    }
}

/// How one scheduler cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleResult {
    LoggedIn(String),
    AlreadyAuthenticated(String),
    NoPortal,
    Failed(String),
    CoolingDown,
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    LoggedOut,
    NothingToDo,
    NoPortalReachable,
    Indeterminate(String),
}

/// Everything the presentation layer can ask of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TriggerLogin,
    TriggerLogout,
    RequestRefresh,
    QueryStatus,
}
