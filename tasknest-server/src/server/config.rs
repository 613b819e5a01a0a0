use serde::Deserialize;
use std::{env, fs, path::Path};
use tasknest_shared::auth::Role;
use tasknest_shared::domain::Member;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub household_id: String,
    pub members: Vec<Member>,
    pub jwt_secret: String,
    pub users: Vec<UserConfig>,
    /// IANA timezone the household lives in; "due today" is evaluated here.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub push: Option<PushConfig>,
    pub dev_cors_origin: Option<String>,
    pub listen_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub password_hash: String, // bcrypt hash
    pub role: Role,
    pub member_id: Option<String>, // required when role == member
}

/// Messaging-provider service credentials. Absent or disabled config keeps
/// the server running with the dispatch endpoint answering 503.
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub project_id: Option<String>,
    pub client_email: Option<String>,
    /// PEM-encoded RSA private key of the service identity.
    pub private_key: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_api_base() -> String {
    "https://fcm.googleapis.com/v1".to_string()
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Yaml(e) => write!(f, "YAML error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        ConfigError::Yaml(value)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        let cfg: AppConfig = serde_yaml::from_str(&text)?;
        Ok(cfg)
    }

    /// Parsed household timezone; a bad value degrades to UTC with a warning.
    pub fn timezone(&self) -> chrono_tz::Tz {
        match self.timezone.parse::<chrono_tz::Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                tracing::warn!(timezone = %self.timezone, "unknown timezone; falling back to UTC");
                chrono_tz::UTC
            }
        }
    }
}
