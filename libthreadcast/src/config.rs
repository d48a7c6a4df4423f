//! Configuration management for Threadcast

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub threads: ThreadsConfig,
    #[serde(default)]
    pub x: XConfig,
    #[serde(default)]
    pub farcaster: FarcasterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Environment variable holding the age identity used for tokens at rest
    #[serde(default = "default_encryption_key_env")]
    pub key_env: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_env: default_encryption_key_env(),
        }
    }
}

fn default_encryption_key_env() -> String {
    "THREADCAST_ENCRYPTION_KEY".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    /// Accept a retry budget under 10 attempts / 150 s
    #[serde(default)]
    pub allow_short_budget: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
            allow_short_budget: false,
        }
    }
}

fn default_max_attempts() -> u32 {
    10
}

fn default_delay_secs() -> u64 {
    15
}

/// Smallest publish policy that still covers the platform's container
/// processing time
pub const MIN_PUBLISH_ATTEMPTS: u32 = 10;
pub const MIN_PUBLISH_BUDGET_SECS: u64 = 150;

impl PublishConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    /// Total time spent waiting when every attempt fails. The pipeline waits
    /// once after each failed attempt.
    pub fn budget(&self) -> Duration {
        self.delay() * self.max_attempts
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Tokens with at most this many seconds left are refreshed
    #[serde(default = "default_skew_secs")]
    pub skew_secs: i64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            skew_secs: default_skew_secs(),
        }
    }
}

fn default_skew_secs() -> i64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    #[serde(default = "default_signer_ttl")]
    pub ttl_secs: i64,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_signer_ttl(),
        }
    }
}

fn default_signer_ttl() -> i64 {
    86_400
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsConfig {
    #[serde(default = "default_threads_api")]
    pub api_base: String,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            api_base: default_threads_api(),
        }
    }
}

fn default_threads_api() -> String {
    "https://graph.threads.net/v1.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XConfig {
    #[serde(default = "default_x_api")]
    pub api_base: String,
    #[serde(default = "default_x_token_url")]
    pub token_url: String,
    #[serde(default)]
    pub client_id: Option<String>,
    /// Environment variable holding the OAuth client secret
    #[serde(default = "default_x_secret_env")]
    pub client_secret_env: String,
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            api_base: default_x_api(),
            token_url: default_x_token_url(),
            client_id: None,
            client_secret_env: default_x_secret_env(),
        }
    }
}

fn default_x_api() -> String {
    "https://api.twitter.com/2".to_string()
}

fn default_x_token_url() -> String {
    "https://api.twitter.com/2/oauth2/token".to_string()
}

fn default_x_secret_env() -> String {
    "THREADCAST_X_CLIENT_SECRET".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarcasterConfig {
    #[serde(default = "default_farcaster_api")]
    pub api_base: String,
    #[serde(default = "default_hub_url")]
    pub hub_url: String,
    /// The application's own Farcaster id, which requests signers
    #[serde(default)]
    pub app_fid: Option<u64>,
    /// Environment variable holding the hex custody key that signs key requests
    #[serde(default = "default_custody_key_env")]
    pub custody_key_env: String,
    #[serde(default = "default_farcaster_api_key_env")]
    pub api_key_env: String,
}

impl Default for FarcasterConfig {
    fn default() -> Self {
        Self {
            api_base: default_farcaster_api(),
            hub_url: default_hub_url(),
            app_fid: None,
            custody_key_env: default_custody_key_env(),
            api_key_env: default_farcaster_api_key_env(),
        }
    }
}

fn default_farcaster_api() -> String {
    "https://api.farcaster.xyz".to_string()
}

fn default_hub_url() -> String {
    "http://127.0.0.1:3381".to_string()
}

fn default_custody_key_env() -> String {
    "THREADCAST_FARCASTER_CUSTODY_KEY".to_string()
}

fn default_farcaster_api_key_env() -> String {
    "THREADCAST_FARCASTER_API_KEY".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/threadcast/accounts.db".to_string(),
            },
            encryption: EncryptionConfig::default(),
            publish: PublishConfig::default(),
            refresh: RefreshConfig::default(),
            signer: SignerConfig::default(),
            threads: ThreadsConfig::default(),
            x: XConfig::default(),
            farcaster: FarcasterConfig::default(),
        }
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.publish.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "publish.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        let budget = self.publish.budget().as_secs();
        if self.publish.max_attempts < MIN_PUBLISH_ATTEMPTS || budget < MIN_PUBLISH_BUDGET_SECS {
            if !self.publish.allow_short_budget {
                return Err(ConfigError::InvalidValue {
                    field: "publish".to_string(),
                    reason: format!(
                        "retry budget is {} attempts / {}s, containers need at least {} attempts / {}s \
                         (set publish.allow_short_budget to accept it)",
                        self.publish.max_attempts,
                        budget,
                        MIN_PUBLISH_ATTEMPTS,
                        MIN_PUBLISH_BUDGET_SECS
                    ),
                }
                .into());
            }
            tracing::warn!(
                "Publish retry budget is {} attempts / {}s; containers may not finish processing in time",
                self.publish.max_attempts,
                budget
            );
        }
        if self.refresh.skew_secs < 0 {
            return Err(ConfigError::InvalidValue {
                field: "refresh.skew_secs".to_string(),
                reason: "cannot be negative".to_string(),
            }
            .into());
        }
        if self.signer.ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "signer.ttl_secs".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Expanded database path
    pub fn database_path(&self) -> String {
        shellexpand::tilde(&self.database.path).to_string()
    }
}

/// Read a secret from the named environment variable
pub fn secret_from_env(var: &str) -> Option<SecretString> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Some(SecretString::from(value.trim().to_string())),
        _ => None,
    }
}

/// Resolve the configuration file path under the XDG config directory
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("THREADCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("threadcast").join("config.toml"))
}
