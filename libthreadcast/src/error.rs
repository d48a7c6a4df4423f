//! Error types for Threadcast

use thiserror::Error;

use crate::types::Platform;

pub type Result<T> = std::result::Result<T, ThreadcastError>;

#[derive(Error, Debug)]
pub enum ThreadcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("No active {platform} account is connected")]
    NotConnected { platform: Platform },

    #[error("Token refresh failed for {platform}: {reason}")]
    TokenRefreshFailed { platform: Platform, reason: String },

    #[error("{platform} rejected the stored credentials")]
    Unauthorized { platform: Platform },

    #[error("Container creation failed: {0}")]
    CreateFailed(String),

    #[error("Publishing failed after {attempts} attempts: {last_error}")]
    PublishExhausted { attempts: u32, last_error: String },

    #[error("Signer request failed: {0}")]
    SignerRequestFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThreadcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ThreadcastError::InvalidInput(_) => 3,
            ThreadcastError::NotConnected { .. }
            | ThreadcastError::TokenRefreshFailed { .. }
            | ThreadcastError::Unauthorized { .. }
            | ThreadcastError::SignerRequestFailed(_)
            | ThreadcastError::Platform(PlatformError::Unauthorized(_)) => 2,
            _ => 1,
        }
    }

    /// Whether the caller should ask the user to reconnect the account
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            ThreadcastError::TokenRefreshFailed { .. } | ThreadcastError::Unauthorized { .. }
        )
    }

    /// Message shown to the user. Attempt counts and remote error bodies stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            ThreadcastError::NotConnected { platform } => {
                format!("Connect a {} account to continue.", platform.display_name())
            }
            ThreadcastError::TokenRefreshFailed { platform, .. }
            | ThreadcastError::Unauthorized { platform } => {
                format!("Reconnect your {} account.", platform.display_name())
            }
            ThreadcastError::SignerRequestFailed(_) => {
                "The signer request could not be created. Please start the connection again."
                    .to_string()
            }
            ThreadcastError::CreateFailed(_) | ThreadcastError::PublishExhausted { .. } => {
                "Publishing failed. Please try again later.".to_string()
            }
            ThreadcastError::InvalidInput(msg) => msg.clone(),
            _ => "Something went wrong. Please try again later.".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Encryption key not set (expected in {0})")]
    KeyNotSet(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised at the adapter boundary. Transport and decoding failures never
/// cross it in any other form.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl PlatformError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, PlatformError::Unauthorized(_))
    }
}
