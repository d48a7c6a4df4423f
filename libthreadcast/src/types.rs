//! Core types for Threadcast

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ThreadcastError;

/// External social platforms an account can be linked to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Threads,
    X,
    Farcaster,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Threads, Platform::X, Platform::Farcaster];

    /// Lowercase identifier used in storage and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Threads => "threads",
            Platform::X => "x",
            Platform::Farcaster => "farcaster",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Threads => "Threads",
            Platform::X => "X",
            Platform::Farcaster => "Farcaster",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ThreadcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "threads" => Ok(Platform::Threads),
            "x" | "twitter" => Ok(Platform::X),
            "farcaster" => Ok(Platform::Farcaster),
            other => Err(ThreadcastError::InvalidInput(format!(
                "Unknown platform '{}'. Valid options: threads, x, farcaster",
                other
            ))),
        }
    }
}

/// A user's identity and encrypted credentials on one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAccount {
    pub id: String,
    pub owner: String,
    pub platform: Platform,
    pub external_id: String,
    pub display_name: String,
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: Option<String>,
    /// Unix seconds
    pub token_expiry: Option<i64>,
    pub is_active: bool,
    pub updated_at: i64,
}

/// Which external account is active for a (user, platform) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSelection {
    pub owner: String,
    pub platform: Platform,
    pub account_id: String,
    pub updated_at: i64,
}

/// Identity reported by a platform for an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub external_id: String,
    pub display_name: String,
}

/// Plaintext token material returned by an OAuth exchange or refresh
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Seconds of validity from the moment the tokens were issued
    pub expires_in: Option<i64>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            expires_in: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::from(refresh_token.into()));
        self
    }

    pub fn with_expires_in(mut self, seconds: i64) -> Self {
        self.expires_in = Some(seconds);
        self
    }
}

// ============================================================================
// Signer Requests
// ============================================================================

/// Approval state of a signer request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignerState {
    Pending,
    Approved,
    Expired,
}

impl SignerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerState::Pending => "pending",
            SignerState::Approved => "approved",
            SignerState::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SignerState::Pending),
            "approved" => Some(SignerState::Approved),
            "expired" => Some(SignerState::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SignerState::Pending)
    }

    /// Apply a transition. Only pending -> approved and pending -> expired move
    /// the state; terminal states stay where they are.
    pub fn transition(self, next: SignerState) -> SignerState {
        match (self, next) {
            (SignerState::Pending, next) => next,
            (terminal, _) => terminal,
        }
    }
}

impl std::fmt::Display for SignerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An out-of-band key authorization request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerRequest {
    pub owner: String,
    pub platform_identity: String,
    /// Hex-encoded public key, `0x`-prefixed
    pub public_key: String,
    pub encrypted_private_key: String,
    pub approval_token: String,
    pub approval_link: String,
    pub state: SignerState,
    /// Unix seconds
    pub expires_at: i64,
    pub approved_at: Option<i64>,
}

impl SignerRequest {
    /// State as observed at `now`. A pending request past its deadline reads as expired.
    pub fn effective_state(&self, now: i64) -> SignerState {
        if self.state == SignerState::Pending && now > self.expires_at {
            SignerState::Expired
        } else {
            self.state
        }
    }
}

// ============================================================================
// Publishing
// ============================================================================

/// Media classification of a post segment, always derived from its media list
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaType {
    Text,
    Image,
    Carousel,
}

impl MediaType {
    pub fn from_media(media_urls: &[String]) -> Self {
        match media_urls.len() {
            0 => MediaType::Text,
            1 => MediaType::Image,
            _ => MediaType::Carousel,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Text => "TEXT",
            MediaType::Image => "IMAGE",
            MediaType::Carousel => "CAROUSEL",
        }
    }
}

/// Content submitted to a platform's create endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PostPayload {
    pub text: String,
    pub media_urls: Vec<String>,
    /// Remote id of the post this one replies to
    pub reply_to: Option<String>,
}

impl PostPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn media_type(&self) -> MediaType {
        MediaType::from_media(&self.media_urls)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    Pending,
    Creating,
    Publishing,
    Published,
    Failed,
}

/// In-memory record of one publish invocation
#[derive(Debug, Clone)]
pub struct PublishJob {
    pub payload: PostPayload,
    pub account_id: String,
    pub platform: Platform,
    pub attempts: u32,
    pub status: PublishStatus,
    pub container_id: Option<String>,
}

impl PublishJob {
    pub fn new(payload: PostPayload, account: &ExternalAccount) -> Self {
        Self {
            payload,
            account_id: account.id.clone(),
            platform: account.platform,
            attempts: 0,
            status: PublishStatus::Pending,
            container_id: None,
        }
    }
}
