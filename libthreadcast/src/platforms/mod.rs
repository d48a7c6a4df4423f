//! Platform adapters
//!
//! Every external platform is reached through the [`Adapter`] trait. Each
//! implementation maps its transport and decoding failures into
//! [`PlatformError`] before returning, so callers only ever branch on that
//! type. Adapters are looked up by [`Platform`] in an [`AdapterRegistry`].

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{PlatformError, Result, ThreadcastError};
use crate::types::{Identity, Platform, PostPayload, TokenSet};

pub mod farcaster;
pub mod threads;
pub mod x;

// Available in all builds so integration tests can script adapter behavior
pub mod mock;

pub type AdapterResult<T> = std::result::Result<T, PlatformError>;

/// Credentials of one account, decrypted for the duration of a call
#[derive(Clone)]
pub struct AuthContext {
    /// Platform-side user id (Threads user id, X user id, Farcaster fid)
    pub external_id: String,
    pub access_token: SecretString,
}

impl AuthContext {
    pub fn new(external_id: impl Into<String>, access_token: SecretString) -> Self {
        Self {
            external_id: external_id.into(),
            access_token,
        }
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("external_id", &self.external_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Response of a successful publish call, passed through unchanged
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedPost {
    /// Remote id of the published post
    pub id: String,
    pub body: serde_json::Value,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Exchange the stored credentials for fresh ones
    async fn refresh(
        &self,
        auth: &AuthContext,
        refresh_token: Option<&SecretString>,
    ) -> AdapterResult<TokenSet>;

    /// Submit content and return the id of the staged container
    async fn create_container(&self, auth: &AuthContext, payload: &PostPayload)
        -> AdapterResult<String>;

    /// Publish a previously created container
    async fn publish_container(
        &self,
        auth: &AuthContext,
        container_id: &str,
    ) -> AdapterResult<PublishedPost>;

    async fn fetch_identity(&self, auth: &AuthContext) -> AdapterResult<Identity>;

    /// Forget a container that will not be published. Adapters that stage
    /// content locally drop it here.
    async fn discard_container(&self, _container_id: &str) {}
}

/// Lookup table from platform to its adapter
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the HTTP adapter of every platform
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = http_client()?;
        let mut registry = Self::new();
        registry.register(Arc::new(threads::ThreadsAdapter::new(
            client.clone(),
            &config.threads,
        )));
        registry.register(Arc::new(x::XAdapter::new(client.clone(), &config.x)));
        registry.register(Arc::new(farcaster::FarcasterAdapter::new(
            client,
            &config.farcaster,
            clock,
        )));
        Ok(registry)
    }

    /// Add or replace the adapter for `adapter.platform()`
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn Adapter>> {
        self.adapters.get(&platform).cloned().ok_or_else(|| {
            ThreadcastError::Platform(PlatformError::NotSupported(format!(
                "No adapter registered for {}",
                platform
            )))
        })
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("threadcast/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)).into())
}

/// Classify a non-success HTTP status.
///
/// Only 401 means the credential is dead. A 403 is a refusal of this request
/// (X answers a duplicate post with one) and stays a rejection.
pub(crate) fn map_status(status: u16, body: &str) -> PlatformError {
    let message = error_message(body).unwrap_or_else(|| truncate(body, 200));
    match status {
        401 => PlatformError::Unauthorized(message),
        429 => PlatformError::RateLimit(message),
        400..=499 => PlatformError::Rejected { status, message },
        _ => PlatformError::Network(format!("HTTP {}: {}", status, message)),
    }
}

pub(crate) fn map_transport_error(error: reqwest::Error) -> PlatformError {
    if let Some(status) = error.status() {
        return map_status(status.as_u16(), "");
    }
    if error.is_decode() {
        return PlatformError::InvalidResponse(error.to_string());
    }
    PlatformError::Network(error.to_string())
}

/// Read a response body as JSON, mapping error statuses and bad bodies
pub(crate) async fn read_json(response: reqwest::Response) -> AdapterResult<serde_json::Value> {
    let status = response.status();
    let body = response.text().await.map_err(map_transport_error)?;

    if !status.is_success() {
        return Err(map_status(status.as_u16(), &body));
    }

    serde_json::from_str(&body)
        .map_err(|e| PlatformError::InvalidResponse(format!("Malformed JSON body: {}", e)))
}

/// Pull a string or number field out of a JSON object
pub(crate) fn string_field(value: &serde_json::Value, pointer: &str) -> AdapterResult<String> {
    match value.pointer(pointer) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(PlatformError::InvalidResponse(format!(
            "Missing field '{}' in response",
            pointer
        ))),
    }
}

/// Parse the usual OAuth token response shape
pub(crate) fn token_set_from_json(value: &serde_json::Value) -> AdapterResult<TokenSet> {
    let mut tokens = TokenSet::new(string_field(value, "/access_token")?);
    if let Some(refresh) = value.get("refresh_token").and_then(|v| v.as_str()) {
        tokens = tokens.with_refresh_token(refresh);
    }
    if let Some(expires_in) = value.get("expires_in").and_then(|v| v.as_i64()) {
        tokens = tokens.with_expires_in(expires_in);
    }
    Ok(tokens)
}

fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let candidates = [
        "/error/message",
        "/error_description",
        "/detail",
        "/errors/0/message",
        "/message",
        "/error",
    ];
    candidates
        .iter()
        .find_map(|p| value.pointer(p).and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockAdapter;

    #[test]
    fn test_map_status() {
        assert!(matches!(map_status(401, ""), PlatformError::Unauthorized(_)));
        assert!(matches!(
            map_status(403, "You are not allowed to create a Tweet with duplicate content."),
            PlatformError::Rejected { status: 403, .. }
        ));
        assert!(matches!(map_status(429, ""), PlatformError::RateLimit(_)));
        assert!(matches!(
            map_status(400, ""),
            PlatformError::Rejected { status: 400, .. }
        ));
        assert!(matches!(map_status(500, ""), PlatformError::Network(_)));
        assert!(matches!(map_status(503, ""), PlatformError::Network(_)));
    }

    #[test]
    fn test_map_status_extracts_error_message() {
        let body = r#"{"error":{"message":"Invalid OAuth access token","code":190}}"#;
        assert_eq!(
            map_status(401, body),
            PlatformError::Unauthorized("Invalid OAuth access token".to_string())
        );

        let body = r#"{"error":"invalid_request","error_description":"Value passed for the token was invalid."}"#;
        assert_eq!(
            map_status(400, body),
            PlatformError::Rejected {
                status: 400,
                message: "Value passed for the token was invalid.".to_string()
            }
        );
    }

    #[test]
    fn test_string_field() {
        let value = serde_json::json!({"id": 17841400, "data": {"id": "1445880548472328192"}});
        assert_eq!(string_field(&value, "/id").unwrap(), "17841400");
        assert_eq!(string_field(&value, "/data/id").unwrap(), "1445880548472328192");
        assert!(matches!(
            string_field(&value, "/missing"),
            Err(PlatformError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_token_set_from_json() {
        use secrecy::ExposeSecret;
        let value = serde_json::json!({
            "token_type": "bearer",
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "expires_in": 7200
        });
        let tokens = token_set_from_json(&value).unwrap();
        assert_eq!(tokens.access_token.expose_secret(), "new-access");
        assert_eq!(
            tokens.refresh_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("new-refresh".to_string())
        );
        assert_eq!(tokens.expires_in, Some(7200));

        assert!(token_set_from_json(&serde_json::json!({"token_type": "bearer"})).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(MockAdapter::new(Platform::Threads)));

        assert!(registry.get(Platform::Threads).is_ok());
        assert!(matches!(
            registry.get(Platform::X),
            Err(ThreadcastError::Platform(PlatformError::NotSupported(_)))
        ));
        assert_eq!(registry.platforms(), vec![Platform::Threads]);
    }

    #[test]
    fn test_registry_from_config_covers_all_platforms() {
        let registry = AdapterRegistry::from_config(
            &Config::default_config(),
            Arc::new(crate::clock::SystemClock),
        )
        .unwrap();
        assert_eq!(registry.platforms(), Platform::ALL.to_vec());
    }

    #[test]
    fn test_auth_context_debug_redacts_token() {
        let auth = AuthContext::new("42", SecretString::from("super-secret".to_string()));
        let debug = format!("{:?}", auth);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("42"));
    }
}
