//! Service layer for Threadcast
//!
//! `ThreadcastService` owns the shared resources (database, cipher, adapters)
//! and hands out the components built on them, so the CLIs and tests wire
//! everything the same way.
//!
//! # Example
//!
//! ```no_run
//! use libthreadcast::service::ThreadcastService;
//! use libthreadcast::thread_chain::ThreadChain;
//!
//! # async fn example() -> libthreadcast::Result<()> {
//! let service = ThreadcastService::new().await?;
//! let mut session = service.session("alice").await;
//!
//! let mut chain = ThreadChain::new();
//! chain.add_content_as_segment("Hello from the terminal");
//!
//! for report in service.posting().publish_thread_chain(&mut session, &chain).await {
//!     println!("{:?}", report?.root_id());
//! }
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod posting;

use secrecy::SecretString;
use std::sync::Arc;

use self::events::{EventBus, EventReceiver};
use self::posting::PublishService;
use crate::accounts::{AccountSelector, SessionAccounts};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::crypto::TokenCipher;
use crate::db::Database;
use crate::error::{ConfigError, Result};
use crate::platforms::{AdapterRegistry, AuthContext};
use crate::publish::{Delay, PublishPipeline, RetryPolicy, TokioDelay};
use crate::refresh::TokenRefreshManager;
use crate::signer::SignerWorkflow;
use crate::types::{ExternalAccount, Platform, TokenSet};

/// Main service facade
pub struct ThreadcastService {
    config: Arc<Config>,
    selector: AccountSelector,
    adapters: AdapterRegistry,
    refresh: Arc<TokenRefreshManager>,
    posting: PublishService,
    event_bus: EventBus,
}

impl ThreadcastService {
    /// Load configuration from the default location and open the database
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Build every component from `config`, reading the encryption key from
    /// the environment variable it names.
    pub async fn from_config(config: Config) -> Result<Self> {
        let cipher = TokenCipher::from_env(&config.encryption.key_env)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let adapters = AdapterRegistry::from_config(&config, clock.clone())?;
        Self::with_parts(config, cipher, clock, adapters, Arc::new(TokioDelay)).await
    }

    /// Build with explicit collaborators
    pub async fn with_parts(
        config: Config,
        cipher: TokenCipher,
        clock: Arc<dyn Clock>,
        adapters: AdapterRegistry,
        delay: Arc<dyn Delay>,
    ) -> Result<Self> {
        config.validate()?;

        let db_path = config.database_path();
        let db = Database::new(&db_path).await?;
        let selector = AccountSelector::new(db, cipher, clock);

        let refresh = Arc::new(TokenRefreshManager::new(
            selector.clone(),
            adapters.clone(),
            config.refresh.skew_secs,
        ));
        let pipeline = Arc::new(PublishPipeline::new(
            refresh.clone(),
            adapters.clone(),
            RetryPolicy::from(&config.publish),
            delay,
        ));
        let event_bus = EventBus::default();
        let posting = PublishService::new(pipeline, event_bus.clone());

        Ok(Self {
            config: Arc::new(config),
            selector,
            adapters,
            refresh,
            posting,
            event_bus,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn accounts(&self) -> &AccountSelector {
        &self.selector
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub fn refresh(&self) -> &TokenRefreshManager {
        &self.refresh
    }

    pub fn posting(&self) -> &PublishService {
        &self.posting
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    /// Resolve the selected account of every platform for `owner`
    pub async fn session(&self, owner: &str) -> SessionAccounts {
        SessionAccounts::load(&self.selector, owner).await
    }

    /// Signer workflow backed by the configured authority and custody key
    pub fn signer(&self) -> Result<SignerWorkflow> {
        SignerWorkflow::from_config(&self.config, self.selector.clone())
    }

    /// Link an account from freshly issued OAuth tokens. The platform is asked
    /// who the token belongs to before anything is stored.
    pub async fn connect(
        &self,
        owner: &str,
        platform: Platform,
        external_id_hint: &str,
        tokens: TokenSet,
    ) -> Result<ExternalAccount> {
        let adapter = self.adapters.get(platform)?;
        let auth = AuthContext::new(external_id_hint, tokens.access_token.clone());
        let identity = adapter.fetch_identity(&auth).await?;
        self.selector
            .link_account(owner, platform, &identity, &tokens)
            .await
    }

    /// Token for an explicitly provided access token string
    pub fn token_from_input(access_token: &str) -> Result<SecretString> {
        let trimmed = access_token.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::MissingField("access token".to_string()).into());
        }
        Ok(SecretString::from(trimmed.to_string()))
    }
}
