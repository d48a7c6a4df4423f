//! Proactive OAuth token refresh
//!
//! Tokens are refreshed only when they are within `skew_secs` of expiry.
//! Refreshes of the same account are serialized by a per-account async guard:
//! some providers invalidate the previous refresh token on every rotation, so
//! the second of two concurrent callers must see the first caller's result
//! instead of presenting an already-superseded refresh token.

use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::accounts::AccountSelector;
use crate::error::{Result, ThreadcastError};
use crate::platforms::{AdapterRegistry, AuthContext};
use crate::types::ExternalAccount;

/// An account together with an access token that is good to use now
#[derive(Clone)]
pub struct ValidToken {
    pub account: ExternalAccount,
    pub access_token: SecretString,
}

impl ValidToken {
    pub fn auth(&self) -> AuthContext {
        AuthContext::new(self.account.external_id.clone(), self.access_token.clone())
    }
}

impl std::fmt::Debug for ValidToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidToken")
            .field("account_id", &self.account.id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

pub struct TokenRefreshManager {
    selector: AccountSelector,
    adapters: AdapterRegistry,
    skew_secs: i64,
    guards: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenRefreshManager {
    pub fn new(selector: AccountSelector, adapters: AdapterRegistry, skew_secs: i64) -> Self {
        Self {
            selector,
            adapters,
            skew_secs,
            guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn selector(&self) -> &AccountSelector {
        &self.selector
    }

    /// Whether a token expiring at `expiry` can still be used at `now`
    fn is_fresh(&self, expiry: Option<i64>, now: i64) -> bool {
        match expiry {
            Some(expiry) => expiry - now > self.skew_secs,
            None => true,
        }
    }

    fn guard_for(&self, account_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        match self.guards.lock() {
            Ok(mut guards) => guards
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone(),
            // A poisoned map only loses serialization, not correctness of a single refresh
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn release_guard(&self, account_id: &str) {
        if let Ok(mut guards) = self.guards.lock() {
            if guards
                .get(account_id)
                .map(|g| Arc::strong_count(g) == 1)
                .unwrap_or(false)
            {
                guards.remove(account_id);
            }
        }
    }

    /// Return a usable access token for `account`, refreshing it if needed.
    ///
    /// * no refresh token: the access token is used as-is
    /// * more than `skew_secs` of validity left: the stored token is reused
    /// * otherwise the platform's refresh endpoint is called; success persists
    ///   the rotated tokens, failure deactivates the account
    pub async fn ensure_valid_token(&self, account: &ExternalAccount) -> Result<ValidToken> {
        let access_token = self.decrypt_access(account)?;
        let now = self.selector.clock().now();

        if account.encrypted_refresh_token.is_none() {
            return Ok(ValidToken {
                account: account.clone(),
                access_token,
            });
        }

        if self.is_fresh(account.token_expiry, now) {
            tracing::debug!(account_id = %account.id, "Reusing cached access token");
            return Ok(ValidToken {
                account: account.clone(),
                access_token,
            });
        }

        self.refresh_locked(account, false).await
    }

    /// Refresh regardless of remaining validity
    pub async fn force_refresh(&self, account: &ExternalAccount) -> Result<ValidToken> {
        self.refresh_locked(account, true).await
    }

    async fn refresh_locked(&self, account: &ExternalAccount, force: bool) -> Result<ValidToken> {
        let guard = self.guard_for(&account.id);
        let result = {
            let _held = guard.lock().await;
            self.refresh_inner(account, force).await
        };
        drop(guard);
        self.release_guard(&account.id);
        result
    }

    async fn refresh_inner(&self, account: &ExternalAccount, force: bool) -> Result<ValidToken> {
        let platform = account.platform;

        // Another caller may have rotated the tokens while we waited
        let current = self
            .selector
            .database()
            .get_account(&account.id)
            .await?
            .unwrap_or_else(|| account.clone());

        if !current.is_active {
            return Err(ThreadcastError::TokenRefreshFailed {
                platform,
                reason: "account is no longer active".to_string(),
            });
        }

        let now = self.selector.clock().now();
        if !force && self.is_fresh(current.token_expiry, now) {
            tracing::debug!(account_id = %current.id, "Token rotated by a concurrent refresh");
            let access_token = self.decrypt_access(&current)?;
            return Ok(ValidToken {
                account: current,
                access_token,
            });
        }

        let adapter = self.adapters.get(platform)?;
        let access_token = self.decrypt_access(&current)?;
        let refresh_token = self.selector.refresh_token_of(&current);
        let auth = AuthContext::new(current.external_id.clone(), access_token);

        tracing::info!(account_id = %current.id, %platform, "Refreshing access token");
        match adapter.refresh(&auth, refresh_token.as_ref()).await {
            Ok(tokens) => {
                let updated = self.selector.store_rotated_tokens(&current, &tokens).await?;
                tracing::debug!(
                    account_id = %updated.id,
                    expires_at = ?updated.token_expiry,
                    "Stored rotated tokens"
                );
                Ok(ValidToken {
                    account: updated,
                    access_token: tokens.access_token,
                })
            }
            Err(e) => {
                tracing::warn!(account_id = %current.id, %platform, "Token refresh failed: {}", e);
                self.selector.deactivate(&current).await?;
                Err(ThreadcastError::TokenRefreshFailed {
                    platform,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn decrypt_access(&self, account: &ExternalAccount) -> Result<SecretString> {
        self.selector.decrypt_access_token(account).map_err(|e| {
            tracing::warn!(account_id = %account.id, "Cannot read stored access token: {}", e);
            ThreadcastError::NotConnected {
                platform: account.platform,
            }
        })
    }
}
