//! Account selection for multi-account credential support
//!
//! Each user may link several external accounts per platform. Exactly one of
//! them is selected per (user, platform); everything that talks to a platform
//! goes through the selected account.

use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::crypto::TokenCipher;
use crate::db::Database;
use crate::error::{CredentialError, Result, ThreadcastError};
use crate::types::{ExternalAccount, Identity, Platform, TokenSet};

/// Resolves and maintains the active external account per (user, platform)
#[derive(Clone)]
pub struct AccountSelector {
    db: Database,
    cipher: TokenCipher,
    clock: Arc<dyn Clock>,
}

impl AccountSelector {
    pub fn new(db: Database, cipher: TokenCipher, clock: Arc<dyn Clock>) -> Self {
        Self { db, cipher, clock }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The selected, active account for (owner, platform).
    ///
    /// Absence is the ordinary "not connected" state. Storage errors are
    /// logged and read as absence too.
    pub async fn get_selected_account(
        &self,
        owner: &str,
        platform: Platform,
    ) -> Option<ExternalAccount> {
        match self.db.get_selected_account(owner, platform).await {
            Ok(account) => account,
            Err(e) => {
                tracing::error!(owner, %platform, "Failed to load selected account: {}", e);
                None
            }
        }
    }

    pub async fn require_selected_account(
        &self,
        owner: &str,
        platform: Platform,
    ) -> Result<ExternalAccount> {
        self.get_selected_account(owner, platform)
            .await
            .ok_or(ThreadcastError::NotConnected { platform })
    }

    /// Decrypted access token of the selected account.
    ///
    /// Never fails. When the selected account is missing or its token cannot
    /// be decrypted, the pre-multi-account single token for the user is tried
    /// before giving up.
    pub async fn get_selected_access_token(
        &self,
        owner: &str,
        platform: Platform,
    ) -> Option<SecretString> {
        if let Some(account) = self.get_selected_account(owner, platform).await {
            match self.cipher.decrypt(&account.encrypted_access_token) {
                Ok(token) => return Some(token),
                Err(e) => {
                    tracing::warn!(
                        account_id = %account.id,
                        %platform,
                        "Stored access token is unreadable ({}), trying legacy credentials",
                        e
                    );
                }
            }
        }

        self.legacy_access_token(owner, platform).await
    }

    pub async fn require_selected_access_token(
        &self,
        owner: &str,
        platform: Platform,
    ) -> Result<SecretString> {
        self.get_selected_access_token(owner, platform)
            .await
            .ok_or(ThreadcastError::NotConnected { platform })
    }

    async fn legacy_access_token(&self, owner: &str, platform: Platform) -> Option<SecretString> {
        let encrypted = match self.db.get_legacy_token(owner, platform).await {
            Ok(Some(encrypted)) => encrypted,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(owner, %platform, "Failed to load legacy credentials: {}", e);
                return None;
            }
        };

        match self.cipher.decrypt(&encrypted) {
            Ok(token) => {
                tracing::debug!(owner, %platform, "Using legacy single-account credentials");
                Some(token)
            }
            Err(e) => {
                tracing::warn!(owner, %platform, "Legacy credentials are unreadable: {}", e);
                None
            }
        }
    }

    /// Decrypt the refresh token of an account, if it has a readable one
    pub fn refresh_token_of(&self, account: &ExternalAccount) -> Option<SecretString> {
        let encrypted = account.encrypted_refresh_token.as_deref()?;
        match self.cipher.decrypt(encrypted) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(account_id = %account.id, "Stored refresh token is unreadable: {}", e);
                None
            }
        }
    }

    /// Store the result of a successful OAuth callback or signer approval and
    /// select the account.
    pub async fn link_account(
        &self,
        owner: &str,
        platform: Platform,
        identity: &Identity,
        tokens: &TokenSet,
    ) -> Result<ExternalAccount> {
        use secrecy::ExposeSecret;

        if owner.trim().is_empty() {
            return Err(ThreadcastError::InvalidInput("Owner cannot be empty".to_string()));
        }
        if identity.external_id.trim().is_empty() {
            return Err(ThreadcastError::InvalidInput(
                "External account id cannot be empty".to_string(),
            ));
        }

        let now = self.clock.now();
        let encrypted_access_token = self.cipher.encrypt(tokens.access_token.expose_secret())?;
        let encrypted_refresh_token = tokens
            .refresh_token
            .as_ref()
            .map(|t| self.cipher.encrypt(t.expose_secret()))
            .transpose()?;

        let mut account = ExternalAccount {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            platform,
            external_id: identity.external_id.clone(),
            display_name: identity.display_name.clone(),
            encrypted_access_token,
            encrypted_refresh_token,
            token_expiry: tokens.expires_in.map(|secs| now + secs),
            is_active: true,
            updated_at: now,
        };

        account.id = self.db.upsert_account(&account).await?;
        self.db
            .upsert_selection(owner, platform, &account.id, now)
            .await?;

        tracing::info!(
            account_id = %account.id,
            %platform,
            external_id = %account.external_id,
            "Linked and selected account"
        );

        Ok(account)
    }

    /// Switch the selected account for a platform
    pub async fn select_account(
        &self,
        owner: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<ExternalAccount> {
        let account = self
            .db
            .get_account(account_id)
            .await?
            .filter(|a| a.owner == owner && a.platform == platform)
            .ok_or_else(|| {
                ThreadcastError::InvalidInput(format!(
                    "Account '{}' is not a {} account of this user",
                    account_id, platform
                ))
            })?;

        if !account.is_active {
            return Err(ThreadcastError::Unauthorized { platform });
        }

        self.db
            .upsert_selection(owner, platform, &account.id, self.clock.now())
            .await?;

        tracing::info!(account_id = %account.id, %platform, "Selected account");
        Ok(account)
    }

    /// Soft-disable an account and drop the selection if it pointed at it
    pub async fn disconnect(&self, owner: &str, platform: Platform, account_id: &str) -> Result<()> {
        let account = self
            .db
            .get_account(account_id)
            .await?
            .filter(|a| a.owner == owner && a.platform == platform)
            .ok_or_else(|| {
                ThreadcastError::InvalidInput(format!(
                    "Account '{}' is not a {} account of this user",
                    account_id, platform
                ))
            })?;

        if let Some(selection) = self.db.get_selection(owner, platform).await? {
            if selection.account_id == account.id {
                self.db.delete_selection(owner, platform).await?;
            }
        }

        self.deactivate(&account).await?;
        tracing::info!(account_id = %account.id, %platform, "Disconnected account");
        Ok(())
    }

    pub async fn list_accounts(
        &self,
        owner: &str,
        platform: Option<Platform>,
    ) -> Result<Vec<ExternalAccount>> {
        self.db.list_accounts(owner, platform).await
    }

    /// Mark an account inactive after an auth failure
    pub async fn deactivate(&self, account: &ExternalAccount) -> Result<()> {
        self.db
            .set_account_active(&account.id, false, self.clock.now())
            .await?;
        tracing::warn!(account_id = %account.id, platform = %account.platform, "Account deactivated");
        Ok(())
    }

    /// Persist rotated tokens. The refresh token and expiry fall back to the
    /// stored values when the provider omits them.
    pub async fn store_rotated_tokens(
        &self,
        account: &ExternalAccount,
        tokens: &TokenSet,
    ) -> Result<ExternalAccount> {
        use secrecy::ExposeSecret;

        let now = self.clock.now();
        let encrypted_access_token = self.cipher.encrypt(tokens.access_token.expose_secret())?;
        let encrypted_refresh_token = match &tokens.refresh_token {
            Some(token) => Some(self.cipher.encrypt(token.expose_secret())?),
            None => account.encrypted_refresh_token.clone(),
        };
        let token_expiry = tokens
            .expires_in
            .map(|secs| now + secs)
            .or(account.token_expiry);

        self.db
            .update_account_tokens(
                &account.id,
                &encrypted_access_token,
                encrypted_refresh_token.as_deref(),
                token_expiry,
                now,
            )
            .await?;

        Ok(ExternalAccount {
            encrypted_access_token,
            encrypted_refresh_token,
            token_expiry,
            is_active: true,
            updated_at: now,
            ..account.clone()
        })
    }

    pub(crate) fn decrypt_access_token(&self, account: &ExternalAccount) -> Result<SecretString> {
        self.cipher
            .decrypt(&account.encrypted_access_token)
            .map_err(|_| CredentialError::DecryptionFailed.into())
    }
}

/// The selected account of every platform for one user, resolved once per
/// session and passed explicitly to publish operations.
#[derive(Debug, Clone, Default)]
pub struct SessionAccounts {
    owner: String,
    accounts: HashMap<Platform, ExternalAccount>,
}

impl SessionAccounts {
    pub async fn load(selector: &AccountSelector, owner: &str) -> Self {
        let mut accounts = HashMap::new();
        for platform in Platform::ALL {
            if let Some(account) = selector.get_selected_account(owner, platform).await {
                accounts.insert(platform, account);
            }
        }

        tracing::debug!(owner, connected = accounts.len(), "Loaded session accounts");
        Self {
            owner: owner.to_string(),
            accounts,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn get(&self, platform: Platform) -> Option<&ExternalAccount> {
        self.accounts.get(&platform)
    }

    pub fn require(&self, platform: Platform) -> Result<&ExternalAccount> {
        self.get(platform)
            .ok_or(ThreadcastError::NotConnected { platform })
    }

    pub fn is_connected(&self, platform: Platform) -> bool {
        self.accounts.contains_key(&platform)
    }

    /// Connected platforms in `Platform::ALL` order
    pub fn connected_platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.accounts.contains_key(p))
            .collect()
    }

    /// Replace the cached record after a refresh or deactivation
    pub fn update(&mut self, account: ExternalAccount) {
        if account.is_active {
            self.accounts.insert(account.platform, account);
        } else {
            self.accounts.remove(&account.platform);
        }
    }
}
