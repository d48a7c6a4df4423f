//! Signer approval workflow
//!
//! Platforms that authorize writes by delegated key (Farcaster) need an
//! out-of-band approval before a locally generated key may act for the user:
//!
//! ```text
//! none --start--> pending --approval observed--> approved
//!                    \------deadline passed-----> expired
//! ```
//!
//! `expired` is derived at read time from `expires_at`; no timer runs. State
//! only moves forward. Starting again for the same (owner, platform identity)
//! replaces a pending or expired request with a new one, and the replaced
//! approval token stops resolving. An approved request is kept as is.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::sync::Arc;

use crate::accounts::AccountSelector;
use crate::clock::Clock;
use crate::config::{secret_from_env, Config};
use crate::error::{Result, ThreadcastError};
use crate::platforms::{map_transport_error, read_json, string_field, AdapterResult};
use crate::types::{ExternalAccount, Identity, Platform, SignerRequest, SignerState, TokenSet};

pub mod custody;
pub mod keypair;
pub mod mock;

pub use custody::CustodySigner;
pub use keypair::SignerKeypair;

/// Payload submitted to the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedKeyRequest {
    /// `0x`-prefixed signer public key
    pub public_key: String,
    /// `0x`-prefixed custody signature
    pub signature: String,
    pub deadline: i64,
    /// The application's own id on the platform
    pub request_fid: u64,
}

/// What the authority hands back for a new request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerSubmission {
    pub approval_token: String,
    /// Link the user opens to approve
    pub approval_link: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSignerState {
    Pending,
    Completed,
    Expired,
    Revoked,
}

impl RemoteSignerState {
    pub fn parse(s: &str) -> Self {
        match s {
            "completed" | "approved" => RemoteSignerState::Completed,
            "expired" => RemoteSignerState::Expired,
            "revoked" => RemoteSignerState::Revoked,
            _ => RemoteSignerState::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSignerStatus {
    pub state: RemoteSignerState,
    /// Id of the user who approved, once known
    pub user_fid: Option<String>,
}

/// The external service that brokers signer approval
#[async_trait]
pub trait SignerAuthority: Send + Sync {
    async fn submit_signed_key_request(
        &self,
        request: &SignedKeyRequest,
    ) -> AdapterResult<SignerSubmission>;

    async fn fetch_signed_key_request(&self, approval_token: &str)
        -> AdapterResult<RemoteSignerStatus>;
}

/// Farcaster client API authority
pub struct HttpSignerAuthority {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<secrecy::SecretString>,
}

impl HttpSignerAuthority {
    pub fn new(client: reqwest::Client, api_base: &str, api_key: Option<secrecy::SecretString>) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            crate::platforms::http_client()?,
            &config.farcaster.api_base,
            secret_from_env(&config.farcaster.api_key_env),
        ))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl SignerAuthority for HttpSignerAuthority {
    async fn submit_signed_key_request(
        &self,
        request: &SignedKeyRequest,
    ) -> AdapterResult<SignerSubmission> {
        let body = serde_json::json!({
            "key": request.public_key,
            "requestFid": request.request_fid,
            "signature": request.signature,
            "deadline": request.deadline,
        });

        let response = self
            .authorize(
                self.client
                    .post(format!("{}/v2/signed-key-requests", self.api_base)),
            )
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let body = read_json(response).await?;
        Ok(SignerSubmission {
            approval_token: string_field(&body, "/result/signedKeyRequest/token")?,
            approval_link: string_field(&body, "/result/signedKeyRequest/deeplinkUrl")?,
        })
    }

    async fn fetch_signed_key_request(
        &self,
        approval_token: &str,
    ) -> AdapterResult<RemoteSignerStatus> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/v2/signed-key-request", self.api_base)),
            )
            .query(&[("token", approval_token)])
            .send()
            .await
            .map_err(map_transport_error)?;

        let body = read_json(response).await?;
        let state = string_field(&body, "/result/signedKeyRequest/state")?;
        Ok(RemoteSignerStatus {
            state: RemoteSignerState::parse(&state),
            user_fid: string_field(&body, "/result/signedKeyRequest/userFid").ok(),
        })
    }
}

/// Drives signer requests from creation to approval or expiry
pub struct SignerWorkflow {
    selector: AccountSelector,
    authority: Arc<dyn SignerAuthority>,
    custody: CustodySigner,
    app_fid: u64,
    ttl_secs: i64,
}

impl SignerWorkflow {
    pub fn new(
        selector: AccountSelector,
        authority: Arc<dyn SignerAuthority>,
        custody: CustodySigner,
        app_fid: u64,
        ttl_secs: i64,
    ) -> Self {
        Self {
            selector,
            authority,
            custody,
            app_fid,
            ttl_secs,
        }
    }

    /// Build from configuration. The custody key comes from the environment.
    pub fn from_config(config: &Config, selector: AccountSelector) -> Result<Self> {
        let app_fid = config.farcaster.app_fid.ok_or_else(|| {
            crate::error::ConfigError::MissingField("farcaster.app_fid".to_string())
        })?;
        let custody_hex = secret_from_env(&config.farcaster.custody_key_env).ok_or_else(|| {
            crate::error::CredentialError::KeyNotSet(config.farcaster.custody_key_env.clone())
        })?;
        let custody = CustodySigner::from_hex(custody_hex.expose_secret())?;
        let authority = Arc::new(HttpSignerAuthority::from_config(config)?);

        Ok(Self::new(
            selector,
            authority,
            custody,
            app_fid,
            config.signer.ttl_secs,
        ))
    }

    fn now(&self) -> i64 {
        self.selector.clock().now()
    }

    /// Create a signer request for `platform_identity` (the user's fid).
    ///
    /// A pending or expired request for the same pair is replaced. When the
    /// pair already has an approved signer that request is returned and
    /// nothing is submitted.
    pub async fn start(&self, owner: &str, platform_identity: &str) -> Result<SignerRequest> {
        if platform_identity.trim().is_empty() {
            return Err(ThreadcastError::InvalidInput(
                "A platform identity is required to request a signer".to_string(),
            ));
        }

        if let Some(existing) = self.status(owner, platform_identity).await? {
            if existing.state == SignerState::Approved {
                tracing::info!(owner, platform_identity, "Signer already approved");
                return Ok(existing);
            }
        }

        let keypair = SignerKeypair::generate();
        let now = self.now();
        let deadline = now + self.ttl_secs;
        let public_key = keypair.public_key_hex();
        let signature = self
            .custody
            .sign_key_request(self.app_fid, &keypair.public_key_bytes(), deadline)?;

        let submission = self
            .authority
            .submit_signed_key_request(&SignedKeyRequest {
                public_key: public_key.clone(),
                signature,
                deadline,
                request_fid: self.app_fid,
            })
            .await
            .map_err(|e| {
                tracing::warn!(owner, platform_identity, "Signer request rejected: {}", e);
                ThreadcastError::SignerRequestFailed(e.to_string())
            })?;

        let encrypted_private_key = self
            .selector
            .cipher()
            .encrypt_bytes(keypair.secret_bytes().as_slice())?;

        let request = SignerRequest {
            owner: owner.to_string(),
            platform_identity: platform_identity.to_string(),
            public_key,
            encrypted_private_key,
            approval_token: submission.approval_token,
            approval_link: submission.approval_link,
            state: SignerState::Pending,
            expires_at: deadline,
            approved_at: None,
        };

        let written = self
            .selector
            .database()
            .upsert_signer_request(&request, now)
            .await?;
        if !written {
            // Approved while this request was being submitted
            return self
                .status(owner, platform_identity)
                .await?
                .ok_or_else(|| ThreadcastError::SignerRequestFailed("unknown signer request".to_string()));
        }

        tracing::info!(
            owner,
            platform_identity,
            expires_at = request.expires_at,
            "Signer request pending approval"
        );
        Ok(request)
    }

    /// Current request for (owner, platform identity), with read-time expiry applied
    pub async fn status(&self, owner: &str, platform_identity: &str) -> Result<Option<SignerRequest>> {
        let now = self.now();
        Ok(self
            .selector
            .database()
            .get_signer_request(owner, platform_identity)
            .await?
            .map(|mut request| {
                request.state = request.effective_state(now);
                request
            }))
    }

    async fn request_by_token(&self, owner: &str, approval_token: &str) -> Result<SignerRequest> {
        self.selector
            .database()
            .get_signer_request_by_token(owner, approval_token)
            .await?
            .ok_or_else(|| ThreadcastError::SignerRequestFailed("unknown signer request".to_string()))
    }

    /// Ask the authority for the request's state and apply it locally
    pub async fn poll(&self, owner: &str, approval_token: &str) -> Result<SignerRequest> {
        let mut request = self.request_by_token(owner, approval_token).await?;
        let now = self.now();

        let effective = request.effective_state(now);
        if effective.is_terminal() {
            request.state = effective;
            return Ok(request);
        }

        let remote = self
            .authority
            .fetch_signed_key_request(approval_token)
            .await?;

        match remote.state {
            RemoteSignerState::Pending => Ok(request),
            RemoteSignerState::Completed => {
                self.observe_approval(owner, approval_token, remote.user_fid.as_deref())
                    .await
            }
            RemoteSignerState::Expired | RemoteSignerState::Revoked => {
                self.selector
                    .database()
                    .transition_signer_request(owner, approval_token, SignerState::Expired, None, now)
                    .await?;
                tracing::info!(owner, state = ?remote.state, "Signer request closed by authority");
                request.state = request.state.transition(SignerState::Expired);
                Ok(request)
            }
        }
    }

    /// Record an approval reported by poll or callback.
    ///
    /// Approval only lands on a request that is still pending and within its
    /// deadline; otherwise the stored state is returned unchanged. On success
    /// the signer key becomes the credential of the approving fid's account
    /// and is selected. The account is linked before the request is marked
    /// approved, so a failed link leaves the request pending for a retry.
    pub async fn observe_approval(
        &self,
        owner: &str,
        approval_token: &str,
        user_fid: Option<&str>,
    ) -> Result<SignerRequest> {
        let mut request = self.request_by_token(owner, approval_token).await?;
        let now = self.now();

        match request.effective_state(now) {
            SignerState::Pending => {}
            state => {
                tracing::debug!(owner, %state, "Ignoring approval for closed signer request");
                request.state = state;
                return Ok(request);
            }
        }

        // The key is authorized for whoever approved it
        let approving_fid = match user_fid {
            Some(fid) if !fid.trim().is_empty() => fid.trim(),
            _ => request.platform_identity.as_str(),
        };
        if approving_fid != request.platform_identity {
            tracing::warn!(
                owner,
                requested = %request.platform_identity,
                approved_by = approving_fid,
                "Signer approved by a different fid than requested"
            );
        }

        let account = self.link_signer_account(&request, approving_fid).await?;

        let moved = self
            .selector
            .database()
            .transition_signer_request(owner, approval_token, SignerState::Approved, Some(now), now)
            .await?;
        if !moved {
            // Lost a race with another observer; report what is stored now
            let mut current = self.request_by_token(owner, approval_token).await?;
            current.state = current.effective_state(now);
            return Ok(current);
        }

        request.state = request.state.transition(SignerState::Approved);
        request.approved_at = Some(now);

        tracing::info!(owner, fid = %account.external_id, "Signer approved");
        Ok(request)
    }

    async fn link_signer_account(&self, request: &SignerRequest, fid: &str) -> Result<ExternalAccount> {
        let secret = zeroize::Zeroizing::new(
            self.selector
                .cipher()
                .decrypt_bytes(&request.encrypted_private_key)?,
        );
        let keypair = SignerKeypair::from_bytes(&secret)?;
        let tokens = TokenSet::new(keypair.secret_hex().as_str());

        let identity = Identity {
            external_id: fid.to_string(),
            display_name: format!("fid:{}", fid),
        };

        self.selector
            .link_account(&request.owner, Platform::Farcaster, &identity, &tokens)
            .await
    }
}
