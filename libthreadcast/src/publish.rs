//! Two-phase publish pipeline
//!
//! Phase A submits the content to the platform's create endpoint exactly once.
//! Phase B asks the platform to publish the resulting container, waiting a
//! fixed delay after every failed attempt because containers take a roughly
//! constant time to finish processing. The default policy therefore gives a
//! container 10 attempts over 150 s. A 401 at any point deactivates the
//! account and aborts. A container that will not be published is handed back
//! to the adapter to discard.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::PublishConfig;
use crate::error::{PlatformError, Result, ThreadcastError};
use crate::platforms::{AdapterRegistry, PublishedPost};
use crate::refresh::TokenRefreshManager;
use crate::types::{ExternalAccount, PostPayload, PublishJob, PublishStatus};

/// Waits after a failed publish attempt
#[async_trait]
pub trait Delay: Send + Sync {
    async fn wait(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and remembers every requested wait
#[derive(Debug, Default)]
pub struct RecordingDelay {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.waits().iter().sum()
    }
}

#[async_trait]
impl Delay for RecordingDelay {
    async fn wait(&self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PublishConfig::default())
    }
}

impl From<&PublishConfig> for RetryPolicy {
    fn from(config: &PublishConfig) -> Self {
        Self::new(config.max_attempts, config.delay())
    }
}

/// Result of a successful publish
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// The platform's response, unchanged
    pub post: PublishedPost,
    pub job: PublishJob,
    /// The account as it stands after any token refresh
    pub account: ExternalAccount,
}

pub struct PublishPipeline {
    refresh: Arc<TokenRefreshManager>,
    adapters: AdapterRegistry,
    policy: RetryPolicy,
    delay: Arc<dyn Delay>,
}

impl PublishPipeline {
    pub fn new(
        refresh: Arc<TokenRefreshManager>,
        adapters: AdapterRegistry,
        policy: RetryPolicy,
        delay: Arc<dyn Delay>,
    ) -> Self {
        Self {
            refresh,
            adapters,
            policy,
            delay,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Publish `payload` from `account`.
    ///
    /// # Errors
    ///
    /// - `TokenRefreshFailed` / `NotConnected` when no usable token can be obtained
    /// - `Unauthorized` when the platform answers 401; the account is deactivated
    /// - `CreateFailed` when the create call fails for any other reason
    /// - `PublishExhausted` when every publish attempt failed; the account stays active
    pub async fn publish(
        &self,
        account: &ExternalAccount,
        payload: PostPayload,
    ) -> Result<PublishOutcome> {
        let adapter = self.adapters.get(account.platform)?;
        let valid = self.refresh.ensure_valid_token(account).await?;
        let account = valid.account.clone();
        let auth = valid.auth();
        let platform = account.platform;

        let mut job = PublishJob::new(payload, &account);

        // Phase A
        job.status = PublishStatus::Creating;
        let container_id = match adapter.create_container(&auth, &job.payload).await {
            Ok(id) => id,
            Err(e) => {
                job.status = PublishStatus::Failed;
                return Err(self.fail_create(&account, e).await);
            }
        };
        tracing::debug!(%platform, container_id = %container_id, "Container created");
        job.container_id = Some(container_id.clone());

        // Phase B
        job.status = PublishStatus::Publishing;
        let mut last_error = String::new();
        while job.attempts < self.policy.max_attempts {
            job.attempts += 1;

            match adapter.publish_container(&auth, &container_id).await {
                Ok(post) => {
                    job.status = PublishStatus::Published;
                    tracing::info!(
                        %platform,
                        post_id = %post.id,
                        attempts = job.attempts,
                        "Published"
                    );
                    return Ok(PublishOutcome { post, job, account });
                }
                Err(e) if e.is_unauthorized() => {
                    job.status = PublishStatus::Failed;
                    tracing::warn!(
                        %platform,
                        attempt = job.attempts,
                        "Publish rejected credentials, aborting"
                    );
                    adapter.discard_container(&container_id).await;
                    self.refresh.selector().deactivate(&account).await?;
                    return Err(ThreadcastError::Unauthorized { platform });
                }
                Err(e) => {
                    tracing::debug!(
                        %platform,
                        attempt = job.attempts,
                        max_attempts = self.policy.max_attempts,
                        "Publish attempt failed: {}",
                        e
                    );
                    last_error = e.to_string();
                    self.delay.wait(self.policy.delay).await;
                }
            }
        }

        job.status = PublishStatus::Failed;
        adapter.discard_container(&container_id).await;
        tracing::warn!(
            %platform,
            container_id = %container_id,
            attempts = job.attempts,
            "Publishing exhausted all attempts: {}",
            last_error
        );
        Err(ThreadcastError::PublishExhausted {
            attempts: job.attempts,
            last_error,
        })
    }

    async fn fail_create(&self, account: &ExternalAccount, error: PlatformError) -> ThreadcastError {
        let platform = account.platform;
        if error.is_unauthorized() {
            tracing::warn!(%platform, "Create rejected credentials, aborting");
            if let Err(e) = self.refresh.selector().deactivate(account).await {
                return e;
            }
            return ThreadcastError::Unauthorized { platform };
        }

        tracing::warn!(%platform, "Container creation failed: {}", error);
        ThreadcastError::CreateFailed(error.to_string())
    }
}
