//! X (Twitter API v2) adapter
//!
//! X publishes in a single call, so the create phase only validates the
//! payload and stages it locally under a generated container id. The publish
//! phase sends the staged tweet; a failed send leaves it staged for the next
//! attempt until the pipeline discards it.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{
    map_transport_error, read_json, string_field, token_set_from_json, Adapter, AdapterResult,
    AuthContext, PublishedPost,
};
use crate::config::{secret_from_env, XConfig};
use crate::error::PlatformError;
use crate::types::{Identity, Platform, PostPayload, TokenSet};

pub const X_TEXT_LIMIT: usize = 280;

pub struct XAdapter {
    client: reqwest::Client,
    api_base: String,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    staged: Arc<Mutex<HashMap<String, PostPayload>>>,
}

impl XAdapter {
    pub fn new(client: reqwest::Client, config: &XConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: secret_from_env(&config.client_secret_env),
            staged: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of tweets waiting to be published
    pub fn staged_count(&self) -> usize {
        self.staged.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn validate(payload: &PostPayload) -> AdapterResult<()> {
        if payload.text.trim().is_empty() {
            return Err(PlatformError::Validation("Tweet text cannot be empty".to_string()));
        }
        let length = payload.text.chars().count();
        if length > X_TEXT_LIMIT {
            return Err(PlatformError::Validation(format!(
                "X posts are limited to {} characters (got {})",
                X_TEXT_LIMIT, length
            )));
        }
        if !payload.media_urls.is_empty() {
            return Err(PlatformError::NotSupported(
                "Media attachments are not supported for X".to_string(),
            ));
        }
        Ok(())
    }

    fn tweet_body(payload: &PostPayload) -> serde_json::Value {
        let mut body = serde_json::json!({ "text": payload.text });
        if let Some(reply_to) = &payload.reply_to {
            body["reply"] = serde_json::json!({ "in_reply_to_tweet_id": reply_to });
        }
        body
    }
}

#[async_trait]
impl Adapter for XAdapter {
    fn platform(&self) -> Platform {
        Platform::X
    }

    async fn refresh(
        &self,
        _auth: &AuthContext,
        refresh_token: Option<&SecretString>,
    ) -> AdapterResult<TokenSet> {
        let refresh_token = refresh_token.ok_or_else(|| {
            PlatformError::Unauthorized("No refresh token stored for X".to_string())
        })?;

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.expose_secret().to_string()),
        ];
        if let Some(client_id) = &self.client_id {
            form.push(("client_id", client_id.clone()));
        }

        let mut request = self.client.post(&self.token_url).form(&form);
        if let (Some(client_id), Some(secret)) = (&self.client_id, &self.client_secret) {
            request = request.basic_auth(client_id, Some(secret.expose_secret()));
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let body = read_json(response).await?;
        token_set_from_json(&body)
    }

    async fn create_container(
        &self,
        _auth: &AuthContext,
        payload: &PostPayload,
    ) -> AdapterResult<String> {
        Self::validate(payload)?;

        let id = uuid::Uuid::new_v4().to_string();
        self.staged
            .lock()
            .map_err(|_| PlatformError::InvalidResponse("staging area poisoned".to_string()))?
            .insert(id.clone(), payload.clone());

        tracing::debug!(container_id = %id, "Staged tweet");
        Ok(id)
    }

    async fn publish_container(
        &self,
        auth: &AuthContext,
        container_id: &str,
    ) -> AdapterResult<PublishedPost> {
        let payload = self
            .staged
            .lock()
            .map_err(|_| PlatformError::InvalidResponse("staging area poisoned".to_string()))?
            .get(container_id)
            .cloned()
            .ok_or_else(|| PlatformError::Rejected {
                status: 404,
                message: format!("Unknown container '{}'", container_id),
            })?;

        let response = self
            .client
            .post(format!("{}/tweets", self.api_base))
            .bearer_auth(auth.access_token.expose_secret())
            .json(&Self::tweet_body(&payload))
            .send()
            .await
            .map_err(map_transport_error)?;

        let body = read_json(response).await?;
        let id = string_field(&body, "/data/id")?;

        if let Ok(mut staged) = self.staged.lock() {
            staged.remove(container_id);
        }

        Ok(PublishedPost { id, body })
    }

    async fn fetch_identity(&self, auth: &AuthContext) -> AdapterResult<Identity> {
        let response = self
            .client
            .get(format!("{}/users/me", self.api_base))
            .bearer_auth(auth.access_token.expose_secret())
            .send()
            .await
            .map_err(map_transport_error)?;

        let body = read_json(response).await?;
        let external_id = string_field(&body, "/data/id")?;
        let display_name = string_field(&body, "/data/username").unwrap_or_else(|_| external_id.clone());

        Ok(Identity {
            external_id,
            display_name,
        })
    }

    async fn discard_container(&self, container_id: &str) {
        if let Ok(mut staged) = self.staged.lock() {
            if staged.remove(container_id).is_some() {
                tracing::debug!(container_id, "Discarded staged tweet");
            }
        }
    }
}
