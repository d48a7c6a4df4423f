//! Threads (Meta Graph API) adapter
//!
//! Publishing is two-phase on Threads: a media container is created under
//! `/me/threads` and becomes visible only after `/{user_id}/threads_publish`.
//! The container may need several seconds of server-side processing before
//! the publish call succeeds.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{
    map_transport_error, read_json, string_field, token_set_from_json, Adapter, AdapterResult,
    AuthContext, PublishedPost,
};
use crate::config::ThreadsConfig;
use crate::error::PlatformError;
use crate::types::{Identity, MediaType, Platform, PostPayload, TokenSet};

/// Threads rejects posts longer than this
pub const THREADS_TEXT_LIMIT: usize = 500;

/// Maximum carousel children
pub const THREADS_CAROUSEL_LIMIT: usize = 20;

pub struct ThreadsAdapter {
    client: reqwest::Client,
    api_base: String,
}

impl ThreadsAdapter {
    pub fn new(client: reqwest::Client, config: &ThreadsConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    fn validate(payload: &PostPayload) -> AdapterResult<()> {
        let length = payload.text.chars().count();
        if length > THREADS_TEXT_LIMIT {
            return Err(PlatformError::Validation(format!(
                "Threads posts are limited to {} characters (got {})",
                THREADS_TEXT_LIMIT, length
            )));
        }
        if payload.text.trim().is_empty() && payload.media_urls.is_empty() {
            return Err(PlatformError::Validation(
                "Threads posts need text or media".to_string(),
            ));
        }
        if payload.media_urls.len() > THREADS_CAROUSEL_LIMIT {
            return Err(PlatformError::Validation(format!(
                "Threads carousels hold at most {} items",
                THREADS_CAROUSEL_LIMIT
            )));
        }
        Ok(())
    }

    async fn post_container(&self, form: &[(&str, String)]) -> AdapterResult<String> {
        let response = self
            .client
            .post(format!("{}/me/threads", self.api_base))
            .form(form)
            .send()
            .await
            .map_err(map_transport_error)?;

        let body = read_json(response).await?;
        string_field(&body, "/id")
    }
}

#[async_trait]
impl Adapter for ThreadsAdapter {
    fn platform(&self) -> Platform {
        Platform::Threads
    }

    /// Threads has no separate refresh token: the long-lived access token
    /// itself is exchanged for a new one.
    async fn refresh(
        &self,
        auth: &AuthContext,
        refresh_token: Option<&SecretString>,
    ) -> AdapterResult<TokenSet> {
        let token = refresh_token.unwrap_or(&auth.access_token);
        let response = self
            .client
            .get(format!("{}/refresh_access_token", self.api_base))
            .query(&[
                ("grant_type", "th_refresh_token"),
                ("access_token", token.expose_secret()),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        let body = read_json(response).await?;
        token_set_from_json(&body)
    }

    async fn create_container(
        &self,
        auth: &AuthContext,
        payload: &PostPayload,
    ) -> AdapterResult<String> {
        Self::validate(payload)?;
        let token = auth.access_token.expose_secret().to_string();
        let media_type = payload.media_type();

        let mut form: Vec<(&str, String)> = vec![
            ("media_type", media_type.as_str().to_string()),
            ("text", payload.text.clone()),
            ("access_token", token.clone()),
        ];
        if let Some(reply_to) = &payload.reply_to {
            form.push(("reply_to_id", reply_to.clone()));
        }

        match media_type {
            MediaType::Text => {}
            MediaType::Image => {
                form.push(("image_url", payload.media_urls[0].clone()));
            }
            MediaType::Carousel => {
                let mut children = Vec::with_capacity(payload.media_urls.len());
                for url in &payload.media_urls {
                    let child = self
                        .post_container(&[
                            ("media_type", MediaType::Image.as_str().to_string()),
                            ("image_url", url.clone()),
                            ("is_carousel_item", "true".to_string()),
                            ("access_token", token.clone()),
                        ])
                        .await?;
                    children.push(child);
                }
                form.push(("children", children.join(",")));
            }
        }

        let id = self.post_container(&form).await?;
        tracing::debug!(container_id = %id, media_type = media_type.as_str(), "Created Threads container");
        Ok(id)
    }

    async fn publish_container(
        &self,
        auth: &AuthContext,
        container_id: &str,
    ) -> AdapterResult<PublishedPost> {
        let response = self
            .client
            .post(format!(
                "{}/{}/threads_publish",
                self.api_base, auth.external_id
            ))
            .form(&[
                ("creation_id", container_id),
                ("access_token", auth.access_token.expose_secret()),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        let body = read_json(response).await?;
        Ok(PublishedPost {
            id: string_field(&body, "/id")?,
            body,
        })
    }

    async fn fetch_identity(&self, auth: &AuthContext) -> AdapterResult<Identity> {
        let response = self
            .client
            .get(format!("{}/me", self.api_base))
            .query(&[
                ("fields", "id,username"),
                ("access_token", auth.access_token.expose_secret()),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        let body = read_json(response).await?;
        let external_id = string_field(&body, "/id")?;
        let display_name = body
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or(&external_id)
            .to_string();

        Ok(Identity {
            external_id,
            display_name,
        })
    }
}
