//! Farcaster adapter
//!
//! The stored "access token" of a Farcaster account is the approved signer's
//! private key. Casts are built and signed locally during the create phase and
//! submitted to a hub during the publish phase as protobuf `Message` bytes:
//! the message hash is the first 20 bytes of the BLAKE3 digest of the encoded
//! `MessageData`, and the signer signs that hash with Ed25519.

use async_trait::async_trait;
use prost::Message as _;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{map_transport_error, read_json, string_field, Adapter, AdapterResult, AuthContext, PublishedPost};
use crate::clock::Clock;
use crate::config::{secret_from_env, FarcasterConfig};
use crate::error::PlatformError;
use crate::signer::SignerKeypair;
use crate::types::{Identity, Platform, PostPayload, TokenSet};

pub mod proto;

/// Farcaster timestamps count seconds from 2021-01-01T00:00:00Z
pub const FARCASTER_EPOCH: i64 = 1_609_459_200;

/// Cast text limit in bytes
pub const CAST_TEXT_LIMIT: usize = 320;

pub const CAST_EMBED_LIMIT: usize = 2;

/// Message hashes are truncated BLAKE3 digests
pub const MESSAGE_HASH_LEN: usize = 20;

pub struct FarcasterAdapter {
    client: reqwest::Client,
    api_base: String,
    hub_url: String,
    api_key: Option<SecretString>,
    clock: Arc<dyn Clock>,
    /// Encoded messages by `0x` hash
    staged: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl FarcasterAdapter {
    pub fn new(client: reqwest::Client, config: &FarcasterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            hub_url: config.hub_url.trim_end_matches('/').to_string(),
            api_key: secret_from_env(&config.api_key_env),
            clock,
            staged: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of signed casts waiting to be submitted
    pub fn staged_count(&self) -> usize {
        self.staged.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn parse_fid(auth: &AuthContext) -> AdapterResult<u64> {
        auth.external_id.trim().parse().map_err(|_| {
            PlatformError::Validation(format!("Invalid Farcaster fid '{}'", auth.external_id))
        })
    }

    fn validate(payload: &PostPayload) -> AdapterResult<()> {
        if payload.text.len() > CAST_TEXT_LIMIT {
            return Err(PlatformError::Validation(format!(
                "Casts are limited to {} bytes (got {})",
                CAST_TEXT_LIMIT,
                payload.text.len()
            )));
        }
        if payload.media_urls.len() > CAST_EMBED_LIMIT {
            return Err(PlatformError::Validation(format!(
                "Casts hold at most {} embeds",
                CAST_EMBED_LIMIT
            )));
        }
        if payload.text.trim().is_empty() && payload.media_urls.is_empty() {
            return Err(PlatformError::Validation("Cast cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Cast hash from its `0x` hex form
    fn parse_cast_hash(hash: &str) -> AdapterResult<Vec<u8>> {
        let raw = hash.trim();
        let bytes = hex::decode(raw.strip_prefix("0x").unwrap_or(raw))
            .map_err(|_| PlatformError::Validation(format!("Invalid cast hash '{}'", hash)))?;
        if bytes.len() != MESSAGE_HASH_LEN {
            return Err(PlatformError::Validation(format!(
                "Cast hashes are {} bytes (got {})",
                MESSAGE_HASH_LEN,
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Build and sign a `CastAdd` message. Returns the `0x` hash and the
    /// encoded message. A reply's parent is the account's own cast.
    fn build_cast(
        fid: u64,
        timestamp: i64,
        payload: &PostPayload,
        signer: &SignerKeypair,
    ) -> AdapterResult<(String, Vec<u8>)> {
        let parent = payload
            .reply_to
            .as_deref()
            .map(|hash| {
                Ok::<_, PlatformError>(proto::cast_add_body::Parent::ParentCastId(proto::CastId {
                    fid,
                    hash: Self::parse_cast_hash(hash)?,
                }))
            })
            .transpose()?;

        let body = proto::CastAddBody {
            text: payload.text.clone(),
            embeds: payload
                .media_urls
                .iter()
                .map(|url| proto::Embed {
                    embed: Some(proto::embed::Embed::Url(url.clone())),
                })
                .collect(),
            parent,
            ..Default::default()
        };

        let timestamp = u32::try_from(timestamp - FARCASTER_EPOCH).map_err(|_| {
            PlatformError::Validation("Clock is outside the Farcaster timestamp range".to_string())
        })?;
        let data = proto::MessageData {
            r#type: proto::MessageType::CastAdd as i32,
            fid,
            timestamp,
            network: proto::FarcasterNetwork::Mainnet as i32,
            body: Some(proto::message_data::Body::CastAddBody(body)),
        };
        let data_bytes = data.encode_to_vec();

        let digest = blake3::hash(&data_bytes);
        let hash = digest.as_bytes()[..MESSAGE_HASH_LEN].to_vec();
        let signature = signer.sign(&hash);

        let message = proto::Message {
            data: None,
            hash: hash.clone(),
            hash_scheme: proto::HashScheme::Blake3 as i32,
            signature: signature.to_vec(),
            signature_scheme: proto::SignatureScheme::Ed25519 as i32,
            signer: signer.public_key_bytes().to_vec(),
            data_bytes: Some(data_bytes),
        };
        Ok((format!("0x{}", hex::encode(hash)), message.encode_to_vec()))
    }
}

#[async_trait]
impl Adapter for FarcasterAdapter {
    fn platform(&self) -> Platform {
        Platform::Farcaster
    }

    /// Signer keys do not rotate; the stored key is handed back unchanged
    async fn refresh(
        &self,
        auth: &AuthContext,
        _refresh_token: Option<&SecretString>,
    ) -> AdapterResult<TokenSet> {
        Ok(TokenSet::new(auth.access_token.expose_secret()))
    }

    async fn create_container(
        &self,
        auth: &AuthContext,
        payload: &PostPayload,
    ) -> AdapterResult<String> {
        Self::validate(payload)?;
        let fid = Self::parse_fid(auth)?;
        let signer = SignerKeypair::from_hex(auth.access_token.expose_secret())
            .map_err(|_| PlatformError::Unauthorized("Stored signer key is invalid".to_string()))?;

        let (hash, message) = Self::build_cast(fid, self.clock.now(), payload, &signer)?;
        self.staged
            .lock()
            .map_err(|_| PlatformError::InvalidResponse("staging area poisoned".to_string()))?
            .insert(hash.clone(), message);

        tracing::debug!(fid, cast_hash = %hash, "Signed cast");
        Ok(hash)
    }

    async fn publish_container(
        &self,
        _auth: &AuthContext,
        container_id: &str,
    ) -> AdapterResult<PublishedPost> {
        let message = self
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
            .post(format!("{}/v1/submitMessage", self.hub_url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(message)
            .send()
            .await
            .map_err(map_transport_error)?;

        let body = read_json(response).await?;
        let id = string_field(&body, "/hash").unwrap_or_else(|_| container_id.to_string());

        if let Ok(mut staged) = self.staged.lock() {
            staged.remove(container_id);
        }

        Ok(PublishedPost { id, body })
    }

    async fn fetch_identity(&self, auth: &AuthContext) -> AdapterResult<Identity> {
        let fid = Self::parse_fid(auth)?;
        let mut request = self
            .client
            .get(format!("{}/v2/user-by-fid", self.api_base))
            .query(&[("fid", fid)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let body = read_json(response).await?;
        let display_name = string_field(&body, "/result/user/username")
            .or_else(|_| string_field(&body, "/result/user/displayName"))
            .unwrap_or_else(|_| format!("fid:{}", fid));

        Ok(Identity {
            external_id: fid.to_string(),
            display_name,
        })
    }

    async fn discard_container(&self, container_id: &str) {
        if let Ok(mut staged) = self.staged.lock() {
            if staged.remove(container_id).is_some() {
                tracing::debug!(cast_hash = container_id, "Discarded signed cast");
            }
        }
    }
}
