//! Scriptable adapter for tests
//!
//! Each operation pops its next result from a queue and falls back to a
//! success when the queue is empty. Every call is counted and the payloads
//! and tokens it saw are recorded, so tests can assert on exactly what the
//! pipeline sent.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Adapter, AdapterResult, AuthContext, PublishedPost};
use crate::error::PlatformError;
use crate::types::{Identity, Platform, PostPayload, TokenSet};

#[derive(Default)]
struct Script {
    refresh: VecDeque<AdapterResult<TokenSet>>,
    create: VecDeque<AdapterResult<String>>,
    publish: VecDeque<AdapterResult<PublishedPost>>,
    identity: VecDeque<AdapterResult<Identity>>,
}

/// Call counters, shareable with the test after the adapter is boxed
#[derive(Debug, Default)]
pub struct MockCalls {
    pub refresh: AtomicUsize,
    pub create: AtomicUsize,
    pub publish: AtomicUsize,
    pub identity: AtomicUsize,
    pub discard: AtomicUsize,
}

impl MockCalls {
    pub fn refresh_count(&self) -> usize {
        self.refresh.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.create.load(Ordering::SeqCst)
    }

    pub fn publish_count(&self) -> usize {
        self.publish.load(Ordering::SeqCst)
    }

    pub fn identity_count(&self) -> usize {
        self.identity.load(Ordering::SeqCst)
    }

    pub fn discard_count(&self) -> usize {
        self.discard.load(Ordering::SeqCst)
    }
}

pub struct MockAdapter {
    platform: Platform,
    script: Mutex<Script>,
    calls: Arc<MockCalls>,
    payloads: Mutex<Vec<PostPayload>>,
    tokens_seen: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl MockAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            script: Mutex::new(Script::default()),
            calls: Arc::new(MockCalls::default()),
            payloads: Mutex::new(Vec::new()),
            tokens_seen: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn calls(&self) -> Arc<MockCalls> {
        self.calls.clone()
    }

    pub fn push_refresh(&self, result: AdapterResult<TokenSet>) -> &Self {
        if let Ok(mut script) = self.script.lock() {
            script.refresh.push_back(result);
        }
        self
    }

    pub fn push_create(&self, result: AdapterResult<String>) -> &Self {
        if let Ok(mut script) = self.script.lock() {
            script.create.push_back(result);
        }
        self
    }

    pub fn push_publish(&self, result: AdapterResult<PublishedPost>) -> &Self {
        if let Ok(mut script) = self.script.lock() {
            script.publish.push_back(result);
        }
        self
    }

    /// Queue `count` copies of the same publish failure
    pub fn fail_publish(&self, count: usize, error: PlatformError) -> &Self {
        for _ in 0..count {
            self.push_publish(Err(error.clone()));
        }
        self
    }

    pub fn push_identity(&self, result: AdapterResult<Identity>) -> &Self {
        if let Ok(mut script) = self.script.lock() {
            script.identity.push_back(result);
        }
        self
    }

    /// Payloads passed to `create_container`, in call order
    pub fn payloads(&self) -> Vec<PostPayload> {
        self.payloads.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Access tokens presented on every call, in call order
    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn record_token(&self, auth: &AuthContext) {
        if let Ok(mut tokens) = self.tokens_seen.lock() {
            tokens.push(auth.access_token.expose_secret().to_string());
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// A published response the way the mock reports it
pub fn published(id: &str) -> PublishedPost {
    PublishedPost {
        id: id.to_string(),
        body: serde_json::json!({ "id": id }),
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn refresh(
        &self,
        auth: &AuthContext,
        _refresh_token: Option<&SecretString>,
    ) -> AdapterResult<TokenSet> {
        self.calls.refresh.fetch_add(1, Ordering::SeqCst);
        self.record_token(auth);
        let scripted = self.script.lock().ok().and_then(|mut s| s.refresh.pop_front());
        scripted.unwrap_or_else(|| {
            Ok(TokenSet::new(self.next_id("access"))
                .with_refresh_token(self.next_id("refresh"))
                .with_expires_in(3600))
        })
    }

    async fn create_container(
        &self,
        auth: &AuthContext,
        payload: &PostPayload,
    ) -> AdapterResult<String> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        self.record_token(auth);
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.push(payload.clone());
        }
        let scripted = self.script.lock().ok().and_then(|mut s| s.create.pop_front());
        scripted.unwrap_or_else(|| Ok(self.next_id("container")))
    }

    async fn publish_container(
        &self,
        auth: &AuthContext,
        container_id: &str,
    ) -> AdapterResult<PublishedPost> {
        self.calls.publish.fetch_add(1, Ordering::SeqCst);
        self.record_token(auth);
        let scripted = self.script.lock().ok().and_then(|mut s| s.publish.pop_front());
        scripted.unwrap_or_else(|| Ok(published(&format!("post-{}", container_id))))
    }

    async fn fetch_identity(&self, auth: &AuthContext) -> AdapterResult<Identity> {
        self.calls.identity.fetch_add(1, Ordering::SeqCst);
        self.record_token(auth);
        let scripted = self.script.lock().ok().and_then(|mut s| s.identity.pop_front());
        scripted.unwrap_or_else(|| {
            Ok(Identity {
                external_id: auth.external_id.clone(),
                display_name: format!("mock_{}", auth.external_id),
            })
        })
    }

    async fn discard_container(&self, _container_id: &str) {
        self.calls.discard.fetch_add(1, Ordering::SeqCst);
    }
}
