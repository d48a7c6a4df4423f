//! In-process signer authority for tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{RemoteSignerState, RemoteSignerStatus, SignedKeyRequest, SignerAuthority, SignerSubmission};
use crate::error::PlatformError;
use crate::platforms::AdapterResult;

/// Issues sequential tokens and reports whatever state the test sets
#[derive(Default)]
pub struct MockAuthority {
    submitted: Mutex<Vec<SignedKeyRequest>>,
    states: Mutex<HashMap<String, RemoteSignerState>>,
    submit_error: Mutex<Option<PlatformError>>,
    fetches: AtomicUsize,
}

impl MockAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following submission fail
    pub fn fail_submissions(&self, error: PlatformError) {
        if let Ok(mut slot) = self.submit_error.lock() {
            *slot = Some(error);
        }
    }

    pub fn set_state(&self, approval_token: &str, state: RemoteSignerState) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(approval_token.to_string(), state);
        }
    }

    pub fn submitted(&self) -> Vec<SignedKeyRequest> {
        self.submitted.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignerAuthority for MockAuthority {
    async fn submit_signed_key_request(
        &self,
        request: &SignedKeyRequest,
    ) -> AdapterResult<SignerSubmission> {
        if let Some(error) = self.submit_error.lock().ok().and_then(|e| e.clone()) {
            return Err(error);
        }

        let mut submitted = self
            .submitted
            .lock()
            .map_err(|_| PlatformError::Network("mock poisoned".to_string()))?;
        submitted.push(request.clone());
        let token = format!("skr-{}", submitted.len());

        Ok(SignerSubmission {
            approval_link: format!("farcaster://signed-key-request?token={}", token),
            approval_token: token,
        })
    }

    async fn fetch_signed_key_request(
        &self,
        approval_token: &str,
    ) -> AdapterResult<RemoteSignerStatus> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let state = self
            .states
            .lock()
            .ok()
            .and_then(|s| s.get(approval_token).copied())
            .unwrap_or(RemoteSignerState::Pending);

        Ok(RemoteSignerStatus {
            state,
            user_fid: None,
        })
    }
}
