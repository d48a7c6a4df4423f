//! Adapters and the signer authority client against local HTTP servers
//!
//! Each test starts an axum server on an ephemeral port that imitates the
//! platform endpoints the adapter talks to, records what it received, and
//! answers with scripted statuses.

use axum::body::Bytes;
use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ed25519_dalek::Verifier;
use prost::Message as _;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use libthreadcast::accounts::AccountSelector;
use libthreadcast::clock::FixedClock;
use libthreadcast::config::{FarcasterConfig, ThreadsConfig, XConfig};
use libthreadcast::crypto::TokenCipher;
use libthreadcast::db::Database;
use libthreadcast::platforms::farcaster::{proto, FarcasterAdapter, FARCASTER_EPOCH};
use libthreadcast::platforms::threads::ThreadsAdapter;
use libthreadcast::platforms::x::XAdapter;
use libthreadcast::platforms::{Adapter, AdapterRegistry, AuthContext};
use libthreadcast::publish::{PublishPipeline, RecordingDelay, RetryPolicy};
use libthreadcast::refresh::TokenRefreshManager;
use libthreadcast::signer::custody::recover_custody_key;
use libthreadcast::signer::{CustodySigner, HttpSignerAuthority, SignerKeypair, SignerWorkflow};
use libthreadcast::types::{Identity, Platform, PostPayload, SignerState, TokenSet};
use libthreadcast::{PlatformError, ThreadcastError};

const NOW: i64 = 1_700_000_000;

type Fields = HashMap<String, String>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn error_response(status: u16, message: &str) -> Response {
    (
        StatusCode::from_u16(status).unwrap(),
        Json(json!({ "error": { "message": message } })),
    )
        .into_response()
}

fn auth(external_id: &str, token: &str) -> AuthContext {
    AuthContext::new(external_id, SecretString::from(token.to_string()))
}

async fn selector(temp: &TempDir) -> AccountSelector {
    let db_path = temp.path().join("http.db");
    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
    AccountSelector::new(db, TokenCipher::generate(), Arc::new(FixedClock::new(NOW)))
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ThreadsApi {
    containers: Mutex<Vec<Fields>>,
    publishes: Mutex<Vec<Fields>>,
    publish_failures: Mutex<VecDeque<u16>>,
}

impl ThreadsApi {
    fn fail_publish(&self, statuses: &[u16]) {
        self.publish_failures.lock().unwrap().extend(statuses);
    }

    fn containers(&self) -> Vec<Fields> {
        self.containers.lock().unwrap().clone()
    }

    fn publishes(&self) -> Vec<Fields> {
        self.publishes.lock().unwrap().clone()
    }
}

async fn threads_create(State(api): State<Arc<ThreadsApi>>, Form(form): Form<Fields>) -> Json<Value> {
    let mut containers = api.containers.lock().unwrap();
    containers.push(form);
    Json(json!({ "id": format!("c-{}", containers.len()) }))
}

async fn threads_publish(State(api): State<Arc<ThreadsApi>>, Form(form): Form<Fields>) -> Response {
    let attempt = {
        let mut publishes = api.publishes.lock().unwrap();
        publishes.push(form);
        publishes.len()
    };
    if let Some(status) = api.publish_failures.lock().unwrap().pop_front() {
        return error_response(status, "Media not ready");
    }
    Json(json!({ "id": format!("p-{}", attempt) })).into_response()
}

async fn threads_refresh(Query(query): Query<Fields>) -> Response {
    if query.get("grant_type").map(String::as_str) != Some("th_refresh_token") {
        return error_response(400, "unsupported grant_type");
    }
    let token = query.get("access_token").cloned().unwrap_or_default();
    if token == "revoked" {
        return error_response(401, "Session has been invalidated");
    }
    Json(json!({
        "access_token": format!("refreshed-{}", token),
        "token_type": "bearer",
        "expires_in": 5_184_000,
    }))
    .into_response()
}

async fn threads_me(Query(query): Query<Fields>) -> Response {
    if query.get("access_token").map(String::as_str) == Some("revoked") {
        return error_response(401, "Invalid OAuth access token");
    }
    Json(json!({ "id": "1789", "username": "threads_user" })).into_response()
}

async fn threads_server() -> (Arc<ThreadsApi>, ThreadsAdapter) {
    let api = Arc::new(ThreadsApi::default());
    let app = Router::new()
        .route("/me/threads", post(threads_create))
        .route("/1789/threads_publish", post(threads_publish))
        .route("/refresh_access_token", get(threads_refresh))
        .route("/me", get(threads_me))
        .with_state(api.clone());
    let base = serve(app).await;
    let adapter = ThreadsAdapter::new(reqwest::Client::new(), &ThreadsConfig { api_base: base });
    (api, adapter)
}

#[tokio::test]
async fn test_threads_text_post() {
    let (api, adapter) = threads_server().await;
    let auth = auth("1789", "tok");
    let payload = PostPayload {
        text: "hello threads".to_string(),
        reply_to: Some("p-0".to_string()),
        ..Default::default()
    };

    let container = adapter.create_container(&auth, &payload).await.unwrap();
    assert_eq!(container, "c-1");
    let post = adapter.publish_container(&auth, &container).await.unwrap();
    assert_eq!(post.id, "p-1");
    assert_eq!(post.body["id"], "p-1");

    let created = &api.containers()[0];
    assert_eq!(created["media_type"], "TEXT");
    assert_eq!(created["text"], "hello threads");
    assert_eq!(created["reply_to_id"], "p-0");
    assert_eq!(created["access_token"], "tok");
    assert_eq!(api.publishes()[0]["creation_id"], "c-1");
}

#[tokio::test]
async fn test_threads_carousel_creates_children_first() {
    let (api, adapter) = threads_server().await;
    let payload = PostPayload {
        text: "two pictures".to_string(),
        media_urls: vec![
            "https://cdn.invalid/a.jpg".to_string(),
            "https://cdn.invalid/b.jpg".to_string(),
        ],
        reply_to: None,
    };

    let container = adapter
        .create_container(&auth("1789", "tok"), &payload)
        .await
        .unwrap();
    assert_eq!(container, "c-3");

    let containers = api.containers();
    assert_eq!(containers.len(), 3);
    assert_eq!(containers[0]["is_carousel_item"], "true");
    assert_eq!(containers[1]["image_url"], "https://cdn.invalid/b.jpg");
    assert_eq!(containers[2]["media_type"], "CAROUSEL");
    assert_eq!(containers[2]["children"], "c-1,c-2");
}

#[tokio::test]
async fn test_threads_status_mapping() {
    let (api, adapter) = threads_server().await;
    let auth = auth("1789", "tok");
    api.fail_publish(&[401, 429, 400, 503]);

    let unauthorized = adapter.publish_container(&auth, "c-1").await.unwrap_err();
    assert!(matches!(unauthorized, PlatformError::Unauthorized(_)));

    let rate_limited = adapter.publish_container(&auth, "c-1").await.unwrap_err();
    assert!(matches!(rate_limited, PlatformError::RateLimit(_)));

    let rejected = adapter.publish_container(&auth, "c-1").await.unwrap_err();
    assert_eq!(
        rejected,
        PlatformError::Rejected {
            status: 400,
            message: "Media not ready".to_string()
        }
    );

    let unavailable = adapter.publish_container(&auth, "c-1").await.unwrap_err();
    assert!(matches!(unavailable, PlatformError::Network(_)));
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let app = Router::new().route("/1789/threads_publish", post(|| async { "<html>oops</html>" }));
    let base = serve(app).await;
    let adapter = ThreadsAdapter::new(reqwest::Client::new(), &ThreadsConfig { api_base: base });

    let err = adapter
        .publish_container(&auth("1789", "tok"), "c-1")
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_unreachable_host_is_network_error() {
    let adapter = ThreadsAdapter::new(
        reqwest::Client::new(),
        &ThreadsConfig {
            api_base: "http://127.0.0.1:9".to_string(),
        },
    );
    let err = adapter.fetch_identity(&auth("1789", "tok")).await.unwrap_err();
    assert!(matches!(err, PlatformError::Network(_)));
}

#[tokio::test]
async fn test_threads_identity_and_refresh() {
    let (_api, adapter) = threads_server().await;

    let identity = adapter.fetch_identity(&auth("me", "tok")).await.unwrap();
    assert_eq!(identity.external_id, "1789");
    assert_eq!(identity.display_name, "threads_user");

    let tokens = adapter.refresh(&auth("1789", "tok"), None).await.unwrap();
    assert_eq!(tokens.access_token.expose_secret(), "refreshed-tok");
    assert_eq!(tokens.expires_in, Some(5_184_000));
    assert!(tokens.refresh_token.is_none());

    assert!(matches!(
        adapter.fetch_identity(&auth("me", "revoked")).await,
        Err(PlatformError::Unauthorized(_))
    ));
}

async fn threads_pipeline(
    temp: &TempDir,
    tokens: TokenSet,
) -> (
    Arc<ThreadsApi>,
    AccountSelector,
    PublishPipeline,
    Arc<RecordingDelay>,
    libthreadcast::ExternalAccount,
) {
    let (api, adapter) = threads_server().await;
    let selector = selector(temp).await;
    let account = selector
        .link_account(
            "alice",
            Platform::Threads,
            &Identity {
                external_id: "1789".to_string(),
                display_name: "threads_user".to_string(),
            },
            &tokens,
        )
        .await
        .unwrap();

    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(adapter));
    let refresh = Arc::new(TokenRefreshManager::new(selector.clone(), registry.clone(), 60));
    let delay = Arc::new(RecordingDelay::new());
    let pipeline = PublishPipeline::new(refresh, registry, RetryPolicy::default(), delay.clone());

    (api, selector, pipeline, delay, account)
}

#[tokio::test]
async fn test_pipeline_retries_over_http() {
    let temp = TempDir::new().unwrap();
    let (api, _selector, pipeline, delay, account) =
        threads_pipeline(&temp, TokenSet::new("tok").with_expires_in(86_400)).await;
    api.fail_publish(&[400, 400]);

    let outcome = pipeline
        .publish(&account, PostPayload::text("eventually"))
        .await
        .unwrap();

    assert_eq!(outcome.post.id, "p-3");
    assert_eq!(outcome.job.attempts, 3);
    assert_eq!(api.containers().len(), 1);
    assert_eq!(api.publishes().len(), 3);
    assert_eq!(delay.waits().len(), 2);
}

#[tokio::test]
async fn test_pipeline_forbidden_publish_is_not_a_credential_failure() {
    let temp = TempDir::new().unwrap();
    let (api, selector, pipeline, delay, account) =
        threads_pipeline(&temp, TokenSet::new("tok").with_expires_in(86_400)).await;
    api.fail_publish(&[403]);

    let outcome = pipeline
        .publish(&account, PostPayload::text("second try"))
        .await
        .unwrap();

    assert_eq!(outcome.job.attempts, 2);
    assert_eq!(delay.waits().len(), 1);
    let account = selector
        .require_selected_account("alice", Platform::Threads)
        .await
        .unwrap();
    assert!(account.is_active);
}

#[tokio::test]
async fn test_pipeline_refreshes_expired_token_before_create() {
    let temp = TempDir::new().unwrap();
    let (api, selector, pipeline, _delay, account) = threads_pipeline(
        &temp,
        TokenSet::new("old")
            .with_refresh_token("old")
            .with_expires_in(-10),
    )
    .await;

    let outcome = pipeline
        .publish(&account, PostPayload::text("fresh token"))
        .await
        .unwrap();

    assert_eq!(api.containers()[0]["access_token"], "refreshed-old");
    assert_eq!(outcome.account.token_expiry, Some(NOW + 5_184_000));

    let token = selector
        .get_selected_access_token("alice", Platform::Threads)
        .await
        .unwrap();
    assert_eq!(token.expose_secret(), "refreshed-old");
}

#[tokio::test]
async fn test_pipeline_unauthorized_over_http() {
    let temp = TempDir::new().unwrap();
    let (api, selector, pipeline, _delay, account) =
        threads_pipeline(&temp, TokenSet::new("tok").with_expires_in(86_400)).await;
    api.fail_publish(&[500, 401]);

    let err = pipeline
        .publish(&account, PostPayload::text("doomed"))
        .await
        .unwrap_err();

    assert!(matches!(err, ThreadcastError::Unauthorized { .. }));
    assert_eq!(api.publishes().len(), 2);
    assert!(selector
        .get_selected_account("alice", Platform::Threads)
        .await
        .is_none());
}

// ---------------------------------------------------------------------------
// X
// ---------------------------------------------------------------------------

#[derive(Default)]
struct XApi {
    token_requests: Mutex<Vec<Fields>>,
    tweets: Mutex<Vec<(Option<String>, Value)>>,
}

async fn x_token(State(api): State<Arc<XApi>>, Form(form): Form<Fields>) -> Json<Value> {
    api.token_requests.lock().unwrap().push(form);
    Json(json!({
        "token_type": "bearer",
        "access_token": "x-access-2",
        "refresh_token": "x-refresh-2",
        "expires_in": 7200,
        "scope": "tweet.write users.read offline.access",
    }))
}

async fn x_tweet(
    State(api): State<Arc<XApi>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    if authorization.as_deref() == Some("Bearer expired") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "title": "Unauthorized", "detail": "Unauthorized", "status": 401 })),
        )
            .into_response();
    }
    let text = body["text"].clone();
    api.tweets.lock().unwrap().push((authorization, body));
    (
        StatusCode::CREATED,
        Json(json!({ "data": { "id": "1850", "text": text } })),
    )
        .into_response()
}

async fn x_me() -> Json<Value> {
    Json(json!({ "data": { "id": "42", "name": "Forty Two", "username": "forty_two" } }))
}

async fn x_server() -> (Arc<XApi>, XAdapter) {
    let api = Arc::new(XApi::default());
    let app = Router::new()
        .route("/oauth2/token", post(x_token))
        .route("/tweets", post(x_tweet))
        .route("/users/me", get(x_me))
        .with_state(api.clone());
    let base = serve(app).await;
    let adapter = XAdapter::new(
        reqwest::Client::new(),
        &XConfig {
            api_base: base.clone(),
            token_url: format!("{}/oauth2/token", base),
            client_id: Some("client-123".to_string()),
            client_secret_env: "THREADCAST_TEST_X_SECRET_UNSET".to_string(),
        },
    );
    (api, adapter)
}

#[tokio::test]
async fn test_x_refresh_rotates_both_tokens() {
    let (api, adapter) = x_server().await;
    let refresh = SecretString::from("x-refresh-1".to_string());

    let tokens = adapter
        .refresh(&auth("42", "x-access-1"), Some(&refresh))
        .await
        .unwrap();

    assert_eq!(tokens.access_token.expose_secret(), "x-access-2");
    assert_eq!(
        tokens.refresh_token.as_ref().map(|t| t.expose_secret().to_string()),
        Some("x-refresh-2".to_string())
    );
    assert_eq!(tokens.expires_in, Some(7200));

    let sent = &api.token_requests.lock().unwrap()[0];
    assert_eq!(sent["grant_type"], "refresh_token");
    assert_eq!(sent["refresh_token"], "x-refresh-1");
    assert_eq!(sent["client_id"], "client-123");
}

#[tokio::test]
async fn test_x_publish_sends_staged_reply() {
    let (api, adapter) = x_server().await;
    let auth = auth("42", "x-access-1");
    let payload = PostPayload {
        text: "part two".to_string(),
        reply_to: Some("1849".to_string()),
        ..Default::default()
    };

    let staged = adapter.create_container(&auth, &payload).await.unwrap();
    assert_eq!(adapter.staged_count(), 1);
    let post = adapter.publish_container(&auth, &staged).await.unwrap();

    assert_eq!(post.id, "1850");
    assert_eq!(adapter.staged_count(), 0);
    let tweets = api.tweets.lock().unwrap();
    assert_eq!(tweets[0].0.as_deref(), Some("Bearer x-access-1"));
    assert_eq!(tweets[0].1["reply"]["in_reply_to_tweet_id"], "1849");
}

#[tokio::test]
async fn test_x_expired_token_keeps_staged_post() {
    let (_api, adapter) = x_server().await;
    let staged = adapter
        .create_container(&auth("42", "expired"), &PostPayload::text("hi"))
        .await
        .unwrap();

    let err = adapter
        .publish_container(&auth("42", "expired"), &staged)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(adapter.staged_count(), 1);
}

#[tokio::test]
async fn test_pipeline_discards_staged_tweet_on_failure() {
    let temp = TempDir::new().unwrap();
    let (_api, adapter) = x_server().await;
    let adapter = Arc::new(adapter);
    let selector = selector(&temp).await;
    let account = selector
        .link_account(
            "alice",
            Platform::X,
            &Identity {
                external_id: "42".to_string(),
                display_name: "forty_two".to_string(),
            },
            &TokenSet::new("expired").with_expires_in(7200),
        )
        .await
        .unwrap();

    let mut registry = AdapterRegistry::new();
    registry.register(adapter.clone());
    let refresh = Arc::new(TokenRefreshManager::new(selector.clone(), registry.clone(), 60));
    let pipeline = PublishPipeline::new(
        refresh,
        registry,
        RetryPolicy::default(),
        Arc::new(RecordingDelay::new()),
    );

    let err = pipeline
        .publish(&account, PostPayload::text("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ThreadcastError::Unauthorized { .. }));
    assert_eq!(adapter.staged_count(), 0);
}

#[tokio::test]
async fn test_x_identity() {
    let (_api, adapter) = x_server().await;
    let identity = adapter.fetch_identity(&auth("", "x-access-1")).await.unwrap();
    assert_eq!(identity.external_id, "42");
    assert_eq!(identity.display_name, "forty_two");
}

// ---------------------------------------------------------------------------
// Farcaster
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Hub {
    messages: Mutex<Vec<proto::Message>>,
    signer_requests: Mutex<Vec<Value>>,
}

async fn hub_submit(State(hub): State<Arc<Hub>>, headers: HeaderMap, body: Bytes) -> Response {
    if headers.get("content-type").and_then(|v| v.to_str().ok()) != Some("application/octet-stream") {
        return error_response(415, "expected protobuf bytes");
    }
    let Ok(message) = proto::Message::decode(body) else {
        return error_response(400, "invalid message");
    };
    let hash = format!("0x{}", hex::encode(&message.hash));
    hub.messages.lock().unwrap().push(message);
    Json(json!({ "hash": hash, "signatureScheme": "SIGNATURE_SCHEME_ED25519" })).into_response()
}

async fn user_by_fid(Query(query): Query<Fields>) -> Json<Value> {
    let fid: u64 = query.get("fid").and_then(|f| f.parse().ok()).unwrap_or(0);
    Json(json!({ "result": { "user": { "fid": fid, "username": "caster" } } }))
}

async fn submit_signer_request(State(hub): State<Arc<Hub>>, Json(body): Json<Value>) -> Response {
    if body["signature"].as_str().map(|s| s.len()) != Some(132) {
        return error_response(400, "invalid signature");
    }
    let token = {
        let mut requests = hub.signer_requests.lock().unwrap();
        requests.push(body);
        format!("skr-{}", requests.len())
    };
    Json(json!({
        "result": {
            "signedKeyRequest": {
                "token": token,
                "deeplinkUrl": format!("farcaster://signed-key-request?token={}", token),
                "state": "pending",
            }
        }
    }))
    .into_response()
}

async fn fetch_signer_request(Query(query): Query<Fields>) -> Json<Value> {
    let token = query.get("token").cloned().unwrap_or_default();
    let state = if token == "skr-1" { "completed" } else { "pending" };
    Json(json!({
        "result": { "signedKeyRequest": { "token": token, "state": state, "userFid": 4821 } }
    }))
}

async fn farcaster_server() -> (Arc<Hub>, String) {
    let hub = Arc::new(Hub::default());
    let app = Router::new()
        .route("/v1/submitMessage", post(hub_submit))
        .route("/v2/user-by-fid", get(user_by_fid))
        .route("/v2/signed-key-requests", post(submit_signer_request))
        .route("/v2/signed-key-request", get(fetch_signer_request))
        .with_state(hub.clone());
    (hub, serve(app).await)
}

fn farcaster_config(base: &str) -> FarcasterConfig {
    FarcasterConfig {
        api_base: base.to_string(),
        hub_url: base.to_string(),
        app_fid: Some(9152),
        custody_key_env: "THREADCAST_TEST_CUSTODY_UNSET".to_string(),
        api_key_env: "THREADCAST_TEST_FARCASTER_KEY_UNSET".to_string(),
    }
}

#[tokio::test]
async fn test_farcaster_cast_reaches_hub() {
    let (hub, base) = farcaster_server().await;
    let adapter = FarcasterAdapter::new(
        reqwest::Client::new(),
        &farcaster_config(&base),
        Arc::new(FixedClock::new(NOW)),
    );
    let signer = SignerKeypair::generate();
    let auth = auth("4821", signer.secret_hex().as_str());

    let hash = adapter
        .create_container(&auth, &PostPayload::text("gm from the terminal"))
        .await
        .unwrap();
    let post = adapter.publish_container(&auth, &hash).await.unwrap();

    assert_eq!(post.id, hash);
    assert_eq!(adapter.staged_count(), 0);
    {
        let messages = hub.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.signer, signer.public_key_bytes().to_vec());

        let data_bytes = message.data_bytes.as_deref().unwrap();
        let digest = blake3::hash(data_bytes);
        assert_eq!(message.hash, digest.as_bytes()[..20].to_vec());
        let signature = ed25519_dalek::Signature::from_slice(&message.signature).unwrap();
        assert!(signer.verifying_key().verify(&message.hash, &signature).is_ok());

        let data = proto::MessageData::decode(data_bytes).unwrap();
        assert_eq!(data.fid, 4821);
        assert_eq!(data.timestamp as i64, NOW - FARCASTER_EPOCH);
        match data.body {
            Some(proto::message_data::Body::CastAddBody(body)) => {
                assert_eq!(body.text, "gm from the terminal");
                assert!(body.parent.is_none());
            }
            None => panic!("cast body missing"),
        }
    }

    // The reply points at the first cast by hash
    let reply = PostPayload {
        text: "and a reply".to_string(),
        reply_to: Some(post.id.clone()),
        ..Default::default()
    };
    let reply_hash = adapter.create_container(&auth, &reply).await.unwrap();
    adapter.publish_container(&auth, &reply_hash).await.unwrap();
    {
        let messages = hub.messages.lock().unwrap();
        let data = proto::MessageData::decode(messages[1].data_bytes.as_deref().unwrap()).unwrap();
        let Some(proto::message_data::Body::CastAddBody(body)) = data.body else {
            panic!("cast body missing");
        };
        assert_eq!(
            body.parent,
            Some(proto::cast_add_body::Parent::ParentCastId(proto::CastId {
                fid: 4821,
                hash: hex::decode(hash.trim_start_matches("0x")).unwrap(),
            }))
        );
    }

    let identity = adapter.fetch_identity(&auth).await.unwrap();
    assert_eq!(identity.display_name, "caster");
}

#[tokio::test]
async fn test_signer_workflow_over_http() {
    let (hub, base) = farcaster_server().await;
    let temp = TempDir::new().unwrap();
    let selector = selector(&temp).await;

    let custody = CustodySigner::generate();
    let custody_key = custody.verifying_key();
    let authority = Arc::new(HttpSignerAuthority::new(reqwest::Client::new(), &base, None));
    let workflow = SignerWorkflow::new(selector.clone(), authority, custody, 9152, 86_400);

    let request = workflow.start("alice", "4821").await.unwrap();
    assert_eq!(request.approval_token, "skr-1");
    assert_eq!(request.state, SignerState::Pending);
    assert_eq!(request.expires_at, NOW + 86_400);
    assert!(request.approval_link.contains("skr-1"));

    {
        let submitted = &hub.signer_requests.lock().unwrap()[0];
        assert_eq!(submitted["requestFid"], 9152);
        assert_eq!(submitted["deadline"], NOW + 86_400);
        let key = hex::decode(submitted["key"].as_str().unwrap().trim_start_matches("0x")).unwrap();
        let recovered = recover_custody_key(
            9152,
            &key,
            NOW + 86_400,
            submitted["signature"].as_str().unwrap(),
        )
        .unwrap();
        assert_eq!(recovered, custody_key);
    }

    let approved = workflow.poll("alice", "skr-1").await.unwrap();
    assert_eq!(approved.state, SignerState::Approved);
    assert_eq!(approved.approved_at, Some(NOW));

    let account = selector
        .require_selected_account("alice", Platform::Farcaster)
        .await
        .unwrap();
    assert_eq!(account.external_id, "4821");
}

#[tokio::test]
async fn test_signer_rejection_is_signer_request_failed() {
    let app = Router::new().route(
        "/v2/signed-key-requests",
        post(|| async { error_response(403, "app fid is not allowed") }),
    );
    let base = serve(app).await;
    let temp = TempDir::new().unwrap();
    let selector = selector(&temp).await;
    let workflow = SignerWorkflow::new(
        selector.clone(),
        Arc::new(HttpSignerAuthority::new(reqwest::Client::new(), &base, None)),
        CustodySigner::generate(),
        9152,
        86_400,
    );

    let err = workflow.start("alice", "4821").await.unwrap_err();
    assert!(matches!(err, ThreadcastError::SignerRequestFailed(_)));
    assert!(workflow.status("alice", "4821").await.unwrap().is_none());
}
