//! # Notification Dispatch
//!
//! Fire-and-forget push delivery keyed by the recipient's device token and
//! gated by presence.
//!
//! ```text
//!   notify(recipient) ──► users/{id}.status == "online" ? ──► skip
//!                                  │ offline
//!                                  ▼
//!                     notifications/{id}.token present ? ──► no: skip
//!                                  │ yes
//!                                  ▼
//!                   transport.send({ token, title, body, imageUrl })
//!                                  │
//!                       Delivered(result map) | Failed(reason)
//! ```
//!
//! Nothing here returns an error to the sender: every failure ends up in a
//! [`DispatchOutcome`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;

use crate::config::NotificationConfig;
use crate::error::{Error, Result};
use crate::identity::PresenceStatus;
use crate::remote::{paths, with_retry, RemoteStore, RetryPolicy, Source};

/// Payload handed to the push endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub token: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Device token record stored at `notifications/{userId}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenRecord {
    pub token: String,
    pub user_id: String,
}

/// Outcome of one dispatch
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The endpoint accepted the payload and returned this map
    Delivered(Map<String, Value>),
    /// Recipient is online, no push needed
    SkippedOnline,
    /// Recipient never registered a device
    SkippedNoToken,
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered(_))
    }
}

/// Delivery of a push payload to the outside world
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, payload: &PushPayload) -> Result<Map<String, Value>>;
}

// ============================================================================
// HTTP CALLABLE
// ============================================================================

/// Calls an HTTP callable function with `{"data": payload}` and returns the
/// `result` object of its response.
pub struct HttpCallable {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCallable {
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self::with_client(client, config.endpoint()))
    }

    /// Use a preconfigured client (proxy, TLS or timeout settings)
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PushTransport for HttpCallable {
    async fn send(&self, payload: &PushPayload) -> Result<Map<String, Value>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "data": payload }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::NotificationFailed(format!(
                "{} returned {}",
                self.endpoint, status
            )));
        }

        let body: Value = response.json().await?;
        match body.get("result") {
            Some(Value::Object(result)) => Ok(result.clone()),
            Some(Value::Null) | None => Ok(Map::new()),
            Some(other) => Ok(Map::from_iter([("value".to_string(), other.clone())])),
        }
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Presence-gated push dispatcher
#[derive(Clone)]
pub struct NotificationDispatcher {
    remote: Arc<dyn RemoteStore>,
    transport: Arc<dyn PushTransport>,
    policy: RetryPolicy,
}

impl NotificationDispatcher {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        transport: Arc<dyn PushTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            remote,
            transport,
            policy,
        }
    }

    /// Store `token` as the push target of `user_id`
    pub async fn register_token(&self, user_id: &str, token: &str) -> Result<()> {
        if user_id.is_empty() || token.is_empty() {
            return Err(Error::Validation("user id and token are required".into()));
        }
        let record = TokenRecord {
            token: token.to_string(),
            user_id: user_id.to_string(),
        };
        let body = serde_json::to_value(&record)?;
        let path = paths::notification(user_id);
        with_retry(&self.policy, "notifications.set", || self.remote.set(&path, body.clone())).await?;
        tracing::debug!(user_id, "Push token registered");
        Ok(())
    }

    /// Push to `recipient_id` unless they are online or have no token
    pub async fn notify(
        &self,
        recipient_id: &str,
        title: &str,
        body: &str,
        image_url: Option<&str>,
    ) -> DispatchOutcome {
        match self.is_online(recipient_id).await {
            Ok(true) => return DispatchOutcome::SkippedOnline,
            Ok(false) => {}
            Err(e) => return self.failed(recipient_id, e),
        }

        let token = match self.token_of(recipient_id).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!(recipient_id, "No push token, skipping");
                return DispatchOutcome::SkippedNoToken;
            }
            Err(e) => return self.failed(recipient_id, e),
        };

        let payload = PushPayload {
            token,
            title: title.to_string(),
            body: body.to_string(),
            image_url: image_url.map(str::to_string),
        };

        match self.transport.send(&payload).await {
            Ok(result) => {
                tracing::debug!(recipient_id, "Push delivered");
                DispatchOutcome::Delivered(result)
            }
            Err(e) => self.failed(recipient_id, e),
        }
    }

    /// [`notify`](Self::notify) on a background task
    pub fn dispatch(
        &self,
        recipient_id: &str,
        title: &str,
        body: &str,
        image_url: Option<&str>,
    ) -> JoinHandle<DispatchOutcome> {
        let dispatcher = self.clone();
        let recipient_id = recipient_id.to_string();
        let title = title.to_string();
        let body = body.to_string();
        let image_url = image_url.map(str::to_string);

        tokio::spawn(async move {
            dispatcher
                .notify(&recipient_id, &title, &body, image_url.as_deref())
                .await
        })
    }

    /// Presence read for the push gate. Unlike
    /// [`ProfileRepository::is_online`](crate::profile::ProfileRepository::is_online),
    /// which shows `false` to the UI when the read fails, a failed read here
    /// must end the dispatch as [`DispatchOutcome::Failed`]: treating it as
    /// offline would push to a user who may be looking at the chat.
    async fn is_online(&self, user_id: &str) -> Result<bool> {
        let path = paths::user(user_id);
        let doc = with_retry(&self.policy, "users.get", || self.remote.get(&path, Source::Default))
            .await?;
        let online = PresenceStatus::Online.as_str();
        Ok(doc
            .and_then(|doc| doc.field("status").and_then(|v| v.as_str()).map(|s| s == online))
            .unwrap_or(false))
    }

    async fn token_of(&self, user_id: &str) -> Result<Option<String>> {
        let path = paths::notification(user_id);
        let doc = with_retry(&self.policy, "notifications.get", || {
            self.remote.get(&path, Source::Default)
        })
        .await?;

        let Some(doc) = doc else {
            return Ok(None);
        };
        let record: TokenRecord = doc.decode()?;
        Ok(Some(record.token).filter(|t| !t.is_empty()))
    }

    fn failed(&self, recipient_id: &str, err: Error) -> DispatchOutcome {
        tracing::warn!(recipient_id, "Push dispatch failed: {}", err);
        DispatchOutcome::Failed(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::User;
    use crate::remote::MemoryRemoteStore;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<PushPayload>>,
        fail: bool,
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        async fn send(&self, payload: &PushPayload) -> Result<Map<String, Value>> {
            if self.fail {
                return Err(Error::NotificationFailed("endpoint down".into()));
            }
            self.sent.lock().push(payload.clone());
            Ok(Map::from_iter([("success".to_string(), json!(true))]))
        }
    }

    fn setup(fail: bool) -> (NotificationDispatcher, MemoryRemoteStore, Arc<RecordingTransport>) {
        let remote = MemoryRemoteStore::new();
        let transport = Arc::new(RecordingTransport {
            fail,
            ..Default::default()
        });
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 1,
            backoff: Duration::from_millis(1),
        };
        let dispatcher = NotificationDispatcher::new(Arc::new(remote.clone()), transport.clone(), policy);
        (dispatcher, remote, transport)
    }

    async fn seed_user(remote: &MemoryRemoteStore, id: &str, status: PresenceStatus) {
        let mut user = User::new(id, "Bob");
        user.status = status;
        remote
            .set(&paths::user(id), serde_json::to_value(&user).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_offline_recipient_with_token_gets_push() {
        let (dispatcher, remote, transport) = setup(false);
        seed_user(&remote, "u2", PresenceStatus::Offline).await;
        dispatcher.register_token("u2", "device-token").await.unwrap();

        let stored = remote.server_document(&paths::notification("u2")).unwrap();
        assert_eq!(stored, json!({ "token": "device-token", "userId": "u2" }));

        let outcome = dispatcher.notify("u2", "Alice", "hi", Some("https://img")).await;
        assert!(outcome.is_delivered());

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].token, "device-token");
        assert_eq!(
            serde_json::to_value(&sent[0]).unwrap()["imageUrl"],
            "https://img"
        );
    }

    #[tokio::test]
    async fn test_online_recipient_is_skipped() {
        let (dispatcher, remote, transport) = setup(false);
        seed_user(&remote, "u2", PresenceStatus::Online).await;
        dispatcher.register_token("u2", "device-token").await.unwrap();

        assert_eq!(
            dispatcher.notify("u2", "Alice", "hi", None).await,
            DispatchOutcome::SkippedOnline
        );
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_is_skipped() {
        let (dispatcher, remote, _) = setup(false);
        seed_user(&remote, "u2", PresenceStatus::Offline).await;

        assert_eq!(
            dispatcher.notify("u2", "Alice", "hi", None).await,
            DispatchOutcome::SkippedNoToken
        );
    }

    #[tokio::test]
    async fn test_failures_become_outcomes() {
        let (dispatcher, remote, _) = setup(true);
        dispatcher.register_token("u2", "device-token").await.unwrap();

        let outcome = dispatcher.dispatch("u2", "Alice", "hi", None).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Failed(_)));

        remote.set_offline(true);
        remote.inject_failure(
            crate::remote::RemoteOp::Get,
            Error::PermissionDenied("users".into()),
            1,
        );
        let outcome = dispatcher.notify("u3", "Alice", "hi", None).await;
        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_empty_token() {
        let (dispatcher, _, _) = setup(false);
        let err = dispatcher.register_token("u2", "").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    /// Accepts one request, answers with `status` and `body`, and hands the
    /// request body back.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<Value>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/sendNotification", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed before headers");
                request.extend_from_slice(&buf[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
            assert!(headers.starts_with("post /sendnotification"));
            let length: usize = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .map(|v| v.trim().parse().unwrap())
                .unwrap();
            while request.len() < header_end + length {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed before body");
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();

            serde_json::from_slice(&request[header_end..header_end + length]).unwrap()
        });

        (url, server)
    }

    fn local_callable(url: String) -> HttpCallable {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        HttpCallable::with_client(client, url)
    }

    fn payload() -> PushPayload {
        PushPayload {
            token: "device-token".into(),
            title: "Alice".into(),
            body: "hi".into(),
            image_url: Some("https://img".into()),
        }
    }

    #[tokio::test]
    async fn test_http_callable_wraps_payload_and_returns_result() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"result":{"success":true,"messageId":"msg-1"}}"#,
        )
        .await;
        let callable = local_callable(url);

        let result = callable.send(&payload()).await.unwrap();
        assert_eq!(result.get("success"), Some(&json!(true)));
        assert_eq!(result.get("messageId"), Some(&json!("msg-1")));

        let request = server.await.unwrap();
        assert_eq!(request["data"]["token"], "device-token");
        assert_eq!(request["data"]["title"], "Alice");
        assert_eq!(request["data"]["body"], "hi");
        assert_eq!(request["data"]["imageUrl"], "https://img");
    }

    #[tokio::test]
    async fn test_http_callable_error_status_is_notification_failure() {
        let (url, server) = serve_once(
            "500 Internal Server Error",
            r#"{"error":{"status":"INTERNAL"}}"#,
        )
        .await;
        let callable = local_callable(url);

        let err = callable.send(&payload()).await.unwrap_err();
        assert!(matches!(err, Error::NotificationFailed(_)));
        assert_eq!(err.code(), 800);
        assert_eq!(server.await.unwrap()["data"]["token"], "device-token");
    }

    #[test]
    fn test_http_callable_picks_endpoint() {
        let config = NotificationConfig {
            use_emulator: true,
            ..Default::default()
        };
        let callable = HttpCallable::new(&config).unwrap();
        assert_eq!(callable.endpoint(), config.emulator_url);
    }
}
