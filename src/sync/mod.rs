//! # Synchronization Core
//!
//! Keeps the local message store consistent with the remote mirrors.
//!
//! ## Outbound
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              SEND                                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  validate draft ──► local insert (loading = true) ──► UI sees it       │
//! │                              │                                          │
//! │                              ▼                                          │
//! │                    push to both mirrors (timeout + bounded retry)       │
//! │                       │                         │                       │
//! │                     ok│                         │err                    │
//! │                       ▼                         ▼                       │
//! │           loading = false               row kept, loading = true       │
//! │           flip receiver's change        one ErrorNotice raised         │
//! │           signal                                                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Inbound
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          GET MESSAGES                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  caller ◄── stream_local(a, b) ◄── local store change feed             │
//! │                                          ▲                              │
//! │                                          │ insert-or-ignore             │
//! │  background task (aborted when the feed is dropped):                   │
//! │    ├── reconcile_from_remote   listener on messages/{a}/{b}            │
//! │    ├── watch_for_remote_change_signal                                  │
//! │    │       changeSignals/{a}/peers/{b}.changed == true                 │
//! │    │       → reconcile_once, reset to false                            │
//! │    └── polling tick every reconcile interval → reconcile_once          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Conflict Policy
//!
//! Local wins on id conflict, remote fills gaps: remote rows are only ever
//! inserted with insert-or-ignore, so a local row is never overwritten by a
//! remote copy with the same id.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::messaging::{Message, MessageDraft, MessageRepository};
use crate::notice::ErrorChannel;
use crate::remote::{fields, paths, with_retry, Query, RemoteStore, RetryPolicy};
use crate::storage::Database;

/// Outcome of the remote half of a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Both mirrors were written
    Confirmed,
    /// The remote write failed; the local row is kept and still marked loading
    Failed(Error),
}

/// What `send` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// The message as stored locally
    pub message: Message,
    pub remote: RemoteStatus,
}

impl SendReceipt {
    pub fn is_confirmed(&self) -> bool {
        self.remote == RemoteStatus::Confirmed
    }
}

/// The synchronization core
#[derive(Clone)]
pub struct SyncCore {
    database: Arc<Database>,
    remote: Arc<dyn RemoteStore>,
    messages: MessageRepository,
    errors: ErrorChannel,
    policy: RetryPolicy,
    reconcile_interval: Duration,
    max_message_bytes: usize,
}

impl SyncCore {
    pub fn new(
        database: Arc<Database>,
        remote: Arc<dyn RemoteStore>,
        errors: ErrorChannel,
        config: &CoreConfig,
    ) -> Self {
        let policy = config.retry_policy();
        Self {
            messages: MessageRepository::new(remote.clone(), database.clone(), policy),
            database,
            remote,
            errors,
            policy,
            reconcile_interval: config.reconcile_interval(),
            max_message_bytes: config.max_message_bytes,
        }
    }

    /// Override the polling interval
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Override the retry policy of every remote call
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self.messages = MessageRepository::new(self.remote.clone(), self.database.clone(), policy);
        self
    }

    /// The message repository this core writes through
    pub fn messages(&self) -> &MessageRepository {
        &self.messages
    }

    /// The shared error channel
    pub fn errors(&self) -> &ErrorChannel {
        &self.errors
    }

    // ========================================================================
    // OUTBOUND
    // ========================================================================

    /// Store the message locally, then push it to both remote mirrors.
    ///
    /// Validation failures return `Err` before any I/O, as does a local
    /// store failure. A remote failure does not: the local row stays,
    /// one notice is raised, and the receipt reports [`RemoteStatus::Failed`].
    pub async fn send(
        &self,
        sender_id: &str,
        receiver_id: &str,
        draft: MessageDraft,
    ) -> Result<SendReceipt> {
        if sender_id.is_empty() || receiver_id.is_empty() {
            return Err(Error::Validation("Sender and receiver are required".into()));
        }
        draft.validate(self.max_message_bytes)?;

        let mut message = Message::from_draft(sender_id, receiver_id, draft);
        self.database.upsert_message(&message)?;
        tracing::debug!(message_id = %message.id, sender_id, receiver_id, "Message stored locally");

        match self.messages.push_remote(&message).await {
            Ok(()) => {
                message.loading = false;
                if let Err(e) = self.database.set_message_loading(&message.id, false) {
                    tracing::warn!(message_id = %message.id, "Failed to clear loading flag: {}", e);
                }
                if let Err(e) = self.signal_change(receiver_id, sender_id).await {
                    tracing::debug!(receiver_id, "Change signal not delivered: {}", e);
                }
                Ok(SendReceipt {
                    message,
                    remote: RemoteStatus::Confirmed,
                })
            }
            Err(e) => {
                tracing::warn!(message_id = %message.id, "Remote send failed, kept locally: {}", e);
                self.errors
                    .raise(&Error::DeliveryFailed(format!("message {}: {}", message.id, e)));
                Ok(SendReceipt {
                    message,
                    remote: RemoteStatus::Failed(e),
                })
            }
        }
    }

    /// Tell `owner_id` that `peer_id` changed their shared history
    async fn signal_change(&self, owner_id: &str, peer_id: &str) -> Result<()> {
        let path = paths::change_signal(owner_id, peer_id);
        let body = json!({ "peerId": peer_id, "changed": true });
        with_retry(&self.policy, "changeSignals.set", || self.remote.set(&path, body.clone())).await
    }

    // ========================================================================
    // INBOUND
    // ========================================================================

    /// Live local history of the pair, oldest first. Emits the current rows
    /// immediately and again after every local change touching the pair.
    pub fn stream_local(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> impl Stream<Item = Vec<Message>> + Send + 'static {
        let database = self.database.clone();
        let a = user_a.to_string();
        let b = user_b.to_string();

        async_stream::stream! {
            // Subscribe first so no change between query and subscribe is lost.
            let mut changes = database.subscribe_changes();

            match database.get_messages_between(&a, &b) {
                Ok(rows) => {
                    yield rows;
                }
                Err(e) => tracing::warn!("Local message query failed: {}", e),
            }

            loop {
                match changes.recv().await {
                    Ok(change) if change.affects_pair(&a, &b) => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Change feed lagged, re-querying");
                    }
                    Err(RecvError::Closed) => break,
                }

                match database.get_messages_between(&a, &b) {
                    Ok(rows) => {
                        yield rows;
                    }
                    Err(e) => tracing::warn!("Local message query failed: {}", e),
                }
            }
        }
    }

    /// One reconciliation pass: fetch `owner_id`'s mirror of the pair and
    /// insert whatever is missing locally. Returns how many rows were added.
    pub async fn reconcile_once(&self, owner_id: &str, other_id: &str) -> Result<usize> {
        let remote = self.messages.fetch_remote(owner_id, other_id).await?;
        let added = self.database.insert_messages_if_absent(&remote)?;
        if added > 0 {
            tracing::debug!(owner_id, other_id, added, "Reconciled messages from remote");
        }
        Ok(added)
    }

    /// Follow the remote mirror of the pair, inserting every emission with
    /// insert-or-ignore. Runs until the listener ends; returns its error.
    pub async fn reconcile_from_remote(&self, owner_id: &str, other_id: &str) -> Result<()> {
        let mut registration = self.messages.listen_remote(owner_id, other_id).await?;

        while let Some(snapshot) = registration.next().await {
            let docs = snapshot?;
            let messages = crate::messaging::decode_messages(&docs);
            let added = self.database.insert_messages_if_absent(&messages)?;
            if added > 0 {
                tracing::debug!(owner_id, other_id, added, "Listener delivered new messages");
            }
        }
        Ok(())
    }

    /// Watch `changeSignals/{owner}/peers/{other}`. Each time it reads
    /// `changed: true`, reset it to false and run a reconciliation pass.
    ///
    /// The reset happens before the pass, so a raise landing while the pass
    /// runs shows up as a fresh snapshot instead of being overwritten. A
    /// failed pass raises the signal again after one backoff period.
    pub async fn watch_for_remote_change_signal(&self, owner_id: &str, other_id: &str) -> Result<()> {
        let query = Query::collection(paths::change_signals(owner_id)).where_eq("peerId", other_id);
        let mut registration = with_retry(&self.policy, "changeSignals.listen", || {
            self.remote.listen(query.clone())
        })
        .await?;
        let path = paths::change_signal(owner_id, other_id);

        while let Some(snapshot) = registration.next().await {
            let docs = snapshot?;
            let raised = docs
                .iter()
                .any(|doc| doc.field("changed").and_then(|v| v.as_bool()) == Some(true));
            if !raised {
                continue;
            }

            tracing::debug!(owner_id, other_id, "Change signal raised");
            if let Err(e) = self.write_signal(&path, false).await {
                tracing::warn!(owner_id, other_id, "Failed to reset change signal: {}", e);
            }

            if let Err(e) = self.reconcile_once(owner_id, other_id).await {
                tracing::warn!(owner_id, other_id, "Signalled reconciliation failed: {}", e);
                tokio::time::sleep(self.policy.backoff).await;
                if let Err(e) = self.write_signal(&path, true).await {
                    tracing::warn!(owner_id, other_id, "Failed to re-raise change signal: {}", e);
                }
            }
        }
        Ok(())
    }

    async fn write_signal(&self, path: &str, changed: bool) -> Result<()> {
        let update = fields([("changed", json!(changed))]);
        with_retry(&self.policy, "changeSignals.update", || {
            self.remote.update(path, update.clone())
        })
        .await
    }

    /// Local history of the pair with background reconciliation.
    ///
    /// Returns immediately with the local stream. Behind it a task follows
    /// the remote mirror, the change signal, and a polling tick. Dropping
    /// the feed stops the task and releases its listeners. Must be called
    /// from within a tokio runtime.
    pub fn get_messages(&self, owner_id: &str, other_id: &str) -> MessageFeed {
        let local = Box::pin(self.stream_local(owner_id, other_id));

        let core = self.clone();
        let owner_id = owner_id.to_string();
        let other_id = other_id.to_string();
        let task = tokio::spawn(async move {
            core.run_background(&owner_id, &other_id).await;
        });

        MessageFeed { local, task }
    }

    async fn run_background(&self, owner_id: &str, other_id: &str) {
        let subscription = self.reconcile_from_remote(owner_id, other_id);
        let signal = self.watch_for_remote_change_signal(owner_id, other_id);
        tokio::pin!(subscription);
        tokio::pin!(signal);

        let mut ticker = tokio::time::interval(self.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut subscription_done = false;
        let mut signal_done = false;

        loop {
            tokio::select! {
                result = &mut subscription, if !subscription_done => {
                    subscription_done = true;
                    if let Err(e) = result {
                        tracing::warn!(owner_id, other_id, "Message subscription ended, polling only: {}", e);
                    }
                }
                result = &mut signal, if !signal_done => {
                    signal_done = true;
                    if let Err(e) = result {
                        tracing::warn!(owner_id, other_id, "Change signal watch ended: {}", e);
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once(owner_id, other_id).await {
                        tracing::debug!(owner_id, other_id, "Reconciliation tick failed: {}", e);
                    }
                }
            }
        }
    }
}

/// Local message stream with its background reconciliation task attached
pub struct MessageFeed {
    local: Pin<Box<dyn Stream<Item = Vec<Message>> + Send>>,
    task: JoinHandle<()>,
}

impl MessageFeed {
    /// Whether the background task is still running
    pub fn is_syncing(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Stream for MessageFeed {
    type Item = Vec<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.local.as_mut().poll_next(cx)
    }
}

impl Drop for MessageFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, RemoteOp};
    use futures::StreamExt;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        }
    }

    async fn setup() -> (SyncCore, MemoryRemoteStore, Arc<Database>) {
        let remote = MemoryRemoteStore::new();
        let database = Arc::new(Database::open(None).await.unwrap());
        let core = SyncCore::new(
            database.clone(),
            Arc::new(remote.clone()),
            ErrorChannel::new(),
            &CoreConfig::default(),
        )
        .with_retry_policy(fast_policy())
        .with_reconcile_interval(Duration::from_millis(20));
        (core, remote, database)
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn remote_message(id: &str, from: &str, to: &str, text: &str, ts: &str) -> serde_json::Value {
        json!({
            "id": id,
            "conversationId": "c1",
            "userId1": from,
            "userId2": to,
            "text": text,
            "timestamp": ts,
        })
    }

    #[tokio::test]
    async fn test_send_confirmed() {
        let (core, remote, database) = setup().await;

        let receipt = core
            .send("u1", "u2", MessageDraft::text("c1", "hi"))
            .await
            .unwrap();
        assert!(receipt.is_confirmed());
        assert!(!receipt.message.loading);

        let stored = database.get_message(&receipt.message.id).unwrap().unwrap();
        assert!(!stored.loading);
        assert!(remote
            .server_document(&paths::message("u2", "u1", &receipt.message.id))
            .is_some());

        let signal = remote.server_document(&paths::change_signal("u2", "u1")).unwrap();
        assert_eq!(signal["changed"], true);
        assert_eq!(core.errors().raised_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_local_copy_and_raises_once() {
        let (core, remote, database) = setup().await;
        remote.set_offline(true);

        let receipt = core
            .send("u1", "u2", MessageDraft::text("c1", "hi"))
            .await
            .unwrap();
        assert!(matches!(receipt.remote, RemoteStatus::Failed(_)));

        let history = database.get_messages_between("u1", "u2").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "hi");
        assert!(history[0].loading);

        assert_eq!(core.errors().raised_count(), 1);
        let notice = core.errors().dismiss().unwrap();
        assert_eq!(notice.code, 702);
        assert!(core.errors().current().is_none());
    }

    #[tokio::test]
    async fn test_permanent_failure_also_raises_once() {
        let (core, remote, database) = setup().await;
        remote.inject_failure(RemoteOp::Set, Error::PermissionDenied("messages".into()), 1);

        let receipt = core
            .send("u1", "u2", MessageDraft::text("c1", "hi"))
            .await
            .unwrap();
        assert!(!receipt.is_confirmed());
        assert!(database.get_message(&receipt.message.id).unwrap().is_some());
        assert_eq!(core.errors().raised_count(), 1);
    }

    #[tokio::test]
    async fn test_blank_send_is_rejected_before_io() {
        let (core, remote, database) = setup().await;

        let err = core
            .send("u1", "u2", MessageDraft::text("c1", "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(database.get_messages_between("u1", "u2").unwrap().is_empty());
        assert_eq!(remote.total_calls(), 0);
        assert_eq!(core.errors().raised_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_local_follows_changes() {
        let (core, _, database) = setup().await;
        let mut stream = Box::pin(core.stream_local("u1", "u2"));
        assert!(stream.next().await.unwrap().is_empty());

        let receipt = core
            .send("u2", "u1", MessageDraft::text("c1", "hello"))
            .await
            .unwrap();
        let rows = stream.next().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, receipt.message.id);

        database.update_read_status(&receipt.message.id, true).unwrap();
        let rows = loop {
            let rows = stream.next().await.unwrap();
            if rows[0].is_read {
                break rows;
            }
        };
        assert!(rows[0].is_read);
    }

    #[tokio::test]
    async fn test_reconcile_fills_gaps_and_local_wins() {
        let (core, remote, database) = setup().await;

        let local = Message {
            id: "m1".into(),
            conversation_id: "c1".into(),
            user_id1: "u1".into(),
            user_id2: "u2".into(),
            text: "local edit".into(),
            timestamp: "2024-01-01T00:00:01.000Z".into(),
            ..Default::default()
        };
        database.upsert_message(&local).unwrap();

        for (id, text, ts) in [
            ("m1", "remote copy", "2024-01-01T00:00:01.000Z"),
            ("m2", "two", "2024-01-01T00:00:02.000Z"),
            ("m3", "three", "2024-01-01T00:00:03.000Z"),
        ] {
            remote
                .set(&paths::message("u1", "u2", id), remote_message(id, "u2", "u1", text, ts))
                .await
                .unwrap();
        }

        assert_eq!(core.reconcile_once("u1", "u2").await.unwrap(), 2);

        let history = database.get_messages_between("u1", "u2").unwrap();
        let ids: Vec<_> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(history[0].text, "local edit");

        // A second pass is a no-op.
        assert_eq!(core.reconcile_once("u1", "u2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_from_remote_inserts_emissions() {
        let (core, remote, database) = setup().await;

        let follower = core.clone();
        let task = tokio::spawn(async move { follower.reconcile_from_remote("u1", "u2").await });
        eventually(|| remote.active_listeners() == 1).await;

        remote
            .set(
                &paths::message("u1", "u2", "m9"),
                remote_message("m9", "u2", "u1", "pushed", "2024-01-01T00:00:09.000Z"),
            )
            .await
            .unwrap();

        eventually(|| database.get_message("m9").unwrap().is_some()).await;

        task.abort();
        let _ = task.await;
        assert_eq!(remote.active_listeners(), 0);
        assert_eq!(remote.detach_count(), 1);
    }

    #[tokio::test]
    async fn test_change_signal_triggers_reconcile_and_resets() {
        let (core, remote, database) = setup().await;

        let watcher = core.clone();
        let task =
            tokio::spawn(async move { watcher.watch_for_remote_change_signal("u2", "u1").await });
        eventually(|| remote.active_listeners() == 1).await;

        // The message lands on the server with nobody listening to the mirror.
        remote.seed_server_only(
            &paths::message("u2", "u1", "m1"),
            remote_message("m1", "u1", "u2", "psst", "2024-01-01T00:00:01.000Z"),
        );
        remote
            .set(
                &paths::change_signal("u2", "u1"),
                json!({ "peerId": "u1", "changed": true }),
            )
            .await
            .unwrap();

        eventually(|| database.get_message("m1").unwrap().is_some()).await;
        eventually(|| {
            remote
                .server_document(&paths::change_signal("u2", "u1"))
                .map(|doc| doc["changed"] == false)
                .unwrap_or(false)
        })
        .await;

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_failed_signalled_pass_raises_signal_again() {
        let (core, remote, database) = setup().await;

        let watcher = core.clone();
        let task =
            tokio::spawn(async move { watcher.watch_for_remote_change_signal("u2", "u1").await });
        eventually(|| remote.active_listeners() == 1).await;

        remote.seed_server_only(
            &paths::message("u2", "u1", "m1"),
            remote_message("m1", "u1", "u2", "retry me", "2024-01-01T00:00:01.000Z"),
        );
        // The first pass cannot read the mirror.
        remote.inject_failure(RemoteOp::Query, Error::PermissionDenied("messages".into()), 1);
        remote
            .set(
                &paths::change_signal("u2", "u1"),
                json!({ "peerId": "u1", "changed": true }),
            )
            .await
            .unwrap();

        // The re-raised signal drives a second pass without any polling.
        eventually(|| database.get_message("m1").unwrap().is_some()).await;
        eventually(|| {
            remote
                .server_document(&paths::change_signal("u2", "u1"))
                .map(|doc| doc["changed"] == false)
                .unwrap_or(false)
        })
        .await;
        assert!(remote.call_count(RemoteOp::Query) >= 2);

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_signal_raised_during_pass_is_not_lost() {
        let (core, remote, database) = setup().await;
        remote
            .set(
                &paths::change_signal("u2", "u1"),
                json!({ "peerId": "u1", "changed": true }),
            )
            .await
            .unwrap();
        // Hold the first pass inside its mirror read.
        remote.stall(RemoteOp::Query);

        let watcher = core.clone();
        let task =
            tokio::spawn(async move { watcher.watch_for_remote_change_signal("u2", "u1").await });
        eventually(|| {
            remote
                .server_document(&paths::change_signal("u2", "u1"))
                .map(|doc| doc["changed"] == false)
                .unwrap_or(false)
        })
        .await;

        // The peer sends again while the pass is still running.
        remote.seed_server_only(
            &paths::message("u2", "u1", "m2"),
            remote_message("m2", "u1", "u2", "second", "2024-01-01T00:00:02.000Z"),
        );
        remote
            .update(&paths::change_signal("u2", "u1"), fields([("changed", json!(true))]))
            .await
            .unwrap();
        remote.resume(RemoteOp::Query);

        eventually(|| database.get_message("m2").unwrap().is_some()).await;
        eventually(|| {
            remote
                .server_document(&paths::change_signal("u2", "u1"))
                .map(|doc| doc["changed"] == false)
                .unwrap_or(false)
        })
        .await;

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_signal_watch_times_out_when_backend_hangs() {
        let (core, remote, _) = setup().await;
        let core = core.with_retry_policy(RetryPolicy {
            timeout: Duration::from_millis(20),
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        });
        remote.stall(RemoteOp::Listen);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            core.watch_for_remote_change_signal("u2", "u1"),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_get_messages_returns_local_then_converges() {
        let (core, remote, database) = setup().await;
        database
            .upsert_message(&Message {
                id: "old".into(),
                user_id1: "u1".into(),
                user_id2: "u2".into(),
                text: "cached".into(),
                timestamp: "2024-01-01T00:00:00.000Z".into(),
                ..Default::default()
            })
            .unwrap();

        let mut feed = core.get_messages("u1", "u2");
        let first = feed.next().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].text, "cached");

        remote
            .set(
                &paths::message("u1", "u2", "new"),
                remote_message("new", "u2", "u1", "fresh", "2024-01-01T00:00:05.000Z"),
            )
            .await
            .unwrap();

        let converged = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let rows = feed.next().await.unwrap();
                if rows.iter().any(|m| m.id == "new") {
                    return rows;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(converged.len(), 2);
        assert!(feed.is_syncing());

        drop(feed);
        eventually(|| remote.active_listeners() == 0).await;
        assert_eq!(remote.detach_count(), remote.attach_count());
    }

    #[tokio::test]
    async fn test_polling_recovers_after_outage() {
        let (core, remote, database) = setup().await;
        remote.set_offline(true);

        // Listeners cannot attach while offline; only the polling tick remains.
        let feed = core.get_messages("u1", "u2");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(remote.active_listeners(), 0);

        remote.set_offline(false);
        remote.seed_server_only(
            &paths::message("u1", "u2", "late"),
            remote_message("late", "u2", "u1", "after outage", "2024-01-01T00:00:07.000Z"),
        );

        eventually(|| database.get_message("late").unwrap().is_some()).await;
        drop(feed);
    }
}
