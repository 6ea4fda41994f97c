//! # Message Repository
//!
//! Remote side of a pair's message history. Every message is stored twice,
//! once under each participant:
//!
//! ```text
//!   messages/{sender}/{receiver}/{messageId}   sender's mirror
//!   messages/{receiver}/{sender}/{messageId}   receiver's mirror
//! ```
//!
//! Both mirrors use the message id as document key, so delete and update
//! address the same document on both sides.

use std::sync::Arc;

use futures::Stream;
use serde_json::json;

use super::model::Message;
use crate::error::Result;
use crate::remote::{
    fields, paths, with_retry, Document, ListenerRegistration, Query, RemoteStore, RetryPolicy,
    Source,
};
use crate::storage::Database;

/// Message repository
#[derive(Clone)]
pub struct MessageRepository {
    remote: Arc<dyn RemoteStore>,
    database: Arc<Database>,
    policy: RetryPolicy,
}

impl MessageRepository {
    pub fn new(remote: Arc<dyn RemoteStore>, database: Arc<Database>, policy: RetryPolicy) -> Self {
        Self {
            remote,
            database,
            policy,
        }
    }

    /// Write `message` to both participants' mirrors
    pub async fn push_remote(&self, message: &Message) -> Result<()> {
        let body = serde_json::to_value(message)?;
        let (sender, receiver) = (message.sender_id(), message.receiver_id());

        for (owner, other) in [(sender, receiver), (receiver, sender)] {
            let path = paths::message(owner, other, &message.id);
            with_retry(&self.policy, "messages.set", || self.remote.set(&path, body.clone())).await?;
        }

        tracing::debug!(message_id = %message.id, "Message mirrored");
        Ok(())
    }

    /// One-shot server read of `owner_id`'s mirror of the pair
    pub async fn fetch_remote(&self, owner_id: &str, other_id: &str) -> Result<Vec<Message>> {
        let query = Query::collection(paths::messages(owner_id, other_id));
        let docs = with_retry(&self.policy, "messages.query", || {
            self.remote.query(&query, Source::Server)
        })
        .await?;
        Ok(decode_messages(&docs))
    }

    /// Attach a listener to `owner_id`'s mirror of the pair
    pub async fn listen_remote(&self, owner_id: &str, other_id: &str) -> Result<ListenerRegistration> {
        let query = Query::collection(paths::messages(owner_id, other_id));
        with_retry(&self.policy, "messages.listen", || self.remote.listen(query.clone())).await
    }

    /// Live remote history of the pair as seen by `owner_id`, oldest first.
    /// Dropping the stream detaches the listener; a listener error ends it.
    pub fn stream_remote(
        &self,
        owner_id: &str,
        other_id: &str,
    ) -> impl Stream<Item = Vec<Message>> + Send + 'static {
        let repo = self.clone();
        let owner_id = owner_id.to_string();
        let other_id = other_id.to_string();

        async_stream::stream! {
            let mut registration = match repo.listen_remote(&owner_id, &other_id).await {
                Ok(registration) => registration,
                Err(e) => {
                    tracing::warn!(owner_id = %owner_id, "Message listener failed to attach: {}", e);
                    return;
                }
            };

            while let Some(snapshot) = registration.next().await {
                match snapshot {
                    Ok(docs) => {
                        yield decode_messages(&docs);
                    }
                    Err(e) => {
                        tracing::warn!(owner_id = %owner_id, "Message listener failed: {}", e);
                        break;
                    }
                }
            }
        }
    }

    /// Flip the read flag of `message_id`.
    ///
    /// The remote documents are located by their `id` field and only the
    /// first match in each mirror is updated. The local row is then updated
    /// by primary key. Returns true if any remote document matched.
    pub async fn mark_read(
        &self,
        owner_id: &str,
        other_id: &str,
        message_id: &str,
        is_read: bool,
    ) -> Result<bool> {
        let update = fields([("isRead", json!(is_read))]);
        let mut matched = false;

        for (owner, other) in [(owner_id, other_id), (other_id, owner_id)] {
            let query = Query::collection(paths::messages(owner, other))
                .where_eq("id", message_id)
                .limit(1);
            let docs = with_retry(&self.policy, "messages.query", || {
                self.remote.query(&query, Source::Server)
            })
            .await?;

            let Some(doc) = docs.first() else {
                tracing::debug!(message_id, owner, "No mirror document to mark read");
                continue;
            };
            with_retry(&self.policy, "messages.update", || {
                self.remote.update(&doc.path, update.clone())
            })
            .await?;
            matched = true;
        }

        self.database.update_read_status(message_id, is_read)?;
        Ok(matched)
    }

    /// Remove `message_id` from both remote mirrors and from the local store
    pub async fn delete(&self, owner_id: &str, other_id: &str, message_id: &str) -> Result<()> {
        for (owner, other) in [(owner_id, other_id), (other_id, owner_id)] {
            let path = paths::message(owner, other, message_id);
            with_retry(&self.policy, "messages.delete", || self.remote.delete(&path)).await?;
        }

        self.database.delete_message(message_id)?;
        tracing::info!(message_id, "Message deleted");
        Ok(())
    }
}

pub(crate) fn decode_messages(docs: &[Document]) -> Vec<Message> {
    let mut messages: Vec<Message> = docs
        .iter()
        .filter_map(|doc| match doc.decode::<Message>() {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!("Skipping malformed message {}: {}", doc.path, e);
                None
            }
        })
        .collect();
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    messages
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::messaging::MessageDraft;
    use crate::remote::{MemoryRemoteStore, RemoteOp};
    use futures::StreamExt;
    use std::time::Duration;

    async fn setup() -> (MessageRepository, MemoryRemoteStore, Arc<Database>) {
        let remote = MemoryRemoteStore::new();
        let database = Arc::new(Database::open(None).await.unwrap());
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        };
        let repo = MessageRepository::new(Arc::new(remote.clone()), database.clone(), policy);
        (repo, remote, database)
    }

    fn message(text: &str) -> Message {
        Message::from_draft("u1", "u2", MessageDraft::text("c1", text))
    }

    #[tokio::test]
    async fn test_push_mirrors_under_same_id() {
        let (repo, remote, _) = setup().await;
        let m = message("hi");
        repo.push_remote(&m).await.unwrap();

        let mine = remote.server_document(&paths::message("u1", "u2", &m.id)).unwrap();
        let theirs = remote.server_document(&paths::message("u2", "u1", &m.id)).unwrap();
        assert_eq!(mine, theirs);
        assert_eq!(mine["text"], "hi");

        let fetched = repo.fetch_remote("u2", "u1").await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, m.id);
        assert!(!fetched[0].loading);
    }

    #[tokio::test]
    async fn test_mark_read_updates_both_mirrors_and_local_row() {
        let (repo, remote, database) = setup().await;
        let m = message("hi");
        database.upsert_message(&m).unwrap();
        repo.push_remote(&m).await.unwrap();

        assert!(repo.mark_read("u2", "u1", &m.id, true).await.unwrap());

        for (owner, other) in [("u1", "u2"), ("u2", "u1")] {
            let doc = remote.server_document(&paths::message(owner, other, &m.id)).unwrap();
            assert_eq!(doc["isRead"], true);
        }
        assert!(database.get_message(&m.id).unwrap().unwrap().is_read);
    }

    #[tokio::test]
    async fn test_mark_read_unknown_message() {
        let (repo, _, _) = setup().await;
        assert!(!repo.mark_read("u1", "u2", "missing", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_removes_everywhere() {
        let (repo, remote, database) = setup().await;
        let m = message("bye");
        database.upsert_message(&m).unwrap();
        repo.push_remote(&m).await.unwrap();

        repo.delete("u1", "u2", &m.id).await.unwrap();

        assert!(remote.server_document(&paths::message("u1", "u2", &m.id)).is_none());
        assert!(remote.server_document(&paths::message("u2", "u1", &m.id)).is_none());
        assert!(database.get_message(&m.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_keeps_local_row_when_remote_fails() {
        let (repo, remote, database) = setup().await;
        let m = message("bye");
        database.upsert_message(&m).unwrap();
        remote.inject_failure(RemoteOp::Delete, Error::PermissionDenied("messages".into()), 1);

        assert!(repo.delete("u1", "u2", &m.id).await.is_err());
        assert!(database.get_message(&m.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_listen_times_out_when_backend_hangs() {
        let (_, remote, _) = setup().await;
        remote.stall(RemoteOp::Listen);

        let fast = MessageRepository::new(
            Arc::new(remote.clone()),
            Arc::new(Database::open(None).await.unwrap()),
            RetryPolicy {
                timeout: Duration::from_millis(20),
                max_attempts: 1,
                backoff: Duration::from_millis(1),
            },
        );
        let err = fast.listen_remote("u1", "u2").await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        let mut stream = Box::pin(fast.stream_remote("u1", "u2"));
        let end = tokio::time::timeout(Duration::from_secs(2), stream.next()).await;
        assert_eq!(end.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stream_remote_cancel_detaches_once() {
        let (repo, remote, _) = setup().await;
        let mut stream = Box::pin(repo.stream_remote("u1", "u2"));
        assert!(stream.next().await.unwrap().is_empty());

        let m = message("hi");
        repo.push_remote(&m).await.unwrap();
        assert_eq!(stream.next().await.unwrap().len(), 1);

        drop(stream);
        assert_eq!(remote.detach_count(), 1);
        assert_eq!(remote.active_listeners(), 0);

        // Writes after cancellation reach nobody.
        repo.push_remote(&message("later")).await.unwrap();
        assert_eq!(remote.detach_count(), 1);
    }
}
