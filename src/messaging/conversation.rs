//! # Conversation Repository
//!
//! Per-user conversation summaries. Each participant owns a denormalized
//! mirror of the same summary under `conversations/{userId}/messages/{id}`,
//! so both inboxes can be queried independently.
//!
//! ## Existence Check
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   UPSERT CONVERSATION FOR PAIR                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  UNKNOWN                                                               │
//! │    │  cache:  (sender, receiver)  then  (receiver, sender)             │
//! │    ├──── hit ─────────────────────────────────────► UPDATE (cache)     │
//! │    ▼  miss both                                                        │
//! │  SERVER_CHECK                                                          │
//! │    │  server: (sender, receiver)  then  (receiver, sender)             │
//! │    ├──── hit ─────────────────────────────────────► UPDATE (server)    │
//! │    ▼  miss both                                                        │
//! │  CREATE (fresh conversationId)                                         │
//! │                                                                         │
//! │  CREATE and UPDATE both write the same document to both mirrors.      │
//! │  Any failure is logged and returned to the caller.                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::Stream;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use super::model::{Conversation, ParticipantSnapshot};
use crate::error::{Error, Result};
use crate::remote::{fields, paths, with_retry, Document, Query, RemoteStore, RetryPolicy, Source};
use crate::storage::Database;

/// What `upsert_conversation_for_pair` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed; a new one was written to both mirrors
    Created { conversation_id: String },
    /// An existing record was found at `found_in` and rewritten to both mirrors
    Updated {
        conversation_id: String,
        found_in: Source,
    },
}

impl UpsertOutcome {
    pub fn conversation_id(&self) -> &str {
        match self {
            UpsertOutcome::Created { conversation_id } => conversation_id,
            UpsertOutcome::Updated {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Conversation summary repository
#[derive(Clone)]
pub struct ConversationRepository {
    remote: Arc<dyn RemoteStore>,
    database: Arc<Database>,
    policy: RetryPolicy,
    stream_retry_limit: u32,
}

impl ConversationRepository {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        database: Arc<Database>,
        policy: RetryPolicy,
        stream_retry_limit: u32,
    ) -> Self {
        Self {
            remote,
            database,
            policy,
            stream_retry_limit,
        }
    }

    /// Live conversation list of `user_id`, most recent first.
    ///
    /// One eager server fetch populates the list, then a real-time listener
    /// takes over. Transient failures re-attach the listener up to the retry
    /// limit; any other failure is logged and ends the stream. The stream
    /// itself never yields an error.
    pub fn stream_conversations(
        &self,
        user_id: &str,
    ) -> impl Stream<Item = Vec<Conversation>> + Send + 'static {
        let repo = self.clone();
        let user_id = user_id.to_string();

        async_stream::stream! {
            let collection = paths::conversations(&user_id);
            let query = Query::collection(collection.clone());

            match with_retry(&repo.policy, "conversations.query", || {
                repo.remote.query(&query, Source::Server)
            })
            .await
            {
                Ok(docs) => {
                    yield repo.absorb(&user_id, &docs);
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, "Initial conversation fetch failed: {}", e);
                }
            }

            let mut retries = 0u32;
            'listen: loop {
                let attach = with_retry(&repo.policy, "conversations.listen", || {
                    repo.remote.listen(query.clone())
                })
                .await;
                let mut registration = match attach {
                    Ok(registration) => registration,
                    Err(e) if e.is_transient() && retries < repo.stream_retry_limit => {
                        retries += 1;
                        tracing::warn!(user_id = %user_id, retries, "Conversation listener attach failed, retrying: {}", e);
                        tokio::time::sleep(repo.policy.backoff * retries).await;
                        continue 'listen;
                    }
                    Err(e) => {
                        tracing::error!(user_id = %user_id, "Conversation stream terminated: {}", e);
                        break 'listen;
                    }
                };

                while let Some(snapshot) = registration.next().await {
                    match snapshot {
                        Ok(docs) => {
                            yield repo.absorb(&user_id, &docs);
                        }
                        Err(e) if e.is_transient() && retries < repo.stream_retry_limit => {
                            retries += 1;
                            tracing::warn!(user_id = %user_id, retries, "Conversation listener failed, re-attaching: {}", e);
                            registration.remove();
                            tokio::time::sleep(repo.policy.backoff * retries).await;
                            continue 'listen;
                        }
                        Err(e) => {
                            tracing::error!(user_id = %user_id, "Conversation stream terminated: {}", e);
                            break 'listen;
                        }
                    }
                }
                break 'listen;
            }
        }
    }

    /// Cached conversations of `user_id`, for offline display
    pub fn local_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        self.database.get_conversations_for_user(user_id)
    }

    /// Live cached conversation list of `user_id`, most recent first.
    /// Emits the current rows immediately and again after every local
    /// change touching one of the user's conversations.
    pub fn stream_local_conversations(
        &self,
        user_id: &str,
    ) -> impl Stream<Item = Vec<Conversation>> + Send + 'static {
        let database = self.database.clone();
        let user_id = user_id.to_string();

        async_stream::stream! {
            let mut changes = database.subscribe_changes();

            loop {
                match database.get_conversations_for_user(&user_id) {
                    Ok(rows) => {
                        yield rows;
                    }
                    Err(e) => tracing::warn!(user_id = %user_id, "Local conversation query failed: {}", e),
                }

                loop {
                    match changes.recv().await {
                        Ok(change) if change.affects_conversations_of(&user_id) => break,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "Change feed lagged, re-querying");
                            break;
                        }
                        Err(RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    /// Record `last_message` as the latest activity between the two
    /// participants, creating the conversation on first contact.
    pub async fn upsert_conversation_for_pair(
        &self,
        sender: &ParticipantSnapshot,
        receiver: &ParticipantSnapshot,
        last_message: &str,
    ) -> Result<UpsertOutcome> {
        let text = last_message.trim();
        if text.is_empty() {
            tracing::debug!(sender = %sender.user_id, "Skipping conversation upsert for blank message");
            return Err(Error::Validation("Conversation preview is blank".into()));
        }

        match self.try_upsert(sender, receiver, text).await {
            Ok(outcome) => {
                tracing::debug!(
                    sender = %sender.user_id,
                    receiver = %receiver.user_id,
                    "Conversation upserted: {:?}",
                    outcome
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(
                    sender = %sender.user_id,
                    receiver = %receiver.user_id,
                    "Conversation upsert failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn try_upsert(
        &self,
        sender: &ParticipantSnapshot,
        receiver: &ParticipantSnapshot,
        text: &str,
    ) -> Result<UpsertOutcome> {
        let timestamp = crate::time::sortable_now();

        let outcome = match self.find_existing(&sender.user_id, &receiver.user_id).await? {
            Some((mut conversation, found_in)) => {
                conversation.last_message = text.to_string();
                conversation.timestamp = timestamp;
                conversation.apply_snapshot(sender);
                conversation.apply_snapshot(receiver);
                self.write_mirrors(&conversation).await?;
                UpsertOutcome::Updated {
                    conversation_id: conversation.conversation_id,
                    found_in,
                }
            }
            None => {
                let mut conversation = Conversation {
                    conversation_id: paths::new_document_id(),
                    user_id1: sender.user_id.clone(),
                    user_id2: receiver.user_id.clone(),
                    last_message: text.to_string(),
                    timestamp,
                    participant_names: BTreeMap::new(),
                    participant_avatars: BTreeMap::new(),
                    typing: BTreeMap::from([
                        (sender.user_id.clone(), false),
                        (receiver.user_id.clone(), false),
                    ]),
                };
                conversation.apply_snapshot(sender);
                conversation.apply_snapshot(receiver);
                self.write_mirrors(&conversation).await?;
                UpsertOutcome::Created {
                    conversation_id: conversation.conversation_id,
                }
            }
        };

        Ok(outcome)
    }

    /// Look in `sender_id`'s collection for the pair, both orderings, cache
    /// tier before server tier.
    async fn find_existing(
        &self,
        sender_id: &str,
        receiver_id: &str,
    ) -> Result<Option<(Conversation, Source)>> {
        let collection = paths::conversations(sender_id);
        let orderings = [(sender_id, receiver_id), (receiver_id, sender_id)];

        let cache_policy = RetryPolicy::once(self.policy.timeout);
        for (a, b) in orderings {
            let query = pair_query(&collection, a, b);
            let cached = with_retry(&cache_policy, "conversations.query.cache", || {
                self.remote.query(&query, Source::Cache)
            })
            .await;
            match cached {
                Ok(docs) => {
                    if let Some(conversation) = first_conversation(&docs)? {
                        return Ok(Some((conversation, Source::Cache)));
                    }
                }
                Err(e) => {
                    tracing::debug!("Cache lookup failed, treating as miss: {}", e);
                }
            }
        }

        for (a, b) in orderings {
            let query = pair_query(&collection, a, b);
            let docs = with_retry(&self.policy, "conversations.query", || {
                self.remote.query(&query, Source::Server)
            })
            .await?;
            if let Some(conversation) = first_conversation(&docs)? {
                return Ok(Some((conversation, Source::Server)));
            }
        }

        Ok(None)
    }

    /// Write the same document under both participants, then cache it
    async fn write_mirrors(&self, conversation: &Conversation) -> Result<()> {
        let body = serde_json::to_value(conversation)?;

        for owner in conversation.participants() {
            let path = paths::conversation(owner, &conversation.conversation_id);
            with_retry(&self.policy, "conversations.set", || {
                self.remote.set(&path, body.clone())
            })
            .await?;
        }

        if let Err(e) = self.database.upsert_conversation(conversation) {
            tracing::warn!(conversation_id = %conversation.conversation_id, "Failed to cache conversation: {}", e);
        }
        Ok(())
    }

    /// Set `sender_id`'s typing flag on both mirrors.
    ///
    /// Both mirrors get the identical nested write `typing.{sender_id}`.
    /// Both are attempted even if the first fails; the first error is
    /// returned.
    pub async fn update_typing_status(
        &self,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        is_typing: bool,
    ) -> Result<()> {
        let update = fields([(format!("typing.{}", sender_id), json!(is_typing))]);
        let mut first_error = None;

        for owner in [sender_id, receiver_id] {
            let path = paths::conversation(owner, conversation_id);
            let result = with_retry(&self.policy, "conversations.update", || {
                self.remote.update(&path, update.clone())
            })
            .await;
            if let Err(e) = result {
                tracing::warn!(conversation_id, owner, "Typing update failed: {}", e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        if let Ok(Some(mut cached)) = self.database.get_conversation(conversation_id) {
            cached.typing.insert(sender_id.to_string(), is_typing);
            if let Err(e) = self.database.upsert_conversation(&cached) {
                tracing::warn!(conversation_id, "Failed to cache typing state: {}", e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Decode a snapshot, cache it and order it for display
    fn absorb(&self, user_id: &str, docs: &[Document]) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> = docs
            .iter()
            .filter_map(|doc| match doc.decode::<Conversation>() {
                Ok(conversation) => Some(conversation),
                Err(e) => {
                    tracing::warn!(user_id, "Skipping malformed conversation: {}", e);
                    None
                }
            })
            .collect();

        for conversation in &conversations {
            if let Err(e) = self.database.upsert_conversation(conversation) {
                tracing::warn!(user_id, "Failed to cache conversation: {}", e);
            }
        }

        conversations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        conversations
    }
}

fn pair_query(collection: &str, user_id1: &str, user_id2: &str) -> Query {
    Query::collection(collection)
        .where_eq("userId1", user_id1)
        .where_eq("userId2", user_id2)
        .limit(1)
}

fn first_conversation(docs: &[Document]) -> Result<Option<Conversation>> {
    docs.first().map(|doc| doc.decode::<Conversation>()).transpose()
}

// ============================================================================
// TESTS
// ============================================================================
