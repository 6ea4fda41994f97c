//! # Contacts
//!
//! Contact lists keyed by handle. A user shares their handle
//! (`hash(userId)`) out-of-band; the other side resolves it to a profile and
//! stores a snapshot of that profile under
//! `Contacts/{ownerId}/UserContacts/{autoId}`.
//!
//! ## Add Contact Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ADD CONTACT FLOW                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  candidate id ──► hash() ──► users where hashUserId == handle          │
//! │                                   │                                     │
//! │                     ┌─────────────┼──────────────┐                      │
//! │                     ▼             ▼              ▼                      │
//! │                 no match      self match     found user                │
//! │                 → false       → false            │                      │
//! │                                                  ▼                      │
//! │                                   already a contact? ── yes ──► true   │
//! │                                                  │ no                   │
//! │                                                  ▼                      │
//! │                                   write snapshot, cache locally → true │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::{hash, User};
use crate::remote::{paths, with_retry, Document, Query, RemoteStore, RetryPolicy, Source};
use crate::storage::Database;

/// A contact snapshot owned by `owner_id`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Contact {
    pub owner_id: String,
    pub contact_user_id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub email: String,
}

impl Contact {
    /// Snapshot `user` as a contact of `owner_id`
    pub fn from_user(owner_id: &str, user: &User) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            contact_user_id: user.user_id.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
            email: user.email.clone(),
        }
    }
}

/// Contact repository
#[derive(Clone)]
pub struct ContactRepository {
    remote: Arc<dyn RemoteStore>,
    database: Arc<Database>,
    policy: RetryPolicy,
}

impl ContactRepository {
    pub fn new(remote: Arc<dyn RemoteStore>, database: Arc<Database>, policy: RetryPolicy) -> Self {
        Self {
            remote,
            database,
            policy,
        }
    }

    /// Live contact set of `owner_id`.
    ///
    /// Each remote snapshot is cached locally and yielded. Dropping the
    /// stream detaches the remote listener. A listener error ends the stream.
    pub fn stream_contacts(&self, owner_id: &str) -> impl Stream<Item = Vec<Contact>> + Send + 'static {
        let remote = self.remote.clone();
        let database = self.database.clone();
        let policy = self.policy;
        let owner_id = owner_id.to_string();

        async_stream::stream! {
            let query = Query::collection(paths::contacts(&owner_id));
            let attach = with_retry(&policy, "contacts.listen", || remote.listen(query.clone())).await;
            let mut registration = match attach {
                Ok(registration) => registration,
                Err(e) => {
                    tracing::warn!(owner_id = %owner_id, "Contacts listener failed to attach: {}", e);
                    return;
                }
            };

            while let Some(snapshot) = registration.next().await {
                let docs = match snapshot {
                    Ok(docs) => docs,
                    Err(e) => {
                        tracing::warn!(owner_id = %owner_id, "Contacts listener failed: {}", e);
                        break;
                    }
                };

                let contacts = decode_contacts(&docs);
                if let Err(e) = database.replace_contacts(&owner_id, &contacts) {
                    tracing::warn!(owner_id = %owner_id, "Failed to cache contacts: {}", e);
                }
                yield contacts;
            }
        }
    }

    /// Cached contacts, for offline display
    pub fn local_contacts(&self, owner_id: &str) -> Result<Vec<Contact>> {
        self.database.get_contacts(owner_id)
    }

    /// Resolve `candidate_id` by handle and add it to `owner_id`'s contacts.
    ///
    /// Returns false when the handle matches nobody, matches the owner, or
    /// the lookup fails. Returns true when the contact exists afterwards,
    /// including when it already existed.
    pub async fn resolve_and_add_contact(&self, owner_id: &str, candidate_id: &str) -> bool {
        match self.try_add_contact(owner_id, candidate_id).await {
            Ok(added) => added,
            Err(Error::CannotAddSelf) => {
                tracing::debug!(owner_id, "Refusing to add self as contact");
                false
            }
            Err(e) => {
                tracing::warn!(owner_id, "Contact lookup failed: {}", e);
                false
            }
        }
    }

    async fn try_add_contact(&self, owner_id: &str, candidate_id: &str) -> Result<bool> {
        let handle = hash(candidate_id);
        let lookup = Query::collection(paths::USERS)
            .where_eq("hashUserId", handle.as_str())
            .limit(1);

        let found = with_retry(&self.policy, "users.query", || {
            self.remote.query(&lookup, Source::Server)
        })
        .await?;

        let Some(doc) = found.first() else {
            tracing::debug!(owner_id, handle = %handle, "No user for handle");
            return Ok(false);
        };
        let user: User = doc.decode()?;

        if user.user_id == owner_id {
            return Err(Error::CannotAddSelf);
        }

        let existing = Query::collection(paths::contacts(owner_id))
            .where_eq("contactUserId", user.user_id.as_str())
            .limit(1);
        let already = with_retry(&self.policy, "contacts.query", || {
            self.remote.query(&existing, Source::Server)
        })
        .await?;

        let contact = Contact::from_user(owner_id, &user);
        if already.is_empty() {
            let path = paths::contact(owner_id, &paths::new_document_id());
            let body = serde_json::to_value(&contact)?;
            with_retry(&self.policy, "contacts.set", || self.remote.set(&path, body.clone())).await?;
            tracing::info!(owner_id, contact_id = %user.user_id, "Contact added");
        } else {
            tracing::debug!(owner_id, contact_id = %user.user_id, "Contact already present");
        }

        if let Err(e) = self.database.insert_contact(&contact) {
            tracing::warn!(owner_id, "Failed to cache contact: {}", e);
        }
        Ok(true)
    }
}

fn decode_contacts(docs: &[Document]) -> Vec<Contact> {
    docs.iter()
        .filter_map(|doc| match doc.decode::<Contact>() {
            Ok(contact) => Some(contact),
            Err(e) => {
                tracing::warn!("Skipping malformed contact {}: {}", doc.path, e);
                None
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, RemoteOp};
    use futures::StreamExt;
    use std::time::Duration;

    async fn setup() -> (ContactRepository, MemoryRemoteStore, Arc<Database>) {
        let remote = MemoryRemoteStore::new();
        let database = Arc::new(Database::open(None).await.unwrap());
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        };
        let repo = ContactRepository::new(Arc::new(remote.clone()), database.clone(), policy);
        (repo, remote, database)
    }

    async fn seed_user(remote: &MemoryRemoteStore, id: &str, name: &str) {
        let user = User::new(id, name);
        remote
            .set(&paths::user(id), serde_json::to_value(&user).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_contact_by_handle() {
        let (repo, remote, database) = setup().await;
        seed_user(&remote, "u2", "Bob").await;

        assert!(repo.resolve_and_add_contact("u1", "u2").await);

        let stored = remote.server_collection(&paths::contacts("u1"));
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].data["contactUserId"], "u2");
        assert_eq!(stored[0].data["displayName"], "Bob");
        assert_eq!(database.get_contacts("u1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_contact_is_not_duplicated() {
        let (repo, remote, _) = setup().await;
        seed_user(&remote, "u2", "Bob").await;

        assert!(repo.resolve_and_add_contact("u1", "u2").await);
        assert!(repo.resolve_and_add_contact("u1", "u2").await);
        assert_eq!(remote.server_collection(&paths::contacts("u1")).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_self_and_failing_lookups() {
        let (repo, remote, _) = setup().await;
        seed_user(&remote, "u1", "Alice").await;

        assert!(!repo.resolve_and_add_contact("u1", "nobody").await);
        assert!(!repo.resolve_and_add_contact("u1", "u1").await);

        remote.inject_failure(RemoteOp::Query, Error::PermissionDenied("users".into()), 1);
        seed_user(&remote, "u3", "Carol").await;
        assert!(!repo.resolve_and_add_contact("u1", "u3").await);
        assert!(remote.server_collection(&paths::contacts("u1")).is_empty());
    }

    #[tokio::test]
    async fn test_stream_emits_and_caches() {
        let (repo, remote, database) = setup().await;
        seed_user(&remote, "u2", "Bob").await;

        let mut stream = Box::pin(repo.stream_contacts("u1"));
        assert!(stream.next().await.unwrap().is_empty());

        assert!(repo.resolve_and_add_contact("u1", "u2").await);
        let contacts = stream.next().await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(database.get_contacts("u1").unwrap(), contacts);
    }

    #[tokio::test]
    async fn test_dropping_stream_detaches_listener_once() {
        let (repo, remote, _) = setup().await;

        let mut stream = Box::pin(repo.stream_contacts("u1"));
        stream.next().await.unwrap();
        assert_eq!(remote.active_listeners(), 1);

        drop(stream);
        assert_eq!(remote.active_listeners(), 0);
        assert_eq!(remote.attach_count(), 1);
        assert_eq!(remote.detach_count(), 1);
    }

    #[tokio::test]
    async fn test_stalled_attach_ends_stream() {
        let remote = MemoryRemoteStore::new();
        let database = Arc::new(Database::open(None).await.unwrap());
        let policy = RetryPolicy {
            timeout: Duration::from_millis(20),
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        };
        let repo = ContactRepository::new(Arc::new(remote.clone()), database, policy);
        remote.stall(RemoteOp::Listen);

        let mut stream = Box::pin(repo.stream_contacts("u1"));
        let end = tokio::time::timeout(Duration::from_secs(2), stream.next()).await;
        assert_eq!(end.unwrap(), None);
    }

    #[tokio::test]
    async fn test_listener_error_ends_stream() {
        let (repo, remote, _) = setup().await;

        let mut stream = Box::pin(repo.stream_contacts("u1"));
        stream.next().await.unwrap();
        remote.fail_listeners(&paths::contacts("u1"), Error::PermissionDenied("contacts".into()));

        assert!(stream.next().await.is_none());
        assert_eq!(remote.detach_count(), 1);
    }
}
