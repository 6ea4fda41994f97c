//! # Murmur Core
//!
//! Synchronization core of a one-to-one chat client whose source of truth
//! is a hosted document store. Every read is served from a local SQLite
//! cache; every write lands there first and is reconciled with the remote
//! store in the background.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         MURMUR CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │  Identity   │  │   Profile   │  │  Contacts   │  │  Messaging   │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - Handles   │  │ - Users     │  │ - Lookup    │  │ - Messages   │   │
//! │  │ - Auth      │  │ - Presence  │  │ - Stream    │  │ - Convos     │   │
//! │  │ - Profile   │  │ - Accounts  │  │             │  │ - Typing     │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────┬───────┘   │
//! │         │                │                │                │           │
//! │         └────────────────┴────────────────┴────────────────┘           │
//! │                                   │                                     │
//! │  ┌─────────────┐  ┌─────────────┐ │ ┌─────────────────────────────────┐│
//! │  │    Sync     │  │   Storage   │ │ │            Remote               ││
//! │  │             │  │             │ │ │                                 ││
//! │  │ - Send      │  │ - SQLite    │◄┘ │ - Document store trait          ││
//! │  │ - Reconcile │  │ - Change    │   │ - Listeners                     ││
//! │  │ - Signals   │  │   feed      │   │ - Timeout + retry               ││
//! │  └─────────────┘  └─────────────┘   └─────────────────────────────────┘│
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - TOML configuration
//! - [`identity`] - Handles, user records, authentication seam
//! - [`storage`] - Local SQLite cache with a change feed
//! - [`remote`] - Remote document store abstraction and in-memory backend
//! - [`profile`] - User profile repository and presence
//! - [`contacts`] - Contact lookup by handle
//! - [`messaging`] - Messages, conversations and their repositories
//! - [`sync`] - Optimistic send and local/remote reconciliation
//! - [`notifications`] - Presence-gated push dispatch
//! - [`notice`] - User-facing error channel

#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod contacts;
pub mod error;
pub mod identity;
pub mod logging;
pub mod messaging;
pub mod notice;
pub mod notifications;
pub mod profile;
pub mod remote;
pub mod storage;
pub mod sync;
/// Sortable timestamps.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::CoreConfig;
pub use error::{Error, Result};
pub use identity::{hash, HandleHash, User};
pub use messaging::{Conversation, Message, MessageDraft};
pub use sync::{MessageFeed, RemoteStatus, SendReceipt};

// ============================================================================
// CLIENT
// ============================================================================

use std::sync::Arc;

use tokio::task::JoinHandle;

use contacts::ContactRepository;
use identity::{AuthProvider, PresenceStatus};
use messaging::{ConversationRepository, ParticipantSnapshot, UpsertOutcome};
use notice::ErrorChannel;
use notifications::{DispatchOutcome, NotificationDispatcher, PushTransport};
use profile::{PresenceUpdate, ProfileRepository};
use remote::RemoteStore;
use storage::Database;
use sync::SyncCore;

/// Title used when the sender has no display name
const FALLBACK_NOTIFICATION_TITLE: &str = "New message";

/// Everything `send_message` did
#[derive(Debug)]
pub struct SendReport {
    pub receipt: SendReceipt,
    /// Conversation upsert, attempted only after a confirmed remote send
    pub conversation: Option<Result<UpsertOutcome>>,
    /// Background push dispatch, started only after a confirmed remote send
    pub notification: Option<JoinHandle<DispatchOutcome>>,
}

/// The chat client: one instance per signed-in process.
///
/// ## Wiring
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                          CHAT CLIENT                                    │
/// ├─────────────────────────────────────────────────────────────────────────┤
/// │                                                                         │
/// │   Arc<Database> ─────┐                                                  │
/// │   Arc<dyn RemoteStore> ──┬──► ProfileRepository                         │
/// │   Arc<dyn AuthProvider> ─┤    ContactRepository                         │
/// │   Arc<dyn PushTransport> ┤    ConversationRepository                    │
/// │   CoreConfig ────────────┘    SyncCore ──► MessageRepository           │
/// │                               NotificationDispatcher                   │
/// │                                      │                                  │
/// │                                      ▼                                  │
/// │                               ErrorChannel (shared)                     │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub struct ChatClient {
    database: Arc<Database>,
    auth: Arc<dyn AuthProvider>,
    profiles: ProfileRepository,
    contacts: ContactRepository,
    conversations: ConversationRepository,
    sync: SyncCore,
    notifications: NotificationDispatcher,
    errors: ErrorChannel,
}

impl ChatClient {
    /// Open the local database named by `config` and wire the client.
    pub async fn open(
        config: CoreConfig,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        transport: Arc<dyn PushTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let database = Arc::new(Database::open(config.database_path.as_deref()).await?);
        tracing::info!(
            persistent = config.database_path.is_some(),
            "Chat client opened"
        );
        Ok(Self::with_database(config, database, remote, auth, transport))
    }

    /// Wire the client around an already open database.
    pub fn with_database(
        config: CoreConfig,
        database: Arc<Database>,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        let policy = config.retry_policy();
        let errors = ErrorChannel::new();

        Self {
            profiles: ProfileRepository::new(remote.clone(), database.clone(), auth.clone(), policy),
            contacts: ContactRepository::new(remote.clone(), database.clone(), policy),
            conversations: ConversationRepository::new(
                remote.clone(),
                database.clone(),
                policy,
                config.stream_retry_limit,
            ),
            sync: SyncCore::new(database.clone(), remote.clone(), errors.clone(), &config),
            notifications: NotificationDispatcher::new(remote, transport, policy),
            database,
            auth,
            errors,
        }
    }

    /// The local cache
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn profiles(&self) -> &ProfileRepository {
        &self.profiles
    }

    pub fn contacts(&self) -> &ContactRepository {
        &self.contacts
    }

    pub fn conversations(&self) -> &ConversationRepository {
        &self.conversations
    }

    pub fn sync(&self) -> &SyncCore {
        &self.sync
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    /// Shared channel feeding the user-visible error notice
    pub fn errors(&self) -> &ErrorChannel {
        &self.errors
    }

    // ========================================================================
    // MESSAGING
    // ========================================================================

    /// Send a message from `sender_id` to `receiver_id`.
    ///
    /// The message is stored locally and pushed to both mirrors. Once the
    /// remote write is confirmed, the conversation summary is upserted for
    /// both participants and a push is dispatched in the background.
    pub async fn send_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        draft: MessageDraft,
    ) -> Result<SendReport> {
        let receipt = self.sync.send(sender_id, receiver_id, draft).await?;

        if !receipt.is_confirmed() {
            return Ok(SendReport {
                receipt,
                conversation: None,
                notification: None,
            });
        }

        let sender = self.snapshot(sender_id).await;
        let receiver = self.snapshot(receiver_id).await;
        let preview = receipt.message.preview();

        let conversation = self
            .conversations
            .upsert_conversation_for_pair(&sender, &receiver, &preview)
            .await;
        if let Err(e) = &conversation {
            self.errors.raise(e);
        }

        let title = if sender.display_name.is_empty() {
            FALLBACK_NOTIFICATION_TITLE
        } else {
            sender.display_name.as_str()
        };
        let notification = self.notifications.dispatch(
            receiver_id,
            title,
            &preview,
            receipt.message.image_url.as_deref(),
        );

        Ok(SendReport {
            receipt,
            conversation: Some(conversation),
            notification: Some(notification),
        })
    }

    /// Live history of the pair as seen by `owner_id`
    pub fn get_messages(&self, owner_id: &str, other_id: &str) -> MessageFeed {
        self.sync.get_messages(owner_id, other_id)
    }

    /// Flip the read flag of a message on both mirrors and locally
    pub async fn mark_read(&self, owner_id: &str, other_id: &str, message_id: &str) -> Result<bool> {
        self.sync
            .messages()
            .mark_read(owner_id, other_id, message_id, true)
            .await
    }

    /// Delete a message from both mirrors and the local store
    pub async fn delete_message(&self, owner_id: &str, other_id: &str, message_id: &str) -> Result<()> {
        let result = self.sync.messages().delete(owner_id, other_id, message_id).await;
        if let Err(e) = &result {
            self.errors.raise(e);
        }
        result
    }

    /// Publish `sender_id`'s typing state on the conversation
    pub async fn set_typing(
        &self,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        is_typing: bool,
    ) -> Result<()> {
        self.conversations
            .update_typing_status(conversation_id, sender_id, receiver_id, is_typing)
            .await
    }

    // ========================================================================
    // PRESENCE
    // ========================================================================

    /// Mark the signed-in user online
    pub async fn go_online(&self) -> Result<PresenceUpdate> {
        self.set_presence(PresenceStatus::Online).await
    }

    /// Mark the signed-in user offline
    pub async fn go_offline(&self) -> Result<PresenceUpdate> {
        self.set_presence(PresenceStatus::Offline).await
    }

    async fn set_presence(&self, status: PresenceStatus) -> Result<PresenceUpdate> {
        let Some(user) = self.auth.current_user() else {
            return Ok(PresenceUpdate::Skipped);
        };
        self.profiles.update_online_status(&user.uid, status).await
    }

    async fn snapshot(&self, user_id: &str) -> ParticipantSnapshot {
        match self.profiles.get_current_user(Some(user_id)).await {
            Some(user) => ParticipantSnapshot::from(&user),
            None => ParticipantSnapshot::unknown(user_id),
        }
    }
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the crate version
pub fn version() -> &'static str {
    VERSION
}

// ============================================================================
// TESTS
// ============================================================================
