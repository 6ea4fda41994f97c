//! # Database
//!
//! SQLite wrapper for the local cache, with a change feed.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DATABASE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │  Repositories   │                                                   │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐        ┌──────────────────────┐                   │
//! │  │    Database     │──────► │ broadcast<StoreChange>│──► reactive      │
//! │  │   (this file)   │ every  └──────────────────────┘    queries        │
//! │  │                 │ mutation                                          │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │   SQLite DB     │  - In-memory for tests                            │
//! │  │                 │  - File for production                            │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::broadcast;

use super::schema;
use crate::contacts::Contact;
use crate::error::{Error, Result};
use crate::identity::{PresenceStatus, User};
use crate::messaging::{Conversation, Message};

/// Capacity of the change feed. Slow subscribers that fall further behind
/// observe `Lagged` and simply re-query.
const CHANGE_FEED_CAPACITY: usize = 256;

/// What a mutation touched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// Messages exchanged between the two users (either direction)
    Messages { user_a: String, user_b: String },
    /// Conversations visible to these participants
    Conversations { participants: Vec<String> },
    /// Contacts of an owner
    Contacts { owner_id: String },
    /// A user profile
    User { user_id: String },
    /// Everything was wiped
    Cleared,
}

impl StoreChange {
    /// Whether this change can affect the message list of the pair `(a, b)`
    pub fn affects_pair(&self, a: &str, b: &str) -> bool {
        match self {
            StoreChange::Messages { user_a, user_b } => {
                (user_a == a && user_b == b) || (user_a == b && user_b == a)
            }
            StoreChange::Cleared => true,
            _ => false,
        }
    }

    /// Whether this change can affect `user_id`'s conversation list
    pub fn affects_conversations_of(&self, user_id: &str) -> bool {
        match self {
            StoreChange::Conversations { participants } => participants.iter().any(|p| p == user_id),
            StoreChange::Cleared => true,
            _ => false,
        }
    }
}

/// The local cache handle
///
/// Shared behind an `Arc` by every repository. All methods are synchronous
/// and short; the connection lock is never held across an await.
pub struct Database {
    /// The underlying SQLite connection
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<StoreChange>,
}

impl Database {
    /// Open or create a database
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub async fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        };

        db.init_schema()?;

        tracing::debug!(path = path.unwrap_or(":memory:"), "Local store opened");
        Ok(db)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;

                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to set schema version: {}", e)))?;

                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::DatabaseError(format!(
                    "Database schema version {} is newer than supported {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Database schema is at version {}", v);
            }
        }

        Ok(())
    }

    /// Subscribe to the change feed
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn publish(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    // ========================================================================
    // USERS
    // ========================================================================

    /// Insert or replace a cached profile
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT OR REPLACE INTO users
                    (id, display_name, email, avatar_url, nickname, bio, date_of_birth, status, hash_user_id, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    user.user_id,
                    user.display_name,
                    user.email,
                    user.avatar_url,
                    user.nickname,
                    user.bio,
                    user.date_of_birth,
                    user.status.as_str(),
                    user.hash_user_id,
                    crate::time::now_timestamp_millis(),
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to store user: {}", e)))?;
        }

        self.publish(StoreChange::User {
            user_id: user.user_id.clone(),
        });
        Ok(())
    }

    /// Get a cached profile
    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, display_name, email, avatar_url, nickname, bio, date_of_birth, status, hash_user_id
             FROM users WHERE id = ?",
            params![id],
            |row| {
                let status: String = row.get(7)?;
                Ok(User {
                    user_id: row.get(0)?,
                    display_name: row.get(1)?,
                    email: row.get(2)?,
                    avatar_url: row.get(3)?,
                    nickname: row.get(4)?,
                    bio: row.get(5)?,
                    date_of_birth: row.get(6)?,
                    status: if status == "online" {
                        PresenceStatus::Online
                    } else {
                        PresenceStatus::Offline
                    },
                    hash_user_id: row.get(8)?,
                })
            },
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to get user: {}", e)))
    }

    // ========================================================================
    // CONTACTS
    // ========================================================================

    /// Insert a contact unless the (owner, contact) pair already exists.
    /// Returns true if a row was added.
    pub fn insert_contact(&self, contact: &Contact) -> Result<bool> {
        let inserted = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT OR IGNORE INTO contacts
                    (owner_id, contact_user_id, display_name, avatar_url, email, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    contact.owner_id,
                    contact.contact_user_id,
                    contact.display_name,
                    contact.avatar_url,
                    contact.email,
                    crate::time::now_timestamp_millis(),
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to store contact: {}", e)))?
        };

        if inserted > 0 {
            self.publish(StoreChange::Contacts {
                owner_id: contact.owner_id.clone(),
            });
        }
        Ok(inserted > 0)
    }

    /// Replace an owner's cached contact set with a fresh snapshot
    pub fn replace_contacts(&self, owner_id: &str, contacts: &[Contact]) -> Result<()> {
        {
            let mut conn = self.conn.lock();
            let tx = conn
                .transaction()
                .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

            tx.execute("DELETE FROM contacts WHERE owner_id = ?", params![owner_id])
                .map_err(|e| Error::DatabaseError(format!("Failed to clear contacts: {}", e)))?;

            for contact in contacts.iter().filter(|c| c.owner_id == owner_id) {
                tx.execute(
                    "INSERT OR IGNORE INTO contacts
                        (owner_id, contact_user_id, display_name, avatar_url, email, created_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        contact.owner_id,
                        contact.contact_user_id,
                        contact.display_name,
                        contact.avatar_url,
                        contact.email,
                        crate::time::now_timestamp_millis(),
                    ],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to store contact: {}", e)))?;
            }

            tx.commit()
                .map_err(|e| Error::DatabaseError(format!("Failed to commit contacts: {}", e)))?;
        }

        self.publish(StoreChange::Contacts {
            owner_id: owner_id.to_string(),
        });
        Ok(())
    }

    /// Contacts of an owner, by display name
    pub fn get_contacts(&self, owner_id: &str) -> Result<Vec<Contact>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT owner_id, contact_user_id, display_name, avatar_url, email
                 FROM contacts WHERE owner_id = ?
                 ORDER BY display_name, contact_user_id",
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![owner_id], |row| {
                Ok(Contact {
                    owner_id: row.get(0)?,
                    contact_user_id: row.get(1)?,
                    display_name: row.get(2)?,
                    avatar_url: row.get(3)?,
                    email: row.get(4)?,
                })
            })
            .map_err(|e| Error::DatabaseError(format!("Failed to query contacts: {}", e)))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::DatabaseError(format!("Failed to read contact: {}", e)))
    }

    // ========================================================================
    // CONVERSATIONS
    // ========================================================================

    /// Insert or replace a conversation summary and its participant rows
    pub fn upsert_conversation(&self, conversation: &Conversation) -> Result<()> {
        let names = serde_json::to_string(&conversation.participant_names)?;
        let avatars = serde_json::to_string(&conversation.participant_avatars)?;
        let typing = serde_json::to_string(&conversation.typing)?;

        {
            let mut conn = self.conn.lock();
            let tx = conn
                .transaction()
                .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

            tx.execute(
                "INSERT OR REPLACE INTO conversations
                    (conversation_id, user_id1, user_id2, last_message, timestamp,
                     participant_names, participant_avatars, typing)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    conversation.conversation_id,
                    conversation.user_id1,
                    conversation.user_id2,
                    conversation.last_message,
                    conversation.timestamp,
                    names,
                    avatars,
                    typing,
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to store conversation: {}", e)))?;

            for participant in conversation.participants() {
                tx.execute(
                    "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id)
                     VALUES (?, ?)",
                    params![conversation.conversation_id, participant],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to store participant: {}", e)))?;
            }

            tx.commit()
                .map_err(|e| Error::DatabaseError(format!("Failed to commit conversation: {}", e)))?;
        }

        self.publish(StoreChange::Conversations {
            participants: vec![conversation.user_id1.clone(), conversation.user_id2.clone()],
        });
        Ok(())
    }

    /// Get a conversation summary by ID
    pub fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT conversation_id, user_id1, user_id2, last_message, timestamp,
                    participant_names, participant_avatars, typing
             FROM conversations WHERE conversation_id = ?",
            params![conversation_id],
            conversation_from_row,
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to get conversation: {}", e)))
    }

    /// Conversations `user_id` takes part in, most recent first
    pub fn get_conversations_for_user(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT c.conversation_id, c.user_id1, c.user_id2, c.last_message, c.timestamp,
                        c.participant_names, c.participant_avatars, c.typing
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.conversation_id
                 WHERE p.user_id = ?
                 ORDER BY c.timestamp DESC",
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![user_id], conversation_from_row)
            .map_err(|e| Error::DatabaseError(format!("Failed to query conversations: {}", e)))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::DatabaseError(format!("Failed to read conversation: {}", e)))
    }

    // ========================================================================
    // MESSAGES
    // ========================================================================

    /// Insert or replace a locally originated message
    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        {
            let conn = self.conn.lock();
            insert_message_with(&conn, "INSERT OR REPLACE", message)
                .map_err(|e| Error::DatabaseError(format!("Failed to store message: {}", e)))?;
        }
        self.publish_pair(message);
        Ok(())
    }

    /// Insert-or-ignore a batch in one transaction. Returns how many rows
    /// were added.
    pub fn insert_messages_if_absent(&self, messages: &[Message]) -> Result<usize> {
        let mut added = Vec::new();
        {
            let mut conn = self.conn.lock();
            let tx = conn
                .transaction()
                .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;
            for message in messages {
                let inserted = insert_message_with(&tx, "INSERT OR IGNORE", message)
                    .map_err(|e| Error::DatabaseError(format!("Failed to store message: {}", e)))?;
                if inserted > 0 {
                    added.push(message);
                }
            }
            tx.commit()
                .map_err(|e| Error::DatabaseError(format!("Failed to commit messages: {}", e)))?;
        }

        let mut pairs: Vec<(&str, &str)> = Vec::new();
        for message in &added {
            let pair = ordered(&message.user_id1, &message.user_id2);
            if !pairs.contains(&pair) {
                pairs.push(pair);
                self.publish_pair(message);
            }
        }
        Ok(added.len())
    }

    /// Get a single message by ID
    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS),
            params![id],
            message_from_row,
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to get message: {}", e)))
    }

    /// Messages exchanged between `a` and `b` in either direction, oldest first
    pub fn get_messages_between(&self, a: &str, b: &str) -> Result<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM messages
                 WHERE (user_id1 = ?1 AND user_id2 = ?2) OR (user_id1 = ?2 AND user_id2 = ?1)
                 ORDER BY timestamp ASC, id ASC",
                MESSAGE_COLUMNS
            ))
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![a, b], message_from_row)
            .map_err(|e| Error::DatabaseError(format!("Failed to query messages: {}", e)))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::DatabaseError(format!("Failed to read message: {}", e)))
    }

    /// Set or clear the unconfirmed-send marker
    pub fn set_message_loading(&self, id: &str, loading: bool) -> Result<bool> {
        self.update_message_flag(id, "loading", loading)
    }

    /// Update the read flag of a message
    pub fn update_read_status(&self, id: &str, is_read: bool) -> Result<bool> {
        self.update_message_flag(id, "is_read", is_read)
    }

    fn update_message_flag(&self, id: &str, column: &'static str, value: bool) -> Result<bool> {
        let (rows, pair) = {
            let conn = self.conn.lock();
            let rows = conn
                .execute(
                    &format!("UPDATE messages SET {} = ? WHERE id = ?", column),
                    params![value, id],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to update message: {}", e)))?;
            let pair: Option<(String, String)> = conn
                .query_row(
                    "SELECT user_id1, user_id2 FROM messages WHERE id = ?",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| Error::DatabaseError(format!("Failed to get message: {}", e)))?;
            (rows, pair)
        };

        if let (true, Some((user_a, user_b))) = (rows > 0, pair) {
            self.publish(StoreChange::Messages { user_a, user_b });
        }
        Ok(rows > 0)
    }

    /// Delete a message. Returns true if a row was removed.
    pub fn delete_message(&self, id: &str) -> Result<bool> {
        let removed = {
            let conn = self.conn.lock();
            let pair: Option<(String, String)> = conn
                .query_row(
                    "SELECT user_id1, user_id2 FROM messages WHERE id = ?",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| Error::DatabaseError(format!("Failed to get message: {}", e)))?;
            conn.execute("DELETE FROM messages WHERE id = ?", params![id])
                .map_err(|e| Error::DatabaseError(format!("Failed to delete message: {}", e)))?;
            pair
        };

        match removed {
            Some((user_a, user_b)) => {
                self.publish(StoreChange::Messages { user_a, user_b });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Wipe every cached row (sign-out)
    pub fn delete_all(&self) -> Result<()> {
        {
            let conn = self.conn.lock();
            conn.execute_batch(
                "DELETE FROM messages;
                 DELETE FROM conversation_participants;
                 DELETE FROM conversations;
                 DELETE FROM contacts;
                 DELETE FROM users;",
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to clear database: {}", e)))?;
        }
        tracing::info!("Local store cleared");
        self.publish(StoreChange::Cleared);
        Ok(())
    }

    fn publish_pair(&self, message: &Message) {
        self.publish(StoreChange::Messages {
            user_a: message.user_id1.clone(),
            user_b: message.user_id2.clone(),
        });
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const MESSAGE_COLUMNS: &str = "id, conversation_id, user_id1, user_id2, text, image_url, \
     voice_note_url, voice_note_duration, timestamp, is_read, is_typing, loading";

fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn insert_message_with(conn: &Connection, verb: &str, message: &Message) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "{} INTO messages ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            verb, MESSAGE_COLUMNS
        ),
        params![
            message.id,
            message.conversation_id,
            message.user_id1,
            message.user_id2,
            message.text,
            message.image_url,
            message.voice_note_url,
            message.voice_note_duration,
            message.timestamp,
            message.is_read,
            message.is_typing,
            message.loading,
        ],
    )
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        user_id1: row.get(2)?,
        user_id2: row.get(3)?,
        text: row.get(4)?,
        image_url: row.get(5)?,
        voice_note_url: row.get(6)?,
        voice_note_duration: row.get(7)?,
        timestamp: row.get(8)?,
        is_read: row.get(9)?,
        is_typing: row.get(10)?,
        loading: row.get(11)?,
    })
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let participant_names: BTreeMap<String, String> = json_column(row, 5)?;
    let participant_avatars: BTreeMap<String, String> = json_column(row, 6)?;
    let typing: BTreeMap<String, bool> = json_column(row, 7)?;

    Ok(Conversation {
        conversation_id: row.get(0)?,
        user_id1: row.get(1)?,
        user_id2: row.get(2)?,
        last_message: row.get(3)?,
        timestamp: row.get(4)?,
        participant_names,
        participant_avatars,
        typing,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessageDraft;

    fn message(id: &str, from: &str, to: &str, text: &str, ts: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            user_id1: from.into(),
            user_id2: to.into(),
            text: text.into(),
            timestamp: ts.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_user_roundtrip() {
        let db = Database::open(None).await.unwrap();
        let mut user = User::new("u1", "Alice");
        user.status = PresenceStatus::Online;
        db.upsert_user(&user).unwrap();

        assert_eq!(db.get_user("u1").unwrap(), Some(user));
        assert!(db.get_user("nobody").unwrap().is_none());
    }

    #[test]
    fn test_open_blocking() {
        let db = tokio_test::block_on(Database::open(None)).unwrap();
        assert!(db.get_messages_between("a", "b").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_messages_keyed_by_id_not_conversation() {
        let db = Database::open(None).await.unwrap();
        db.upsert_message(&message("m1", "u1", "u2", "one", "2024-01-01T00:00:01.000Z"))
            .unwrap();
        db.upsert_message(&message("m2", "u2", "u1", "two", "2024-01-01T00:00:02.000Z"))
            .unwrap();

        let history = db.get_messages_between("u2", "u1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, "m1");
        assert_eq!(history[1].id, "m2");
        assert_eq!(history[0].conversation_id, history[1].conversation_id);
    }

    #[tokio::test]
    async fn test_ordering_by_timestamp() {
        let db = Database::open(None).await.unwrap();
        db.upsert_message(&message("late", "u1", "u2", "b", "2024-01-01T00:00:09.000Z"))
            .unwrap();
        db.upsert_message(&message("early", "u1", "u2", "a", "2024-01-01T00:00:01.000Z"))
            .unwrap();

        let ids: Vec<_> = db
            .get_messages_between("u1", "u2")
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_local_row() {
        let db = Database::open(None).await.unwrap();
        db.upsert_message(&message("m1", "u1", "u2", "local", "t1")).unwrap();

        let added = db
            .insert_messages_if_absent(&[
                message("m1", "u1", "u2", "remote", "t1"),
                message("m2", "u2", "u1", "fill", "t2"),
            ])
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(db.get_message("m1").unwrap().unwrap().text, "local");
        assert_eq!(db.get_message("m2").unwrap().unwrap().text, "fill");
    }

    #[tokio::test]
    async fn test_flags_and_delete() {
        let db = Database::open(None).await.unwrap();
        let mut m = Message::from_draft("u1", "u2", MessageDraft::text("c1", "hi"));
        m.id = "m1".into();
        db.upsert_message(&m).unwrap();
        assert!(db.get_message("m1").unwrap().unwrap().loading);

        assert!(db.set_message_loading("m1", false).unwrap());
        assert!(db.update_read_status("m1", true).unwrap());
        let stored = db.get_message("m1").unwrap().unwrap();
        assert!(!stored.loading);
        assert!(stored.is_read);

        assert!(!db.update_read_status("missing", true).unwrap());
        assert!(db.delete_message("m1").unwrap());
        assert!(!db.delete_message("m1").unwrap());
    }

    #[tokio::test]
    async fn test_conversations_by_participant() {
        let db = Database::open(None).await.unwrap();
        let mut conversation = Conversation {
            conversation_id: "x1".into(),
            user_id1: "u1".into(),
            user_id2: "u2".into(),
            last_message: "hi".into(),
            timestamp: "t1".into(),
            ..Default::default()
        };
        conversation.typing.insert("u1".into(), true);
        db.upsert_conversation(&conversation).unwrap();

        // u10 must not match u1 the way a substring query would
        db.upsert_conversation(&Conversation {
            conversation_id: "x2".into(),
            user_id1: "u10".into(),
            user_id2: "u3".into(),
            ..Default::default()
        })
        .unwrap();

        let mine = db.get_conversations_for_user("u1").unwrap();
        assert_eq!(mine, vec![conversation.clone()]);
        assert_eq!(db.get_conversations_for_user("u2").unwrap().len(), 1);
        assert_eq!(db.get_conversation("x1").unwrap(), Some(conversation));
    }

    #[tokio::test]
    async fn test_contact_pair_is_unique() {
        let db = Database::open(None).await.unwrap();
        let contact = Contact {
            owner_id: "u1".into(),
            contact_user_id: "u2".into(),
            display_name: "Bob".into(),
            ..Default::default()
        };
        assert!(db.insert_contact(&contact).unwrap());
        assert!(!db.insert_contact(&contact).unwrap());
        assert_eq!(db.get_contacts("u1").unwrap().len(), 1);

        db.replace_contacts("u1", &[]).unwrap();
        assert!(db.get_contacts("u1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_feed() {
        let db = Database::open(None).await.unwrap();
        let mut changes = db.subscribe_changes();

        db.upsert_message(&message("m1", "u1", "u2", "hi", "t1")).unwrap();
        let change = changes.recv().await.unwrap();
        assert!(change.affects_pair("u2", "u1"));
        assert!(!change.affects_pair("u1", "u3"));

        db.delete_all().unwrap();
        assert_eq!(changes.recv().await.unwrap(), StoreChange::Cleared);
        assert!(db.get_message("m1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backed_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("murmur.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::open(Some(path)).await.unwrap();
            db.upsert_message(&message("m1", "u1", "u2", "persisted", "t1")).unwrap();
        }

        let db = Database::open(Some(path)).await.unwrap();
        assert_eq!(db.get_message("m1").unwrap().unwrap().text, "persisted");
    }
}
