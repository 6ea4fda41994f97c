//! # Database Schema
//!
//! SQL schema for the local cache.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────────────┐   ┌──────────────┐ │
//! │  │     users       │   │      conversations       │   │   messages   │ │
//! │  ├─────────────────┤   ├──────────────────────────┤   ├──────────────┤ │
//! │  │ id (PK)         │   │ conversation_id (PK)     │   │ id (PK)      │ │
//! │  │ display_name    │   │ user_id1, user_id2       │   │ conv_id (ix) │ │
//! │  │ hash_user_id(ix)│   │ last_message, timestamp  │   │ user_id1/2   │ │
//! │  │ status ...      │   │ names/avatars/typing JSON│   │ text ...     │ │
//! │  └─────────────────┘   └────────────┬─────────────┘   │ is_read      │ │
//! │                                     │                 │ loading      │ │
//! │  ┌─────────────────┐   ┌────────────▼─────────────┐   └──────────────┘ │
//! │  │    contacts     │   │ conversation_participants│                    │
//! │  ├─────────────────┤   ├──────────────────────────┤                    │
//! │  │ owner_id    (PK)│   │ conversation_id     (PK) │                    │
//! │  │ contact_user(PK)│   │ user_id         (PK, ix) │                    │
//! │  └─────────────────┘   └──────────────────────────┘                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Cached user profiles
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL DEFAULT '',
    avatar_url TEXT NOT NULL DEFAULT '',
    nickname TEXT NOT NULL DEFAULT '',
    bio TEXT NOT NULL DEFAULT '',
    date_of_birth TEXT NOT NULL DEFAULT '',
    -- 'online' | 'offline'
    status TEXT NOT NULL DEFAULT 'offline',
    -- hex sha256 of id
    hash_user_id TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_users_hash ON users(hash_user_id);

-- Contacts, one row per (owner, contact) pair
CREATE TABLE IF NOT EXISTS contacts (
    owner_id TEXT NOT NULL,
    contact_user_id TEXT NOT NULL,
    display_name TEXT NOT NULL DEFAULT '',
    avatar_url TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    PRIMARY KEY (owner_id, contact_user_id)
);

-- Conversation summaries
CREATE TABLE IF NOT EXISTS conversations (
    conversation_id TEXT PRIMARY KEY,
    user_id1 TEXT NOT NULL,
    user_id2 TEXT NOT NULL,
    last_message TEXT NOT NULL DEFAULT '',
    timestamp TEXT NOT NULL DEFAULT '',
    -- JSON objects keyed by participant id
    participant_names TEXT NOT NULL DEFAULT '{}',
    participant_avatars TEXT NOT NULL DEFAULT '{}',
    typing TEXT NOT NULL DEFAULT '{}'
);

-- Participant lookup for conversations
CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (conversation_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_participants_user ON conversation_participants(user_id);

-- Messages, keyed by message id
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    -- sender
    user_id1 TEXT NOT NULL,
    -- receiver
    user_id2 TEXT NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    image_url TEXT,
    voice_note_url TEXT,
    voice_note_duration INTEGER,
    -- sortable UTC string
    timestamp TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    is_typing INTEGER NOT NULL DEFAULT 0,
    -- 1 until the remote write is confirmed
    loading INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(user_id1, user_id2, timestamp);
"#;
