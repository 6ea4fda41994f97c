//! # Messaging Module
//!
//! One-to-one conversations: message records, conversation summaries, and
//! the repositories that keep their remote mirrors in shape.
//!
//! ## Remote Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         MIRRORED DOCUMENTS                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Alice (u1)                              Bob (u2)                       │
//! │  ──────────                              ────────                       │
//! │  conversations/u1/messages/{cid}   ══    conversations/u2/messages/{cid}│
//! │      lastMessage, timestamp,              identical body               │
//! │      participantNames/Avatars,                                          │
//! │      typing { u1: bool, u2: bool }                                      │
//! │                                                                         │
//! │  messages/u1/u2/{mid}              ══    messages/u2/u1/{mid}           │
//! │      one document per message             identical body               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The local copy of every message lives in [`crate::storage::Database`],
//! keyed by message id; [`crate::sync`] keeps it in step with the mirrors.

mod conversation;
mod model;
mod repository;

pub use conversation::{ConversationRepository, UpsertOutcome};
pub use model::{
    pair_key, Conversation, Message, MessageDraft, ParticipantSnapshot, IMAGE_PREVIEW,
    VOICE_NOTE_PREVIEW,
};
pub use repository::MessageRepository;
pub(crate) use repository::decode_messages;
