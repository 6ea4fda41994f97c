//! Message and conversation records, shared by the local and remote stores.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::User;

/// Preview shown for a message carrying only an image
pub const IMAGE_PREVIEW: &str = "Photo";

/// Preview shown for a message carrying only a voice note
pub const VOICE_NOTE_PREVIEW: &str = "Voice note";

/// A single chat message
///
/// `user_id1` is the sender and `user_id2` the receiver. The same document
/// is mirrored under both participants in the remote store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub user_id1: String,
    pub user_id2: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_note_url: Option<String>,
    /// Voice note length in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_note_duration: Option<i64>,
    /// Sortable UTC timestamp, see [`crate::time::sortable_now`]
    pub timestamp: String,
    pub is_read: bool,
    pub is_typing: bool,
    /// Local-only: the remote write is not confirmed yet
    #[serde(skip)]
    pub loading: bool,
}

impl Message {
    /// Build an unconfirmed message from a validated draft
    pub fn from_draft(sender_id: &str, receiver_id: &str, draft: MessageDraft) -> Self {
        let conversation_id = if draft.conversation_id.is_empty() {
            pair_key(sender_id, receiver_id)
        } else {
            draft.conversation_id
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id,
            user_id1: sender_id.to_string(),
            user_id2: receiver_id.to_string(),
            text: draft.text.trim().to_string(),
            image_url: draft.image_url,
            voice_note_url: draft.voice_note_url,
            voice_note_duration: draft.voice_note_duration,
            timestamp: crate::time::sortable_now(),
            is_read: false,
            is_typing: false,
            loading: true,
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.user_id1
    }

    pub fn receiver_id(&self) -> &str {
        &self.user_id2
    }

    /// Whether the message was exchanged between `a` and `b`, in either direction
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.user_id1 == a && self.user_id2 == b) || (self.user_id1 == b && self.user_id2 == a)
    }

    /// Text used for the conversation summary
    pub fn preview(&self) -> String {
        preview_of(&self.text, self.image_url.as_deref(), self.voice_note_url.as_deref())
    }
}

/// What the caller hands to `send`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageDraft {
    /// Caller-chosen conversation id; derived from the pair when empty
    pub conversation_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub voice_note_url: Option<String>,
    pub voice_note_duration: Option<i64>,
}

impl MessageDraft {
    pub fn text(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_voice_note(mut self, url: impl Into<String>, duration_ms: i64) -> Self {
        self.voice_note_url = Some(url.into());
        self.voice_note_duration = Some(duration_ms);
        self
    }

    fn has_attachment(&self) -> bool {
        self.image_url.as_deref().is_some_and(|u| !u.is_empty())
            || self.voice_note_url.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Reject blank or oversized drafts before any I/O
    pub fn validate(&self, max_bytes: usize) -> Result<()> {
        if self.text.trim().is_empty() && !self.has_attachment() {
            return Err(Error::Validation("Message is blank".into()));
        }
        if self.text.len() > max_bytes {
            return Err(Error::Validation(format!(
                "Message too large: {} bytes (max {})",
                self.text.len(),
                max_bytes
            )));
        }
        Ok(())
    }
}

fn preview_of(text: &str, image_url: Option<&str>, voice_note_url: Option<&str>) -> String {
    let text = text.trim();
    if !text.is_empty() {
        return text.to_string();
    }
    if image_url.is_some_and(|u| !u.is_empty()) {
        return IMAGE_PREVIEW.to_string();
    }
    if voice_note_url.is_some_and(|u| !u.is_empty()) {
        return VOICE_NOTE_PREVIEW.to_string();
    }
    String::new()
}

/// Stable key for an unordered participant pair
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

/// Conversation summary, one mirror per participant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Conversation {
    pub conversation_id: String,
    pub user_id1: String,
    pub user_id2: String,
    pub last_message: String,
    pub timestamp: String,
    pub participant_names: BTreeMap<String, String>,
    pub participant_avatars: BTreeMap<String, String>,
    /// participant id → currently typing
    pub typing: BTreeMap<String, bool>,
}

impl Conversation {
    pub fn participants(&self) -> [&str; 2] {
        [&self.user_id1, &self.user_id2]
    }

    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.user_id1 == a && self.user_id2 == b) || (self.user_id1 == b && self.user_id2 == a)
    }

    /// The participant that is not `me`
    pub fn other_participant(&self, me: &str) -> &str {
        if self.user_id1 == me {
            &self.user_id2
        } else {
            &self.user_id1
        }
    }

    pub fn is_typing(&self, user_id: &str) -> bool {
        self.typing.get(user_id).copied().unwrap_or(false)
    }

    /// Refresh the cached name and avatar of a participant
    pub fn apply_snapshot(&mut self, snapshot: &ParticipantSnapshot) {
        self.participant_names
            .insert(snapshot.user_id.clone(), snapshot.display_name.clone());
        self.participant_avatars
            .insert(snapshot.user_id.clone(), snapshot.avatar_url.clone());
    }
}

/// Name and avatar of a participant at the time of writing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantSnapshot {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: String,
}

impl ParticipantSnapshot {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        avatar_url: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_url: avatar_url.into(),
        }
    }

    /// Placeholder when the profile cannot be resolved
    pub fn unknown(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

impl From<&User> for ParticipantSnapshot {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}
