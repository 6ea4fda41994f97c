//! # User Profile
//!
//! The `users/{userId}` record and its validation rules.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          USER RECORD                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  userId       stable, opaque (from the auth provider)                  │
//! │  displayName  1-64 characters                                          │
//! │  email        copied from the auth provider                            │
//! │  avatarUrl    may be blank; repaired on account creation               │
//! │  nickname     0-64 characters                                          │
//! │  bio          0-256 characters                                         │
//! │  dateOfBirth  free-form                                                │
//! │  status       "online" | "offline"                                     │
//! │  hashUserId   always hash(userId), recomputed if absent                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use super::handle::hash;
use crate::error::{Error, Result};

/// Maximum length for display name
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Maximum length for nickname
pub const MAX_NICKNAME_LENGTH: usize = 64;

/// Maximum length for bio
pub const MAX_BIO_LENGTH: usize = 256;

/// Maximum length for an avatar URL
pub const MAX_AVATAR_URL_LENGTH: usize = 2048;

/// Presence field of a user record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    #[default]
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        }
    }
}

/// A user's profile record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    pub avatar_url: String,
    pub nickname: String,
    pub bio: String,
    pub date_of_birth: String,
    pub status: PresenceStatus,
    pub hash_user_id: String,
}

impl User {
    /// A fresh record with its handle already derived
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let mut user = Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            ..Default::default()
        };
        user.ensure_handle();
        user
    }

    /// Recompute `hash_user_id` if it is missing or stale.
    /// Returns true when the field changed.
    pub fn ensure_handle(&mut self) -> bool {
        let expected = hash(&self.user_id).into_string();
        if self.hash_user_id == expected {
            return false;
        }
        self.hash_user_id = expected;
        true
    }

    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }

    pub fn has_avatar(&self) -> bool {
        !self.avatar_url.trim().is_empty()
    }

    /// Validate the record before it is written
    pub fn validate(&self) -> Result<()> {
        if self.user_id.is_empty() {
            return Err(Error::Validation("User id cannot be empty".into()));
        }

        if self.display_name.trim().is_empty() {
            return Err(Error::ProfileUpdateFailed(
                "Display name cannot be empty".into(),
            ));
        }
        check_len("Display name", &self.display_name, MAX_DISPLAY_NAME_LENGTH)?;
        check_len("Nickname", &self.nickname, MAX_NICKNAME_LENGTH)?;
        check_len("Bio", &self.bio, MAX_BIO_LENGTH)?;
        check_len("Avatar URL", &self.avatar_url, MAX_AVATAR_URL_LENGTH)?;

        Ok(())
    }

    /// Apply a partial edit, validating the touched field
    pub fn apply(&mut self, update: ProfileUpdate) -> Result<()> {
        match update {
            ProfileUpdate::DisplayName(name) => {
                if name.trim().is_empty() {
                    return Err(Error::ProfileUpdateFailed(
                        "Display name cannot be empty".into(),
                    ));
                }
                check_len("Display name", &name, MAX_DISPLAY_NAME_LENGTH)?;
                self.display_name = name;
            }
            ProfileUpdate::Nickname(nickname) => {
                check_len("Nickname", &nickname, MAX_NICKNAME_LENGTH)?;
                self.nickname = nickname;
            }
            ProfileUpdate::Bio(bio) => {
                check_len("Bio", &bio, MAX_BIO_LENGTH)?;
                self.bio = bio;
            }
            ProfileUpdate::DateOfBirth(date) => {
                self.date_of_birth = date;
            }
            ProfileUpdate::Avatar(url) => {
                check_len("Avatar URL", &url, MAX_AVATAR_URL_LENGTH)?;
                self.avatar_url = url;
            }
        }
        Ok(())
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(Error::ProfileUpdateFailed(format!(
            "{} too long: max {} characters",
            field, max
        )));
    }
    Ok(())
}

/// A partial update to a user's profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileUpdate {
    DisplayName(String),
    Nickname(String),
    Bio(String),
    DateOfBirth(String),
    /// Empty string clears the avatar
    Avatar(String),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_user_has_handle() {
        let user = User::new("u1", "Alice");
        assert_eq!(user.hash_user_id, hash("u1").into_string());
        assert_eq!(user.status, PresenceStatus::Offline);
    }

    #[test]
    fn test_ensure_handle_backfills_once() {
        let mut user = User {
            user_id: "u1".into(),
            display_name: "Alice".into(),
            ..Default::default()
        };
        assert!(user.ensure_handle());
        assert!(!user.ensure_handle());
    }

    #[test]
    fn test_wire_shape() {
        let user = User::new("u1", "Alice");
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["displayName"], "Alice");
        assert_eq!(value["status"], "offline");
        assert!(value.get("hashUserId").is_some());
    }

    #[test]
    fn test_decode_sparse_document() {
        let user: User = serde_json::from_value(json!({
            "userId": "u2",
            "status": "online"
        }))
        .unwrap();
        assert!(user.is_online());
        assert!(user.hash_user_id.is_empty());
        assert!(!user.has_avatar());
    }

    #[test]
    fn test_validate_rejects_empty_and_long_names() {
        assert!(User::new("u1", "").validate().is_err());
        let long = "a".repeat(MAX_DISPLAY_NAME_LENGTH + 1);
        assert!(User::new("u1", long).validate().is_err());
        assert!(User::new("u1", "Alice").validate().is_ok());
    }

    #[test]
    fn test_apply_updates() {
        let mut user = User::new("u1", "Alice");
        user.apply(ProfileUpdate::DisplayName("Bob".into())).unwrap();
        user.apply(ProfileUpdate::Bio("hello".into())).unwrap();
        assert_eq!(user.display_name, "Bob");
        assert_eq!(user.bio, "hello");

        let err = user
            .apply(ProfileUpdate::Bio("x".repeat(MAX_BIO_LENGTH + 1)))
            .unwrap_err();
        assert_eq!(err.code(), 201);
        assert_eq!(user.bio, "hello");
    }
}
