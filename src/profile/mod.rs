//! # Profile Repository
//!
//! CRUD and presence for `users/{userId}`, mediating the local cache and
//! the remote store.
//!
//! ## Failure Policy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PROFILE OPERATIONS                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Reads (degrade)                     Writes (propagate)                │
//! │  ───────────────                     ──────────────────                │
//! │  get_current_user → None             save_user        → Err            │
//! │  fetch_user       → None             create_new_account → Err          │
//! │  is_online        → false            update_online_status → Err        │
//! │                                        (except permission denied,      │
//! │                                         reported as an outcome)        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## fetch_user
//!
//! ```text
//!   server read ──► found ──► backfill hashUserId if missing ──► cache read
//!        │                                                        (warm)
//!        └──► not found ──► create_new_account ──► cache read
//! ```

use std::sync::Arc;

use serde_json::json;

use crate::error::{Error, Result};
use crate::identity::{AuthProvider, PresenceStatus, ProfileUpdate, User, GUEST_ID};
use crate::remote::{fields, paths, with_retry, RemoteStore, RetryPolicy, Source};
use crate::storage::Database;

/// Fallback display name for accounts whose provider profile has none
pub const DEFAULT_DISPLAY_NAME: &str = "User";

/// Result of a presence write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceUpdate {
    /// The status field was written
    Applied,
    /// Nothing to do (empty user id)
    Skipped,
    /// The remote store refused the write
    PermissionDenied,
}

/// User profile repository
pub struct ProfileRepository {
    remote: Arc<dyn RemoteStore>,
    database: Arc<Database>,
    auth: Arc<dyn AuthProvider>,
    policy: RetryPolicy,
}

impl ProfileRepository {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        database: Arc<Database>,
        auth: Arc<dyn AuthProvider>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            remote,
            database,
            auth,
            policy,
        }
    }

    /// Profile of `uid`, or of the signed-in user when `uid` is None.
    /// The guest sentinel resolves to None without touching the network.
    pub async fn get_current_user(&self, uid: Option<&str>) -> Option<User> {
        let uid = self.auth.resolve_uid(uid);
        if uid == GUEST_ID {
            return None;
        }

        match self.read_user(&uid, Source::Default).await {
            Ok(Some(user)) => {
                self.cache(&user);
                Some(user)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(user_id = %uid, "Remote profile read failed, using local copy: {}", e);
                self.database.get_user(&uid).ok().flatten()
            }
        }
    }

    /// Authoritative profile of the signed-in user, creating the account on
    /// first sight. Any failure yields None.
    pub async fn fetch_user(&self) -> Option<User> {
        match self.try_fetch_user().await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("fetch_user failed: {}", e);
                None
            }
        }
    }

    async fn try_fetch_user(&self) -> Result<Option<User>> {
        let Some(auth_user) = self.auth.current_user() else {
            return Ok(None);
        };
        let uid = auth_user.uid;
        let path = paths::user(&uid);

        match self.read_user(&uid, Source::Server).await? {
            Some(mut user) => {
                if user.ensure_handle() {
                    tracing::debug!(user_id = %uid, "Backfilling hashUserId");
                    let update = fields([("hashUserId", json!(user.hash_user_id))]);
                    with_retry(&self.policy, "users.update", || {
                        self.remote.update(&path, update.clone())
                    })
                    .await?;
                }
            }
            None => {
                tracing::info!(user_id = %uid, "No profile on server, creating account");
                self.create_new_account().await?;
            }
        }

        // Served from the store's warmed cache.
        let user = self.read_user(&uid, Source::Cache).await?;
        if let Some(user) = &user {
            self.cache(user);
        }
        Ok(user)
    }

    /// Make sure the signed-in user has a profile record. Idempotent.
    pub async fn create_new_account(&self) -> Result<User> {
        let auth_user = self.auth.current_user().ok_or(Error::NotAuthenticated)?;
        let uid = auth_user.uid.clone();

        if let Some(mut existing) = self.read_user(&uid, Source::Server).await? {
            let photo = auth_user.photo_url.filter(|p| !p.trim().is_empty());
            if let (false, Some(photo)) = (existing.has_avatar(), photo) {
                tracing::debug!(user_id = %uid, "Repairing blank avatar");
                existing.avatar_url = photo;
                self.save_user(&existing).await?;
            }
            return Ok(existing);
        }

        let email = auth_user.email.unwrap_or_default();
        let display_name = auth_user
            .display_name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| email.split('@').next().filter(|n| !n.is_empty()).map(String::from))
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

        let mut user = User::new(uid.clone(), display_name);
        user.email = email;
        user.avatar_url = auth_user.photo_url.unwrap_or_default();
        user.status = PresenceStatus::Online;

        self.save_user(&user).await?;
        tracing::info!(user_id = %uid, "Account created");
        Ok(user)
    }

    /// Upsert a profile: update when the remote document exists, else set.
    pub async fn save_user(&self, user: &User) -> Result<()> {
        let mut user = user.clone();
        user.ensure_handle();
        user.validate()?;

        let path = paths::user(&user.user_id);
        let body = serde_json::to_value(&user)?;

        let exists = with_retry(&self.policy, "users.get", || {
            self.remote.get(&path, Source::Server)
        })
        .await?
        .is_some();

        if exists {
            let update = match &body {
                serde_json::Value::Object(map) => map.clone(),
                _ => return Err(Error::SerializationError("user is not an object".into())),
            };
            with_retry(&self.policy, "users.update", || {
                self.remote.update(&path, update.clone())
            })
            .await?;
        } else {
            with_retry(&self.policy, "users.set", || self.remote.set(&path, body.clone())).await?;
        }

        self.cache(&user);
        tracing::debug!(user_id = %user.user_id, "Profile saved");
        Ok(())
    }

    /// Apply a partial edit to the signed-in user's profile
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User> {
        let uid = self
            .auth
            .current_user()
            .map(|u| u.uid)
            .ok_or(Error::NotAuthenticated)?;

        let mut user = self
            .read_user(&uid, Source::Server)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(paths::user(&uid)))?;
        user.apply(update)?;
        self.save_user(&user).await?;
        Ok(user)
    }

    /// Write the presence field. Permission failures are reported as
    /// [`PresenceUpdate::PermissionDenied`]; other failures propagate.
    pub async fn update_online_status(
        &self,
        user_id: &str,
        status: PresenceStatus,
    ) -> Result<PresenceUpdate> {
        if user_id.is_empty() {
            return Ok(PresenceUpdate::Skipped);
        }

        let path = paths::user(user_id);
        let update = fields([("status", json!(status.as_str()))]);
        let result = with_retry(&self.policy, "users.update", || {
            self.remote.update(&path, update.clone())
        })
        .await;

        match result {
            Ok(()) => {
                if let Ok(Some(mut cached)) = self.database.get_user(user_id) {
                    cached.status = status;
                    self.cache(&cached);
                }
                tracing::debug!(user_id, status = status.as_str(), "Presence updated");
                Ok(PresenceUpdate::Applied)
            }
            Err(e) if e.is_permission_denied() => {
                tracing::warn!(user_id, "Presence update denied: {}", e);
                Ok(PresenceUpdate::PermissionDenied)
            }
            Err(e) => {
                tracing::error!(user_id, "Presence update failed: {}", e);
                Err(e)
            }
        }
    }

    /// Whether `user_id`'s status field says online. False on any error,
    /// since this only feeds presence display. The push gate keeps its own
    /// read that fails the dispatch instead.
    pub async fn is_online(&self, user_id: &str) -> bool {
        if user_id.is_empty() {
            return false;
        }
        let path = paths::user(user_id);
        let read = with_retry(&self.policy, "users.get", || {
            self.remote.get(&path, Source::Default)
        })
        .await;
        match read {
            Ok(Some(doc)) => {
                doc.field("status").and_then(|s| s.as_str()) == Some(PresenceStatus::Online.as_str())
            }
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(user_id, "Presence read failed: {}", e);
                false
            }
        }
    }

    async fn read_user(&self, uid: &str, source: Source) -> Result<Option<User>> {
        let path = paths::user(uid);
        let doc = with_retry(&self.policy, "users.get", || self.remote.get(&path, source)).await?;
        doc.map(|d| d.decode::<User>()).transpose()
    }

    fn cache(&self, user: &User) {
        if let Err(e) = self.database.upsert_user(user) {
            tracing::warn!(user_id = %user.user_id, "Failed to cache profile: {}", e);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
