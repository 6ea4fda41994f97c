//! Authentication provider seam.
//!
//! The sign-in flow itself lives outside this crate. Repositories only need
//! to know who is signed in and what the provider knows about them.

use parking_lot::RwLock;

/// Sentinel id used when nobody is signed in
pub const GUEST_ID: &str = "guest";

/// What the authentication backend reports about the signed-in user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}

/// Source of the currently authenticated user
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;

    /// Effective id: `explicit`, else the signed-in user, else [`GUEST_ID`]
    fn resolve_uid(&self, explicit: Option<&str>) -> String {
        match explicit {
            Some(uid) if !uid.is_empty() => uid.to_string(),
            _ => self
                .current_user()
                .map(|u| u.uid)
                .unwrap_or_else(|| GUEST_ID.to_string()),
        }
    }
}

/// In-process provider whose user is set directly by the host
#[derive(Debug, Default)]
pub struct StaticAuth {
    user: RwLock<Option<AuthUser>>,
}

impl StaticAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user: AuthUser) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn sign_in(&self, user: AuthUser) {
        tracing::info!(user_id = %user.uid, "Signed in");
        *self.user.write() = Some(user);
    }

    pub fn sign_out(&self) {
        if let Some(user) = self.user.write().take() {
            tracing::info!(user_id = %user.uid, "Signed out");
        }
    }
}

impl AuthProvider for StaticAuth {
    fn current_user(&self) -> Option<AuthUser> {
        self.user.read().clone()
    }
}
