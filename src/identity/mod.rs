//! # Identity
//!
//! Who a user is: the profile record, the shareable handle derived from the
//! user id, and the seam to the authentication backend.
//!
//! ```text
//!   AuthProvider ──► uid ──► hash(uid) ──► HandleHash (shared out-of-band)
//!                     │
//!                     └────► users/{uid} ──► User
//! ```

mod auth;
mod handle;
mod profile;

pub use auth::{AuthProvider, AuthUser, StaticAuth, GUEST_ID};
pub use handle::{hash, HandleHash};
pub use profile::{
    PresenceStatus, ProfileUpdate, User, MAX_AVATAR_URL_LENGTH, MAX_BIO_LENGTH,
    MAX_DISPLAY_NAME_LENGTH, MAX_NICKNAME_LENGTH,
};
