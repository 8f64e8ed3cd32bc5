//! Identity consumed from the authentication layer
//!
//! The history store only needs to know who is signed in and whether that
//! identity is anonymous. Changes arrive over a `watch` channel so the store
//! can trigger a sync the moment an anonymous identity converts.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Signed-in user as reported by authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub is_anonymous: bool,
}

impl User {
    pub fn anonymous(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_anonymous: true,
        }
    }

    pub fn authenticated(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_anonymous: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.is_anonymous
    }
}

/// Source of the current identity
pub trait IdentityProvider: Send + Sync {
    /// `None` when nobody is signed in
    fn current_user(&self) -> Option<User>;

    /// Receiver notified on every identity change
    fn subscribe(&self) -> watch::Receiver<Option<User>>;

    /// Authenticated user, if any
    fn authenticated_user(&self) -> Option<User> {
        self.current_user().filter(User::is_authenticated)
    }
}

/// In-process identity holder
///
/// The authentication flow calls `set_user` when sign-in state changes.
#[derive(Debug)]
pub struct IdentityHandle {
    tx: watch::Sender<Option<User>>,
}

impl IdentityHandle {
    pub fn new(initial: Option<User>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn set_user(&self, user: Option<User>) {
        self.tx.send_replace(user);
    }

    pub fn sign_out(&self) {
        self.set_user(None);
    }
}

impl Default for IdentityHandle {
    fn default() -> Self {
        Self::new(None)
    }
}

impl IdentityProvider for IdentityHandle {
    fn current_user(&self) -> Option<User> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.tx.subscribe()
    }
}

/// Whether moving from `before` to `after` is an account conversion
///
/// Covers both an anonymous identity upgrading and a first sign-in after
/// using the app signed out, since local history exists in both cases.
pub fn is_conversion(before: Option<&User>, after: Option<&User>) -> bool {
    let was_local = before.map(|u| u.is_anonymous).unwrap_or(true);
    let now_cloud = after.map(User::is_authenticated).unwrap_or(false);
    was_local && now_cloud
}
