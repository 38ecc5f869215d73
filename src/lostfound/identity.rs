use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// The signed-in user as seen by the messaging core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub display_name: String,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Read-only source of the current user. Sign-in flows live elsewhere.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<CurrentUser>;
}

/// An [`IdentityProvider`] whose user is set directly.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    user: RwLock<Option<CurrentUser>>,
}

impl StaticIdentity {
    pub fn signed_in(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user: RwLock::new(Some(CurrentUser::new(id, display_name))),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, id: impl Into<String>, display_name: impl Into<String>) {
        let user = CurrentUser::new(id, display_name);
        tracing::debug!(target: "lostfound::identity", "Signed in as {}", user.id);
        match self.user.write() {
            Ok(mut guard) => *guard = Some(user),
            Err(poisoned) => *poisoned.into_inner() = Some(user),
        }
    }

    pub fn sign_out(&self) {
        match self.user.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<CurrentUser> {
        match self.user.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
