use crate::types::UserId;
use std::sync::RwLock;

/// Who is acting. Every state machine action is attributed to the current user.
pub trait Identity: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
}

/// A signed-in (or anonymous) client session.
#[derive(Debug, Default)]
pub struct Session {
    user: RwLock<Option<UserId>>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }
    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self {
            user: RwLock::new(Some(user.into())),
        }
    }
    pub fn sign_in(&self, user: impl Into<UserId>) {
        let mut guard = self.user.write().unwrap_or_else(|p| p.into_inner());
        *guard = Some(user.into());
    }
    pub fn sign_out(&self) {
        let mut guard = self.user.write().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }
}

impl Identity for Session {
    fn current_user_id(&self) -> Option<UserId> {
        self.user
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}
