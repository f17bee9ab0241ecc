//! Identity seam. Authentication itself lives outside the core; the pipeline
//! and answer path only need the current user id for scoping.

use crate::types::UserId;

pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> UserId;
}

/// Fixed identity, used by workers that act on behalf of a known user and by
/// tests.
#[derive(Clone, Debug)]
pub struct StaticIdentity {
    user_id: UserId,
}

impl StaticIdentity {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> UserId {
        self.user_id.clone()
    }
}
