//! Resolution of caller user references.

use biosense_core::{UserHandle, UserId};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Maps a caller's [`UserHandle`] to a concrete user.
pub trait UserResolver: Send + Sync + fmt::Debug {
    /// Resolve `handle`. `None` if the user does not exist.
    fn resolve(&self, handle: UserHandle) -> Option<UserId>;

    /// Every known user, for diagnostics.
    fn users(&self) -> Vec<UserId>;
}

/// Resolver over a fixed set of users with a switchable foreground user.
#[derive(Debug)]
pub struct StaticUserResolver {
    current: RwLock<UserId>,
    users: BTreeSet<UserId>,
}

impl StaticUserResolver {
    /// `current` is added to `users` if missing.
    pub fn new(current: UserId, users: impl IntoIterator<Item = UserId>) -> Self {
        let mut users: BTreeSet<UserId> = users.into_iter().collect();
        users.insert(current);
        Self {
            current: RwLock::new(current),
            users,
        }
    }

    /// Make `user` the foreground user. Returns false for unknown users.
    pub fn set_current(&self, user: UserId) -> bool {
        if !self.users.contains(&user) {
            return false;
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = user;
        true
    }

    pub fn current(&self) -> UserId {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UserResolver for StaticUserResolver {
    fn resolve(&self, handle: UserHandle) -> Option<UserId> {
        match handle {
            UserHandle::Current => Some(self.current()),
            UserHandle::Explicit(id) => {
                let user = UserId::new(id).ok()?;
                self.users.contains(&user).then_some(user)
            }
        }
    }

    fn users(&self) -> Vec<UserId> {
        self.users.iter().copied().collect()
    }
}
