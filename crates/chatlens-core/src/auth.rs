//! Authorization gate: chat whitelist and debug-user membership.
//!
//! Both sets are loaded once at startup and never change for the process
//! lifetime. Checks are O(1) lookups and never touch storage.

use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct AuthGate {
    chat_whitelist: HashSet<i64>,
    debug_users: HashSet<i64>,
}

impl AuthGate {
    pub fn new(chat_whitelist: HashSet<i64>, debug_users: HashSet<i64>) -> Self {
        Self {
            chat_whitelist,
            debug_users,
        }
    }

    pub fn is_chat_authorized(&self, chat_id: i64) -> bool {
        self.chat_whitelist.contains(&chat_id)
    }

    pub fn is_debug_user(&self, user_id: i64) -> bool {
        self.debug_users.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_membership() {
        let gate = AuthGate::new([-1001, 42].into_iter().collect(), HashSet::new());
        assert!(gate.is_chat_authorized(-1001));
        assert!(gate.is_chat_authorized(42));
        assert!(!gate.is_chat_authorized(7));
    }

    #[test]
    fn debug_user_membership() {
        let gate = AuthGate::new(HashSet::new(), [777].into_iter().collect());
        assert!(gate.is_debug_user(777));
        assert!(!gate.is_debug_user(778));
    }
}
