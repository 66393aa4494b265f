// SPDX-License-Identifier: Apache-2.0

//! User-to-queue resolution table (spec.md §4.1), grounded on
//! `UserInfo`/`getUserByUserName` in `resqueuemanager.c`. A user with no
//! assigned queue resolves to `pg_default`.

use crate::tree::QueueTree;
use otap_df_rm_config::RmError;
use std::collections::HashMap;

/// One registered user's resource manager identity.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub name: String,
    pub queue_oid: u32,
    pub is_superuser: bool,
    pub in_use_connections: u32,
}

/// Maps user names to their assigned queue, grounded on `PQUEMGR->Users`.
#[derive(Debug, Default)]
pub struct UserTable {
    by_name: HashMap<String, UserInfo>,
}

impl UserTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `createUser`/`checkUserAttributes`: registers a user, defaulting
    /// to `pg_default`'s oid when no queue is named.
    pub fn register(
        &mut self,
        name: &str,
        queue_name: Option<&str>,
        is_superuser: bool,
        tree: &QueueTree,
    ) -> Result<(), RmError> {
        let queue_oid = match queue_name {
            Some(q) => tree
                .get(q)
                .map(|queue| queue.oid)
                .ok_or_else(|| RmError::NoQueueName { name: q.to_string() })?,
            None => tree
                .get("pg_default")
                .expect("pg_default always exists")
                .oid,
        };
        self.by_name.insert(
            name.to_string(),
            UserInfo {
                name: name.to_string(),
                queue_oid,
                is_superuser,
                in_use_connections: 0,
            },
        );
        Ok(())
    }

    /// `getUserByUserName` plus the `RESQUEMGR_NO_ASSIGNEDQUEUE` check: a
    /// user row always carries a queue oid once registered (defaulted to
    /// `pg_default`), so only an unknown user fails to resolve.
    pub fn resolve_queue(&mut self, name: &str) -> Result<u32, RmError> {
        let user = self
            .by_name
            .get_mut(name)
            .ok_or_else(|| RmError::NoUserId { user: name.to_string() })?;
        user.in_use_connections += 1;
        Ok(user.queue_oid)
    }

    /// Releases the in-use mark taken by `resolve_queue`, called when a
    /// connection deregisters.
    pub fn release(&mut self, name: &str) {
        if let Some(user) = self.by_name.get_mut(name) {
            user.in_use_connections = user.in_use_connections.saturating_sub(1);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UserInfo> {
        self.by_name.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_user_defaults_to_pg_default() {
        let tree = QueueTree::new();
        let mut users = UserTable::new();
        users.register("alice", None, false, &tree).unwrap();
        let default_oid = tree.get("pg_default").unwrap().oid;
        assert_eq!(users.get("alice").unwrap().queue_oid, default_oid);
    }

    #[test]
    fn unknown_user_fails_to_resolve() {
        let mut users = UserTable::new();
        let err = users.resolve_queue("ghost").unwrap_err();
        assert!(matches!(err, RmError::NoUserId { .. }));
    }

    #[test]
    fn resolve_increments_in_use_and_release_decrements() {
        let tree = QueueTree::new();
        let mut users = UserTable::new();
        users.register("bob", None, false, &tree).unwrap();
        users.resolve_queue("bob").unwrap();
        assert_eq!(users.get("bob").unwrap().in_use_connections, 1);
        users.release("bob");
        assert_eq!(users.get("bob").unwrap().in_use_connections, 0);
    }

    #[test]
    fn register_with_unknown_queue_name_fails() {
        let tree = QueueTree::new();
        let mut users = UserTable::new();
        let err = users.register("carol", Some("nope"), false, &tree).unwrap_err();
        assert!(matches!(err, RmError::NoQueueName { .. }));
    }
}
