//! Plan execution against the target store.

use std::sync::Arc;

use tracing::{error, info, warn};

use idsync_core::error::{IdSyncError, Result};
use idsync_core::store::AccessStore;

use crate::diff::Plan;

/// Which mutation families this deployment is allowed to apply. A
/// disabled family turns its operations into logged no-ops.
#[derive(Debug, Clone, Copy)]
pub struct ApplyFlags {
    pub users: bool,
    pub groups: bool,
    pub members: bool,
}

impl Default for ApplyFlags {
    fn default() -> Self {
        Self {
            users: true,
            groups: true,
            members: true,
        }
    }
}

/// Per-tick outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub users_created: u64,
    pub users_updated: u64,
    pub users_banned: u64,
    pub users_removed: u64,
    pub groups_created: u64,
    pub groups_updated: u64,
    pub groups_removed: u64,
    pub members_added: u64,
    pub members_removed: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl SyncSummary {
    /// Total mutations that actually reached the target.
    pub fn applied(&self) -> u64 {
        self.users_created
            + self.users_updated
            + self.users_banned
            + self.users_removed
            + self.groups_created
            + self.groups_updated
            + self.groups_removed
            + self.members_added
            + self.members_removed
    }
}

/// Executes a plan phase by phase, tolerating per-operation failures.
pub struct Applier<S: AccessStore> {
    store: Arc<S>,
    flags: ApplyFlags,
}

impl<S: AccessStore> Applier<S> {
    pub fn new(store: Arc<S>, flags: ApplyFlags) -> Self {
        Self { store, flags }
    }

    /// Run every operation in referential-integrity order: user creates,
    /// user updates, group creates/recreates, membership removals,
    /// membership additions, bans, user removals, group removals.
    ///
    /// Individual failures are logged and counted without aborting the
    /// plan. A `ManualManaged` rejection aborts immediately: the plan must
    /// never contain such an operation, so it signals a classification
    /// bug rather than a transient fault.
    pub async fn apply(&self, plan: &Plan) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        for user in &plan.create_users {
            if !self.flags.users {
                warn!(username = %user.username, "user changes disabled, skipping create");
                summary.skipped += 1;
                continue;
            }
            match self.store.create_user(user).await {
                Ok(()) => {
                    info!(username = %user.username, "created user");
                    summary.users_created += 1;
                }
                Err(e) => self.record_failure(&mut summary, "create user", &user.username, e)?,
            }
        }

        for update in &plan.update_users {
            if !self.flags.users {
                warn!(username = %update.username, "user changes disabled, skipping update");
                summary.skipped += 1;
                continue;
            }
            match self.store.update_user(&update.username, &update.user).await {
                Ok(()) => {
                    info!(
                        username = %update.username,
                        new_username = %update.user.username,
                        "updated user"
                    );
                    summary.users_updated += 1;
                }
                Err(e) => self.record_failure(&mut summary, "update user", &update.username, e)?,
            }
        }

        for group in &plan.create_groups {
            if !self.flags.groups {
                warn!(group = %group.name, "group changes disabled, skipping create");
                summary.skipped += 1;
                continue;
            }
            match self.store.create_group(group).await {
                Ok(()) => {
                    info!(group = %group.name, "created group");
                    summary.groups_created += 1;
                }
                Err(e) => self.record_failure(&mut summary, "create group", &group.name, e)?,
            }
        }

        for recreate in &plan.recreate_groups {
            if !self.flags.groups {
                warn!(
                    group = %recreate.old_name,
                    new_group = %recreate.group.name,
                    "group changes disabled, skipping recreate"
                );
                summary.skipped += 1;
                continue;
            }
            match self.store.remove_group(&recreate.old_name).await {
                Ok(()) => summary.groups_removed += 1,
                Err(e) => {
                    self.record_failure(&mut summary, "remove group", &recreate.old_name, e)?;
                }
            }
            match self.store.create_group(&recreate.group).await {
                Ok(()) => {
                    info!(
                        group = %recreate.old_name,
                        new_group = %recreate.group.name,
                        "recreated group"
                    );
                    summary.groups_created += 1;
                }
                Err(e) => {
                    self.record_failure(&mut summary, "create group", &recreate.group.name, e)?;
                }
            }
        }

        for update in &plan.update_groups {
            if !self.flags.groups {
                warn!(group = %update.name, "group changes disabled, skipping update");
                summary.skipped += 1;
                continue;
            }
            match self.store.update_group(&update.name, &update.group).await {
                Ok(()) => {
                    info!(group = %update.name, "updated group");
                    summary.groups_updated += 1;
                }
                Err(e) => self.record_failure(&mut summary, "update group", &update.name, e)?,
            }
        }

        for membership in &plan.remove_members {
            if !self.flags.members {
                warn!(
                    username = %membership.username,
                    group = %membership.group,
                    "member changes disabled, skipping removal"
                );
                summary.skipped += 1;
                continue;
            }
            match self
                .store
                .remove_member(&membership.username, &membership.group)
                .await
            {
                Ok(()) => {
                    info!(username = %membership.username, group = %membership.group, "removed member");
                    summary.members_removed += 1;
                }
                Err(e) => {
                    self.record_failure(&mut summary, "remove member", &membership.username, e)?;
                }
            }
        }

        for membership in &plan.add_members {
            if !self.flags.members {
                warn!(
                    username = %membership.username,
                    group = %membership.group,
                    "member changes disabled, skipping addition"
                );
                summary.skipped += 1;
                continue;
            }
            match self
                .store
                .add_member(&membership.username, &membership.group)
                .await
            {
                Ok(()) => {
                    info!(username = %membership.username, group = %membership.group, "added member");
                    summary.members_added += 1;
                }
                Err(e) => {
                    self.record_failure(&mut summary, "add member", &membership.username, e)?;
                }
            }
        }

        for ban in &plan.ban_users {
            if !self.flags.users {
                warn!(username = %ban.username, "user changes disabled, skipping ban");
                summary.skipped += 1;
                continue;
            }
            match self.store.ban_user(&ban.username, ban.since).await {
                Ok(()) => {
                    info!(username = %ban.username, since = %ban.since, "banned user");
                    summary.users_banned += 1;
                }
                Err(e) => self.record_failure(&mut summary, "ban user", &ban.username, e)?,
            }
        }

        for username in &plan.remove_users {
            if !self.flags.users {
                warn!(username = %username, "user changes disabled, skipping removal");
                summary.skipped += 1;
                continue;
            }
            match self.store.remove_user(username).await {
                Ok(()) => {
                    info!(username = %username, "removed user");
                    summary.users_removed += 1;
                }
                Err(e) => self.record_failure(&mut summary, "remove user", username, e)?,
            }
        }

        for name in &plan.remove_groups {
            if !self.flags.groups {
                warn!(group = %name, "group changes disabled, skipping removal");
                summary.skipped += 1;
                continue;
            }
            match self.store.remove_group(name).await {
                Ok(()) => {
                    info!(group = %name, "removed group");
                    summary.groups_removed += 1;
                }
                Err(e) => self.record_failure(&mut summary, "remove group", name, e)?,
            }
        }

        Ok(summary)
    }

    fn record_failure(
        &self,
        summary: &mut SyncSummary,
        op: &str,
        name: &str,
        err: IdSyncError,
    ) -> Result<()> {
        if matches!(err, IdSyncError::ManualManaged(_)) {
            error!(op, name, error = %err, "refused to touch a manually managed principal");
            return Err(err);
        }
        error!(op, name, error = %err, "operation failed");
        summary.failed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{Membership, UserBan, UserUpdate};
    use crate::testing::InMemoryStore;
    use chrono::TimeZone;
    use chrono::Utc;
    use idsync_core::models::source::SourceUser;
    use idsync_core::models::target::{TargetGroup, TargetUser};

    fn alice_source() -> SourceUser {
        SourceUser {
            source_id: "fake-az-id-alice".to_string(),
            principal_name: "alice@acme.com".to_string(),
            email: "alice@acme.com".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Henderson".to_string(),
            display_name: "Henderson, Alice (ACME)".to_string(),
        }
    }

    fn bob_source() -> SourceUser {
        SourceUser {
            source_id: "fake-az-id-bob".to_string(),
            principal_name: "Bob@acme.com".to_string(),
            email: "Bob@acme.com".to_string(),
            first_name: "Bob".to_string(),
            last_name: "Sanders".to_string(),
            display_name: "Sanders, Bob (ACME)".to_string(),
        }
    }

    #[tokio::test]
    async fn applies_creates_and_removes() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_user(TargetUser::from_source(&bob_source(), "bob"));

        let plan = Plan {
            create_users: vec![TargetUser::from_source(&alice_source(), "alice")],
            remove_users: vec!["bob".to_string()],
            ..Plan::default()
        };

        let summary = Applier::new(store.clone(), ApplyFlags::default())
            .apply(&plan)
            .await
            .unwrap();

        assert_eq!(summary.users_created, 1);
        assert_eq!(summary.users_removed, 1);
        assert_eq!(summary.failed, 0);
        let users = store.users();
        assert!(users.contains_key("alice"));
        assert!(!users.contains_key("bob"));
    }

    #[tokio::test]
    async fn disabled_user_flag_skips_user_ops() {
        let store = Arc::new(InMemoryStore::new());
        let plan = Plan {
            create_users: vec![TargetUser::from_source(&alice_source(), "alice")],
            ban_users: vec![UserBan {
                username: "bob".to_string(),
                since: Utc.with_ymd_and_hms(2023, 10, 20, 12, 0, 0).unwrap(),
            }],
            ..Plan::default()
        };

        let flags = ApplyFlags {
            users: false,
            ..ApplyFlags::default()
        };
        let summary = Applier::new(store.clone(), flags).apply(&plan).await.unwrap();

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.applied(), 0);
        assert!(store.users().is_empty());
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn disabled_member_flag_skips_membership_ops() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_user(TargetUser::from_source(&alice_source(), "alice"));
        store.seed_group(
            TargetGroup {
                name: "acme.devs".to_string(),
                source: Some(idsync_core::models::target::GroupSourceAttrs {
                    id: "fake-az-acme.devs".to_string(),
                    ..Default::default()
                }),
            },
            &[],
        );

        let plan = Plan {
            add_members: vec![Membership {
                username: "alice".to_string(),
                group: "acme.devs".to_string(),
            }],
            ..Plan::default()
        };
        let flags = ApplyFlags {
            members: false,
            ..ApplyFlags::default()
        };
        let summary = Applier::new(store.clone(), flags).apply(&plan).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert!(store.groups()["acme.devs"].1.is_empty());
    }

    #[tokio::test]
    async fn per_op_failure_does_not_abort_the_plan() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_on("bob");

        let plan = Plan {
            create_users: vec![
                TargetUser::from_source(&alice_source(), "alice"),
                TargetUser::from_source(&bob_source(), "bob"),
            ],
            ..Plan::default()
        };

        let summary = Applier::new(store.clone(), ApplyFlags::default())
            .apply(&plan)
            .await
            .unwrap();

        assert_eq!(summary.users_created, 1);
        assert_eq!(summary.failed, 1);
        assert!(store.users().contains_key("alice"));
    }

    #[tokio::test]
    async fn manually_managed_rejection_is_a_hard_stop() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_user(TargetUser::from_source(&alice_source(), "alice"));

        // A plan like this is a classification bug; the applier must not
        // shrug it off as one more failed op.
        let plan = Plan {
            remove_users: vec!["alice".to_string(), "root".to_string()],
            ..Plan::default()
        };

        let err = Applier::new(store.clone(), ApplyFlags::default())
            .apply(&plan)
            .await
            .unwrap_err();
        assert!(matches!(err, IdSyncError::ManualManaged(_)));
    }

    #[tokio::test]
    async fn update_renames_in_place() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_user(TargetUser::from_source(&bob_source(), "bob"));

        let mut renamed_source = bob_source();
        renamed_source.principal_name = "bobby@example.com".to_string();
        let plan = Plan {
            update_users: vec![UserUpdate {
                username: "bob".to_string(),
                user: TargetUser::from_source(&renamed_source, "bobby:example.com"),
            }],
            ..Plan::default()
        };

        let summary = Applier::new(store.clone(), ApplyFlags::default())
            .apply(&plan)
            .await
            .unwrap();

        assert_eq!(summary.users_updated, 1);
        let users = store.users();
        assert!(!users.contains_key("bob"));
        assert_eq!(
            users["bobby:example.com"]
                .source
                .as_ref()
                .unwrap()
                .principal_name,
            "bobby@example.com"
        );
    }
}
