//! One reconciliation pass: views, plan, gate, apply.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use idsync_core::clock::Clock;
use idsync_core::error::{IdSyncError, Result};
use idsync_core::models::source::{SourceGroupWithMembers, SourceUser};
use idsync_core::models::target::{TargetGroupWithMembers, TargetUser};
use idsync_core::source::SourceDirectory;
use idsync_core::store::AccessStore;

use crate::apply::{Applier, ApplyFlags, SyncSummary};
use crate::diff::{build_plan, DiffConfig};

/// Engine settings for one deployment.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub diff: DiffConfig,
    /// Reject a plan whose removals reach this count. 0 disables the gate.
    pub remove_limit: usize,
    pub flags: ApplyFlags,
}

/// Reconciles the target against the source, one tick at a time.
pub struct SyncEngine<D: SourceDirectory, S: AccessStore> {
    source: Arc<D>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<D, S> SyncEngine<D, S>
where
    D: SourceDirectory,
    S: AccessStore,
{
    pub fn new(
        source: Arc<D>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            store,
            clock,
            config,
        }
    }

    /// Run one sync tick: fetch both views, plan, gate, apply.
    ///
    /// View errors, invalid or colliding names, and a tripped remove limit
    /// abort the tick before any mutation is issued. Per-operation apply
    /// failures are aggregated into [`IdSyncError::PartialApply`].
    pub async fn sync_once(&self) -> Result<SyncSummary> {
        let now = self.clock.now();

        // 1. Point-in-time source view.
        let source_users = self.source.list_users().await?;
        let source_groups = self.source.list_groups_with_members().await?;
        ensure_unique_source_ids(&source_users, &source_groups)?;

        // 2. Managed-target view; manually managed principals are out of
        //    scope on both the read and the write path.
        let target_users: Vec<TargetUser> = self
            .store
            .list_users()
            .await?
            .into_iter()
            .filter(|user| !user.is_manually_managed())
            .collect();
        let target_groups: Vec<TargetGroupWithMembers> = self
            .store
            .list_groups_with_members()
            .await?
            .into_iter()
            .filter(|group| !group.group.is_manually_managed())
            .collect();

        info!(
            source_users = source_users.len(),
            source_groups = source_groups.len(),
            target_users = target_users.len(),
            target_groups = target_groups.len(),
            "loaded sync views"
        );

        // 3. Plan.
        let plan = build_plan(
            &source_users,
            &source_groups,
            &target_users,
            &target_groups,
            now,
            &self.config.diff,
        )?;

        // 4. Destructive-change gate: a source outage returning an empty
        //    listing must not wipe the target.
        let destructive = plan.destructive_count();
        if self.config.remove_limit > 0 && destructive >= self.config.remove_limit {
            return Err(IdSyncError::RemoveLimitExceeded {
                planned: destructive,
                limit: self.config.remove_limit,
            });
        }

        if plan.is_empty() {
            info!("target already mirrors the source, nothing to apply");
            return Ok(SyncSummary::default());
        }

        info!(
            operations = plan.op_count(),
            destructive, "computed sync plan"
        );

        // 5. Apply.
        let summary = Applier::new(self.store.clone(), self.config.flags)
            .apply(&plan)
            .await?;

        info!(
            users_created = summary.users_created,
            users_updated = summary.users_updated,
            users_banned = summary.users_banned,
            users_removed = summary.users_removed,
            groups_created = summary.groups_created,
            groups_updated = summary.groups_updated,
            groups_removed = summary.groups_removed,
            members_added = summary.members_added,
            members_removed = summary.members_removed,
            skipped = summary.skipped,
            failed = summary.failed,
            "sync tick finished"
        );

        if summary.failed > 0 {
            return Err(IdSyncError::PartialApply {
                failed: summary.failed,
            });
        }
        Ok(summary)
    }
}

/// A paged listing that shifted mid-fetch may repeat an entry; treat that
/// as a failed snapshot rather than planning against it.
fn ensure_unique_source_ids(
    users: &[SourceUser],
    groups: &[SourceGroupWithMembers],
) -> Result<()> {
    let mut seen = HashSet::new();
    for user in users {
        if !seen.insert(user.source_id.as_str()) {
            return Err(IdSyncError::SourceUnavailable(format!(
                "duplicate source id {} in user listing",
                user.source_id
            )));
        }
    }
    let mut seen = HashSet::new();
    for group in groups {
        if !seen.insert(group.group.source_id.as_str()) {
            return Err(IdSyncError::SourceUnavailable(format!(
                "duplicate source id {} in group listing",
                group.group.source_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDirectory, InMemoryStore};
    use chrono::{DateTime, TimeZone, Utc};
    use idsync_core::clock::FixedClock;
    use idsync_core::models::source::SourceGroup;
    use idsync_core::models::target::{TargetGroup, TargetUser};
    use idsync_core::names::ReplacementPair;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn pair(from: &str, to: &str) -> ReplacementPair {
        ReplacementPair {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    fn engine_config(ban: Duration, remove_limit: usize) -> EngineConfig {
        EngineConfig {
            diff: crate::diff::DiffConfig {
                username_replacements: vec![pair("@acme.com", ""), pair("@", ":")],
                groupname_replacements: vec![pair("|all", "")],
                ban_before_remove_duration: ban,
            },
            remove_limit,
            flags: ApplyFlags::default(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 10, 20, 12, 0, 0).unwrap()
    }

    fn source_user(id: &str, principal: &str, first: &str, last: &str) -> SourceUser {
        SourceUser {
            source_id: id.to_string(),
            principal_name: principal.to_string(),
            email: principal.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            display_name: format!("{last}, {first} (ACME)"),
        }
    }

    fn alice() -> SourceUser {
        source_user("fake-az-id-alice", "alice@acme.com", "Alice", "Henderson")
    }

    fn bob() -> SourceUser {
        source_user("fake-az-id-bob", "Bob@acme.com", "Bob", "Sanders")
    }

    fn carol() -> SourceUser {
        source_user("fake-az-id-carol", "carol@acme.com", "Carol", "Sanders")
    }

    fn devs() -> SourceGroup {
        SourceGroup {
            source_id: "fake-az-acme.devs".to_string(),
            identity: "acme.devs|all".to_string(),
            display_name: "acme.devs|all".to_string(),
        }
    }

    fn hq() -> SourceGroup {
        SourceGroup {
            source_id: "fake-az-acme.hq".to_string(),
            identity: "acme.hq".to_string(),
            display_name: "acme.hq".to_string(),
        }
    }

    fn with_members(group: SourceGroup, members: &[&str]) -> SourceGroupWithMembers {
        SourceGroupWithMembers {
            group,
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn engine(
        source_users: Vec<SourceUser>,
        source_groups: Vec<SourceGroupWithMembers>,
        now: DateTime<Utc>,
        config: EngineConfig,
    ) -> (
        Arc<FakeDirectory>,
        Arc<InMemoryStore>,
        Arc<FixedClock>,
        SyncEngine<FakeDirectory, InMemoryStore>,
    ) {
        let directory = Arc::new(FakeDirectory::new(source_users, source_groups));
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(now));
        let engine = SyncEngine::new(
            directory.clone(),
            store.clone(),
            clock.clone(),
            config,
        );
        (directory, store, clock, engine)
    }

    fn usernames(store: &InMemoryStore) -> Vec<String> {
        store.users().keys().cloned().collect()
    }

    #[tokio::test]
    async fn creates_missing_skips_matching_removes_orphaned() {
        let (_, store, _, engine) = engine(
            vec![alice(), bob()],
            vec![],
            t0(),
            engine_config(Duration::ZERO, 0),
        );
        store.seed_user(TargetUser::from_source(&alice(), "alice"));
        store.seed_user(TargetUser::from_source(&carol(), "carol"));

        let summary = engine.sync_once().await.unwrap();

        assert_eq!(summary.users_created, 1);
        assert_eq!(summary.users_removed, 1);
        assert_eq!(summary.users_updated, 0);
        assert_eq!(usernames(&store), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn disappeared_user_is_banned_within_the_window() {
        let (_, store, _, engine) = engine(
            vec![alice()],
            vec![],
            t0(),
            engine_config(Duration::from_secs(24 * 3600), 0),
        );
        store.seed_user(TargetUser::from_source(&alice(), "alice"));
        store.seed_user(TargetUser::from_source(&bob(), "bob"));

        let summary = engine.sync_once().await.unwrap();

        assert_eq!(summary.users_banned, 1);
        assert_eq!(summary.users_removed, 0);
        let users = store.users();
        assert!(users["alice"].banned_since.is_none());
        assert_eq!(users["bob"].banned_since, Some(t0()));
    }

    #[tokio::test]
    async fn expired_ban_removes_and_reappearance_restores() {
        // Bob was banned at t0 and two days have passed: gone. Carol was
        // banned eight hours ago but is back in the source: restored.
        let now = t0() + chrono::Duration::hours(48);
        let (_, store, _, engine) = engine(
            vec![alice(), carol()],
            vec![],
            now,
            engine_config(Duration::from_secs(24 * 3600), 0),
        );
        store.seed_user(TargetUser::from_source(&alice(), "alice"));
        let mut banned_bob = TargetUser::from_source(&bob(), "bob");
        banned_bob.banned_since = Some(t0());
        store.seed_user(banned_bob);
        let mut banned_carol = TargetUser::from_source(&carol(), "carol");
        banned_carol.banned_since = Some(t0() + chrono::Duration::hours(40));
        store.seed_user(banned_carol);

        let summary = engine.sync_once().await.unwrap();

        assert_eq!(summary.users_removed, 1);
        assert_eq!(summary.users_updated, 1);
        let users = store.users();
        assert_eq!(usernames(&store), vec!["alice", "carol"]);
        assert!(users["carol"].banned_since.is_none());
    }

    #[tokio::test]
    async fn remove_limit_keeps_users_intact() {
        let (_, store, _, engine) = engine(
            vec![],
            vec![],
            t0(),
            engine_config(Duration::ZERO, 3),
        );
        store.seed_user(TargetUser::from_source(&alice(), "alice"));
        store.seed_user(TargetUser::from_source(&bob(), "bob"));
        store.seed_user(TargetUser::from_source(&carol(), "carol"));

        let err = engine.sync_once().await.unwrap_err();

        assert!(matches!(
            err,
            IdSyncError::RemoveLimitExceeded {
                planned: 3,
                limit: 3
            }
        ));
        assert_eq!(store.mutation_count(), 0);
        assert_eq!(usernames(&store), vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn remove_limit_keeps_groups_intact() {
        let (_, store, _, engine) = engine(
            vec![],
            vec![],
            t0(),
            engine_config(Duration::ZERO, 3),
        );
        for group in [devs(), hq()] {
            let name = group.identity.replace("|all", "");
            store.seed_group(TargetGroup::from_source(&group, name), &[]);
        }
        let qa = SourceGroup {
            source_id: "fake-az-acme.qa".to_string(),
            identity: "acme.qa".to_string(),
            display_name: "acme.qa|all".to_string(),
        };
        store.seed_group(TargetGroup::from_source(&qa, "acme.qa"), &[]);

        let err = engine.sync_once().await.unwrap_err();

        assert!(matches!(err, IdSyncError::RemoveLimitExceeded { .. }));
        assert_eq!(store.mutation_count(), 0);
        assert_eq!(store.groups().len(), 3);
    }

    #[tokio::test]
    async fn attribute_and_principal_changes_are_reflected() {
        let mut alice_changed = alice();
        alice_changed.last_name = "Smith".to_string();
        let mut bob_changed = bob();
        bob_changed.principal_name = "bobby@example.com".to_string();
        bob_changed.email = "bobby@example.com".to_string();

        let (_, store, _, engine) = engine(
            vec![alice_changed.clone(), bob_changed.clone()],
            vec![],
            t0(),
            engine_config(Duration::ZERO, 0),
        );
        store.seed_user(TargetUser::from_source(&alice(), "alice"));
        store.seed_user(TargetUser::from_source(&bob(), "bob"));

        let summary = engine.sync_once().await.unwrap();

        assert_eq!(summary.users_updated, 2);
        let users = store.users();
        assert_eq!(usernames(&store), vec!["alice", "bobby:example.com"]);
        assert_eq!(users["alice"].source.as_ref().unwrap().last_name, "Smith");
        assert_eq!(
            users["bobby:example.com"].source.as_ref().unwrap().email,
            "bobby@example.com"
        );
    }

    #[tokio::test]
    async fn group_create_remove_and_skip() {
        let (_, store, _, engine) = engine(
            vec![alice(), bob(), carol()],
            vec![
                with_members(devs(), &["fake-az-id-alice"]),
                with_members(hq(), &["fake-az-id-carol"]),
            ],
            t0(),
            engine_config(Duration::ZERO, 0),
        );
        for user in [alice(), bob(), carol()] {
            let name = user.principal_name.to_lowercase().replace("@acme.com", "");
            store.seed_user(TargetUser::from_source(&user, name));
        }
        store.seed_group(TargetGroup::from_source(&devs(), "acme.devs"), &["alice"]);
        let qa = SourceGroup {
            source_id: "fake-az-acme.qa".to_string(),
            identity: "acme.qa".to_string(),
            display_name: "acme.qa|all".to_string(),
        };
        store.seed_group(TargetGroup::from_source(&qa, "acme.qa"), &["bob"]);

        let summary = engine.sync_once().await.unwrap();

        assert_eq!(summary.groups_created, 1);
        assert_eq!(summary.groups_removed, 1);
        let groups = store.groups();
        assert_eq!(
            groups.keys().cloned().collect::<Vec<_>>(),
            vec!["acme.devs", "acme.hq"]
        );
        assert_eq!(
            groups["acme.hq"].1.iter().cloned().collect::<Vec<_>>(),
            vec!["carol"]
        );
    }

    #[tokio::test]
    async fn membership_changes_are_applied() {
        let (_, store, _, engine) = engine(
            vec![alice(), bob(), carol()],
            vec![with_members(
                devs(),
                &["fake-az-id-alice", "fake-az-id-carol"],
            )],
            t0(),
            engine_config(Duration::ZERO, 0),
        );
        for user in [alice(), bob(), carol()] {
            let name = user.principal_name.to_lowercase().replace("@acme.com", "");
            store.seed_user(TargetUser::from_source(&user, name));
        }
        store.seed_group(
            TargetGroup::from_source(&devs(), "acme.devs"),
            &["alice", "bob"],
        );

        let summary = engine.sync_once().await.unwrap();

        assert_eq!(summary.members_added, 1);
        assert_eq!(summary.members_removed, 1);
        assert_eq!(
            store.groups()["acme.devs"]
                .1
                .iter()
                .cloned()
                .collect::<Vec<_>>(),
            vec!["alice", "carol"]
        );
    }

    #[tokio::test]
    async fn identity_change_recreates_while_compatible_change_updates() {
        let devs_renamed = SourceGroup {
            source_id: devs().source_id,
            identity: "acme.developers|all".to_string(),
            display_name: "acme.developers|all".to_string(),
        };
        let hq_compatible = SourceGroup {
            source_id: hq().source_id,
            identity: "acme.hq|all".to_string(),
            display_name: "acme.hq|all".to_string(),
        };
        let (_, store, _, engine) = engine(
            vec![alice(), bob(), carol()],
            vec![
                with_members(
                    devs_renamed.clone(),
                    &["fake-az-id-alice", "fake-az-id-carol"],
                ),
                with_members(
                    hq_compatible.clone(),
                    &["fake-az-id-alice", "fake-az-id-carol"],
                ),
            ],
            t0(),
            engine_config(Duration::ZERO, 0),
        );
        for user in [alice(), bob(), carol()] {
            let name = user.principal_name.to_lowercase().replace("@acme.com", "");
            store.seed_user(TargetUser::from_source(&user, name));
        }
        store.seed_group(
            TargetGroup::from_source(&devs(), "acme.devs"),
            &["alice", "bob"],
        );
        store.seed_group(
            TargetGroup::from_source(&hq(), "acme.hq"),
            &["alice", "bob"],
        );

        let summary = engine.sync_once().await.unwrap();

        // devs: removed and recreated under the new name, members rebuilt.
        // hq: same canonical name, attributes and members updated in place.
        assert_eq!(summary.groups_created, 1);
        assert_eq!(summary.groups_removed, 1);
        assert_eq!(summary.groups_updated, 1);
        let groups = store.groups();
        assert_eq!(
            groups.keys().cloned().collect::<Vec<_>>(),
            vec!["acme.developers", "acme.hq"]
        );
        assert_eq!(
            groups["acme.developers"]
                .1
                .iter()
                .cloned()
                .collect::<Vec<_>>(),
            vec!["alice", "carol"]
        );
        assert_eq!(
            groups["acme.hq"].1.iter().cloned().collect::<Vec<_>>(),
            vec!["alice", "carol"]
        );
        assert_eq!(
            groups["acme.hq"].0.source.as_ref().unwrap().identity,
            "acme.hq|all"
        );
    }

    #[tokio::test]
    async fn manually_managed_principals_are_never_touched() {
        let (_, store, _, engine) = engine(
            vec![],
            vec![],
            t0(),
            engine_config(Duration::ZERO, 0),
        );
        store.seed_user(TargetUser {
            username: "root".to_string(),
            source: None,
            banned_since: None,
        });
        store.seed_user(TargetUser {
            username: "oleg".to_string(),
            source: None,
            banned_since: None,
        });
        // Even a reserved name that somehow acquired a bag stays out of
        // scope.
        let mut decorated_guest = TargetUser::from_source(&alice(), "guest");
        decorated_guest.source.as_mut().unwrap().id = "stray-id".to_string();
        store.seed_user(decorated_guest);

        let summary = engine.sync_once().await.unwrap();

        assert_eq!(summary, SyncSummary::default());
        assert_eq!(store.mutation_count(), 0);
        assert_eq!(usernames(&store), vec!["guest", "oleg", "root"]);
    }

    #[tokio::test]
    async fn second_tick_is_a_no_op() {
        let (_, store, _, engine) = engine(
            vec![alice(), bob()],
            vec![with_members(devs(), &["fake-az-id-alice"])],
            t0(),
            engine_config(Duration::ZERO, 0),
        );

        let first = engine.sync_once().await.unwrap();
        assert!(first.applied() > 0);
        let mutations_after_first = store.mutation_count();

        let second = engine.sync_once().await.unwrap();
        assert_eq!(second, SyncSummary::default());
        assert_eq!(store.mutation_count(), mutations_after_first);
    }

    #[tokio::test]
    async fn source_outage_aborts_the_tick() {
        let (directory, store, _, engine) = engine(
            vec![alice()],
            vec![],
            t0(),
            engine_config(Duration::ZERO, 0),
        );
        directory.set_offline(true);

        let err = engine.sync_once().await.unwrap_err();

        assert!(matches!(err, IdSyncError::SourceUnavailable(_)));
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_source_ids_abort_the_tick() {
        let (_, store, _, engine) = engine(
            vec![alice(), alice()],
            vec![],
            t0(),
            engine_config(Duration::ZERO, 0),
        );

        let err = engine.sync_once().await.unwrap_err();

        assert!(matches!(err, IdSyncError::SourceUnavailable(_)));
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn apply_failures_surface_as_partial_apply() {
        let (_, store, _, engine) = engine(
            vec![alice(), bob()],
            vec![],
            t0(),
            engine_config(Duration::ZERO, 0),
        );
        store.fail_on("bob");

        let err = engine.sync_once().await.unwrap_err();

        assert!(matches!(err, IdSyncError::PartialApply { failed: 1 }));
        assert!(store.users().contains_key("alice"));
    }

    #[tokio::test]
    async fn ban_then_remove_across_two_ticks() {
        let (directory, store, clock, engine) = engine(
            vec![alice()],
            vec![],
            t0(),
            engine_config(Duration::from_secs(24 * 3600), 0),
        );
        store.seed_user(TargetUser::from_source(&alice(), "alice"));
        store.seed_user(TargetUser::from_source(&bob(), "bob"));

        engine.sync_once().await.unwrap();
        assert_eq!(store.users()["bob"].banned_since, Some(t0()));

        clock.set(t0() + chrono::Duration::hours(48));
        directory.set_users(vec![alice()]);
        let summary = engine.sync_once().await.unwrap();

        assert_eq!(summary.users_removed, 1);
        assert_eq!(usernames(&store), vec!["alice"]);
    }

    #[tokio::test]
    async fn disabled_flags_leave_the_target_unchanged() {
        let mut config = engine_config(Duration::ZERO, 0);
        config.flags = ApplyFlags {
            users: false,
            groups: false,
            members: false,
        };
        let (_, store, _, engine) = engine(
            vec![alice()],
            vec![with_members(devs(), &["fake-az-id-alice"])],
            t0(),
            config,
        );

        let summary = engine.sync_once().await.unwrap();

        assert_eq!(summary.applied(), 0);
        assert_eq!(summary.skipped, 3);
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn extra_target_attributes_survive_an_update() {
        let mut alice_changed = alice();
        alice_changed.last_name = "Smith".to_string();
        let (_, store, _, engine) = engine(
            vec![alice_changed],
            vec![],
            t0(),
            engine_config(Duration::ZERO, 0),
        );
        let mut seeded = TargetUser::from_source(&alice(), "alice");
        seeded.source.as_mut().unwrap().extra = BTreeMap::from([(
            "note".to_string(),
            serde_json::Value::String("added by an operator".to_string()),
        )]);
        store.seed_user(seeded);

        engine.sync_once().await.unwrap();

        let bag = store.users()["alice"].source.clone().unwrap();
        assert_eq!(bag.last_name, "Smith");
        assert_eq!(bag.extra["note"], "added by an operator");
    }
}
