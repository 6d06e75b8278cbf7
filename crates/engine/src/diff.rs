//! Plan computation: the minimal ordered mutation set that makes the
//! target mirror the source.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};

use idsync_core::error::{IdSyncError, Result};
use idsync_core::models::source::{SourceGroupWithMembers, SourceUser};
use idsync_core::models::target::{TargetGroup, TargetGroupWithMembers, TargetUser};
use idsync_core::names::{canonicalize, ReplacementPair};

/// Differ settings taken from the app section of the configuration.
#[derive(Debug, Clone, Default)]
pub struct DiffConfig {
    pub username_replacements: Vec<ReplacementPair>,
    pub groupname_replacements: Vec<ReplacementPair>,
    pub ban_before_remove_duration: Duration,
}

/// In-place update of one user, covering attribute changes, renames, and
/// unbans. `username` is the name the user currently has in the target.
#[derive(Debug, Clone, PartialEq)]
pub struct UserUpdate {
    pub username: String,
    pub user: TargetUser,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserBan {
    pub username: String,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupUpdate {
    pub name: String,
    pub group: TargetGroup,
}

/// Remove-then-create of a group whose canonical name changed; the
/// platform keys groups by name, so there is no in-place group rename.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRecreate {
    pub old_name: String,
    pub group: TargetGroup,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub username: String,
    pub group: String,
}

/// Ordered mutation plan for one sync tick.
///
/// Fields are declared and applied in referential-integrity order: user
/// creates and updates first, then group creates and recreates, membership
/// removals before additions, and destructive removals last. Every vector
/// is sorted by canonical name, so a given input always produces the same
/// plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub create_users: Vec<TargetUser>,
    pub update_users: Vec<UserUpdate>,
    pub create_groups: Vec<TargetGroup>,
    pub recreate_groups: Vec<GroupRecreate>,
    pub update_groups: Vec<GroupUpdate>,
    pub remove_members: Vec<Membership>,
    pub add_members: Vec<Membership>,
    pub ban_users: Vec<UserBan>,
    pub remove_users: Vec<String>,
    pub remove_groups: Vec<String>,
}

impl Plan {
    /// Removals the safety gate counts. A recreate carries a paired
    /// create, so it is not destructive.
    pub fn destructive_count(&self) -> usize {
        self.remove_users.len() + self.remove_groups.len()
    }

    pub fn op_count(&self) -> usize {
        self.create_users.len()
            + self.update_users.len()
            + self.create_groups.len()
            + self.recreate_groups.len()
            + self.update_groups.len()
            + self.remove_members.len()
            + self.add_members.len()
            + self.ban_users.len()
            + self.remove_users.len()
            + self.remove_groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.op_count() == 0
    }

    fn sort(&mut self) {
        self.create_users.sort_by(|a, b| a.username.cmp(&b.username));
        self.update_users
            .sort_by(|a, b| a.user.username.cmp(&b.user.username));
        self.create_groups.sort_by(|a, b| a.name.cmp(&b.name));
        self.recreate_groups
            .sort_by(|a, b| a.group.name.cmp(&b.group.name));
        self.update_groups.sort_by(|a, b| a.name.cmp(&b.name));
        self.remove_members
            .sort_by(|a, b| (&a.group, &a.username).cmp(&(&b.group, &b.username)));
        self.add_members
            .sort_by(|a, b| (&a.group, &a.username).cmp(&(&b.group, &b.username)));
        self.ban_users.sort_by(|a, b| a.username.cmp(&b.username));
        self.remove_users.sort();
        self.remove_groups.sort();
    }
}

/// Compute the plan that transforms the target view into the image of the
/// source view.
///
/// Both views must already be restricted to managed principals. Fails
/// without producing a plan when canonicalization yields an empty name or
/// two principals contend for one canonical name.
pub fn build_plan(
    source_users: &[SourceUser],
    source_groups: &[SourceGroupWithMembers],
    target_users: &[TargetUser],
    target_groups: &[TargetGroupWithMembers],
    now: DateTime<Utc>,
    config: &DiffConfig,
) -> Result<Plan> {
    let ban_window = chrono::Duration::from_std(config.ban_before_remove_duration)
        .map_err(|e| IdSyncError::Config(format!("ban_before_remove_duration: {e}")))?;

    let mut plan = Plan::default();

    // Canonical username per source id, with collision detection among the
    // source users themselves.
    let mut usernames: BTreeMap<&str, String> = BTreeMap::new();
    let mut claimed: HashMap<String, &str> = HashMap::new();
    for user in source_users {
        let username = canonicalize(&user.principal_name, &config.username_replacements)?;
        if let Some(holder) = claimed.insert(username.clone(), &user.source_id) {
            return Err(IdSyncError::NameCollision(format!(
                "source users {holder} and {} both map to username {username:?}",
                user.source_id
            )));
        }
        usernames.insert(&user.source_id, username);
    }

    // A rename must not land on a managed user owned by a different source
    // identity.
    let target_by_name: HashMap<&str, &TargetUser> = target_users
        .iter()
        .map(|user| (user.username.as_str(), user))
        .collect();
    for (source_id, username) in &usernames {
        if let Some(existing) = target_by_name.get(username.as_str()) {
            if existing.source_id() != Some(*source_id) {
                return Err(IdSyncError::NameCollision(format!(
                    "username {username:?} is already held by a different principal"
                )));
            }
        }
    }

    let target_by_id: HashMap<&str, &TargetUser> = target_users
        .iter()
        .filter_map(|user| user.source_id().map(|id| (id, user)))
        .collect();

    for user in source_users {
        let Some(username) = usernames.get(user.source_id.as_str()) else {
            continue;
        };
        match target_by_id.get(user.source_id.as_str()) {
            None => {
                plan.create_users
                    .push(TargetUser::from_source(user, username.clone()));
            }
            Some(existing) => {
                let mut desired = TargetUser::from_source(user, username.clone());
                if let (Some(next), Some(current)) =
                    (desired.source.as_mut(), existing.source.as_ref())
                {
                    // Attributes this synchronizer does not own ride along.
                    next.extra = current.extra.clone();
                }
                let same_attrs = match (existing.source.as_ref(), desired.source.as_ref()) {
                    (Some(current), Some(next)) => current.mirrors(next),
                    _ => false,
                };
                if existing.username != *username || existing.is_banned() || !same_attrs {
                    plan.update_users.push(UserUpdate {
                        username: existing.username.clone(),
                        user: desired,
                    });
                }
            }
        }
    }

    for target in target_users {
        let Some(id) = target.source_id() else {
            continue;
        };
        if usernames.contains_key(id) {
            continue;
        }
        if ban_window.is_zero() {
            plan.remove_users.push(target.username.clone());
        } else {
            match target.banned_since {
                None => plan.ban_users.push(UserBan {
                    username: target.username.clone(),
                    since: now,
                }),
                Some(banned_since) => {
                    if now.signed_duration_since(banned_since) >= ban_window {
                        plan.remove_users.push(target.username.clone());
                    }
                    // Otherwise the user is waiting out the ban window.
                }
            }
        }
    }

    // Canonical group name per source id.
    let mut groupnames: BTreeMap<&str, String> = BTreeMap::new();
    let mut claimed_groups: HashMap<String, &str> = HashMap::new();
    for source_group in source_groups {
        let name = canonicalize(
            &source_group.group.identity,
            &config.groupname_replacements,
        )?;
        if let Some(holder) = claimed_groups.insert(name.clone(), &source_group.group.source_id) {
            return Err(IdSyncError::NameCollision(format!(
                "source groups {holder} and {} both map to name {name:?}",
                source_group.group.source_id
            )));
        }
        groupnames.insert(&source_group.group.source_id, name);
    }

    let group_by_name: HashMap<&str, &TargetGroupWithMembers> = target_groups
        .iter()
        .map(|group| (group.group.name.as_str(), group))
        .collect();
    for (source_id, name) in &groupnames {
        if let Some(existing) = group_by_name.get(name.as_str()) {
            if existing.group.source_id() != Some(*source_id) {
                return Err(IdSyncError::NameCollision(format!(
                    "group name {name:?} is already held by a different principal"
                )));
            }
        }
    }

    let group_by_id: HashMap<&str, &TargetGroupWithMembers> = target_groups
        .iter()
        .filter_map(|group| group.group.source_id().map(|id| (id, group)))
        .collect();

    // Membership deltas must survive user renames happening in the same
    // tick: current member lists still carry the old names.
    let renames: HashMap<String, String> = plan
        .update_users
        .iter()
        .filter(|update| update.username != update.user.username)
        .map(|update| (update.username.clone(), update.user.username.clone()))
        .collect();

    for source_group in source_groups {
        let Some(name) = groupnames.get(source_group.group.source_id.as_str()) else {
            continue;
        };
        // Members resolve through the user join; ids outside the synced
        // user set are dropped.
        let desired_members: BTreeSet<String> = source_group
            .members
            .iter()
            .filter_map(|id| usernames.get(id.as_str()).cloned())
            .collect();

        match group_by_id.get(source_group.group.source_id.as_str()) {
            None => {
                plan.create_groups
                    .push(TargetGroup::from_source(&source_group.group, name.clone()));
                plan.add_members
                    .extend(desired_members.into_iter().map(|username| Membership {
                        username,
                        group: name.clone(),
                    }));
            }
            Some(existing) => {
                let mut desired = TargetGroup::from_source(&source_group.group, name.clone());
                if let (Some(next), Some(current)) =
                    (desired.source.as_mut(), existing.group.source.as_ref())
                {
                    next.extra = current.extra.clone();
                }

                if existing.group.name != *name {
                    // Name change: remove and recreate, membership rebuilt
                    // from scratch.
                    plan.recreate_groups.push(GroupRecreate {
                        old_name: existing.group.name.clone(),
                        group: desired,
                    });
                    plan.add_members
                        .extend(desired_members.into_iter().map(|username| Membership {
                            username,
                            group: name.clone(),
                        }));
                    continue;
                }

                let same_attrs = match (existing.group.source.as_ref(), desired.source.as_ref()) {
                    (Some(current), Some(next)) => current.mirrors(next),
                    _ => false,
                };
                if !same_attrs {
                    plan.update_groups.push(GroupUpdate {
                        name: name.clone(),
                        group: desired,
                    });
                }

                let current_members: BTreeSet<String> = existing
                    .members
                    .iter()
                    .map(|member| renames.get(member).unwrap_or(member).clone())
                    .collect();
                for username in desired_members.difference(&current_members) {
                    plan.add_members.push(Membership {
                        username: username.clone(),
                        group: name.clone(),
                    });
                }
                for username in current_members.difference(&desired_members) {
                    plan.remove_members.push(Membership {
                        username: username.clone(),
                        group: name.clone(),
                    });
                }
            }
        }
    }

    for target in target_groups {
        let Some(id) = target.group.source_id() else {
            continue;
        };
        if groupnames.contains_key(id) {
            continue;
        }
        plan.remove_groups.push(target.group.name.clone());
    }

    plan.sort();
    Ok(plan)
}
