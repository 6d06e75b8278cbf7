//! In-memory fakes shared by the engine tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use idsync_core::error::{IdSyncError, Result};
use idsync_core::models::source::{SourceGroupWithMembers, SourceUser};
use idsync_core::models::target::{
    is_reserved, TargetGroup, TargetGroupWithMembers, TargetUser,
};
use idsync_core::source::SourceDirectory;
use idsync_core::store::AccessStore;

/// Scripted source directory.
#[derive(Default)]
pub struct FakeDirectory {
    users: Mutex<Vec<SourceUser>>,
    groups: Mutex<Vec<SourceGroupWithMembers>>,
    offline: Mutex<bool>,
}

impl FakeDirectory {
    pub fn new(users: Vec<SourceUser>, groups: Vec<SourceGroupWithMembers>) -> Self {
        Self {
            users: Mutex::new(users),
            groups: Mutex::new(groups),
            offline: Mutex::new(false),
        }
    }

    pub fn set_users(&self, users: Vec<SourceUser>) {
        *self.users.lock().unwrap() = users;
    }

    pub fn set_groups(&self, groups: Vec<SourceGroupWithMembers>) {
        *self.groups.lock().unwrap() = groups;
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    fn check_online(&self) -> Result<()> {
        if *self.offline.lock().unwrap() {
            return Err(IdSyncError::SourceUnavailable("directory offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceDirectory for FakeDirectory {
    async fn list_users(&self) -> Result<Vec<SourceUser>> {
        self.check_online()?;
        Ok(self.users.lock().unwrap().clone())
    }

    async fn list_groups_with_members(&self) -> Result<Vec<SourceGroupWithMembers>> {
        self.check_online()?;
        Ok(self.groups.lock().unwrap().clone())
    }
}

/// In-memory stand-in for the target platform, including its
/// manual-management guard and rename semantics (member lists follow a
/// renamed user automatically).
#[derive(Default)]
pub struct InMemoryStore {
    users: Mutex<BTreeMap<String, TargetUser>>,
    groups: Mutex<BTreeMap<String, (TargetGroup, BTreeSet<String>)>>,
    fail_names: Mutex<BTreeSet<String>>,
    mutations: Mutex<u64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_user(&self, user: TargetUser) {
        self.users
            .lock()
            .unwrap()
            .insert(user.username.clone(), user);
    }

    pub fn seed_group(&self, group: TargetGroup, members: &[&str]) {
        self.groups.lock().unwrap().insert(
            group.name.clone(),
            (group, members.iter().map(|m| m.to_string()).collect()),
        );
    }

    /// Make every mutation touching `name` fail with a transient error.
    pub fn fail_on(&self, name: &str) {
        self.fail_names.lock().unwrap().insert(name.to_string());
    }

    pub fn users(&self) -> BTreeMap<String, TargetUser> {
        self.users.lock().unwrap().clone()
    }

    pub fn groups(&self) -> BTreeMap<String, (TargetGroup, BTreeSet<String>)> {
        self.groups.lock().unwrap().clone()
    }

    /// Mutations applied so far; unchanged across a no-op tick.
    pub fn mutation_count(&self) -> u64 {
        *self.mutations.lock().unwrap()
    }

    fn check_fail(&self, name: &str) -> Result<()> {
        if self.fail_names.lock().unwrap().contains(name) {
            return Err(IdSyncError::TargetUnavailable(format!(
                "injected failure for {name}"
            )));
        }
        Ok(())
    }

    fn guard_user(&self, username: &str) -> Result<()> {
        if is_reserved(username) {
            return Err(IdSyncError::ManualManaged(username.to_string()));
        }
        if let Some(user) = self.users.lock().unwrap().get(username) {
            if user.is_manually_managed() {
                return Err(IdSyncError::ManualManaged(username.to_string()));
            }
        }
        Ok(())
    }

    fn guard_group(&self, name: &str) -> Result<()> {
        if is_reserved(name) {
            return Err(IdSyncError::ManualManaged(name.to_string()));
        }
        if let Some((group, _)) = self.groups.lock().unwrap().get(name) {
            if group.is_manually_managed() {
                return Err(IdSyncError::ManualManaged(name.to_string()));
            }
        }
        Ok(())
    }

    fn record_mutation(&self) {
        *self.mutations.lock().unwrap() += 1;
    }
}

#[async_trait]
impl AccessStore for InMemoryStore {
    async fn list_users(&self) -> Result<Vec<TargetUser>> {
        Ok(self.users.lock().unwrap().values().cloned().collect())
    }

    async fn list_groups_with_members(&self) -> Result<Vec<TargetGroupWithMembers>> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .values()
            .map(|(group, members)| TargetGroupWithMembers {
                group: group.clone(),
                members: members.clone(),
            })
            .collect())
    }

    async fn create_user(&self, user: &TargetUser) -> Result<()> {
        self.check_fail(&user.username)?;
        let mut users = self.users.lock().unwrap();
        if users.contains_key(&user.username) {
            return Err(IdSyncError::TargetUnavailable(format!(
                "user {} already exists",
                user.username
            )));
        }
        users.insert(user.username.clone(), user.clone());
        self.record_mutation();
        Ok(())
    }

    async fn update_user(&self, username: &str, user: &TargetUser) -> Result<()> {
        self.guard_user(username)?;
        self.check_fail(username)?;
        let mut users = self.users.lock().unwrap();
        if users.remove(username).is_none() {
            return Err(IdSyncError::TargetUnavailable(format!(
                "no such user {username}"
            )));
        }
        users.insert(user.username.clone(), user.clone());
        drop(users);
        if username != user.username {
            let mut groups = self.groups.lock().unwrap();
            for (_, members) in groups.values_mut() {
                if members.remove(username) {
                    members.insert(user.username.clone());
                }
            }
        }
        self.record_mutation();
        Ok(())
    }

    async fn ban_user(&self, username: &str, since: DateTime<Utc>) -> Result<()> {
        self.guard_user(username)?;
        self.check_fail(username)?;
        let mut users = self.users.lock().unwrap();
        match users.get_mut(username) {
            Some(user) => {
                user.banned_since = Some(since);
                self.record_mutation();
                Ok(())
            }
            None => Err(IdSyncError::TargetUnavailable(format!(
                "no such user {username}"
            ))),
        }
    }

    async fn remove_user(&self, username: &str) -> Result<()> {
        self.guard_user(username)?;
        self.check_fail(username)?;
        let mut users = self.users.lock().unwrap();
        if users.remove(username).is_none() {
            return Err(IdSyncError::TargetUnavailable(format!(
                "no such user {username}"
            )));
        }
        drop(users);
        let mut groups = self.groups.lock().unwrap();
        for (_, members) in groups.values_mut() {
            members.remove(username);
        }
        self.record_mutation();
        Ok(())
    }

    async fn create_group(&self, group: &TargetGroup) -> Result<()> {
        self.check_fail(&group.name)?;
        let mut groups = self.groups.lock().unwrap();
        if groups.contains_key(&group.name) {
            return Err(IdSyncError::TargetUnavailable(format!(
                "group {} already exists",
                group.name
            )));
        }
        groups.insert(group.name.clone(), (group.clone(), BTreeSet::new()));
        self.record_mutation();
        Ok(())
    }

    async fn update_group(&self, name: &str, group: &TargetGroup) -> Result<()> {
        self.guard_group(name)?;
        self.check_fail(name)?;
        let mut groups = self.groups.lock().unwrap();
        match groups.get_mut(name) {
            Some((existing, _)) => {
                *existing = group.clone();
                self.record_mutation();
                Ok(())
            }
            None => Err(IdSyncError::TargetUnavailable(format!(
                "no such group {name}"
            ))),
        }
    }

    async fn remove_group(&self, name: &str) -> Result<()> {
        self.guard_group(name)?;
        self.check_fail(name)?;
        let mut groups = self.groups.lock().unwrap();
        if groups.remove(name).is_none() {
            return Err(IdSyncError::TargetUnavailable(format!(
                "no such group {name}"
            )));
        }
        self.record_mutation();
        Ok(())
    }

    async fn add_member(&self, username: &str, group: &str) -> Result<()> {
        if is_reserved(username) {
            return Err(IdSyncError::ManualManaged(username.to_string()));
        }
        self.guard_group(group)?;
        self.check_fail(username)?;
        let mut groups = self.groups.lock().unwrap();
        match groups.get_mut(group) {
            Some((_, members)) => {
                members.insert(username.to_string());
                self.record_mutation();
                Ok(())
            }
            None => Err(IdSyncError::TargetUnavailable(format!(
                "no such group {group}"
            ))),
        }
    }

    async fn remove_member(&self, username: &str, group: &str) -> Result<()> {
        if is_reserved(username) {
            return Err(IdSyncError::ManualManaged(username.to_string()));
        }
        self.guard_group(group)?;
        self.check_fail(username)?;
        let mut groups = self.groups.lock().unwrap();
        match groups.get_mut(group) {
            Some((_, members)) => {
                if !members.remove(username) {
                    return Err(IdSyncError::TargetUnavailable(format!(
                        "{username} is not a member of {group}"
                    )));
                }
                self.record_mutation();
                Ok(())
            }
            None => Err(IdSyncError::TargetUnavailable(format!(
                "no such group {group}"
            ))),
        }
    }
}
