//! Write side of the sync: the target platform's access-control store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::target::{TargetGroup, TargetGroupWithMembers, TargetUser};

/// Operations the applier needs from the target platform.
///
/// Listings return every principal, managed or not; the engine's target
/// view decides what is in scope. Mutations on reserved or unmanaged
/// principals must fail with [`crate::error::IdSyncError::ManualManaged`].
#[async_trait]
pub trait AccessStore: Send + Sync {
    async fn list_users(&self) -> Result<Vec<TargetUser>>;
    async fn list_groups_with_members(&self) -> Result<Vec<TargetGroupWithMembers>>;

    async fn create_user(&self, user: &TargetUser) -> Result<()>;

    /// Update `username` in place so it matches `user`, including a rename
    /// and clearing any ban timestamp.
    async fn update_user(&self, username: &str, user: &TargetUser) -> Result<()>;

    async fn ban_user(&self, username: &str, since: DateTime<Utc>) -> Result<()>;
    async fn remove_user(&self, username: &str) -> Result<()>;

    async fn create_group(&self, group: &TargetGroup) -> Result<()>;
    async fn update_group(&self, name: &str, group: &TargetGroup) -> Result<()>;
    async fn remove_group(&self, name: &str) -> Result<()>;

    async fn add_member(&self, username: &str, group: &str) -> Result<()>;
    async fn remove_member(&self, username: &str, group: &str) -> Result<()>;
}
