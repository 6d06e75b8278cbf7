//! Read side of the sync: the corporate directory being mirrored.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::source::{SourceGroupWithMembers, SourceUser};

/// Point-in-time view of the source of truth.
///
/// Listings must behave like a snapshot: a mid-fetch change may shift
/// paging but must never surface the same `source_id` twice.
#[async_trait]
pub trait SourceDirectory: Send + Sync {
    /// All users passing the configured source filters.
    async fn list_users(&self) -> Result<Vec<SourceUser>>;

    /// All groups passing the configured source filters, with the
    /// `source_id`s of their members.
    async fn list_groups_with_members(&self) -> Result<Vec<SourceGroupWithMembers>>;
}
