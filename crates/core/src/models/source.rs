//! Records fetched from the source directory.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// An external identity as reported by the source of truth.
///
/// `source_id` is stable and never reused; it is the join key between sync
/// runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUser {
    pub source_id: String,
    pub principal_name: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
}

/// An external group. `identity` is the human identity string the target
/// group name is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceGroup {
    pub source_id: String,
    pub identity: String,
    pub display_name: String,
}

/// A source group together with the `source_id`s of its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGroupWithMembers {
    pub group: SourceGroup,
    pub members: BTreeSet<String>,
}
