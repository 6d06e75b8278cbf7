//! Records stored in the target access-control store.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::source::{SourceGroup, SourceUser};

/// Principals the synchronizer must never touch, on top of anything
/// without a source attribute bag.
pub const RESERVED_NAMES: [&str; 3] = ["root", "guest", "job"];

/// Timestamp layout of the persisted `banned_since` attribute.
pub const BAN_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Whether a principal name is reserved for the platform itself.
///
/// This predicate backs both the target-view filter and the client-side
/// mutation guard; the two must agree.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

pub fn format_ban_time(t: DateTime<Utc>) -> String {
    t.format(BAN_TIME_FORMAT).to_string()
}

pub fn parse_ban_time(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, BAN_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// The source attribute bag persisted on each managed user.
///
/// Unknown keys land in `extra` and are written back verbatim, so an
/// update never drops attributes this synchronizer does not own.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserSourceAttrs {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub principal_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl UserSourceAttrs {
    /// Project the mirrored fields from a source user.
    pub fn from_source(user: &SourceUser) -> Self {
        Self {
            id: user.source_id.clone(),
            principal_name: user.principal_name.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            display_name: user.display_name.clone(),
            extra: BTreeMap::new(),
        }
    }

    /// True when the mirrored fields match. `extra` does not participate:
    /// attributes not originating from the source are never diffed.
    pub fn mirrors(&self, other: &Self) -> bool {
        self.id == other.id
            && self.principal_name == other.principal_name
            && self.email == other.email
            && self.first_name == other.first_name
            && self.last_name == other.last_name
            && self.display_name == other.display_name
    }
}

/// A user principal as it exists in the target store.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetUser {
    pub username: String,
    pub source: Option<UserSourceAttrs>,
    pub banned_since: Option<DateTime<Utc>>,
}

impl TargetUser {
    /// Build the target user implied by a source user under the given
    /// canonical username.
    pub fn from_source(user: &SourceUser, username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            source: Some(UserSourceAttrs::from_source(user)),
            banned_since: None,
        }
    }

    pub fn is_banned(&self) -> bool {
        self.banned_since.is_some()
    }

    /// A principal this synchronizer must leave alone: reserved, or
    /// carrying no usable source attribute bag.
    pub fn is_manually_managed(&self) -> bool {
        is_reserved(&self.username)
            || match &self.source {
                None => true,
                Some(attrs) => attrs.id.is_empty(),
            }
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source
            .as_ref()
            .map(|attrs| attrs.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// The source attribute bag persisted on each managed group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupSourceAttrs {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub identity: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl GroupSourceAttrs {
    pub fn from_source(group: &SourceGroup) -> Self {
        Self {
            id: group.source_id.clone(),
            display_name: group.display_name.clone(),
            identity: group.identity.clone(),
            extra: BTreeMap::new(),
        }
    }

    pub fn mirrors(&self, other: &Self) -> bool {
        self.id == other.id
            && self.display_name == other.display_name
            && self.identity == other.identity
    }
}

/// A group principal as it exists in the target store.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGroup {
    pub name: String,
    pub source: Option<GroupSourceAttrs>,
}

impl TargetGroup {
    pub fn from_source(group: &SourceGroup, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: Some(GroupSourceAttrs::from_source(group)),
        }
    }

    pub fn is_manually_managed(&self) -> bool {
        is_reserved(&self.name)
            || match &self.source {
                None => true,
                Some(attrs) => attrs.id.is_empty(),
            }
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source
            .as_ref()
            .map(|attrs| attrs.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// A target group together with its member usernames.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGroupWithMembers {
    pub group: TargetGroup,
    pub members: BTreeSet<String>,
}
