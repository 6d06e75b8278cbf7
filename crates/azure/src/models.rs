//! Microsoft Graph request/response structs.

use serde::Deserialize;

use idsync_core::models::source::{SourceGroup, SourceUser};

/// One page of a Graph collection.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct GraphList<T> {
    #[serde(default)]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// A directory user as returned by `/users`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphUser {
    pub id: String,
    #[serde(default)]
    pub user_principal_name: String,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl From<GraphUser> for SourceUser {
    fn from(user: GraphUser) -> Self {
        Self {
            source_id: user.id,
            principal_name: user.user_principal_name,
            email: user.mail.unwrap_or_default(),
            first_name: user.given_name.unwrap_or_default(),
            last_name: user.surname.unwrap_or_default(),
            display_name: user.display_name.unwrap_or_default(),
        }
    }
}

/// A directory group as returned by `/groups`. The display name doubles
/// as the group's identity string.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphGroup {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
}

impl From<GraphGroup> for SourceGroup {
    fn from(group: GraphGroup) -> Self {
        Self {
            source_id: group.id,
            identity: group.display_name.clone(),
            display_name: group.display_name,
        }
    }
}

/// A group member row; only the id is requested.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphMember {
    pub id: String,
}
