//! Typed reqwest wrapper for the YTsaurus HTTP proxy.
//!
//! Every operation is one proxy command POSTed to `/api/v3/{command}`
//! with its parameters as a JSON body. Principals live under
//! `//sys/users` and `//sys/groups`; the mirrored source fields sit in a
//! single map attribute whose name is configurable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use idsync_core::config::YtsaurusConfig;
use idsync_core::error::{IdSyncError, Result};
use idsync_core::models::target::{
    format_ban_time, is_reserved, parse_ban_time, GroupSourceAttrs, TargetGroup,
    TargetGroupWithMembers, TargetUser, UserSourceAttrs,
};
use idsync_core::store::AccessStore;

const USERS_PATH: &str = "//sys/users";
const GROUPS_PATH: &str = "//sys/groups";

/// A cypress node returned by `list` together with requested attributes.
#[derive(Debug, Deserialize)]
struct NodeEntry {
    #[serde(rename = "$value")]
    value: String,
    #[serde(rename = "$attributes", default)]
    attributes: serde_json::Map<String, Value>,
}

/// HTTP proxy client for one YTsaurus cluster.
pub struct YtClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    source_attribute: String,
}

impl YtClient {
    /// Create a client from the target section of the configuration and
    /// the API token.
    pub fn new(config: &YtsaurusConfig, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IdSyncError::TargetUnavailable(format!("client setup failed: {e}")))?;
        let base_url = if config.proxy.starts_with("http://") || config.proxy.starts_with("https://")
        {
            config.proxy.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", config.proxy)
        };
        Ok(Self {
            http,
            base_url,
            token: token.to_string(),
            source_attribute: config.source_attribute_name.clone(),
        })
    }

    /// Override the base URL (for testing with wiremock).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Verify the proxy answers and the token is accepted.
    pub async fn test_connection(&self) -> Result<()> {
        self.invoke("get", json!({ "path": "//@" })).await?;
        Ok(())
    }

    async fn invoke(&self, command: &str, params: Value) -> Result<reqwest::Response> {
        debug!(command, %params, "proxy command");
        let resp = self
            .http
            .post(format!("{}/api/v3/{command}", self.base_url))
            .header("Authorization", format!("OAuth {}", self.token))
            .json(&params)
            .send()
            .await
            .map_err(|e| IdSyncError::TargetUnavailable(format!("{command} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IdSyncError::TargetUnavailable(format!(
                "{command} failed ({status}): {body}"
            )));
        }
        Ok(resp)
    }

    async fn command<T: serde::de::DeserializeOwned>(
        &self,
        command: &str,
        params: Value,
    ) -> Result<T> {
        let resp = self.invoke(command, params).await?;
        resp.json::<T>().await.map_err(|e| {
            IdSyncError::TargetUnavailable(format!("{command} response parse failed: {e}"))
        })
    }

    /// Read a node, mapping a missing path to `None`.
    async fn get_node(&self, path: &str) -> Result<Option<Value>> {
        let resp = self
            .http
            .post(format!("{}/api/v3/get", self.base_url))
            .header("Authorization", format!("OAuth {}", self.token))
            .json(&json!({ "path": path }))
            .send()
            .await
            .map_err(|e| IdSyncError::TargetUnavailable(format!("get request failed: {e}")))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IdSyncError::TargetUnavailable(format!(
                "get {path} failed ({status}): {body}"
            )));
        }
        let value = resp.json::<Value>().await.map_err(|e| {
            IdSyncError::TargetUnavailable(format!("get {path} parse failed: {e}"))
        })?;
        Ok(Some(value))
    }

    /// Client-side mirror of the platform's manual-management guard: a
    /// reserved name or a principal without a usable source bag must not
    /// be mutated, whatever the plan says.
    async fn ensure_managed(&self, root: &str, name: &str) -> Result<()> {
        if is_reserved(name) {
            return Err(IdSyncError::ManualManaged(name.to_string()));
        }
        let bag = self
            .get_node(&format!("{root}/{name}/@{}", self.source_attribute))
            .await?;
        match bag {
            Some(Value::Object(map)) if bag_id_present(&map) => Ok(()),
            _ => Err(IdSyncError::ManualManaged(name.to_string())),
        }
    }

    fn user_attrs_value(&self, user: &TargetUser) -> Result<(String, Value)> {
        let Some(attrs) = user.source.as_ref() else {
            // Writing a bagless user would strip it of management; the
            // guard exists to prevent exactly that class of mistake.
            return Err(IdSyncError::ManualManaged(user.username.clone()));
        };
        let value = serde_json::to_value(attrs).map_err(|e| {
            IdSyncError::TargetUnavailable(format!("serialize source attributes: {e}"))
        })?;
        Ok((self.source_attribute.clone(), value))
    }

    fn group_attrs_value(&self, group: &TargetGroup) -> Result<(String, Value)> {
        let Some(attrs) = group.source.as_ref() else {
            return Err(IdSyncError::ManualManaged(group.name.clone()));
        };
        let value = serde_json::to_value(attrs).map_err(|e| {
            IdSyncError::TargetUnavailable(format!("serialize source attributes: {e}"))
        })?;
        Ok((self.source_attribute.clone(), value))
    }
}

fn bag_id_present(map: &serde_json::Map<String, Value>) -> bool {
    map.get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty())
}

fn user_from_entry(entry: NodeEntry, source_attribute: &str) -> Result<TargetUser> {
    let source = match entry.attributes.get(source_attribute) {
        Some(Value::Object(map)) if !map.is_empty() => {
            let attrs: UserSourceAttrs = serde_json::from_value(Value::Object(map.clone()))
                .map_err(|e| {
                    IdSyncError::TargetUnavailable(format!(
                        "user {}: malformed {source_attribute} attribute: {e}",
                        entry.value
                    ))
                })?;
            Some(attrs)
        }
        _ => None,
    };
    let banned_since = match entry.attributes.get("banned_since").and_then(Value::as_str) {
        None | Some("") => None,
        Some(raw) => Some(parse_ban_time(raw).ok_or_else(|| {
            IdSyncError::TargetUnavailable(format!(
                "user {}: unparsable banned_since {raw:?}",
                entry.value
            ))
        })?),
    };
    Ok(TargetUser {
        username: entry.value,
        source,
        banned_since,
    })
}

fn group_from_entry(entry: NodeEntry, source_attribute: &str) -> Result<TargetGroupWithMembers> {
    let source = match entry.attributes.get(source_attribute) {
        Some(Value::Object(map)) if !map.is_empty() => {
            let attrs: GroupSourceAttrs = serde_json::from_value(Value::Object(map.clone()))
                .map_err(|e| {
                    IdSyncError::TargetUnavailable(format!(
                        "group {}: malformed {source_attribute} attribute: {e}",
                        entry.value
                    ))
                })?;
            Some(attrs)
        }
        _ => None,
    };
    let members = match entry.attributes.get("members") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Default::default(),
    };
    Ok(TargetGroupWithMembers {
        group: TargetGroup {
            name: entry.value,
            source,
        },
        members,
    })
}

#[async_trait]
impl AccessStore for YtClient {
    async fn list_users(&self) -> Result<Vec<TargetUser>> {
        let entries: Vec<NodeEntry> = self
            .command(
                "list",
                json!({
                    "path": USERS_PATH,
                    "attributes": [self.source_attribute, "banned", "banned_since"],
                }),
            )
            .await?;
        entries
            .into_iter()
            .map(|entry| user_from_entry(entry, &self.source_attribute))
            .collect()
    }

    async fn list_groups_with_members(&self) -> Result<Vec<TargetGroupWithMembers>> {
        let entries: Vec<NodeEntry> = self
            .command(
                "list",
                json!({
                    "path": GROUPS_PATH,
                    "attributes": [self.source_attribute, "members"],
                }),
            )
            .await?;
        entries
            .into_iter()
            .map(|entry| group_from_entry(entry, &self.source_attribute))
            .collect()
    }

    async fn create_user(&self, user: &TargetUser) -> Result<()> {
        let (attr_name, attrs) = self.user_attrs_value(user)?;
        let mut attributes = serde_json::Map::new();
        attributes.insert("name".to_string(), Value::String(user.username.clone()));
        attributes.insert(attr_name, attrs);
        self.invoke(
            "create",
            json!({ "type": "user", "attributes": attributes }),
        )
        .await?;
        Ok(())
    }

    async fn update_user(&self, username: &str, user: &TargetUser) -> Result<()> {
        self.ensure_managed(USERS_PATH, username).await?;
        let (attr_name, attrs) = self.user_attrs_value(user)?;
        // The name attribute is deliberately absent here: the proxy
        // rejects rewriting @name with its current value, so a rename is
        // its own call.
        let mut input = serde_json::Map::new();
        input.insert(attr_name, attrs);
        input.insert("banned".to_string(), Value::Bool(false));
        input.insert("banned_since".to_string(), Value::String(String::new()));
        self.invoke(
            "multiset_attributes",
            json!({
                "path": format!("{USERS_PATH}/{username}/@"),
                "input": input,
            }),
        )
        .await?;
        if username != user.username {
            self.invoke(
                "set",
                json!({
                    "path": format!("{USERS_PATH}/{username}/@name"),
                    "input": user.username,
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn ban_user(&self, username: &str, since: DateTime<Utc>) -> Result<()> {
        self.ensure_managed(USERS_PATH, username).await?;
        self.invoke(
            "multiset_attributes",
            json!({
                "path": format!("{USERS_PATH}/{username}/@"),
                "input": { "banned": true, "banned_since": format_ban_time(since) },
            }),
        )
        .await?;
        Ok(())
    }

    async fn remove_user(&self, username: &str) -> Result<()> {
        self.ensure_managed(USERS_PATH, username).await?;
        self.invoke("remove", json!({ "path": format!("{USERS_PATH}/{username}") }))
            .await?;
        Ok(())
    }

    async fn create_group(&self, group: &TargetGroup) -> Result<()> {
        let (attr_name, attrs) = self.group_attrs_value(group)?;
        let mut attributes = serde_json::Map::new();
        attributes.insert("name".to_string(), Value::String(group.name.clone()));
        attributes.insert(attr_name, attrs);
        self.invoke(
            "create",
            json!({ "type": "group", "attributes": attributes }),
        )
        .await?;
        Ok(())
    }

    async fn update_group(&self, name: &str, group: &TargetGroup) -> Result<()> {
        self.ensure_managed(GROUPS_PATH, name).await?;
        let (attr_name, attrs) = self.group_attrs_value(group)?;
        let mut input = serde_json::Map::new();
        input.insert(attr_name, attrs);
        self.invoke(
            "multiset_attributes",
            json!({
                "path": format!("{GROUPS_PATH}/{name}/@"),
                "input": input,
            }),
        )
        .await?;
        Ok(())
    }

    async fn remove_group(&self, name: &str) -> Result<()> {
        self.ensure_managed(GROUPS_PATH, name).await?;
        self.invoke("remove", json!({ "path": format!("{GROUPS_PATH}/{name}") }))
            .await?;
        Ok(())
    }

    async fn add_member(&self, username: &str, group: &str) -> Result<()> {
        if is_reserved(username) {
            return Err(IdSyncError::ManualManaged(username.to_string()));
        }
        self.ensure_managed(GROUPS_PATH, group).await?;
        self.invoke("add_member", json!({ "group": group, "member": username }))
            .await?;
        Ok(())
    }

    async fn remove_member(&self, username: &str, group: &str) -> Result<()> {
        if is_reserved(username) {
            return Err(IdSyncError::ManualManaged(username.to_string()));
        }
        self.ensure_managed(GROUPS_PATH, group).await?;
        self.invoke(
            "remove_member",
            json!({ "group": group, "member": username }),
        )
        .await?;
        Ok(())
    }
}
