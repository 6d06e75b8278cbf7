//! Paged Microsoft Graph listing for users and groups.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;

use idsync_core::config::AzureConfig;
use idsync_core::error::{IdSyncError, Result};
use idsync_core::models::source::{SourceGroup, SourceGroupWithMembers, SourceUser};
use idsync_core::source::SourceDirectory;

use crate::auth::{token_url, AzureAuth};
use crate::models::{GraphGroup, GraphList, GraphMember, GraphUser};

const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
const PAGE_SIZE: u32 = 999;
const USER_SELECT: &str = "id,userPrincipalName,mail,givenName,surname,displayName";
const GROUP_SELECT: &str = "id,displayName";

/// Graph client exposing the filtered directory as a [`SourceDirectory`].
pub struct AzureDirectory {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    users_filter: String,
    groups_filter: String,
    groups_display_name_suffix: String,
    auth: Mutex<Option<AzureAuth>>,
}

impl AzureDirectory {
    /// Create a connector from the azure section of the configuration and
    /// the application client secret.
    pub fn new(config: &AzureConfig, client_secret: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IdSyncError::SourceUnavailable(format!("client setup failed: {e}")))?;
        Ok(Self {
            http,
            base_url: GRAPH_API_BASE.to_string(),
            token_url: token_url(&config.tenant),
            client_id: config.client_id.clone(),
            client_secret: client_secret.to_string(),
            users_filter: config.users_filter.clone(),
            groups_filter: config.groups_filter.clone(),
            groups_display_name_suffix: config.groups_display_name_suffix_post_filter.clone(),
            auth: Mutex::new(None),
        })
    }

    /// Override the API base URL (for testing with wiremock).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Override the token endpoint (for testing with wiremock).
    pub fn with_token_url(mut self, url: &str) -> Self {
        self.token_url = url.to_string();
        self
    }

    /// Verify credentials by fetching a token and the first user page.
    pub async fn test_connection(&self) -> Result<()> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .get(format!("{}/users", self.base_url))
            .bearer_auth(&token)
            .query(&[("$top", "1"), ("$select", "id")])
            .send()
            .await
            .map_err(|e| IdSyncError::SourceUnavailable(format!("probe failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(IdSyncError::SourceUnavailable(format!(
                "probe failed ({})",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Current bearer token, refreshed through the client-credentials
    /// flow when missing or expired.
    async fn bearer(&self) -> Result<String> {
        let mut auth = self.auth.lock().await;
        if auth.as_ref().map_or(true, AzureAuth::is_expired) {
            debug!("refreshing Graph access token");
            *auth = Some(
                AzureAuth::client_credentials(
                    &self.http,
                    &self.token_url,
                    &self.client_id,
                    &self.client_secret,
                )
                .await?,
            );
        }
        Ok(auth
            .as_ref()
            .map(|a| a.token().to_string())
            .unwrap_or_default())
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<GraphList<T>> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&token)
            .query(query)
            .send()
            .await
            .map_err(|e| IdSyncError::SourceUnavailable(format!("{url} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IdSyncError::SourceUnavailable(format!(
                "listing failed ({status}): {body}"
            )));
        }

        resp.json::<GraphList<T>>()
            .await
            .map_err(|e| IdSyncError::SourceUnavailable(format!("listing parse failed: {e}")))
    }

    /// Collect every page of a collection, following `@odata.nextLink`.
    async fn list_all<T: DeserializeOwned>(
        &self,
        first_url: String,
        query: Vec<(&str, String)>,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next: Option<String> = None;
        loop {
            let page: GraphList<T> = match &next {
                // The nextLink carries the whole query string verbatim.
                Some(url) => self.get_page(url, &[]).await?,
                None => {
                    let query: Vec<(&str, &str)> =
                        query.iter().map(|(k, v)| (*k, v.as_str())).collect();
                    self.get_page(&first_url, &query).await?
                }
            };
            items.extend(page.value);
            match page.next_link {
                Some(link) => next = Some(link),
                None => break,
            }
        }
        Ok(items)
    }

    async fn list_group_member_ids(&self, group_id: &str) -> Result<BTreeSet<String>> {
        let members: Vec<GraphMember> = self
            .list_all(
                format!("{}/groups/{group_id}/members", self.base_url),
                vec![
                    ("$top", PAGE_SIZE.to_string()),
                    ("$select", "id".to_string()),
                ],
            )
            .await?;
        Ok(members.into_iter().map(|member| member.id).collect())
    }
}

#[async_trait]
impl SourceDirectory for AzureDirectory {
    async fn list_users(&self) -> Result<Vec<SourceUser>> {
        let mut query = vec![
            ("$top", PAGE_SIZE.to_string()),
            ("$select", USER_SELECT.to_string()),
        ];
        if !self.users_filter.is_empty() {
            query.push(("$filter", self.users_filter.clone()));
        }
        let users: Vec<GraphUser> = self
            .list_all(format!("{}/users", self.base_url), query)
            .await?;
        debug!(count = users.len(), "listed source users");
        Ok(users.into_iter().map(SourceUser::from).collect())
    }

    async fn list_groups_with_members(&self) -> Result<Vec<SourceGroupWithMembers>> {
        let mut query = vec![
            ("$top", PAGE_SIZE.to_string()),
            ("$select", GROUP_SELECT.to_string()),
        ];
        if !self.groups_filter.is_empty() {
            query.push(("$filter", self.groups_filter.clone()));
        }
        let groups: Vec<GraphGroup> = self
            .list_all(format!("{}/groups", self.base_url), query)
            .await?;

        let mut result = Vec::new();
        for group in groups {
            if !self.groups_display_name_suffix.is_empty()
                && !group
                    .display_name
                    .ends_with(&self.groups_display_name_suffix)
            {
                continue;
            }
            let members = self.list_group_member_ids(&group.id).await?;
            result.push(SourceGroupWithMembers {
                group: SourceGroup::from(group),
                members,
            });
        }
        debug!(count = result.len(), "listed source groups");
        Ok(result)
    }
}
