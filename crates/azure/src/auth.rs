//! OAuth2 client-credentials authentication for Microsoft Graph.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use idsync_core::error::{IdSyncError, Result};

/// Scope granting whatever application permissions the app registration
/// carries.
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Refresh this long before the reported expiry to absorb clock skew.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Token endpoint URL for a tenant.
pub fn token_url(tenant: &str) -> String {
    format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token")
}

/// Holds an OAuth2 bearer token for Graph requests, with expiry tracking.
#[derive(Debug, Clone)]
pub struct AzureAuth {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl AzureAuth {
    /// Exchange application credentials for an access token.
    pub async fn client_credentials(
        http: &reqwest::Client,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Self> {
        let resp = http
            .post(token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| {
                IdSyncError::SourceUnavailable(format!("token request failed: {e}"))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IdSyncError::SourceUnavailable(format!(
                "token request failed ({status}): {body}"
            )));
        }

        let token: TokenResponse = resp.json().await.map_err(|e| {
            IdSyncError::SourceUnavailable(format!("token response parse failed: {e}"))
        })?;

        Ok(Self {
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in - EXPIRY_SKEW_SECS),
        })
    }

    pub fn token(&self) -> &str {
        &self.access_token
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}
