//! TOML-based configuration for the idsync daemon.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IdSyncError, Result};
use crate::names::ReplacementPair;

/// Environment variable holding the target platform API token.
pub const YTSAURUS_TOKEN_ENV: &str = "YT_TOKEN";

/// Environment variable holding the Azure application client secret.
pub const AZURE_SECRET_ENV: &str = "AZURE_CLIENT_SECRET";

/// Top-level idsync configuration, deserialized from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    pub azure: AzureConfig,
    pub ytsaurus: YtsaurusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Cadence between sync ticks.
    #[serde(default = "default_sync_interval", with = "humantime_serde")]
    pub sync_interval: Duration,
    /// Ordered replacements applied to source principal names.
    #[serde(default)]
    pub username_replacements: Vec<ReplacementPair>,
    /// Ordered replacements applied to source group identities.
    #[serde(default)]
    pub groupname_replacements: Vec<ReplacementPair>,
    /// Reject a plan whose removals reach this count. 0 disables the gate.
    #[serde(default)]
    pub remove_limit: usize,
    /// How long a disappeared user stays banned before removal. 0 removes
    /// immediately.
    #[serde(default, with = "humantime_serde")]
    pub ban_before_remove_duration: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sync_interval: default_sync_interval(),
            username_replacements: Vec::new(),
            groupname_replacements: Vec::new(),
            remove_limit: 0,
            ban_before_remove_duration: Duration::ZERO,
        }
    }
}

/// Source directory (Microsoft Entra ID) settings. The client secret is
/// not part of the file; it comes from [`AZURE_SECRET_ENV`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    pub tenant: String,
    pub client_id: String,
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Graph `$filter` expression for the user listing.
    #[serde(default)]
    pub users_filter: String,
    /// Graph `$filter` expression for the group listing.
    #[serde(default)]
    pub groups_filter: String,
    /// Keep only groups whose display name ends with this suffix. Empty
    /// disables the post-filter.
    #[serde(default)]
    pub groups_display_name_suffix_post_filter: String,
}

/// Target platform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YtsaurusConfig {
    /// HTTP proxy address, host:port or a full URL.
    pub proxy: String,
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Log level for the target client alone; empty inherits the global
    /// level.
    #[serde(default)]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub apply_user_changes: bool,
    #[serde(default = "default_true")]
    pub apply_group_changes: bool,
    #[serde(default = "default_true")]
    pub apply_member_changes: bool,
    /// Attribute under which the source bag is stored on each principal.
    #[serde(default = "default_source_attribute_name")]
    pub source_attribute_name: String,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Production deployments log JSON lines.
    #[serde(default)]
    pub is_production: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            is_production: false,
        }
    }
}

const fn default_sync_interval() -> Duration {
    Duration::from_secs(600)
}

const fn default_http_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_true() -> bool {
    true
}

fn default_source_attribute_name() -> String {
    "azure".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| IdSyncError::Config(format!("{}: {e}", path.display())))
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.app.sync_interval.is_zero() {
            return Err(IdSyncError::Config("app.sync_interval must be > 0".into()));
        }
        if self.azure.tenant.is_empty() {
            return Err(IdSyncError::Config("azure.tenant is required".into()));
        }
        if self.azure.client_id.is_empty() {
            return Err(IdSyncError::Config("azure.client_id is required".into()));
        }
        if self.ytsaurus.proxy.is_empty() {
            return Err(IdSyncError::Config("ytsaurus.proxy is required".into()));
        }
        if self.ytsaurus.source_attribute_name.is_empty() {
            return Err(IdSyncError::Config(
                "ytsaurus.source_attribute_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
        [app]
        sync_interval = "5m"
        remove_limit = 10
        ban_before_remove_duration = "168h"
        username_replacements = [
            { from = "@acme.com", to = "" },
            { from = "@", to = ":" },
        ]
        groupname_replacements = [
            { from = "|all", to = "" },
        ]

        [azure]
        tenant = "acme.onmicrosoft.com"
        client_id = "abcdefgh-a000-b111-c222-abcdef123456"
        timeout = "1s"
        users_filter = "(accountEnabled eq true) and (userType eq 'Member')"
        groups_filter = "displayName -ne ''"
        groups_display_name_suffix_post_filter = ".dev"

        [ytsaurus]
        proxy = "localhost:10110"
        timeout = "1s"
        log_level = "debug"
        apply_user_changes = true
        apply_group_changes = true
        apply_member_changes = true
        source_attribute_name = "azure"

        [logging]
        level = "warn"
        is_production = true
    "#;

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(FULL_CONFIG).unwrap();

        assert_eq!(config.app.sync_interval, Duration::from_secs(5 * 60));
        assert_eq!(config.app.remove_limit, 10);
        assert_eq!(
            config.app.ban_before_remove_duration,
            Duration::from_secs(7 * 24 * 3600)
        );
        assert_eq!(config.app.username_replacements.len(), 2);
        assert_eq!(config.app.username_replacements[0].from, "@acme.com");
        assert_eq!(config.app.username_replacements[1].to, ":");
        assert_eq!(config.app.groupname_replacements.len(), 1);

        assert_eq!(config.azure.tenant, "acme.onmicrosoft.com");
        assert_eq!(config.azure.timeout, Duration::from_secs(1));
        assert_eq!(
            config.azure.users_filter,
            "(accountEnabled eq true) and (userType eq 'Member')"
        );
        assert_eq!(config.azure.groups_display_name_suffix_post_filter, ".dev");

        assert_eq!(config.ytsaurus.proxy, "localhost:10110");
        assert!(config.ytsaurus.apply_user_changes);
        assert!(config.ytsaurus.apply_group_changes);
        assert!(config.ytsaurus.apply_member_changes);
        assert_eq!(config.ytsaurus.source_attribute_name, "azure");

        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.is_production);

        config.validate().unwrap();
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [azure]
            tenant = "acme.onmicrosoft.com"
            client_id = "client"

            [ytsaurus]
            proxy = "localhost:10110"
            "#,
        )
        .unwrap();

        assert_eq!(config.app.sync_interval, Duration::from_secs(600));
        assert_eq!(config.app.remove_limit, 0);
        assert_eq!(config.app.ban_before_remove_duration, Duration::ZERO);
        assert!(config.app.username_replacements.is_empty());
        assert!(config.ytsaurus.apply_user_changes);
        assert_eq!(config.ytsaurus.source_attribute_name, "azure");
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.is_production);

        config.validate().unwrap();
    }

    #[test]
    fn bad_duration_is_a_config_error() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"
            [app]
            sync_interval = "every now and then"

            [azure]
            tenant = "t"
            client_id = "c"

            [ytsaurus]
            proxy = "p"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config: Config = toml::from_str(
            r#"
            [azure]
            tenant = "t"
            client_id = "c"

            [ytsaurus]
            proxy = "p"
            "#,
        )
        .unwrap();
        config.app.sync_interval = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sync_interval"));
    }

    #[test]
    fn validate_rejects_missing_proxy() {
        let mut config: Config = toml::from_str(
            r#"
            [azure]
            tenant = "t"
            client_id = "c"

            [ytsaurus]
            proxy = "p"
            "#,
        )
        .unwrap();
        config.ytsaurus.proxy.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_required_section_fails() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"
            [azure]
            tenant = "t"
            client_id = "c"
            "#,
        );
        assert!(result.is_err());
    }
}
