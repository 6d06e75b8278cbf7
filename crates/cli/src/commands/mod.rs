//! Subcommand implementations.

pub mod check;
pub mod run;
pub mod sync;

use std::sync::Arc;

use idsync_azure::client::AzureDirectory;
use idsync_core::clock::SystemClock;
use idsync_core::config::{Config, AZURE_SECRET_ENV, YTSAURUS_TOKEN_ENV};
use idsync_engine::apply::ApplyFlags;
use idsync_engine::diff::DiffConfig;
use idsync_engine::sync::{EngineConfig, SyncEngine};
use idsync_ytsaurus::client::YtClient;

fn azure_secret() -> anyhow::Result<String> {
    std::env::var(AZURE_SECRET_ENV)
        .map_err(|_| anyhow::anyhow!("{AZURE_SECRET_ENV} is not set"))
}

fn ytsaurus_token() -> anyhow::Result<String> {
    std::env::var(YTSAURUS_TOKEN_ENV)
        .map_err(|_| anyhow::anyhow!("{YTSAURUS_TOKEN_ENV} is not set"))
}

/// Build the engine and both clients from the loaded configuration.
pub(crate) fn build_engine(
    config: &Config,
) -> anyhow::Result<SyncEngine<AzureDirectory, YtClient>> {
    let source = Arc::new(AzureDirectory::new(&config.azure, &azure_secret()?)?);
    let store = Arc::new(YtClient::new(&config.ytsaurus, &ytsaurus_token()?)?);

    let engine_config = EngineConfig {
        diff: DiffConfig {
            username_replacements: config.app.username_replacements.clone(),
            groupname_replacements: config.app.groupname_replacements.clone(),
            ban_before_remove_duration: config.app.ban_before_remove_duration,
        },
        remove_limit: config.app.remove_limit,
        flags: ApplyFlags {
            users: config.ytsaurus.apply_user_changes,
            groups: config.ytsaurus.apply_group_changes,
            members: config.ytsaurus.apply_member_changes,
        },
    };

    Ok(SyncEngine::new(
        source,
        store,
        Arc::new(SystemClock),
        engine_config,
    ))
}
