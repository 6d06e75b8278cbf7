//! The `check` subcommand: config and connectivity validation.

use idsync_azure::client::AzureDirectory;
use idsync_ytsaurus::client::YtClient;
use tracing::error;

use idsync_core::config::Config;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    println!("Configuration: OK");

    let mut failed = false;

    let directory = AzureDirectory::new(&config.azure, &super::azure_secret()?)?;
    match directory.test_connection().await {
        Ok(()) => println!("Source directory: OK"),
        Err(e) => {
            error!(error = %e, "source connectivity check failed");
            println!("Source directory: FAILED - {e}");
            failed = true;
        }
    }

    let client = YtClient::new(&config.ytsaurus, &super::ytsaurus_token()?)?;
    match client.test_connection().await {
        Ok(()) => println!("Target platform: OK"),
        Err(e) => {
            error!(error = %e, "target connectivity check failed");
            println!("Target platform: FAILED - {e}");
            failed = true;
        }
    }

    if failed {
        anyhow::bail!("connectivity check failed");
    }
    Ok(())
}
