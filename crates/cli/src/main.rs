use std::path::Path;

use clap::Parser;

use idsync_core::config::Config;

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "idsync", about = "One-way identity synchronization daemon", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "idsync.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the sync daemon on the configured interval
    Run,
    /// Perform a single sync tick and exit
    Sync,
    /// Validate the configuration and test connectivity on both sides
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(Path::new(&cli.config))?;
    config.validate()?;
    logging::init(&config.logging, &config.ytsaurus.log_level)?;

    match cli.command {
        Commands::Run => commands::run::run(&config).await?,
        Commands::Sync => commands::sync::run(&config).await?,
        Commands::Check => commands::check::run(&config).await?,
    }

    Ok(())
}
