//! The `sync` subcommand: one reconciliation pass.

use idsync_core::config::Config;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let engine = super::build_engine(config)?;
    let summary = engine.sync_once().await?;

    println!("Sync completed");
    println!(
        "  Users:   {} created, {} updated, {} banned, {} removed",
        summary.users_created, summary.users_updated, summary.users_banned, summary.users_removed
    );
    println!(
        "  Groups:  {} created, {} updated, {} removed",
        summary.groups_created, summary.groups_updated, summary.groups_removed
    );
    println!(
        "  Members: {} added, {} removed",
        summary.members_added, summary.members_removed
    );
    if summary.skipped > 0 {
        println!("  Skipped: {} (apply flags)", summary.skipped);
    }

    Ok(())
}
