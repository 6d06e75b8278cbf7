//! The `run` subcommand: periodic reconciliation until shutdown.

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use idsync_core::config::Config;

/// Tick the engine on the configured interval until ctrl-c.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let engine = super::build_engine(config)?;
    let token = CancellationToken::new();

    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let mut interval = tokio::time::interval(config.app.sync_interval);
    // A slow tick delays the next one; ticks never queue or overlap.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        interval = %humantime::format_duration(config.app.sync_interval),
        "sync daemon started"
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                tokio::select! {
                    // An aborted tick is not rolled back; the next tick
                    // finishes the remaining work.
                    _ = token.cancelled() => break,
                    result = engine.sync_once() => match result {
                        Ok(summary) => {
                            info!(applied = summary.applied(), "sync tick succeeded");
                        }
                        Err(e) => error!(error = %e, "sync tick failed"),
                    }
                }
            }
        }
    }

    info!("sync daemon stopped");
    Ok(())
}
