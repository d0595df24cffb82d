use std::time::Duration;

use anyhow::{Context, Result};
use calbridge_core::config::BridgeConfig;
use calbridge_core::SyncedCalendar;
use owo_colors::OwoColorize;
use tracing::{info, warn};

/// Sleep between cycles, doubled for every consecutive failed cycle.
fn cycle_delay(poll_time: u64, consecutive_failures: u32) -> Duration {
    Duration::from_secs(poll_time).saturating_mul(2u32.saturating_pow(consecutive_failures))
}

/// Sync the calendars forever. Replicas stay connected between cycles so
/// each cycle only pulls what changed since the last one.
pub async fn run(config: &BridgeConfig, names: &[String]) -> Result<()> {
    let backends = crate::domain_backends(config);

    let mut calendars: Vec<SyncedCalendar> = Vec::with_capacity(names.len());
    for name in names {
        calendars.push(super::connect(config, name, &backends).await?);
    }

    println!(
        "Watching {} calendars every {}s (Ctrl-C to stop)",
        calendars.len(),
        config.poll_time
    );

    let mut consecutive_failures: u32 = 0;

    loop {
        let mut cycle_failed = false;

        for calendar in &mut calendars {
            match calendar.sync().await {
                Ok(0) => {}
                Ok(changes) => {
                    println!("{} {}", calendar.name().bold(), format!("{} events changed", changes).green());
                }
                Err(e) if e.is_transient() => {
                    warn!(calendar = calendar.name(), error = %e, "sync cycle failed");
                    cycle_failed = true;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Sync of '{}' failed", calendar.name()));
                }
            }
        }

        if cycle_failed {
            consecutive_failures += 1;
            if consecutive_failures >= config.max_exceptions {
                anyhow::bail!(
                    "Giving up after {} consecutive failed sync cycles",
                    consecutive_failures
                );
            }
        } else {
            consecutive_failures = 0;
        }

        let delay = cycle_delay(config.poll_time, consecutive_failures);
        info!(delay_secs = delay.as_secs(), consecutive_failures, "waiting for next cycle");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped.");
                return Ok(());
            }
        }
    }
}
