pub mod check;
pub mod sync;
pub mod watch;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use calbridge_core::config::BridgeConfig;
use calbridge_core::{CalendarBackend, SyncedCalendar};

/// Connect the replicas of one configured calendar.
pub async fn connect(
    config: &BridgeConfig,
    name: &str,
    backends: &BTreeMap<String, Arc<dyn CalendarBackend>>,
) -> Result<SyncedCalendar> {
    let calendar_config = config
        .calendars
        .get(name)
        .with_context(|| format!("Calendar '{}' not configured", name))?;

    SyncedCalendar::connect(name, calendar_config, backends, &config.sync)
        .await
        .with_context(|| format!("Failed to connect calendar '{}'", name))
}
