use anyhow::{Context, Result};
use calbridge_core::CalendarBackend;
use calbridge_core::remote::protocol::ListCalendars;

use super::authed_client;

pub async fn handle(params: serde_json::Value) -> Result<serde_json::Value> {
    let cmd: ListCalendars = serde_json::from_value(params).context("Invalid params")?;
    let client = authed_client(&cmd.remote_config).await?;

    let calendars = client
        .list_calendars()
        .await
        .context("Failed to fetch calendars")?;

    Ok(serde_json::to_value(calendars)?)
}
