use anyhow::{Context, Result};
use calbridge_core::CalendarBackend;
use calbridge_core::remote::protocol::UpdateEvent;

use super::authed_client;

pub async fn handle(params: serde_json::Value) -> Result<serde_json::Value> {
    let cmd: UpdateEvent = serde_json::from_value(params).context("Invalid params")?;
    let client = authed_client(&cmd.remote_config).await?;

    let updated = client
        .update_event(&cmd.calendar_id, &cmd.event_id, &cmd.event)
        .await
        .with_context(|| format!("Failed to update event: {}", cmd.event))?;

    Ok(serde_json::to_value(updated)?)
}
