use anyhow::{Context, Result};
use calbridge_core::CalendarBackend;
use calbridge_core::remote::protocol::ListEvents;

use super::authed_client;

pub async fn handle(params: serde_json::Value) -> Result<serde_json::Value> {
    let cmd: ListEvents = serde_json::from_value(params).context("Invalid params")?;
    let client = authed_client(&cmd.remote_config).await?;

    let page = client
        .list_events(&cmd.calendar_id, &cmd.request)
        .await
        .with_context(|| format!("Failed to list events of {}", cmd.calendar_id))?;

    Ok(serde_json::to_value(page)?)
}
