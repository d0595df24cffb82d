use anyhow::{Context, Result};
use calbridge_core::remote::protocol::{BatchEvents, Response};
use calbridge_core::{CalendarBackend, Event};

use super::authed_client;

/// Run every op and report one response per op. Item failures do not fail the command.
pub async fn handle(params: serde_json::Value) -> Result<serde_json::Value> {
    let cmd: BatchEvents = serde_json::from_value(params).context("Invalid params")?;
    let client = authed_client(&cmd.remote_config).await?;

    let results = client.execute_batch(&cmd.calendar_id, &cmd.ops).await?;
    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        tracing::warn!(calendar_id = %cmd.calendar_id, failed, total = results.len(), "batch items failed");
    }

    let responses: Vec<Response<Event>> = results.into_iter().map(Response::from).collect();
    Ok(serde_json::to_value(responses)?)
}
