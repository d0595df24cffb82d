pub mod batch_events;
pub mod insert_event;
pub mod list_calendars;
pub mod list_events;
pub mod update_event;

use anyhow::{Context, Result};
use calbridge_core::BackendError;

use crate::api::GoogleCalendar;

/// Client for the account named by the domain's `google_account` setting.
pub async fn authed_client(
    remote_config: &serde_json::Map<String, serde_json::Value>,
) -> Result<GoogleCalendar> {
    let account = remote_config
        .get("google_account")
        .and_then(|v| v.as_str())
        .context("Domain config is missing google_account")?;

    GoogleCalendar::for_account(account).await
}

/// Flatten a command failure into a protocol error, keeping the kind of the
/// backend error underneath any added context.
pub fn backend_error(error: &anyhow::Error) -> BackendError {
    let kind = error
        .downcast_ref::<BackendError>()
        .map(|e| e.kind)
        .unwrap_or_default();
    BackendError::new(kind, format!("{error:#}"))
}
