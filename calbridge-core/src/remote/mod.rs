//! Calendar backends reached through provider binaries.

pub mod protocol;
pub mod provider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::{CalendarBackend, CalendarInfo, EventPage, ListRequest, WriteOp};
use crate::error::{BackendError, ErrorKind};
use crate::event::Event;
use crate::remote::protocol::{BatchEvents, InsertEvent, ListCalendars, ListEvents, UpdateEvent};
use crate::remote::provider::Provider;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RemoteConfig(pub HashMap<String, toml::Value>);

impl From<&RemoteConfig> for serde_json::Map<String, serde_json::Value> {
    fn from(config: &RemoteConfig) -> Self {
        config
            .0
            .iter()
            .filter_map(|(k, v)| serde_json::to_value(v).ok().map(|v| (k.clone(), v)))
            .collect()
    }
}

/// A domain: one provider account (e.g., a Google Workspace admin).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Remote {
    pub provider: Provider,
    #[serde(flatten)]
    pub config: RemoteConfig,
}

impl Remote {
    fn remote_config(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::from(&self.config)
    }

    pub fn new(provider: Provider, config: RemoteConfig) -> Self {
        Remote { provider, config }
    }

    /// Returns the account identifier for this remote, if present.
    ///
    /// Looks for a `{provider}_account` field in the config (e.g., `google_account`).
    pub fn account_identifier(&self) -> Option<&str> {
        let key = format!("{}_account", self.provider.name());
        self.config.0.get(&key).and_then(|v| v.as_str())
    }

    /// A backend that forwards every call to this domain's provider binary.
    pub fn backend(&self) -> Arc<dyn CalendarBackend> {
        Arc::new(ProviderBackend {
            remote: self.clone(),
        })
    }
}

pub struct ProviderBackend {
    remote: Remote,
}

#[async_trait]
impl CalendarBackend for ProviderBackend {
    async fn list_calendars(&self) -> Result<Vec<CalendarInfo>, BackendError> {
        self.remote
            .provider
            .call(ListCalendars {
                remote_config: self.remote.remote_config(),
            })
            .await
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        request: &ListRequest,
    ) -> Result<EventPage, BackendError> {
        self.remote
            .provider
            .call(ListEvents {
                remote_config: self.remote.remote_config(),
                calendar_id: calendar_id.to_string(),
                request: request.clone(),
            })
            .await
    }

    async fn insert_event(&self, calendar_id: &str, event: &Event) -> Result<Event, BackendError> {
        self.remote
            .provider
            .call(InsertEvent {
                remote_config: self.remote.remote_config(),
                calendar_id: calendar_id.to_string(),
                event: event.clone(),
            })
            .await
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &Event,
    ) -> Result<Event, BackendError> {
        self.remote
            .provider
            .call(UpdateEvent {
                remote_config: self.remote.remote_config(),
                calendar_id: calendar_id.to_string(),
                event_id: event_id.to_string(),
                event: event.clone(),
            })
            .await
    }

    async fn execute_batch(
        &self,
        calendar_id: &str,
        ops: &[WriteOp],
    ) -> Result<Vec<Result<Event, BackendError>>, BackendError> {
        let responses = self
            .remote
            .provider
            .call(BatchEvents {
                remote_config: self.remote.remote_config(),
                calendar_id: calendar_id.to_string(),
                ops: ops.to_vec(),
            })
            .await?;

        if responses.len() != ops.len() {
            return Err(BackendError::new(
                ErrorKind::Fatal,
                format!(
                    "Provider answered {} of {} batch items",
                    responses.len(),
                    ops.len()
                ),
            ));
        }

        Ok(responses.into_iter().map(|r| r.into_result()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_config_flattens_into_json_params() {
        let remote: Remote = toml::from_str(
            r#"
provider = "google"
google_account = "admin@foo.com"
"#,
        )
        .unwrap();

        assert_eq!(remote.provider.name(), "google");
        assert_eq!(remote.account_identifier(), Some("admin@foo.com"));

        let params = remote.remote_config();
        assert_eq!(params["google_account"], "admin@foo.com");
        assert!(!params.contains_key("provider"));
    }
}
