//! Defines the JSON protocol used for communication between calbridge
//! and provider binaries over stdin/stdout.

use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::backend::{CalendarInfo, EventPage, ListRequest, WriteOp};
use crate::error::{BackendError, ErrorKind};
use crate::event::Event;

/// How long a provider gets to answer a single-request command.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra time a batch gets for every write it carries.
pub const BATCH_TIMEOUT_PER_OP: Duration = Duration::from_secs(1);

pub trait ProviderCommand: Serialize {
    type Response: DeserializeOwned;
    fn command() -> Command;

    /// Deadline for the provider to answer, after which it is killed.
    fn timeout(&self) -> Duration {
        PROVIDER_TIMEOUT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    ListCalendars,
    ListEvents,
    InsertEvent,
    UpdateEvent,
    BatchEvents,
}

/// Request sent from calbridge to provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Response sent from provider to calbridge.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response<T> {
    Success {
        data: T,
    },
    Error {
        error: String,
        #[serde(default)]
        kind: ErrorKind,
    },
}

impl<T> Response<T> {
    pub fn into_result(self) -> Result<T, BackendError> {
        match self {
            Response::Success { data } => Ok(data),
            Response::Error { error, kind } => Err(BackendError::new(kind, error)),
        }
    }
}

impl<T> From<Result<T, BackendError>> for Response<T> {
    fn from(result: Result<T, BackendError>) -> Self {
        match result {
            Ok(data) => Response::Success { data },
            Err(e) => Response::Error {
                error: e.message,
                kind: e.kind,
            },
        }
    }
}

impl<T: Serialize> Response<T> {
    pub fn success(data: T) -> String {
        serde_json::to_string(&Response::Success { data }).unwrap_or_else(|e| {
            Response::error(&format!("Failed to serialize response: {e}"), ErrorKind::Fatal)
        })
    }
}

impl Response<()> {
    pub fn error(msg: &str, kind: ErrorKind) -> String {
        // A struct of two strings always serializes.
        serde_json::to_string(&Response::<()>::Error {
            error: msg.to_string(),
            kind,
        })
        .unwrap_or_default()
    }
}

/// List all calendars visible to the domain account.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListCalendars {
    /// Provider-specific config (e.g., google_account)
    #[serde(flatten)]
    pub remote_config: serde_json::Map<String, serde_json::Value>,
}

impl ProviderCommand for ListCalendars {
    type Response = Vec<CalendarInfo>;
    fn command() -> Command {
        Command::ListCalendars
    }
}

/// Fetch one page of an incremental event listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListEvents {
    #[serde(flatten)]
    pub remote_config: serde_json::Map<String, serde_json::Value>,
    pub calendar_id: String,
    #[serde(flatten)]
    pub request: ListRequest,
}

impl ProviderCommand for ListEvents {
    type Response = EventPage;
    fn command() -> Command {
        Command::ListEvents
    }
}

/// Create a new event. The id in the body is kept when present.
#[derive(Debug, Serialize, Deserialize)]
pub struct InsertEvent {
    #[serde(flatten)]
    pub remote_config: serde_json::Map<String, serde_json::Value>,
    pub calendar_id: String,
    pub event: Event,
}

impl ProviderCommand for InsertEvent {
    type Response = Event;
    fn command() -> Command {
        Command::InsertEvent
    }
}

/// Replace an existing event's body.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateEvent {
    #[serde(flatten)]
    pub remote_config: serde_json::Map<String, serde_json::Value>,
    pub calendar_id: String,
    pub event_id: String,
    pub event: Event,
}

impl ProviderCommand for UpdateEvent {
    type Response = Event;
    fn command() -> Command {
        Command::UpdateEvent
    }
}

/// Execute several writes in one provider call, one result per op.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchEvents {
    #[serde(flatten)]
    pub remote_config: serde_json::Map<String, serde_json::Value>,
    pub calendar_id: String,
    pub ops: Vec<WriteOp>,
}

impl ProviderCommand for BatchEvents {
    type Response = Vec<Response<Event>>;
    fn command() -> Command {
        Command::BatchEvents
    }

    fn timeout(&self) -> Duration {
        let ops = u32::try_from(self.ops.len()).unwrap_or(u32::MAX);
        PROVIDER_TIMEOUT.saturating_add(BATCH_TIMEOUT_PER_OP.saturating_mul(ops))
    }
}
