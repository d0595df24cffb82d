//! The calendar service seen from a replica.
//!
//! A backend is shared by every replica living in the same domain. It lists
//! events incrementally, inserts and replaces events, and executes batches of
//! writes with one result per item.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::event::Event;

/// Access a domain account has on one calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessRole {
    FreeBusyReader,
    Reader,
    Writer,
    Owner,
}

impl AccessRole {
    /// Whether this role is enough to keep a replica in sync.
    /// Read-only replicas only need to see event details.
    pub fn allows(self, read_only: bool) -> bool {
        match self {
            AccessRole::Owner | AccessRole::Writer => true,
            AccessRole::Reader => read_only,
            AccessRole::FreeBusyReader => false,
        }
    }
}

/// Calendar metadata returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarInfo {
    pub id: String,
    pub summary: String,
    pub access_role: AccessRole,
}

/// Parameters of one page request in an incremental listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    /// Cursor from the previous listing. `None` lists everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    /// Continuation within the current listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    /// Include cancelled events (tombstones).
    #[serde(default)]
    pub show_deleted: bool,
}

/// One page of an incremental listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPage {
    #[serde(default)]
    pub items: Vec<Event>,
    /// Present while more pages follow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    /// Present on the final page: the cursor to use next time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_sync_token: Option<String>,
}

/// A write against one calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    Insert { event: Event },
    /// Full replacement of the event body, not a patch.
    Update { event_id: String, event: Event },
}

impl WriteOp {
    pub fn event(&self) -> &Event {
        match self {
            WriteOp::Insert { event } | WriteOp::Update { event, .. } => event,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            WriteOp::Insert { .. } => "+>",
            WriteOp::Update { .. } => "~>",
        }
    }

    pub async fn execute<B: CalendarBackend + ?Sized>(
        &self,
        backend: &B,
        calendar_id: &str,
    ) -> Result<Event, BackendError> {
        match self {
            WriteOp::Insert { event } => backend.insert_event(calendar_id, event).await,
            WriteOp::Update { event_id, event } => {
                backend.update_event(calendar_id, event_id, event).await
            }
        }
    }
}

#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// Calendars visible to this domain's account.
    async fn list_calendars(&self) -> Result<Vec<CalendarInfo>, BackendError>;

    /// Fetch one page of events changed since `request.sync_token`.
    async fn list_events(
        &self,
        calendar_id: &str,
        request: &ListRequest,
    ) -> Result<EventPage, BackendError>;

    async fn insert_event(&self, calendar_id: &str, event: &Event) -> Result<Event, BackendError>;

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &Event,
    ) -> Result<Event, BackendError>;

    /// Execute several writes, returning one result per op in order.
    ///
    /// The outer error means the batch as a whole never ran. The default
    /// runs the ops one after another.
    async fn execute_batch(
        &self,
        calendar_id: &str,
        ops: &[WriteOp],
    ) -> Result<Vec<Result<Event, BackendError>>, BackendError> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let result = match op {
                WriteOp::Insert { event } => self.insert_event(calendar_id, event).await,
                WriteOp::Update { event_id, event } => {
                    self.update_event(calendar_id, event_id, event).await
                }
            };
            results.push(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_role_is_enough_only_for_read_only_replicas() {
        assert!(AccessRole::Owner.allows(false));
        assert!(AccessRole::Writer.allows(false));
        assert!(!AccessRole::Reader.allows(false));
        assert!(AccessRole::Reader.allows(true));
        assert!(!AccessRole::FreeBusyReader.allows(true));
    }

    #[test]
    fn access_role_matches_google_spelling() {
        let role: AccessRole = serde_json::from_str("\"freeBusyReader\"").unwrap();
        assert_eq!(role, AccessRole::FreeBusyReader);
    }
}
