//! A calendar service that lives in memory.
//!
//! [`InMemoryBackend`] behaves like a small Google Calendar: every change
//! moves a per-calendar version counter, sync tokens remember the version
//! they were issued at, listings are paginated, and updates carrying a
//! revision lower than the stored one are rejected. Tests use it to play
//! the part of each domain and to edit calendars behind the engine's back.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backend::{AccessRole, CalendarBackend, CalendarInfo, EventPage, ListRequest, WriteOp};
use crate::error::BackendError;
use crate::event::{Event, EventFields, EventStatus};

/// 2025-01-01T00:00:00Z, the start of the logical clock.
const CLOCK_EPOCH: i64 = 1_735_689_600;
const DEFAULT_PAGE_SIZE: usize = 250;

/// Backend calls that failures can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ListEvents,
    /// Any insert or update, including each item of a batch.
    Write,
    /// A whole batch call, before any of its items runs.
    Batch,
}

/// One write that reached the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub calendar_id: String,
    pub event_id: String,
    /// `"insert"` or `"update"`
    pub kind: &'static str,
}

struct StoredEvent {
    event: Event,
    /// Calendar version at which this event last changed.
    version: u64,
}

struct CalendarState {
    info: CalendarInfo,
    events: BTreeMap<String, StoredEvent>,
    version: u64,
    /// Bumped to invalidate every sync token handed out so far.
    token_epoch: u64,
}

struct PlannedFailure {
    operation: Operation,
    /// Matching calls still to let through before failing.
    skip: usize,
    error: BackendError,
}

#[derive(Default)]
struct State {
    next_id: u64,
    calendars: BTreeMap<String, CalendarState>,
    failures: Vec<PlannedFailure>,
    writes: Vec<WriteRecord>,
    batch_sizes: Vec<usize>,
}

impl State {
    fn take_failure(&mut self, operation: Operation) -> Result<(), BackendError> {
        let planned = self
            .failures
            .iter()
            .position(|f| f.operation == operation && f.skip == 0);

        for failure in self.failures.iter_mut() {
            if failure.operation == operation && failure.skip > 0 {
                failure.skip -= 1;
            }
        }

        match planned {
            Some(i) => Err(self.failures.remove(i).error),
            None => Ok(()),
        }
    }

    fn calendar(&mut self, calendar_id: &str) -> Result<&mut CalendarState, BackendError> {
        self.calendars
            .get_mut(calendar_id)
            .ok_or_else(|| BackendError::fatal(format!("Calendar {calendar_id} not found")))
    }

    /// Store `event` as the current copy, last modified at `updated`.
    fn store(
        &mut self,
        calendar_id: &str,
        mut event: Event,
        updated: Option<DateTime<Utc>>,
    ) -> Result<Event, BackendError> {
        let id = match event.id.clone() {
            Some(id) => id,
            None => {
                self.next_id += 1;
                format!("evt{:06}", self.next_id)
            }
        };

        event.id = Some(id.clone());
        event.updated = updated;
        event.mark_clean();

        let calendar = self.calendar(calendar_id)?;
        calendar.version += 1;
        let version = calendar.version;
        calendar.events.insert(
            id,
            StoredEvent {
                event: event.clone(),
                version,
            },
        );
        Ok(event)
    }
}

pub struct InMemoryBackend {
    state: Mutex<State>,
    /// Seconds since `CLOCK_EPOCH`. Share it between backends so that
    /// "updated later" means the same thing on every calendar.
    clock: Arc<AtomicI64>,
    page_size: usize,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        InMemoryBackend {
            state: Mutex::new(State::default()),
            clock: Arc::new(AtomicI64::new(0)),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_clock(mut self, clock: Arc<AtomicI64>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> Arc<AtomicI64> {
        self.clock.clone()
    }

    fn tick(&self) -> Option<DateTime<Utc>> {
        let now = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        DateTime::from_timestamp(CLOCK_EPOCH + now, 0)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_calendar(&self, calendar_id: &str, summary: &str, access_role: AccessRole) {
        self.state().calendars.insert(
            calendar_id.to_string(),
            CalendarState {
                info: CalendarInfo {
                    id: calendar_id.to_string(),
                    summary: summary.to_string(),
                    access_role,
                },
                events: BTreeMap::new(),
                version: 0,
                token_epoch: 0,
            },
        );
    }

    // External edits, as if a user changed the calendar in the provider's UI.

    /// Create or replace an event. Returns the stored copy, or `None` when the
    /// calendar does not exist.
    pub fn put_event(&self, calendar_id: &str, event: Event) -> Option<Event> {
        let updated = self.tick();
        self.state().store(calendar_id, event, updated).ok()
    }

    /// Edit the fields of a stored event and bump its revision.
    pub fn edit_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        edit: impl FnOnce(&mut EventFields),
    ) -> Option<Event> {
        let mut event = self.event(calendar_id, event_id)?;
        edit(event.fields_mut());
        event.sequence += 1;
        self.put_event(calendar_id, event)
    }

    pub fn cancel_event(&self, calendar_id: &str, event_id: &str) -> Option<Event> {
        self.edit_event(calendar_id, event_id, |f| f.status = EventStatus::Cancelled)
    }

    /// Invalidate every sync token issued for this calendar so far.
    pub fn expire_sync_tokens(&self, calendar_id: &str) {
        if let Some(calendar) = self.state().calendars.get_mut(calendar_id) {
            calendar.token_epoch += 1;
        }
    }

    /// Fail the `nth` (1-based) upcoming call of `operation` with `error`.
    pub fn fail_nth(&self, operation: Operation, nth: usize, error: BackendError) {
        self.state().failures.push(PlannedFailure {
            operation,
            skip: nth.saturating_sub(1),
            error,
        });
    }

    pub fn fail_next(&self, operation: Operation, error: BackendError) {
        self.fail_nth(operation, 1, error);
    }

    // Inspection

    pub fn event(&self, calendar_id: &str, event_id: &str) -> Option<Event> {
        self.state()
            .calendars
            .get(calendar_id)
            .and_then(|c| c.events.get(event_id))
            .map(|stored| stored.event.clone())
    }

    pub fn events(&self, calendar_id: &str) -> Vec<Event> {
        self.state()
            .calendars
            .get(calendar_id)
            .map(|c| c.events.values().map(|s| s.event.clone()).collect())
            .unwrap_or_default()
    }

    pub fn active_events(&self, calendar_id: &str) -> Vec<Event> {
        let mut events = self.events(calendar_id);
        events.retain(Event::is_active);
        events
    }

    /// Every write that reached the backend, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    pub fn writes_to(&self, calendar_id: &str) -> Vec<WriteRecord> {
        self.writes()
            .into_iter()
            .filter(|w| w.calendar_id == calendar_id)
            .collect()
    }

    /// Size of every batch executed, oldest first.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state().batch_sizes.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state();
        state.writes.clear();
        state.batch_sizes.clear();
    }

    fn parse_sync_token(token: &str) -> Option<(u64, u64)> {
        let (epoch, version) = token.split_once(':')?;
        Some((epoch.parse().ok()?, version.parse().ok()?))
    }
}

#[async_trait]
impl CalendarBackend for InMemoryBackend {
    async fn list_calendars(&self) -> Result<Vec<CalendarInfo>, BackendError> {
        Ok(self
            .state()
            .calendars
            .values()
            .map(|c| c.info.clone())
            .collect())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        request: &ListRequest,
    ) -> Result<EventPage, BackendError> {
        let mut state = self.state();
        state.take_failure(Operation::ListEvents)?;
        let calendar = state.calendar(calendar_id)?;

        let since = match request.sync_token.as_deref() {
            None => None,
            Some(token) => match Self::parse_sync_token(token) {
                Some((epoch, version)) if epoch == calendar.token_epoch => Some(version),
                _ => {
                    return Err(BackendError::cursor_expired(
                        "Sync token is no longer valid, a full sync is required.",
                    ));
                }
            },
        };

        let matching: Vec<&StoredEvent> = calendar
            .events
            .values()
            .filter(|s| since.is_none_or(|v| s.version > v))
            .filter(|s| request.show_deleted || s.event.is_active())
            .collect();

        let offset = match request.page_token.as_deref() {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| BackendError::fatal(format!("Invalid page token {token}")))?,
        };
        let end = (offset + self.page_size).min(matching.len());

        let items = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|s| s.event.clone())
            .collect();

        let (next_page_token, next_sync_token) = if end < matching.len() {
            (Some(end.to_string()), None)
        } else {
            (None, Some(format!("{}:{}", calendar.token_epoch, calendar.version)))
        };

        Ok(EventPage {
            items,
            next_page_token,
            next_sync_token,
        })
    }

    async fn insert_event(&self, calendar_id: &str, event: &Event) -> Result<Event, BackendError> {
        let mut state = self.state();
        state.take_failure(Operation::Write)?;

        if let Some(id) = event.id.as_deref() {
            if state.calendar(calendar_id)?.events.contains_key(id) {
                return Err(BackendError::fatal(format!(
                    "The requested identifier already exists: {id}"
                )));
            }
        }

        let stored = state.store(calendar_id, event.clone(), self.tick())?;
        state.writes.push(WriteRecord {
            calendar_id: calendar_id.to_string(),
            event_id: stored.id.clone().unwrap_or_default(),
            kind: "insert",
        });
        Ok(stored)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &Event,
    ) -> Result<Event, BackendError> {
        let mut state = self.state();
        state.take_failure(Operation::Write)?;

        let current = state
            .calendar(calendar_id)?
            .events
            .get(event_id)
            .map(|s| s.event.sequence)
            .ok_or_else(|| BackendError::fatal(format!("Not Found: {event_id}")))?;

        if event.sequence < current {
            return Err(BackendError::fatal(format!(
                "Invalid sequence value {} for {event_id} (stored {current})",
                event.sequence
            )));
        }

        let stored = state.store(calendar_id, event.clone().with_id(event_id), self.tick())?;
        state.writes.push(WriteRecord {
            calendar_id: calendar_id.to_string(),
            event_id: event_id.to_string(),
            kind: "update",
        });
        Ok(stored)
    }

    async fn execute_batch(
        &self,
        calendar_id: &str,
        ops: &[WriteOp],
    ) -> Result<Vec<Result<Event, BackendError>>, BackendError> {
        {
            let mut state = self.state();
            state.take_failure(Operation::Batch)?;
            state.batch_sizes.push(ops.len());
        }

        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            results.push(op.execute(self, calendar_id).await);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventTime;
    use chrono::NaiveDate;

    const CAL: &str = "primary";

    fn holiday(name: &str) -> Event {
        let day = NaiveDate::from_ymd_opt(2025, 12, 25).unwrap();
        Event::new(EventFields::new(EventTime::Date(day), EventTime::Date(day)).with_summary(name))
    }

    fn backend() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.add_calendar(CAL, "Primary", AccessRole::Owner);
        backend
    }

    async fn list_all(backend: &InMemoryBackend, sync_token: Option<String>) -> EventPage {
        let request = ListRequest {
            sync_token,
            page_token: None,
            show_deleted: true,
        };
        backend.list_events(CAL, &request).await.unwrap()
    }

    #[tokio::test]
    async fn test_sync_token_returns_only_later_changes() {
        let backend = backend();
        backend.put_event(CAL, holiday("Christmas").with_id("e1"));

        let first = list_all(&backend, None).await;
        assert_eq!(first.items.len(), 1);

        backend.put_event(CAL, holiday("Boxing Day").with_id("e2"));
        let second = list_all(&backend, first.next_sync_token).await;
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].id.as_deref(), Some("e2"));
    }

    #[tokio::test]
    async fn test_expired_sync_token_is_reported() {
        let backend = backend();
        let first = list_all(&backend, None).await;
        backend.expire_sync_tokens(CAL);

        let request = ListRequest {
            sync_token: first.next_sync_token,
            ..ListRequest::default()
        };
        let err = backend.list_events(CAL, &request).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::CursorExpired);
    }

    #[tokio::test]
    async fn test_stale_update_is_rejected() {
        let backend = backend();
        let mut event = holiday("Christmas").with_id("e1");
        event.sequence = 3;
        backend.put_event(CAL, event.clone());

        event.sequence = 2;
        assert!(backend.update_event(CAL, "e1", &event).await.is_err());

        event.sequence = 3;
        assert!(backend.update_event(CAL, "e1", &event).await.is_ok());
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_stamps_updated() {
        let backend = backend();
        let created = backend.insert_event(CAL, &holiday("New Year")).await.unwrap();

        assert!(created.id.is_some());
        assert!(created.updated.is_some());
        assert_eq!(backend.writes().len(), 1);
        assert_eq!(backend.writes()[0].kind, "insert");
    }

    #[tokio::test]
    async fn test_failed_batch_call_runs_no_item() {
        let backend = backend();
        backend.fail_next(Operation::Batch, BackendError::transient("backendError"));

        let ops = [WriteOp::Insert {
            event: holiday("Christmas"),
        }];
        assert!(backend.execute_batch(CAL, &ops).await.is_err());
        assert!(backend.writes().is_empty());
        assert!(backend.batch_sizes().is_empty());

        let results = backend.execute_batch(CAL, &ops).await.unwrap();
        assert!(results[0].is_ok());
        assert_eq!(backend.batch_sizes(), vec![1]);
    }

    #[tokio::test]
    async fn test_hidden_tombstones_without_show_deleted() {
        let backend = backend();
        backend.put_event(CAL, holiday("Christmas").with_id("e1"));
        backend.cancel_event(CAL, "e1");

        let page = backend
            .list_events(CAL, &ListRequest::default())
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(backend.events(CAL).len(), 1);
        assert!(backend.active_events(CAL).is_empty());
    }
}
