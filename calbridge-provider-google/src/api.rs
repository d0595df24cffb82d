//! Minimal Calendar v3 REST client.
//!
//! Implements [`CalendarBackend`], running the writes of a batch a few at a
//! time, and classifies HTTP failures into the error kinds the sync engine
//! retries on.

use std::time::Duration;

use async_trait::async_trait;
use calbridge_core::backend::{CalendarBackend, CalendarInfo, EventPage, ListRequest, WriteOp};
use calbridge_core::{AccessRole, BackendError, Event};
use futures::stream::{self, StreamExt};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::google_event::{FromGoogle, GoogleEvent, ToGoogle};
use crate::session::Session;

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

/// Overrides the API root, for pointing the provider at a test server.
const BASE_URL_ENV: &str = "CALBRIDGE_GOOGLE_API_URL";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Writes of one batch in flight at once.
const BATCH_CONCURRENCY: usize = 8;

/// Reasons Google attaches to a 403 when the caller should slow down.
const RATE_LIMIT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "quotaExceeded",
];

pub struct GoogleCalendar {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListPage {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListEntry {
    id: String,
    #[serde(default)]
    summary: String,
    access_role: AccessRole,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    next_page_token: Option<String>,
    next_sync_token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

impl GoogleCalendar {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        GoogleCalendar {
            http,
            base_url: base_url.into(),
            access_token: access_token.into(),
        }
    }

    /// A client authenticated as the given domain account.
    pub async fn for_account(account: &str) -> anyhow::Result<Self> {
        let session = Session::load_valid(account).await?;
        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(GoogleCalendar::new(base_url, session.access_token()))
    }

    fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| BackendError::fatal(format!("Invalid API URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::fatal(format!("Invalid API URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    BackendError::transient(format!("Google API unreachable: {e}"))
                } else {
                    BackendError::fatal(format!("Google API request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::fatal(format!("Failed to parse Google API response: {e}")))
    }
}

/// Map a failed Calendar API response onto the engine's error kinds.
fn classify(status: StatusCode, body: &str) -> BackendError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();

    let reason = parsed
        .as_ref()
        .and_then(|p| p.error.errors.first())
        .map(|d| d.reason.as_str())
        .unwrap_or_default();
    let message = match &parsed {
        Some(p) if !p.error.message.is_empty() => p.error.message.as_str(),
        _ => body,
    };
    let message = format!("Google API error {}: {}", status.as_u16(), message);

    match status {
        StatusCode::GONE => BackendError::cursor_expired(message),
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE => BackendError::transient(message),
        StatusCode::FORBIDDEN if RATE_LIMIT_REASONS.contains(&reason) => {
            BackendError::transient(message)
        }
        _ => BackendError::fatal(message),
    }
}

fn convert(event: GoogleEvent) -> Result<Event, BackendError> {
    Event::from_google(event).map_err(|e| BackendError::fatal(format!("{e:#}")))
}

#[async_trait]
impl CalendarBackend for GoogleCalendar {
    async fn list_calendars(&self) -> Result<Vec<CalendarInfo>, BackendError> {
        let url = self.url(&["users", "me", "calendarList"])?;
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(url.clone());
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: CalendarListPage = self.send(request).await?;
            calendars.extend(page.items.into_iter().map(|entry| CalendarInfo {
                id: entry.id,
                summary: entry.summary,
                access_role: entry.access_role,
            }));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(calendars)
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        request: &ListRequest,
    ) -> Result<EventPage, BackendError> {
        let url = self.url(&["calendars", calendar_id, "events"])?;

        let mut query: Vec<(&str, String)> = vec![
            ("showDeleted", request.show_deleted.to_string()),
            ("maxResults", "2500".to_string()),
        ];
        if let Some(token) = &request.sync_token {
            query.push(("syncToken", token.clone()));
        }
        if let Some(token) = &request.page_token {
            query.push(("pageToken", token.clone()));
        }

        let page: EventsPage = self.send(self.http.get(url).query(&query)).await?;
        debug!(calendar_id, items = page.items.len(), "listed events");

        Ok(EventPage {
            items: page
                .items
                .into_iter()
                .map(convert)
                .collect::<Result<_, _>>()?,
            next_page_token: page.next_page_token,
            next_sync_token: page.next_sync_token,
        })
    }

    async fn insert_event(&self, calendar_id: &str, event: &Event) -> Result<Event, BackendError> {
        let url = self.url(&["calendars", calendar_id, "events"])?;
        let body = event.to_google();

        let created: GoogleEvent = self
            .send(
                self.http
                    .post(url)
                    .query(&[("sendUpdates", "none")])
                    .json(&body),
            )
            .await?;
        convert(created)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &Event,
    ) -> Result<Event, BackendError> {
        let url = self.url(&["calendars", calendar_id, "events", event_id])?;
        let body = event.to_google();

        let updated: GoogleEvent = self
            .send(
                self.http
                    .put(url)
                    .query(&[("sendUpdates", "none")])
                    .json(&body),
            )
            .await?;
        convert(updated)
    }

    async fn execute_batch(
        &self,
        calendar_id: &str,
        ops: &[WriteOp],
    ) -> Result<Vec<Result<Event, BackendError>>, BackendError> {
        debug!(calendar_id, ops = ops.len(), "executing batch");
        let writes: Vec<_> = ops.iter().map(|op| op.execute(self, calendar_id)).collect();
        let results = stream::iter(writes)
            .buffered(BATCH_CONCURRENCY)
            .collect()
            .await;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calbridge_core::{ErrorKind, WriteOp};
    use std::time::Instant;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn google_error(code: u16, reason: &str) -> ResponseTemplate {
        ResponseTemplate::new(code).set_body_json(serde_json::json!({
            "error": {
                "code": code,
                "message": format!("{reason} message"),
                "errors": [{"domain": "usageLimits", "reason": reason}]
            }
        }))
    }

    fn lunch_json(id: &str, sequence: i64) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "status": "confirmed",
            "summary": "Lunch",
            "start": {"dateTime": "2025-03-20T12:00:00Z"},
            "end": {"dateTime": "2025-03-20T13:00:00Z"},
            "sequence": sequence,
            "updated": "2025-03-19T08:00:00Z"
        })
    }

    #[test]
    fn test_error_classification() {
        let cases = [
            (StatusCode::GONE, "fullSyncRequired", ErrorKind::CursorExpired),
            (StatusCode::TOO_MANY_REQUESTS, "rateLimitExceeded", ErrorKind::Transient),
            (StatusCode::SERVICE_UNAVAILABLE, "backendError", ErrorKind::Transient),
            (StatusCode::FORBIDDEN, "userRateLimitExceeded", ErrorKind::Transient),
            (StatusCode::FORBIDDEN, "quotaExceeded", ErrorKind::Transient),
            (StatusCode::FORBIDDEN, "forbidden", ErrorKind::Fatal),
            (StatusCode::NOT_FOUND, "notFound", ErrorKind::Fatal),
            (StatusCode::BAD_REQUEST, "invalid", ErrorKind::Fatal),
        ];

        for (status, reason, kind) in cases {
            let body = serde_json::json!({
                "error": {"code": status.as_u16(), "message": "m", "errors": [{"reason": reason}]}
            })
            .to_string();
            assert_eq!(classify(status, &body).kind, kind, "{status} {reason}");
        }
    }

    #[test]
    fn test_unparseable_error_body_is_kept_in_message() {
        let err = classify(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(err.is_transient());
        assert!(err.message.contains("<html>bad gateway</html>"));
    }

    #[tokio::test]
    async fn test_list_calendars_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "rooms", "summary": "Rooms", "accessRole": "reader"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "primary", "summary": "Admin", "accessRole": "owner"}],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let client = GoogleCalendar::new(server.uri(), "tok");
        let calendars = client.list_calendars().await.unwrap();

        assert_eq!(calendars.len(), 2);
        assert_eq!(calendars[0].access_role, AccessRole::Owner);
        assert_eq!(calendars[1].id, "rooms");
        assert_eq!(calendars[1].access_role, AccessRole::Reader);
    }

    #[tokio::test]
    async fn test_list_events_sends_cursor_and_maps_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .and(query_param("syncToken", "sync-1"))
            .and(query_param("showDeleted", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [lunch_json("lunch01", 1), {"id": "gone", "status": "cancelled"}],
                "nextSyncToken": "sync-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GoogleCalendar::new(server.uri(), "tok");
        let page = client
            .list_events(
                "primary",
                &ListRequest {
                    sync_token: Some("sync-1".into()),
                    page_token: None,
                    show_deleted: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].is_active());
        assert!(!page.items[1].is_active());
        assert_eq!(page.next_sync_token.as_deref(), Some("sync-2"));
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_expired_sync_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(google_error(410, "fullSyncRequired"))
            .mount(&server)
            .await;

        let client = GoogleCalendar::new(server.uri(), "tok");
        let err = client
            .list_events(
                "primary",
                &ListRequest {
                    sync_token: Some("stale".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::CursorExpired);
        assert!(err.message.contains("fullSyncRequired message"));
    }

    #[tokio::test]
    async fn test_insert_keeps_event_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(query_param("sendUpdates", "none"))
            .and(body_partial_json(serde_json::json!({"id": "lunch01", "summary": "Lunch"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(lunch_json("lunch01", 0)))
            .expect(1)
            .mount(&server)
            .await;

        let mut event = convert(serde_json::from_value(lunch_json("lunch01", 0)).unwrap()).unwrap();
        event.updated = None;

        let client = GoogleCalendar::new(server.uri(), "tok");
        let created = client.insert_event("primary", &event).await.unwrap();
        assert_eq!(created.id.as_deref(), Some("lunch01"));
        assert!(created.updated.is_some());
    }

    #[tokio::test]
    async fn test_batch_reports_each_item() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/calendars/primary/events/lunch01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(lunch_json("lunch01", 2)))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/calendars/primary/events/lunch02"))
            .respond_with(google_error(403, "rateLimitExceeded"))
            .mount(&server)
            .await;

        let event = convert(serde_json::from_value(lunch_json("lunch01", 2)).unwrap()).unwrap();
        let ops = vec![
            WriteOp::Update {
                event_id: "lunch01".into(),
                event: event.clone(),
            },
            WriteOp::Update {
                event_id: "lunch02".into(),
                event,
            },
        ];

        let client = GoogleCalendar::new(server.uri(), "tok");
        let results = client.execute_batch("primary", &ops).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().sequence, 2);
        assert!(results[1].as_ref().unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_batch_runs_writes_concurrently_in_order() {
        let server = MockServer::start().await;
        for i in 0..16 {
            let id = format!("lunch{i:02}");
            Mock::given(method("PUT"))
                .and(path(format!("/calendars/primary/events/{id}")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(lunch_json(&id, 2))
                        .set_delay(Duration::from_millis(250)),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        let event = convert(serde_json::from_value(lunch_json("lunch00", 2)).unwrap()).unwrap();
        let ops: Vec<WriteOp> = (0..16)
            .map(|i| WriteOp::Update {
                event_id: format!("lunch{i:02}"),
                event: event.clone(),
            })
            .collect();

        let client = GoogleCalendar::new(server.uri(), "tok");
        let started = Instant::now();
        let results = client.execute_batch("primary", &ops).await.unwrap();

        // One after another this would take 4s
        assert!(started.elapsed() < Duration::from_secs(2));
        let ids: Vec<_> = results
            .iter()
            .map(|r| r.as_ref().unwrap().id.clone().unwrap())
            .collect();
        let expected: Vec<_> = (0..16).map(|i| format!("lunch{i:02}")).collect();
        assert_eq!(ids, expected);
    }
}
