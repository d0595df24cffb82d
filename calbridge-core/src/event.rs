//! Provider-neutral event types.
//!
//! Providers convert their API payloads into these types, and the replica
//! stores work exclusively with them for merging, conflict resolution and
//! pushing writes back.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A calendar event (provider-neutral).
///
/// The id is stable once assigned by the backend. Content fields sit behind
/// [`Event::fields_mut`], which marks the event dirty so the owning replica
/// knows it holds a local edit that has not reached the backend yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(flatten)]
    fields: EventFields,

    // Sync Infrastructure
    /// Revision sequence number (SEQUENCE)
    #[serde(default)]
    pub sequence: i64,
    /// Last modification timestamp, as reported by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,

    /// Fields this crate does not model, kept for round-tripping back to the provider
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,

    #[serde(skip)]
    dirty: bool,
}

/// The content of an event: everything that takes part in content identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFields {
    #[serde(default)]
    pub status: EventStatus,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_id: Option<String>,

    // Alarms & Availability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminders: Option<Reminders>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transparency: Option<Transparency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,

    // Meeting Data
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<Attendee>,
}

impl EventFields {
    pub fn new(start: EventTime, end: EventTime) -> Self {
        EventFields {
            status: EventStatus::Confirmed,
            start,
            end,
            summary: None,
            description: None,
            location: None,
            color_id: None,
            reminders: None,
            transparency: None,
            visibility: None,
            attendees: Vec::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTime {
    /// All-day event
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    /// Date-time anchored to an IANA zone (recurring events need the zone)
    DateTimeZoned {
        datetime: DateTime<Utc>,
        tzid: String,
    },
}

/// An event attendee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// "accepted", "declined", "tentative", "needsAction"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

impl Attendee {
    pub fn new(email: impl Into<String>) -> Self {
        Attendee {
            email: email.into(),
            name: None,
            response_status: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminders {
    #[serde(default)]
    pub use_default: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Reminder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    /// "popup" or "email"
    pub method: String,
    /// Minutes before the event to trigger
    pub minutes: i64,
}

/// Event transparency (busy/free status)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transparency {
    Opaque,
    Transparent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Default,
    Public,
    Private,
    Confidential,
}

/// Digest over an event's content fields. Equal hashes mean the two copies
/// are the same event for sync purposes, whatever their revision or timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// The projection that gets hashed. Attendees contribute only their emails, sorted.
#[derive(Serialize)]
struct HashedFields<'a> {
    status: EventStatus,
    start: &'a EventTime,
    end: &'a EventTime,
    summary: &'a Option<String>,
    description: &'a Option<String>,
    location: &'a Option<String>,
    color_id: &'a Option<String>,
    reminders: &'a Option<Reminders>,
    transparency: &'a Option<Transparency>,
    visibility: &'a Option<Visibility>,
    attendees: Vec<&'a str>,
}

impl Event {
    pub fn new(fields: EventFields) -> Self {
        Event {
            id: None,
            fields,
            sequence: 0,
            updated: None,
            extra: serde_json::Map::new(),
            dirty: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn fields(&self) -> &EventFields {
        &self.fields
    }

    /// Mutable access to the content fields. Marks the event dirty.
    pub fn fields_mut(&mut self) -> &mut EventFields {
        self.dirty = true;
        &mut self.fields
    }

    pub fn status(&self) -> EventStatus {
        self.fields.status
    }

    pub fn is_active(&self) -> bool {
        self.fields.status != EventStatus::Cancelled
    }

    /// Whether this copy carries a local edit not yet confirmed by the backend.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn content_hash(&self) -> ContentHash {
        let f = &self.fields;
        let mut attendees: Vec<&str> = f.attendees.iter().map(|a| a.email.as_str()).collect();
        attendees.sort_unstable();

        let projection = HashedFields {
            status: f.status,
            start: &f.start,
            end: &f.end,
            summary: &f.summary,
            description: &f.description,
            location: &f.location,
            color_id: &f.color_id,
            reminders: &f.reminders,
            transparency: &f.transparency,
            visibility: &f.visibility,
            attendees,
        };

        // Serializing plain structs, strings and chrono types cannot fail.
        let bytes = serde_json::to_vec(&projection).unwrap_or_default();
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(&bytes));
        ContentHash(digest)
    }

    /// Compare two copies of an event.
    ///
    /// Copies with no meaningful difference are `Equal` even if they were
    /// updated at different times. Otherwise the most recently updated copy
    /// wins. Comparing against nothing always yields `Greater`.
    pub fn compare(&self, other: Option<&Event>) -> Ordering {
        let Some(other) = other else {
            return Ordering::Greater;
        };

        if self.content_hash() == other.content_hash() {
            return Ordering::Equal;
        }

        self.updated.cmp(&other.updated)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id.as_deref().unwrap_or("<new>");
        let short = id.get(..8).unwrap_or(id);
        let summary = self.fields.summary.as_deref().unwrap_or("(No title)");
        write!(f, "{short} {summary} [seq {}]", self.sequence)
    }
}
