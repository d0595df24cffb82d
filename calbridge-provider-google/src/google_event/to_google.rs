use calbridge_core::event::{Event, EventStatus, EventTime, Transparency, Visibility};

use super::{GoogleAttendee, GoogleEvent, GoogleReminder, GoogleReminders, GoogleTime};

/// Server-owned fields that must not be echoed back on insert or update.
const READ_ONLY_FIELDS: &[&str] = &[
    "kind", "etag", "htmlLink", "created", "creator", "organizer", "iCalUID",
];

pub trait ToGoogle {
    fn to_google(&self) -> GoogleEvent;
}

impl ToGoogle for Event {
    fn to_google(&self) -> GoogleEvent {
        let fields = self.fields();

        let status = match fields.status {
            EventStatus::Confirmed => "confirmed",
            EventStatus::Tentative => "tentative",
            EventStatus::Cancelled => "cancelled",
        };

        let transparency = fields.transparency.map(|t| match t {
            Transparency::Opaque => "opaque".to_string(),
            Transparency::Transparent => "transparent".to_string(),
        });

        let visibility = fields.visibility.map(|v| match v {
            Visibility::Default => "default".to_string(),
            Visibility::Public => "public".to_string(),
            Visibility::Private => "private".to_string(),
            Visibility::Confidential => "confidential".to_string(),
        });

        let reminders = fields.reminders.as_ref().map(|r| GoogleReminders {
            use_default: r.use_default,
            overrides: r
                .overrides
                .iter()
                .map(|o| GoogleReminder {
                    method: o.method.clone(),
                    minutes: o.minutes,
                })
                .collect(),
        });

        let attendees = fields
            .attendees
            .iter()
            .map(|a| GoogleAttendee {
                email: a.email.clone(),
                display_name: a.name.clone(),
                response_status: a.response_status.clone(),
            })
            .collect();

        let extra = self
            .extra
            .iter()
            .filter(|(k, _)| !READ_ONLY_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        GoogleEvent {
            id: self.id.clone(),
            status: Some(status.to_string()),
            summary: fields.summary.clone(),
            description: fields.description.clone(),
            location: fields.location.clone(),
            color_id: fields.color_id.clone(),
            start: Some(event_time_to_google(&fields.start)),
            end: Some(event_time_to_google(&fields.end)),
            reminders,
            transparency,
            visibility,
            attendees,
            sequence: self.sequence,
            // Set by the server
            updated: None,
            extra,
        }
    }
}

fn event_time_to_google(time: &EventTime) -> GoogleTime {
    match time {
        EventTime::Date(date) => GoogleTime {
            date: Some(*date),
            ..Default::default()
        },
        EventTime::DateTime(datetime) => GoogleTime {
            date_time: Some(*datetime),
            ..Default::default()
        },
        EventTime::DateTimeZoned { datetime, tzid } => GoogleTime {
            date_time: Some(*datetime),
            time_zone: Some(tzid.clone()),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_event::FromGoogle;
    use calbridge_core::event::{Attendee, EventFields};
    use chrono::{TimeZone, Utc};

    fn lunch() -> Event {
        let start = Utc.with_ymd_and_hms(2025, 3, 20, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 20, 13, 0, 0).unwrap();
        let mut fields = EventFields::new(
            EventTime::DateTimeZoned {
                datetime: start,
                tzid: "Europe/Paris".into(),
            },
            EventTime::DateTime(end),
        )
        .with_summary("Lunch");
        fields.attendees = vec![Attendee::new("bob@bar.com")];

        let mut event = Event::new(fields).with_id("lunch01");
        event.sequence = 2;
        event.updated = Some(start);
        event
    }

    #[test]
    fn test_body_sent_to_google() {
        let mut event = lunch();
        event.extra.insert("etag".into(), "\"311\"".into());
        event
            .extra
            .insert("recurrence".into(), serde_json::json!(["RRULE:FREQ=WEEKLY"]));

        let body = serde_json::to_value(event.to_google()).unwrap();

        assert_eq!(body["id"], "lunch01");
        assert_eq!(body["status"], "confirmed");
        assert_eq!(body["sequence"], 2);
        assert_eq!(body["start"]["timeZone"], "Europe/Paris");
        assert_eq!(body["attendees"][0]["email"], "bob@bar.com");
        assert_eq!(body["recurrence"][0], "RRULE:FREQ=WEEKLY");
        assert!(body.get("etag").is_none());
        assert!(body.get("updated").is_none());
    }

    #[test]
    fn test_conversion_preserves_content_identity() {
        let event = lunch();
        let back = Event::from_google(event.to_google()).unwrap();

        assert_eq!(back.content_hash(), event.content_hash());
        assert_eq!(back.sequence, event.sequence);
    }
}
