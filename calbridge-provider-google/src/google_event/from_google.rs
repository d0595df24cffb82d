use anyhow::{Result, bail};
use calbridge_core::event::{
    Attendee, Event, EventFields, EventStatus, EventTime, Reminder, Reminders, Transparency,
    Visibility,
};
use chrono::NaiveDate;

use super::{GoogleEvent, GoogleTime};

pub trait FromGoogle {
    fn from_google(event: GoogleEvent) -> Result<Self>
    where
        Self: Sized;
}

impl FromGoogle for Event {
    fn from_google(event: GoogleEvent) -> Result<Self> {
        let status = match event.status.as_deref() {
            Some("tentative") => EventStatus::Tentative,
            Some("cancelled") => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        };

        // Deleted events in an incremental listing carry only their id and status.
        let (start, end) = match (&event.start, &event.end) {
            (Some(start), Some(end)) => (event_time(start)?, event_time(end)?),
            _ if status == EventStatus::Cancelled => {
                let placeholder = EventTime::Date(NaiveDate::default());
                (placeholder.clone(), placeholder)
            }
            _ => bail!(
                "Event {} has no start or end time",
                event.id.as_deref().unwrap_or("<new>")
            ),
        };

        let reminders = event.reminders.map(|r| Reminders {
            use_default: r.use_default,
            overrides: r
                .overrides
                .into_iter()
                .map(|o| Reminder {
                    method: o.method,
                    minutes: o.minutes,
                })
                .collect(),
        });

        let transparency = event.transparency.as_deref().map(|t| match t {
            "transparent" => Transparency::Transparent,
            _ => Transparency::Opaque,
        });

        let visibility = event.visibility.as_deref().map(|v| match v {
            "public" => Visibility::Public,
            "private" => Visibility::Private,
            "confidential" => Visibility::Confidential,
            _ => Visibility::Default,
        });

        let attendees = event
            .attendees
            .into_iter()
            .map(|a| Attendee {
                email: a.email,
                name: a.display_name,
                response_status: a.response_status,
            })
            .collect();

        let mut fields = EventFields::new(start, end);
        fields.status = status;
        fields.summary = event.summary;
        fields.description = event.description;
        fields.location = event.location;
        fields.color_id = event.color_id;
        fields.reminders = reminders;
        fields.transparency = transparency;
        fields.visibility = visibility;
        fields.attendees = attendees;

        let mut converted = Event::new(fields);
        converted.id = event.id;
        converted.sequence = event.sequence;
        converted.updated = event.updated;
        converted.extra = event.extra;
        Ok(converted)
    }
}

fn event_time(time: &GoogleTime) -> Result<EventTime> {
    match (time.date_time, time.date, &time.time_zone) {
        (Some(datetime), _, Some(tzid)) => Ok(EventTime::DateTimeZoned {
            datetime,
            tzid: tzid.clone(),
        }),
        (Some(datetime), _, None) => Ok(EventTime::DateTime(datetime)),
        (None, Some(date), _) => Ok(EventTime::Date(date)),
        (None, None, _) => bail!("Event time has neither date nor dateTime"),
    }
}
