use crate::chat::Timestamp;
use chrono::{Local, TimeZone, Timelike};

/// Label shown for absent or not-yet-resolved timestamps.
pub const NOW_LABEL: &str = "now";

/// Render a timestamp as a 12-hour `H:MM AM/PM` label in local time.
pub fn format_time(timestamp: Option<&Timestamp>) -> String {
    format_time_in(timestamp, &Local)
}

pub fn format_time_in<Tz: TimeZone>(timestamp: Option<&Timestamp>, tz: &Tz) -> String {
    match timestamp {
        Some(Timestamp::Resolved(at)) => {
            let local = at.with_timezone(tz);
            let (pm, hour) = local.hour12();
            format!(
                "{}:{:02} {}",
                hour,
                local.minute(),
                if pm { "PM" } else { "AM" }
            )
        }
        Some(Timestamp::Pending) | None => NOW_LABEL.to_string(),
    }
}
