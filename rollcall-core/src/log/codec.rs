//! Field layout of an attendance event inside a log entry.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::domain::{
    AttendanceEvent, ClassId, Delivery, EntryId, LogEntry, MalformedEntry,
    RollNumber,
};

pub const ROLL_FIELD: &str = "roll_no";
pub const CLASS_FIELD: &str = "class_id";
pub const TIMESTAMP_FIELD: &str = "timestamp";

pub fn encode(event: &AttendanceEvent) -> [(&'static str, String); 3] {
    [
        (ROLL_FIELD, event.roll_number.as_str().to_string()),
        (CLASS_FIELD, event.class_id.as_str().to_string()),
        (
            TIMESTAMP_FIELD,
            event.observed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    ]
}

/// Decode raw entry fields into a typed delivery. Anything that does not
/// describe a valid event becomes [`Delivery::Malformed`].
pub fn decode(id: EntryId, fields: BTreeMap<String, String>) -> Delivery {
    match decode_event(&fields) {
        Ok(event) => Delivery::Event(LogEntry { id, event }),
        Err(reason) => {
            Delivery::Malformed(MalformedEntry { id, fields, reason })
        }
    }
}

fn decode_event(
    fields: &BTreeMap<String, String>,
) -> Result<AttendanceEvent, String> {
    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| format!("missing field '{name}'"))
    };

    let roll =
        RollNumber::parse(field(ROLL_FIELD)?).map_err(|e| e.to_string())?;
    let class = ClassId::parse(field(CLASS_FIELD)?).map_err(|e| e.to_string())?;
    let observed_at = parse_timestamp(field(TIMESTAMP_FIELD)?)?;

    Ok(AttendanceEvent::new(roll, class, observed_at))
}

/// RFC 3339 is the native form. Offset-less ISO-8601 timestamps written by
/// older producers are read as UTC.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|err| format!("invalid timestamp '{raw}': {err}"))
}
