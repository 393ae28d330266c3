use chrono::{FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::{AttendanceEvent, ClassId, RollNumber};

/// Display name persisted for rolls with no reference match.
pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown";

/// Persistence identity of an attendance record. A second write for the same
/// identity updates the existing row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordIdentity {
    pub roll_number: RollNumber,
    pub date: NaiveDate,
    pub class_id: ClassId,
}

/// Deduplicated projection written to the relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub roll_number: RollNumber,
    pub display_name: String,
    pub class_id: ClassId,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl AttendanceRecord {
    /// Project an event into a record, splitting the capture instant into
    /// date and time in the record's local offset.
    pub fn from_event(
        event: &AttendanceEvent,
        display_name: impl Into<String>,
        offset: FixedOffset,
    ) -> Self {
        let local = event.observed_at.with_timezone(&offset).naive_local();
        Self {
            roll_number: event.roll_number.clone(),
            display_name: display_name.into(),
            class_id: event.class_id.clone(),
            date: local.date(),
            time: local.time(),
        }
    }

    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity {
            roll_number: self.roll_number.clone(),
            date: self.date,
            class_id: self.class_id.clone(),
        }
    }
}
