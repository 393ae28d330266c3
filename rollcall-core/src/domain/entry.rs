use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::AttendanceEvent;

/// Log-assigned entry identifier (`<millis>-<sequence>`).
///
/// Identifiers are unique per log and totally ordered; ordering follows the
/// numeric components, never the string form.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId {
    millis: u64,
    sequence: u64,
}

impl EntryId {
    /// Smallest possible id; every real entry sorts after it.
    pub const ZERO: EntryId = EntryId {
        millis: 0,
        sequence: 0,
    };

    pub fn new(millis: u64, sequence: u64) -> Self {
        Self { millis, sequence }
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.sequence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entry id '{0}'")]
pub struct InvalidEntryId(pub String);

impl FromStr for EntryId {
    type Err = InvalidEntryId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidEntryId(s.to_string());
        let (millis, sequence) = match s.split_once('-') {
            Some((millis, sequence)) => (millis, sequence),
            None => (s, "0"),
        };
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            sequence: sequence.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for EntryId {
    type Error = InvalidEntryId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntryId> for String {
    fn from(id: EntryId) -> Self {
        id.to_string()
    }
}

/// An event as stored in the log, tagged with its log position. Consumers
/// only ever hold copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub event: AttendanceEvent,
}

/// A log entry whose fields could not be decoded into an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEntry {
    pub id: EntryId,
    pub fields: BTreeMap<String, String>,
    pub reason: String,
}

/// What a consumer receives from the log after the single decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(LogEntry),
    Malformed(MalformedEntry),
}

impl Delivery {
    pub fn id(&self) -> EntryId {
        match self {
            Delivery::Event(entry) => entry.id,
            Delivery::Malformed(entry) => entry.id,
        }
    }

    pub fn event(&self) -> Option<&AttendanceEvent> {
        match self {
            Delivery::Event(entry) => Some(&entry.event),
            Delivery::Malformed(_) => None,
        }
    }
}
