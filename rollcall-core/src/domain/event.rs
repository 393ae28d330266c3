use std::fmt;

use chrono::{DateTime, FixedOffset, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing {0}")]
    MissingField(&'static str),

    #[error("{0} must not be blank")]
    BlankField(&'static str),
}

/// Identifier of the observed subject (a student's roll number).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RollNumber(String);

impl RollNumber {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        non_blank(raw, "rollNumber").map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RollNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the context (class) an observation belongs to. Capture
/// stations send either integers or strings; both normalise to text.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClassId(String);

impl ClassId {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        non_blank(raw, "classId").map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn non_blank(
    raw: &str,
    field: &'static str,
) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Err(ValidationError::BlankField(field))
    } else {
        Ok(trimmed.to_string())
    }
}

/// A single "attendance observed" fact. Immutable once appended to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEvent {
    pub roll_number: RollNumber,
    pub class_id: ClassId,
    /// Capture-time instant on the originator's clock, second precision.
    pub observed_at: DateTime<Utc>,
}

impl AttendanceEvent {
    pub fn new(
        roll_number: RollNumber,
        class_id: ClassId,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            roll_number,
            class_id,
            observed_at: observed_at.trunc_subsecs(0),
        }
    }

    pub fn notification(&self) -> LiveNotification {
        LiveNotification {
            roll_no: self.roll_number.as_str().to_string(),
            class_id: self.class_id.as_str().to_string(),
        }
    }
}

/// Identifier as sent by a capture station: JSON string or JSON integer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawIdentifier {
    Text(String),
    Number(i64),
}

impl RawIdentifier {
    fn into_text(self) -> String {
        match self {
            RawIdentifier::Text(text) => text,
            RawIdentifier::Number(n) => n.to_string(),
        }
    }
}

/// Inbound request body accepted by the ingress gate.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSubmission {
    #[serde(default, alias = "roll_no", alias = "rollNo")]
    pub roll_number: Option<RawIdentifier>,
    #[serde(default, alias = "class_id")]
    pub class_id: Option<RawIdentifier>,
    /// Capture time when the station supplies one; otherwise the gate stamps
    /// its own receive time.
    #[serde(default, alias = "observed_at", alias = "timestamp")]
    pub observed_at: Option<DateTime<FixedOffset>>,
}

impl AttendanceSubmission {
    pub fn into_event(
        self,
        received_at: DateTime<Utc>,
    ) -> Result<AttendanceEvent, ValidationError> {
        let roll = self
            .roll_number
            .ok_or(ValidationError::MissingField("rollNumber"))?
            .into_text();
        let class = self
            .class_id
            .ok_or(ValidationError::MissingField("classId"))?
            .into_text();

        let observed_at = self
            .observed_at
            .map(|at| at.with_timezone(&Utc))
            .unwrap_or(received_at);

        Ok(AttendanceEvent::new(
            RollNumber::parse(&roll)?,
            ClassId::parse(&class)?,
            observed_at,
        ))
    }
}

/// Minimal payload pushed to live observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveNotification {
    #[serde(rename = "rollNo")]
    pub roll_no: String,
    #[serde(rename = "classId")]
    pub class_id: String,
}
