//! Ingress gate: validate one submission and append it to the event log.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use rollcall_core::{
    LogError,
    domain::{AttendanceSubmission, EntryId, ValidationError},
    log::EventLog,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum IngressError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Log(#[from] LogError),
}

/// Stateless per request. Success means the log acknowledged the append;
/// the event is queued, not yet persisted.
#[derive(Clone)]
pub struct IngressGate {
    log: Arc<dyn EventLog>,
}

impl fmt::Debug for IngressGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngressGate").finish_non_exhaustive()
    }
}

impl IngressGate {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    /// Validate and append. On a connection failure the gate reconnects once
    /// and retries the append once; nothing is appended on validation errors.
    pub async fn submit(
        &self,
        submission: AttendanceSubmission,
        received_at: DateTime<Utc>,
    ) -> Result<EntryId, IngressError> {
        let event = submission.into_event(received_at)?;

        let id = match self.log.append(&event).await {
            Ok(id) => id,
            Err(err) if err.is_transient() => {
                warn!(error = %err, "Append failed; reconnecting to event log");
                self.log.reconnect().await?;
                self.log.append(&event).await?
            }
            Err(err) => return Err(err.into()),
        };

        debug!(
            entry_id = %id,
            roll_no = %event.roll_number,
            class_id = %event.class_id,
            "Attendance queued"
        );
        Ok(id)
    }
}
