use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::Utc;
use rollcall_core::domain::AttendanceSubmission;
use serde_json::{Value, json};

use crate::{AppState, errors::AppResult};

/// Queue one attendance observation. 202 means the event log accepted the
/// append; the record is written later by a committer worker.
pub async fn submit_attendance_handler(
    State(state): State<AppState>,
    payload: Result<Json<AttendanceSubmission>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(submission) = payload?;
    let entry_id = state.ingress.submit(submission, Utc::now()).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "success",
            "message": "Attendance queued",
            "entryId": entry_id.to_string(),
        })),
    ))
}
