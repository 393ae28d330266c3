use anyhow::Result;
use axum::http::StatusCode;
use rollcall_core::domain::{Delivery, EntryId};
use serde_json::{Value, json};

mod common;
use common::build_test_app;

#[tokio::test]
async fn accepted_submission_is_readable_from_the_log() -> Result<()> {
    let app = build_test_app().await?;

    let response = app
        .server
        .post("/api/v1/attendance")
        .json(&json!({ "rollNumber": "42", "classId": 7 }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);

    let body: Value = response.json();
    assert_eq!(body["status"], "success");
    let entry_id: EntryId = body["entryId"].as_str().unwrap().parse()?;

    let entries = app.log.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].id() >= entry_id);
    match &entries[0] {
        Delivery::Event(entry) => {
            assert_eq!(entry.event.roll_number.as_str(), "42");
            assert_eq!(entry.event.class_id.as_str(), "7");
        }
        other => panic!("unexpected delivery {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn legacy_route_and_snake_case_fields_are_accepted() -> Result<()> {
    let app = build_test_app().await?;

    app.server
        .post("/api/v1/log_attendance")
        .json(&json!({ "roll_no": "42", "class_id": "7" }))
        .await
        .assert_status(StatusCode::ACCEPTED);

    assert_eq!(app.log.len(), 1);
    Ok(())
}

#[tokio::test]
async fn missing_or_blank_fields_are_rejected_without_append() -> Result<()> {
    let app = build_test_app().await?;

    for body in [
        json!({ "classId": "7" }),
        json!({ "rollNumber": "42" }),
        json!({ "rollNumber": "   ", "classId": "7" }),
        json!({ "rollNumber": "42", "classId": "" }),
    ] {
        let response = app.server.post("/api/v1/attendance").json(&body).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let error: Value = response.json();
        assert_eq!(error["error"]["status"], 400);
    }

    assert!(app.log.is_empty());
    Ok(())
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() -> Result<()> {
    let app = build_test_app().await?;

    app.server
        .post("/api/v1/attendance")
        .content_type("application/json")
        .text("{not json")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    assert!(app.log.is_empty());
    Ok(())
}

#[tokio::test]
async fn unreachable_log_returns_503_with_no_partial_work() -> Result<()> {
    let app = build_test_app().await?;
    app.log.set_reachable(false);

    let response = app
        .server
        .post("/api/v1/attendance")
        .json(&json!({ "rollNumber": "42", "classId": "7" }))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

    let error: Value = response.json();
    assert_eq!(error["error"]["status"], 503);
    assert_eq!(app.log.reconnect_count(), 1);
    assert!(app.log.is_empty());
    Ok(())
}

#[tokio::test]
async fn dropped_connection_is_recovered_within_the_request() -> Result<()> {
    let app = build_test_app().await?;
    app.log.drop_connection();

    app.server
        .post("/api/v1/attendance")
        .json(&json!({ "rollNumber": "42", "classId": "7" }))
        .await
        .assert_status(StatusCode::ACCEPTED);

    assert_eq!(app.log.len(), 1);
    Ok(())
}
