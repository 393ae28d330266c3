use axum::extract::ws::Message;
use rollcall_core::domain::LiveNotification;

/// Encode a notification as a text frame:
/// `{"rollNo": "...", "classId": "..."}`.
pub fn notification_to_websocket(
    notification: &LiveNotification,
) -> Result<Message, serde_json::Error> {
    let json = serde_json::to_string(notification)?;
    Ok(Message::Text(json.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_text_frame_with_wire_names() {
        let frame = notification_to_websocket(&LiveNotification {
            roll_no: "42".to_string(),
            class_id: "7".to_string(),
        })
        .unwrap();

        match frame {
            Message::Text(text) => {
                let value: serde_json::Value =
                    serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(
                    value,
                    serde_json::json!({"rollNo": "42", "classId": "7"})
                );
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
