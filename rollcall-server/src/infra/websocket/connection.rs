use rollcall_core::domain::LiveNotification;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// One live observer. Frames go through a bounded channel drained by the
/// socket's send task.
pub struct Connection {
    /// Unique connection ID
    pub id: Uuid,
    sender: mpsc::Sender<LiveNotification>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("channel_closed", &self.sender.is_closed())
            .finish()
    }
}

impl Connection {
    pub fn new(sender: mpsc::Sender<LiveNotification>) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender,
        }
    }

    /// Queue a notification without waiting. Fails when the observer's
    /// buffer is full or its socket is gone.
    pub fn try_notify(
        &self,
        notification: LiveNotification,
    ) -> Result<(), TrySendError<LiveNotification>> {
        self.sender.try_send(notification)
    }
}
