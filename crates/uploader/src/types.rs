//! Statuses and notifications emitted by upload sessions.

use std::fmt;

/// Lifecycle status of one file upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// Enqueued, not started.
    Pending,
    /// A chunk exchange is in flight.
    Uploading,
    /// A chunk succeeded and more remain.
    Continue,
    /// A chunk failed; it will be re-sent after a delay.
    Retry,
    Complete,
    Failed,
    Canceled,
}

impl UploadStatus {
    /// Whether no further chunks will be sent from this status without a
    /// new `start`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Complete | UploadStatus::Failed | UploadStatus::Canceled
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Continue => "continue",
            UploadStatus::Retry => "retry",
            UploadStatus::Complete => "complete",
            UploadStatus::Failed => "failed",
            UploadStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Notification sent to the host on the registry's event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// A file was registered and is waiting for `start_upload`.
    Enqueued {
        session_id: String,
        name: String,
        total_bytes: u64,
    },
    /// The session moved to a new status.
    StatusChanged {
        session_id: String,
        status: UploadStatus,
    },
    /// The server confirmed more bytes.
    Progress {
        session_id: String,
        bytes_uploaded: u64,
        total_bytes: u64,
    },
    /// The upload finished; `response` is the server's final body.
    Completed {
        session_id: String,
        response: String,
        total_bytes: u64,
    },
    /// The upload gave up.
    Failed {
        session_id: String,
        error_code: i32,
        description: String,
    },
}

impl UploadEvent {
    pub fn session_id(&self) -> &str {
        match self {
            UploadEvent::Enqueued { session_id, .. }
            | UploadEvent::StatusChanged { session_id, .. }
            | UploadEvent::Progress { session_id, .. }
            | UploadEvent::Completed { session_id, .. }
            | UploadEvent::Failed { session_id, .. } => session_id,
        }
    }
}
