//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::capture::FrameInfo;
use crate::events::FlowEvent;
use crate::state::{Flow, SessionStatus};

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Begin a capture run for a flow
    StartSession { flow: Flow },

    /// Run a flow to its end and reply with the captured frames
    RunSession { flow: Flow },

    /// Abort any run of a flow and return it to Idle
    ResetSession { flow: Flow },

    /// Frames handed off by the last completed run of a flow
    GetFrames { flow: Flow },

    /// Apply the film filter to a flow's stored frames
    Develop { flow: Flow },

    /// Drop every stored frame
    ClearStorage,

    /// Revoke or restore the test pattern camera
    SetCameraAvailable { available: bool },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to session event notifications
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Run accepted
    Started { flow: Flow },

    /// A run was already active; nothing changed
    StartIgnored { flow: Flow },

    /// Session returned to Idle
    Reset { flow: Flow },

    /// Stored frames of a flow
    Frames { flow: Flow, frames: Vec<FrameInfo> },

    /// Storage cleared
    Cleared,

    /// Camera availability after a change
    Camera { available: bool },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A session event occurred
    SessionEvent { event: FlowEvent },

    /// Events were dropped because the client fell behind
    Lagged { skipped: u64 },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether any session is mid-run
    pub capturing: bool,

    /// Per-flow session state
    pub sessions: Vec<SessionStatus>,

    /// Storage keys currently holding frames
    pub stored_keys: Vec<String>,

    /// Whether the camera hands out frames
    pub camera_available: bool,

    /// Frames the camera has handed out since startup
    pub frames_served: u32,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            capturing: false,
            sessions: Vec::new(),
            stored_keys: Vec::new(),
            camera_available: true,
            frames_served: 0,
            uptime_secs: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::events::SessionEvent;

    #[test]
    fn test_request_serialization() {
        let req = Request::StartSession {
            flow: Flow::Photobooth,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("start_session"));
        assert!(json.contains("photobooth"));
    }

    #[test]
    fn test_request_deserialization() {
        let req: Request = serde_json::from_str(r#"{"type":"develop","flow":"film_camera"}"#).unwrap();
        assert!(matches!(req, Request::Develop { flow: Flow::FilmCamera }));
    }

    #[test]
    fn test_camera_request_deserialization() {
        let req: Request =
            serde_json::from_str(r#"{"type":"set_camera_available","available":false}"#).unwrap();
        assert!(matches!(req, Request::SetCameraAvailable { available: false }));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("status"));
    }

    #[test]
    fn test_notification_serialization() {
        let note = Notification::SessionEvent {
            event: FlowEvent {
                flow: Flow::Polaroid,
                event: SessionEvent::Flash { shot: 1 },
            },
        };
        let json = serde_json::to_string(&note).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "session_event");
        assert_eq!(value["event"]["type"], "flash");
        assert_eq!(value["event"]["flow"], "polaroid");
    }
}
