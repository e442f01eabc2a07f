//! Events module for capture session transitions
//!
//! Sessions publish these on a broadcast channel; display layers subscribe
//! to drive countdown numbers, the flash overlay and result handoff.

use serde::{Deserialize, Serialize};

use crate::capture::FrameInfo;
use crate::state::{Flow, SessionState};

/// An event tagged with the flow whose session produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    pub flow: Flow,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Events emitted by a capture session during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A run was accepted and is about to count down to the first shot
    RunStarted { total_shots: u32 },

    /// Start requested while a run was already active; nothing changed
    StartIgnored { state: SessionState },

    /// The session moved into a new phase for the given shot (1-based)
    PhaseEntered { phase: SessionState, shot: u32 },

    /// Countdown value to display before a shot
    CountdownTick { shot: u32, value: u32 },

    /// A mirrored frame was appended to the run
    ShotCaptured { shot: u32, width: u32, height: u32 },

    /// Flash cue for the shot that was just taken
    Flash { shot: u32 },

    /// All shots taken and handed off
    Complete { frames: Vec<FrameInfo> },

    /// The run was aborted
    Error {
        reason: String,
        /// Frames captured before the failure
        captured: u32,
    },

    /// The session was forced back to Idle
    Reset,
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::RunStarted { total_shots } => {
                write!(f, "RUN_STARTED ({} shots)", total_shots)
            }
            SessionEvent::StartIgnored { state } => write!(f, "START_IGNORED ({})", state),
            SessionEvent::PhaseEntered { phase, shot } => {
                write!(f, "PHASE_ENTERED ({} shot {})", phase, shot)
            }
            SessionEvent::CountdownTick { shot, value } => {
                write!(f, "COUNTDOWN_TICK ({} shot {})", value, shot)
            }
            SessionEvent::ShotCaptured { shot, width, height } => {
                write!(f, "SHOT_CAPTURED ({} {}x{})", shot, width, height)
            }
            SessionEvent::Flash { shot } => write!(f, "FLASH ({})", shot),
            SessionEvent::Complete { frames } => write!(f, "COMPLETE ({} frames)", frames.len()),
            SessionEvent::Error { reason, captured } => {
                write!(f, "ERROR ({}; {} captured)", reason, captured)
            }
            SessionEvent::Reset => write!(f, "RESET"),
        }
    }
}

impl std::fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.flow, self.event)
    }
}
