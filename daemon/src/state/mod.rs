//! State module for capture session management
//!
//! Provides the capture session state machine and the per-flow registry:
//! - Idle: no run in progress
//! - CountingDown: visible countdown before a shot
//! - Capturing: one mirrored frame taken from the source
//! - Flashing: flash cue held after the shot
//! - InterShotWait: pause before the next countdown
//! - Complete: every shot taken and handed off

mod booth;
mod machine;
mod options;

pub use booth::Booth;
pub use machine::{RunOutcome, SessionState, SessionStatus};
pub use options::{Flow, SessionOptions};
