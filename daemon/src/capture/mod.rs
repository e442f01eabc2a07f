//! Capture collaborators
//!
//! Frames, the sources sessions read them from, the sinks completed runs
//! are handed to, and the film filter applied when photos are developed.

mod filter;
mod frame;
mod sink;
mod source;

pub use filter::FilmFilter;
pub use frame::{Frame, FrameInfo};
pub use sink::{FrameSink, SessionStore, SinkError};
pub use source::{FrameSource, SourceError, TestPatternSource};
