/// Lecture Harvester
///
/// Watches Canvas courses for new lecture recordings, downloads them on a
/// weekly schedule, merges each day's segments and optionally adds subtitles.

pub mod acquisition;
pub mod config;
pub mod discovery;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod schedule;
pub mod session;
pub mod transcription;
pub mod watcher;

// Re-export main types for easy access
pub use crate::acquisition::{AcquisitionEngine, AcquisitionOutcome};
pub use crate::config::{Config, CourseSchedule};
pub use crate::discovery::{CanvasVideoClient, VideoDescriptor, VideoListing, VideoSource};
pub use crate::error::{ErrorKind, HarvestError, Result};
pub use crate::history::HistoryStore;
pub use crate::pipeline::{
    CommandRunner, InputRef, MediaProcessor, ProcessOptions, SystemRunner, ToolInvocation,
    ToolOptions, VideoPipeline,
};
pub use crate::session::{CaptchaSolver, SessionHandle, SessionManager, SessionProvider};
pub use crate::watcher::{CycleReport, LoopSettings, LoopState, PollLoop};
