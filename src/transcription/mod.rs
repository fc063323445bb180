pub mod whisper;
pub mod srt;

pub use whisper::{WhisperTranscriber, WHISPER_PROGRAM};
pub use srt::{parse_srt, render_readable, write_readable_transcript, SRTEntry};
