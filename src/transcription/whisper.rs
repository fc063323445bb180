use std::path::{Path, PathBuf};

use crate::pipeline::ToolInvocation;

/// Speech-to-text binary invoked for transcription
pub const WHISPER_PROGRAM: &str = "whisper-ctranslate2";

/// Builds whisper-ctranslate2 invocations that emit SRT subtitles
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    /// User-supplied arguments placed before the fixed ones
    extra_args: Vec<String>,
}

impl WhisperTranscriber {
    pub fn new(extra_args: Vec<String>) -> Self {
        Self { extra_args }
    }

    /// Subtitle file whisper writes for `input` into `output_dir`
    pub fn subtitle_path(input: &Path, output_dir: &Path) -> PathBuf {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        output_dir.join(format!("{}.srt", stem))
    }

    /// Transcribe `input` into `output_dir`, seeded with `initial_prompt`
    pub fn invocation(&self, input: &Path, output_dir: &Path, initial_prompt: &str) -> ToolInvocation {
        let mut invocation = ToolInvocation::new(WHISPER_PROGRAM)
            .args(self.extra_args.iter().cloned())
            .arg("-f")
            .arg("srt");

        if !initial_prompt.is_empty() {
            invocation = invocation.arg("--initial_prompt").arg(initial_prompt);
        }

        invocation
            .arg("-o")
            .arg(output_dir.display().to_string())
            .arg(input.display().to_string())
            .produces(Self::subtitle_path(input, output_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtitle_path() {
        let path = WhisperTranscriber::subtitle_path(
            Path::new("/tmp/work/merged_1.mp4"),
            Path::new("/tmp/work"),
        );
        assert_eq!(path, PathBuf::from("/tmp/work/merged_1.srt"));
    }

    #[test]
    fn test_invocation_arguments() {
        let transcriber = WhisperTranscriber::new(vec![
            "--model".to_string(),
            "large-v2".to_string(),
        ]);
        let invocation = transcriber.invocation(
            Path::new("/w/merged.mp4"),
            Path::new("/w"),
            "极限",
        );

        assert_eq!(invocation.program(), WHISPER_PROGRAM);
        assert_eq!(
            invocation.arguments(),
            &[
                "--model", "large-v2", "-f", "srt", "--initial_prompt", "极限",
                "-o", "/w", "/w/merged.mp4",
            ]
        );
        assert_eq!(invocation.outputs(), &[PathBuf::from("/w/merged.srt")]);
    }

    #[test]
    fn test_empty_prompt_is_omitted() {
        let invocation = WhisperTranscriber::new(Vec::new()).invocation(
            Path::new("/w/a.mp4"),
            Path::new("/w"),
            "",
        );
        assert!(!invocation.arguments().iter().any(|a| a == "--initial_prompt"));
    }
}
