//! Download → merge → transcribe chain that turns lecture segments into one file

pub mod command;
pub mod lists;

pub use command::{CommandRunner, SystemRunner, ToolInvocation};

use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{expand_home, CourseSchedule, DEFAULT_INITIAL_PROMPT};
use crate::error::{HarvestError, Result};
use crate::transcription::{write_readable_transcript, WhisperTranscriber};

/// A pipeline input: something to download, or a file already on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRef {
    Remote(String),
    Local(PathBuf),
}

impl InputRef {
    /// `http…` is remote; everything else is a local path, `~`-expanded and made absolute
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http") {
            return Self::Remote(raw.to_string());
        }

        let expanded = expand_home(Path::new(raw));
        if expanded.is_absolute() {
            Self::Local(expanded)
        } else {
            let cwd = std::env::current_dir().unwrap_or_default();
            Self::Local(cwd.join(expanded))
        }
    }
}

/// Arguments for the external tools, fixed for the pipeline's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOptions {
    pub aria2c_args: Vec<String>,
    pub whisper_args: Vec<String>,
}

impl ToolOptions {
    /// Silence whisper's per-segment console output
    pub fn quiet_whisper(mut self) -> Self {
        self.whisper_args.push("--verbose".to_string());
        self.whisper_args.push("False".to_string());
        self
    }
}

/// Per-call processing switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOptions {
    pub transcribe: bool,
    pub readable_subtitles: bool,
    pub initial_prompt: String,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            transcribe: false,
            readable_subtitles: false,
            initial_prompt: DEFAULT_INITIAL_PROMPT.to_string(),
        }
    }
}

impl From<&CourseSchedule> for ProcessOptions {
    fn from(course: &CourseSchedule) -> Self {
        Self {
            transcribe: course.transcribe,
            readable_subtitles: course.readable_subtitles,
            initial_prompt: course.initial_prompt.clone(),
        }
    }
}

/// Turns a list of inputs into one finished video at `output`
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    async fn process(&self, inputs: &[InputRef], output: &Path, options: &ProcessOptions) -> Result<()>;
}

/// aria2c + ffmpeg + whisper pipeline working inside a scratch directory
pub struct VideoPipeline<R: CommandRunner = SystemRunner> {
    runner: R,
    tools: ToolOptions,
    work_dir: PathBuf,
}

impl VideoPipeline<SystemRunner> {
    pub fn new(tools: ToolOptions, work_dir: impl Into<PathBuf>) -> Self {
        Self::with_runner(SystemRunner, tools, work_dir)
    }
}

impl<R: CommandRunner> VideoPipeline<R> {
    pub fn with_runner(runner: R, tools: ToolOptions, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            tools,
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn run_stages(
        &self,
        run_dir: &Path,
        inputs: &[InputRef],
        output: &Path,
        options: &ProcessOptions,
    ) -> Result<()> {
        if inputs.is_empty() {
            return Err(HarvestError::processing("ffmpeg", "no inputs to merge"));
        }

        let mut sources = Vec::with_capacity(inputs.len());
        let mut downloads = Vec::new();

        for input in inputs {
            match input {
                InputRef::Remote(url) => {
                    let target = run_dir.join(format!("{}.mp4", Uuid::new_v4()));
                    downloads.push((url.clone(), target.clone()));
                    sources.push(target);
                }
                InputRef::Local(path) => sources.push(path.clone()),
            }
        }

        if !downloads.is_empty() {
            info!("⬇️  Downloading {} segment(s)", downloads.len());
            let job_list = run_dir.join("aria2c.txt");
            write_list(&job_list, lists::download_job_list(&downloads)).await?;

            let mut invocation = ToolInvocation::new("aria2c")
                .arg("-i")
                .arg(job_list.display().to_string())
                .arg("-d")
                .arg(run_dir.display().to_string())
                .args(self.tools.aria2c_args.iter().cloned());
            for (_, target) in &downloads {
                invocation = invocation.produces(target);
            }
            self.runner.run(&invocation).await?;
        }

        info!("🎞️  Merging {} segment(s)", sources.len());
        let concat = run_dir.join("concat.txt");
        write_list(&concat, lists::concat_list(&sources)).await?;

        let merged = run_dir.join("merged.mp4");
        let invocation = ToolInvocation::new("ffmpeg")
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(concat.display().to_string())
            .args(["-c", "copy"])
            .arg(merged.display().to_string())
            .args(["-loglevel", "error", "-hide_banner"])
            .produces(&merged);
        self.runner.run(&invocation).await?;

        let mut artifact = merged.clone();
        let mut transcript = None;

        if options.transcribe {
            info!("📝 Transcribing {}", merged.display());
            let transcriber = WhisperTranscriber::new(self.tools.whisper_args.clone());
            let subtitles = WhisperTranscriber::subtitle_path(&merged, run_dir);
            self.runner
                .run(&transcriber.invocation(&merged, run_dir, &options.initial_prompt))
                .await?;

            let transcribed = run_dir.join("transcribed.mp4");
            let invocation = ToolInvocation::new("ffmpeg")
                .arg("-i")
                .arg(merged.display().to_string())
                .arg("-i")
                .arg(subtitles.display().to_string())
                .args(["-c", "copy", "-c:s", "mov_text"])
                .arg(transcribed.display().to_string())
                .args(["-loglevel", "error", "-hide_banner"])
                .produces(&transcribed);
            self.runner.run(&invocation).await?;
            artifact = transcribed;

            if options.readable_subtitles {
                let readable = run_dir.join("transcript.txt");
                let cues = write_readable_transcript(&subtitles, &readable).await?;
                debug!("Rendered {} subtitle cues", cues);
                transcript = Some(readable);
            }
        } else if options.readable_subtitles {
            warn!("Readable subtitles need transcription; skipping transcript");
        }

        place_file(&artifact, output).await?;
        if let Some(readable) = transcript {
            place_file(&readable, &output.with_extension("txt")).await?;
        }

        info!("✅ Saved {}", output.display());
        Ok(())
    }
}

#[async_trait]
impl<R: CommandRunner> MediaProcessor for VideoPipeline<R> {
    async fn process(&self, inputs: &[InputRef], output: &Path, options: &ProcessOptions) -> Result<()> {
        // Each run owns a private directory so tool side files go with it
        let run_dir = self.work_dir.join(format!("run_{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&run_dir)
            .await
            .map_err(|e| HarvestError::storage(&run_dir, e))?;

        let result = self.run_stages(&run_dir, inputs, output, options).await;
        remove_run_dir(&run_dir).await;
        result
    }
}

async fn write_list(path: &Path, content: String) -> Result<()> {
    tokio::fs::write(path, content)
        .await
        .map_err(|e| HarvestError::storage(path, e))
}

/// Move `from` to `to`, copying when a rename crosses filesystems
async fn place_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::try_exists(to).await.unwrap_or(false) {
        warn!("Overwriting existing {}", to.display());
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| HarvestError::storage(parent, e))?;
    }

    match tokio::fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(e) => debug!("Rename to {} failed ({}), copying", to.display(), e),
    }

    copy_into_place(from, to).await?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| HarvestError::storage(from, e))
}

/// Copy next to `to` under a hidden name, then rename over it.
///
/// `to` is either untouched or complete; the partial copy is removed on error.
async fn copy_into_place(from: &Path, to: &Path) -> Result<()> {
    let name = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = to.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4()));

    let copied = match tokio::fs::copy(from, &partial).await {
        Ok(_) => tokio::fs::rename(&partial, to)
            .await
            .map_err(|e| HarvestError::storage(to, e)),
        Err(e) => Err(HarvestError::storage(&partial, e)),
    };

    if copied.is_err() {
        if let Err(e) = tokio::fs::remove_file(&partial).await {
            if e.kind() != IoErrorKind::NotFound {
                warn!("Could not remove {}: {}", partial.display(), e);
            }
        }
    }
    copied
}

async fn remove_run_dir(run_dir: &Path) {
    match tokio::fs::remove_dir_all(run_dir).await {
        Ok(()) => debug!("Removed {}", run_dir.display()),
        Err(e) if e.kind() == IoErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", run_dir.display(), e),
    }
}
