use anyhow::{bail, Context, Result};
use chrono::{Datelike, Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lecture_harvester::acquisition::{AcquisitionEngine, AcquisitionOutcome};
use lecture_harvester::config::{Config, CourseSchedule, DEFAULT_CONFIG_PATH};
use lecture_harvester::discovery::CanvasVideoClient;
use lecture_harvester::history::HistoryStore;
use lecture_harvester::pipeline::{
    InputRef, MediaProcessor, ProcessOptions, SystemRunner, VideoPipeline,
};
use lecture_harvester::session::SessionManager;
use lecture_harvester::watcher::{LoopSettings, PollLoop};

#[derive(Parser)]
#[command(name = "lecture-harvester")]
#[command(version, about = "Scheduled downloader for Canvas lecture recordings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download (if needed), merge and optionally transcribe videos into one file
    Process {
        /// URLs or local video files, in playback order
        #[arg(required = true)]
        inputs: Vec<String>,
        /// Output video path
        #[arg(short, long)]
        output: PathBuf,
        /// Working directory for intermediates
        #[arg(short, long)]
        tmp: Option<PathBuf>,
        #[arg(long)]
        transcribe: bool,
        /// Also write a plain-text transcript next to the output
        #[arg(long = "readable-subtitle")]
        readable_subtitle: bool,
        /// Vocabulary hint for the transcriber
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Fetch one course's recordings for a single day, ignoring history
    Fetch {
        /// Canvas course id
        course_id: String,
        /// jAccount username
        #[arg(short, long)]
        username: Option<String>,
        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// MM-DD, YY-MM-DD or YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<String>,
        /// Minimum number of recordings required
        #[arg(short, long, default_value_t = 1)]
        min: usize,
        /// Name used for the output file
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        transcribe: bool,
        #[arg(long = "readable-subtitle")]
        readable_subtitle: bool,
    },
    /// Poll every configured course on its schedule
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose {
        "lecture_harvester=debug"
    } else {
        "lecture_harvester=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Process {
            inputs,
            output,
            tmp,
            transcribe,
            readable_subtitle,
            prompt,
        } => {
            let inputs: Vec<InputRef> = inputs.iter().map(|raw| InputRef::parse(raw)).collect();
            let mut options = ProcessOptions {
                transcribe,
                readable_subtitles: readable_subtitle,
                ..ProcessOptions::default()
            };
            if let Some(prompt) = prompt {
                options.initial_prompt = prompt;
            }

            let work_dir = tmp.unwrap_or_else(|| config.tmp_dir.clone());
            let pipeline = VideoPipeline::new(config.tool_options(), work_dir);
            pipeline
                .process(&inputs, &output, &options)
                .await
                .with_context(|| format!("Processing into {} failed", output.display()))?;
        }

        Commands::Fetch {
            course_id,
            username,
            output,
            date,
            min,
            name,
            transcribe,
            readable_subtitle,
        } => {
            let today = Local::now().date_naive();
            let date = match date {
                Some(raw) => parse_date(&raw, today)?,
                None => today,
            };

            let mut course = CourseSchedule::new(course_id)
                .with_transcription(transcribe, readable_subtitle);
            course.name = name;

            let username = username.unwrap_or_else(|| config.username.clone());
            let password = resolve_password(&config.password)?;
            let sessions =
                SessionManager::with_http_solver(username, password, &config.captcha_solver_url);
            let pipeline = VideoPipeline::new(config.tool_options(), &config.tmp_dir);
            let output_dir = output.unwrap_or_else(|| config.video_dir.clone());
            let mut engine =
                AcquisitionEngine::new(sessions, CanvasVideoClient::new(), pipeline, output_dir);

            match engine.acquire(&course, date, min).await? {
                AcquisitionOutcome::Acquired { count } => {
                    info!("🎉 Acquired {} recording(s) for {}", count, date)
                }
                AcquisitionOutcome::SkippedInsufficientVideos { found, required } => {
                    warn!("Only {} of {} recording(s) available for {}", found, required, date)
                }
                AcquisitionOutcome::Failed(kind) => bail!("Acquisition failed: {}", kind),
            }
        }

        Commands::Watch => {
            config.validate()?;
            info!("{}", config.summary());
            if config.auto_courses().next().is_none() {
                warn!("No course has auto_download enabled, nothing will be fetched");
            }

            let history = HistoryStore::open(&config.data_dir).await?;
            info!("📚 {} recording(s) already in history", history.len());

            let password = resolve_password(&config.password)?;
            let sessions = SessionManager::with_http_solver(
                &config.username,
                password,
                &config.captcha_solver_url,
            );
            let pipeline = VideoPipeline::new(config.tool_options().quiet_whisper(), &config.tmp_dir);
            let engine =
                AcquisitionEngine::new(sessions, CanvasVideoClient::new(), pipeline, &config.video_dir)
                    .with_history(history);

            let mut poll_loop = PollLoop::new(
                engine,
                SystemRunner,
                config.courses.clone(),
                LoopSettings::from_config(&config),
            );
            poll_loop
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Cannot listen for interrupts: {}", e);
                        std::future::pending::<()>().await;
                    }
                })
                .await;
            info!("👋 Interrupted, exiting");
        }
    }

    Ok(())
}

/// Configured password, or one typed on the terminal without echo
fn resolve_password(configured: &str) -> Result<String> {
    if !configured.is_empty() {
        return Ok(configured.to_string());
    }
    rpassword::prompt_password("jAccount password: ").context("Failed to read password")
}

/// Accepts `MM-DD` (current year), `YY-MM-DD` and `YYYY-MM-DD`
fn parse_date(raw: &str, today: NaiveDate) -> Result<NaiveDate> {
    let raw = raw.trim();
    let parsed = match (raw.matches('-').count(), raw.find('-')) {
        (1, _) => NaiveDate::parse_from_str(&format!("{}-{}", today.year(), raw), "%Y-%m-%d"),
        (2, Some(2)) => NaiveDate::parse_from_str(raw, "%y-%m-%d"),
        (2, Some(4)) => NaiveDate::parse_from_str(raw, "%Y-%m-%d"),
        _ => bail!("Unrecognised date `{}`, expected MM-DD, YY-MM-DD or YYYY-MM-DD", raw),
    };

    parsed.with_context(|| format!("`{}` is not a valid date", raw))
}
