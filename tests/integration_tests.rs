use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use lecture_harvester::acquisition::{AcquisitionEngine, AcquisitionOutcome};
use lecture_harvester::config::CourseSchedule;
use lecture_harvester::discovery::{VideoDescriptor, VideoListing, VideoSource};
use lecture_harvester::error::{ErrorKind, HarvestError, Result};
use lecture_harvester::history::HistoryStore;
use lecture_harvester::pipeline::{
    CommandRunner, InputRef, MediaProcessor, ProcessOptions, ToolInvocation,
};
use lecture_harvester::session::{SessionHandle, SessionProvider};
use lecture_harvester::watcher::{hook_invocation, LoopSettings, LoopState, PollLoop};

struct FakeSessions;

#[async_trait]
impl SessionProvider for FakeSessions {
    async fn login(&self) -> Result<SessionHandle> {
        SessionHandle::fresh()
    }
}

/// Serves canned listings per course id and counts detail lookups
#[derive(Clone, Default)]
struct FakeSource {
    listings: HashMap<String, Vec<VideoListing>>,
    broken_courses: HashSet<String>,
    resolved: Arc<Mutex<Vec<String>>>,
}

impl FakeSource {
    fn with_course(mut self, course_id: &str, listings: Vec<VideoListing>) -> Self {
        self.listings.insert(course_id.to_string(), listings);
        self
    }

    fn with_broken_course(mut self, course_id: &str) -> Self {
        self.broken_courses.insert(course_id.to_string());
        self
    }
}

#[async_trait]
impl VideoSource for FakeSource {
    type Scope = String;

    async fn open_course(&self, course_id: &str, _session: &SessionHandle) -> Result<String> {
        if self.broken_courses.contains(course_id) {
            return Err(HarvestError::discovery("LTI launch did not redirect"));
        }
        Ok(course_id.to_string())
    }

    async fn list_videos(&self, scope: &String) -> Result<Vec<VideoListing>> {
        Ok(self.listings.get(scope).cloned().unwrap_or_default())
    }

    async fn resolve(&self, _scope: &String, listing: &VideoListing) -> Result<VideoDescriptor> {
        self.resolved.lock().unwrap().push(listing.video_id.clone());
        Ok(VideoDescriptor {
            video_id: listing.video_id.clone(),
            start_time: listing.start_time,
            playable_url: format!("https://cdn.example/{}.mp4", listing.video_id),
            subject_name: "数学分析".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
struct ProcessCall {
    inputs: Vec<InputRef>,
    output: PathBuf,
    options: ProcessOptions,
}

/// Writes a placeholder output unless told to fail
#[derive(Clone, Default)]
struct FakeProcessor {
    calls: Arc<Mutex<Vec<ProcessCall>>>,
    fail: bool,
}

#[async_trait]
impl MediaProcessor for FakeProcessor {
    async fn process(&self, inputs: &[InputRef], output: &Path, options: &ProcessOptions) -> Result<()> {
        self.calls.lock().unwrap().push(ProcessCall {
            inputs: inputs.to_vec(),
            output: output.to_path_buf(),
            options: options.clone(),
        });
        if self.fail {
            return Err(HarvestError::processing("ffmpeg", "exit status 1"));
        }
        tokio::fs::write(output, b"merged").await.unwrap();
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingRunner {
    runs: Arc<Mutex<Vec<ToolInvocation>>>,
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<()> {
        self.runs.lock().unwrap().push(invocation.clone());
        Ok(())
    }
}

fn at(date: &str, time: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H:%M:%S").unwrap()
}

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Mon/Wed/Fri lectures, two recordings each
fn calculus() -> CourseSchedule {
    CourseSchedule::new("58000")
        .with_quota(1, 2)
        .with_quota(3, 2)
        .with_quota(5, 2)
        .with_name("Calculus")
}

async fn engine_with_history(
    temp_dir: &TempDir,
    source: FakeSource,
    processor: FakeProcessor,
) -> AcquisitionEngine<FakeSessions, FakeSource, FakeProcessor> {
    let history = HistoryStore::open(&temp_dir.path().join("data")).await.unwrap();
    AcquisitionEngine::new(FakeSessions, source, processor, temp_dir.path().to_path_buf())
        .with_history(history)
}

#[tokio::test]
async fn test_insufficient_videos_are_deferred() {
    let temp_dir = TempDir::new().unwrap();
    let source = FakeSource::default()
        .with_course("58000", vec![VideoListing::new("v1", at("2024-03-04", "08:00:00"))]);
    let processor = FakeProcessor::default();
    let mut engine = engine_with_history(&temp_dir, source.clone(), processor.clone()).await;

    let outcome = engine.acquire(&calculus(), day("2024-03-04"), 2).await.unwrap();

    assert_eq!(
        outcome,
        AcquisitionOutcome::SkippedInsufficientVideos { found: 1, required: 2 }
    );
    assert!(processor.calls.lock().unwrap().is_empty());
    assert!(source.resolved.lock().unwrap().is_empty());
    assert!(engine.history().unwrap().is_empty());
}

#[tokio::test]
async fn test_acquire_processes_oldest_first_and_records_history() {
    let temp_dir = TempDir::new().unwrap();
    let source = FakeSource::default().with_course(
        "58000",
        vec![
            VideoListing::new("v-early", at("2024-03-04", "08:00:00")),
            VideoListing::new("v-late", at("2024-03-04", "09:55:00")),
            VideoListing::new("v-other-day", at("2024-03-06", "08:00:00")),
        ],
    );
    let processor = FakeProcessor::default();
    let mut engine = engine_with_history(&temp_dir, source.clone(), processor.clone()).await;

    let outcome = engine.acquire(&calculus(), day("2024-03-04"), 2).await.unwrap();

    assert_eq!(outcome, AcquisitionOutcome::Acquired { count: 2 });
    assert!(outcome.success());
    assert_eq!(outcome.video_count(), 2);

    let calls = processor.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].output, temp_dir.path().join("Calculus-03-04.mp4"));
    assert_eq!(
        calls[0].inputs,
        vec![
            InputRef::Remote("https://cdn.example/v-early.mp4".to_string()),
            InputRef::Remote("https://cdn.example/v-late.mp4".to_string()),
        ]
    );
    assert!(!calls[0].options.transcribe);

    // Only the videos of the requested day are resolved
    assert_eq!(*source.resolved.lock().unwrap(), vec!["v-early", "v-late"]);

    let history = engine.history().unwrap();
    assert!(history.contains("v-early"));
    assert!(history.contains("v-late"));
    assert!(!history.contains("v-other-day"));

    let log = std::fs::read_to_string(history.path()).unwrap();
    assert_eq!(log, "v-early\nv-late\n");
}

#[tokio::test]
async fn test_acquired_videos_are_not_processed_again() {
    let temp_dir = TempDir::new().unwrap();
    let source = FakeSource::default().with_course(
        "58000",
        vec![
            VideoListing::new("v1", at("2024-03-04", "08:00:00")),
            VideoListing::new("v2", at("2024-03-04", "10:00:00")),
        ],
    );
    let processor = FakeProcessor::default();
    let mut engine = engine_with_history(&temp_dir, source, processor.clone()).await;

    let first = engine.acquire(&calculus(), day("2024-03-04"), 2).await.unwrap();
    let second = engine.acquire(&calculus(), day("2024-03-04"), 2).await.unwrap();

    assert_eq!(first, AcquisitionOutcome::Acquired { count: 2 });
    assert_eq!(
        second,
        AcquisitionOutcome::SkippedInsufficientVideos { found: 0, required: 2 }
    );
    assert_eq!(processor.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_recorded_videos_are_filtered_before_quota_check() {
    let temp_dir = TempDir::new().unwrap();
    let mut history = HistoryStore::open(&temp_dir.path().join("data")).await.unwrap();
    history.add("v2").await.unwrap();

    let source = FakeSource::default().with_course(
        "58000",
        vec![
            VideoListing::new("v1", at("2024-03-04", "08:00:00")),
            VideoListing::new("v2", at("2024-03-04", "09:00:00")),
            VideoListing::new("v3", at("2024-03-04", "10:00:00")),
        ],
    );
    let processor = FakeProcessor::default();
    let mut engine = AcquisitionEngine::new(
        FakeSessions,
        source.clone(),
        processor.clone(),
        temp_dir.path().to_path_buf(),
    )
    .with_history(history);

    let outcome = engine.acquire(&calculus(), day("2024-03-04"), 2).await.unwrap();

    assert_eq!(outcome, AcquisitionOutcome::Acquired { count: 2 });

    let calls = processor.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].inputs,
        vec![
            InputRef::Remote("https://cdn.example/v1.mp4".to_string()),
            InputRef::Remote("https://cdn.example/v3.mp4".to_string()),
        ]
    );
    assert_eq!(*source.resolved.lock().unwrap(), vec!["v1", "v3"]);

    let log = std::fs::read_to_string(engine.history().unwrap().path()).unwrap();
    assert_eq!(log, "v2\nv1\nv3\n");
}

#[tokio::test]
async fn test_history_survives_engine_restart() {
    let temp_dir = TempDir::new().unwrap();
    let listings = vec![VideoListing::new("v1", at("2024-03-04", "08:00:00"))];
    let source = FakeSource::default().with_course("58000", listings);

    let mut engine =
        engine_with_history(&temp_dir, source.clone(), FakeProcessor::default()).await;
    engine.acquire(&calculus(), day("2024-03-04"), 1).await.unwrap();
    drop(engine);

    let processor = FakeProcessor::default();
    let mut restarted = engine_with_history(&temp_dir, source, processor.clone()).await;
    let outcome = restarted.acquire(&calculus(), day("2024-03-04"), 1).await.unwrap();

    assert_eq!(
        outcome,
        AcquisitionOutcome::SkippedInsufficientVideos { found: 0, required: 1 }
    );
    assert!(processor.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_processing_failure_leaves_history_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let source = FakeSource::default()
        .with_course("58000", vec![VideoListing::new("v1", at("2024-03-04", "08:00:00"))]);
    let processor = FakeProcessor {
        fail: true,
        ..FakeProcessor::default()
    };
    let mut engine = engine_with_history(&temp_dir, source, processor).await;

    let err = engine.acquire(&calculus(), day("2024-03-04"), 1).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Processing);
    assert!(!engine.history().unwrap().contains("v1"));
}

#[tokio::test]
async fn test_subject_name_used_when_course_has_no_name() {
    let temp_dir = TempDir::new().unwrap();
    let source = FakeSource::default()
        .with_course("58000", vec![VideoListing::new("v1", at("2024-09-12", "14:00:00"))]);
    let processor = FakeProcessor::default();
    let mut engine = AcquisitionEngine::new(
        FakeSessions,
        source,
        processor.clone(),
        temp_dir.path().to_path_buf(),
    );

    let course = CourseSchedule::new("58000").with_transcription(true, true);
    engine.acquire(&course, day("2024-09-12"), 1).await.unwrap();

    let calls = processor.calls.lock().unwrap();
    assert_eq!(calls[0].output, temp_dir.path().join("数学分析-09-12.mp4"));
    assert!(calls[0].options.transcribe);
    assert!(calls[0].options.readable_subtitles);
}

#[tokio::test]
async fn test_zero_quota_with_nothing_new_is_a_skip() {
    let temp_dir = TempDir::new().unwrap();
    let source = FakeSource::default().with_course("58000", Vec::new());
    let processor = FakeProcessor::default();
    let mut engine = engine_with_history(&temp_dir, source, processor.clone()).await;

    let outcome = engine.acquire(&calculus(), day("2024-03-04"), 0).await.unwrap();

    assert_eq!(
        outcome,
        AcquisitionOutcome::SkippedInsufficientVideos { found: 0, required: 0 }
    );
    assert!(processor.calls.lock().unwrap().is_empty());
}

fn settings(hook: Option<&str>) -> LoopSettings {
    LoopSettings {
        lookback_days: 3,
        interval: Duration::from_secs(60),
        hook: hook.and_then(hook_invocation),
    }
}

#[tokio::test]
async fn test_cycle_isolates_failing_course() {
    let temp_dir = TempDir::new().unwrap();
    let source = FakeSource::default()
        .with_broken_course("13")
        .with_course(
            "58000",
            vec![
                VideoListing::new("v1", at("2024-03-04", "08:00:00")),
                VideoListing::new("v2", at("2024-03-04", "10:00:00")),
            ],
        );
    let processor = FakeProcessor::default();
    let engine = engine_with_history(&temp_dir, source, processor.clone()).await;

    let mut courses = BTreeMap::new();
    courses.insert(
        "Algebra".to_string(),
        CourseSchedule::new("13").with_quota(1, 1).with_name("Algebra"),
    );
    courses.insert("Calculus".to_string(), calculus());

    let runner = RecordingRunner::default();
    let mut poll_loop = PollLoop::new(engine, runner.clone(), courses, settings(Some("sync-videos --now")));

    // Wednesday: the window covers Wed, Tue and Mon
    let report = poll_loop.run_cycle(day("2024-03-06")).await;

    let outcomes: Vec<_> = report
        .entries
        .iter()
        .map(|e| (e.course.as_str(), e.date, e.outcome))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("Algebra", day("2024-03-04"), AcquisitionOutcome::Failed(ErrorKind::Discovery)),
            (
                "Calculus",
                day("2024-03-06"),
                AcquisitionOutcome::SkippedInsufficientVideos { found: 0, required: 2 }
            ),
            ("Calculus", day("2024-03-04"), AcquisitionOutcome::Acquired { count: 2 }),
        ]
    );
    assert_eq!(report.failures(), 1);
    assert_eq!(report.videos_acquired(), 2);
    assert_eq!(poll_loop.state(), LoopState::Running);

    let runs = runner.runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].program(), "sync-videos");
    assert_eq!(runs[0].arguments(), &["--now"]);
}

#[tokio::test]
async fn test_hook_not_run_without_acquisition() {
    let temp_dir = TempDir::new().unwrap();
    let source = FakeSource::default()
        .with_course("58000", vec![VideoListing::new("v1", at("2024-03-04", "08:00:00"))]);
    let engine = engine_with_history(&temp_dir, source, FakeProcessor::default()).await;

    let mut courses = BTreeMap::new();
    courses.insert("Calculus".to_string(), calculus());

    let runner = RecordingRunner::default();
    let mut poll_loop = PollLoop::new(engine, runner.clone(), courses, settings(Some("sync-videos")));

    let report = poll_loop.run_cycle(day("2024-03-06")).await;

    assert!(!report.acquired_any());
    assert!(runner.runs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_courses_are_not_polled() {
    let temp_dir = TempDir::new().unwrap();
    let source = FakeSource::default()
        .with_course("58000", vec![VideoListing::new("v1", at("2024-03-04", "08:00:00"))]);
    let processor = FakeProcessor::default();
    let engine = engine_with_history(&temp_dir, source, processor.clone()).await;

    let mut manual = calculus().with_quota(1, 1);
    manual.auto_download = false;
    let mut courses = BTreeMap::new();
    courses.insert("Calculus".to_string(), manual);

    let mut poll_loop = PollLoop::new(engine, RecordingRunner::default(), courses, settings(None));
    let report = poll_loop.run_cycle(day("2024-03-06")).await;

    assert!(report.entries.is_empty());
    assert!(processor.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    let engine =
        engine_with_history(&temp_dir, FakeSource::default(), FakeProcessor::default()).await;
    let mut poll_loop = PollLoop::new(
        engine,
        RecordingRunner::default(),
        BTreeMap::new(),
        settings(None),
    );

    poll_loop.run(async {}).await;

    assert_eq!(poll_loop.state(), LoopState::Stopped);
}
