//! Recurring check of every configured course over the lookback window

use chrono::{Local, NaiveDate};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::acquisition::{AcquisitionEngine, AcquisitionOutcome};
use crate::config::{Config, CourseSchedule};
use crate::discovery::VideoSource;
use crate::pipeline::{CommandRunner, MediaProcessor, ToolInvocation};
use crate::schedule::{expected_count, is_scheduled, lookback_dates};
use crate::session::SessionProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Sleeping,
    Stopped,
}

/// Loop timing and the optional post-cycle hook
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub lookback_days: u32,
    pub interval: Duration,
    pub hook: Option<ToolInvocation>,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lookback_days: config.lookback_days,
            interval: Duration::from_secs(config.check_interval * 60),
            hook: config.post_download_script.as_deref().and_then(hook_invocation),
        }
    }
}

/// Split a hook command line on whitespace
pub fn hook_invocation(command_line: &str) -> Option<ToolInvocation> {
    let mut parts = command_line.split_whitespace();
    let program = parts.next()?;
    Some(ToolInvocation::new(program).args(parts))
}

/// One (course, day) result inside a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleEntry {
    pub course: String,
    pub date: NaiveDate,
    pub outcome: AcquisitionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub entries: Vec<CycleEntry>,
}

impl CycleReport {
    pub fn acquired_any(&self) -> bool {
        self.entries.iter().any(|e| e.outcome.success())
    }

    pub fn videos_acquired(&self) -> usize {
        self.entries.iter().map(|e| e.outcome.video_count()).sum()
    }

    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, AcquisitionOutcome::Failed(_)))
            .count()
    }
}

/// Time left to sleep once a cycle took `elapsed`
pub fn sleep_after(interval: Duration, elapsed: Duration) -> Duration {
    if elapsed > interval {
        warn!(
            "Cycle took {:.1}s, longer than the {}s interval",
            elapsed.as_secs_f64(),
            interval.as_secs()
        );
        return interval;
    }
    interval - elapsed
}

pub struct PollLoop<A, S, M, R> {
    engine: AcquisitionEngine<A, S, M>,
    runner: R,
    courses: BTreeMap<String, CourseSchedule>,
    settings: LoopSettings,
    state: LoopState,
}

impl<A, S, M, R> PollLoop<A, S, M, R>
where
    A: SessionProvider,
    S: VideoSource,
    M: MediaProcessor,
    R: CommandRunner,
{
    pub fn new(
        engine: AcquisitionEngine<A, S, M>,
        runner: R,
        courses: BTreeMap<String, CourseSchedule>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            engine,
            runner,
            courses,
            settings,
            state: LoopState::Stopped,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn engine(&self) -> &AcquisitionEngine<A, S, M> {
        &self.engine
    }

    /// Check every auto-download course for each day of the lookback window
    pub async fn run_cycle(&mut self, today: NaiveDate) -> CycleReport {
        self.state = LoopState::Running;
        let mut report = CycleReport::default();
        let days = lookback_dates(today, self.settings.lookback_days);

        for (name, course) in self.courses.iter().filter(|(_, c)| c.auto_download) {
            for &day in &days {
                if !is_scheduled(course, day) {
                    continue;
                }

                let required = expected_count(course, day);
                let outcome = match self.engine.acquire(course, day, required).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(
                            "❌ {} (course {}) on {}: {}",
                            name, course.course_id, day, e
                        );
                        AcquisitionOutcome::Failed(e.kind())
                    }
                };

                match outcome {
                    AcquisitionOutcome::Acquired { count } => {
                        info!("✅ {} on {}: {} video(s)", name, day, count)
                    }
                    AcquisitionOutcome::SkippedInsufficientVideos { found, required } => {
                        info!("⏭️  {} on {}: {}/{} video(s), waiting", name, day, found, required)
                    }
                    AcquisitionOutcome::Failed(_) => {}
                }

                report.entries.push(CycleEntry {
                    course: name.clone(),
                    date: day,
                    outcome,
                });
            }
        }

        if report.acquired_any() {
            if let Some(hook) = &self.settings.hook {
                info!("🔔 Running post-download hook: {}", hook);
                if let Err(e) = self.runner.run(hook).await {
                    error!("Post-download hook failed: {}", e);
                }
            }
        }

        report
    }

    /// Cycle until `shutdown` resolves; it is only observed while sleeping
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "👀 Watching {} course(s) every {} minute(s)",
            self.courses.len(),
            self.settings.interval.as_secs() / 60
        );

        loop {
            let started = Instant::now();
            let report = self.run_cycle(Local::now().date_naive()).await;
            info!(
                "Cycle finished: {} video(s) acquired, {} failure(s)",
                report.videos_acquired(),
                report.failures()
            );

            let pause = sleep_after(self.settings.interval, started.elapsed());
            self.state = LoopState::Sleeping;

            tokio::select! {
                _ = &mut shutdown => {
                    self.state = LoopState::Stopped;
                    info!("🛑 Stopping watcher");
                    return;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
