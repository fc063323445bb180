use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::CourseSchedule;
use crate::discovery::{VideoListing, VideoSource};
use crate::error::{ErrorKind, HarvestError, Result};
use crate::history::HistoryStore;
use crate::pipeline::{InputRef, MediaProcessor, ProcessOptions};
use crate::session::SessionProvider;

/// What happened to one (course, date) acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionOutcome {
    /// `count` videos were processed and recorded
    Acquired { count: usize },
    /// Fewer new videos than the quota; retried next cycle
    SkippedInsufficientVideos { found: usize, required: usize },
    Failed(ErrorKind),
}

impl AcquisitionOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Acquired { .. })
    }

    pub fn video_count(&self) -> usize {
        match self {
            Self::Acquired { count } => *count,
            _ => 0,
        }
    }
}

/// Ties session, discovery, processing and history together for one course-day
pub struct AcquisitionEngine<A, S, M> {
    sessions: A,
    source: S,
    processor: M,
    history: Option<HistoryStore>,
    output_dir: PathBuf,
}

impl<A, S, M> AcquisitionEngine<A, S, M>
where
    A: SessionProvider,
    S: VideoSource,
    M: MediaProcessor,
{
    /// Engine that does not consult or record history
    pub fn new(sessions: A, source: S, processor: M, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions,
            source,
            processor,
            history: None,
            output_dir: output_dir.into(),
        }
    }

    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    pub fn history(&self) -> Option<&HistoryStore> {
        self.history.as_ref()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Fetch and process every new recording of `course` dated `date`.
    ///
    /// Nothing is downloaded and history is untouched unless at least
    /// `min_count` unseen recordings exist for that day.
    pub async fn acquire(
        &mut self,
        course: &CourseSchedule,
        date: NaiveDate,
        min_count: usize,
    ) -> Result<AcquisitionOutcome> {
        let session = self.sessions.login().await?;
        let scope = self.source.open_course(&course.course_id, &session).await?;
        let listings = self.source.list_videos(&scope).await?;

        let pending: Vec<VideoListing> = listings
            .into_iter()
            .filter(|listing| listing.date() == date)
            .filter(|listing| !self.is_recorded(&listing.video_id))
            .collect();
        debug!(
            "Course {} on {}: {} unseen recording(s)",
            course.course_id,
            date,
            pending.len()
        );

        if pending.is_empty() || pending.len() < min_count {
            return Ok(AcquisitionOutcome::SkippedInsufficientVideos {
                found: pending.len(),
                required: min_count,
            });
        }

        let mut descriptors = Vec::with_capacity(pending.len());
        for listing in &pending {
            descriptors.push(self.source.resolve(&scope, listing).await?);
        }

        let display_name = match &course.name {
            Some(name) => name.clone(),
            None => descriptors
                .first()
                .map(|d| d.subject_name.clone())
                .ok_or_else(|| HarvestError::discovery("no subject name for course"))?,
        };
        let output = self.output_dir.join(output_file_name(&display_name, date));

        info!(
            "📥 Acquiring {} recording(s) of {} for {}",
            descriptors.len(),
            display_name,
            date
        );
        let inputs: Vec<InputRef> = descriptors
            .iter()
            .map(|d| InputRef::Remote(d.playable_url.clone()))
            .collect();
        self.processor
            .process(&inputs, &output, &ProcessOptions::from(course))
            .await?;

        if let Some(history) = self.history.as_mut() {
            for descriptor in &descriptors {
                history.add(&descriptor.video_id).await?;
            }
        }

        Ok(AcquisitionOutcome::Acquired {
            count: descriptors.len(),
        })
    }

    fn is_recorded(&self, video_id: &str) -> bool {
        self.history
            .as_ref()
            .is_some_and(|history| history.contains(video_id))
    }
}

/// `<name>-<MM-DD>.mp4`, with path separators in the name replaced
pub fn output_file_name(display_name: &str, date: NaiveDate) -> String {
    let name = display_name.trim().replace(['/', '\\'], "_");
    format!("{}-{}.mp4", name, date.format("%m-%d"))
}
