use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{HarvestError, Result};

/// File name of the history log inside the data directory
pub const HISTORY_FILE_NAME: &str = "history.txt";

/// Set of video ids that were already downloaded and processed.
///
/// Backed by an append-only log with one id per line. The in-memory set only
/// ever contains ids that have been written and synced to that log.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    seen: HashSet<String>,
}

impl HistoryStore {
    /// Open the history log in `data_dir`, creating it when missing
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(HISTORY_FILE_NAME);

        let seen = match fs::read_to_string(&path).await {
            Ok(content) => parse_log(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(data_dir)
                    .await
                    .map_err(|e| HarvestError::storage(data_dir, e))?;
                fs::File::create(&path)
                    .await
                    .map_err(|e| HarvestError::storage(&path, e))?;
                info!("📝 History file {} does not exist, created it", path.display());
                HashSet::new()
            }
            Err(e) => return Err(HarvestError::storage(&path, e)),
        };

        debug!("Loaded {} history entries from {}", seen.len(), path.display());
        Ok(Self { path, seen })
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.seen.contains(video_id)
    }

    /// Durably record `video_id`, then make it visible to `contains`
    pub async fn add(&mut self, video_id: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| HarvestError::storage(&self.path, e))?;

        let line = format!("{}\n", video_id);
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| HarvestError::storage(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| HarvestError::storage(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| HarvestError::storage(&self.path, e))?;

        self.seen.insert(video_id.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_log(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
