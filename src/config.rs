use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::pipeline::ToolOptions;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/lecture-harvester/config.toml";

pub const DEFAULT_INITIAL_PROMPT: &str = "数学分析，极限，证明，闭集，开集。";

/// Configuration for the lecture harvester
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// jAccount username
    pub username: String,

    /// jAccount password
    pub password: String,

    /// Directory holding the download history
    pub data_dir: PathBuf,

    /// Scratch directory for downloads and intermediates
    pub tmp_dir: PathBuf,

    /// Directory the finished videos are written to
    pub video_dir: PathBuf,

    /// Number of trailing days checked on every cycle
    #[serde(alias = "skip_before")]
    pub lookback_days: u32,

    /// Minutes between two polling cycles
    pub check_interval: u64,

    /// Extra arguments for aria2c
    pub aria2c_args: Vec<String>,

    /// Extra arguments for whisper-ctranslate2
    pub whisper_args: Vec<String>,

    /// Command run after a cycle that acquired at least one video
    pub post_download_script: Option<String>,

    /// Endpoint of the captcha solving service
    pub captcha_solver_url: String,

    /// Monitored courses, keyed by display name
    #[serde(rename = "course")]
    pub courses: BTreeMap<String, CourseSchedule>,
}

/// One monitored course and how its recordings are processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSchedule {
    /// Canvas course identifier
    #[serde(deserialize_with = "string_or_integer")]
    pub course_id: String,

    /// Weekday (1 = Monday .. 7 = Sunday) to the number of recordings expected
    #[serde(
        default,
        alias = "course_table",
        deserialize_with = "deserialize_weekly_quota"
    )]
    pub weekly_quota: BTreeMap<u8, usize>,

    #[serde(default = "default_true")]
    pub auto_download: bool,

    #[serde(default)]
    pub transcribe: bool,

    /// Also write a plain-text transcript next to the video
    #[serde(default)]
    pub readable_subtitles: bool,

    /// Vocabulary hint handed to the transcriber
    #[serde(default = "default_initial_prompt", alias = "whisper_initial_prompt")]
    pub initial_prompt: String,

    /// Display name used for output files; filled from the table key on load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CourseSchedule {
    pub fn new(course_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            weekly_quota: BTreeMap::new(),
            auto_download: true,
            transcribe: false,
            readable_subtitles: false,
            initial_prompt: default_initial_prompt(),
            name: None,
        }
    }

    pub fn with_quota(mut self, weekday: u8, count: usize) -> Self {
        self.weekly_quota.insert(weekday, count);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_transcription(mut self, transcribe: bool, readable_subtitles: bool) -> Self {
        self.transcribe = transcribe;
        self.readable_subtitles = readable_subtitles;
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_initial_prompt() -> String {
    DEFAULT_INITIAL_PROMPT.to_string()
}

/// Accepts identifiers written either as strings or as bare integers
pub(crate) fn string_or_integer<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}

fn deserialize_weekly_quota<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<u8, usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, usize>::deserialize(deserializer)?;
    let mut quota = BTreeMap::new();
    for (key, count) in raw {
        let weekday: u8 = key
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid weekday `{}`", key)))?;
        if !(1..=7).contains(&weekday) {
            return Err(serde::de::Error::custom(format!(
                "weekday {} is outside 1..=7",
                weekday
            )));
        }
        quota.insert(weekday, count);
    }
    Ok(quota)
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults when it is missing
    pub fn load(path: &Path) -> Result<Self> {
        let path = expand_home(path);
        let mut config: Config = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let config = Self::from_toml(&content)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?;
                tracing::info!("📄 Loaded configuration from: {}", path.display());
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "Config file {} does not exist, using default values",
                    path.display()
                );
                Config::default()
            }
            Err(e) => {
                return Err(anyhow!("Failed to read config file {}: {}", path.display(), e));
            }
        };

        config.apply_env_overrides();
        config.prepare_directories()?;
        Ok(config)
    }

    /// Parse configuration text without touching the filesystem
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        for (name, course) in config.courses.iter_mut() {
            if course.name.is_none() {
                course.name = Some(name.clone());
            }
        }
        Ok(config)
    }

    /// Override credentials with environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(username) = std::env::var("LECTURE_HARVESTER_USERNAME") {
            self.username = username;
        }

        if let Ok(password) = std::env::var("LECTURE_HARVESTER_PASSWORD") {
            self.password = password;
        }
    }

    /// Expand `~` in all directories and create the ones that are missing
    pub fn prepare_directories(&mut self) -> Result<()> {
        for dir in [&mut self.data_dir, &mut self.tmp_dir, &mut self.video_dir] {
            *dir = expand_home(dir);
            if !dir.exists() {
                tracing::warn!("Directory {} does not exist, creating it", dir.display());
                std::fs::create_dir_all(&*dir)
                    .with_context(|| format!("Cannot create directory {}", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.check_interval == 0 {
            return Err(anyhow!("check_interval must be greater than 0"));
        }

        if self.lookback_days == 0 {
            return Err(anyhow!("lookback_days must be greater than 0"));
        }

        for (name, course) in &self.courses {
            if course.course_id.trim().is_empty() {
                return Err(anyhow!("course `{}` has an empty course_id", name));
            }
            if let Some(day) = course.weekly_quota.keys().find(|d| !(1..=7).contains(*d)) {
                return Err(anyhow!("course `{}` uses invalid weekday {}", name, day));
            }
        }

        Ok(())
    }

    /// Tool arguments for the processing pipeline
    pub fn tool_options(&self) -> ToolOptions {
        ToolOptions {
            aria2c_args: self.aria2c_args.clone(),
            whisper_args: self.whisper_args.clone(),
        }
    }

    /// Courses that take part in the polling loop, in name order
    pub fn auto_courses(&self) -> impl Iterator<Item = (&String, &CourseSchedule)> {
        self.courses.iter().filter(|(_, course)| course.auto_download)
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Lecture Harvester Configuration:\n\
            - Data Directory: {}\n\
            - Temporary Directory: {}\n\
            - Video Directory: {}\n\
            - Lookback: {} days\n\
            - Check Interval: {} minutes\n\
            - Courses: {}",
            self.data_dir.display(),
            self.tmp_dir.display(),
            self.video_dir.display(),
            self.lookback_days,
            self.check_interval,
            self.courses.keys().cloned().collect::<Vec<_>>().join(", ")
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            data_dir: PathBuf::from("~/.local/share/lecture-harvester"),
            tmp_dir: PathBuf::from("~/.cache/lecture-harvester"),
            video_dir: PathBuf::from("~/Videos/lecture-harvester"),
            lookback_days: 2,
            check_interval: 15,
            aria2c_args: [
                "-x", "16", "-s", "16", "-j", "16", "-k", "1M",
                "--summary-interval=0",
                "--download-result=hide",
                "--console-log-level=warn",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            whisper_args: ["--model", "large-v2", "--language", "Chinese", "--vad_filter", "True"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            post_download_script: None,
            captcha_solver_url: "https://plus.sjtu.edu.cn/captcha-solver/".to_string(),
            courses: BTreeMap::new(),
        }
    }
}

/// Replace a leading `~` with the user's home directory
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
