//! Lecture video discovery through the Canvas LTI video platform

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::cookie::Jar;
use reqwest::header::LOCATION;
use reqwest::{redirect, Client};
use regex::Regex;
use scraper::{Html, Selector};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::string_or_integer;
use crate::error::{HarvestError, Result};
use crate::session::SessionHandle;

const LTI_LAUNCH_URL: &str = "https://courses.sjtu.edu.cn/lti/launch";
const VIDEO_LIST_URL: &str = "https://courses.sjtu.edu.cn/lti/vodVideo/findVodVideoList";
const VIDEO_INFO_URL: &str = "https://courses.sjtu.edu.cn/lti/vodVideo/getVodVideoInfos";
const EXTERNAL_TOOL_ID: u32 = 162;
const PAGE_SIZE: &str = "1000";
const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A video as returned by the course listing, before any detail lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoListing {
    pub video_id: String,
    pub start_time: NaiveDateTime,
}

impl VideoListing {
    pub fn new(video_id: impl Into<String>, start_time: NaiveDateTime) -> Self {
        Self {
            video_id: video_id.into(),
            start_time,
        }
    }

    /// Calendar date the recording started on
    pub fn date(&self) -> NaiveDate {
        self.start_time.date()
    }
}

/// A listing enriched with the details needed to download it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDescriptor {
    pub video_id: String,
    pub start_time: NaiveDateTime,
    pub playable_url: String,
    pub subject_name: String,
}

/// Source of lecture videos for a course
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Course-scoped state produced by `open_course`
    type Scope: Send + Sync;

    /// Exchange the portal session for a course-scoped one
    async fn open_course(&self, course_id: &str, session: &SessionHandle) -> Result<Self::Scope>;

    /// Every video known for the course, oldest first
    async fn list_videos(&self, scope: &Self::Scope) -> Result<Vec<VideoListing>>;

    /// Look up the stream details of one listed video
    async fn resolve(&self, scope: &Self::Scope, listing: &VideoListing) -> Result<VideoDescriptor>;
}

/// Sub-session on the video platform for a single course
#[derive(Clone)]
pub struct CourseScope {
    canvas_course_id: String,
    client: Client,
}

impl CourseScope {
    pub fn canvas_course_id(&self) -> &str {
        &self.canvas_course_id
    }
}

/// Discovery client for the Canvas lecture video platform
#[derive(Debug, Clone, Default)]
pub struct CanvasVideoClient;

impl CanvasVideoClient {
    pub fn new() -> Self {
        Self
    }

    async fn post_json<T: DeserializeOwned>(
        scope: &CourseScope,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<T> {
        let response = scope
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| HarvestError::discovery(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(HarvestError::discovery(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| HarvestError::discovery(format!("reading {} failed: {}", url, e)))?;
        serde_json::from_str(&text)
            .map_err(|e| HarvestError::discovery(format!("unexpected response from {}: {}", url, e)))
    }
}

#[async_trait]
impl VideoSource for CanvasVideoClient {
    type Scope = CourseScope;

    async fn open_course(&self, course_id: &str, session: &SessionHandle) -> Result<CourseScope> {
        let tool_url = format!(
            "https://oc.sjtu.edu.cn/courses/{}/external_tools/{}",
            course_id, EXTERNAL_TOOL_ID
        );

        let response = session
            .client()
            .get(&tool_url)
            .send()
            .await
            .map_err(|e| HarvestError::discovery(format!("loading {} failed: {}", tool_url, e)))?;
        if !response.status().is_success() {
            return Err(HarvestError::discovery(format!(
                "{} returned {}",
                tool_url,
                response.status()
            )));
        }
        let page = response
            .text()
            .await
            .map_err(|e| HarvestError::discovery(format!("reading {} failed: {}", tool_url, e)))?;
        let launch_form = extract_launch_form(&page)?;

        // The launch is single-use: its cookies become the course sub-session
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .redirect(redirect::Policy::none())
            .build()?;

        let response = client
            .post(LTI_LAUNCH_URL)
            .form(&launch_form)
            .send()
            .await
            .map_err(|e| HarvestError::discovery(format!("LTI launch failed: {}", e)))?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| HarvestError::discovery("LTI launch did not redirect"))?;
        let canvas_course_id = canvas_course_id_from_location(location)?;

        debug!("Course {} maps to platform course {}", course_id, canvas_course_id);
        Ok(CourseScope {
            canvas_course_id,
            client,
        })
    }

    async fn list_videos(&self, scope: &CourseScope) -> Result<Vec<VideoListing>> {
        let envelope: Envelope<ListBody> = Self::post_json(
            scope,
            VIDEO_LIST_URL,
            &[
                ("pageIndex", "1"),
                ("pageSize", PAGE_SIZE),
                ("canvasCourseId", scope.canvas_course_id.as_str()),
            ],
        )
        .await?;

        let listings = envelope
            .body
            .list
            .into_iter()
            .map(RawListing::into_listing)
            .collect::<Result<Vec<_>>>()?;

        info!(
            "🔍 Found {} videos for platform course {}",
            listings.len(),
            scope.canvas_course_id
        );
        Ok(order_oldest_first(listings))
    }

    async fn resolve(&self, scope: &CourseScope, listing: &VideoListing) -> Result<VideoDescriptor> {
        let envelope: Envelope<RawDetail> = Self::post_json(
            scope,
            VIDEO_INFO_URL,
            &[
                ("playTypeHls", "true"),
                ("id", listing.video_id.as_str()),
                ("isAudit", "true"),
            ],
        )
        .await?;

        Ok(envelope.body.into_descriptor(listing))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    body: T,
}

#[derive(Debug, Deserialize)]
struct ListBody {
    list: Vec<RawListing>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListing {
    #[serde(deserialize_with = "string_or_integer")]
    video_id: String,
    course_begin_time: String,
}

impl RawListing {
    fn into_listing(self) -> Result<VideoListing> {
        let start_time = NaiveDateTime::parse_from_str(&self.course_begin_time, START_TIME_FORMAT)
            .map_err(|e| {
                HarvestError::discovery(format!(
                    "video {} has malformed start time `{}`: {}",
                    self.video_id, self.course_begin_time, e
                ))
            })?;
        Ok(VideoListing::new(self.video_id, start_time))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDetail {
    rtmp_url_hdv: String,
    subj_name: String,
}

impl RawDetail {
    fn into_descriptor(self, listing: &VideoListing) -> VideoDescriptor {
        VideoDescriptor {
            video_id: listing.video_id.clone(),
            start_time: listing.start_time,
            playable_url: self.rtmp_url_hdv,
            subject_name: self.subj_name,
        }
    }
}

/// The service lists newest first; downstream date bucketing expects the opposite
pub fn order_oldest_first(mut listings: Vec<VideoListing>) -> Vec<VideoListing> {
    listings.reverse();
    listings.sort_by_key(|listing| listing.start_time);
    listings
}

/// Collect the inputs of the LTI launch form on the external tool page
fn extract_launch_form(html: &str) -> Result<Vec<(String, String)>> {
    let document = Html::parse_document(html);
    let form_selector = Selector::parse(&format!(r#"form[action="{}"]"#, LTI_LAUNCH_URL))
        .map_err(|e| HarvestError::discovery(format!("invalid selector: {:?}", e)))?;
    let input_selector = Selector::parse("input")
        .map_err(|e| HarvestError::discovery(format!("invalid selector: {:?}", e)))?;

    let form = document
        .select(&form_selector)
        .next()
        .ok_or_else(|| HarvestError::discovery("LTI launch form not found"))?;

    Ok(form
        .select(&input_selector)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect())
}

/// Platform course handle carried in the launch redirect
fn canvas_course_id_from_location(location: &str) -> Result<String> {
    let pattern = Regex::new(r"[?&]canvasCourseId=([^&#]+)")
        .map_err(|e| HarvestError::discovery(format!("invalid pattern: {}", e)))?;

    pattern
        .captures(location)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
        .ok_or_else(|| {
            HarvestError::discovery(format!(
                "LTI launch redirected to unexpected location `{}`",
                location
            ))
        })
}
