#![forbid(unsafe_code)]

//! Metadata & format resolver.
//!
//! Takes a pasted URL plus the media class the user wants, asks the
//! collaborator for the full metadata, and boils the format list down to at
//! most three ranked candidates.

use std::{borrow::Cow, cmp::Reverse};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::extractor::{Extractor, FormatRecord, VideoInfo};

pub const MAX_FORMATS: usize = 3;

pub const URL_REQUIRED: &str = "Video URL is required";
pub const URL_INVALID: &str = "Invalid video URL";
pub const FETCH_FAILED: &str = "Failed to fetch video information";

pub const BODY_INVALID: &str = "Request body must be a JSON object with url and format fields";

/// Body of `POST /api/download`. Fields are kept as raw JSON so that a missing
/// or oddly typed value turns into our own validation outcome rather than a
/// deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub url: Option<Value>,
    #[serde(default)]
    pub format: Option<Value>,
}

impl ResolveRequest {
    /// Strings pass through; `null` counts as missing. Any other JSON value is
    /// rendered as text and left to URL validation to refuse.
    pub fn url(&self) -> Option<Cow<'_, str>> {
        match self.url.as_ref()? {
            Value::Null => None,
            Value::String(url) => Some(Cow::Borrowed(url)),
            other => Some(Cow::Owned(other.to_string())),
        }
    }

    /// Only the exact strings `video` and `audio` name a class.
    pub fn class(&self) -> Option<FormatClass> {
        self.format
            .as_ref()
            .and_then(Value::as_str)
            .and_then(FormatClass::parse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    /// Renditions carrying both picture and sound.
    Video,
    /// Sound-only renditions.
    Audio,
}

impl FormatClass {
    /// Exact, case-sensitive match on `video` / `audio`. Anything else is not a
    /// class and yields an empty format list downstream.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }

    fn accepts(self, record: &FormatRecord) -> bool {
        match self {
            Self::Video => record.has_video && record.has_audio,
            Self::Audio => record.has_audio && !record.has_video,
        }
    }

    /// Higher is better; absent quality ranks as 0 and therefore last.
    fn rank(self, record: &FormatRecord) -> u32 {
        match self {
            Self::Video => record
                .quality_label
                .as_deref()
                .and_then(leading_number)
                .unwrap_or(0),
            Self::Audio => record.audio_bitrate.unwrap_or(0),
        }
    }
}

/// Reads the integer a resolution label starts with (`"720p60"` -> 720).
fn leading_number(label: &str) -> Option<u32> {
    let digits: String = label
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub title: String,
    pub author: String,
    /// Whole seconds, rendered as text.
    pub length_seconds: String,
    /// Rendered as text.
    pub view_count: String,
    pub thumbnail: String,
}

impl From<&VideoInfo> for VideoDetails {
    fn from(info: &VideoInfo) -> Self {
        Self {
            title: info.title.clone(),
            author: info.author.clone(),
            length_seconds: info.length_seconds.to_string(),
            view_count: info.view_count.to_string(),
            thumbnail: info.thumbnail.clone(),
        }
    }
}

/// Public shape of one downloadable rendition. The `url` is only valid for as
/// long as the upstream keeps it alive, typically minutes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatDescriptor {
    pub itag: String,
    pub quality: String,
    pub container: String,
    pub codecs: String,
    pub url: String,
}

impl From<&FormatRecord> for FormatDescriptor {
    fn from(record: &FormatRecord) -> Self {
        let quality = record
            .quality_label
            .clone()
            .or_else(|| record.audio_bitrate.map(|rate| format!("{rate}kbps")))
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            itag: record.itag.clone(),
            quality,
            container: record.container.clone(),
            codecs: record.codecs.clone(),
            url: record.url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedVideo {
    pub video_details: VideoDetails,
    pub formats: Vec<FormatDescriptor>,
}

/// Validates `url`, fetches fresh metadata and ranks the formats for `class`.
///
/// Nothing is cached: two calls for the same URL hit the collaborator twice.
pub async fn resolve(
    extractor: &dyn Extractor,
    url: Option<&str>,
    class: Option<FormatClass>,
) -> ApiResult<ResolvedVideo> {
    let url = url
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::validation(URL_REQUIRED))?;
    if !extractor.validate_url(url) {
        return Err(ApiError::validation(URL_INVALID));
    }

    let info = extractor
        .fetch_info(url)
        .await
        .map_err(|err| ApiError::upstream(FETCH_FAILED, err))?;

    let formats = select_formats(&info.formats, class);
    debug!(
        url,
        available = info.formats.len(),
        selected = formats.len(),
        "resolved formats"
    );

    Ok(ResolvedVideo {
        video_details: VideoDetails::from(&info),
        formats,
    })
}

/// Filters `records` down to `class`, ranks them best-first and keeps the top
/// [`MAX_FORMATS`]. Equal ranks keep upstream order.
pub fn select_formats(
    records: &[FormatRecord],
    class: Option<FormatClass>,
) -> Vec<FormatDescriptor> {
    let Some(class) = class else {
        return Vec::new();
    };
    let mut candidates: Vec<&FormatRecord> = records
        .iter()
        .filter(|record| class.accepts(record))
        .collect();
    candidates.sort_by_key(|record| Reverse(class.rank(record)));
    candidates
        .into_iter()
        .take(MAX_FORMATS)
        .map(FormatDescriptor::from)
        .collect()
}
