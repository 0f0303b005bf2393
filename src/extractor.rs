#![forbid(unsafe_code)]

//! The extraction collaborator: something that turns a public video page into
//! metadata plus direct media streams.
//!
//! Everything above this module talks to the [`Extractor`] trait. The only
//! production implementation shells out to `yt-dlp`, reading
//! `--dump-single-json` output for metadata and `--output -` for media bytes.

use std::{io, path::PathBuf, process::Stdio};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    StreamExt, future,
    stream::{self, BoxStream},
};
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{ChildStderr, Command},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::Url;

/// Media bytes in arrival order. An `Err` item means the upstream broke.
pub type MediaStream = BoxStream<'static, io::Result<Bytes>>;

/// One rendition reported by the collaborator, before any filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatRecord {
    /// Opaque identifier understood by [`Extractor::open_stream`].
    pub itag: String,
    /// Resolution label such as `1080p` or `720p60`; only set for renditions
    /// with a picture.
    pub quality_label: Option<String>,
    /// Audio bitrate in kbps; only set for renditions with sound.
    pub audio_bitrate: Option<u32>,
    pub container: String,
    pub codecs: String,
    pub url: String,
    pub has_video: bool,
    pub has_audio: bool,
}

/// Metadata snapshot for one video. Fetched fresh on every request.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub title: String,
    pub author: String,
    pub length_seconds: u64,
    pub view_count: u64,
    pub thumbnail: String,
    pub formats: Vec<FormatRecord>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Platform-specific check that `url` points at something extractable.
    fn validate_url(&self, url: &str) -> bool;

    async fn fetch_info(&self, url: &str) -> Result<VideoInfo>;

    /// Starts streaming the rendition identified by `format_id`. The id is not
    /// checked up front; a stale or unknown id shows up as a stream error.
    async fn open_stream(&self, url: &str, format_id: &str) -> Result<MediaStream>;
}

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
];
const SHORT_LINK_HOSTS: &[&str] = &["youtu.be", "www.youtu.be"];

/// Extracts the 11-character video id from the URL shapes YouTube hands out
/// (`watch?v=`, `youtu.be/`, `/shorts/`, `/embed/`, `/v/`, `/live/`).
pub fn youtube_video_id(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    let mut segments = parsed.path_segments()?;

    let candidate = if SHORT_LINK_HOSTS.contains(&host.as_str()) {
        segments.next().map(str::to_string)
    } else if YOUTUBE_HOSTS.contains(&host.as_str()) {
        match segments.next() {
            Some("watch") => parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some("shorts" | "embed" | "v" | "live") => segments.next().map(str::to_string),
            _ => None,
        }
    } else {
        None
    }?;

    is_valid_video_id(&candidate).then_some(candidate)
}

fn is_valid_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// `yt-dlp` driven through its command line.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
    cookies: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cookies: None,
        }
    }

    /// Passes `--cookies` on every call when the file exists.
    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    /// Runs `yt-dlp --version`; used at startup to fail loudly on a missing
    /// install.
    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("launching {}", self.binary.display()))?;
        if !output.status.success() {
            bail!("{} --version exited with {}", self.binary.display(), output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.stdin(Stdio::null()).kill_on_drop(true);
        if let Some(cookies) = &self.cookies
            && cookies.exists()
        {
            command.arg("--cookies").arg(cookies);
        }
        command
    }
}

#[async_trait]
impl Extractor for YtDlp {
    fn validate_url(&self, url: &str) -> bool {
        youtube_video_id(url).is_some()
    }

    async fn fetch_info(&self, url: &str) -> Result<VideoInfo> {
        let output = self
            .command()
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg("--")
            .arg(url)
            .output()
            .await
            .with_context(|| format!("launching {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "metadata command failed for {url} ({}): {}",
                output.status,
                stderr.trim()
            );
        }

        parse_info(&output.stdout)
    }

    async fn open_stream(&self, url: &str, format_id: &str) -> Result<MediaStream> {
        let mut child = self
            .command()
            .arg("--quiet")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg("--no-part")
            .arg(format!("--format={format_id}"))
            .arg("--output")
            .arg("-")
            .arg("--")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("launching {}", self.binary.display()))?;
        debug!(url, format_id, pid = child.id(), "spawned yt-dlp stream");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("yt-dlp stdout was not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr));
        }

        // Once stdout closes, the exit status decides whether the stream ended
        // cleanly or must surface an error to the relay.
        let exit = stream::once(async move {
            match child.wait().await {
                Ok(status) if status.success() => None::<io::Result<Bytes>>,
                Ok(status) => Some(Err(io::Error::other(format!(
                    "yt-dlp exited with {status}"
                )))),
                Err(err) => Some(Err(err)),
            }
        })
        .filter_map(future::ready);

        Ok(ReaderStream::new(stdout).chain(exit).boxed())
    }
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if !line.is_empty() {
            warn!(target: "vidgrab::ytdlp", "{line}");
        }
    }
}

/// Subset of the `--dump-single-json` payload. Everything is optional because
/// the shape varies between sites and yt-dlp releases.
#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    fulltitle: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<RawThumbnail>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    height: Option<u32>,
    fps: Option<f64>,
    vcodec: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
    tbr: Option<f64>,
    url: Option<String>,
}

fn parse_info(raw: &[u8]) -> Result<VideoInfo> {
    let info: RawInfo = serde_json::from_slice(raw).context("deserializing yt-dlp metadata")?;

    let thumbnail = info
        .thumbnail
        .or_else(|| info.thumbnails.into_iter().find_map(|thumb| thumb.url))
        .unwrap_or_default();
    let length_seconds = info
        .duration
        .filter(|duration| duration.is_finite() && *duration > 0.0)
        .map(|duration| duration.round() as u64)
        .unwrap_or(0);

    Ok(VideoInfo {
        title: info.title.or(info.fulltitle).unwrap_or_default(),
        author: info.uploader.or(info.channel).unwrap_or_default(),
        length_seconds,
        view_count: info.view_count.unwrap_or(0),
        thumbnail,
        formats: info.formats.into_iter().filter_map(format_record).collect(),
    })
}

/// yt-dlp reports a missing track as the literal codec `"none"`.
fn present_codec(codec: Option<String>) -> Option<String> {
    codec.filter(|codec| {
        let codec = codec.trim();
        !codec.is_empty() && codec != "none"
    })
}

fn format_record(raw: RawFormat) -> Option<FormatRecord> {
    let itag = raw.format_id.filter(|id| !id.trim().is_empty())?;
    let vcodec = present_codec(raw.vcodec);
    let acodec = present_codec(raw.acodec);
    let has_video = vcodec.is_some();
    let has_audio = acodec.is_some();

    let quality_label = if has_video {
        raw.height.map(|height| match raw.fps {
            Some(fps) if fps > 30.0 => format!("{height}p{}", fps.round() as u32),
            _ => format!("{height}p"),
        })
    } else {
        None
    };
    let audio_bitrate = if has_audio {
        raw.abr
            .or(if has_video { None } else { raw.tbr })
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .map(|rate| rate.round() as u32)
    } else {
        None
    };
    let codecs = [vcodec, acodec]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");

    Some(FormatRecord {
        itag,
        quality_label,
        audio_bitrate,
        container: raw.ext.unwrap_or_default(),
        codecs,
        url: raw.url.unwrap_or_default(),
        has_video,
        has_audio,
    })
}
