#![forbid(unsafe_code)]

//! vidgrab: paste a video URL, pick one of a few formats, and get the media
//! streamed back as a download.
//!
//! The heavy lifting (turning a public video page into direct media URLs) is
//! delegated to `yt-dlp`; this crate validates input, ranks the returned
//! formats and relays bytes to the HTTP client.

pub mod api;
pub mod config;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod relay;
pub mod resolver;
pub mod security;
