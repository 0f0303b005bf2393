#![forbid(unsafe_code)]

//! Stream relay: pipes one rendition from the collaborator to the HTTP client
//! as an attachment.
//!
//! A relay moves through `Idle -> Opening -> Streaming -> Completed | Aborted`
//! and never goes back. Once the first byte has been handed to the HTTP layer
//! the status line is gone, so an upstream failure can only abort the body.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use axum::{
    body::Body,
    http::{HeaderValue, header},
    response::Response,
};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult, StreamFailure};
use crate::extractor::{Extractor, MediaStream};
use crate::security::sanitize_attachment_name;

pub const PARAMS_REQUIRED: &str = "URL and itag are required";
pub const DOWNLOAD_FAILED: &str = "Failed to download video";

const OCTET_STREAM: &str = "application/octet-stream";

/// Query string of `GET /api/download`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayQuery {
    pub url: Option<String>,
    pub itag: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Idle,
    Opening,
    Streaming,
    Completed,
    Aborted,
}

impl RelayPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    fn can_advance_to(self, next: Self) -> bool {
        use RelayPhase::*;
        matches!(
            (self, next),
            (Idle, Opening)
                | (Opening, Streaming | Completed | Aborted)
                | (Streaming, Streaming | Completed | Aborted)
        )
    }
}

/// Wraps an upstream [`MediaStream`], counting bytes and tracking the relay
/// phase. Errors come out as [`StreamFailure`], which makes the HTTP body end
/// abnormally instead of cleanly.
pub struct RelayStream {
    upstream: MediaStream,
    phase: RelayPhase,
    bytes: u64,
    itag: String,
}

impl RelayStream {
    pub fn new(upstream: MediaStream, itag: impl Into<String>) -> Self {
        let mut relay = Self {
            upstream,
            phase: RelayPhase::Idle,
            bytes: 0,
            itag: itag.into(),
        };
        relay.advance(RelayPhase::Opening);
        relay
    }

    pub fn phase(&self) -> RelayPhase {
        self.phase
    }

    pub fn bytes_relayed(&self) -> u64 {
        self.bytes
    }

    fn advance(&mut self, next: RelayPhase) {
        if self.phase.can_advance_to(next) {
            self.phase = next;
        }
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, StreamFailure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.phase.is_terminal() {
            return Poll::Ready(None);
        }

        match this.upstream.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.advance(RelayPhase::Streaming);
                this.bytes += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(source))) => {
                this.advance(RelayPhase::Aborted);
                warn!(itag = %this.itag, bytes = this.bytes, error = %source, "relay aborted");
                Poll::Ready(Some(Err(StreamFailure {
                    bytes: this.bytes,
                    source,
                })))
            }
            Poll::Ready(None) => {
                this.advance(RelayPhase::Completed);
                info!(itag = %this.itag, bytes = this.bytes, "relay completed");
                Poll::Ready(None)
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Validates the query, opens the upstream stream and returns a response
/// whose body forwards bytes as they arrive.
///
/// The itag is passed through untouched; no attempt is made to check it
/// against the URL first.
pub async fn relay(extractor: &dyn Extractor, query: RelayQuery) -> ApiResult<Response> {
    let (Some(url), Some(itag)) = (
        non_blank(query.url.as_deref()),
        non_blank(query.itag.as_deref()),
    ) else {
        return Err(ApiError::validation(PARAMS_REQUIRED));
    };
    let filename = sanitize_attachment_name(query.filename.as_deref());

    debug!(url, itag, filename = %filename, "opening relay");
    let upstream = extractor
        .open_stream(url, itag)
        .await
        .map_err(|err| ApiError::upstream(DOWNLOAD_FAILED, err))?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .map_err(|err| ApiError::upstream(DOWNLOAD_FAILED, err.into()))?;
    let body = Body::from_stream(RelayStream::new(upstream, itag));

    Response::builder()
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_TYPE, OCTET_STREAM)
        .body(body)
        .map_err(|err| ApiError::upstream(DOWNLOAD_FAILED, err.into()))
}
