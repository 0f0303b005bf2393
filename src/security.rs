#![forbid(unsafe_code)]

//! Small guards shared by the server binary and the relay.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// File name used for relayed media when the caller does not provide one.
pub const FALLBACK_ATTACHMENT_NAME: &str = "video.mp4";

/// Fails fast when the server is started as root. The process spawns
/// `yt-dlp` for every request, so it has no business holding root rights.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; use a regular user or a dedicated service account");
    }
    Ok(())
}

/// Turns a caller-supplied download name into something that can sit inside
/// `Content-Disposition: attachment; filename="..."`.
///
/// The presentation layer already strips most characters, but the relay is
/// reachable directly, so quotes, backslashes, control characters and
/// non-ASCII text are replaced with `_`. Blank names fall back to
/// [`FALLBACK_ATTACHMENT_NAME`].
pub fn sanitize_attachment_name(filename: Option<&str>) -> String {
    let Some(raw) = filename.map(str::trim).filter(|name| !name.is_empty()) else {
        return FALLBACK_ATTACHMENT_NAME.to_string();
    };
    raw.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_control() || !c.is_ascii() => '_',
            c => c,
        })
        .collect()
}
