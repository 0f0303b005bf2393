#![forbid(unsafe_code)]

//! HTTP server for vidgrab.
//!
//! Resolves pasted video URLs through `yt-dlp` and relays the chosen format
//! back to the browser. Every request stands alone: nothing is cached and no
//! state survives between calls.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
use vidgrab::{
    api::{AppState, router},
    config::{ServerSettings, SettingsOverrides, resolve_settings},
    extractor::YtDlp,
    logging::{self, LogFormat},
    security::ensure_not_root,
};

#[derive(Debug, Parser)]
#[command(name = "vidgrab", version, about = "Fetch video formats and relay downloads")]
struct ServerArgs {
    /// Address to listen on (overrides VIDGRAB_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides VIDGRAB_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Directory with the presentation page (overrides VIDGRAB_WWW_ROOT).
    #[arg(long)]
    www_root: Option<PathBuf>,

    /// Path to the yt-dlp executable (overrides VIDGRAB_YTDLP).
    #[arg(long = "yt-dlp", value_name = "PATH")]
    ytdlp: Option<PathBuf>,

    /// Netscape cookies file handed to yt-dlp (overrides VIDGRAB_COOKIES).
    #[arg(long)]
    cookies: Option<PathBuf>,

    /// Dotenv file to read settings from.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

impl ServerArgs {
    fn into_overrides(self) -> SettingsOverrides {
        SettingsOverrides {
            host: self.host,
            port: self.port,
            www_root: self.www_root,
            ytdlp_bin: self.ytdlp,
            cookies: self.cookies,
            env_path: self.env_file,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    logging::init(LogFormat::from_env())?;
    ensure_not_root("vidgrab")?;

    let settings = resolve_settings(args.into_overrides())?;
    let ServerSettings {
        host,
        port,
        www_root,
        ytdlp_bin,
        cookies,
    } = settings;

    let ytdlp = YtDlp::new(ytdlp_bin).with_cookies(cookies);
    match ytdlp.version().await {
        Ok(version) => info!(%version, "found yt-dlp"),
        Err(err) => warn!(error = %err, "yt-dlp is not usable; every request will fail"),
    }

    if let Some(root) = &www_root {
        info!(www_root = %root.display(), "serving presentation page");
    }
    let app = router(AppState::new(Arc::new(ytdlp), www_root));

    let addr = SocketAddr::new(host, port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}
