#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    net::IpAddr,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_VIDGRAB_PORT: u16 = 8080;
pub const DEFAULT_VIDGRAB_HOST: &str = "127.0.0.1";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";

/// Everything the server needs at startup.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: IpAddr,
    pub port: u16,
    /// Directory holding the presentation page. `None` disables static files.
    pub www_root: Option<PathBuf>,
    pub ytdlp_bin: PathBuf,
    pub cookies: Option<PathBuf>,
}

/// Values passed on the command line. They beat both the environment and the
/// `.env` file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub www_root: Option<PathBuf>,
    pub ytdlp_bin: Option<PathBuf>,
    pub cookies: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<ServerSettings> {
    resolve_settings_with(overrides, env_var_string)
}

fn resolve_settings_with(
    overrides: SettingsOverrides,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<ServerSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings(&file_vars, env_lookup, overrides)
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<ServerSettings> {
    let host_raw = non_blank(overrides.host)
        .or_else(|| lookup_value("VIDGRAB_HOST", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_VIDGRAB_HOST.to_string());
    let host = host_raw
        .parse::<IpAddr>()
        .with_context(|| format!("expected a valid IPv4 or IPv6 address, got {host_raw:?}"))?;
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("VIDGRAB_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_VIDGRAB_PORT);
    let www_root = overrides
        .www_root
        .or_else(|| lookup_value("VIDGRAB_WWW_ROOT", file_vars, &env_lookup).map(PathBuf::from));
    let ytdlp_bin = overrides
        .ytdlp_bin
        .or_else(|| lookup_value("VIDGRAB_YTDLP", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));
    let cookies = overrides
        .cookies
        .or_else(|| lookup_value("VIDGRAB_COOKIES", file_vars, &env_lookup).map(PathBuf::from));

    Ok(ServerSettings {
        host,
        port,
        www_root,
        ytdlp_bin,
        cookies,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_var_string(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| non_blank(file_vars.get(key).cloned()))
}

/// Parses a dotenv-style file. A missing file is not an error.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
