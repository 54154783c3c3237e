use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tms_core::stream_ipc::{ENGINEIO_VERSION, SOCKETIO_PATH};
use tms_core::ChannelProtocol;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_VIDEO_SOURCE: &str = "my.mp4";
pub const DEFAULT_LOG_DIR: &str = ".tms/logs";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_NOTIFICATION_MS: u64 = 5_000;
pub const DEFAULT_ALERT_MS: u64 = 3_000;
/// Upper bound for any configured duration (one day).
pub const MAX_DURATION_MS: u64 = 86_400_000;
const JSON_CHANNEL_PATH: &str = "/ws";

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "tms-dashboard", about = "Live traffic monitoring dashboard")]
pub struct Args {
    /// Base URL of the analysis server.
    #[arg(long, default_value = "")]
    pub server: String,
    /// Push channel URL; derived from the server URL when empty.
    #[arg(long, default_value = "")]
    pub channel_url: String,
    /// `socketio` or `json`.
    #[arg(long, default_value = "")]
    pub channel_protocol: String,
    /// Selectable video source; repeat to offer several.
    #[arg(long = "source")]
    pub sources: Vec<String>,
    #[arg(long, default_value = "")]
    pub config_path: String,
    /// Write the latest frame to this path.
    #[arg(long, default_value = "")]
    pub frame_out: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    /// Log display updates instead of drawing the terminal UI.
    #[arg(long)]
    pub headless: bool,
    /// Start the first video source as soon as the dashboard is up.
    #[arg(long)]
    pub autostart: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub server_url: Url,
    pub channel_url: Url,
    pub channel_protocol: ChannelProtocol,
    pub video_sources: Vec<String>,
    pub config_path: Option<String>,
    pub request_timeout: Duration,
    pub notification_duration: Duration,
    pub alert_duration: Duration,
    pub frame_out: Option<PathBuf>,
    pub log_dir: String,
    pub log_stdout: bool,
    pub headless: bool,
    pub autostart: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid url for {key}: '{value}' ({reason})")]
    InvalidUrl {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0}")]
    InvalidProtocol(String),
    #[error("invalid duration for {key}: '{value}' (expected milliseconds)")]
    InvalidDuration { key: &'static str, value: String },
}

pub fn load_config(args: Args) -> Result<Config, ConfigError> {
    load_config_with(args, |key| std::env::var(key).ok())
}

/// Resolves every setting as flag, then environment, then default.
pub fn load_config_with<F>(args: Args, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let server_raw = resolve_text(&args.server, &env, "TMS_SERVER_URL")
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
    let server_url = parse_url("TMS_SERVER_URL", &server_raw)?;

    let channel_protocol = match resolve_text(&args.channel_protocol, &env, "TMS_CHANNEL_PROTOCOL")
    {
        Some(value) => value
            .parse::<ChannelProtocol>()
            .map_err(ConfigError::InvalidProtocol)?,
        None => ChannelProtocol::default(),
    };

    let channel_url = match resolve_text(&args.channel_url, &env, "TMS_CHANNEL_URL") {
        Some(value) => parse_url("TMS_CHANNEL_URL", &value)?,
        None => derive_channel_url(&server_url, channel_protocol)?,
    };

    let headless = args.headless
        || env("TMS_HEADLESS")
            .and_then(|value| parse_bool_flag(&value))
            .unwrap_or(false);
    let log_stdout = env("TMS_LOG_STDOUT")
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(headless);

    Ok(Config {
        server_url,
        channel_url,
        channel_protocol,
        video_sources: resolve_sources(&args.sources, &env),
        config_path: resolve_text(&args.config_path, &env, "TMS_CONFIG_PATH"),
        request_timeout: resolve_millis(&env, "TMS_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?,
        notification_duration: resolve_millis(&env, "TMS_NOTIFICATION_MS", DEFAULT_NOTIFICATION_MS)?,
        alert_duration: resolve_millis(&env, "TMS_ALERT_MS", DEFAULT_ALERT_MS)?,
        frame_out: resolve_text(&args.frame_out, &env, "TMS_FRAME_OUT").map(PathBuf::from),
        log_dir: resolve_text(&args.log_dir, &env, "TMS_LOG_DIR")
            .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()),
        log_stdout,
        headless,
        autostart: args.autostart
            || env("TMS_AUTOSTART")
                .and_then(|value| parse_bool_flag(&value))
                .unwrap_or(false),
    })
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn derive_channel_url(server: &Url, protocol: ChannelProtocol) -> Result<Url, ConfigError> {
    let mut url = server.clone();
    let scheme = if server.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme).map_err(|_| ConfigError::InvalidUrl {
        key: "TMS_SERVER_URL",
        value: server.to_string(),
        reason: "cannot derive a websocket url".to_string(),
    })?;
    match protocol {
        ChannelProtocol::SocketIo => {
            url.set_path(SOCKETIO_PATH);
            url.set_query(Some(&format!("EIO={ENGINEIO_VERSION}&transport=websocket")));
        }
        ChannelProtocol::Json => {
            url.set_path(JSON_CHANNEL_PATH);
            url.set_query(None);
        }
    }
    Ok(url)
}

fn resolve_text<F>(flag: &str, env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    env(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_sources<F>(flags: &[String], env: &F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let from_flags: Vec<String> = flags
        .iter()
        .map(|source| source.trim().to_string())
        .filter(|source| !source.is_empty())
        .collect();
    if !from_flags.is_empty() {
        return from_flags;
    }
    let from_env: Vec<String> = env("TMS_VIDEO_SOURCES")
        .unwrap_or_default()
        .split(',')
        .map(|source| source.trim().to_string())
        .filter(|source| !source.is_empty())
        .collect();
    if !from_env.is_empty() {
        return from_env;
    }
    vec![DEFAULT_VIDEO_SOURCE.to_string()]
}

fn resolve_millis<F>(env: &F, key: &'static str, default_ms: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = env(key).filter(|value| !value.trim().is_empty()) else {
        return Ok(Duration::from_millis(default_ms));
    };
    value
        .trim()
        .parse::<u64>()
        .map(|ms| Duration::from_millis(ms.min(MAX_DURATION_MS)))
        .map_err(|_| ConfigError::InvalidDuration { key, value })
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|err| ConfigError::InvalidUrl {
        key,
        value: value.to_string(),
        reason: err.to_string(),
    })
}
