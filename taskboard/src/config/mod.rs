//! Configuration for the `taskboard` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use taskboard_proto::api::API_PREFIX;

use crate::board::controller::BoardOptions;
use crate::board::history::DEFAULT_HISTORY_DEPTH;
use crate::notify::DEFAULT_NOTICE_TTL;
use crate::sync::http::DEFAULT_REQUEST_TIMEOUT;
use crate::sync::push::DEFAULT_KEEPALIVE;
use crate::sync::reconnect::ReconnectPolicy;

/// Path of the push endpoint below the API prefix.
const WS_PATH: &str = "/ws/ws";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value is present but not usable.
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    sync: SyncFileConfig,
    board: BoardFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_url: Option<String>,
    ws_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[sync]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    reconnect_base_ms: Option<u64>,
    reconnect_max_delay_secs: Option<u64>,
    reconnect_max_attempts: Option<u32>,
    keepalive_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[board]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BoardFileConfig {
    mode: Option<String>,
    data_dir: Option<PathBuf>,
    history_depth: Option<usize>,
    notice_ttl_ms: Option<u64>,
    local_user: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Where the board keeps its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ModeKind {
    /// Tasks saved on this machine.
    #[default]
    Local,
    /// Tasks on the task service.
    Remote,
}

impl FromStr for ModeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" | "networked" => Ok(Self::Remote),
            other => Err(format!("expected 'local' or 'remote', got '{other}'")),
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Service origin, e.g. `http://localhost:8000`.
    pub api_url: String,
    /// Push endpoint; derived from `api_url` when not set.
    pub ws_url: String,
    pub request_timeout: Duration,

    // -- Sync --
    pub reconnect: ReconnectPolicy,
    pub keepalive: Duration,
    /// Capacity of the link event channel.
    pub channel_capacity: usize,

    // -- Board --
    pub mode: ModeKind,
    /// Directory for saved tasks, theme and token.
    pub data_dir: PathBuf,
    pub history_depth: usize,
    pub notice_ttl: Duration,
    pub local_user: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let api_url = "http://localhost:8000".to_string();
        Self {
            ws_url: derive_ws_url(&api_url),
            api_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            keepalive: DEFAULT_KEEPALIVE,
            channel_capacity: 64,
            mode: ModeKind::Local,
            data_dir: default_data_dir(),
            history_depth: DEFAULT_HISTORY_DEPTH,
            notice_ttl: DEFAULT_NOTICE_TTL,
            local_user: "local".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// any config file fails to parse, or a value is unusable.
    pub fn load(cli: &GlobalArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &GlobalArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_url = cli
            .api_url
            .clone()
            .or_else(|| file.server.api_url.clone())
            .unwrap_or(defaults.api_url);
        let api_url = api_url.trim_end_matches('/').to_string();
        // An explicit ws_url wins; otherwise follow the API origin.
        let ws_url = cli
            .ws_url
            .clone()
            .or_else(|| file.server.ws_url.clone())
            .unwrap_or_else(|| derive_ws_url(&api_url));

        let mode = match (cli.mode, file.board.mode.as_deref()) {
            (Some(mode), _) => mode,
            (None, Some(raw)) => raw
                .parse()
                .map_err(|reason| ConfigError::Invalid { key: "board.mode", reason })?,
            (None, None) => defaults.mode,
        };

        let channel_capacity = file
            .sync
            .channel_capacity
            .unwrap_or(defaults.channel_capacity);
        if channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "sync.channel_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        let history_depth = file.board.history_depth.unwrap_or(defaults.history_depth);
        if history_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "board.history_depth",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            api_url,
            ws_url,
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            reconnect: ReconnectPolicy {
                base: file
                    .sync
                    .reconnect_base_ms
                    .map_or(defaults.reconnect.base, Duration::from_millis),
                max_delay: file
                    .sync
                    .reconnect_max_delay_secs
                    .map_or(defaults.reconnect.max_delay, Duration::from_secs),
                max_attempts: file
                    .sync
                    .reconnect_max_attempts
                    .unwrap_or(defaults.reconnect.max_attempts),
            },
            keepalive: file
                .sync
                .keepalive_secs
                .map_or(defaults.keepalive, Duration::from_secs),
            channel_capacity,
            mode,
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.board.data_dir.clone())
                .unwrap_or(defaults.data_dir),
            history_depth,
            notice_ttl: file
                .board
                .notice_ttl_ms
                .map_or(defaults.notice_ttl, Duration::from_millis),
            local_user: file
                .board
                .local_user
                .clone()
                .unwrap_or(defaults.local_user),
        })
    }

    /// Options for [`crate::board::Board::new`].
    #[must_use]
    pub fn board_options(&self) -> BoardOptions {
        BoardOptions {
            history_depth: self.history_depth,
            notice_ttl: self.notice_ttl,
            local_user: self.local_user.clone(),
        }
    }
}

/// Options shared by every subcommand.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// Path to config file (default: `~/.config/taskboard/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Task service origin, e.g. `http://localhost:8000`.
    #[arg(long, env = "TASKBOARD_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Push endpoint (default: derived from the API URL).
    #[arg(long, env = "TASKBOARD_WS_URL", global = true)]
    pub ws_url: Option<String>,

    /// Keep tasks locally or on the task service.
    #[arg(long, value_enum, env = "TASKBOARD_MODE", global = true)]
    pub mode: Option<ModeKind>,

    /// Directory for saved tasks and preferences.
    #[arg(long, env = "TASKBOARD_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn", env = "TASKBOARD_LOG", global = true)]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// `http://host` -> `ws://host/api/v1/ws/ws`, `https` -> `wss`.
fn derive_ws_url(api_url: &str) -> String {
    let origin = api_url.trim_end_matches('/');
    let origin = origin
        .strip_prefix("https://")
        .map(|rest| format!("wss://{rest}"))
        .or_else(|| origin.strip_prefix("http://").map(|rest| format!("ws://{rest}")))
        .unwrap_or_else(|| origin.to_string());
    format!("{origin}{API_PREFIX}{WS_PATH}")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from(".taskboard"), |d| d.join("taskboard"))
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// Otherwise the default path is tried and a missing file is empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("taskboard").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            tracing::debug!(path = %path.display(), "loaded config file");
            Ok(toml::from_str(&contents)?)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
