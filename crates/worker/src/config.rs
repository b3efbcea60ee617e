use std::time::Duration;

use comfybot_comfyui::reconnect::ReconnectConfig;
use comfybot_comfyui::KeepAliveConfig;
use comfybot_jobs::JobConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Backend `host:port`, without scheme.
    pub comfy_host: String,
    /// Identifier shared by the event stream and every submission.
    pub client_id: String,
    pub job: JobConfig,
    pub reconnect: ReconnectConfig,
    pub keep_alive: KeepAliveConfig,
    /// How long to wait for the event stream before running jobs.
    pub connect_wait: Duration,
    pub log_format: LogFormat,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default          |
    /// |--------------------------|------------------|
    /// | `COMFY_HOST`             | `127.0.0.1:8188` |
    /// | `COMFY_CLIENT_ID`        | random UUID v4   |
    /// | `JOB_TIMEOUT_SECS`       | `900` (`0` = no limit) |
    /// | `PROGRESS_INTERVAL_MS`   | `500`            |
    /// | `RECONNECT_INITIAL_SECS` | `5`              |
    /// | `RECONNECT_MAX_SECS`     | `60`             |
    /// | `WS_PING_INTERVAL_SECS`  | `30`             |
    /// | `WS_PING_TIMEOUT_SECS`   | `10`             |
    /// | `CONNECT_WAIT_SECS`      | `30`             |
    /// | `LOG_FORMAT`             | `text` (`text` or `json`) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let comfy_host = get("COMFY_HOST").unwrap_or_else(|| "127.0.0.1:8188".into());
        let client_id = get("COMFY_CLIENT_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let timeout_secs = parse_u64(&get, "JOB_TIMEOUT_SECS", 900)?;
        let job = JobConfig {
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            progress_interval: Duration::from_millis(parse_u64(&get, "PROGRESS_INTERVAL_MS", 500)?),
        };

        let reconnect = ReconnectConfig {
            initial_delay: Duration::from_secs(parse_u64(&get, "RECONNECT_INITIAL_SECS", 5)?),
            max_delay: Duration::from_secs(parse_u64(&get, "RECONNECT_MAX_SECS", 60)?),
            ..ReconnectConfig::default()
        };

        let keep_alive = KeepAliveConfig {
            ping_interval: Duration::from_secs(parse_u64(&get, "WS_PING_INTERVAL_SECS", 30)?),
            ping_timeout: Duration::from_secs(parse_u64(&get, "WS_PING_TIMEOUT_SECS", 10)?),
        };

        let connect_wait = Duration::from_secs(parse_u64(&get, "CONNECT_WAIT_SECS", 30)?);

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    expected: "`text` or `json`",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            comfy_host,
            client_id,
            job,
            reconnect,
            keep_alive,
            connect_wait,
            log_format,
        })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.comfy_host)
    }

    pub fn api_url(&self) -> String {
        format!("http://{}", self.comfy_host)
    }
}

fn parse_u64(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            expected: "a non-negative integer",
            value,
        }),
    }
}
