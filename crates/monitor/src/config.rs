use std::str::FromStr;
use std::time::Duration;

use opsdash_realtime::ReconnectConfig;

/// Monitor configuration loaded from environment variables.
///
/// Every field has a default suitable for local development against a
/// backend on `localhost:8000`.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Push connection endpoint.
    pub ws_url: String,
    /// Base URL of the REST API, without trailing slash.
    pub api_url: String,
    pub reconnect: ReconnectConfig,
    /// Bound on each push connection handshake.
    pub connect_timeout: Duration,
    /// Time between reconciliation polls.
    pub poll_interval: Duration,
    /// Jobs to track at startup, from comma-separated `TRACK_JOB_IDS`.
    pub track_job_ids: Vec<String>,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl MonitorConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                  | Default                                |
    /// |--------------------------|----------------------------------------|
    /// | `OPSDASH_WS_URL`         | `ws://localhost:8000/ws/notifications` |
    /// | `OPSDASH_API_URL`        | `http://localhost:8000/api`            |
    /// | `RECONNECT_MAX_ATTEMPTS` | `5`                                    |
    /// | `RECONNECT_INTERVAL_MS`  | `3000`                                 |
    /// | `RECONNECT_MULTIPLIER`   | `1.0`                                  |
    /// | `RECONNECT_MAX_DELAY_MS` | `30000`                                |
    /// | `RECONNECT_JITTER`       | `0.0`                                  |
    /// | `CONNECT_TIMEOUT_MS`     | `10000`                                |
    /// | `JOB_POLL_INTERVAL_SECS` | `30`                                   |
    /// | `TRACK_JOB_IDS`          | empty                                  |
    /// | `LOG_FORMAT`             | `text`                                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of
    /// a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ws_url = lookup("OPSDASH_WS_URL")
            .unwrap_or_else(|| "ws://localhost:8000/ws/notifications".into());

        let api_url = lookup("OPSDASH_API_URL")
            .unwrap_or_else(|| "http://localhost:8000/api".into())
            .trim_end_matches('/')
            .to_string();

        let max_attempts: u32 = parse_var(&lookup, "RECONNECT_MAX_ATTEMPTS", 5, "a positive integer")?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "RECONNECT_MAX_ATTEMPTS",
                value: "0".into(),
                expected: "a positive integer",
            });
        }

        let interval_ms: u64 = parse_var(&lookup, "RECONNECT_INTERVAL_MS", 3000, "milliseconds")?;
        let max_delay_ms: u64 = parse_var(&lookup, "RECONNECT_MAX_DELAY_MS", 30_000, "milliseconds")?;

        let multiplier: f64 = parse_var(&lookup, "RECONNECT_MULTIPLIER", 1.0, "a number >= 1.0")?;
        if !(multiplier >= 1.0 && multiplier.is_finite()) {
            return Err(ConfigError::Invalid {
                var: "RECONNECT_MULTIPLIER",
                value: multiplier.to_string(),
                expected: "a number >= 1.0",
            });
        }

        let jitter: f64 = parse_var(&lookup, "RECONNECT_JITTER", 0.0, "a fraction in 0.0..=1.0")?;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::Invalid {
                var: "RECONNECT_JITTER",
                value: jitter.to_string(),
                expected: "a fraction in 0.0..=1.0",
            });
        }

        let connect_timeout_ms: u64 =
            parse_var(&lookup, "CONNECT_TIMEOUT_MS", 10_000, "milliseconds")?;

        let poll_secs: u64 = parse_var(&lookup, "JOB_POLL_INTERVAL_SECS", 30, "seconds")?;

        let track_job_ids: Vec<String> = lookup("TRACK_JOB_IDS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                    expected: "`text` or `json`",
                })
            }
        };

        Ok(Self {
            ws_url,
            api_url,
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(interval_ms),
                max_delay: Duration::from_millis(max_delay_ms.max(interval_ms)),
                multiplier,
                max_attempts,
                jitter,
            },
            connect_timeout: Duration::from_millis(connect_timeout_ms.max(1)),
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            track_job_ids,
            log_format,
        })
    }
}

fn parse_var<F, T>(
    lookup: &F,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            value: raw,
            expected,
        }),
    }
}
