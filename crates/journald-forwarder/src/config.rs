// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    DEFAULT_CURSOR_FLUSH, DEFAULT_CURSOR_PATH, DEFAULT_FORWARD_FLUSH, DEFAULT_HTTP_BATCH_SIZE,
    DEFAULT_HTTP_TIMEOUT, DEFAULT_WAIT_POLL_INTERVAL, RETRY_DELAY,
};
use crate::errors::ConfigError;
use crate::publisher::PublisherConfig;
use crate::sink::HttpSinkConfig;
use crate::source::JournalctlConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Prefix of every environment variable read by [`ForwarderConfig::from_env`].
pub const ENV_PREFIX: &str = "JOURNALD_FORWARDER_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Stdout,
    Http,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stdout" => Ok(SinkKind::Stdout),
            "http" => Ok(SinkKind::Http),
            other => Err(format!("unknown sink '{other}', expected stdout or http")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub endpoint: Option<String>,
    pub tags: Option<String>,
    pub batch_size: usize,
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            tags: None,
            batch_size: DEFAULT_HTTP_BATCH_SIZE,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// Configuration of the forwarder process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Journal directory; the system journal when unset
    pub journal_path: Option<PathBuf>,
    /// Match expressions restricting the forwarded entries
    pub journal_matches: Vec<String>,
    pub journalctl_binary: PathBuf,
    /// Where the last acknowledged cursor is persisted
    pub cursor_path: PathBuf,
    pub cursor_flush: Duration,
    pub forward_flush: Duration,
    /// Delay before the first forced flush, `forward_flush` when unset
    pub forward_warmup: Option<Duration>,
    pub sink: SinkKind,
    pub http: HttpConfig,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            journal_path: None,
            journal_matches: Vec::new(),
            journalctl_binary: PathBuf::from("journalctl"),
            cursor_path: PathBuf::from(DEFAULT_CURSOR_PATH),
            cursor_flush: DEFAULT_CURSOR_FLUSH,
            forward_flush: DEFAULT_FORWARD_FLUSH,
            forward_warmup: None,
            sink: SinkKind::Stdout,
            http: HttpConfig::default(),
        }
    }
}

impl ForwarderConfig {
    /// Create configuration from `JOURNALD_FORWARDER_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`ForwarderConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let log_level = var("LOG_LEVEL")
            .map(|v| v.to_lowercase())
            .unwrap_or(defaults.log_level);
        let journal_path = var("JOURNAL_PATH").map(PathBuf::from);
        let journal_matches = var("JOURNAL_MATCHES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let journalctl_binary = var("JOURNALCTL")
            .map(PathBuf::from)
            .unwrap_or(defaults.journalctl_binary);
        let cursor_path = var("CURSOR_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.cursor_path);
        let cursor_flush = parse_var(var("CURSOR_FLUSH"), "CURSOR_FLUSH", parse_duration)?
            .unwrap_or(defaults.cursor_flush);
        let forward_flush = parse_var(var("FORWARD_FLUSH"), "FORWARD_FLUSH", parse_duration)?
            .unwrap_or(defaults.forward_flush);
        let forward_warmup = parse_var(var("FORWARD_WARMUP"), "FORWARD_WARMUP", parse_duration)?;
        let sink = parse_var(var("SINK"), "SINK", SinkKind::from_str)?.unwrap_or(defaults.sink);

        let http = HttpConfig {
            endpoint: var("HTTP_ENDPOINT"),
            tags: var("HTTP_TAGS"),
            batch_size: parse_var(var("HTTP_BATCH_SIZE"), "HTTP_BATCH_SIZE", |v| {
                v.parse::<usize>().map_err(|e| e.to_string())
            })?
            .unwrap_or(defaults.http.batch_size),
            timeout: parse_var(var("HTTP_TIMEOUT"), "HTTP_TIMEOUT", parse_duration)?
                .unwrap_or(defaults.http.timeout),
        };

        let config = Self {
            log_level,
            journal_path,
            journal_matches,
            journalctl_binary,
            cursor_path,
            cursor_flush,
            forward_flush,
            forward_warmup,
            sink,
            http,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        self.pipeline().validate()?;

        if self.sink == SinkKind::Http {
            if self.http.endpoint.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{ENV_PREFIX}HTTP_ENDPOINT is required by the http sink"
                )));
            }
            if self.http.batch_size == 0 {
                return Err(ConfigError::Invalid(
                    "HTTP batch size must be greater than 0".to_string(),
                ));
            }
            if self.http.timeout.is_zero() {
                return Err(ConfigError::Invalid(
                    "HTTP timeout must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            cursor_path: self.cursor_path.clone(),
            cursor_flush: self.cursor_flush,
            forward_flush: self.forward_flush,
            forward_warmup: self.forward_warmup,
            ..PipelineConfig::default()
        }
    }

    #[must_use]
    pub fn journalctl(&self) -> JournalctlConfig {
        JournalctlConfig {
            binary: self.journalctl_binary.clone(),
            directory: self.journal_path.clone(),
            matches: self.journal_matches.clone(),
        }
    }

    /// Settings of the HTTP sink, or `None` when another sink is selected.
    #[must_use]
    pub fn http_sink(&self) -> Option<HttpSinkConfig> {
        if self.sink != SinkKind::Http {
            return None;
        }
        let endpoint = self.http.endpoint.clone()?;
        Some(HttpSinkConfig {
            endpoint,
            tags: self.http.tags.clone(),
            batch_size: self.http.batch_size,
            timeout: self.http.timeout,
        })
    }
}

/// Timing and storage settings the pipeline loops run with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub cursor_path: PathBuf,
    pub cursor_flush: Duration,
    pub forward_flush: Duration,
    pub forward_warmup: Option<Duration>,
    pub retry_delay: Duration,
    pub wait_poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cursor_path: PathBuf::from(DEFAULT_CURSOR_PATH),
            cursor_flush: DEFAULT_CURSOR_FLUSH,
            forward_flush: DEFAULT_FORWARD_FLUSH,
            forward_warmup: None,
            retry_delay: RETRY_DELAY,
            wait_poll_interval: DEFAULT_WAIT_POLL_INTERVAL,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cursor_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("cursor path cannot be empty".to_string()));
        }

        let durations = [
            ("cursor flush interval", Some(self.cursor_flush)),
            ("forward flush interval", Some(self.forward_flush)),
            ("forward warm-up", self.forward_warmup),
            ("retry delay", Some(self.retry_delay)),
            ("wait poll interval", Some(self.wait_poll_interval)),
        ];
        for (name, duration) in durations {
            if duration.is_some_and(|d| d.is_zero()) {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn publisher(&self) -> PublisherConfig {
        PublisherConfig {
            flush_interval: self.forward_flush,
            warmup: self.forward_warmup,
            retry_delay: self.retry_delay,
        }
    }
}

/// Parses `<n>ms`, `<n>s`, `<n>m`, `<n>h`, or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| format!("'{value}' does not start with a number"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(amount.saturating_mul(3600))),
        other => Err(format!("unknown unit '{other}', expected ms, s, m or h")),
    }
}

fn parse_var<T, F>(value: Option<String>, key: &'static str, parse: F) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Result<T, String>,
{
    value
        .map(|v| {
            parse(&v).map_err(|reason| ConfigError::InvalidValue {
                key,
                value: v.clone(),
                reason,
            })
        })
        .transpose()
}
