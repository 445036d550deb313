// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy of the forwarding pipeline.
//!
//! Source errors end the tailer. Sink and checkpoint errors are treated as transient: the loop
//! that hit them keeps retrying and reports every failed attempt through the [`ErrorReporter`].

use tokio::sync::mpsc;
use tracing::{error, warn};

/// Failures of a log source (seek, read, wait, close).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode entry: {0}")]
    Decode(String),

    #[error("failed to seek to cursor {cursor:?}: {reason}")]
    Seek { cursor: String, reason: String },

    #[error("source closed")]
    Closed,
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Decode(e.to_string())
    }
}

/// Failures of a sink while publishing a batch.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize records: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Returned by [`crate::sink::Sink::publish`] when a batch was not fully accepted.
///
/// `accepted` records, counted from the oldest, were durably taken by the sink before it failed.
#[derive(Debug, thiserror::Error)]
#[error("{source} ({accepted} records accepted)")]
pub struct PublishError {
    pub accepted: usize,
    #[source]
    pub source: SinkError,
}

impl PublishError {
    #[must_use]
    pub fn new(accepted: usize, source: impl Into<SinkError>) -> Self {
        Self {
            accepted,
            source: source.into(),
        }
    }
}

/// Failures while reading or atomically replacing the checkpoint file.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to replace checkpoint {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: tempfile::PersistError,
    },

    #[error("checkpoint task failed: {0}")]
    Task(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the pipeline reports to its host through the error channel.
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("tailer stopped: {0}")]
    Source(#[from] SourceError),

    #[error("publish attempt {attempt} failed: {error}")]
    Publish { attempt: u32, error: PublishError },

    #[error("checkpoint write attempt {attempt} failed: {error}")]
    Checkpoint { attempt: u32, error: CheckpointError },

    #[error("pipeline task failed: {0}")]
    Task(String),
}

impl ForwarderError {
    /// Fatal errors mean a loop has exited on its own. The host decides whether to restart.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ForwarderError::Source(_) | ForwarderError::Task(_))
    }
}

/// Cloneable sending half of the error channel.
///
/// Reporting never blocks the loop that failed. Non-fatal reports go through a bounded channel
/// and are dropped after being logged when the host is not draining it. Fatal reports use their
/// own lane, at most one per loop, so a backlog of retry reports never hides them.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<ForwarderError>,
    fatal: mpsc::UnboundedSender<ForwarderError>,
}

impl ErrorReporter {
    /// Creates a reporter and the receiving half the host drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, ErrorReceiver) {
        let (tx, errors) = mpsc::channel(capacity);
        let (fatal_tx, fatal) = mpsc::unbounded_channel();
        let reporter = Self {
            tx,
            fatal: fatal_tx,
        };
        (reporter, ErrorReceiver { errors, fatal })
    }

    pub fn report(&self, err: ForwarderError) {
        if err.is_fatal() {
            error!("{err}");
            // Only fails once the receiver is gone.
            let _ = self.fatal.send(err);
            return;
        }

        warn!("{err}");
        match self.tx.try_send(err) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Error channel full, dropping report");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Receiving half of the error channel. Pending fatal reports are delivered first.
#[derive(Debug)]
pub struct ErrorReceiver {
    errors: mpsc::Receiver<ForwarderError>,
    fatal: mpsc::UnboundedReceiver<ForwarderError>,
}

impl ErrorReceiver {
    /// Next report, `None` once every reporter is dropped and both lanes are drained.
    pub async fn recv(&mut self) -> Option<ForwarderError> {
        tokio::select! {
            biased;
            Some(err) = self.fatal.recv() => Some(err),
            Some(err) = self.errors.recv() => Some(err),
            else => None,
        }
    }

    pub fn try_recv(&mut self) -> Result<ForwarderError, mpsc::error::TryRecvError> {
        self.fatal.try_recv().or_else(|_| self.errors.try_recv())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_error(attempt: u32) -> ForwarderError {
        ForwarderError::Publish {
            attempt,
            error: PublishError::new(0, SinkError::Unavailable("down".into())),
        }
    }

    #[test]
    fn test_publish_error_display() {
        let error = PublishError::new(2, SinkError::Unavailable("unavailable".to_string()));
        assert_eq!(
            error.to_string(),
            "sink unavailable: unavailable (2 records accepted)"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ForwarderError::Source(SourceError::Closed).is_fatal());
        assert!(ForwarderError::Task("panicked".into()).is_fatal());
        assert!(!publish_error(1).is_fatal());
    }

    #[tokio::test]
    async fn test_reporter_drops_when_full() {
        let (reporter, mut rx) = ErrorReporter::channel(1);
        reporter.report(publish_error(1));
        reporter.report(publish_error(2));

        let first = rx.recv().await.expect("first report");
        assert!(matches!(first, ForwarderError::Publish { attempt: 1, .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fatal_report_survives_full_channel() {
        let (reporter, mut rx) = ErrorReporter::channel(2);
        for attempt in 1..=5 {
            reporter.report(publish_error(attempt));
        }
        reporter.report(ForwarderError::Source(SourceError::Closed));
        drop(reporter);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ForwarderError::Source(SourceError::Closed)));
        let mut attempts = Vec::new();
        while let Some(err) = rx.recv().await {
            match err {
                ForwarderError::Publish { attempt, .. } => attempts.push(attempt),
                other => panic!("unexpected report: {other}"),
            }
        }
        assert_eq!(attempts, vec![1, 2]);
    }

    #[test]
    fn test_reporter_ignores_closed_channel() {
        let (reporter, rx) = ErrorReporter::channel(1);
        drop(rx);
        reporter.report(ForwarderError::Source(SourceError::Closed));
    }
}
