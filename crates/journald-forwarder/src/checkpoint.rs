// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable cursor checkpoint.
//!
//! The checkpoint file holds a single cursor token. It is replaced atomically: the new value is
//! written and synced to a temporary file in the same directory, which is then renamed over the
//! checkpoint path. A reader therefore sees either the previous cursor or the new one.

use crate::constants::{DEFAULT_CURSOR_FLUSH, RETRY_DELAY};
use crate::errors::{CheckpointError, ErrorReporter, ForwarderError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored cursor. A missing or blank file means no checkpoint yet.
    ///
    /// The parent directory is created when it does not exist, so the first store succeeds.
    pub fn load(&self) -> Result<Option<String>, CheckpointError> {
        let dir = self.dir();
        fs::create_dir_all(dir).map_err(|source| self.io_error(source))?;

        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let cursor = contents.trim();
                Ok((!cursor.is_empty()).then(|| cursor.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Atomically replaces the checkpoint with `cursor`.
    pub fn store(&self, cursor: &str) -> Result<(), CheckpointError> {
        let prefix = format!(
            ".{}",
            self.path
                .file_name()
                .map(|name| name.to_string_lossy())
                .unwrap_or_default()
        );
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(self.dir())
            .map_err(|source| self.io_error(source))?;

        file.write_all(cursor.as_bytes())
            .and_then(|()| file.as_file().sync_all())
            .map_err(|source| self.io_error(source))?;

        file.persist(&self.path)
            .map_err(|source| CheckpointError::Persist {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(())
    }

    /// [`Checkpoint::store`] on the blocking pool.
    pub async fn store_async(&self, cursor: String) -> Result<(), CheckpointError> {
        let checkpoint = self.clone();
        tokio::task::spawn_blocking(move || checkpoint.store(&cursor))
            .await
            .map_err(|e| CheckpointError::Task(e.to_string()))?
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

/// Loop keeping the checkpoint file in step with the latest acknowledged cursor.
pub struct CheckpointPersister {
    checkpoint: Checkpoint,
    flush_interval: Duration,
    retry_delay: Duration,
    written: Option<String>,
}

impl CheckpointPersister {
    /// `written` is the cursor already on disk, if any; it is not written again.
    pub fn new(checkpoint: Checkpoint, written: Option<String>) -> Self {
        Self {
            checkpoint,
            flush_interval: DEFAULT_CURSOR_FLUSH,
            retry_delay: RETRY_DELAY,
            written,
        }
    }

    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub async fn run(
        mut self,
        mut cursors: mpsc::Receiver<String>,
        reporter: ErrorReporter,
        cancel: CancellationToken,
    ) {
        debug!(path = %self.checkpoint.path().display(), "Checkpoint persister started");

        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing to write yet.
        ticker.tick().await;

        let mut latest: Option<String> = None;
        let mut attempt: u32 = 0;
        let mut receiving = true;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                cursor = cursors.recv(), if receiving => match cursor {
                    Some(cursor) => latest = Some(cursor),
                    None => receiving = false,
                },
                _ = ticker.tick() => {
                    let Some(cursor) = latest.as_ref() else { continue };
                    if self.written.as_ref() == Some(cursor) {
                        continue;
                    }

                    attempt += 1;
                    match self.checkpoint.store_async(cursor.clone()).await {
                        Ok(()) => {
                            debug!(cursor = %cursor, attempt, "Checkpoint written");
                            self.written = Some(cursor.clone());
                            attempt = 0;
                        }
                        Err(error) => {
                            reporter.report(ForwarderError::Checkpoint { attempt, error });
                            ticker.reset_after(self.retry_delay);
                        }
                    }
                }
            }
        }

        if latest.is_some() && latest != self.written {
            debug!(cursor = ?latest, "Checkpoint persister stopped with an unwritten cursor");
        } else {
            debug!("Checkpoint persister stopped");
        }
    }
}
