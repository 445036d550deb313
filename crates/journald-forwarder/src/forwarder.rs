// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline coordinator.
//!
//! [`Forwarder::start`] loads the checkpoint, wires the tailer, the publisher and the checkpoint
//! persister together and spawns them. The returned [`ForwarderHandle`] is the host's only way to
//! drive the pipeline: it stops it, drains the error channel and reports the state of each loop.

use crate::checkpoint::{Checkpoint, CheckpointPersister};
use crate::config::PipelineConfig;
use crate::constants::{CURSOR_CHANNEL_CAPACITY, ERROR_CHANNEL_CAPACITY, RECORD_CHANNEL_CAPACITY};
use crate::errors::{CheckpointError, ConfigError, ErrorReceiver, ErrorReporter, ForwarderError};
use crate::publisher::Publisher;
use crate::sink::Sink;
use crate::source::LogSource;
use crate::tailer::Tailer;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// State of one pipeline loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

impl LoopState {
    fn of(handle: &JoinHandle<()>) -> Self {
        if handle.is_finished() {
            LoopState::Stopped
        } else {
            LoopState::Running
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStatus {
    pub tailer: LoopState,
    pub publisher: LoopState,
    pub checkpoint: LoopState,
}

impl PipelineStatus {
    /// Whether every loop has exited.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        [self.tailer, self.publisher, self.checkpoint]
            .iter()
            .all(|state| *state == LoopState::Stopped)
    }
}

pub struct Forwarder<S, K> {
    config: PipelineConfig,
    source: S,
    sink: K,
}

impl<S, K> Forwarder<S, K>
where
    S: LogSource + 'static,
    K: Sink + 'static,
{
    pub fn new(config: PipelineConfig, source: S, sink: K) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            sink,
        })
    }

    /// Loads the checkpoint and spawns the three loops, resuming right after the stored cursor.
    pub async fn start(self) -> Result<ForwarderHandle, CheckpointError> {
        let checkpoint = Checkpoint::new(&self.config.cursor_path);
        let loader = checkpoint.clone();
        let stored = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| CheckpointError::Task(e.to_string()))??;
        let start_cursor = stored.clone().unwrap_or_default();

        let (records_tx, records_rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let (cursors_tx, cursors_rx) = mpsc::channel(CURSOR_CHANNEL_CAPACITY);
        let (reporter, errors) = ErrorReporter::channel(ERROR_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let persister = CheckpointPersister::new(checkpoint, stored)
            .with_flush_interval(self.config.cursor_flush)
            .with_retry_delay(self.config.retry_delay);
        let checkpoint = supervise(
            "checkpoint",
            persister.run(cursors_rx, reporter.clone(), cancel.clone()),
            reporter.clone(),
        );

        let publisher = Publisher::new(self.sink, self.config.publisher());
        let publisher = supervise(
            "publisher",
            publisher.run(records_rx, cursors_tx, reporter.clone(), cancel.clone()),
            reporter.clone(),
        );

        let mut tailer = Tailer::new(self.source, start_cursor.as_str())
            .with_poll_interval(self.config.wait_poll_interval);
        let tailer_reporter = reporter.clone();
        let tailer_cancel = cancel.clone();
        let tailer = supervise(
            "tailer",
            async move {
                let result = tailer.follow(records_tx, tailer_cancel).await;
                // Close errors are logged by the tailer; only the follow outcome is reported.
                let _ = tailer.close().await;
                if let Err(e) = result {
                    tailer_reporter.report(ForwarderError::Source(e));
                }
            },
            reporter,
        );

        info!(
            cursor = %start_cursor,
            path = %self.config.cursor_path.display(),
            "Forwarder started"
        );

        Ok(ForwarderHandle {
            cancel,
            errors,
            tailer,
            publisher,
            checkpoint,
        })
    }
}

/// Runs `task` on its own tokio task and reports a panic as a fatal error.
fn supervise<F>(name: &'static str, task: F, reporter: ErrorReporter) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = tokio::spawn(task).await {
            reporter.report(ForwarderError::Task(format!("{name} loop: {e}")));
        }
        debug!("{name} loop exited");
    })
}

#[derive(Debug)]
pub struct ForwarderHandle {
    cancel: CancellationToken,
    errors: ErrorReceiver,
    tailer: JoinHandle<()>,
    publisher: JoinHandle<()>,
    checkpoint: JoinHandle<()>,
}

impl ForwarderHandle {
    /// Signals every loop to stop at its next suspension point. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Stopping forwarder");
        }
        self.cancel.cancel();
    }

    /// Next reported error, `None` once every loop has exited and the channel is drained.
    pub async fn next_error(&mut self) -> Option<ForwarderError> {
        self.errors.recv().await
    }

    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            tailer: LoopState::of(&self.tailer),
            publisher: LoopState::of(&self.publisher),
            checkpoint: LoopState::of(&self.checkpoint),
        }
    }

    /// Waits for every loop to exit. Does not stop them; call [`ForwarderHandle::stop`] first.
    pub async fn wait(self) -> Result<(), ForwarderError> {
        let (tailer, publisher, checkpoint) =
            tokio::join!(self.tailer, self.publisher, self.checkpoint);
        for result in [tailer, publisher, checkpoint] {
            result.map_err(|e| ForwarderError::Task(e.to_string()))?;
        }
        debug!("Forwarder stopped");
        Ok(())
    }
}
