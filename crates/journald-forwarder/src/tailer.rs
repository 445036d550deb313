// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns a [`LogSource`] into a flat, ordered stream of records.
//!
//! The follow loop alternates between two states: while draining it reads every record that is
//! already available and hands each one downstream; once the source is caught up it waits for a
//! change notification, bounded by the poll interval so a stop request is observed promptly.

use crate::constants::DEFAULT_WAIT_POLL_INTERVAL;
use crate::errors::SourceError;
use crate::record::Record;
use crate::source::{LogSource, SourceEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowState {
    Draining,
    Waiting,
}

pub struct Tailer<S> {
    source: S,
    start_cursor: String,
    poll_interval: Duration,
}

impl<S: LogSource> Tailer<S> {
    /// `start_cursor` is where following resumes; empty means the source's default position.
    pub fn new(source: S, start_cursor: impl Into<String>) -> Self {
        Self {
            source,
            start_cursor: start_cursor.into(),
            poll_interval: DEFAULT_WAIT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Follows the source until `cancel` fires, the receiver goes away or the source fails.
    ///
    /// Records are sent in source order. A stop request or a dropped receiver ends the loop with
    /// `Ok(())`; any source error ends it with that error.
    pub async fn follow(
        &mut self,
        tx: mpsc::Sender<Record>,
        cancel: CancellationToken,
    ) -> Result<(), SourceError> {
        debug!(cursor = %self.start_cursor, "Tailer started");
        self.source.seek(&self.start_cursor).await?;

        let mut state = FollowState::Draining;
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match state {
                FollowState::Draining => match self.source.read_next().await? {
                    Some(record) => {
                        trace!(cursor = %record.cursor, "Read record");
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            sent = tx.send(record) => {
                                if sent.is_err() {
                                    debug!("Record receiver dropped, stopping tailer");
                                    break;
                                }
                            }
                        }
                    }
                    None => state = FollowState::Waiting,
                },
                FollowState::Waiting => {
                    let event = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        event = self.source.wait_for_change(self.poll_interval) => event?,
                    };
                    match event {
                        SourceEvent::Append | SourceEvent::Invalidate | SourceEvent::Timeout => {}
                        SourceEvent::Nop => trace!("Woken up without changes"),
                    }
                    state = FollowState::Draining;
                }
            }
        }

        debug!("Tailer stopped");
        Ok(())
    }

    /// Releases the source. Call once, after [`Tailer::follow`] has returned.
    pub async fn close(mut self) -> Result<(), SourceError> {
        if let Err(e) = self.source.close().await {
            warn!("Failed to close log source: {e}");
            return Err(e);
        }
        Ok(())
    }
}
