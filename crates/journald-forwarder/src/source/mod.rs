// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Contract of a cursor-addressable, continuously appended log source.

pub mod journalctl;

use crate::errors::SourceError;
use crate::record::Record;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of [`LogSource::wait_for_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    /// Woken up without anything new.
    Nop,
    /// New records were appended.
    Append,
    /// Underlying files were added, removed or rotated.
    Invalidate,
    /// Nothing happened before the timeout elapsed.
    Timeout,
}

#[async_trait]
pub trait LogSource: Send {
    /// Positions the source right after `cursor`. An empty cursor keeps the default start
    /// position.
    async fn seek(&mut self, cursor: &str) -> Result<(), SourceError>;

    /// Returns the next record, or `None` when caught up with the source. Must not block waiting
    /// for new data.
    async fn read_next(&mut self) -> Result<Option<Record>, SourceError>;

    /// Blocks until new data may be available or `timeout` elapses.
    async fn wait_for_change(&mut self, timeout: Duration) -> Result<SourceEvent, SourceError>;

    /// Releases the source. Called exactly once, after the tailer has stopped.
    async fn close(&mut self) -> Result<(), SourceError>;
}

pub use journalctl::{JournalctlConfig, JournalctlSource};
