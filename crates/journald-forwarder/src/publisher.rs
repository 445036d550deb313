// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching and publish loop.
//!
//! The publisher is the only owner of the ring buffer. Records received from the tailer are
//! enqueued; the buffer is flushed to the sink when it reaches the sink's bulk size, and on every
//! tick of the flush timer whatever its fill level. A failed flush is retried after a fixed delay
//! until the sink accepts the batch or the loop is stopped. The cursor of the newest acknowledged
//! record is handed to the checkpoint persister after every successful flush.

use crate::constants::{DEFAULT_FORWARD_FLUSH, RETRY_DELAY};
use crate::errors::{ErrorReporter, ForwarderError};
use crate::record::Record;
use crate::ring::RingBuffer;
use crate::sink::Sink;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Period of the forced flush.
    pub flush_interval: Duration,
    /// Delay before the first forced flush. Defaults to `flush_interval`.
    pub warmup: Option<Duration>,
    pub retry_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FORWARD_FLUSH,
            warmup: None,
            retry_delay: RETRY_DELAY,
        }
    }
}

/// How a flush ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flush {
    Done,
    Cancelled,
}

pub struct Publisher<K> {
    sink: K,
    ring: RingBuffer<Record>,
    config: PublisherConfig,
}

impl<K: Sink> Publisher<K> {
    pub fn new(sink: K, config: PublisherConfig) -> Self {
        let ring = RingBuffer::new(sink.bulk_size());
        Self { sink, ring, config }
    }

    pub async fn run(
        mut self,
        mut records: mpsc::Receiver<Record>,
        cursors: mpsc::Sender<String>,
        reporter: ErrorReporter,
        cancel: CancellationToken,
    ) {
        let first_flush = self.config.warmup.unwrap_or(self.config.flush_interval);
        debug!(
            bulk_size = self.ring.capacity(),
            first_flush = ?first_flush,
            "Publisher started"
        );

        let timer = sleep(first_flush);
        tokio::pin!(timer);
        let mut receiving = true;

        loop {
            let flush = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = &mut timer => {
                    timer.as_mut().reset(Instant::now() + self.config.flush_interval);
                    if self.ring.is_empty() {
                        continue;
                    }
                    debug!(buffered = self.ring.len(), "Flush timer fired");
                    self.flush(&cursors, &reporter, &cancel).await
                }
                record = records.recv(), if receiving => {
                    let Some(record) = record else {
                        debug!("Record channel closed, draining buffer");
                        receiving = false;
                        continue;
                    };
                    if let Some(evicted) = self.ring.enqueue(record) {
                        warn!(cursor = %evicted.cursor, "Buffer full, dropped oldest record");
                    }
                    if !self.ring.is_full() {
                        continue;
                    }
                    self.flush(&cursors, &reporter, &cancel).await
                }
            };

            if flush == Flush::Cancelled {
                break;
            }
        }

        debug!(abandoned = self.ring.len(), "Publisher stopped");
    }

    /// Publishes the buffer until the sink accepts it, retrying after every failure.
    async fn flush(
        &mut self,
        cursors: &mpsc::Sender<String>,
        reporter: &ErrorReporter,
        cancel: &CancellationToken,
    ) -> Flush {
        let mut attempt: u32 = 0;
        let mut acknowledged: Option<String> = None;

        loop {
            // Everything was accepted by attempts that still reported an error.
            if self.ring.is_empty() {
                break;
            }

            attempt += 1;
            let mut batch = self.ring.iter();
            batch.reset();
            let result = self.sink.publish(&mut batch).await;

            let (accepted, error) = match result {
                Ok(accepted) => (accepted, None),
                Err(e) => (e.accepted, Some(e)),
            };
            let accepted = accepted.min(self.ring.len());
            for _ in 0..accepted {
                if let Some(record) = self.ring.dequeue() {
                    acknowledged = Some(record.cursor);
                }
            }

            let Some(error) = error else {
                debug!(accepted, attempt, remaining = self.ring.len(), "Flushed records");
                break;
            };

            reporter.report(ForwarderError::Publish { attempt, error });
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Flush::Cancelled,
                () = sleep(self.config.retry_delay) => {}
            }
        }

        if let Some(cursor) = acknowledged {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Flush::Cancelled,
                sent = cursors.send(cursor) => {
                    if sent.is_err() {
                        debug!("Cursor receiver dropped");
                    }
                }
            }
        }
        Flush::Done
    }
}
