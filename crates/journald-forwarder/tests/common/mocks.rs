// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory log source and recording sinks

use async_trait::async_trait;
use journald_forwarder::errors::{PublishError, SinkError, SourceError};
use journald_forwarder::ring;
use journald_forwarder::sink::Sink;
use journald_forwarder::source::{LogSource, SourceEvent};
use journald_forwarder::Record;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Shared, appendable journal backing one or more [`MemorySource`]s.
#[derive(Clone, Default)]
pub struct MemoryJournal {
    records: Arc<Mutex<Vec<Record>>>,
    appended: Arc<Notify>,
    closes: Arc<Mutex<usize>>,
}

impl MemoryJournal {
    /// Journal pre-filled with records `c1..=cN`.
    pub fn with_records(count: usize) -> Self {
        let journal = Self::default();
        journal.append(count);
        journal
    }

    /// Appends `count` records, continuing the cursor numbering.
    pub fn append(&self, count: usize) {
        {
            let mut records = self.records.lock().unwrap();
            let start = records.len();
            for i in start + 1..=start + count {
                records.push(
                    Record::new(cursor(i))
                        .with_realtime_timestamp(1_700_000_000_000_000 + i as u64)
                        .with_monotonic_timestamp(i as u64)
                        .with_field("MESSAGE", format!("message {i}"))
                        .with_field("PRIORITY", "6"),
                );
            }
        }
        self.appended.notify_waiters();
    }

    pub fn cursors(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.cursor.clone())
            .collect()
    }

    pub fn closes(&self) -> usize {
        *self.closes.lock().unwrap()
    }

    pub fn source(&self) -> MemorySource {
        MemorySource {
            journal: self.clone(),
            position: 0,
        }
    }
}

pub fn cursor(i: usize) -> String {
    format!("c{i}")
}

pub struct MemorySource {
    journal: MemoryJournal,
    position: usize,
}

#[async_trait]
impl LogSource for MemorySource {
    async fn seek(&mut self, cursor: &str) -> Result<(), SourceError> {
        if cursor.is_empty() {
            self.position = 0;
            return Ok(());
        }
        let records = self.journal.records.lock().unwrap();
        match records.iter().position(|r| r.cursor == cursor) {
            Some(index) => {
                self.position = index + 1;
                Ok(())
            }
            None => Err(SourceError::Seek {
                cursor: cursor.to_string(),
                reason: "unknown cursor".to_string(),
            }),
        }
    }

    async fn read_next(&mut self) -> Result<Option<Record>, SourceError> {
        let records = self.journal.records.lock().unwrap();
        let record = records.get(self.position).cloned();
        if record.is_some() {
            self.position += 1;
        }
        Ok(record)
    }

    async fn wait_for_change(&mut self, timeout: Duration) -> Result<SourceEvent, SourceError> {
        let appended = self.journal.appended.notified();
        tokio::pin!(appended);
        appended.as_mut().enable();
        let available = self.journal.records.lock().unwrap().len();
        if available > self.position {
            return Ok(SourceEvent::Append);
        }
        match tokio::time::timeout(timeout, appended).await {
            Ok(()) => Ok(SourceEvent::Append),
            Err(_) => Ok(SourceEvent::Timeout),
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        *self.journal.closes.lock().unwrap() += 1;
        Ok(())
    }
}

/// Sink remembering every accepted cursor, failing every `fail_every`-th call.
#[derive(Clone)]
pub struct RecordingSink {
    bulk_size: usize,
    fail_every: Option<usize>,
    calls: Arc<Mutex<usize>>,
    accepted: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new(bulk_size: usize) -> Self {
        Self {
            bulk_size,
            fail_every: None,
            calls: Arc::default(),
            accepted: Arc::default(),
        }
    }

    /// Every `n`-th call fails without accepting anything. `n == 1` fails every call.
    pub fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n);
        self
    }

    pub fn accepted(&self) -> Vec<String> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn bulk_size(&self) -> usize {
        self.bulk_size
    }

    async fn publish(
        &mut self,
        records: &mut ring::Iter<'_, Record>,
    ) -> Result<usize, PublishError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if self.fail_every.is_some_and(|n| call % n == 0) {
            return Err(PublishError::new(
                0,
                SinkError::Unavailable(format!("call {call} rejected")),
            ));
        }

        let mut accepted = self.accepted.lock().unwrap();
        let before = accepted.len();
        accepted.extend(records.map(|r| r.cursor.clone()));
        Ok(accepted.len() - before)
    }
}
