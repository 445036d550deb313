// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log source backed by a `journalctl --output=json --follow` child process.
//!
//! A reader task decodes the child's stdout line by line and hands records over a bounded
//! channel, which turns the blocking stream into the non-blocking `read_next` and the bounded
//! `wait_for_change` the tailer expects.

use crate::codec::{CURSOR_KEY, MONOTONIC_TIMESTAMP_KEY, REALTIME_TIMESTAMP_KEY};
use crate::errors::SourceError;
use crate::record::Record;
use crate::source::{LogSource, SourceEvent};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const ENTRY_CHANNEL_CAPACITY: usize = 1024;

type Entry = Result<Record, SourceError>;

#[derive(Debug, Clone)]
pub struct JournalctlConfig {
    /// Program to run, `journalctl` from `PATH` by default.
    pub binary: PathBuf,
    /// Read the journal files stored in this directory instead of the system journal.
    pub directory: Option<PathBuf>,
    /// Match expressions (`FIELD=value`, `+`) passed through verbatim.
    pub matches: Vec<String>,
}

impl Default for JournalctlConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("journalctl"),
            directory: None,
            matches: Vec::new(),
        }
    }
}

impl JournalctlConfig {
    /// Command line used to follow the journal right after `cursor`.
    #[must_use]
    pub fn args(&self, cursor: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--output=json".into(),
            "--follow".into(),
            "--all".into(),
            "--no-pager".into(),
        ];
        if let Some(directory) = &self.directory {
            let mut arg = OsString::from("--directory=");
            arg.push(directory);
            args.push(arg);
        }
        if cursor.is_empty() {
            args.push("--lines=all".into());
        } else {
            args.push(format!("--after-cursor={cursor}").into());
        }
        args.extend(self.matches.iter().map(OsString::from));
        args
    }
}

pub struct JournalctlSource {
    config: JournalctlConfig,
    cursor: String,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    entries: Option<mpsc::Receiver<Entry>>,
    /// Entry received while waiting, returned by the next `read_next`.
    pending: Option<Entry>,
}

impl JournalctlSource {
    #[must_use]
    pub fn new(config: JournalctlConfig) -> Self {
        Self {
            config,
            cursor: String::new(),
            child: None,
            reader: None,
            entries: None,
            pending: None,
        }
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        self.stop().await;

        let args = self.config.args(&self.cursor);
        debug!(binary = %self.config.binary.display(), ?args, "Spawning journalctl");
        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            SourceError::Io(std::io::Error::other("journalctl stdout was not captured"))
        })?;
        self.child = Some(child);
        self.attach(BufReader::new(stdout));
        Ok(())
    }

    /// Starts decoding entries from `reader`.
    fn attach<R>(&mut self, reader: R)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(ENTRY_CHANNEL_CAPACITY);
        self.reader = Some(tokio::spawn(read_entries(reader, tx)));
        self.entries = Some(rx);
    }

    async fn stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!("Failed to kill journalctl: {e}");
            }
        }
        self.entries = None;
        self.pending = None;
    }

    async fn entries(&mut self) -> Result<&mut mpsc::Receiver<Entry>, SourceError> {
        if self.entries.is_none() {
            self.start().await?;
        }
        self.entries.as_mut().ok_or(SourceError::Closed)
    }
}

#[async_trait]
impl LogSource for JournalctlSource {
    async fn seek(&mut self, cursor: &str) -> Result<(), SourceError> {
        cursor.clone_into(&mut self.cursor);
        self.start().await.map_err(|e| SourceError::Seek {
            cursor: cursor.to_string(),
            reason: e.to_string(),
        })
    }

    async fn read_next(&mut self) -> Result<Option<Record>, SourceError> {
        if let Some(entry) = self.pending.take() {
            return entry.map(Some);
        }
        match self.entries().await?.try_recv() {
            Ok(entry) => entry.map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SourceError::Closed),
        }
    }

    async fn wait_for_change(&mut self, timeout: Duration) -> Result<SourceEvent, SourceError> {
        if self.pending.is_some() {
            return Ok(SourceEvent::Append);
        }
        let received = {
            let entries = self.entries().await?;
            tokio::time::timeout(timeout, entries.recv()).await
        };
        match received {
            Ok(Some(entry)) => {
                self.pending = Some(entry);
                Ok(SourceEvent::Append)
            }
            Ok(None) => Err(SourceError::Closed),
            Err(_) => Ok(SourceEvent::Timeout),
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.stop().await;
        Ok(())
    }
}

async fn read_entries<R>(mut reader: R, tx: mpsc::Sender<Entry>)
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                debug!("journalctl output ended");
                return;
            }
            Ok(_) => {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match parse_entry(&line) {
                    Ok(record) => {
                        if tx.send(Ok(record)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Skipping journal entry: {e}"),
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        }
    }
}

/// Decodes one line of `journalctl --output=json`.
pub fn parse_entry(line: &[u8]) -> Result<Record, SourceError> {
    let mut object: Map<String, Value> = serde_json::from_slice(line)?;

    let cursor = match object.remove(CURSOR_KEY) {
        Some(Value::String(cursor)) => cursor,
        _ => return Err(SourceError::Decode(format!("entry without {CURSOR_KEY}"))),
    };
    let realtime_timestamp =
        parse_timestamp(REALTIME_TIMESTAMP_KEY, object.remove(REALTIME_TIMESTAMP_KEY))?;
    let monotonic_timestamp =
        parse_timestamp(MONOTONIC_TIMESTAMP_KEY, object.remove(MONOTONIC_TIMESTAMP_KEY))?;

    let fields = object
        .into_iter()
        .filter_map(|(key, value)| field_bytes(value).map(|bytes| (key, bytes)))
        .collect();

    Ok(Record {
        cursor,
        realtime_timestamp,
        monotonic_timestamp,
        fields,
    })
}

fn parse_timestamp(key: &str, value: Option<Value>) -> Result<u64, SourceError> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::String(s)) => s
            .parse()
            .map_err(|e| SourceError::Decode(format!("invalid {key} {s:?}: {e}"))),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| SourceError::Decode(format!("invalid {key} {n}"))),
        Some(other) => Err(SourceError::Decode(format!("invalid {key} {other}"))),
    }
}

/// journalctl writes binary fields as arrays of bytes and repeated fields as arrays of values.
fn field_bytes(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => Some(s.into_bytes()),
        Value::Array(items) => {
            if items.first().is_some_and(Value::is_number) {
                items
                    .iter()
                    .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect()
            } else {
                items.into_iter().next().and_then(field_bytes)
            }
        }
        Value::Number(n) => Some(n.to_string().into_bytes()),
        Value::Bool(b) => Some(b.to_string().into_bytes()),
        Value::Null | Value::Object(_) => None,
    }
}
