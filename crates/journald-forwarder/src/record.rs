// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::borrow::Cow;
use std::collections::BTreeMap;

/// A single log record read from a [`crate::source::LogSource`].
///
/// The cursor is an opaque token assigned by the source; records are ordered by it. Field values
/// are raw bytes since journal fields may carry binary data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub cursor: String,
    /// Wall clock time in microseconds since the epoch.
    pub realtime_timestamp: u64,
    /// Monotonic clock time in microseconds since boot.
    pub monotonic_timestamp: u64,
    pub fields: BTreeMap<String, Vec<u8>>,
}

impl Record {
    #[must_use]
    pub fn new(cursor: impl Into<String>) -> Self {
        Self {
            cursor: cursor.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_realtime_timestamp(mut self, timestamp: u64) -> Self {
        self.realtime_timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_monotonic_timestamp(mut self, timestamp: u64) -> Self {
        self.monotonic_timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Field value decoded as UTF-8, invalid sequences replaced.
    pub fn field(&self, key: &str) -> Option<Cow<'_, str>> {
        self.fields.get(key).map(|v| String::from_utf8_lossy(v))
    }
}
