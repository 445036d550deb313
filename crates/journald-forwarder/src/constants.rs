// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults shared by the pipeline loops and the configuration layer.

use std::time::Duration;

/// Capacity of a ring buffer that was never explicitly sized.
pub const DEFAULT_RING_CAPACITY: usize = 10;

/// Upper bound of a single wait on the log source. Keeps the stop signal responsive.
pub const DEFAULT_WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Delay between two attempts of a failed flush or checkpoint write.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// How often buffered records are flushed even if the buffer is not full.
pub const DEFAULT_FORWARD_FLUSH: Duration = Duration::from_secs(5);

/// Legacy first forced-flush deadline, after which [`DEFAULT_FORWARD_FLUSH`] applies.
/// Only used when explicitly configured.
pub const LEGACY_FORWARD_WARMUP: Duration = Duration::from_secs(10);

/// How often the latest acknowledged cursor is written to disk.
pub const DEFAULT_CURSOR_FLUSH: Duration = Duration::from_secs(1);

pub const DEFAULT_CURSOR_PATH: &str = "./cursor";

/// The tailer hands records over one at a time; downstream drains promptly.
pub const RECORD_CHANNEL_CAPACITY: usize = 1;

pub const CURSOR_CHANNEL_CAPACITY: usize = 16;

pub const ERROR_CHANNEL_CAPACITY: usize = 64;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_HTTP_BATCH_SIZE: usize = 1;

pub const TAGS_HEADER: &str = "X-Tags";

pub const USER_AGENT: &str = concat!("journald-forwarder/", env!("CARGO_PKG_VERSION"));
