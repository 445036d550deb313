// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use journald_forwarder::config::PipelineConfig;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Pipeline settings with short intervals, checkpointing into `dir`.
pub fn fast_pipeline(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        cursor_path: dir.join("cursor"),
        cursor_flush: Duration::from_millis(20),
        forward_flush: Duration::from_millis(30),
        forward_warmup: None,
        retry_delay: Duration::from_millis(10),
        wait_poll_interval: Duration::from_millis(20),
    }
}

/// Polls `condition` every 10ms until it holds; panics after 10 seconds.
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let polled = timeout(Duration::from_secs(10), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

pub fn read_checkpoint(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}
