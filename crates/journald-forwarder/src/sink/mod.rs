// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destinations the publisher hands batches to.

pub mod http;
pub mod writer;

use crate::errors::PublishError;
use crate::record::Record;
use crate::ring;
use async_trait::async_trait;

#[async_trait]
pub trait Sink: Send {
    /// Number of records that make a full batch. The publisher sizes its buffer to it.
    fn bulk_size(&self) -> usize;

    /// Publishes the records yielded by `records`, oldest first.
    ///
    /// Returns how many records, counted from the oldest, were durably accepted. On failure the
    /// error carries the count accepted before the failure. The iterator is rewound before every
    /// call, so a failed batch is offered again in full.
    async fn publish(&mut self, records: &mut ring::Iter<'_, Record>) -> Result<usize, PublishError>;
}

pub use http::{HttpSink, HttpSinkConfig};
pub use writer::{StdoutSink, WriterSink};
