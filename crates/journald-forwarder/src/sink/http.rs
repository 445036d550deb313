// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk HTTP sink.
//!
//! A batch is sent as one `POST` whose body is the JSON envelope of the batch: a single object
//! for a single record, an array otherwise. Any 2xx answer acknowledges the whole batch; anything
//! else acknowledges nothing and the publisher retries the same batch.

use crate::codec::EnvelopeEncoder;
use crate::constants::{DEFAULT_HTTP_BATCH_SIZE, DEFAULT_HTTP_TIMEOUT, TAGS_HEADER, USER_AGENT};
use crate::errors::{PublishError, SinkError};
use crate::record::Record;
use crate::ring;
use crate::sink::Sink;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSinkConfig {
    pub endpoint: String,
    /// Sent verbatim in the tags header when set.
    pub tags: Option<String>,
    pub batch_size: usize,
    pub timeout: Duration,
}

impl HttpSinkConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            tags: None,
            batch_size: DEFAULT_HTTP_BATCH_SIZE,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    batch_size: usize,
    encoder: EnvelopeEncoder,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(tags) = &config.tags {
            let name = HeaderName::from_bytes(TAGS_HEADER.as_bytes())
                .map_err(|e| SinkError::Unavailable(format!("invalid tags header: {e}")))?;
            let value = HeaderValue::from_str(tags)
                .map_err(|e| SinkError::Unavailable(format!("invalid tags header: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint,
            headers,
            batch_size: config.batch_size.max(1),
            encoder: EnvelopeEncoder::new(),
        })
    }

    fn encode(&mut self, records: &mut ring::Iter<'_, Record>) -> Result<Vec<u8>, SinkError> {
        let body = if records.len() == 1 {
            match records.next() {
                Some(record) => self.encoder.encode_one(record)?,
                None => self.encoder.encode_all(std::iter::empty())?,
            }
        } else {
            self.encoder.encode_all(records.by_ref())?
        };
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn bulk_size(&self) -> usize {
        self.batch_size
    }

    async fn publish(&mut self, records: &mut ring::Iter<'_, Record>) -> Result<usize, PublishError> {
        let count = records.len();
        let body = self.encode(records).map_err(|e| PublishError::new(0, e))?;

        debug!(count, bytes = body.len(), endpoint = %self.endpoint, "Posting batch");
        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| PublishError::new(0, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(count);
        }

        let body = response.text().await.unwrap_or_default();
        error!("{status}: Failed to push batch: {body:?}");
        Err(PublishError::new(
            0,
            SinkError::Status {
                status: status.as_u16(),
                body,
            },
        ))
    }
}
