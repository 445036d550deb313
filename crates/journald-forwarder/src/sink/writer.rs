// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::codec::EnvelopeEncoder;
use crate::errors::PublishError;
use crate::record::Record;
use crate::ring;
use crate::sink::Sink;
use async_trait::async_trait;
use std::io::{self, Write};
use tracing::trace;

/// Writes each record as a single-record envelope followed by a blank line.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
    encoder: EnvelopeEncoder,
}

pub type StdoutSink = WriterSink<io::Stdout>;

impl StdoutSink {
    #[must_use]
    pub fn stdout() -> Self {
        WriterSink::new(io::stdout())
    }
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            encoder: EnvelopeEncoder::new(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_record(&mut self, record: &Record) -> Result<(), PublishError> {
        let envelope = self
            .encoder
            .encode_one(record)
            .map_err(|e| PublishError::new(0, e))?;
        self.writer
            .write_all(envelope)
            .and_then(|()| self.writer.write_all(b"\n\n"))
            .map_err(|e| PublishError::new(0, e))
    }
}

#[async_trait]
impl<W: Write + Send> Sink for WriterSink<W> {
    fn bulk_size(&self) -> usize {
        1
    }

    async fn publish(&mut self, records: &mut ring::Iter<'_, Record>) -> Result<usize, PublishError> {
        let mut written = 0;
        for record in records.by_ref() {
            if let Err(mut e) = self.write_record(record) {
                e.accepted = written;
                return Err(e);
            }
            trace!(cursor = %record.cursor, "Wrote record");
            written += 1;
        }
        if let Err(e) = self.writer.flush() {
            return Err(PublishError::new(written, e));
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SinkError;
    use crate::ring::RingBuffer;

    /// Accepts `budget` writes, then fails every following one.
    struct FailingWriter {
        budget: usize,
        written: Vec<u8>,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.budget -= 1;
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_writes_envelope_and_blank_line() {
        let mut ring = RingBuffer::new(2);
        ring.enqueue(Record::new("a").with_field("MESSAGE", "one"));
        ring.enqueue(Record::new("b"));

        let mut sink = WriterSink::new(Vec::new());
        assert_eq!(sink.bulk_size(), 1);
        let accepted = sink.publish(&mut ring.iter()).await.unwrap();
        assert_eq!(accepted, 2);

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            output,
            concat!(
                r#"{"__CURSOR":"a","__REALTIME_TIMESTAMP":0,"__MONOTONIC_TIMESTAMP":0,"MESSAGE":"one"}"#,
                "\n\n",
                r#"{"__CURSOR":"b","__REALTIME_TIMESTAMP":0,"__MONOTONIC_TIMESTAMP":0}"#,
                "\n\n",
            )
        );
    }

    #[tokio::test]
    async fn test_write_failure_reports_partial_count() {
        let mut ring = RingBuffer::new(3);
        for cursor in ["a", "b", "c"] {
            ring.enqueue(Record::new(cursor));
        }

        // Two writes per record: the envelope, then the separator.
        let mut sink = WriterSink::new(FailingWriter {
            budget: 3,
            written: Vec::new(),
        });
        let err = sink.publish(&mut ring.iter()).await.unwrap_err();
        assert_eq!(err.accepted, 1);
        assert!(matches!(err.source, SinkError::Io(_)));
        assert!(sink.get_ref().written.starts_with(br#"{"__CURSOR":"a""#));
    }
}
