// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON envelope sinks use to ship records.
//!
//! A record becomes an object whose first three keys are `__CURSOR`, `__REALTIME_TIMESTAMP` and
//! `__MONOTONIC_TIMESTAMP` (the timestamps as bare unsigned integers), followed by every field as
//! a string. Several records become an array of such objects.
//!
//! On top of standard JSON escaping, `<`, `>`, `&`, U+2028 and U+2029 are always written as
//! `\u` escapes so the payload stays inert when embedded in HTML or script contexts, and control
//! characters without a two-letter escape (`\b`, `\f` included) use the `\u00XX` form. Every
//! byte of an invalid UTF-8 sequence in a field value is written as `\ufffd`; a U+FFFD that is
//! part of valid text is written as is.

use crate::record::Record;
use serde::ser::{Error as _, SerializeMap, Serializer};
use serde::Serialize;
use serde_json::ser::{CharEscape, CompactFormatter, Formatter};
use serde_json::value::RawValue;
use std::io;

pub const CURSOR_KEY: &str = "__CURSOR";
pub const REALTIME_TIMESTAMP_KEY: &str = "__REALTIME_TIMESTAMP";
pub const MONOTONIC_TIMESTAMP_KEY: &str = "__MONOTONIC_TIMESTAMP";

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 3))?;
        map.serialize_entry(CURSOR_KEY, &self.cursor)?;
        map.serialize_entry(REALTIME_TIMESTAMP_KEY, &self.realtime_timestamp)?;
        map.serialize_entry(MONOTONIC_TIMESTAMP_KEY, &self.monotonic_timestamp)?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, &FieldValue(value))?;
        }
        map.end()
    }
}

struct FieldValue<'a>(&'a [u8]);

impl Serialize for FieldValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if let Ok(valid) = std::str::from_utf8(self.0) {
            return serializer.serialize_str(valid);
        }
        lossy_string(self.0)
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

/// Renders `bytes` as a JSON string literal, writing `\ufffd` for every byte of an invalid
/// sequence and escaping the valid runs like any other string.
fn lossy_string(bytes: &[u8]) -> Result<Box<RawValue>, serde_json::Error> {
    let mut literal = Vec::with_capacity(bytes.len() + 8);
    let mut run = Vec::new();
    literal.push(b'"');
    for chunk in bytes.utf8_chunks() {
        if !chunk.valid().is_empty() {
            run.clear();
            let mut serializer = serde_json::Serializer::with_formatter(&mut run, EnvelopeFormatter);
            chunk.valid().serialize(&mut serializer)?;
            // Strip the quotes around the escaped run.
            literal.extend_from_slice(&run[1..run.len() - 1]);
        }
        for _ in chunk.invalid() {
            literal.extend_from_slice(b"\\ufffd");
        }
    }
    literal.push(b'"');

    let literal = String::from_utf8(literal).map_err(serde_json::Error::custom)?;
    RawValue::from_string(literal)
}

/// Compact JSON formatter applying the envelope's extra escaping rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeFormatter;

impl Formatter for EnvelopeFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            let escaped: &[u8] = match c {
                '<' => b"\\u003c",
                '>' => b"\\u003e",
                '&' => b"\\u0026",
                '\u{2028}' => b"\\u2028",
                '\u{2029}' => b"\\u2029",
                _ => continue,
            };
            if start < i {
                writer.write_all(&fragment.as_bytes()[start..i])?;
            }
            writer.write_all(escaped)?;
            start = i + c.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }

    fn write_char_escape<W>(&mut self, writer: &mut W, char_escape: CharEscape) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        match char_escape {
            CharEscape::Backspace => writer.write_all(b"\\u0008"),
            CharEscape::FormFeed => writer.write_all(b"\\u000c"),
            other => CompactFormatter.write_char_escape(writer, other),
        }
    }
}

/// Serializes records into a reusable buffer.
#[derive(Debug, Default)]
pub struct EnvelopeEncoder {
    buf: Vec<u8>,
}

impl EnvelopeEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes a single record as a JSON object.
    pub fn encode_one(&mut self, record: &Record) -> Result<&[u8], serde_json::Error> {
        self.buf.clear();
        let mut serializer = serde_json::Serializer::with_formatter(&mut self.buf, EnvelopeFormatter);
        record.serialize(&mut serializer)?;
        Ok(&self.buf)
    }

    /// Encodes records as a JSON array, in iteration order.
    pub fn encode_all<'a, I>(&mut self, records: I) -> Result<&[u8], serde_json::Error>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        self.buf.clear();
        let mut serializer = serde_json::Serializer::with_formatter(&mut self.buf, EnvelopeFormatter);
        serializer.collect_seq(records)?;
        Ok(&self.buf)
    }
}

/// Convenience wrapper around [`EnvelopeEncoder::encode_one`].
pub fn to_vec(record: &Record) -> Result<Vec<u8>, serde_json::Error> {
    EnvelopeEncoder::new().encode_one(record).map(<[u8]>::to_vec)
}

/// Convenience wrapper around [`EnvelopeEncoder::encode_one`] returning a string.
pub fn to_string(record: &Record) -> Result<String, serde_json::Error> {
    let bytes = to_vec(record)?;
    // The formatter only ever emits UTF-8.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_record() {
        let record = Record::new("c1")
            .with_realtime_timestamp(100)
            .with_field("MESSAGE", "hi\n");

        assert_eq!(
            to_string(&record).unwrap(),
            r#"{"__CURSOR":"c1","__REALTIME_TIMESTAMP":100,"__MONOTONIC_TIMESTAMP":0,"MESSAGE":"hi\n"}"#
        );
    }

    #[test]
    fn test_record_without_fields() {
        let record = Record::new("s=1;i=2")
            .with_realtime_timestamp(1)
            .with_monotonic_timestamp(2);
        assert_eq!(
            to_string(&record).unwrap(),
            r#"{"__CURSOR":"s=1;i=2","__REALTIME_TIMESTAMP":1,"__MONOTONIC_TIMESTAMP":2}"#
        );
    }

    #[test]
    fn test_html_and_separator_escaping() {
        let record = Record::new("c").with_field("MESSAGE", "<a href=\"x\">&</a>\u{2028}\u{2029}");
        let json = to_string(&record).unwrap();
        assert!(json.ends_with(
            r#""MESSAGE":"\u003ca href=\"x\"\u003e\u0026\u003c/a\u003e\u2028\u2029"}"#
        ));
    }

    #[test]
    fn test_control_character_escaping() {
        let record = Record::new("c").with_field("MESSAGE", "\\\t\r\u{8}\u{c}\u{1}\u{1f}\u{7f}");
        let json = to_string(&record).unwrap();
        assert!(json.ends_with(
            "\"MESSAGE\":\"\\\\\\t\\r\\u0008\\u000c\\u0001\\u001f\u{7f}\"}"
        ));
    }

    #[test]
    fn test_invalid_utf8_replaced_per_byte() {
        let record = Record::new("c").with_field("MESSAGE", vec![b'o', b'k', 0xe2, 0x82, b'!', 0xff]);
        let json = to_string(&record).unwrap();
        assert!(json.ends_with(r#""MESSAGE":"ok\ufffd\ufffd!\ufffd"}"#));
    }

    #[test]
    fn test_invalid_utf8_runs_keep_escaping() {
        let mut value = b"<\"x\"".to_vec();
        value.push(0xc3);
        value.extend_from_slice("\u{2028}\n".as_bytes());
        let record = Record::new("c").with_field("MESSAGE", value);
        let json = to_string(&record).unwrap();
        assert!(json.ends_with(r#""MESSAGE":"\u003c\"x\"\ufffd\u2028\n"}"#));
    }

    #[test]
    fn test_valid_replacement_character_written_raw() {
        let record = Record::new("c\u{FFFD}").with_field("MESSAGE", "a\u{FFFD}b");
        assert_eq!(
            to_string(&record).unwrap(),
            "{\"__CURSOR\":\"c\u{FFFD}\",\"__REALTIME_TIMESTAMP\":0,\
             \"__MONOTONIC_TIMESTAMP\":0,\"MESSAGE\":\"a\u{FFFD}b\"}"
        );

        let mut mixed = "\u{FFFD}".as_bytes().to_vec();
        mixed.push(0xff);
        let record = Record::new("c").with_field("MESSAGE", mixed);
        let json = to_string(&record).unwrap();
        assert!(json.ends_with("\"MESSAGE\":\"\u{FFFD}\\ufffd\"}"));
    }

    #[test]
    fn test_non_ascii_passes_through() {
        let record = Record::new("c").with_field("MESSAGE", "héllo ✓");
        let json = to_string(&record).unwrap();
        assert!(json.ends_with("\"MESSAGE\":\"héllo ✓\"}"));
    }

    #[test]
    fn test_keys_are_escaped() {
        let record = Record::new("c").with_field("A<B", "v");
        let json = to_string(&record).unwrap();
        assert!(json.ends_with(r#""A\u003cB":"v"}"#));
    }

    #[test]
    fn test_array_envelope() {
        let records = vec![
            Record::new("a").with_realtime_timestamp(1),
            Record::new("b").with_realtime_timestamp(2),
        ];
        let mut encoder = EnvelopeEncoder::new();
        let bytes = encoder.encode_all(&records).unwrap();
        assert_eq!(
            std::str::from_utf8(bytes).unwrap(),
            concat!(
                r#"[{"__CURSOR":"a","__REALTIME_TIMESTAMP":1,"__MONOTONIC_TIMESTAMP":0},"#,
                r#"{"__CURSOR":"b","__REALTIME_TIMESTAMP":2,"__MONOTONIC_TIMESTAMP":0}]"#
            )
        );
    }

    #[test]
    fn test_empty_array_envelope() {
        let mut encoder = EnvelopeEncoder::new();
        let bytes = encoder.encode_all(std::iter::empty()).unwrap();
        assert_eq!(bytes, b"[]");
    }

    #[test]
    fn test_encoder_reuses_buffer() {
        let mut encoder = EnvelopeEncoder::new();
        let first = encoder.encode_one(&Record::new("first")).unwrap().to_vec();
        let second = encoder.encode_one(&Record::new("2")).unwrap().to_vec();
        assert!(first.starts_with(br#"{"__CURSOR":"first""#));
        assert!(second.starts_with(br#"{"__CURSOR":"2""#));
        assert!(second.len() < first.len());
    }

    #[test]
    fn test_envelope_is_valid_json() {
        let record = Record::new("c").with_field("MESSAGE", "<tag> & \u{2028} \u{1}");
        let parsed: serde_json::Value = serde_json::from_slice(&to_vec(&record).unwrap()).unwrap();
        assert_eq!(parsed["MESSAGE"], "<tag> & \u{2028} \u{1}");
        assert_eq!(parsed["__REALTIME_TIMESTAMP"], 0);
    }
}
