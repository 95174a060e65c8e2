//! Line codec for the two record shapes the engine reads and writes.
//!
//! Map input is one bare value per line. Intermediate records are
//! `reduceKey[,sortKey]\tvalue\n` where both keys are query-escaped so they
//! can carry commas, tabs and newlines; the value is taken verbatim.

use std::io::BufRead;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::MrError;

// Query-component escaping: everything but ALPHA / DIGIT / "-" / "_" / "." / "~".
const KEY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    pub reduce_key: String,
    pub sort_key: String,
    pub value: String,
}

impl Record {
    pub fn new(reduce_key: impl Into<String>, sort_key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { reduce_key: reduce_key.into(), sort_key: sort_key.into(), value: value.into() }
    }

    pub fn value_only(value: impl Into<String>) -> Self {
        Self { value: value.into(), ..Self::default() }
    }
}

pub fn escape_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ESCAPE).to_string().replace("%20", "+")
}

pub fn unescape_key(escaped: &str) -> Result<String, MrError> {
    let bytes = escaped.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
            if !valid {
                return Err(MrError::MalformedInput(format!("invalid escape in key {escaped:?}")));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    let spaced = escaped.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| MrError::MalformedInput(format!("key {escaped:?} is not utf-8: {e}")))
}

/// Parse a map-input line. Only the trailing newline is removed.
pub fn decode_value_line(line: &str) -> Record {
    Record::value_only(line.strip_suffix('\n').unwrap_or(line))
}

/// Parse one intermediate line, terminator included.
pub fn decode_key_value_line(line: &str) -> Result<Record, MrError> {
    let body = line
        .strip_suffix('\n')
        .ok_or_else(|| MrError::MalformedInput("record is missing its line terminator".into()))?;
    let (key_field, value) = body
        .split_once('\t')
        .ok_or_else(|| MrError::MalformedInput(format!("record has no key/value tab: {body:?}")))?;
    let (reduce_key, sort_key) = match key_field.split_once(',') {
        Some((r, s)) => (unescape_key(r)?, unescape_key(s)?),
        None => (unescape_key(key_field)?, String::new()),
    };
    Ok(Record { reduce_key, sort_key, value: value.to_string() })
}

pub fn encode_key_value_line(reduce_key: &str, sort_key: &str, value: &str) -> String {
    let mut line = escape_key(reduce_key);
    if !sort_key.is_empty() {
        line.push(',');
        line.push_str(&escape_key(sort_key));
    }
    line.push('\t');
    line.push_str(value);
    line.push('\n');
    line
}

/// Pulls records off a buffered reader one line at a time.
///
/// The `next_*` helpers fold every failure into end-of-stream: a read error
/// or a malformed intermediate line stops the reader, it is never surfaced.
pub struct RecordReader<R> {
    inner: R,
    line: String,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, line: String::new() }
    }

    /// `Ok(None)` at end of stream; errors only when the read itself fails.
    pub fn read_value(&mut self) -> Result<Option<Record>, MrError> {
        self.line.clear();
        match self.inner.read_line(&mut self.line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(decode_value_line(&self.line))),
            Err(e) => Err(MrError::MalformedInput(format!("read failed: {e}"))),
        }
    }

    pub fn read_key_value(&mut self) -> Result<Option<Record>, MrError> {
        self.line.clear();
        match self.inner.read_line(&mut self.line) {
            Ok(0) => Ok(None),
            Ok(_) => decode_key_value_line(&self.line).map(Some),
            Err(e) => Err(MrError::MalformedInput(format!("read failed: {e}"))),
        }
    }

    pub fn next_value(&mut self) -> Option<Record> {
        self.read_value().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "value stream ended early");
            None
        })
    }

    pub fn next_key_value(&mut self) -> Option<Record> {
        self.read_key_value().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "record stream ended early");
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn encodes_reserved_characters_in_keys() {
        assert_eq!(encode_key_value_line("a,b", "", "v"), "a%2Cb\tv\n");
        assert_eq!(encode_key_value_line("a b", "x\ty", "v\tw"), "a+b,x%09y\tv\tw\n");
        assert_eq!(encode_key_value_line("100%", "", ""), "100%25\t\n");
    }

    #[test]
    fn decodes_key_and_optional_sort_key() {
        let rec = decode_key_value_line("k%2C1,s+2\tsome\tvalue\n").unwrap();
        assert_eq!(rec, Record::new("k,1", "s 2", "some\tvalue"));

        let rec = decode_key_value_line("plain\tv\n").unwrap();
        assert_eq!(rec, Record::new("plain", "", "v"));
    }

    #[test]
    fn rejects_broken_lines() {
        assert!(decode_key_value_line("no-tab\n").is_err());
        assert!(decode_key_value_line("k\tno-newline").is_err());
        assert!(decode_key_value_line("bad%zz\tv\n").is_err());
        assert!(decode_key_value_line("trunc%2\tv\n").is_err());
        assert!(decode_key_value_line("notutf8%FF\tv\n").is_err());
    }

    #[test]
    fn value_lines_keep_everything_but_the_newline() {
        assert_eq!(decode_value_line("a\tb,c\n").value, "a\tb,c");
        assert_eq!(decode_value_line("tail").value, "tail");
        assert_eq!(decode_value_line("\n").value, "");
    }

    #[test]
    fn reader_stops_at_first_malformed_record() {
        let input = "a\t1\nb\t2\nbroken\nc\t3\n";
        let mut reader = RecordReader::new(Cursor::new(input));
        let mut keys = Vec::new();
        while let Some(rec) = reader.next_key_value() {
            keys.push(rec.reduce_key);
        }
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn reader_yields_unterminated_final_value() {
        let mut reader = RecordReader::new(Cursor::new("one\ntwo"));
        assert_eq!(reader.next_value().unwrap().value, "one");
        assert_eq!(reader.next_value().unwrap().value, "two");
        assert!(reader.next_value().is_none());
    }

    proptest! {
        #[test]
        fn key_value_lines_round_trip(
            reduce_key in any::<String>(),
            sort_key in any::<String>(),
            value in "[^\n]*",
        ) {
            let line = encode_key_value_line(&reduce_key, &sort_key, &value);
            let rec = decode_key_value_line(&line).unwrap();
            prop_assert_eq!(rec, Record::new(reduce_key, sort_key, value));
        }
    }
}
