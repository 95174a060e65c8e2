//! Marshaling helpers for job authors. The engine itself only moves text;
//! these turn typed keys and values into that text and back.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::api::{Emitter, Values};
use crate::record::Record;

pub trait StreamProtocol {
    fn marshal<K, S, V>(&self, reduce_key: &K, sort_key: &S, value: &V) -> Result<Record>
    where
        K: Serialize + ?Sized,
        S: Serialize + ?Sized,
        V: Serialize + ?Sized;

    fn unmarshal<T: DeserializeOwned>(&self, text: &str) -> Result<T>;

    fn emit<K, S, V>(&self, emitter: &dyn Emitter, reduce_key: &K, sort_key: &S, value: &V) -> Result<()>
    where
        K: Serialize + ?Sized,
        S: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let record = self.marshal(reduce_key, sort_key, value)?;
        emitter.emit_record(&record);
        Ok(())
    }

    /// Decode a group's values lazily, skipping any that fail to parse.
    fn unmarshal_values<T: DeserializeOwned>(&self, values: Values) -> impl Iterator<Item = T> + '_
    where
        Self: Sized,
    {
        values.filter_map(move |text| match self.unmarshal(&text) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(value = %text, error = %e, "skipping undecodable value");
                None
            }
        })
    }
}

/// Every part is JSON text. A sort key that serializes to `null` (for
/// instance `&()`) is left out of the record.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonProtocol;

impl StreamProtocol for JsonProtocol {
    fn marshal<K, S, V>(&self, reduce_key: &K, sort_key: &S, value: &V) -> Result<Record>
    where
        K: Serialize + ?Sized,
        S: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let reduce_key = serde_json::to_string(reduce_key).context("marshal reduce key")?;
        let mut sort_key = serde_json::to_string(sort_key).context("marshal sort key")?;
        if sort_key == "null" {
            sort_key.clear();
        }
        let value = serde_json::to_string(value).context("marshal value")?;
        Ok(Record { reduce_key, sort_key, value })
    }

    fn unmarshal<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        serde_json::from_str(text).with_context(|| format!("unmarshal json {text:?}"))
    }
}

/// Tab-separated fields: structs, tuples and sequences become one field per
/// element, scalars a single field. Nothing is quoted, so fields must not
/// themselves contain tabs or newlines.
#[derive(Clone, Copy, Debug, Default)]
pub struct TsvProtocol;

impl TsvProtocol {
    fn render<T: Serialize + ?Sized>(value: &T) -> Result<String> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Never)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        wtr.serialize(value)?;
        let bytes = wtr.into_inner().map_err(|e| anyhow!("flush tsv: {}", e.error()))?;
        let mut text = String::from_utf8(bytes)?;
        if text.ends_with('\n') {
            text.pop();
        }
        // csv writes a lone empty field as `""`.
        if text == "\"\"" {
            text.clear();
        }
        Ok(text)
    }
}

impl StreamProtocol for TsvProtocol {
    fn marshal<K, S, V>(&self, reduce_key: &K, sort_key: &S, value: &V) -> Result<Record>
    where
        K: Serialize + ?Sized,
        S: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        Ok(Record {
            reduce_key: Self::render(reduce_key).context("marshal reduce key")?,
            sort_key: Self::render(sort_key).context("marshal sort key")?,
            value: Self::render(value).context("marshal value")?,
        })
    }

    fn unmarshal<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        let record = csv::StringRecord::from(text.split('\t').collect::<Vec<_>>());
        record.deserialize(None).with_context(|| format!("unmarshal tsv {text:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::LineWriter;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Visit {
        page: String,
        hits: u32,
        bot: bool,
    }

    #[test]
    fn json_marshals_each_part() {
        let rec = JsonProtocol.marshal("k", &(), &Visit { page: "/".into(), hits: 2, bot: false }).unwrap();
        assert_eq!(rec.reduce_key, "\"k\"");
        assert_eq!(rec.sort_key, "");
        assert_eq!(rec.value, r#"{"page":"/","hits":2,"bot":false}"#);

        let rec = JsonProtocol.marshal(&1, &[2, 3], "v").unwrap();
        assert_eq!((rec.reduce_key.as_str(), rec.sort_key.as_str()), ("1", "[2,3]"));
    }

    #[test]
    fn json_values_skip_garbage() {
        let values: Values = ["1", "oops", "3"].into_iter().collect();
        let nums: Vec<u32> = JsonProtocol.unmarshal_values(values).collect();
        assert_eq!(nums, vec![1, 3]);
    }

    #[test]
    fn tsv_renders_fields_with_tabs() {
        let visit = Visit { page: "/home".into(), hits: 7, bot: true };
        let rec = TsvProtocol.marshal("site", "", &visit).unwrap();
        assert_eq!(rec, Record::new("site", "", "/home\t7\ttrue"));
        assert_eq!(TsvProtocol.unmarshal::<Visit>(&rec.value).unwrap(), visit);

        let rec = TsvProtocol.marshal(&42u64, &(1, "b"), &vec![1.5, 2.0]).unwrap();
        assert_eq!(rec, Record::new("42", "1\tb", "1.5\t2.0"));
        assert_eq!(TsvProtocol.unmarshal::<(u32, String)>("9\tx").unwrap(), (9, "x".to_string()));
    }

    #[test]
    fn emit_goes_through_the_emitter() {
        let out = LineWriter::new(Vec::new());
        JsonProtocol.emit(&out, "w", &(), &3).unwrap();
        TsvProtocol.emit(&out, "w", "", &(1, 2)).unwrap();
        assert_eq!(String::from_utf8(out.finish().unwrap()).unwrap(), "\"w\"\t3\nw\t1\t2\n");
    }
}
