use crate::catalog::{JsonRowSource, KeyCasing, OutputFormat, QueryDef};
use crate::error::{ExportError, Result};
use crate::warehouse::{CellValue, Column, ColumnType};
use chrono::SecondsFormat;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Per-format row encoding strategy, selected once per export. Rows stream
/// straight into a gzip sink so the artifact is never materialized
/// uncompressed.
pub trait RowEncoder: Send {
    fn write_header(&mut self, columns: &[Column]) -> Result<()>;
    fn write_row(&mut self, columns: &[Column], row: &[CellValue]) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

/// Opens the gzip sink at `path` and picks the encoder for the query's
/// output format.
pub fn encoder_for(query: &QueryDef, path: &Path) -> Result<Box<dyn RowEncoder>> {
    let sink = GzEncoder::new(File::create(path)?, Compression::best());
    Ok(match query.format {
        OutputFormat::Csv => Box::new(CsvEncoder {
            query: query.name.clone(),
            writer: Some(csv::Writer::from_writer(sink)),
        }),
        OutputFormat::Jsonl => Box::new(JsonlEncoder {
            query: query.name.clone(),
            json_source: query.json_source,
            key_casing: query.key_casing,
            sink: Some(sink),
        }),
    })
}

fn encoding_error(query: &str, message: impl ToString) -> ExportError {
    ExportError::Encoding {
        query: query.to_string(),
        message: message.to_string(),
    }
}

fn timestamp_text(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

struct CsvEncoder {
    query: String,
    writer: Option<csv::Writer<GzEncoder<File>>>,
}

impl RowEncoder for CsvEncoder {
    fn write_header(&mut self, columns: &[Column]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| encoding_error(&self.query, "write after finish"))?;
        writer
            .write_record(columns.iter().map(|c| c.name.as_str()))
            .map_err(|e| encoding_error(&self.query, e))
    }

    fn write_row(&mut self, _columns: &[Column], row: &[CellValue]) -> Result<()> {
        let record: Vec<String> = row
            .iter()
            .map(|cell| match cell {
                CellValue::Null => String::new(),
                CellValue::Boolean(b) => b.to_string(),
                CellValue::Integer(i) => i.to_string(),
                CellValue::Float(f) => f.to_string(),
                CellValue::Text(s) => s.clone(),
                CellValue::Timestamp(ts) => timestamp_text(ts),
            })
            .collect();
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| encoding_error(&self.query, "write after finish"))?;
        writer
            .write_record(&record)
            .map_err(|e| encoding_error(&self.query, e))
    }

    fn finish(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let sink = writer
            .into_inner()
            .map_err(|e| encoding_error(&self.query, e))?;
        sink.finish()?;
        Ok(())
    }
}

struct JsonlEncoder {
    query: String,
    json_source: JsonRowSource,
    key_casing: KeyCasing,
    sink: Option<GzEncoder<File>>,
}

impl RowEncoder for JsonlEncoder {
    fn write_header(&mut self, _columns: &[Column]) -> Result<()> {
        Ok(())
    }

    fn write_row(&mut self, columns: &[Column], row: &[CellValue]) -> Result<()> {
        let mut value = match self.json_source {
            JsonRowSource::FirstColumn => first_column_document(&self.query, row)?,
            JsonRowSource::AllColumns => row_object(&self.query, columns, row)?,
        };
        if self.key_casing == KeyCasing::Camel {
            value = camel_case_keys(value);
        }
        let line = serde_json::to_string(&value)?;
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| encoding_error(&self.query, "write after finish"))?;
        writeln!(sink, "{line}")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.take() {
            sink.finish()?;
        }
        Ok(())
    }
}

fn first_column_document(query: &str, row: &[CellValue]) -> Result<Value> {
    match row.first() {
        Some(CellValue::Text(s)) => {
            serde_json::from_str(s).map_err(|e| encoding_error(query, e))
        }
        Some(CellValue::Null) | None => Ok(Value::Null),
        Some(other) => Err(encoding_error(
            query,
            format!("first column is not a JSON document: {other:?}"),
        )),
    }
}

/// Builds the row object, parsing semi-structured columns into nested JSON
/// rather than emitting them as escaped strings.
fn row_object(query: &str, columns: &[Column], row: &[CellValue]) -> Result<Value> {
    let mut object = Map::with_capacity(columns.len());
    for (column, cell) in columns.iter().zip(row.iter()) {
        let value = match (column.column_type, cell) {
            (_, CellValue::Null) => Value::Null,
            (ColumnType::Array | ColumnType::Object, CellValue::Text(s)) => {
                serde_json::from_str(s).map_err(|e| {
                    encoding_error(query, format!("bad document in '{}': {e}", column.name))
                })?
            }
            (_, CellValue::Boolean(b)) => Value::Bool(*b),
            (_, CellValue::Integer(i)) => Value::from(*i),
            (_, CellValue::Float(f)) => {
                serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number)
            }
            (_, CellValue::Text(s)) => Value::from(s.as_str()),
            (_, CellValue::Timestamp(ts)) => Value::from(timestamp_text(ts)),
        };
        object.insert(column.name.clone(), value);
    }
    Ok(Value::Object(object))
}

/// Rewrites every object key reachable from `value` to camelCase.
/// Idempotent: a key already in camelCase comes back unchanged.
pub fn camel_case_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (camel_case(&k), camel_case_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(camel_case_keys).collect()),
        other => other,
    }
}

fn camel_case(key: &str) -> String {
    if !key.contains('_') {
        // Single word: lower the leading uppercase run, so unqualified
        // warehouse columns like TAGS come out as tags. The last uppercase
        // of the run stays when it starts a lowercase word (CHANNELId ->
        // channelId), keeping already-camel keys unchanged.
        let chars: Vec<char> = key.chars().collect();
        let mut out = String::with_capacity(key.len());
        let mut i = 0;
        while i < chars.len() && chars[i].is_uppercase() {
            if i > 0 && chars.get(i + 1).is_some_and(|n| n.is_lowercase()) {
                break;
            }
            out.extend(chars[i].to_lowercase());
            i += 1;
        }
        out.extend(&chars[i..]);
        return out;
    }
    let mut out = String::with_capacity(key.len());
    for (i, segment) in key.split('_').filter(|s| !s.is_empty()).enumerate() {
        let lower = segment.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.extend(chars);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn camel_case_handles_snake_and_screaming_snake() {
        assert_eq!(camel_case("channel_id"), "channelId");
        assert_eq!(camel_case("CHANNEL_VIEW_COUNT"), "channelViewCount");
        assert_eq!(camel_case("ChannelTitle"), "channelTitle");
    }

    #[test]
    fn camel_case_lowers_unqualified_uppercase_columns() {
        assert_eq!(camel_case("TAGS"), "tags");
        assert_eq!(camel_case("CHANNELID"), "channelid");
        assert_eq!(camel_case("HTMLBody"), "htmlBody");
        assert_eq!(camel_case("alreadyCamel"), "alreadyCamel");
        assert_eq!(camel_case(camel_case("TAGS").as_str()), "tags");
    }

    #[test]
    fn camel_case_keys_is_idempotent() {
        let input = json!({
            "channel_id": 1,
            "nested_doc": {"INNER_KEY": [{"deep_key": true}]},
            "items": [{"item_name": "x"}]
        });
        let once = camel_case_keys(input.clone());
        let twice = camel_case_keys(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once["channelId"], json!(1));
        assert_eq!(once["nestedDoc"]["innerKey"][0]["deepKey"], json!(true));
        assert_eq!(once["items"][0]["itemName"], json!("x"));
    }

    #[test]
    fn semi_structured_text_is_parsed_not_quoted() {
        let columns = vec![Column::new("tags", ColumnType::Array)];
        let row = vec![CellValue::Text("[\"a\",\"b\"]".to_string())];
        let value = row_object("q", &columns, &row).unwrap();
        assert_eq!(value["tags"], json!(["a", "b"]));
    }

    #[test]
    fn malformed_semi_structured_text_is_an_encoding_error() {
        let columns = vec![Column::new("doc", ColumnType::Object)];
        let row = vec![CellValue::Text("{not json".to_string())];
        let err = row_object("q", &columns, &row).unwrap_err();
        assert_eq!(err.query_name(), Some("q"));
    }

    #[test]
    fn writing_after_finish_is_an_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let query = QueryDef::from_table("done");
        let path = dir.path().join(query.file_name());
        let columns = vec![Column::new("a", ColumnType::Text)];

        let mut encoder = encoder_for(&query, &path).unwrap();
        encoder.write_header(&columns).unwrap();
        encoder.finish().unwrap();

        let err = encoder
            .write_row(&columns, &[CellValue::Text("x".to_string())])
            .unwrap_err();
        assert_eq!(err.query_name(), Some("done"));
        // A second finish stays a no-op
        encoder.finish().unwrap();
    }

    #[test]
    fn nulls_become_json_null_regardless_of_column_type() {
        let columns = vec![
            Column::new("tags", ColumnType::Array),
            Column::new("views", ColumnType::Integer),
        ];
        let row = vec![CellValue::Null, CellValue::Null];
        let value = row_object("q", &columns, &row).unwrap();
        assert_eq!(value["tags"], Value::Null);
        assert_eq!(value["views"], Value::Null);
    }
}
