use crate::error::{ExportError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Declared type tag for a result column, resolved once at cursor-open time.
/// `Array` and `Object` mark semi-structured columns whose textual value is a
/// serialized JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Integer,
    Float,
    Text,
    Timestamp,
    Array,
    Object,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
        }
    }
}

/// A single typed cell. Semi-structured columns surface as `Text` carrying
/// the serialized document; the encoder decides whether to parse it.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// Forward-only iterator over a query's result rows.
#[async_trait]
pub trait RowCursor: Send {
    fn columns(&self) -> &[Column];
    async fn next_row(&mut self) -> Result<Option<Vec<CellValue>>>;
}

/// One logical connection to the warehouse. Execution takes `&self` so
/// implementations that support concurrent statements can be shared across
/// export tasks.
#[async_trait]
pub trait WarehouseConnection: Send + Sync {
    async fn execute(
        &self,
        query: &str,
        parameters: &HashMap<String, Value>,
    ) -> Result<Box<dyn RowCursor>>;
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn open(&self) -> Result<Box<dyn WarehouseConnection>>;
}

/// File-backed warehouse for development and fixtures: each answerable query
/// is a JSON file named `{table}.json` holding column declarations and rows.
/// Only `select * from {table}` shapes resolve; anything else is an
/// execution error, the same way a real warehouse rejects bad SQL.
pub struct FileWarehouse {
    dir: PathBuf,
}

impl FileWarehouse {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[derive(Debug, Deserialize)]
struct FixtureResultSet {
    columns: Vec<FixtureColumn>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct FixtureColumn {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
}

fn parse_column_type(tag: &str) -> Option<ColumnType> {
    match tag {
        "boolean" => Some(ColumnType::Boolean),
        "integer" => Some(ColumnType::Integer),
        "float" => Some(ColumnType::Float),
        "text" => Some(ColumnType::Text),
        "timestamp" => Some(ColumnType::Timestamp),
        "array" => Some(ColumnType::Array),
        "object" => Some(ColumnType::Object),
        _ => None,
    }
}

fn parse_cell(column: &Column, value: &Value) -> Result<CellValue> {
    let cell = match (column.column_type, value) {
        (_, Value::Null) => CellValue::Null,
        (ColumnType::Boolean, Value::Bool(b)) => CellValue::Boolean(*b),
        (ColumnType::Integer, Value::Number(n)) => {
            CellValue::Integer(n.as_i64().unwrap_or_default())
        }
        (ColumnType::Float, Value::Number(n)) => CellValue::Float(n.as_f64().unwrap_or_default()),
        (ColumnType::Timestamp, Value::String(s)) => CellValue::Timestamp(
            DateTime::parse_from_rfc3339(s)
                .map_err(|e| {
                    ExportError::Config(format!("bad timestamp '{s}' in fixture: {e}"))
                })?
                .with_timezone(&Utc),
        ),
        (_, Value::String(s)) => CellValue::Text(s.clone()),
        // Semi-structured fixtures may inline the document instead of quoting it
        (ColumnType::Array, v) | (ColumnType::Object, v) => CellValue::Text(v.to_string()),
        (_, v) => CellValue::Text(v.to_string()),
    };
    Ok(cell)
}

struct FixtureCursor {
    columns: Vec<Column>,
    rows: std::vec::IntoIter<Vec<Value>>,
}

#[async_trait]
impl RowCursor for FixtureCursor {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Vec<CellValue>>> {
        let Some(raw) = self.rows.next() else {
            return Ok(None);
        };
        let mut row = Vec::with_capacity(self.columns.len());
        for (column, value) in self.columns.iter().zip(raw.iter()) {
            row.push(parse_cell(column, value)?);
        }
        Ok(Some(row))
    }
}

struct FileWarehouseConnection {
    dir: PathBuf,
}

#[async_trait]
impl WarehouseConnection for FileWarehouseConnection {
    async fn execute(
        &self,
        query: &str,
        _parameters: &HashMap<String, Value>,
    ) -> Result<Box<dyn RowCursor>> {
        let table = query
            .split_whitespace()
            .skip_while(|w| !w.eq_ignore_ascii_case("from"))
            .nth(1)
            .ok_or_else(|| ExportError::Execution {
                query: query.to_string(),
                message: "fixture warehouse only answers 'select * from <table>'".to_string(),
            })?;

        let path = self.dir.join(format!("{table}.json"));
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ExportError::Execution {
                query: table.to_string(),
                message: format!("no fixture at {}: {e}", path.display()),
            })?;
        let fixture: FixtureResultSet =
            serde_json::from_str(&content).map_err(|e| ExportError::Execution {
                query: table.to_string(),
                message: format!("malformed fixture {}: {e}", path.display()),
            })?;

        let columns = fixture
            .columns
            .iter()
            .map(|c| {
                parse_column_type(&c.column_type)
                    .map(|t| Column::new(&c.name, t))
                    .ok_or_else(|| ExportError::Execution {
                        query: table.to_string(),
                        message: format!("unknown column type tag '{}'", c.column_type),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Opened fixture cursor for {} ({} rows)", table, fixture.rows.len());
        Ok(Box::new(FixtureCursor {
            columns,
            rows: fixture.rows.into_iter(),
        }))
    }
}

#[async_trait]
impl Warehouse for FileWarehouse {
    async fn open(&self) -> Result<Box<dyn WarehouseConnection>> {
        Ok(Box::new(FileWarehouseConnection {
            dir: self.dir.clone(),
        }))
    }
}
