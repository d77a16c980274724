//! Record table data structures

use crate::error::SourceError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use uuid::Uuid;

/// A single cell of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Whole-number field, kept integral so it serializes as `101`, not `101.0`
    Integer(i64),
    Number(f64),
    Text(String),
    Missing,
}

impl Value {
    /// Type a raw CSV field: empty is missing, integer or float when it parses
    /// as one, text otherwise
    pub fn parse(field: &str) -> Self {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            return Value::Missing;
        }
        if let Ok(integer) = trimmed.parse::<i64>() {
            return Value::Integer(integer);
        }
        match trimmed.parse::<f64>() {
            Ok(number) => Value::Number(number),
            Err(_) => Value::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Value::Integer(n) => JsonValue::from(*n),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Missing => JsonValue::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Missing => Ok(()),
        }
    }
}

/// One feature row. `values` is aligned with the owning table's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub index: usize,
    pub values: Vec<Value>,
}

/// Borrowed view of a row together with its column names
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    pub columns: &'a [String],
    pub row: &'a Row,
}

impl<'a> RowView<'a> {
    pub fn index(&self) -> usize {
        self.row.index
    }

    /// Column-to-value JSON object for this row
    pub fn to_record(&self) -> Map<String, JsonValue> {
        self.columns
            .iter()
            .zip(&self.row.values)
            .map(|(column, value)| (column.clone(), value.to_json()))
            .collect()
    }
}

/// Immutable ordered table of feature rows.
///
/// Every table carries a unique identity; tables derived from it (samples)
/// get a fresh one.
#[derive(Debug, Clone)]
pub struct RecordTable {
    id: Uuid,
    columns: Arc<[String]>,
    rows: Vec<Row>,
}

impl RecordTable {
    /// Build a table, re-indexing the rows `0..n-1`
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self::with_columns(columns.into(), rows)
    }

    pub(crate) fn with_columns(columns: Arc<[String]>, rows: Vec<Vec<Value>>) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(index, values)| Row { index, values })
            .collect();
        Self {
            id: Uuid::new_v4(),
            columns,
            rows,
        }
    }

    /// Parse CSV with a header row, optionally dropping one column
    pub fn from_csv_reader<R: Read>(
        reader: R,
        drop_column: Option<&str>,
    ) -> Result<Self, SourceError> {
        let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();

        let dropped = match drop_column {
            Some(name) => Some(
                headers
                    .iter()
                    .position(|h| h == name)
                    .ok_or_else(|| SourceError::MissingTargetColumn(name.to_string()))?,
            ),
            None => None,
        };

        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != dropped)
            .map(|(_, h)| h.clone())
            .collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let values = record
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != dropped)
                .map(|(_, field)| Value::parse(field))
                .collect();
            rows.push(values);
        }

        Ok(Self::new(columns, rows))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub(crate) fn shared_columns(&self) -> Arc<[String]> {
        Arc::clone(&self.columns)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<RowView<'_>> {
        self.rows.get(index).map(|row| RowView {
            columns: &self.columns,
            row,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().map(move |row| RowView {
            columns: &self.columns,
            row,
        })
    }

    /// Same columns and same cell values, regardless of identity
    pub fn same_content(&self, other: &RecordTable) -> bool {
        self.columns == other.columns && self.rows == other.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "speed,temp,Bleedout,grade\n1.5,200,0,A\n2.0,,1,B\n";

    #[test]
    fn test_parse_drops_target_column() {
        let table = RecordTable::from_csv_reader(CSV.as_bytes(), Some("Bleedout")).unwrap();

        assert_eq!(table.columns(), ["speed", "temp", "grade"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1].index, 1);
        assert_eq!(table.rows()[1].values[1], Value::Missing);
        assert_eq!(table.rows()[0].values[2], Value::Text("A".to_string()));
    }

    #[test]
    fn test_missing_target_column() {
        let err = RecordTable::from_csv_reader(CSV.as_bytes(), Some("label")).unwrap_err();
        assert!(matches!(err, SourceError::MissingTargetColumn(name) if name == "label"));
    }

    #[test]
    fn test_row_to_record() {
        let table = RecordTable::from_csv_reader(CSV.as_bytes(), Some("Bleedout")).unwrap();
        let record = table.row(1).unwrap().to_record();

        assert_eq!(record["speed"], serde_json::json!(2.0));
        assert_eq!(record["temp"], JsonValue::Null);
        assert_eq!(record["grade"], serde_json::json!("B"));
    }

    #[test]
    fn test_integer_fields_stay_integral() {
        let table = RecordTable::from_csv_reader(CSV.as_bytes(), Some("Bleedout")).unwrap();
        assert_eq!(table.rows()[0].values[1], Value::Integer(200));
        assert_eq!(table.rows()[0].values[1].as_f64(), Some(200.0));

        let record = table.row(0).unwrap().to_record();
        assert_eq!(serde_json::to_string(&record["temp"]).unwrap(), "200");
        assert_eq!(serde_json::to_string(&record["speed"]).unwrap(), "1.5");

        let record = table.row(1).unwrap().to_record();
        assert_eq!(serde_json::to_string(&record["speed"]).unwrap(), "2.0");
    }

    #[test]
    fn test_parse_field_types() {
        assert_eq!(Value::parse(" 42 "), Value::Integer(42));
        assert_eq!(Value::parse("-7"), Value::Integer(-7));
        assert_eq!(Value::parse("3.25"), Value::Number(3.25));
        assert_eq!(Value::parse("1e3"), Value::Number(1000.0));
        assert_eq!(Value::parse("B-2"), Value::Text("B-2".to_string()));
        assert_eq!(Value::parse(""), Value::Missing);
    }

    #[test]
    fn test_tables_have_distinct_identity() {
        let a = RecordTable::from_csv_reader(CSV.as_bytes(), None).unwrap();
        let b = RecordTable::from_csv_reader(CSV.as_bytes(), None).unwrap();

        assert_ne!(a.id(), b.id());
        assert!(a.same_content(&b));
    }
}
