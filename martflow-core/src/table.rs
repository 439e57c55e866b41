//! Positional row sets and the CSV source-table parser.
//!
//! A [`ResultSet`] is a header list plus rows whose values line up with the
//! headers by position. Rows read from the source CSV are all [`Value::Text`];
//! rows read back from a store carry whatever storage class the store reports.

use std::fmt;
use thiserror::Error;

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

/// One record, positionally aligned to a header list.
pub type Row = Vec<Value>;

/// Headers plus rows, as returned by a query or produced by the CSV parser.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(headers: Vec<String>, rows: Vec<Row>) -> Self {
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by exact header name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("source table has no header row")]
    MissingHeader,

    #[error("malformed source table at record {record}: {reason}")]
    Malformed { record: u64, reason: String },
}

/// Parse a delimited text table whose first record is the header.
///
/// Every record must have exactly as many fields as the header. Cells are
/// kept verbatim as text, including empty strings.
pub fn parse_table(bytes: &[u8]) -> Result<ResultSet, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ParseError::Malformed {
            record: 0,
            reason: e.to_string(),
        })?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(ParseError::MissingHeader);
    }

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ParseError::Malformed {
            record: e.position().map(|p| p.record()).unwrap_or(i as u64 + 1),
            reason: e.to_string(),
        })?;
        rows.push(record.iter().map(Value::from).collect());
    }

    Ok(ResultSet { headers, rows })
}
