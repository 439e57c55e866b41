//! Date column normalization for the raw table.

use crate::table::{ResultSet, Value};
use chrono::NaiveDate;
use thiserror::Error;

/// Output format of normalized dates.
pub const ISO_DATE: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum DateError {
    #[error("date column '{column}' not present in table")]
    MissingColumn { column: String },

    #[error("row {row}: cannot parse {value:?} in '{column}' as {format}")]
    Unparseable {
        column: String,
        row: usize,
        value: String,
        format: String,
    },
}

/// Rewrite `columns` of `data` from `input_format` to ISO dates in place.
///
/// Values already in ISO form are left alone, so running this twice is the
/// same as running it once. Empty and NULL cells are skipped. Returns the
/// number of cells rewritten.
pub fn normalize_dates(
    data: &mut ResultSet,
    columns: &[String],
    input_format: &str,
) -> Result<usize, DateError> {
    let mut indices = Vec::with_capacity(columns.len());
    for column in columns {
        let idx = data
            .column_index(column)
            .ok_or_else(|| DateError::MissingColumn {
                column: column.clone(),
            })?;
        indices.push((idx, column));
    }

    let mut rewritten = 0;
    for (row_idx, row) in data.rows.iter_mut().enumerate() {
        for (idx, column) in &indices {
            let Some(cell) = row.get_mut(*idx) else {
                continue;
            };
            let raw = match cell {
                Value::Text(s) if !s.trim().is_empty() => s.trim().to_string(),
                _ => continue,
            };
            if NaiveDate::parse_from_str(&raw, ISO_DATE).is_ok() {
                continue;
            }
            let date = NaiveDate::parse_from_str(&raw, input_format).map_err(|_| {
                DateError::Unparseable {
                    column: (*column).clone(),
                    row: row_idx,
                    value: raw.clone(),
                    format: input_format.to_string(),
                }
            })?;
            *cell = Value::Text(date.format(ISO_DATE).to_string());
            rewritten += 1;
        }
    }

    Ok(rewritten)
}
