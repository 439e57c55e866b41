//! Transactional full-table reloads.
//!
//! `replace_table` is the unit of atomicity for the whole pipeline: inside one
//! transaction the destination is emptied and refilled, and any failure rolls
//! the table back to exactly its pre-call contents.

use crate::store::{Store, StoreError, StoreTransaction};
use crate::table::{ResultSet, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LoadError {
    /// The transaction failed and was rolled back.
    #[error("load into '{table}' failed and was rolled back: {source}")]
    Failed {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("row {row} for '{table}' has {found} values but {expected} headers were given")]
    ArityMismatch {
        table: String,
        row: usize,
        expected: usize,
        found: usize,
    },
}

impl LoadError {
    fn failed(table: &str, source: StoreError) -> Self {
        LoadError::Failed {
            table: table.to_string(),
            source,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            LoadError::Failed { table, .. } | LoadError::ArityMismatch { table, .. } => table,
        }
    }
}

/// What one reload did to its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub table: String,
    pub deleted: usize,
    pub inserted: usize,
}

/// A core table and the query that defines its contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableQuery {
    pub name: String,
    pub query: String,
}

impl TableQuery {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
        }
    }
}

/// Headers and every row must have the same width.
///
/// An empty header list is only accepted together with an empty row set.
pub fn check_arity(table: &str, headers: &[String], rows: &[Row]) -> Result<(), LoadError> {
    let expected = headers.len();
    for (i, row) in rows.iter().enumerate() {
        if row.len() != expected || expected == 0 {
            return Err(LoadError::ArityMismatch {
                table: table.to_string(),
                row: i,
                expected,
                found: row.len(),
            });
        }
    }
    Ok(())
}

/// Replace the full contents of `table` with `rows`.
///
/// Arity is checked before the transaction opens, so a mismatch never touches
/// the table. Delete and insert run in one transaction; on failure it is
/// rolled back and [`LoadError::Failed`] carries the cause.
pub fn replace_table(
    store: &mut dyn Store,
    table: &str,
    headers: &[String],
    rows: &[Row],
) -> Result<LoadSummary, LoadError> {
    check_arity(table, headers, rows)?;

    let store_name = store.name().to_string();
    let mut tx = store.begin().map_err(|e| LoadError::failed(table, e))?;

    match delete_then_insert(tx.as_mut(), table, headers, rows) {
        Ok((deleted, inserted)) => {
            tx.commit().map_err(|e| LoadError::failed(table, e))?;
            info!(store = %store_name, table, deleted, inserted, "table replaced");
            Ok(LoadSummary {
                table: table.to_string(),
                deleted,
                inserted,
            })
        }
        Err(cause) => {
            abandon(tx, &store_name, table);
            Err(LoadError::failed(table, cause))
        }
    }
}

/// Convenience wrapper for a whole [`ResultSet`].
pub fn replace_with(
    store: &mut dyn Store,
    table: &str,
    data: &ResultSet,
) -> Result<LoadSummary, LoadError> {
    replace_table(store, table, &data.headers, &data.rows)
}

/// Reload a set of interdependent tables inside one store transaction.
///
/// Every table is cleared first, in reverse declaration order, so children go
/// before the parents they reference. Tables are then filled in declaration
/// order, each from its defining query run inside the same transaction, so a
/// later query sees the rows loaded for earlier tables.
pub fn reload_tables(
    store: &mut dyn Store,
    tables: &[TableQuery],
) -> Result<Vec<LoadSummary>, LoadError> {
    let store_name = store.name().to_string();
    let first = match tables.first() {
        Some(t) => t.name.as_str(),
        None => return Ok(Vec::new()),
    };
    let mut tx = store.begin().map_err(|e| LoadError::failed(first, e))?;

    let mut deleted = Vec::with_capacity(tables.len());
    for table in tables.iter().rev() {
        match tx.delete_all(&table.name) {
            Ok(n) => deleted.push(n),
            Err(cause) => {
                abandon(tx, &store_name, &table.name);
                return Err(LoadError::failed(&table.name, cause));
            }
        }
    }
    deleted.reverse();

    let mut summaries = Vec::with_capacity(tables.len());
    for (table, deleted) in tables.iter().zip(deleted) {
        let data = match tx.query(&table.query) {
            Ok(data) => data,
            Err(cause) => {
                abandon(tx, &store_name, &table.name);
                return Err(LoadError::failed(&table.name, cause));
            }
        };
        if let Err(e) = check_arity(&table.name, &data.headers, &data.rows) {
            abandon(tx, &store_name, &table.name);
            return Err(e);
        }
        if data.headers.is_empty() {
            summaries.push(LoadSummary {
                table: table.name.clone(),
                deleted,
                inserted: 0,
            });
            continue;
        }
        match tx.insert_rows(&table.name, &data.headers, &data.rows) {
            Ok(inserted) => summaries.push(LoadSummary {
                table: table.name.clone(),
                deleted,
                inserted,
            }),
            Err(cause) => {
                abandon(tx, &store_name, &table.name);
                return Err(LoadError::failed(&table.name, cause));
            }
        }
    }

    tx.commit().map_err(|e| LoadError::failed(first, e))?;
    for s in &summaries {
        info!(store = %store_name, table = %s.table, deleted = s.deleted, inserted = s.inserted, "table reloaded");
    }
    Ok(summaries)
}

fn delete_then_insert(
    tx: &mut dyn StoreTransaction,
    table: &str,
    headers: &[String],
    rows: &[Row],
) -> Result<(usize, usize), StoreError> {
    let deleted = tx.delete_all(table)?;
    if rows.is_empty() {
        return Ok((deleted, 0));
    }
    let inserted = tx.insert_rows(table, headers, rows)?;
    Ok((deleted, inserted))
}

fn abandon(tx: Box<dyn StoreTransaction + '_>, store: &str, table: &str) {
    match tx.rollback() {
        Ok(()) => warn!(store, table, "load rolled back"),
        Err(e) => warn!(store, table, error = %e, "rollback failed; transaction dropped"),
    }
}
