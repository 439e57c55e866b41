//! Store abstraction: named transactional targets for the raw, core and mart layers.
//!
//! Connections are scoped: a step opens the store it needs through a
//! [`StoreConnector`], and the connection is released when the boxed store is
//! dropped, on success or on error. A [`StoreTransaction`] that is dropped
//! without `commit` rolls back.

pub mod sqlite;

use crate::table::{ResultSet, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use sqlite::{SqliteConnector, SqliteStore};

/// The three logically separate stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreRole {
    Raw,
    Core,
    Mart,
}

impl StoreRole {
    pub const ALL: [StoreRole; 3] = [StoreRole::Raw, StoreRole::Core, StoreRole::Mart];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreRole::Raw => "raw",
            StoreRole::Core => "core",
            StoreRole::Mart => "mart",
        }
    }
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open store '{store}': {reason}")]
    Open { store: String, reason: String },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    /// The statement itself is wrong: bad syntax, or an unknown table or
    /// column. Running it again cannot succeed.
    pub fn is_statement_error(&self) -> bool {
        match self {
            StoreError::Sqlite(e) => {
                matches!(e.sqlite_error_code(), Some(rusqlite::ErrorCode::Unknown))
                    || matches!(
                        e,
                        rusqlite::Error::InvalidColumnName(_)
                            | rusqlite::Error::InvalidParameterCount(..)
                    )
            }
            StoreError::Open { .. } | StoreError::Other(_) => false,
        }
    }
}

/// A transactional query/load target.
pub trait Store {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Run a read query and collect its headers and rows.
    fn query(&mut self, sql: &str) -> Result<ResultSet, StoreError>;

    /// Open a transaction. Dropping it without `commit` rolls back.
    fn begin(&mut self) -> Result<Box<dyn StoreTransaction + '_>, StoreError>;
}

/// Operations available inside one store transaction.
pub trait StoreTransaction {
    fn query(&mut self, sql: &str) -> Result<ResultSet, StoreError>;

    /// Delete every row of `table`, returning the number removed.
    fn delete_all(&mut self, table: &str) -> Result<usize, StoreError>;

    /// Insert `rows` into `table` using `headers` as the column list.
    fn insert_rows(
        &mut self,
        table: &str,
        headers: &[String],
        rows: &[Row],
    ) -> Result<usize, StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Opens a fresh connection to one of the three stores.
pub trait StoreConnector: Send + Sync {
    fn open(&self, role: StoreRole) -> Result<Box<dyn Store>, StoreError>;
}
