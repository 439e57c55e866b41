//! SQLite-backed store.

use super::{Store, StoreConnector, StoreError, StoreRole, StoreTransaction};
use crate::sql;
use crate::table::{ResultSet, Row, Value};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

/// A single SQLite database acting as one store.
pub struct SqliteStore {
    name: String,
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open(name: impl Into<String>, path: &Path) -> Result<Self, StoreError> {
        let name = name.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Open {
                    store: name.clone(),
                    reason: format!("create {}: {e}", parent.display()),
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| StoreError::Open {
            store: name.clone(),
            reason: e.to_string(),
        })?;
        Self::configure(name, conn)
    }

    pub fn open_in_memory(name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            store: name.clone(),
            reason: e.to_string(),
        })?;
        Self::configure(name, conn)
    }

    fn configure(name: String, conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { name, conn })
    }

    /// Run one or more statements outside of any pipeline transaction.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn row_count(&self, table: &str) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", sql::quote_ident(table));
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }
}

impl Store for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn query(&mut self, sql: &str) -> Result<ResultSet, StoreError> {
        debug!(store = %self.name, %sql, "query");
        query_on(&self.conn, sql)
    }

    fn begin(&mut self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        let tx = self.conn.transaction()?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

struct SqliteTransaction<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn query(&mut self, sql: &str) -> Result<ResultSet, StoreError> {
        query_on(&self.tx, sql)
    }

    fn delete_all(&mut self, table: &str) -> Result<usize, StoreError> {
        Ok(self.tx.execute(&sql::delete_all(table), [])?)
    }

    fn insert_rows(
        &mut self,
        table: &str,
        headers: &[String],
        rows: &[Row],
    ) -> Result<usize, StoreError> {
        let insert = sql::insert_into(table, headers);
        debug!(%insert, rows = rows.len(), "bulk insert");
        let mut stmt = self.tx.prepare(&insert)?;
        for row in rows {
            stmt.execute(rusqlite::params_from_iter(row.iter()))?;
        }
        Ok(rows.len())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn query_on(conn: &Connection, sql: &str) -> Result<ResultSet, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let headers: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = headers.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(Value::from(row.get_ref(i)?));
        }
        rows.push(values);
    }

    Ok(ResultSet::new(headers, rows))
}

/// Opens each store from its own SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    raw: PathBuf,
    core: PathBuf,
    mart: PathBuf,
}

impl SqliteConnector {
    pub fn new(raw: impl Into<PathBuf>, core: impl Into<PathBuf>, mart: impl Into<PathBuf>) -> Self {
        Self {
            raw: raw.into(),
            core: core.into(),
            mart: mart.into(),
        }
    }

    pub fn path(&self, role: StoreRole) -> &Path {
        match role {
            StoreRole::Raw => &self.raw,
            StoreRole::Core => &self.core,
            StoreRole::Mart => &self.mart,
        }
    }

    /// Open a store as its concrete type (used for schema setup and inspection).
    pub fn open_sqlite(&self, role: StoreRole) -> Result<SqliteStore, StoreError> {
        SqliteStore::open(role.as_str(), self.path(role))
    }
}

impl StoreConnector for SqliteConnector {
    fn open(&self, role: StoreRole) -> Result<Box<dyn Store>, StoreError> {
        Ok(Box::new(self.open_sqlite(role)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_table() -> SqliteStore {
        let store = SqliteStore::open_in_memory("test").unwrap();
        store
            .execute_batch("CREATE TABLE t (id INTEGER, name TEXT, score REAL, note TEXT);")
            .unwrap();
        store
    }

    #[test]
    fn bad_statements_are_told_apart_from_constraint_failures() {
        let mut store = store_with_table();
        store
            .execute_batch("CREATE TABLE c (v TEXT CHECK (v <> 'no'));")
            .unwrap();

        let syntax = store.query("SELEC id FROM t").unwrap_err();
        assert!(syntax.is_statement_error(), "{syntax}");
        let missing = store.query("SELECT id FROM nowhere").unwrap_err();
        assert!(missing.is_statement_error(), "{missing}");

        let mut tx = store.begin().unwrap();
        let constraint = tx
            .insert_rows("c", &["v".to_string()], &[vec![Value::from("no")]])
            .unwrap_err();
        assert!(!constraint.is_statement_error(), "{constraint}");
    }

    #[test]
    fn query_returns_headers_and_typed_values() {
        let mut store = store_with_table();
        store
            .execute_batch("INSERT INTO t VALUES (1, 'a', 1.5, NULL);")
            .unwrap();

        let rs = store.query("SELECT id, name, score, note FROM t").unwrap();
        assert_eq!(rs.headers, vec!["id", "name", "score", "note"]);
        assert_eq!(
            rs.rows[0],
            vec![
                Value::Integer(1),
                Value::Text("a".into()),
                Value::Real(1.5),
                Value::Null
            ]
        );
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut store = store_with_table();
        {
            let mut tx = store.begin().unwrap();
            tx.insert_rows(
                "t",
                &["id".to_string()],
                &[vec![Value::Integer(7)]],
            )
            .unwrap();
        }
        assert_eq!(store.row_count("t").unwrap(), 0);
    }

    #[test]
    fn committed_transaction_is_visible() {
        let mut store = store_with_table();
        let mut tx = store.begin().unwrap();
        tx.insert_rows(
            "t",
            &["id".to_string(), "name".to_string()],
            &[vec![Value::Integer(1), Value::Text("x".into())]],
        )
        .unwrap();
        tx.commit().unwrap();
        assert_eq!(store.row_count("t").unwrap(), 1);
    }

    #[test]
    fn connector_opens_file_backed_stores() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SqliteConnector::new(
            dir.path().join("raw.db"),
            dir.path().join("nested/core.db"),
            dir.path().join("mart.db"),
        );
        for role in StoreRole::ALL {
            let store = connector.open(role).unwrap();
            assert_eq!(store.name(), role.as_str());
        }
        assert!(dir.path().join("nested/core.db").exists());
    }
}
