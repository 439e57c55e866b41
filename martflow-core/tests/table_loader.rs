//! Integration tests for transactional table loads.
//!
//! Verifies:
//! 1. Replace is idempotent (no duplication on re-run)
//! 2. A failure mid-insert rolls the table back to its pre-call contents
//! 3. Multi-table reload clears in reverse order and loads in forward order
//! 4. The segment filter copies exactly the matching raw rows between stores

use martflow_core::loader::{check_arity, reload_tables, replace_table, LoadError, TableQuery};
use martflow_core::store::{SqliteStore, Store, StoreError, StoreTransaction};
use martflow_core::table::{ResultSet, Row, Value};
use martflow_core::{move_table, sql};
use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn sorted_rows(store: &mut SqliteStore, table: &str) -> Vec<Row> {
    let mut rows = store.query(&sql::select_all(table)).unwrap().rows;
    rows.sort_by_key(|r| format!("{r:?}"));
    rows
}

fn people_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory("core").unwrap();
    store
        .execute_batch(
            "CREATE TABLE people (id INTEGER, name TEXT CHECK (name <> 'boom'));
             INSERT INTO people VALUES (1, 'ada'), (2, 'grace');",
        )
        .unwrap();
    store
}

#[test]
fn replace_twice_yields_exactly_the_rowset() {
    let mut store = people_store();
    let rows = vec![
        vec![Value::Integer(10), Value::from("linus")],
        vec![Value::Integer(11), Value::from("barbara")],
    ];

    replace_table(&mut store, "people", &headers(&["id", "name"]), &rows).unwrap();
    let first = sorted_rows(&mut store, "people");
    replace_table(&mut store, "people", &headers(&["id", "name"]), &rows).unwrap();
    let second = sorted_rows(&mut store, "people");

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[test]
fn failure_mid_insert_restores_previous_contents() {
    let mut store = people_store();
    let before = sorted_rows(&mut store, "people");

    let rows = vec![
        vec![Value::Integer(3), Value::from("carol")],
        vec![Value::Integer(4), Value::from("boom")],
        vec![Value::Integer(5), Value::from("dave")],
    ];
    let err = replace_table(&mut store, "people", &headers(&["id", "name"]), &rows).unwrap_err();

    assert!(matches!(err, LoadError::Failed { ref table, .. } if table == "people"));
    assert_eq!(sorted_rows(&mut store, "people"), before);
}

#[test]
fn arity_mismatch_never_touches_the_table() {
    let mut store = people_store();
    let before = sorted_rows(&mut store, "people");

    let rows = vec![vec![Value::Integer(3)]];
    let err = replace_table(&mut store, "people", &headers(&["id", "name"]), &rows).unwrap_err();

    assert!(matches!(err, LoadError::ArityMismatch { expected: 2, found: 1, .. }));
    assert_eq!(sorted_rows(&mut store, "people"), before);
}

// ── Reload ordering ──────────────────────────────────────────────────

/// Store double that records every transactional operation in order.
struct RecordingStore {
    log: Rc<RefCell<Vec<String>>>,
    fail_insert_into: Option<String>,
}

struct RecordingTx {
    log: Rc<RefCell<Vec<String>>>,
    fail_insert_into: Option<String>,
}

impl Store for RecordingStore {
    fn name(&self) -> &str {
        "recording"
    }

    fn query(&mut self, sql: &str) -> Result<ResultSet, StoreError> {
        self.log.borrow_mut().push(format!("query {sql}"));
        Ok(ResultSet::default())
    }

    fn begin(&mut self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        self.log.borrow_mut().push("begin".into());
        Ok(Box::new(RecordingTx {
            log: Rc::clone(&self.log),
            fail_insert_into: self.fail_insert_into.clone(),
        }))
    }
}

impl StoreTransaction for RecordingTx {
    fn query(&mut self, sql: &str) -> Result<ResultSet, StoreError> {
        self.log.borrow_mut().push(format!("query {sql}"));
        Ok(ResultSet::new(
            headers(&["id"]),
            vec![vec![Value::Integer(1)]],
        ))
    }

    fn delete_all(&mut self, table: &str) -> Result<usize, StoreError> {
        self.log.borrow_mut().push(format!("delete {table}"));
        Ok(0)
    }

    fn insert_rows(
        &mut self,
        table: &str,
        _headers: &[String],
        rows: &[Row],
    ) -> Result<usize, StoreError> {
        self.log.borrow_mut().push(format!("insert {table}"));
        if self.fail_insert_into.as_deref() == Some(table) {
            return Err(StoreError::Other(format!("constraint violated in {table}")));
        }
        Ok(rows.len())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.log.borrow_mut().push("commit".into());
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.log.borrow_mut().push("rollback".into());
        Ok(())
    }
}

#[test]
fn reload_deletes_in_reverse_and_loads_in_declaration_order() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut store = RecordingStore {
        log: Rc::clone(&log),
        fail_insert_into: None,
    };
    let tables = vec![TableQuery::new("T1", "q1"), TableQuery::new("T2", "q2")];

    let summaries = reload_tables(&mut store, &tables).unwrap();

    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].table, "T1");
    assert_eq!(
        *log.borrow(),
        vec![
            "begin", "delete T2", "delete T1", "query q1", "insert T1", "query q2", "insert T2",
            "commit"
        ]
    );
}

#[test]
fn reload_failure_rolls_back_everything() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut store = RecordingStore {
        log: Rc::clone(&log),
        fail_insert_into: Some("T2".into()),
    };
    let tables = vec![TableQuery::new("T1", "q1"), TableQuery::new("T2", "q2")];

    let err = reload_tables(&mut store, &tables).unwrap_err();

    assert_eq!(err.table(), "T2");
    let log = log.borrow();
    assert_eq!(log.last().map(String::as_str), Some("rollback"));
    assert!(!log.iter().any(|op| op == "commit"));
}

#[test]
fn reload_respects_foreign_keys_in_sqlite() {
    let mut store = SqliteStore::open_in_memory("core").unwrap();
    store
        .execute_batch(
            "CREATE TABLE src (cat TEXT, item TEXT);
             INSERT INTO src VALUES ('A', 'a1'), ('A', 'a2'), ('B', 'b1');
             CREATE TABLE parent (id INTEGER PRIMARY KEY, cat TEXT UNIQUE);
             CREATE TABLE child (item TEXT, parent_id INTEGER NOT NULL REFERENCES parent(id));",
        )
        .unwrap();
    let tables = vec![
        TableQuery::new(
            "parent",
            "SELECT ROW_NUMBER() OVER (ORDER BY cat) AS id, cat FROM (SELECT DISTINCT cat FROM src)",
        ),
        TableQuery::new(
            "child",
            "SELECT s.item, p.id AS parent_id FROM src s JOIN parent p ON p.cat = s.cat",
        ),
    ];

    reload_tables(&mut store, &tables).unwrap();
    // Second run must delete child before parent or the FK check fails.
    let summaries = reload_tables(&mut store, &tables).unwrap();

    assert_eq!(summaries[0].deleted, 2);
    assert_eq!(summaries[1].deleted, 3);
    assert_eq!(store.row_count("parent").unwrap(), 2);
    assert_eq!(store.row_count("child").unwrap(), 3);
}

// ── Segment migration between stores ─────────────────────────────────

#[test]
fn migration_copies_only_corporate_rows() {
    // GIVEN a raw table with 10 rows, 4 of them Corporate
    let mut raw = SqliteStore::open_in_memory("raw").unwrap();
    let mut core = SqliteStore::open_in_memory("core").unwrap();
    let ddl = r#"CREATE TABLE raw_store ("Row ID" TEXT, "Segment" TEXT, "Sales" TEXT);"#;
    raw.execute_batch(ddl).unwrap();
    core.execute_batch(ddl).unwrap();
    core.execute_batch(r#"INSERT INTO raw_store VALUES ('old', 'Corporate', '0');"#)
        .unwrap();

    let segments = [
        "Corporate",
        "Consumer",
        "Home Office",
        "Corporate",
        "Consumer",
        "Consumer",
        "Corporate",
        "Home Office",
        "Consumer",
        "Corporate",
    ];
    let rows: Vec<Row> = segments
        .iter()
        .enumerate()
        .map(|(i, s)| {
            vec![
                Value::from((i + 1).to_string()),
                Value::from(*s),
                Value::from(format!("{}.5", i * 10)),
            ]
        })
        .collect();
    replace_table(&mut raw, "raw_store", &headers(&["Row ID", "Segment", "Sales"]), &rows).unwrap();

    // WHEN the Corporate subset is moved into core
    let query = sql::select_where_eq("raw_store", "Segment", "Corporate");
    move_table(&mut raw, &query, &mut core, "raw_store").unwrap();

    // THEN core holds exactly those 4 rows, unchanged, with identical headers
    let migrated = core
        .query(r#"SELECT * FROM raw_store ORDER BY CAST("Row ID" AS INTEGER)"#)
        .unwrap();
    assert_eq!(migrated.headers, headers(&["Row ID", "Segment", "Sales"]));
    let expected: Vec<Row> = rows
        .iter()
        .filter(|r| r[1] == Value::from("Corporate"))
        .cloned()
        .collect();
    assert_eq!(migrated.rows.len(), 4);
    assert_eq!(migrated.rows, expected);
}

// ── Properties ───────────────────────────────────────────────────────

fn arb_rows() -> impl Strategy<Value = Vec<(i64, String)>> {
    prop::collection::vec((any::<i64>(), "[a-z]{0,8}"), 0..20)
}

proptest! {
    /// Replacing with the same rows any number of times leaves exactly those rows.
    #[test]
    fn replace_is_idempotent(rows in arb_rows(), repeats in 1usize..4) {
        let mut store = SqliteStore::open_in_memory("prop").unwrap();
        store.execute_batch("CREATE TABLE t (n INTEGER, s TEXT);").unwrap();
        let data: Vec<Row> = rows
            .iter()
            .map(|(n, s)| vec![Value::Integer(*n), Value::Text(s.clone())])
            .collect();

        for _ in 0..repeats {
            replace_table(&mut store, "t", &headers(&["n", "s"]), &data).unwrap();
        }

        let mut expected = data.clone();
        expected.sort_by_key(|r| format!("{r:?}"));
        prop_assert_eq!(sorted_rows(&mut store, "t"), expected);
    }

    /// Any row narrower or wider than the headers is rejected up front.
    #[test]
    fn arity_is_checked_for_every_row(width in 0usize..6, bad_at in 0usize..5) {
        let hdrs: Vec<String> = (0..3).map(|i| format!("c{i}")).collect();
        let mut rows: Vec<Row> = (0..5).map(|_| vec![Value::Null; 3]).collect();
        rows[bad_at] = vec![Value::Null; width];

        let result = check_arity("t", &hdrs, &rows);
        if width == 3 {
            prop_assert!(result.is_ok());
        } else {
            let is_bad_row = matches!(result, Err(LoadError::ArityMismatch { row, .. }) if row == bad_at);
            prop_assert!(is_bad_row);
        }
    }
}
