//! Query one store, load the result into another.

use crate::loader::{replace_with, LoadError, LoadSummary};
use crate::store::{Store, StoreError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Nothing was mutated: the read failed before the destination was touched.
    #[error("read from store '{store}' failed: {source}")]
    Read {
        store: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Run `query` against `source`, then replace `table` in `dest` with the result.
///
/// The read completes before the destination transaction opens, so a failed
/// read leaves the destination untouched.
pub fn move_table(
    source: &mut dyn Store,
    query: &str,
    dest: &mut dyn Store,
    table: &str,
) -> Result<LoadSummary, BridgeError> {
    let data = source.query(query).map_err(|e| BridgeError::Read {
        store: source.name().to_string(),
        source: e,
    })?;
    debug!(
        from = source.name(),
        to = dest.name(),
        table,
        rows = data.len(),
        "moving result set"
    );
    Ok(replace_with(dest, table, &data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn stores() -> (SqliteStore, SqliteStore) {
        let src = SqliteStore::open_in_memory("core").unwrap();
        src.execute_batch(
            "CREATE TABLE sales (category TEXT, amount REAL);
             INSERT INTO sales VALUES ('Furniture', 10.0), ('Furniture', 5.0), ('Technology', 2.5);",
        )
        .unwrap();
        let dest = SqliteStore::open_in_memory("mart").unwrap();
        dest.execute_batch(
            "CREATE TABLE totals (category TEXT, total REAL);
             INSERT INTO totals VALUES ('stale', 0.0);",
        )
        .unwrap();
        (src, dest)
    }

    #[test]
    fn moves_aggregate_into_destination() {
        let (mut src, mut dest) = stores();
        let summary = move_table(
            &mut src,
            "SELECT category, SUM(amount) AS total FROM sales GROUP BY category ORDER BY category",
            &mut dest,
            "totals",
        )
        .unwrap();

        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.inserted, 2);
        let rows = dest.query("SELECT category FROM totals ORDER BY category").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn failed_read_leaves_destination_untouched() {
        let (mut src, mut dest) = stores();
        let err = move_table(&mut src, "SELECT * FROM missing", &mut dest, "totals").unwrap_err();

        assert!(matches!(err, BridgeError::Read { .. }));
        assert_eq!(dest.row_count("totals").unwrap(), 1);
    }
}
