//! Martflow Core: the data plumbing of the sales ETL pipeline.
//!
//! - Positional row sets and the CSV source parser (`table`)
//! - Store abstraction with a SQLite implementation (`store`)
//! - Transactional full-table replace and ordered multi-table reload (`loader`)
//! - Query-then-load between stores (`bridge`)
//! - Branch decisions over closed action sets (`router`)
//! - Mart query templates (`mart`)
//! - Date normalization for the raw layer (`dates`)
//! - Remote share download (`fetch`)

pub mod bridge;
pub mod dates;
pub mod fetch;
pub mod loader;
pub mod mart;
pub mod router;
pub mod sql;
pub mod store;
pub mod table;

pub use bridge::{move_table, BridgeError};
pub use dates::{normalize_dates, DateError};
pub use fetch::{FetchError, HttpFetch, PublicShareSource, ReqwestFetcher, SourceFetcher};
pub use loader::{reload_tables, replace_table, replace_with, LoadError, LoadSummary, TableQuery};
pub use mart::{MartSpec, SubCategorySales, SALES_BY_YEAR_TABLE, SUB_CATEGORY_SALES_TABLE};
pub use router::{
    pick_category, route_category, route_source_file, Category, CategoryMart, RouteError,
    SourceFileRoute,
};
pub use store::{SqliteConnector, SqliteStore, Store, StoreConnector, StoreError, StoreRole};
pub use table::{parse_table, ParseError, ResultSet, Row, Value};
