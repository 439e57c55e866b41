//! Step-level error aggregation and retry classification.

use martflow_core::{
    BridgeError, DateError, FetchError, LoadError, ParseError, RouteError, StoreError,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

use crate::config::ConfigError;
use crate::context::ContextError;

/// Coarse error class used for retry decisions and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Fetch,
    Load,
    Unroutable,
    Arity,
    Data,
    Io,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Fetch => "fetch",
            ErrorKind::Load => "load",
            ErrorKind::Unroutable => "unroutable",
            ErrorKind::Arity => "arity",
            ErrorKind::Data => "data",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a pipeline step can fail with.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("source file is malformed: {0}")]
    Parse(#[from] ParseError),

    #[error("date normalization failed: {0}")]
    Date(#[from] DateError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("run context: {0}")]
    Context(#[from] ContextError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("source file not present at {path} after {waited_secs}s")]
    SourceMissing { path: String, waited_secs: u64 },

    #[error("category query returned no categories")]
    NoCategories,

    #[error("branch at '{step}' chose '{chosen}', which is not one of its successors")]
    InvalidBranch { step: String, chosen: String },
}

impl StepError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        StepError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Fetch(_) => ErrorKind::Fetch,
            StepError::Load(e) => load_kind(e),
            StepError::Bridge(BridgeError::Read { source, .. }) => store_kind(source),
            StepError::Bridge(BridgeError::Load(e)) => load_kind(e),
            StepError::Store(e) => store_kind(e),
            StepError::Route(_) | StepError::InvalidBranch { .. } => ErrorKind::Unroutable,
            StepError::Parse(_) | StepError::Date(_) | StepError::NoCategories => ErrorKind::Data,
            StepError::Config(_) => ErrorKind::Config,
            StepError::Context(_) | StepError::Io { .. } | StepError::SourceMissing { .. } => {
                ErrorKind::Io
            }
        }
    }

    /// Transient failures worth another attempt. Routing, arity and data
    /// errors fail the run immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Fetch | ErrorKind::Load | ErrorKind::Io
        )
    }
}

/// A statement the store rejects outright comes from configuration.
fn store_kind(e: &StoreError) -> ErrorKind {
    if e.is_statement_error() {
        ErrorKind::Config
    } else {
        ErrorKind::Load
    }
}

fn load_kind(e: &LoadError) -> ErrorKind {
    match e {
        LoadError::Failed { source, .. } => store_kind(source),
        LoadError::ArityMismatch { .. } => ErrorKind::Arity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use martflow_core::route_category;

    #[test]
    fn routing_and_arity_are_never_retried() {
        let unroutable: StepError = route_category("Toys").unwrap_err().into();
        assert_eq!(unroutable.kind(), ErrorKind::Unroutable);
        assert!(!unroutable.is_retryable());

        let arity: StepError = LoadError::ArityMismatch {
            table: "t".into(),
            row: 0,
            expected: 2,
            found: 1,
        }
        .into();
        assert_eq!(arity.kind(), ErrorKind::Arity);
        assert!(!arity.is_retryable());

        let nested: StepError = BridgeError::Load(LoadError::ArityMismatch {
            table: "t".into(),
            row: 3,
            expected: 2,
            found: 3,
        })
        .into();
        assert_eq!(nested.kind(), ErrorKind::Arity);
    }

    #[test]
    fn transient_failures_are_retryable() {
        let fetch: StepError = FetchError::Status {
            status: 503,
            url: "https://files.example/x".into(),
        }
        .into();
        assert!(fetch.is_retryable());

        let load: StepError = LoadError::Failed {
            table: "t".into(),
            source: StoreError::Other("disk I/O error".into()),
        }
        .into();
        assert_eq!(load.kind(), ErrorKind::Load);
        assert!(load.is_retryable());

        let missing = StepError::SourceMissing {
            path: "/data/x.csv".into(),
            waited_secs: 0,
        };
        assert!(missing.is_retryable());
    }

    #[test]
    fn rejected_statements_are_config_errors() {
        use martflow_core::{SqliteStore, Store};

        let mut store = SqliteStore::open_in_memory("core").unwrap();
        let err: StepError = store.query("SELECT nme FROM category").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!err.is_retryable());

        let read = StepError::Bridge(BridgeError::Read {
            store: "core".into(),
            source: store.query("SELEC 1").unwrap_err(),
        });
        assert_eq!(read.kind(), ErrorKind::Config);
    }

    #[test]
    fn data_errors_are_fatal() {
        assert!(!StepError::NoCategories.is_retryable());
        let parse: StepError = ParseError::MissingHeader.into();
        assert_eq!(parse.kind(), ErrorKind::Data);
    }
}
