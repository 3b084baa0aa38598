use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::TableName;
use crate::source::Value;

/// SQL flavour spoken by a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Positional parameter marker (1-based)
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::Sqlite => "?".to_string(),
        }
    }
}

/// A destination column as reported by the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Type name usable in a CAST (Postgres `udt_name`, SQLite declared type)
    pub type_name: String,
    pub nullable: bool,
}

/// Why the sink refused a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    /// Type conversion and other data errors
    Other,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RejectionKind::UniqueViolation => "unique violation",
            RejectionKind::ForeignKeyViolation => "foreign key violation",
            RejectionKind::NotNullViolation => "not-null violation",
            RejectionKind::CheckViolation => "check violation",
            RejectionKind::Other => "data error",
        };
        f.write_str(label)
    }
}

/// Sink failures, split into row-level rejections and everything else
#[derive(Debug, Error)]
pub enum SinkError {
    /// The statement was refused because of the row's data; the connection
    /// and transaction are still usable after rolling back to a savepoint
    #[error("{kind}: {message}")]
    Rejected { kind: RejectionKind, message: String },

    /// Connectivity, protocol, timeout or configuration failure
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl SinkError {
    /// Classify a driver error
    ///
    /// Only database errors that describe the row itself are rejections:
    /// integrity violations and data exceptions. Connection loss, aborted
    /// transactions, undefined objects and every non-database error are fatal.
    pub fn classify(err: sqlx::Error, dialect: Dialect) -> Self {
        let rejection = match &err {
            sqlx::Error::Database(db) => {
                let kind = match db.kind() {
                    sqlx::error::ErrorKind::UniqueViolation => Some(RejectionKind::UniqueViolation),
                    sqlx::error::ErrorKind::ForeignKeyViolation => {
                        Some(RejectionKind::ForeignKeyViolation)
                    }
                    sqlx::error::ErrorKind::NotNullViolation => {
                        Some(RejectionKind::NotNullViolation)
                    }
                    sqlx::error::ErrorKind::CheckViolation => Some(RejectionKind::CheckViolation),
                    _ => None,
                };
                let code = db.code().map(|c| c.to_string()).unwrap_or_default();
                kind.or_else(|| is_row_data_error(&code, dialect).then_some(RejectionKind::Other))
                    .map(|kind| (kind, db.message().to_string()))
            }
            _ => None,
        };

        match rejection {
            Some((kind, message)) => SinkError::Rejected { kind, message },
            None => SinkError::Fatal(anyhow::Error::new(err)),
        }
    }
}

/// Database error codes that blame the row rather than the session
fn is_row_data_error(code: &str, dialect: Dialect) -> bool {
    match dialect {
        // SQLSTATE class 22 (data exception) and 23 (integrity constraint)
        Dialect::Postgres => code.starts_with("22") || code.starts_with("23"),
        // Primary result codes: CONSTRAINT (19), TOOBIG (18), MISMATCH (20);
        // extended codes keep the primary code in their low byte
        Dialect::Sqlite => code
            .parse::<i64>()
            .map(|c| matches!(c & 0xff, 18..=20))
            .unwrap_or(false),
    }
}

/// Read side of a relational sink
#[async_trait]
pub trait IdentityLookup: Send {
    fn dialect(&self) -> Dialect;

    /// Columns of a destination table; empty if the table does not exist
    async fn describe_table(&mut self, table: &TableName) -> Result<Vec<ColumnInfo>, SinkError>;

    /// Run a single-column identifier query, returning the first row if any
    async fn select_id(&mut self, sql: &str, values: &[Value]) -> Result<Option<i64>, SinkError>;
}

/// Write side of a relational sink: one ambient transaction with savepoints
#[async_trait]
pub trait RelationalSink: IdentityLookup {
    async fn begin(&mut self) -> Result<(), SinkError>;

    async fn savepoint(&mut self, name: &str) -> Result<(), SinkError>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), SinkError>;

    async fn release_savepoint(&mut self, name: &str) -> Result<(), SinkError>;

    /// Execute an insert whose single result column is the generated key
    async fn insert_returning_id(&mut self, sql: &str, values: &[Value]) -> Result<i64, SinkError>;

    async fn commit(&mut self) -> Result<(), SinkError>;

    async fn rollback(&mut self) -> Result<(), SinkError>;
}
