use anyhow::Result;
use tracing::debug;

use crate::db::{RejectionKind, RelationalSink, SinkError, TableStatements};
use crate::plan::TableLoadSpec;
use crate::source::Value;
use crate::telemetry::OutcomeKind;

/// Why a row ended without an identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Unique conflict with no natural-key match
    Duplicate { message: String },
    /// Any other constraint or data error
    Rejected { kind: RejectionKind, message: String },
}

/// Classified result of loading one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Inserted(i64),
    /// Unique conflict redirected to the existing row with the same natural key
    ResolvedExisting(i64),
    Skipped(SkipReason),
}

impl RowOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            RowOutcome::Inserted(_) => OutcomeKind::Inserted,
            RowOutcome::ResolvedExisting(_) => OutcomeKind::MatchedExisting,
            RowOutcome::Skipped(SkipReason::Duplicate { .. }) => OutcomeKind::SkippedDuplicate,
            RowOutcome::Skipped(SkipReason::Rejected { .. }) => OutcomeKind::SkippedError,
        }
    }
}

/// Inserts resolved rows of one table, each inside its own savepoint
///
/// Row-level rejections come back as [`RowOutcome::Skipped`]; an `Err` is
/// always fatal for the session.
pub struct RowLoader<'a> {
    spec: &'a TableLoadSpec,
    statements: &'a TableStatements,
}

impl<'a> RowLoader<'a> {
    pub fn new(spec: &'a TableLoadSpec, statements: &'a TableStatements) -> Self {
        Self { spec, statements }
    }

    pub async fn load<S>(&self, sink: &mut S, ordinal: usize, values: &[Value]) -> Result<RowOutcome>
    where
        S: RelationalSink + ?Sized,
    {
        let savepoint = self.spec.savepoint_name(ordinal);
        sink.savepoint(&savepoint).await?;

        let outcome = match sink.insert_returning_id(&self.statements.insert, values).await {
            Ok(id) => RowOutcome::Inserted(id),
            Err(SinkError::Rejected {
                kind: RejectionKind::UniqueViolation,
                message,
            }) => {
                sink.rollback_to_savepoint(&savepoint).await?;
                self.match_existing(sink, &savepoint, values, message)
                    .await?
            }
            Err(SinkError::Rejected { kind, message }) => {
                sink.rollback_to_savepoint(&savepoint).await?;
                RowOutcome::Skipped(SkipReason::Rejected { kind, message })
            }
            Err(fatal) => return Err(fatal.into()),
        };

        sink.release_savepoint(&savepoint).await?;
        debug!(table = %self.spec.name, ordinal, outcome = ?outcome, "row finished");
        Ok(outcome)
    }

    /// After a unique conflict, find the existing row by natural key
    async fn match_existing<S>(
        &self,
        sink: &mut S,
        savepoint: &str,
        values: &[Value],
        message: String,
    ) -> Result<RowOutcome>
    where
        S: RelationalSink + ?Sized,
    {
        if !self.spec.has_natural_key() {
            return Ok(RowOutcome::Skipped(SkipReason::Duplicate { message }));
        }

        let key: Vec<(&str, &Value)> = self
            .spec
            .natural_key_columns
            .iter()
            .zip(self.spec.natural_key_positions())
            .map(|(column, position)| (column.as_str(), &values[position]))
            .collect();
        let (sql, binds) = self.statements.natural_key_lookup(&key);

        match sink.select_id(&sql, &binds).await {
            Ok(Some(id)) => Ok(RowOutcome::ResolvedExisting(id)),
            Ok(None) => Ok(RowOutcome::Skipped(SkipReason::Duplicate { message })),
            Err(SinkError::Rejected { kind, message }) => {
                // A failed lookup leaves a Postgres transaction aborted
                sink.rollback_to_savepoint(savepoint).await?;
                Ok(RowOutcome::Skipped(SkipReason::Rejected { kind, message }))
            }
            Err(fatal) => Err(fatal.into()),
        }
    }
}
