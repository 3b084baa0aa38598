use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Ordinal placeholder that is not a positive integer
    UnparsablePlaceholder,
    /// Placeholder pointing at a parent row that has no identifier
    UnresolvedReference,
    /// Unique conflict that could not be matched to an existing row
    DuplicateRow,
    /// Constraint or data error other than a unique conflict
    RowRejected,
    MissingDataset,
    /// Row the reconciler could not find in the sink
    UnidentifiableRow,
}

/// A recoverable problem attached to a table and, usually, a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadWarning {
    pub table: String,
    /// 0-based position of the row in its dataset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<usize>,
    pub kind: WarningKind,
    pub message: String,
}

impl LoadWarning {
    pub fn row(
        table: impl Into<String>,
        ordinal: usize,
        kind: WarningKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            ordinal: Some(ordinal),
            kind,
            message: message.into(),
        }
    }

    pub fn table(table: impl Into<String>, kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ordinal: None,
            kind,
            message: message.into(),
        }
    }

    /// Emit through tracing
    pub fn log(&self) {
        match self.ordinal {
            Some(ordinal) => {
                tracing::warn!(table = %self.table, ordinal, kind = ?self.kind, "{}", self.message)
            }
            None => tracing::warn!(table = %self.table, kind = ?self.kind, "{}", self.message),
        }
    }
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ordinal {
            Some(ordinal) => write!(f, "{}[{}]: {}", self.table, ordinal, self.message),
            None => write!(f, "{}: {}", self.table, self.message),
        }
    }
}
