use serde::{Deserialize, Serialize};

use crate::db::statement::quote_ident;

/// How a placeholder in a foreign-key column is turned into a parent identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    /// Placeholder is a 1-based position in the parent's source rows
    #[default]
    #[serde(alias = "ordinal_index")]
    Ordinal,
    /// Placeholder equals the parent's natural-key value
    NaturalKey,
}

/// One source field copied into one destination column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub source: String,
    pub column: String,
}

/// Destination table, optionally schema-qualified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    /// Quoted SQL form, e.g. `"public"."order"`
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A foreign-key column whose source values are placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    /// Source field carrying the placeholder (a key of the column map)
    pub source_column: String,
    /// Index of the parent spec in the owning [`LoadPlan`]
    pub parent: usize,
    pub mode: ResolutionMode,
}

/// Static description of how one destination table is loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLoadSpec {
    pub name: String,
    pub source_id: String,
    pub target: TableName,
    /// Ordered; the order is the insert column order
    pub column_map: Vec<ColumnMapping>,
    pub primary_key_column: String,
    pub natural_key_columns: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyRef>,
}

impl TableLoadSpec {
    /// Destination column names in insertion order
    pub fn destination_columns(&self) -> Vec<&str> {
        self.column_map.iter().map(|m| m.column.as_str()).collect()
    }

    /// Source field names in insertion order
    pub fn source_fields(&self) -> Vec<&str> {
        self.column_map.iter().map(|m| m.source.as_str()).collect()
    }

    /// Position of a source field within the column map
    #[cfg(test)]
    pub fn position_of_source(&self, source: &str) -> Option<usize> {
        self.column_map.iter().position(|m| m.source == source)
    }

    /// Position of a destination column within the column map
    pub fn position_of_column(&self, column: &str) -> Option<usize> {
        self.column_map.iter().position(|m| m.column == column)
    }

    /// Column-map positions of the natural-key columns, in natural-key order
    pub fn natural_key_positions(&self) -> Vec<usize> {
        self.natural_key_columns
            .iter()
            .filter_map(|c| self.position_of_column(c))
            .collect()
    }

    pub fn has_natural_key(&self) -> bool {
        !self.natural_key_columns.is_empty()
    }

    /// Rollback point name for one row of this table
    ///
    /// Table names may contain characters that are not valid in a bare
    /// identifier, so anything non-alphanumeric is replaced with `_`.
    pub fn savepoint_name(&self, ordinal: usize) -> String {
        let safe: String = self
            .target
            .to_string()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!(
            "{}_{}_row_{}",
            crate::config::SAVEPOINT_PREFIX,
            safe.to_ascii_lowercase(),
            ordinal
        )
    }
}

/// Validated, dependency-ordered list of table loads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    specs: Vec<TableLoadSpec>,
}

impl LoadPlan {
    /// Wrap specs that have already been validated by [`super::validate`]
    pub(super) fn from_validated(specs: Vec<TableLoadSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[TableLoadSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn spec(&self, index: usize) -> &TableLoadSpec {
        &self.specs[index]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.specs.iter().position(|s| s.name == name)
    }

    pub fn parent_of(&self, fk: &ForeignKeyRef) -> &TableLoadSpec {
        &self.specs[fk.parent]
    }
}
