use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::spec::{ColumnMapping, ResolutionMode};

/// Top-level plan file (JSON serialization format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    pub tables: Vec<TableEntry>,
}

/// One table of a plan file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    pub name: String,
    /// Dataset id; defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub columns: ColumnMap,
    pub primary_key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub natural_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyEntry>,
}

/// A foreign key of a plan file table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyEntry {
    pub column: String,
    pub parent: String,
    #[serde(default)]
    pub mode: ResolutionMode,
}

/// Source field -> destination column, in document order
///
/// A JSON object is the natural way to author the mapping, but
/// `serde_json::Map` does not keep insertion order, and the order here is the
/// insert column order. The custom impls below read and write the object
/// entry by entry and reject duplicate source fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap(pub Vec<ColumnMapping>);

impl Serialize for ColumnMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for mapping in &self.0 {
            map.serialize_entry(&mapping.source, &mapping.column)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ColumnMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, MapAccess, Visitor};
        use std::fmt;

        struct ColumnMapVisitor;

        impl<'de> Visitor<'de> for ColumnMapVisitor {
            type Value = ColumnMap;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an object mapping source fields to destination columns")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut mappings: Vec<ColumnMapping> = Vec::new();

                while let Some((source, column)) = map.next_entry::<String, String>()? {
                    let source = source.trim().to_string();
                    let column = column.trim().to_string();

                    if source.is_empty() || column.is_empty() {
                        return Err(de::Error::custom(format!(
                            "column names cannot be empty in mapping '{}' -> '{}'",
                            source, column
                        )));
                    }
                    if mappings.iter().any(|m| m.source == source) {
                        return Err(de::Error::custom(format!(
                            "duplicate source field '{}' in column mapping",
                            source
                        )));
                    }

                    mappings.push(ColumnMapping { source, column });
                }

                Ok(ColumnMap(mappings))
            }
        }

        deserializer.deserialize_map(ColumnMapVisitor)
    }
}

impl PlanFile {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse load plan JSON")
    }

    pub async fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read load plan {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Invalid load plan {}", path.display()))
    }
}
