use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::warning::LoadWarning;
use crate::plan::TableLoadSpec;
use crate::telemetry::TableStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Loaded,
    MissingDataset,
    EmptyDataset,
}

/// Outcome of one table's pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    pub name: String,
    pub table: String,
    pub status: TableStatus,
    #[serde(flatten)]
    pub stats: TableStats,
}

impl TableReport {
    pub fn new(spec: &TableLoadSpec, status: TableStatus, stats: TableStats) -> Self {
        Self {
            name: spec.name.clone(),
            table: spec.target.to_string(),
            status,
            stats,
        }
    }
}

/// Everything a completed session exposes for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableReport>,
    pub warnings: Vec<LoadWarning>,
}

impl LoadReport {
    pub fn totals(&self) -> TableStats {
        let mut totals = TableStats::new();
        for table in &self.tables {
            totals.absorb(&table.stats);
        }
        totals
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
