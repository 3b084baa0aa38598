use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use super::{Dataset, RowSource};

/// RowSource over datasets held in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    datasets: HashMap<String, Dataset>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dataset_id: impl Into<String>, dataset: Dataset) {
        self.datasets.insert(dataset_id.into(), dataset);
    }

    /// Convenience for tests and fixtures: parse CSV text into a dataset
    pub fn with_csv(mut self, dataset_id: &str, csv_text: &str) -> Result<Self> {
        self.insert(dataset_id, Dataset::parse_csv(csv_text.as_bytes())?);
        Ok(self)
    }
}

impl FromIterator<(String, Dataset)> for MemorySource {
    fn from_iter<I: IntoIterator<Item = (String, Dataset)>>(iter: I) -> Self {
        Self {
            datasets: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl RowSource for MemorySource {
    async fn rows(&self, dataset_id: &str) -> Result<Option<Dataset>> {
        Ok(self.datasets.get(dataset_id).cloned())
    }
}
