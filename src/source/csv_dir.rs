use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{Dataset, RowSource};
use crate::config::CSV_EXTENSION;

/// RowSource over a directory of `<dataset>.csv` files
#[derive(Debug, Clone)]
pub struct CsvDirectorySource {
    root: PathBuf,
}

impl CsvDirectorySource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// File backing a dataset id
    pub fn path_for(&self, dataset_id: &str) -> PathBuf {
        dataset_path(&self.root, dataset_id)
    }
}

fn dataset_path(root: &Path, dataset_id: &str) -> PathBuf {
    let suffix = format!(".{}", CSV_EXTENSION);
    if dataset_id.to_ascii_lowercase().ends_with(&suffix) {
        root.join(dataset_id)
    } else {
        root.join(format!("{}{}", dataset_id, suffix))
    }
}

#[async_trait]
impl RowSource for CsvDirectorySource {
    async fn rows(&self, dataset_id: &str) -> Result<Option<Dataset>> {
        let path = self.path_for(dataset_id);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let dataset = Dataset::parse_csv(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(dataset))
    }
}

/// Write a dataset as CSV under `dir`, keeping its header order
pub async fn write_dataset_csv(dir: &Path, dataset_id: &str, dataset: &Dataset) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(dataset.headers())
        .context("Failed to encode CSV header")?;
    for record in dataset.records() {
        writer
            .write_record(record.values.iter().map(|v| v.as_deref().unwrap_or("")))
            .context("Failed to encode CSV record")?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {}", e))?;

    let path = dataset_path(dir, dataset_id);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(path)
}

/// Delete a dataset's CSV under `dir`; returns false when there was none
pub async fn remove_dataset_csv(dir: &Path, dataset_id: &str) -> Result<bool> {
    let path = dataset_path(dir, dataset_id);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let source = CsvDirectorySource::new(dir.path());
        assert!(source.rows("nothing_here").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_byte_file_is_empty_dataset() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("empty.csv"), b"").await.unwrap();

        let source = CsvDirectorySource::new(dir.path());
        let dataset = source.rows("empty").await.unwrap().unwrap();
        assert!(dataset.is_empty());
    }

    #[tokio::test]
    async fn test_dataset_id_with_extension() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("color.csv"), b"name\nRed\n")
            .await
            .unwrap();

        let source = CsvDirectorySource::new(dir.path());
        let by_id = source.rows("color").await.unwrap().unwrap();
        let by_file = source.rows("color.csv").await.unwrap().unwrap();
        assert_eq!(by_id, by_file);
        assert_eq!(by_id.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_csv_is_error() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("bad.csv"), b"name\nab\xff\n")
            .await
            .unwrap();

        let source = CsvDirectorySource::new(dir.path());
        assert!(source.rows("bad").await.is_err());
    }

    #[tokio::test]
    async fn test_write_then_read_keeps_headers_and_blanks() {
        let dir = TempDir::new().unwrap();
        let mut dataset = Dataset::new(vec!["vin".to_string(), "color_id".to_string()]);
        dataset.push_raw(&["VIN1", "3"]);
        dataset.push_raw(&["VIN2", ""]);

        let path = write_dataset_csv(dir.path(), "car", &dataset).await.unwrap();
        assert_eq!(path, dir.path().join("car.csv"));

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "vin,color_id\nVIN1,3\nVIN2,\n");
    }
}
