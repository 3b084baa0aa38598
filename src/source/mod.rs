//! Row sources - named datasets of field -> value records

pub mod csv_dir;
#[cfg(test)]
pub mod memory;

use anyhow::{Context, Result};
use async_trait::async_trait;

pub use csv_dir::{CsvDirectorySource, remove_dataset_csv, write_dataset_csv};
#[cfg(test)]
pub use memory::MemorySource;

/// A normalized field value: `None` means "no value"
pub type Value = Option<String>;

/// Blank (empty or whitespace-only) and absent fields both become `None`
pub fn normalize(raw: &str) -> Value {
    if raw.trim().is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Supplies ordered datasets by id
///
/// `Ok(None)` means the dataset does not exist, which callers treat as a
/// skippable table. `Err` means the source itself failed.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn rows(&self, dataset_id: &str) -> Result<Option<Dataset>>;
}

/// One record, values aligned with its dataset's headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub values: Vec<Value>,
}

/// Header row plus ordered records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    headers: Vec<String>,
    records: Vec<Record>,
}

impl Dataset {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            records: Vec::new(),
        }
    }

    /// Append a record of raw strings; missing trailing fields become `None`
    pub fn push_raw<S: AsRef<str>>(&mut self, raw: &[S]) {
        let values = (0..self.headers.len())
            .map(|i| raw.get(i).and_then(|v| normalize(v.as_ref())))
            .collect();
        self.records.push(Record { values });
    }

    /// Parse CSV bytes whose first record is the header
    pub fn parse_csv(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }

        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers: Vec<String> = csv_reader
            .headers()
            .context("Failed to parse CSV header")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut dataset = Self::new(headers);
        for (line, result) in csv_reader.records().enumerate() {
            // +2: 1-based, and the header occupies the first line
            let record =
                result.with_context(|| format!("Failed to parse CSV record on line {}", line + 2))?;
            let fields: Vec<&str> = record.iter().collect();
            dataset.push_raw(&fields);
        }

        Ok(dataset)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn header_index(&self, field: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == field)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    #[cfg(test)]
    pub fn row(&self, ordinal: usize) -> Option<RowView<'_>> {
        self.records.get(ordinal).map(|record| RowView {
            headers: &self.headers,
            record,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> {
        self.records.iter().map(|record| RowView {
            headers: &self.headers,
            record,
        })
    }
}

/// Borrowed view of one record with name-based access
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    headers: &'a [String],
    record: &'a Record,
}

impl<'a> RowView<'a> {
    /// Normalized value of a field; absent fields are `None`
    pub fn get(&self, field: &str) -> Option<&'a str> {
        let index = self.headers.iter().position(|h| h == field)?;
        self.record.values.get(index)?.as_deref()
    }

    /// `field=value` pairs for warnings, long values shortened
    pub fn render(&self) -> String {
        let limit = crate::config::WARNING_VALUE_PREVIEW;
        let pairs: Vec<String> = self
            .headers
            .iter()
            .zip(self.record.values.iter())
            .map(|(h, v)| match v {
                Some(v) if v.chars().count() > limit => {
                    let short: String = v.chars().take(limit).collect();
                    format!("{}={}...", h, short)
                }
                Some(v) => format!("{}={}", h, v),
                None => format!("{}=<none>", h),
            })
            .collect();
        format!("{{{}}}", pairs.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_blank_values() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("   "), None);
        assert_eq!(normalize(" x "), Some(" x ".to_string()));
    }

    #[test]
    fn test_parse_csv_normalizes_once() {
        let dataset = Dataset::parse_csv(b"name,code,notes\nRed,R,\nBlue,,   \nGreen\n").unwrap();

        assert_eq!(dataset.headers(), &["name", "code", "notes"]);
        assert_eq!(dataset.len(), 3);

        let red = dataset.row(0).unwrap();
        assert_eq!(red.get("name"), Some("Red"));
        assert_eq!(red.get("notes"), None);

        let blue = dataset.row(1).unwrap();
        assert_eq!(blue.get("code"), None);
        assert_eq!(blue.get("notes"), None);

        // Short record: trailing fields are absent
        let green = dataset.row(2).unwrap();
        assert_eq!(green.get("code"), None);
        assert_eq!(green.get("missing_field"), None);
    }

    #[test]
    fn test_parse_empty_bytes() {
        let dataset = Dataset::parse_csv(b"").unwrap();
        assert!(dataset.is_empty());
        assert!(dataset.headers().is_empty());
    }

    #[test]
    fn test_header_only_is_empty_dataset() {
        let dataset = Dataset::parse_csv(b"name,code\n").unwrap();
        assert!(dataset.is_empty());
        assert_eq!(dataset.headers().len(), 2);
    }

    #[test]
    fn test_render_truncates_long_values() {
        let mut dataset = Dataset::new(vec!["comment".to_string(), "rating".to_string()]);
        let long = "x".repeat(100);
        dataset.push_raw(&[long.as_str(), ""]);

        let rendered = dataset.row(0).unwrap().render();
        assert!(rendered.starts_with("{comment=xxxx"));
        assert!(rendered.contains("..."));
        assert!(rendered.ends_with("rating=<none>}"));
    }
}
