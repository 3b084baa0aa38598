//! Read-only repair of placeholder datasets against the sink's current state
//!
//! Pass 1 re-identifies every source row by its natural key and rebuilds the
//! identifier maps. Pass 2 rewrites foreign-key placeholders in a copy of the
//! datasets using those maps. Nothing is written to the sink.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::{IdentityLookup, SinkError, TableStatements};
use crate::load::{IdIndexMap, LoadWarning, Lookup, ReferenceResolver, WarningKind};
use crate::plan::{LoadPlan, TableLoadSpec};
use crate::source::{Dataset, RowSource, Value, remove_dataset_csv, write_dataset_csv};

/// One table's corrected dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledTable {
    pub name: String,
    pub source_id: String,
    pub dataset: Dataset,
    /// Rows found in the sink by natural key
    pub identified: usize,
    /// Placeholders replaced with real identifiers
    pub rewritten: usize,
    /// Placeholders left as they were
    pub unresolved: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub tables: Vec<ReconciledTable>,
    /// Dataset ids whose table was skipped (missing or empty dataset)
    pub skipped: Vec<String>,
    pub warnings: Vec<LoadWarning>,
}

impl Reconciliation {
    pub fn table(&self, name: &str) -> Option<&ReconciledTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Write every corrected dataset as `<dir>/<source_id>.csv`
    ///
    /// Corrected files left in `dir` by an earlier run for skipped tables are
    /// deleted so they cannot be loaded again.
    pub async fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        let mut written = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let path = write_dataset_csv(dir, &table.source_id, &table.dataset).await?;
            info!(table = %table.name, path = %path.display(), "wrote corrected dataset");
            written.push(path);
        }
        for source_id in &self.skipped {
            if remove_dataset_csv(dir, source_id).await? {
                info!(dataset = %source_id, "removed stale corrected dataset");
            }
        }
        Ok(written)
    }
}

pub struct Reconciler<'a, L: ?Sized, R: ?Sized> {
    plan: &'a LoadPlan,
    source: &'a R,
    lookup: &'a mut L,
}

impl<'a, L, R> Reconciler<'a, L, R>
where
    L: IdentityLookup + ?Sized,
    R: RowSource + ?Sized,
{
    pub fn new(plan: &'a LoadPlan, source: &'a R, lookup: &'a mut L) -> Self {
        Self {
            plan,
            source,
            lookup,
        }
    }

    pub async fn run(&mut self) -> Result<Reconciliation> {
        let plan = self.plan;
        let mut warnings = Vec::new();
        let mut maps = vec![IdIndexMap::new(); plan.len()];
        let mut datasets = Vec::with_capacity(plan.len());
        let mut skipped = Vec::new();

        // Pass 1: rebuild identifier maps from the sink
        for (index, spec) in plan.specs().iter().enumerate() {
            let dataset = self
                .source
                .rows(&spec.source_id)
                .await
                .with_context(|| {
                    format!("Failed to read dataset '{}' for {}", spec.source_id, spec.name)
                })?;

            let dataset = match dataset {
                Some(dataset) if !dataset.is_empty() => dataset,
                Some(_) => {
                    info!(table = %spec.name, "dataset '{}' has no rows, table skipped", spec.source_id);
                    datasets.push(None);
                    skipped.push(spec.source_id.clone());
                    continue;
                }
                None => {
                    push_warning(
                        &mut warnings,
                        LoadWarning::table(
                            &spec.name,
                            WarningKind::MissingDataset,
                            format!("dataset '{}' not found, table skipped", spec.source_id),
                        ),
                    );
                    datasets.push(None);
                    skipped.push(spec.source_id.clone());
                    continue;
                }
            };

            let map = self.identify(spec, &dataset, &maps, &mut warnings).await?;
            maps[index] = map;
            datasets.push(Some(dataset));
        }

        // Pass 2: rewrite placeholders
        let resolver = ReferenceResolver::new(plan, &maps);
        let mut tables = Vec::new();
        for (index, spec) in plan.specs().iter().enumerate() {
            let Some(mut dataset) = datasets[index].take() else {
                continue;
            };

            let mut rewritten = 0;
            let mut unresolved = 0;
            for fk in &spec.foreign_keys {
                let Some(column) = dataset.header_index(&fk.source_column) else {
                    continue;
                };
                for (ordinal, record) in dataset.records_mut().iter_mut().enumerate() {
                    let Some(placeholder) = record.values[column].clone() else {
                        continue;
                    };
                    match resolver.lookup(fk, &placeholder) {
                        Lookup::Found(id) => {
                            record.values[column] = Some(id.to_string());
                            rewritten += 1;
                        }
                        miss => {
                            unresolved += 1;
                            let warning =
                                resolver.miss_warning(spec, fk, ordinal, &placeholder, miss);
                            push_warning(&mut warnings, warning);
                        }
                    }
                }
            }

            info!(
                table = %spec.name,
                identified = maps[index].len(),
                rewritten,
                unresolved,
                "table reconciled"
            );
            tables.push(ReconciledTable {
                name: spec.name.clone(),
                source_id: spec.source_id.clone(),
                dataset,
                identified: maps[index].len(),
                rewritten,
                unresolved,
            });
        }

        Ok(Reconciliation {
            tables,
            skipped,
            warnings,
        })
    }

    /// Look up each row's actual identifier by natural key
    async fn identify(
        &mut self,
        spec: &TableLoadSpec,
        dataset: &Dataset,
        maps: &[IdIndexMap],
        warnings: &mut Vec<LoadWarning>,
    ) -> Result<IdIndexMap> {
        let plan = self.plan;
        let mut map = IdIndexMap::new();

        if !spec.has_natural_key() {
            push_warning(
                warnings,
                LoadWarning::table(
                    &spec.name,
                    WarningKind::UnidentifiableRow,
                    format!(
                        "no natural key declared, {} rows cannot be re-identified",
                        dataset.len()
                    ),
                ),
            );
            return Ok(map);
        }

        let columns = self
            .lookup
            .describe_table(&spec.target)
            .await
            .with_context(|| format!("Failed to describe table {}", spec.target))?;
        if columns.is_empty() {
            bail!("Table '{}' not found or has no columns", spec.target);
        }
        let statements = TableStatements::build(spec, self.lookup.dialect(), &columns);
        let resolver = ReferenceResolver::new(plan, maps);

        for (ordinal, row) in dataset.rows().enumerate() {
            // Resolution warnings are reported once, by pass 2
            let resolution = resolver.resolve(spec, row, ordinal);
            let Some(key) = resolution.natural_key(spec) else {
                continue;
            };
            if key.iter().all(Option::is_none) {
                push_warning(
                    warnings,
                    LoadWarning::row(
                        &spec.name,
                        ordinal,
                        WarningKind::UnidentifiableRow,
                        format!("natural key is blank: {}", row.render()),
                    ),
                );
                continue;
            }

            let pairs: Vec<(&str, &Value)> = spec
                .natural_key_columns
                .iter()
                .map(String::as_str)
                .zip(key.iter())
                .collect();
            let (sql, binds) = statements.natural_key_lookup(&pairs);

            match self.lookup.select_id(&sql, &binds).await {
                Ok(Some(id)) => map.record(ordinal, Some(key), id),
                Ok(None) => push_warning(
                    warnings,
                    LoadWarning::row(
                        &spec.name,
                        ordinal,
                        WarningKind::UnidentifiableRow,
                        format!("no row in {} matches natural key: {}", spec.target, row.render()),
                    ),
                ),
                Err(SinkError::Rejected { kind, message }) => push_warning(
                    warnings,
                    LoadWarning::row(
                        &spec.name,
                        ordinal,
                        WarningKind::UnidentifiableRow,
                        format!("natural key lookup failed, {} ({}): {}", kind, message, row.render()),
                    ),
                ),
                Err(fatal) => {
                    return Err(anyhow::Error::from(fatal))
                        .with_context(|| format!("Failed to look up row {} of {}", ordinal, spec.name));
                }
            }
        }

        Ok(map)
    }
}

fn push_warning(warnings: &mut Vec<LoadWarning>, warning: LoadWarning) {
    warning.log();
    warnings.push(warning);
}
