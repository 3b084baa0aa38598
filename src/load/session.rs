use anyhow::{Context, Result, bail};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::id_map::IdIndexMap;
use super::report::{LoadReport, TableReport, TableStatus};
use super::resolver::ReferenceResolver;
use super::row_loader::{RowLoader, RowOutcome, SkipReason};
use super::warning::{LoadWarning, WarningKind};
use crate::db::{RelationalSink, TableStatements};
use crate::plan::LoadPlan;
use crate::source::RowSource;
use crate::telemetry::{TableStats, TelemetryEvent};

/// One full load run: every table of the plan inside a single transaction
///
/// Tables load in plan order and rows in source order. Row-level failures
/// become warnings; any other error rolls back the whole run.
pub struct LoadSession<'a, S: ?Sized, R: ?Sized> {
    plan: &'a LoadPlan,
    source: &'a R,
    sink: &'a mut S,
    telemetry: Option<mpsc::UnboundedSender<TelemetryEvent>>,
    maps: Vec<IdIndexMap>,
    tables: Vec<TableReport>,
    warnings: Vec<LoadWarning>,
}

impl<'a, S, R> LoadSession<'a, S, R>
where
    S: RelationalSink + ?Sized,
    R: RowSource + ?Sized,
{
    pub fn new(plan: &'a LoadPlan, source: &'a R, sink: &'a mut S) -> Self {
        Self {
            plan,
            source,
            sink,
            telemetry: None,
            maps: vec![IdIndexMap::new(); plan.len()],
            tables: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: mpsc::UnboundedSender<TelemetryEvent>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Identifier map of a table, by spec name
    #[cfg(test)]
    pub fn id_map(&self, name: &str) -> Option<&IdIndexMap> {
        self.plan.index_of(name).map(|i| &self.maps[i])
    }

    /// Load every table and commit once
    ///
    /// On error the transaction is rolled back before the error is returned.
    pub async fn run(&mut self) -> Result<LoadReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, tables = self.plan.len(), "starting load session");

        self.sink
            .begin()
            .await
            .context("Failed to open the load transaction")?;

        if let Err(e) = self.load_all().await {
            error!(%run_id, "load failed, rolling back: {:#}", e);
            if let Err(rollback_err) = self.sink.rollback().await {
                error!(%run_id, "rollback failed: {:#}", rollback_err);
            }
            return Err(e);
        }

        self.sink
            .commit()
            .await
            .context("Failed to commit the load transaction")?;

        let report = LoadReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            tables: std::mem::take(&mut self.tables),
            warnings: std::mem::take(&mut self.warnings),
        };
        let totals = report.totals();
        info!(
            %run_id,
            attempted = totals.attempted,
            inserted = totals.inserted,
            matched_existing = totals.matched_existing,
            skipped = totals.skipped(),
            warnings = report.warnings.len(),
            "load committed"
        );
        Ok(report)
    }

    async fn load_all(&mut self) -> Result<()> {
        for index in 0..self.plan.len() {
            self.load_table(index).await?;
        }
        Ok(())
    }

    async fn load_table(&mut self, index: usize) -> Result<()> {
        let plan = self.plan;
        let spec = plan.spec(index);

        let dataset = self
            .source
            .rows(&spec.source_id)
            .await
            .with_context(|| format!("Failed to read dataset '{}' for {}", spec.source_id, spec.name))?;

        let Some(dataset) = dataset else {
            self.warn(LoadWarning::table(
                &spec.name,
                WarningKind::MissingDataset,
                format!("dataset '{}' not found, table skipped", spec.source_id),
            ));
            self.skip_table(index, TableStatus::MissingDataset);
            return Ok(());
        };

        if dataset.is_empty() {
            info!(table = %spec.name, "dataset '{}' has no rows, table skipped", spec.source_id);
            self.skip_table(index, TableStatus::EmptyDataset);
            return Ok(());
        }

        let columns = self
            .sink
            .describe_table(&spec.target)
            .await
            .with_context(|| format!("Failed to describe table {}", spec.target))?;
        if columns.is_empty() {
            bail!("Table '{}' not found or has no columns", spec.target);
        }
        for column in spec
            .destination_columns()
            .into_iter()
            .chain(std::iter::once(spec.primary_key_column.as_str()))
        {
            if !columns.iter().any(|c| c.name == column) {
                bail!(
                    "Column '{}' of {} does not exist in table '{}'",
                    column,
                    spec.name,
                    spec.target
                );
            }
        }
        for field in spec.source_fields() {
            if dataset.header_index(field).is_none() {
                warn!(
                    table = %spec.name,
                    "dataset '{}' has no field '{}'; its column is loaded as no value",
                    spec.source_id,
                    field
                );
            }
        }

        let statements = TableStatements::build(spec, self.sink.dialect(), &columns);
        let loader = RowLoader::new(spec, &statements);
        let resolver = ReferenceResolver::new(plan, &self.maps);
        let mut map = IdIndexMap::new();
        let mut stats = TableStats::new();

        info!(table = %spec.name, rows = dataset.len(), "loading table {}", spec.target);
        emit(
            &self.telemetry,
            TelemetryEvent::TableStarted {
                table: spec.name.clone(),
                rows: dataset.len() as u64,
            },
        );

        for (ordinal, row) in dataset.rows().enumerate() {
            let resolution = resolver.resolve(spec, row, ordinal);
            for warning in &resolution.warnings {
                warning.log();
            }
            self.warnings.extend(resolution.warnings.iter().cloned());

            let outcome = loader
                .load(&mut *self.sink, ordinal, &resolution.values)
                .await
                .with_context(|| format!("Failed to load row {} of {}", ordinal, spec.name))?;

            match &outcome {
                RowOutcome::Inserted(id) | RowOutcome::ResolvedExisting(id) => {
                    map.record(ordinal, resolution.natural_key(spec), *id);
                }
                RowOutcome::Skipped(SkipReason::Duplicate { message }) => {
                    let warning = LoadWarning::row(
                        &spec.name,
                        ordinal,
                        WarningKind::DuplicateRow,
                        format!(
                            "duplicate row not matched to an existing row ({}): {}",
                            message,
                            row.render()
                        ),
                    );
                    warning.log();
                    self.warnings.push(warning);
                }
                RowOutcome::Skipped(SkipReason::Rejected { kind, message }) => {
                    let warning = LoadWarning::row(
                        &spec.name,
                        ordinal,
                        WarningKind::RowRejected,
                        format!("{} ({}): {}", kind, message, row.render()),
                    );
                    warning.log();
                    self.warnings.push(warning);
                }
            }

            stats.record(outcome.kind());
            emit(
                &self.telemetry,
                TelemetryEvent::RowFinished {
                    outcome: outcome.kind(),
                },
            );
        }

        info!(
            table = %spec.name,
            attempted = stats.attempted,
            inserted = stats.inserted,
            matched_existing = stats.matched_existing,
            skipped_duplicate = stats.skipped_duplicate,
            skipped_error = stats.skipped_error,
            "table finished"
        );
        emit(
            &self.telemetry,
            TelemetryEvent::TableCompleted {
                table: spec.name.clone(),
                stats,
            },
        );

        self.maps[index] = map;
        self.tables
            .push(TableReport::new(spec, TableStatus::Loaded, stats));
        Ok(())
    }

    fn skip_table(&mut self, index: usize, status: TableStatus) {
        let spec = self.plan.spec(index);
        emit(
            &self.telemetry,
            TelemetryEvent::TableCompleted {
                table: spec.name.clone(),
                stats: TableStats::new(),
            },
        );
        self.tables
            .push(TableReport::new(spec, status, TableStats::new()));
    }

    fn warn(&mut self, warning: LoadWarning) {
        warning.log();
        self.warnings.push(warning);
    }
}

fn emit(telemetry: &Option<mpsc::UnboundedSender<TelemetryEvent>>, event: TelemetryEvent) {
    if let Some(tx) = telemetry {
        // The receiver only drives progress display
        let _ = tx.send(event);
    }
}
