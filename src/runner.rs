//! High-level runner API for the referential loader.
//!
//! This module wraps plan loading, connection setup, the load session, the
//! reconciler and progress display behind a few entry points. It is the API
//! used by the CLI.

use anyhow::{Context, Result};
use derive_builder::Builder;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::resolve_connect_target;
use crate::db::SqlSink;
use crate::load::LoadSession;
use crate::plan::LoadPlan;
use crate::reconcile::Reconciler;
use crate::source::CsvDirectorySource;
use crate::telemetry::{ProgressStats, TelemetryEvent};

pub use crate::load::{LoadReport, LoadWarning, TableReport, TableStatus, WarningKind};
pub use crate::reconcile::{ReconciledTable, Reconciliation};
pub use crate::telemetry::TableStats;

/// Arguments for a load run
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct LoadArgs {
    /// JSON load plan
    pub plan: PathBuf,
    /// Directory holding one `<dataset>.csv` per table
    pub data_dir: PathBuf,
    /// Falls back to the `DB_*` environment variables when unset
    #[builder(default, setter(into, strip_option))]
    pub database_url: Option<String>,
    /// Where to write the JSON report
    #[builder(default, setter(into, strip_option))]
    pub report_path: Option<PathBuf>,
    #[builder(default)]
    pub quiet: bool,
}

/// Arguments for a reconcile run
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ReconcileArgs {
    pub plan: PathBuf,
    pub data_dir: PathBuf,
    /// Corrected CSVs are written here
    #[builder(default = "PathBuf::from(crate::config::DEFAULT_CORRECTED_DIR)")]
    pub output_dir: PathBuf,
    #[builder(default, setter(into, strip_option))]
    pub database_url: Option<String>,
}

/// Result of a reconcile run
#[derive(Debug)]
pub struct ReconcileResult {
    pub reconciliation: Reconciliation,
    pub written: Vec<PathBuf>,
}

/// One table of a validated plan, for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTable {
    pub name: String,
    pub table: String,
    pub source: String,
    pub columns: usize,
    pub natural_key: Vec<String>,
    /// Parent spec names, in foreign-key order
    pub parents: Vec<String>,
}

/// Read and validate a plan without touching the database
///
/// Returns the tables in load order.
pub async fn check_plan(path: impl AsRef<Path>) -> Result<Vec<PlannedTable>> {
    let plan = LoadPlan::read(path).await?;
    Ok(plan
        .specs()
        .iter()
        .map(|spec| PlannedTable {
            name: spec.name.clone(),
            table: spec.target.to_string(),
            source: spec.source_id.clone(),
            columns: spec.column_map.len(),
            natural_key: spec.natural_key_columns.clone(),
            parents: spec
                .foreign_keys
                .iter()
                .map(|fk| plan.parent_of(fk).name.clone())
                .collect(),
        })
        .collect())
}

/// Run a full load
///
/// Every table of the plan is loaded inside one transaction which commits
/// only if no fatal error occurs. Row-level problems are returned as
/// warnings in the report.
///
/// # Example
///
/// ```no_run
/// use referential_loader::runner::{LoadArgsBuilder, run_load};
///
/// # async fn example() -> anyhow::Result<()> {
/// let args = LoadArgsBuilder::default()
///     .plan("plans/dealership.json")
///     .data_dir("data")
///     .database_url("postgres://loader@localhost/dealership")
///     .quiet(true)
///     .build()?;
///
/// let report = run_load(args).await?;
/// println!("{} warnings", report.warnings.len());
/// # Ok(())
/// # }
/// ```
pub async fn run_load(args: LoadArgs) -> Result<LoadReport> {
    let plan = LoadPlan::read(&args.plan).await?;
    let target = resolve_connect_target(args.database_url)?;
    let mut sink = SqlSink::connect_to(&target).await?;
    let source = CsvDirectorySource::new(&args.data_dir);

    let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<TelemetryEvent>();
    let progress = setup_progress_tracking(plan.len(), args.quiet, telemetry_rx);

    // The session owns the only sender, so the channel closes when it is dropped
    let result = {
        let mut session = LoadSession::new(&plan, &source, &mut sink).with_telemetry(telemetry_tx);
        session.run().await
    };

    if let Some(jh) = progress {
        let _ = jh.await;
    }
    let report = result?;

    if let Err(e) = sink.close().await {
        tracing::warn!("Failed to close database connection: {:#}", e);
    }

    if let Some(path) = &args.report_path {
        write_report(&report, path).await?;
        info!(path = %path.display(), "wrote load report");
    }

    Ok(report)
}

/// Rebuild identifiers from the database and write corrected datasets
///
/// Performs no writes to the database.
pub async fn run_reconcile(args: ReconcileArgs) -> Result<ReconcileResult> {
    let plan = LoadPlan::read(&args.plan).await?;
    let target = resolve_connect_target(args.database_url)?;
    let mut sink = SqlSink::connect_to(&target).await?;
    let source = CsvDirectorySource::new(&args.data_dir);

    let reconciliation = Reconciler::new(&plan, &source, &mut sink).run().await?;
    if let Err(e) = sink.close().await {
        tracing::warn!("Failed to close database connection: {:#}", e);
    }

    let written = reconciliation.write_to(&args.output_dir).await?;
    Ok(ReconcileResult {
        reconciliation,
        written,
    })
}

async fn write_report(report: &LoadReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, report.to_json()?)
        .await
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

/// One line per finished table, printed above the progress bars
fn table_summary(table: &str, stats: &TableStats) -> String {
    format!(
        "{}: {} attempted, {} inserted, {} existing, {} skipped",
        table,
        stats.attempted,
        stats.inserted,
        stats.matched_existing,
        stats.skipped()
    )
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// Drive progress bars from session telemetry
fn setup_progress_tracking(
    table_count: usize,
    quiet: bool,
    mut telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
) -> Option<tokio::task::JoinHandle<()>> {
    if quiet {
        return None;
    }

    let multi_progress = MultiProgress::new();
    let tables_bar = multi_progress.add(ProgressBar::new(table_count as u64));
    tables_bar.set_style(bar_style(
        "[{elapsed_precise}] Tables: [{bar:30.cyan/blue}] {pos}/{len} | {msg}",
    ));
    let rows_bar = multi_progress.add(ProgressBar::new(0));
    rows_bar.set_style(bar_style(
        "[{elapsed_precise}] Rows:   [{bar:30.green/blue}] {human_pos}/{human_len} ({percent}%) | {msg}",
    ));

    Some(tokio::spawn(async move {
        let mut stats = ProgressStats::new();

        while let Some(event) = telemetry_rx.recv().await {
            stats.update(&event);

            match &event {
                TelemetryEvent::TableStarted { table, rows } => {
                    rows_bar.set_length(*rows);
                    rows_bar.set_position(0);
                    rows_bar.set_message(table.clone());
                }
                TelemetryEvent::RowFinished { .. } => {
                    rows_bar.set_position(stats.current_finished);
                }
                TelemetryEvent::TableCompleted { table, stats: table_stats } => {
                    tables_bar.set_position(stats.tables_completed as u64);
                    let _ = multi_progress.println(table_summary(table, table_stats));
                }
            }
            tables_bar.set_message(format!(
                "resolved: {}, skipped: {}",
                stats.totals.resolved(),
                stats.skipped()
            ));
        }

        rows_bar.finish_and_clear();
        // Leaves the bar where it stopped if the run aborted early
        tables_bar.abandon();
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::OutcomeKind;

    #[test]
    fn test_table_summary_reports_completed_counts() {
        let mut stats = TableStats::new();
        stats.record(OutcomeKind::Inserted);
        stats.record(OutcomeKind::MatchedExisting);
        stats.record(OutcomeKind::SkippedError);

        assert_eq!(
            table_summary("Color", &stats),
            "Color: 3 attempted, 1 inserted, 1 existing, 1 skipped"
        );
    }
}
