use clap::{Parser, Subcommand};
use referential_loader::runner::{
    LoadArgsBuilder, LoadReport, ReconcileArgsBuilder, TableStatus, check_plan, run_load,
    run_reconcile,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Clone)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Load every table of a plan in one transaction
    Load {
        /// JSON load plan
        #[arg(short, long)]
        plan: PathBuf,

        /// Directory containing one <dataset>.csv per table
        #[arg(short, long)]
        data_dir: PathBuf,

        /// postgres:// or sqlite: URL (falls back to DB_HOST/DB_PORT/DB_NAME/DB_USER/DB_PASSWORD)
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,

        /// Write the load report as JSON to this file
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Validate the plan and show the load order without connecting
        #[arg(long)]
        dry_run: bool,

        /// Quiet mode - minimal output, only show summary
        #[arg(short, long)]
        quiet: bool,
    },

    /// Re-identify loaded rows and write corrected datasets (read-only)
    Reconcile {
        /// JSON load plan
        #[arg(short, long)]
        plan: PathBuf,

        /// Directory containing the original datasets
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Directory for corrected datasets
        #[arg(short, long, default_value = "data_corrected")]
        output_dir: PathBuf,

        /// postgres:// or sqlite: URL (falls back to DB_HOST/DB_PORT/DB_NAME/DB_USER/DB_PASSWORD)
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,

        /// Quiet mode - only warnings and errors are logged
        #[arg(short, long)]
        quiet: bool,
    },

    /// Validate a plan file
    Check {
        /// JSON load plan
        #[arg(short, long)]
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine; the environment may already be set
    dotenv::dotenv().ok();
    let args = Args::parse();

    match run(args.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Load {
            plan,
            data_dir,
            database_url,
            report,
            dry_run,
            quiet,
        } => {
            init_tracing(quiet);

            if dry_run {
                println!("DRY RUN MODE - No data will be loaded");
                println!();
                print_plan(&plan).await?;
                println!();
                println!("To execute, run without --dry-run");
                return Ok(ExitCode::SUCCESS);
            }

            let mut builder = LoadArgsBuilder::default();
            builder.plan(plan).data_dir(data_dir).quiet(quiet);
            if let Some(url) = database_url {
                builder.database_url(url);
            }
            if let Some(path) = report.clone() {
                builder.report_path(path);
            }

            let result = run_load(builder.build()?).await?;
            print_load_summary(&result, quiet);
            if let Some(path) = report {
                println!("Report: {}", path.display());
            }

            Ok(exit_code(result.has_warnings()))
        }
        Command::Reconcile {
            plan,
            data_dir,
            output_dir,
            database_url,
            quiet,
        } => {
            init_tracing(quiet);

            let mut builder = ReconcileArgsBuilder::default();
            builder.plan(plan).data_dir(data_dir).output_dir(output_dir);
            if let Some(url) = database_url {
                builder.database_url(url);
            }

            let result = run_reconcile(builder.build()?).await?;

            println!();
            println!("Reconcile Summary");
            println!("=================");
            println!(
                "{:<28} {:>10} {:>10} {:>10}",
                "Table", "Identified", "Rewritten", "Unresolved"
            );
            for table in &result.reconciliation.tables {
                println!(
                    "{:<28} {:>10} {:>10} {:>10}",
                    table.name, table.identified, table.rewritten, table.unresolved
                );
            }
            println!();
            println!("Corrected datasets written: {}", result.written.len());
            println!("Warnings: {}", result.reconciliation.warnings.len());

            Ok(exit_code(!result.reconciliation.warnings.is_empty()))
        }
        Command::Check { plan } => {
            init_tracing(true);
            print_plan(&plan).await?;
            println!();
            println!("Plan is valid");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(quiet: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = if quiet {
        EnvFilter::new("referential_loader=warn,sqlx=off")
    } else {
        EnvFilter::new("referential_loader=info,sqlx=off")
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 0 for a clean run, 2 when warnings were recorded
fn exit_code(has_warnings: bool) -> ExitCode {
    if has_warnings {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

async fn print_plan(path: &Path) -> anyhow::Result<()> {
    let tables = check_plan(path).await?;
    println!("Load order ({} tables):", tables.len());
    for (i, table) in tables.iter().enumerate() {
        print!(
            "  {:>2}. {} -> {} ({} columns",
            i + 1,
            table.source,
            table.table,
            table.columns
        );
        if !table.natural_key.is_empty() {
            print!(", natural key: {}", table.natural_key.join(", "));
        }
        println!(")");
        if !table.parents.is_empty() {
            println!("      depends on: {}", table.parents.join(", "));
        }
    }
    Ok(())
}

fn print_load_summary(report: &LoadReport, quiet: bool) {
    let totals = report.totals();

    println!();
    println!("Load Summary");
    println!("============");
    println!("Run ID: {}", report.run_id);
    println!(
        "Duration: {:.2}s",
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );
    println!();
    println!(
        "{:<28} {:>9} {:>9} {:>9} {:>9} {:>9}",
        "Table", "Attempted", "Inserted", "Existing", "Duplicate", "Error"
    );
    for table in &report.tables {
        let note = match table.status {
            TableStatus::Loaded => "",
            TableStatus::MissingDataset => "  (dataset missing)",
            TableStatus::EmptyDataset => "  (dataset empty)",
        };
        println!(
            "{:<28} {:>9} {:>9} {:>9} {:>9} {:>9}{}",
            table.name,
            table.stats.attempted,
            table.stats.inserted,
            table.stats.matched_existing,
            table.stats.skipped_duplicate,
            table.stats.skipped_error,
            note
        );
    }
    println!(
        "{:<28} {:>9} {:>9} {:>9} {:>9} {:>9}",
        "Total",
        totals.attempted,
        totals.inserted,
        totals.matched_existing,
        totals.skipped_duplicate,
        totals.skipped_error
    );

    if report.has_warnings() {
        println!();
        println!("Warnings ({}):", report.warnings.len());
        if quiet {
            println!("  (run without --quiet or use --report to see them)");
        } else {
            for warning in &report.warnings {
                println!("  {}", warning);
            }
        }
    }
}
