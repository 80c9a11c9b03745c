use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use specimen_archiver::app::{App, CancelToken, RunOptions, RunSummary, StatusReport, status_report};
use specimen_archiver::catalog::CatalogHttpClient;
use specimen_archiver::config::{ConfigLoader, ResolvedConfig};
use specimen_archiver::db::MysqlCuratorialDb;
use specimen_archiver::error::ArchiveError;
use specimen_archiver::output::{JsonOutput, OutputMode};
use specimen_archiver::sheets::SheetsHttpClient;
use specimen_archiver::spaces::SpacesHttpClient;
use specimen_archiver::tui::RunMonitor;

#[derive(Parser)]
#[command(name = "specimen-archiver")]
#[command(about = "Archive staged specimen images by taxonomy, publish them and update the catalog")]
#[command(version, author)]
struct Cli {
    /// Config file (default: specimen-archiver.json in the current directory)
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Process every staged row that is not done yet")]
    Run(RunArgs),
    #[command(about = "Count staging rows by ledger status")]
    Status,
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Resolve and plan only; nothing is moved, uploaded or written
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    limit: Option<usize>,

    /// Only process this sheet row (repeatable)
    #[arg(long = "row")]
    rows: Vec<u32>,

    /// Remove a lock left behind by a crashed run
    #[arg(long)]
    break_lock: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<ArchiveError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &ArchiveError) -> u8 {
    match error {
        ArchiveError::MissingConfig
        | ArchiveError::ConfigRead(_)
        | ArchiveError::ConfigParse(_)
        | ArchiveError::MissingEnv(_) => 2,
        ArchiveError::Database(_)
        | ArchiveError::SheetsHttp(_)
        | ArchiveError::SheetsStatus { .. }
        | ArchiveError::Upload(_)
        | ArchiveError::Notify(_) => 3,
        ArchiveError::LockHeld(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    init_tracing(cli.log_file.as_deref(), output_mode)?;

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run_batch(config, args, output_mode),
        Commands::Status => {
            let sheet = SheetsHttpClient::new(&config.sheets)?;
            let report = status_report(&sheet, &config.staging_root)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_status(&report).into_diagnostic()?,
                OutputMode::Interactive => print_status(&report),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(log_file: Option<&str>, output_mode: OutputMode) -> miette::Result<()> {
    let default_level = match (output_mode, log_file) {
        (OutputMode::Interactive, None) => "warn",
        _ => "info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .into_diagnostic()?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn run_batch(config: ResolvedConfig, args: RunArgs, output_mode: OutputMode) -> miette::Result<ExitCode> {
    let sheet = SheetsHttpClient::new(&config.sheets)?;
    let db = MysqlCuratorialDb::connect(&config.database)?;
    let store = SpacesHttpClient::new(&config.spaces)?;
    let catalog = CatalogHttpClient::new(&config.catalog)?;
    let app = App::new(&config, db, sheet, store, catalog);

    let options = RunOptions {
        dry_run: args.dry_run,
        limit: args.limit,
        rows: args.rows,
        break_lock: args.break_lock,
    };
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).into_diagnostic()?;

    let summary = match output_mode {
        OutputMode::Interactive => {
            let mut monitor = RunMonitor::new(cancel.clone(), options.dry_run);
            let summary = monitor.run(move |sink| app.run(&options, &cancel, sink))?;
            print_summary(&summary);
            summary
        }
        OutputMode::NonInteractive => {
            let summary = app.run(&options, &cancel, &JsonOutput)?;
            JsonOutput::print_summary(&summary).into_diagnostic()?;
            summary
        }
    };

    if summary.has_failures() {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_summary(summary: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    let title = if summary.dry_run {
        "specimen-archiver dry run"
    } else {
        "specimen-archiver summary"
    };
    println!("{cyan}{title}{reset}");
    println!("  processed: {} of {} rows", summary.processed, summary.total_rows);
    if summary.dry_run {
        println!("{green}  planned: {}{reset}", summary.planned);
    } else {
        println!("{green}  done: {}{reset}", summary.succeeded);
        if summary.already_archived > 0 {
            println!("{green}    already archived: {}{reset}", summary.already_archived);
        }
    }

    let failed_color = if summary.has_failures() { red } else { green };
    println!("{failed_color}  failed: {}{reset}", summary.failed());
    for (stage, count) in &summary.failed_by_stage {
        println!("{failed_color}    {stage}: {count}{reset}");
    }
    println!("{yellow}  remaining pending: {}{reset}", summary.remaining_pending);
    println!("  files left in staging: {}", summary.remaining_staging_files);
    if summary.cancelled {
        println!("{yellow}  run was cancelled{reset}");
    }

    for failure in &summary.failures {
        println!(
            "{red}  {} [{}] {}: {}{reset}",
            failure.row, failure.step, failure.kind, failure.message
        );
    }
}

fn print_status(report: &StatusReport) {
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}staging sheet: {} rows{reset}", report.total_rows);
    for (status, count) in &report.by_status {
        println!("  {status}: {count}");
    }
    for (stage, count) in &report.failed_by_stage {
        println!("    failed while {stage}: {count}");
    }
    println!("  files left in staging: {}", report.remaining_staging_files);
}
