use clap::{ArgAction, Parser, Subcommand};
use simsched_runner::{
    config::SchedulerConfig, scratch, ConcurrencyLimit, Dispatcher, ExecutorError, Severity,
};
use std::{fs::File, path::PathBuf, process::ExitCode};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run batches of solver jobs in parallel")]
struct Cli {
    /// increase log verbosity (-v debug, -vv trace), RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// run all jobs of a batch config
    Run {
        config: PathBuf,
        /// write per-job results as YAML
        #[arg(long)]
        report: Option<PathBuf>,
        /// maximum number of concurrent solvers
        #[arg(short = 'j', long)]
        threads: Option<usize>,
        #[arg(long)]
        sequential: bool,
        #[arg(long)]
        ignore_fatal: bool,
        /// isolate every job in its own scratch directory
        #[arg(long)]
        isolate: bool,
    },
    /// remove scratch directories left behind by killed runs
    Clean { dir: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            config,
            report,
            threads,
            sequential,
            ignore_fatal,
            isolate,
        } => {
            let mut config = match SchedulerConfig::load(&config) {
                Ok(config) => config,
                Err(e) => {
                    error!("Unable to load {}: {e}", config.display());
                    return ExitCode::from(2);
                }
            };

            if config.preflight_checks() {
                error!("Config contains errors, please fix them before running");
                return ExitCode::from(2);
            }

            let mut options = config.options();
            if let Some(threads) = threads {
                match ConcurrencyLimit::new(threads) {
                    Some(limit) => options.concurrency = limit,
                    None => warn!("--threads 0 is invalid, using {}", options.concurrency),
                }
            }
            options.use_concurrency &= !sequential;
            options.ignore_fatal |= ignore_fatal;
            options.isolate |= isolate;

            match Dispatcher::new(options).execute(&config.jobs) {
                Ok(reports) => {
                    let reported = reports
                        .iter()
                        .filter(|report| report.result.severity != Severity::Ignorable)
                        .count();
                    info!(
                        "Finished {} jobs, {reported} with warnings or ignored errors",
                        reports.len()
                    );

                    if let Some(path) = report {
                        let written = File::create(&path)
                            .map_err(|e| e.to_string())
                            .and_then(|file| {
                                serde_yaml::to_writer(file, &reports).map_err(|e| e.to_string())
                            });

                        if let Err(e) = written {
                            error!("Failed to write report {}: {e}", path.display());
                            return ExitCode::FAILURE;
                        }
                    }

                    ExitCode::SUCCESS
                }
                Err(ExecutorError::Fatal { label, result, .. }) => {
                    error!("{label}: {}", result.message());
                    error!("Stopping simulation...");
                    ExitCode::FAILURE
                }
                Err(e) => {
                    error!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Clean { dir } => match scratch::remove_stale(&dir) {
            Ok(removed) => {
                info!("Removed {} scratch directories", removed.len());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to clean {}: {e}", dir.display());
                ExitCode::FAILURE
            }
        },
    }
}
