pub mod isolated;
pub mod local;
pub mod parallel;
pub mod single;

use crate::{
    classify::{error_message, ExecutionResult, Severity},
    job::Job,
    params::ParameterError,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{fmt, io, num::NonZeroUsize, path::PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// cores kept free for the caller when deriving the default concurrency
pub const RESERVED_CORES: usize = 2;

/// default name of the external batch-parallel utility (GNU parallel)
pub const DEFAULT_PARALLEL_TOOL: &str = "parallel";

static AVAILABLE_CORES: Lazy<usize> = Lazy::new(num_cpus::get);

/// Errors of a single job that happen outside of the solver itself
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Solver not found at {0:?}")]
    MissingProgram(PathBuf),
    #[error("Parameter file not found at {0:?}")]
    MissingParameterFile(PathBuf),
    #[error("File {path:?} referenced by {key} not found")]
    MissingReference { key: String, path: PathBuf },
    #[error("Invalid parameters: {0}")]
    Parameters(#[from] ParameterError),
    #[error("Failed to spawn {program:?}: {source}")]
    Spawn { program: PathBuf, source: io::Error },
    #[error("Filesystem operation on {path:?} failed: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl RunError {
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();

        move |source| Self::Io { path, source }
    }

    /// solver exit code closest to this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingProgram(_)
            | Self::MissingParameterFile(_)
            | Self::MissingReference { .. } => 96,
            Self::Parameters(ParameterError::MissingValue(_))
            | Self::Parameters(ParameterError::UnexpectedArgument(_)) => 92,
            Self::Parameters(_) => 90,
            Self::Spawn { .. } | Self::Io { .. } => 99,
        }
    }

    /// turn the failure into a fatal result carrying the classified message
    pub fn into_result(self) -> ExecutionResult {
        let exit_code = self.exit_code();

        ExecutionResult {
            exit_code,
            severity: Severity::Fatal,
            message: Some(format!("{} {self}", error_message(exit_code))),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Job {index} is invalid: {reason}")]
    InvalidJob { index: usize, reason: String },
    #[error("Job {index} ({label}) failed: {}", .result.message())]
    Fatal {
        index: usize,
        label: String,
        result: ExecutionResult,
    },
    #[error("Failed to run {tool:?}: {source}")]
    Tool { tool: PathBuf, source: io::Error },
    #[error("Failed to read job log {path:?}: {reason}")]
    JobLog { path: PathBuf, reason: String },
    #[error("Failed to prepare batch in {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Failed to build worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Only {received} of {expected} jobs reported a result")]
    Incomplete { expected: usize, received: usize },
}

/// Maximum number of concurrently running solver processes
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(try_from = "usize", into = "usize")]
pub struct ConcurrencyLimit(NonZeroUsize);

impl ConcurrencyLimit {
    pub fn new(limit: usize) -> Option<Self> {
        NonZeroUsize::new(limit).map(Self)
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }
}

impl Default for ConcurrencyLimit {
    /// available cores minus a small reserve, at least one
    fn default() -> Self {
        Self::new(AVAILABLE_CORES.saturating_sub(RESERVED_CORES))
            .unwrap_or(Self(NonZeroUsize::MIN))
    }
}

impl TryFrom<usize> for ConcurrencyLimit {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| String::from("concurrency limit must be at least 1"))
    }
}

impl From<ConcurrencyLimit> for usize {
    fn from(limit: ConcurrencyLimit) -> Self {
        limit.get()
    }
}

impl fmt::Display for ConcurrencyLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Knobs of one batch, shared by every backend
#[derive(Clone, Debug)]
pub struct ExecutionOptions {
    pub concurrency: ConcurrencyLimit,
    pub use_concurrency: bool,
    /// record fatal results and continue instead of aborting the batch
    pub ignore_fatal: bool,
    /// forward solver output to the console
    pub verbose: bool,
    /// always isolate jobs, even if the external utility is available
    pub isolate: bool,
    pub parallel_tool: String,
    /// command compiling a missing solver, `{name}` expands to the binary name
    pub build_command: Option<String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyLimit::default(),
            use_concurrency: true,
            ignore_fatal: false,
            verbose: false,
            isolate: false,
            parallel_tool: DEFAULT_PARALLEL_TOOL.to_string(),
            build_command: None,
        }
    }
}

impl ExecutionOptions {
    /// apply the fatal policy to a finished job
    ///
    /// Reported results are logged and pass, fatal ones abort unless `ignore_fatal` is set.
    pub fn enforce(
        &self,
        index: usize,
        job: &Job,
        result: &ExecutionResult,
    ) -> Result<(), ExecutorError> {
        match result.severity {
            Severity::Ignorable => Ok(()),
            Severity::Reported => {
                warn!(job = %job, code = result.exit_code, "{}", result.message());
                Ok(())
            }
            Severity::Fatal if self.ignore_fatal => {
                warn!(
                    job = %job,
                    code = result.exit_code,
                    "{} but it is ignored and the simulation continues",
                    result.message()
                );
                Ok(())
            }
            Severity::Fatal => {
                error!(job = %job, code = result.exit_code, "{}", result.message());

                Err(ExecutorError::Fatal {
                    index,
                    label: job.to_string(),
                    result: result.clone(),
                })
            }
        }
    }
}

/// Common interface of all execution strategies
///
/// Implementations return exactly one result per job, in the order of `jobs`.
pub trait Executor {
    fn execute(&self, jobs: &[Job]) -> Result<Vec<ExecutionResult>, ExecutorError>;
}

/// The execution strategies a batch can be dispatched to
#[derive(Debug)]
pub enum Executors<'a> {
    Sequential(single::SingleExecutor<'a>),
    Parallel(parallel::ParallelExecutor<'a>),
    Local(local::LocalExecutor<'a>),
}

impl<'a> Executors<'a> {
    /// pick the strategy for `jobs` on this host
    pub fn select(options: &'a ExecutionOptions, jobs: &[Job]) -> Self {
        if !options.use_concurrency || jobs.len() <= 1 {
            return Self::Sequential(single::SingleExecutor::new(options));
        }

        if cfg!(unix) && !options.isolate {
            match which::which(&options.parallel_tool) {
                Ok(tool) => return Self::Parallel(parallel::ParallelExecutor::new(tool, options)),
                Err(error) => debug!(
                    tool = %options.parallel_tool,
                    "External utility unavailable ({error}), falling back to the worker pool"
                ),
            }
        }

        Self::Local(local::LocalExecutor::new(options))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sequential(_) => "sequential",
            Self::Parallel(_) => "parallel",
            Self::Local(_) => "local",
        }
    }
}

impl Executor for Executors<'_> {
    fn execute(&self, jobs: &[Job]) -> Result<Vec<ExecutionResult>, ExecutorError> {
        match self {
            Self::Sequential(executor) => executor.execute(jobs),
            Self::Parallel(executor) => executor.execute(jobs),
            Self::Local(executor) => executor.execute(jobs),
        }
    }
}

/// Result of one job, mapped back to its position in the batch
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct JobReport {
    pub index: usize,
    pub label: String,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

/// Entry point: run a batch of jobs and report one result per job
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    options: ExecutionOptions,
}

impl Dispatcher {
    pub fn new(options: ExecutionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    #[instrument(skip_all, fields(jobs = jobs.len()), level = "info")]
    pub fn execute(&self, jobs: &[Job]) -> Result<Vec<JobReport>, ExecutorError> {
        validate(jobs)?;

        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let executor = Executors::select(&self.options, jobs);
        info!(
            backend = executor.name(),
            concurrency = %self.options.concurrency,
            "Running {} jobs",
            jobs.len()
        );

        let results = executor.execute(jobs)?;

        if results.len() != jobs.len() {
            return Err(ExecutorError::Incomplete {
                expected: jobs.len(),
                received: results.len(),
            });
        }

        Ok(jobs
            .iter()
            .zip(results)
            .enumerate()
            .map(|(index, (job, result))| JobReport {
                index,
                label: job.to_string(),
                result,
            })
            .collect())
    }
}

/// run `jobs` with `options`, see `Dispatcher::execute`
pub fn execute(jobs: &[Job], options: ExecutionOptions) -> Result<Vec<JobReport>, ExecutorError> {
    Dispatcher::new(options).execute(jobs)
}

fn validate(jobs: &[Job]) -> Result<(), ExecutorError> {
    for (index, job) in jobs.iter().enumerate() {
        let reason = if job.program_name.trim().is_empty() {
            "program name is empty"
        } else if job.program_name.contains(std::path::is_separator) {
            "program name must not contain a path"
        } else if job.working_dir.as_os_str().is_empty() {
            "working directory is empty"
        } else {
            continue;
        };

        return Err(ExecutorError::InvalidJob {
            index,
            reason: reason.to_string(),
        });
    }

    Ok(())
}
