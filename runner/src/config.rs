use crate::{
    executors::{ConcurrencyLimit, ExecutionOptions, DEFAULT_PARALLEL_TOOL},
    job::Job,
};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Error, path::Path};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
#[cfg(unix)]
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    use std::os::unix::fs::MetadataExt;

    if !path.is_file() {
        Err(ConfigErrors::FileNotFound)
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

// on other platforms being a file is all we can check
#[cfg(not(unix))]
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if path.is_file() {
        File::open(path).map(|_| true).map_err(ConfigErrors::MetadataNotFound)
    } else {
        Err(ConfigErrors::FileNotFound)
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file: {0}")]
    Read(Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("File not found")]
    FileNotFound,
    #[error("Metadata not found")]
    MetadataNotFound(#[source] Error),
    #[error("Config failed preflight checks")]
    Preflight,
}

/// Batch description: how to run and what to run
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    // maximum number of concurrent solver processes, defaults to the available cores minus 2
    pub threads: Option<usize>,
    #[serde(default = "default_true")]
    pub concurrency: bool,
    #[serde(default)]
    pub ignore_fatal: bool,
    #[serde(default)]
    pub verbose: bool,
    // force the isolating worker pool even if GNU parallel is installed
    #[serde(default)]
    pub isolate: bool,
    #[serde(default = "default_parallel_tool")]
    pub parallel: String,
    // command to compile a missing solver, `{name}` is replaced with the solver name
    pub build: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            threads: None,
            concurrency: true,
            ignore_fatal: false,
            verbose: false,
            isolate: false,
            parallel: default_parallel_tool(),
            build: None,
        }
    }
}

impl SchedulerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let file = File::open(path).map_err(ConfigErrors::Read)?;

        Ok(serde_yaml::from_reader(file)?)
    }

    /// translate into options for the dispatcher, invalid thread counts fall back to the default
    pub fn options(&self) -> ExecutionOptions {
        let executor = &self.executor;

        ExecutionOptions {
            concurrency: executor
                .threads
                .and_then(ConcurrencyLimit::new)
                .unwrap_or_default(),
            use_concurrency: executor.concurrency,
            ignore_fatal: executor.ignore_fatal,
            verbose: executor.verbose,
            isolate: executor.isolate,
            parallel_tool: executor.parallel.clone(),
            build_command: executor.build.clone(),
        }
    }

    /// check the whole config and report every problem at once
    ///
    /// Returns true if any error was found.
    pub fn preflight_checks(&mut self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if self.jobs.is_empty() {
            error!("No job was defined, nothing to run");
            contains_error = true;
        }

        if self.executor.threads == Some(0) {
            error!("executor.threads cannot be 0, at least one solver has to run");
            contains_error = true;
        }

        if self.executor.parallel.trim().is_empty() {
            warn!("executor.parallel is empty, falling back to `{DEFAULT_PARALLEL_TOOL}`");
            self.executor.parallel = default_parallel_tool();
        }

        for (index, job) in self.jobs.iter_mut().enumerate() {
            if job.label.is_empty() {
                job.label = format!("job {index}");
            }
            let label = &job.label;

            if job.program_name.trim().is_empty() {
                error!("{label}: program cannot be empty");
                contains_error = true;
                continue;
            }

            if !job.working_dir.is_dir() {
                error!(
                    "{label}: working directory {} does not exist",
                    job.working_dir.display()
                );
                contains_error = true;
                continue;
            }

            let executable = job.executable();
            match check_executable(&executable) {
                Ok(true) => {}
                Ok(false) => {
                    error!(
                        "{label}: solver {} is not executable, this might cause problems",
                        executable.display()
                    );
                    contains_error = true;
                }
                Err(ConfigErrors::FileNotFound) if self.executor.build.is_some() => {
                    warn!(
                        "{label}: solver {} not found, it will be built before running",
                        executable.display()
                    );
                }
                Err(e) => {
                    error!(
                        "{label}: failed to determine if {} is an executable: {e}",
                        executable.display()
                    );
                    contains_error = true;
                }
            }
        }

        contains_error
    }
}

fn default_true() -> bool {
    true
}

fn default_parallel_tool() -> String {
    String::from(DEFAULT_PARALLEL_TOOL)
}
