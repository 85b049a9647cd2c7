use super::{ExecutionOptions, Executor, ExecutorError, RunError};
use crate::{
    classify::{classify, ExecutionResult},
    job::Job,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, trace, warn};

/// Runs jobs one after another directly in their working directory
#[derive(Debug, Clone, Copy)]
pub struct SingleExecutor<'a> {
    options: &'a ExecutionOptions,
}

impl<'a> SingleExecutor<'a> {
    pub fn new(options: &'a ExecutionOptions) -> Self {
        Self { options }
    }

    /// run a single job and classify its exit code
    ///
    /// A missing solver is built once with the configured build command before giving up.
    #[instrument(skip(self, job), fields(job = %job), level = "debug")]
    pub fn run(&self, job: &Job) -> Result<ExecutionResult, RunError> {
        let program = self.locate(job)?;

        spawn(job, &program, self.options.verbose)
    }

    fn locate(&self, job: &Job) -> Result<PathBuf, RunError> {
        let executable = job.executable();

        if !executable.is_file() {
            match self.options.build_command.as_deref() {
                Some(command) => self.build(command, job),
                None => return Err(RunError::MissingProgram(executable)),
            }
        }

        // absolute path, relative programs combined with `current_dir` are platform dependent
        fs::canonicalize(&executable).map_err(|_| RunError::MissingProgram(executable))
    }

    fn build(&self, command: &str, job: &Job) {
        let command = command.replace("{name}", &job.program_name.to_lowercase());
        let mut tokens = command.split_whitespace();

        let Some(program) = tokens.next() else {
            warn!("Build command is empty, unable to build {}", job.program_name);
            return;
        };

        info!(
            "Compiling {} in {}",
            job.program_name,
            job.working_dir.display()
        );

        let (stdout, stderr) = output_streams(self.options.verbose);
        match Command::new(program)
            .args(tokens)
            .current_dir(&job.working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
        {
            Ok(status) if status.success() => debug!("Build finished"),
            Ok(status) => warn!("Build command `{command}` failed with {status}"),
            Err(error) => warn!("Failed to run build command `{command}`: {error}"),
        }
    }
}

impl Executor for SingleExecutor<'_> {
    /// run all jobs in submission order, stop at the first unignored fatal result
    fn execute(&self, jobs: &[Job]) -> Result<Vec<ExecutionResult>, ExecutorError> {
        let mut results = Vec::with_capacity(jobs.len());

        for (index, job) in jobs.iter().enumerate() {
            let result = self.run(job).unwrap_or_else(RunError::into_result);

            self.options.enforce(index, job, &result)?;
            results.push(result);
        }

        Ok(results)
    }
}

/// attempts to spawn a solver that was just copied and is still "text file busy"
const SPAWN_RETRIES: u32 = 4;

fn output_streams(verbose: bool) -> (Stdio, Stdio) {
    if verbose {
        (Stdio::inherit(), Stdio::inherit())
    } else {
        (Stdio::null(), Stdio::piped())
    }
}

/// spawn `program` for `job` inside the job's working directory and wait for it
///
/// Without `verbose` stdout is discarded and stderr is captured for the debug log.
pub fn spawn(job: &Job, program: &Path, verbose: bool) -> Result<ExecutionResult, RunError> {
    let (stdout, stderr) = output_streams(verbose);
    let mut command = Command::new(program);
    command
        .args(job.arguments())
        .current_dir(&job.working_dir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);

    trace!(command = ?command, "Spawning solver");
    let start = Instant::now();

    let mut attempt = 0;
    let status = loop {
        match wait(&mut command, verbose) {
            Err(error) if is_busy(&error) && attempt < SPAWN_RETRIES => {
                attempt += 1;
                trace!(attempt, "Solver is busy, retrying");
                thread::sleep(Duration::from_millis(5 << attempt));
            }
            status => break status,
        }
    }
    .map_err(|source| RunError::Spawn {
        program: program.to_path_buf(),
        source,
    })?;

    debug!(
        "Finished in {} ms | status: {}",
        start.elapsed().as_millis(),
        status
    );

    Ok(result_from_status(status))
}

fn wait(command: &mut Command, verbose: bool) -> io::Result<ExitStatus> {
    if verbose {
        command.status()
    } else {
        command.output().map(|output| {
            if !output.stderr.is_empty() {
                debug!(stderr = %String::from_utf8_lossy(&output.stderr).trim_end());
            }

            output.status
        })
    }
}

// another thread forking while a freshly copied binary was still open for writing
#[cfg(unix)]
fn is_busy(error: &io::Error) -> bool {
    error.raw_os_error() == Some(nix::errno::Errno::ETXTBSY as i32)
}

#[cfg(not(unix))]
fn is_busy(_error: &io::Error) -> bool {
    false
}

/// classify how a child process ended
pub fn result_from_status(status: ExitStatus) -> ExecutionResult {
    if let Some(code) = status.code() {
        return classify(code);
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            let name = Signal::try_from(signal).map_or("unknown signal", Signal::as_str);

            return ExecutionResult::signaled(signal, name);
        }
    }

    classify(-1)
}
