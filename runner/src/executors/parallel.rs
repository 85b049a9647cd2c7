use super::{ExecutionOptions, Executor, ExecutorError};
use crate::{
    classify::{classify, ExecutionResult, Severity},
    executors::single::result_from_status,
    job::Job,
    scratch::ScratchDir,
};
use itertools::Itertools;
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tracing::{debug, error, info, instrument, warn};

/// name of the batch file inside the scratch directory, one command per line
const BATCH_FILE: &str = "batch.txt";
/// name of the job log written by the utility
const JOB_LOG: &str = "joblog.tsv";

/// Executor delegating scheduling to an external batch-parallel utility (GNU parallel)
///
/// No file isolation happens here, jobs sharing output names in one directory overwrite each
/// other (last writer wins).
#[derive(Debug, Clone)]
pub struct ParallelExecutor<'a> {
    tool: PathBuf,
    options: &'a ExecutionOptions,
}

impl<'a> ParallelExecutor<'a> {
    pub fn new(tool: PathBuf, options: &'a ExecutionOptions) -> Self {
        Self { tool, options }
    }
}

impl Executor for ParallelExecutor<'_> {
    #[instrument(skip_all, fields(tool = ?self.tool), level = "info")]
    fn execute(&self, jobs: &[Job]) -> Result<Vec<ExecutionResult>, ExecutorError> {
        let Some(first) = jobs.first() else {
            return Ok(Vec::new());
        };

        let batch_dir = canonical(&first.working_dir)?;
        let scratch = ScratchDir::create(&batch_dir).map_err(|source| ExecutorError::Io {
            path: batch_dir.clone(),
            source,
        })?;
        let batch_file = scratch.join(BATCH_FILE);
        let job_log = scratch.join(JOB_LOG);

        let mut lines = Vec::with_capacity(jobs.len());
        for job in jobs {
            lines.push(batch_line(job, &batch_dir)?);
        }
        fs::write(&batch_file, lines.join("\n") + "\n").map_err(|source| ExecutorError::Io {
            path: batch_file.clone(),
            source,
        })?;

        let mut command = Command::new(&self.tool);
        command
            .arg("--joblog")
            .arg(&job_log)
            .arg("--jobs")
            .arg(self.options.concurrency.to_string())
            .current_dir(&batch_dir)
            .stdin(Stdio::null());

        if self.options.verbose {
            command.arg("--bar");
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        command.arg("-a").arg(&batch_file);

        debug!(command = ?command, "Starting external utility");
        let status = command.status().map_err(|source| ExecutorError::Tool {
            tool: self.tool.clone(),
            source,
        })?;

        // a non-zero status only says that some job failed, the log has the details
        let tool_result = result_from_status(status);
        if tool_result.severity != Severity::Ignorable {
            debug!("External utility exited with {}", tool_result.exit_code);
        }

        let log = fs::read_to_string(&job_log).map_err(|error| ExecutorError::JobLog {
            path: job_log.clone(),
            reason: error.to_string(),
        })?;
        let entries = parse_job_log(&log, jobs.len()).map_err(|reason| ExecutorError::JobLog {
            path: job_log.clone(),
            reason,
        })?;

        let results = entries
            .into_iter()
            .map(|entry| match entry {
                Some(entry) => entry.result(),
                None => ExecutionResult {
                    exit_code: -1,
                    severity: Severity::Fatal,
                    message: Some(String::from("No exit value recorded in the job log")),
                },
            })
            .collect_vec();

        let failed = results.iter().filter(|result| result.is_fatal()).count();
        if failed == 0 {
            info!("All {} jobs finished", jobs.len());
        } else {
            let codes = results
                .iter()
                .filter(|result| result.is_fatal())
                .map(|result| result.exit_code)
                .unique()
                .join(", ");

            if self.options.ignore_fatal {
                warn!("The following errors were caught but are ignored and the simulation continues: {codes}");
            } else {
                error!("{failed} of {} jobs failed with exit values {codes}, stopping", jobs.len());
            }
        }

        for (index, (job, result)) in jobs.iter().zip(&results).enumerate() {
            self.options.enforce(index, job, result)?;
        }

        Ok(results)
    }
}

fn canonical(path: &Path) -> Result<PathBuf, ExecutorError> {
    fs::canonicalize(path).map_err(|source| ExecutorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// command line of a job relative to the batch directory
fn batch_line(job: &Job, batch_dir: &Path) -> Result<String, ExecutorError> {
    let working_dir = canonical(&job.working_dir)?;

    if working_dir == batch_dir {
        Ok(job.command_line())
    } else {
        Ok(format!(
            "cd {} && {}",
            shell_quote(&working_dir.to_string_lossy()),
            job.command_line()
        ))
    }
}

/// single quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// One row of the utility's job log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLogEntry {
    pub exit_value: i32,
    pub signal: i32,
}

impl JobLogEntry {
    pub fn result(&self) -> ExecutionResult {
        if self.signal != 0 {
            #[cfg(unix)]
            let name = nix::sys::signal::Signal::try_from(self.signal)
                .map_or("unknown signal", nix::sys::signal::Signal::as_str);
            #[cfg(not(unix))]
            let name = "unknown signal";

            ExecutionResult::signaled(self.signal, name)
        } else {
            classify(self.exit_value)
        }
    }
}

/// parse the tab separated job log into one entry per job
///
/// Rows are mapped through the 1-based `Seq` column if present, otherwise by order.
/// Malformed rows are skipped, jobs without a row stay `None`.
pub fn parse_job_log(log: &str, jobs: usize) -> Result<Vec<Option<JobLogEntry>>, String> {
    let mut lines = log.lines().filter(|line| !line.trim().is_empty());
    let header = lines.next().ok_or_else(|| String::from("job log is empty"))?;
    let columns = header.split('\t').map(str::trim).collect_vec();

    let column = |name: &str| columns.iter().position(|column| *column == name);
    let exit_column = column("Exitval").ok_or_else(|| String::from("missing Exitval column"))?;
    let seq_column = column("Seq");
    let signal_column = column("Signal");

    let mut entries = vec![None; jobs];

    for (row, line) in lines.enumerate() {
        let fields = line.split('\t').collect_vec();
        let field = |index: usize| fields.get(index).map(|value| value.trim());

        let Some(Ok(exit_value)) = field(exit_column).map(str::parse::<i32>) else {
            warn!(row = row + 1, "Skipping malformed job log row");
            continue;
        };
        let signal = signal_column
            .and_then(field)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let index = match seq_column.and_then(field).map(str::parse::<usize>) {
            Some(Ok(seq)) if seq > 0 => seq - 1,
            Some(_) => {
                warn!(row = row + 1, "Skipping job log row with invalid Seq");
                continue;
            }
            None => row,
        };

        match entries.get_mut(index) {
            Some(entry) => *entry = Some(JobLogEntry { exit_value, signal }),
            None => warn!(row = row + 1, "Job log row refers to unknown job {}", index + 1),
        }
    }

    Ok(entries)
}
