use super::{single, RunError};
use crate::{
    classify::ExecutionResult,
    job::{Arguments, Job},
    params::{basename, FileReference, ParameterMap},
    scratch::ScratchDir,
    sync::{DirectoryLock, Semaphore},
};
use itertools::Itertools;
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

/// Private copy of a job's inputs, removed together with its scratch directory
#[derive(Debug)]
pub struct IsolationContext {
    scratch: ScratchDir,
    copied_files: BTreeSet<PathBuf>,
}

impl IsolationContext {
    /// create `<working_dir>/tmp<job_id>`
    pub fn create(working_dir: &Path) -> Result<Self, RunError> {
        let working_dir = fs::canonicalize(working_dir).map_err(RunError::io(working_dir))?;
        let scratch = ScratchDir::create(&working_dir).map_err(RunError::io(&working_dir))?;

        Ok(Self {
            scratch,
            copied_files: BTreeSet::new(),
        })
    }

    pub fn job_id(&self) -> Uuid {
        self.scratch.id()
    }

    pub fn temp_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// input copies living in `temp_dir`, these are never moved back
    pub fn copied_files(&self) -> &BTreeSet<PathBuf> {
        &self.copied_files
    }

    /// copy the input `source` into the temp directory under its file name
    pub fn copy_in(&mut self, source: &Path) -> Result<PathBuf, RunError> {
        let target = self.copy(source)?;

        if !self.copied_files.insert(target.clone()) {
            warn!(
                source = ?source,
                "Another input with the same file name was already copied, overwriting it"
            );
        }

        Ok(target)
    }

    /// copy `source` into the temp directory and treat it as an output afterwards
    ///
    /// For files of the working directory the solver may rewrite, the copy replaces the
    /// original on `move_out`.
    pub fn carry_in(&mut self, source: &Path) -> Result<PathBuf, RunError> {
        self.copy(source)
    }

    fn copy(&self, source: &Path) -> Result<PathBuf, RunError> {
        let name = source
            .file_name()
            .ok_or_else(|| RunError::MissingReference {
                key: String::from("<path>"),
                path: source.to_path_buf(),
            })?;
        let target = self.temp_dir().join(name);

        fs::copy(source, &target).map_err(RunError::io(source))?;
        trace!(source = ?source, target = ?target, "Copied input");

        Ok(target)
    }

    /// move everything the solver produced into `destination`, replacing stale files
    pub fn move_out(&self, destination: &Path) -> Result<Vec<PathBuf>, RunError> {
        let mut moved = Vec::new();

        for entry in fs::read_dir(self.temp_dir()).map_err(RunError::io(self.temp_dir()))? {
            let source = entry.map_err(RunError::io(self.temp_dir()))?.path();

            if self.copied_files.contains(&source) {
                continue;
            }

            let Some(name) = source.file_name() else {
                continue;
            };
            let target = destination.join(name);

            if target.is_dir() {
                fs::remove_dir_all(&target).map_err(RunError::io(&target))?;
            } else if target.exists() {
                fs::remove_file(&target).map_err(RunError::io(&target))?;
            }

            fs::rename(&source, &target).map_err(RunError::io(&source))?;
            trace!(target = ?target, "Moved output");
            moved.push(target);
        }

        Ok(moved)
    }
}

/// Runs jobs against private copies of their inputs
///
/// Several instances may share one `DirectoryLock` and `Semaphore`, the lock serializes
/// all copy-in and move-out work while the semaphore bounds the running solvers.
#[derive(Debug, Clone, Copy)]
pub struct IsolatedExecutor<'a> {
    lock: &'a DirectoryLock,
    semaphore: &'a Semaphore,
    verbose: bool,
}

impl<'a> IsolatedExecutor<'a> {
    pub fn new(lock: &'a DirectoryLock, semaphore: &'a Semaphore, verbose: bool) -> Self {
        Self {
            lock,
            semaphore,
            verbose,
        }
    }

    #[instrument(skip(self, job), fields(job = %job), level = "debug")]
    pub fn run(&self, job: &Job) -> Result<ExecutionResult, RunError> {
        let permit = self.semaphore.acquire();
        let mut context = IsolationContext::create(&job.working_dir)?;
        debug!(id = %context.job_id(), "Isolating job");

        let (program, staged_arguments) = {
            let _guard = self.lock.lock();
            stage(job, &mut context)?
        };

        let staged = Job::new(&job.program_name, context.temp_dir(), staged_arguments)
            .with_label(job.label.clone());
        let result = single::spawn(&staged, &program, self.verbose);
        drop(permit);

        let moved = {
            let _guard = self.lock.lock();
            context.move_out(&job.working_dir)
        };

        let result = result?;
        let moved = moved?;
        debug!(
            "Moved {} outputs back: {}",
            moved.len(),
            moved
                .iter()
                .filter_map(|path| path.file_name())
                .map(|name| name.to_string_lossy())
                .join(", ")
        );

        Ok(result)
    }
}

/// copy the solver, its parameter file and every referenced input into the context
///
/// Returns the staged solver path and the reduced argument string. Must be called with the
/// directory lock held.
fn stage(job: &Job, context: &mut IsolationContext) -> Result<(PathBuf, String), RunError> {
    let executable = job.executable();
    if !executable.is_file() {
        return Err(RunError::MissingProgram(executable));
    }

    let arguments = Arguments::parse(&job.argument_string)?;
    let parameter_path = arguments.parameter_path(&job.working_dir);
    if !parameter_path.is_file() {
        return Err(RunError::MissingParameterFile(parameter_path));
    }

    let parameters = ParameterMap::read(&parameter_path)?;
    let overrides = &arguments.overrides;
    let generation_computed = parameters.generation_computed(overrides);

    // check every input before copying anything so failures happen before any work
    let mut inputs = Vec::new();
    let mut carried = Vec::new();
    let keys = parameters
        .keys()
        .chain(overrides.keys().filter(|key| !parameters.contains_key(key)));

    for key in keys {
        let Some(kind) = FileReference::of(key) else {
            continue;
        };
        let Some(value) = parameters.resolve(key, overrides) else {
            continue;
        };
        if !kind.names_file(value) {
            continue;
        }

        if kind.is_input(generation_computed) {
            inputs.push(resolve_input(key, value, &job.working_dir)?);
        } else if kind == FileReference::Other {
            // existing files are inputs too, outputs of earlier runs are replaced on move out
            let path = job.working_dir.join(value);

            if path.is_file() && path.parent() == Some(job.working_dir.as_path()) {
                carried.push(path);
            } else if path.is_file() {
                inputs.push(path);
            }
        }
    }

    let program = context.copy_in(&executable)?;
    let local_parameters = context.copy_in(&parameter_path)?;
    for input in inputs {
        context.copy_in(&input)?;
    }
    for path in carried {
        context.carry_in(&path)?;
    }

    // the copy only refers to basenames, the inputs now live next to it
    let updates: ParameterMap = parameters
        .iter()
        .map(|(key, value)| {
            let value = overrides.get(key).unwrap_or(value);

            match FileReference::of(key) {
                Some(_) => (key, basename(value)),
                None => (key, value),
            }
        })
        .collect();
    updates.write_into(&local_parameters)?;

    let forwarded: ParameterMap = overrides
        .iter()
        .filter(|(key, _)| !parameters.contains_key(key))
        .map(|(key, value)| match FileReference::of(key) {
            Some(_) => (key, basename(value)),
            None => (key, value),
        })
        .collect();

    if !forwarded.is_empty() {
        debug!(
            "Forwarding overrides missing from the parameter file: {}",
            forwarded.keys().join(", ")
        );
    }

    let parameter_name = basename(&local_parameters.to_string_lossy()).to_string();
    let staged_arguments = format!("{parameter_name} {}", forwarded.to_arguments());

    Ok((program, staged_arguments.trim_end().to_string()))
}

/// locate a referenced input relative to the working directory, absolute paths stay as they are
fn resolve_input(key: &str, value: &str, working_dir: &Path) -> Result<PathBuf, RunError> {
    let path = working_dir.join(value);

    if path.is_file() {
        Ok(path)
    } else {
        Err(RunError::MissingReference {
            key: key.to_string(),
            path,
        })
    }
}
