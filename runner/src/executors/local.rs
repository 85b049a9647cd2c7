use super::{
    isolated::IsolatedExecutor, ExecutionOptions, Executor, ExecutorError, RunError,
};
use crate::{
    classify::ExecutionResult,
    job::Job,
    sync::{DirectoryLock, Semaphore},
};
use parking_lot::Mutex;
use rayon::ThreadPoolBuilder;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info, instrument};

/// Executor that works on a local thread pool, isolating every job
#[derive(Debug, Clone, Copy)]
pub struct LocalExecutor<'a> {
    options: &'a ExecutionOptions,
}

impl<'a> LocalExecutor<'a> {
    pub fn new(options: &'a ExecutionOptions) -> Self {
        Self { options }
    }
}

impl Executor for LocalExecutor<'_> {
    /// execute jobs concurrently with a thread pool
    ///
    /// Jobs are queued in submission order. A fatal result stops the admission of queued jobs
    /// unless fatal results are ignored; running jobs always finish.
    #[instrument(skip_all, level = "info")]
    fn execute(&self, jobs: &[Job]) -> Result<Vec<ExecutionResult>, ExecutorError> {
        let thread_number = self.options.concurrency.get();

        debug!("Starting thread pool with {thread_number} threads");

        let pool = ThreadPoolBuilder::new()
            .num_threads(thread_number)
            .thread_name(|index| format!("simsched-worker-{index}"))
            .build()?;

        // synchronization is owned by this batch, concurrent batches never interfere
        let lock = DirectoryLock::new();
        let semaphore = Semaphore::new(thread_number);
        let isolated = IsolatedExecutor::new(&lock, &semaphore, self.options.verbose);

        let results = Mutex::new(vec![None; jobs.len()]);
        let failure = Mutex::new(None);
        let aborted = AtomicBool::new(false);
        let processed = AtomicUsize::new(0);

        pool.scope_fifo(|scope| {
            for (index, job) in jobs.iter().enumerate() {
                let (isolated, results, failure, aborted, processed) =
                    (&isolated, &results, &failure, &aborted, &processed);

                scope.spawn_fifo(move |_| {
                    if aborted.load(Ordering::SeqCst) {
                        debug!(job = %job, "Skipping job after fatal failure");
                        return;
                    }

                    let result = isolated.run(job).unwrap_or_else(RunError::into_result);

                    if let Err(error) = self.options.enforce(index, job, &result) {
                        aborted.store(true, Ordering::SeqCst);
                        failure.lock().get_or_insert(error);
                    }

                    info!(
                        "Done with {}/{}",
                        processed.fetch_add(1, Ordering::SeqCst) + 1,
                        jobs.len()
                    );
                    results.lock()[index] = Some(result);
                });
            }
        });

        if let Some(error) = failure.into_inner() {
            return Err(error);
        }

        let results = results.into_inner();
        let received = results.iter().flatten().count();

        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(ExecutorError::Incomplete {
                expected: jobs.len(),
                received,
            })
    }
}
