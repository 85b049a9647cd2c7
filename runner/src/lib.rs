pub mod classify;
pub mod config;
pub mod executors;
pub mod job;
pub mod params;
pub mod scratch;
pub mod sync;

#[cfg(all(test, unix))]
mod config_test;
#[cfg(test)]
mod params_test;
#[cfg(all(test, unix))]
mod test_util;

pub use classify::{classify, ExecutionResult, Severity};
pub use executors::{
    execute, ConcurrencyLimit, Dispatcher, ExecutionOptions, ExecutorError, JobReport, RunError,
};
pub use job::Job;
