use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt;

/// Solver exit code: at least one point failed to converge, run continued
pub const CONVERGENCE_WARNING: i32 = 95;
/// Solver exit code: runtime exceeded the configured timeout
pub const TIMEOUT_WARNING: i32 = 97;

/// Exit codes that mark a completed run with a quality concern
pub const WARNING_CODES: [i32; 2] = [CONVERGENCE_WARNING, TIMEOUT_WARNING];

#[derive(Serialize_repr, Deserialize_repr, PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
#[repr(u8)]
pub enum Severity {
    Ignorable = 0,
    Reported = 1,
    Fatal = 2,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignorable => write!(f, "ignorable"),
            Self::Reported => write!(f, "reported"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
/// outcome of a single solver invocation, already classified
pub struct ExecutionResult {
    pub exit_code: i32,
    pub severity: Severity,
    pub message: Option<String>,
}

impl ExecutionResult {
    pub fn success() -> Self {
        Self {
            exit_code: 0,
            severity: Severity::Ignorable,
            message: None,
        }
    }

    /// result for a child that was terminated by a signal instead of exiting
    /// the negative code mirrors the convention of reporting `-signal` as return code
    pub fn signaled(signal: i32, name: &str) -> Self {
        Self {
            exit_code: -signal,
            severity: Severity::Fatal,
            message: Some(format!("Terminated by signal {signal} ({name})")),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

/// map a solver exit code onto its severity and diagnostic message
pub fn classify(exit_code: i32) -> ExecutionResult {
    if exit_code == 0 {
        return ExecutionResult::success();
    }

    let severity = if WARNING_CODES.contains(&exit_code) {
        Severity::Reported
    } else {
        Severity::Fatal
    };

    ExecutionResult {
        exit_code,
        severity,
        message: Some(error_message(exit_code)),
    }
}

/// human readable message for a solver exit code
///
/// Downstream log parsing keys off these strings, keep them stable.
pub fn error_message(exit_code: i32) -> String {
    match exit_code {
        90..=99 => {
            let detail = match exit_code {
                90 => "Device parameter file corrupted.",
                91 => "Invalid input (physics, or voltage in tVG_file too large).",
                92 => "Invalid input from command line.",
                93 => "Numerical failure.",
                94 => "Failed to converge, halt (FailureMode = 0).",
                // the extra leading space is part of the established log text
                95 => " Failed to converge at least 1 point, not halt (FailureMode != 0).",
                96 => "Missing input file.",
                97 => "Runtime exceeds limit set by timeout.",
                99 => "Programming error (i.e. not due to the user!).",
                _ => "Unknown error",
            };

            format!("Error {exit_code}: {detail}")
        }
        101.. => {
            let detail = match exit_code {
                106 => "Invalid numeric format: Reported when a non-numeric value is read from a text file.",
                200 => "Division by zero: The application attempted to divide a number by zero.",
                201 => "Range check error.",
                202 => "Stack overflow error: This error is only reported when stack checking is enabled.",
                205 => "Floating point overflow.",
                206 => "Floating point underflow.",
                _ => "Unknown error",
            };

            format!("Fatal error {exit_code}: {detail}")
        }
        _ => format!("Unknown error code {exit_code}"),
    }
}
