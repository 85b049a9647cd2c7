use crate::params::{ParameterError, ParameterMap, DEFAULT_PARAMETER_FILE};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// A single solver invocation: run `program` in `path` with `args`
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Job {
    #[serde(rename = "program")]
    pub program_name: String,
    #[serde(rename = "path")]
    pub working_dir: PathBuf,
    #[serde(rename = "args", default)]
    pub argument_string: String,
    #[serde(default)]
    pub label: String,
}

impl Job {
    pub fn new(
        program_name: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        argument_string: impl Into<String>,
    ) -> Self {
        Self {
            program_name: program_name.into(),
            working_dir: working_dir.into(),
            argument_string: argument_string.into(),
            label: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// file name of the solver binary, lower case with the platform suffix
    pub fn executable_name(&self) -> String {
        let name = self.program_name.to_lowercase();

        if cfg!(windows) {
            format!("{name}.exe")
        } else {
            name
        }
    }

    /// expected location of the solver binary
    pub fn executable(&self) -> PathBuf {
        self.working_dir.join(self.executable_name())
    }

    /// whitespace separated argument tokens
    pub fn arguments(&self) -> impl Iterator<Item = &str> {
        self.argument_string.split_whitespace()
    }

    /// command line as written into batch files, `./program args`
    pub fn command_line(&self) -> String {
        let program = if cfg!(windows) {
            self.executable_name()
        } else {
            format!("./{}", self.executable_name())
        };

        if self.argument_string.trim().is_empty() {
            program
        } else {
            format!("{program} {}", self.argument_string.trim())
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            write!(f, "{} {}", self.program_name, self.argument_string.trim())
        } else {
            write!(f, "{}", self.label)
        }
    }
}

/// Argument string split into the parameter file and `-key value` overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    pub parameter_file: Option<String>,
    pub overrides: ParameterMap,
}

impl Arguments {
    /// Tokens before the first flag are positional, the only accepted one is the parameter
    /// file. Every flag consumes the next token as its value, so negative numbers work.
    pub fn parse(argument_string: &str) -> Result<Self, ParameterError> {
        let mut tokens = argument_string.split_whitespace().peekable();
        let mut arguments = Self::default();

        while let Some(token) = tokens.next_if(|token| !token.starts_with('-')) {
            if arguments.parameter_file.is_some() {
                return Err(ParameterError::UnexpectedArgument(token.to_string()));
            }

            arguments.parameter_file = Some(token.to_string());
        }

        while let Some(flag) = tokens.next() {
            let key = flag.trim_start_matches('-');

            if !flag.starts_with('-') || key.is_empty() {
                return Err(ParameterError::UnexpectedArgument(flag.to_string()));
            }

            match tokens.next() {
                Some(value) => {
                    arguments.overrides.insert(key, value);
                }
                None => return Err(ParameterError::MissingValue(key.to_string())),
            }
        }

        Ok(arguments)
    }

    /// parameter file path relative to `working_dir`, the default file if none was given
    pub fn parameter_path(&self, working_dir: &Path) -> PathBuf {
        working_dir.join(
            self.parameter_file
                .as_deref()
                .unwrap_or(DEFAULT_PARAMETER_FILE),
        )
    }
}
