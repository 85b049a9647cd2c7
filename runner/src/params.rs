use itertools::Itertools;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::trace;

/// default parameter file used when the argument string names none
pub const DEFAULT_PARAMETER_FILE: &str = "device_parameters.txt";

/// keys selecting the generation profile, the first one present wins
pub const GENERATION_KEYS: [&str; 2] = ["Gen_profile", "genProfile"];

/// generation profile value meaning "computed from optical tables and a spectrum"
pub const COMPUTED_GENERATION: &str = "calc";

/// comment marker of the parameter file format
const COMMENT: char = '*';

#[derive(Error, Debug)]
pub enum ParameterError {
    #[error("Failed to access parameter file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Line {line} is neither a comment nor a `key = value` pair: {content}")]
    Malformed { line: usize, content: String },
    #[error("Parameter {0} is defined more than once")]
    DuplicateKey(String),
    #[error("Parameter -{0} on the command line has no value")]
    MissingValue(String),
    #[error("Unexpected positional argument {0}")]
    UnexpectedArgument(String),
}

/// The kinds of parameter values that name another file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileReference {
    /// optical constants (n, k) table of a layer or substrate
    OpticalTable,
    /// illumination spectrum
    Spectrum,
    /// time/voltage/generation table driving transient simulations
    VoltageTable,
    /// generation profile, a file unless it is `none` or `calc`
    GenerationProfile,
    /// any other `*_file`/`*File` key, mostly outputs
    Other,
}

impl FileReference {
    /// classify a parameter key, `None` for keys that don't reference files
    pub fn of(key: &str) -> Option<Self> {
        // layer parameters are namespaced as `l1.nk_file`
        let leaf = key.rsplit('.').next().unwrap_or(key);

        if GENERATION_KEYS.contains(&leaf) {
            Some(Self::GenerationProfile)
        } else if key.contains("nk_") || is_camel_prefixed(leaf, "nk") {
            Some(Self::OpticalTable)
        } else if leaf.eq_ignore_ascii_case("spectrum") {
            Some(Self::Spectrum)
        } else if leaf.starts_with("tVG") {
            Some(Self::VoltageTable)
        } else if leaf.ends_with("_file") || leaf.ends_with("File") {
            Some(Self::Other)
        } else {
            None
        }
    }

    /// whether the referenced file is consumed by the solver
    ///
    /// `generation_computed` decides for optical tables and spectra since those are only read
    /// when the generation profile is calculated.
    pub fn is_input(&self, generation_computed: bool) -> bool {
        match self {
            Self::OpticalTable | Self::Spectrum => generation_computed,
            Self::VoltageTable | Self::GenerationProfile => true,
            Self::Other => false,
        }
    }

    /// whether `value` names a file at all
    pub fn names_file(&self, value: &str) -> bool {
        match self {
            Self::GenerationProfile => {
                !is_unset(value) && !value.eq_ignore_ascii_case(COMPUTED_GENERATION)
            }
            _ => !is_unset(value),
        }
    }
}

fn is_camel_prefixed(leaf: &str, prefix: &str) -> bool {
    leaf.strip_prefix(prefix)
        .and_then(|rest| rest.chars().next())
        .map_or(false, |next| next.is_ascii_uppercase())
}

/// values that disable an optional file
pub fn is_unset(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("none")
}

/// file name component of a parameter value, the value itself if it has none
pub fn basename(value: &str) -> &str {
    Path::new(value)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(value)
}

/// Ordered `key -> value` mapping of a parameter file or command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterMap {
    entries: Vec<(String, String)>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// parse the `key = value *comment` format
    pub fn parse(text: &str) -> Result<Self, ParameterError> {
        let mut map = Self::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with(COMMENT) {
                continue;
            }

            let Some((key, rest)) = line.split_once('=') else {
                return Err(ParameterError::Malformed {
                    line: index + 1,
                    content: line.to_string(),
                });
            };
            let value = rest.split(COMMENT).next().unwrap_or_default();

            if map.insert(key.trim(), value.trim()).is_some() {
                return Err(ParameterError::DuplicateKey(key.trim().to_string()));
            }
        }

        Ok(map)
    }

    pub fn read(path: &Path) -> Result<Self, ParameterError> {
        let text = fs::read_to_string(path).map_err(|source| ParameterError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        trace!(path = ?path, "Parsing parameter file");

        Self::parse(&text)
    }

    /// insert or replace a value, returns the previous value
    pub fn insert(&mut self, key: &str, value: &str) -> Option<String> {
        match self.entries.iter_mut().find(|(existing, _)| existing == key) {
            Some((_, previous)) => Some(std::mem::replace(previous, value.to_string())),
            None => {
                self.entries.push((key.to_string(), value.to_string()));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// value of `key` with command line overrides taking precedence over the file
    pub fn resolve<'a>(&'a self, key: &str, overrides: &'a ParameterMap) -> Option<&'a str> {
        overrides.get(key).or_else(|| self.get(key))
    }

    /// check if the generation profile is computed from optical data
    pub fn generation_computed(&self, overrides: &ParameterMap) -> bool {
        GENERATION_KEYS
            .iter()
            .find_map(|key| self.resolve(key, overrides))
            .map_or(false, |value| value.eq_ignore_ascii_case(COMPUTED_GENERATION))
    }

    /// render as command line flags, `-key value`
    pub fn to_arguments(&self) -> String {
        self.iter()
            .map(|(key, value)| format!("-{key} {value}"))
            .join(" ")
    }

    /// replace the values of all keys present in `self` within `text`
    ///
    /// Comments, ordering and unknown lines are kept as they are, only the value between `=` and
    /// the trailing comment changes.
    pub fn apply_to(&self, text: &str) -> String {
        text.split_inclusive('\n')
            .map(|line| {
                let trimmed = line.trim_start();

                if trimmed.starts_with(COMMENT) {
                    return line.to_string();
                }

                match line.split_once('=') {
                    Some((key, rest)) => match self.get(key.trim()) {
                        Some(value) => {
                            let ending = &rest[rest.trim_end_matches(['\r', '\n']).len()..];
                            let tail = match rest.find(COMMENT) {
                                Some(start) => &rest[start..],
                                None => ending,
                            };

                            format!("{key}= {value}{:10}{tail}", "")
                        }
                        None => line.to_string(),
                    },
                    None => line.to_string(),
                }
            })
            .collect()
    }

    /// rewrite a parameter file in place with the values of `self`
    pub fn write_into(&self, path: &Path) -> Result<(), ParameterError> {
        let io_error = |source| ParameterError::Io {
            path: path.to_path_buf(),
            source,
        };

        let text = fs::read_to_string(path).map_err(io_error)?;
        fs::write(path, self.apply_to(&text)).map_err(io_error)
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for ParameterMap {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        let mut map = Self::new();

        for (key, value) in iter {
            map.insert(key, value);
        }

        map
    }
}
