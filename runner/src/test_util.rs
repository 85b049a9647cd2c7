use crate::{
    executors::{ConcurrencyLimit, ExecutionOptions},
    job::Job,
    scratch::is_scratch_name,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

pub const SOLVER: &str = "simss";
pub const SPECTRUM: &str = "AM15G.txt";

/// Fake solver: reads a few keys from its parameter file, applies `-key value` overrides and
/// writes `Gfrac`, a listing of its working directory and the first spectrum line into `JV_file`.
///
/// `exit_code` picks the exit code, `pause` sleeps, `track` names a directory where running
/// instances register themselves and `signal` makes the solver kill itself.
const FAKE_SOLVER: &str = r#"#!/bin/sh
par=device_parameters.txt
case "$1" in
    -*|"") ;;
    *) par="$1"; shift ;;
esac
[ -f "$par" ] || exit 96

get() {
    sed -n "s/^[[:space:]]*$1[[:space:]]*=[[:space:]]*\([^[:space:]*]*\).*/\1/p" "$par" | head -n 1
}

out=$(get JV_file)
gfrac=$(get Gfrac)
code=$(get exit_code)
pause=$(get pause)
track=$(get track)
signal=$(get signal)
gen=$(get Gen_profile)
spectrum=$(get spectrum)

while [ $# -ge 2 ]; do
    case "$1" in
        -JV_file) out="$2" ;;
        -Gfrac) gfrac="$2" ;;
        -exit_code) code="$2" ;;
        -pause) pause="$2" ;;
        -track) track="$2" ;;
        -signal) signal="$2" ;;
        -Gen_profile) gen="$2" ;;
        -spectrum) spectrum="$2" ;;
    esac
    shift 2
done

if [ "$gen" = calc ] && [ ! -f "$spectrum" ]; then
    exit 96
fi

listing=$(ls | tr '\n' ' ')

if [ -n "$track" ]; then
    touch "$track/running.$$"
    ls "$track" | grep -c '^running\.' > "$track/observed.$$"
fi
if [ -n "$pause" ]; then
    sleep "$pause"
fi
if [ -n "$track" ]; then
    rm -f "$track/running.$$"
fi

spectrum_data=
if [ "$gen" = calc ]; then
    spectrum_data=$(head -n 1 "$spectrum")
fi

printf 'Gfrac=%s\nfiles=%s\nspectrum=%s\n' "$gfrac" "$listing" "$spectrum_data" > "${out:-JV.dat}"

if [ -n "$signal" ]; then
    kill -s "$signal" $$
fi
exit "${code:-0}"
"#;

pub const DEVICE_PARAMETERS: &str = "** fake device, parameters for tests
** version 1

** General
Gfrac = 1                     * generation fraction
exit_code = 0                 * exit code the solver reports
Gen_profile = none            * none, calc or a file
spectrum = ../Data/AM15G.txt  * spectrum used with Gen_profile = calc

** Output
JV_file = JV.dat              * current voltage curve
";

/// Solver directory `SimSS` next to a `Data` directory, like a solver checkout
pub struct Workspace {
    pub root: TempDir,
    pub dir: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("SimSS");
        let data = root.path().join("Data");

        fs::create_dir(&dir).unwrap();
        fs::create_dir(&data).unwrap();
        fs::write(data.join(SPECTRUM), "400 1.0\n500 1.2\n").unwrap();
        fs::write(dir.join("device_parameters.txt"), DEVICE_PARAMETERS).unwrap();
        install_solver(&dir.join(SOLVER));

        Self { root, dir }
    }

    pub fn job(&self, args: &str) -> Job {
        Job::new(SOLVER, &self.dir, args)
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.dir.join(name)).unwrap()
    }

    pub fn parameters(&self) -> String {
        self.read("device_parameters.txt")
    }

    /// scratch directories still present in the solver directory
    pub fn scratch_dirs(&self) -> Vec<PathBuf> {
        fs::read_dir(&self.dir)
            .unwrap()
            .map(|entry| entry.unwrap())
            .filter(|entry| entry.file_type().unwrap().is_dir())
            .filter(|entry| is_scratch_name(&entry.file_name()))
            .map(|entry| entry.path())
            .collect()
    }

    /// new directory outside the solver directory for `track`
    pub fn tracker(&self) -> PathBuf {
        let tracker = self.root.path().join("tracker");
        fs::create_dir_all(&tracker).unwrap();
        tracker
    }
}

pub fn install_solver(path: &Path) {
    fs::write(path, FAKE_SOLVER).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// largest number of concurrently running solvers seen by any instance
pub fn peak_concurrency(tracker: &Path) -> usize {
    fs::read_dir(tracker)
        .unwrap()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("observed."))
        .map(|entry| {
            fs::read_to_string(entry.path())
                .unwrap()
                .trim()
                .parse::<usize>()
                .unwrap()
        })
        .max()
        .unwrap_or(0)
}

pub fn options(concurrency: usize) -> ExecutionOptions {
    ExecutionOptions {
        concurrency: ConcurrencyLimit::new(concurrency).unwrap(),
        ..Default::default()
    }
}

/// options forcing the isolating worker pool
pub fn isolated_options(concurrency: usize) -> ExecutionOptions {
    ExecutionOptions {
        isolate: true,
        ..options(concurrency)
    }
}
