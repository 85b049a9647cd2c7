use std::{
    ffi::OsStr,
    fs, io,
    ops::Deref,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// prefix of every scratch directory created next to the solver
pub const SCRATCH_PREFIX: &str = "tmp";

/// A private directory `<parent>/tmp<id>` that is removed on drop
#[derive(Debug)]
pub struct ScratchDir {
    id: Uuid,
    path: PathBuf,
}

impl ScratchDir {
    /// create a fresh scratch directory, fails if the name is already taken
    pub fn create(parent: &Path) -> io::Result<Self> {
        let id = Uuid::new_v4();
        let path = parent.join(format!("{SCRATCH_PREFIX}{id}"));

        // create_dir (not create_dir_all) so an existing directory is never shared
        fs::create_dir(&path)?;
        debug!(path = ?path, "Created scratch directory");

        Ok(Self { id, path })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Deref for ScratchDir {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Removed scratch directory"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => error!(error = ?error, path = ?self.path, "Failed to remove scratch directory"),
        }
    }
}

/// check if a directory name looks like one of ours, `tmp` or `tmp<uuid>`
pub fn is_scratch_name(name: &OsStr) -> bool {
    match name.to_str().and_then(|name| name.strip_prefix(SCRATCH_PREFIX)) {
        Some("") => true,
        Some(id) => Uuid::parse_str(id).is_ok(),
        None => false,
    }
}

/// remove scratch directories left behind by killed runs
///
/// Only safe while no batch is running against `dir`. Returns the removed paths.
pub fn remove_stale(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;

        if !entry.file_type()?.is_dir() || !is_scratch_name(&entry.file_name()) {
            continue;
        }

        let path = entry.path();
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(path = ?path, "Removed stale scratch directory");
                removed.push(path);
            }
            Err(error) => warn!(error = ?error, path = ?path, "Failed to remove stale scratch directory"),
        }
    }

    Ok(removed)
}
