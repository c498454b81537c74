//! Walking local sync sources while honoring per-directory ignore lists.

use crate::api_client::SmugError;
use crate::foundation::persistent::PersistentDict;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

/// Per-directory settings file; its `ignore` entry lists names to skip.
pub const IGNORE_FILE: &str = ".smugsync";

/// One visited directory with its kept subdirectory and file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkStep {
    pub dir: PathBuf,
    pub dirs: Vec<String>,
    pub files: Vec<String>,
}

/// Names listed in the ignore file of `dir`.
pub fn ignore_list(dir: &Path) -> Result<HashSet<String>, SmugError> {
    let settings = PersistentDict::open(dir.join(IGNORE_FILE))?;
    Ok(settings
        .get::<Vec<String>>("ignore")
        .unwrap_or_default()
        .into_iter()
        .collect())
}

/// Walks `source` top-down and returns its directories sorted by path.
///
/// Ignored subdirectories are not descended into. Symbolic links are listed
/// as files and never followed. Returns `None` when `aborting` is raised
/// during the walk.
pub fn walk_source(source: &Path, aborting: &AtomicBool) -> Result<Option<Vec<WalkStep>>, SmugError> {
    let mut steps = Vec::new();
    let mut pending = vec![source.to_path_buf()];
    while let Some(dir) = pending.pop() {
        if aborting.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let step = read_step(dir)?;
        pending.extend(step.dirs.iter().map(|name| step.dir.join(name)));
        steps.push(step);
    }
    steps.sort_by(|a, b| a.dir.cmp(&b.dir));
    Ok(Some(steps))
}

fn read_step(dir: PathBuf) -> Result<WalkStep, SmugError> {
    let ignored = ignore_list(&dir)?;
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in WalkDir::new(&dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if ignored.contains(&name) {
            continue;
        }
        if entry.file_type().is_dir() {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    Ok(WalkStep { dir, dirs, files })
}
