//! File relocation helpers shared by the stages.

use std::fs::{self, File, FileTimes};
use std::path::{Path, PathBuf};

use crate::error::{IoContext, Result};
use crate::fingerprint::TEMPLATE_EXT;

/// True for paths ending in `.yaml` (case-sensitive, `.yml` is not a template).
pub fn is_template(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(TEMPLATE_EXT)
}

/// Immediate template files of `dir`, sorted by name. Subdirectories are not entered.
pub fn template_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let path = entry.at(dir)?.path();
        if path.is_file() && is_template(&path) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

/// Does `dir` exist and already hold at least one template?
pub fn holds_templates(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    Ok(!template_entries(dir)?.is_empty())
}

/// Copy a file, carrying over permissions and access/modification times.
pub fn copy_preserving(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).at(src)?;

    let metadata = fs::metadata(src).at(src)?;
    let mut times = FileTimes::new();
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }

    // A read-only copy cannot be reopened for writing; its times stay as the copy left them.
    match File::options().write(true).open(dst) {
        Ok(file) => {
            if let Err(e) = file.set_times(times) {
                tracing::debug!(path = %dst.display(), error = %e, "could not preserve file times");
            }
        }
        Err(e) => {
            tracing::debug!(path = %dst.display(), error = %e, "could not preserve file times");
        }
    }

    Ok(())
}

/// Move a file, falling back to copy-then-delete when a rename is not possible
/// (e.g. across file systems).
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_preserving(src, dst)?;
    fs::remove_file(src).at(src)
}
