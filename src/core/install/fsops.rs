// Blocking filesystem helpers for the reconciler. Callers run them inside
// `spawn_blocking`.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::core::error::{LauncherError, LauncherResult};

#[cfg(windows)]
const CROSS_DEVICE_CODE: i32 = 17; // ERROR_NOT_SAME_DEVICE
#[cfg(not(windows))]
const CROSS_DEVICE_CODE: i32 = 18; // EXDEV

pub fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(CROSS_DEVICE_CODE)
}

/// Remove a file or directory tree. Missing paths are fine.
pub fn remove_path(path: &Path) -> LauncherResult<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(LauncherError::io(path, e)),
    };
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LauncherError::io(path, e)),
    }
}

/// Move `source` to `destination`, replacing it. Falls back to copy-then-delete
/// when a rename would cross filesystems.
pub fn move_entry(source: &Path, destination: &Path) -> LauncherResult<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| LauncherError::io(parent, e))?;
    }
    remove_path(destination)?;

    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!(
                "Rename {:?} -> {:?} crosses devices, copying instead",
                source, destination
            );
            copy_then_remove(source, destination)
        }
        Err(e) => Err(LauncherError::io(source, e)),
    }
}

pub(crate) fn copy_then_remove(source: &Path, destination: &Path) -> LauncherResult<()> {
    let metadata = fs::symlink_metadata(source).map_err(|e| LauncherError::io(source, e))?;
    if metadata.is_dir() {
        copy_dir_recursive(source, destination)?;
    } else {
        fs::copy(source, destination).map_err(|e| LauncherError::io(destination, e))?;
    }
    remove_path(source)
}

/// Move every entry of `source` into `destination`, recursing into
/// directories that exist on both sides, then drop the emptied `source`.
/// Returns the number of entries moved.
pub fn merge_dir_into(source: &Path, destination: &Path) -> LauncherResult<usize> {
    fs::create_dir_all(destination).map_err(|e| LauncherError::io(destination, e))?;

    let mut entries = fs::read_dir(source)
        .map_err(|e| LauncherError::io(source, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LauncherError::io(source, e))?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut moved = 0;
    for entry in entries {
        let from = entry.path();
        let to = destination.join(entry.file_name());
        let from_is_dir = entry
            .file_type()
            .map_err(|e| LauncherError::io(&from, e))?
            .is_dir();

        if from_is_dir && to.is_dir() {
            moved += merge_dir_into(&from, &to)?;
        } else {
            move_entry(&from, &to)?;
            moved += 1;
        }
    }

    remove_path(source)?;
    Ok(moved)
}

pub fn copy_dir_recursive(source: &Path, destination: &Path) -> LauncherResult<()> {
    fs::create_dir_all(destination).map_err(|e| LauncherError::io(destination, e))?;

    for entry in fs::read_dir(source).map_err(|e| LauncherError::io(source, e))? {
        let entry = entry.map_err(|e| LauncherError::io(source, e))?;
        let src_path = entry.path();
        let dst_path = destination.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| LauncherError::io(&src_path, e))?;

        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            if dst_path.exists() {
                fs::remove_file(&dst_path).map_err(|e| LauncherError::io(&dst_path, e))?;
            }
            fs::copy(&src_path, &dst_path).map_err(|e| LauncherError::io(&dst_path, e))?;
        }
    }

    Ok(())
}
