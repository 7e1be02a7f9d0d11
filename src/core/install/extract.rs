use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::install::fsops::{merge_dir_into, move_entry, remove_path};
use crate::core::install::layout::{EntryKind, InstallLayout, LEGACY_LOCATIONS};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractSummary {
    pub directories: usize,
    pub files: usize,
    pub purged: Vec<PathBuf>,
    /// Legacy locations whose content was moved under `modpack/`.
    pub relocated: Vec<PathBuf>,
}

/// Unpack `archive` into the install root on a blocking thread.
/// `on_progress(done, total)` is called per archive entry.
pub async fn extract_archive<F>(
    archive: PathBuf,
    layout: InstallLayout,
    on_progress: F,
) -> LauncherResult<ExtractSummary>
where
    F: FnMut(u64, u64) + Send + 'static,
{
    tokio::task::spawn_blocking(move || extract_into(&archive, &layout, on_progress))
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?
}

/// Replace the modpack content of `layout` with the archive's entries, then
/// fold any legacy root-level content into `modpack/`.
pub fn extract_into<F>(
    archive_path: &Path,
    layout: &InstallLayout,
    mut on_progress: F,
) -> LauncherResult<ExtractSummary>
where
    F: FnMut(u64, u64),
{
    let file = fs::File::open(archive_path).map_err(|e| LauncherError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(file)?;
    let entries = plan_entries(&mut archive)?;

    let mut summary = ExtractSummary::default();
    layout.ensure_skeleton()?;

    // Nothing below this point is interrupted: a half-purged mods folder is
    // worse than a finished one.
    for target in layout.purge_targets() {
        if fs::symlink_metadata(&target).is_ok() {
            remove_path(&target)?;
            debug!("Purged {:?}", target);
            summary.purged.push(target);
        }
    }
    layout.ensure_skeleton()?;

    let total = entries.len() as u64;
    for entry in entries.iter().filter(|entry| entry.is_dir) {
        let out_path = layout.root().join(&entry.relative);
        fs::create_dir_all(&out_path).map_err(|e| LauncherError::io(&out_path, e))?;
        summary.directories += 1;
    }

    let mut done = summary.directories as u64;
    on_progress(done, total);

    for entry in entries.iter().filter(|entry| !entry.is_dir) {
        let out_path = layout.root().join(&entry.relative);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| LauncherError::io(parent, e))?;
        }
        if out_path.is_dir() {
            remove_path(&out_path)?;
        }

        let mut zipped = archive.by_index(entry.index)?;
        let mut out = fs::File::create(&out_path).map_err(|e| LauncherError::io(&out_path, e))?;
        io::copy(&mut zipped, &mut out).map_err(|e| LauncherError::io(&out_path, e))?;
        summary.files += 1;

        done += 1;
        on_progress(done, total);
    }

    summary.relocated = normalize_layout(layout)?;

    info!(
        "Extracted {} files and {} directories into {:?} (relocated {})",
        summary.files,
        summary.directories,
        layout.root(),
        summary.relocated.len()
    );
    Ok(summary)
}

struct PlannedEntry {
    index: usize,
    relative: PathBuf,
    is_dir: bool,
}

/// Validate every entry name before anything on disk is touched.
fn plan_entries(archive: &mut ZipArchive<fs::File>) -> LauncherResult<Vec<PlannedEntry>> {
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let zipped = archive.by_index(index)?;
        let relative = zipped.enclosed_name().ok_or_else(|| {
            LauncherError::InvalidArchive(format!(
                "entry '{}' escapes the install root",
                zipped.name()
            ))
        })?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        entries.push(PlannedEntry {
            index,
            relative,
            is_dir: zipped.is_dir(),
        });
    }
    Ok(entries)
}

/// Recreate the modpack skeleton and move legacy root-level content into it.
/// Returns the legacy paths that were relocated.
pub fn normalize_layout(layout: &InstallLayout) -> LauncherResult<Vec<PathBuf>> {
    layout.ensure_skeleton()?;

    let mut relocated = Vec::new();
    for location in LEGACY_LOCATIONS {
        let source = layout.root().join(location.relative);
        let destination = layout.root().join(location.destination);
        let Ok(metadata) = fs::symlink_metadata(&source) else {
            continue;
        };

        match (location.kind, metadata.is_dir()) {
            (EntryKind::Directory, true) => {
                let moved = merge_dir_into(&source, &destination)?;
                info!("Moved {} entries from {:?} to {:?}", moved, source, destination);
            }
            (EntryKind::File, false) => {
                move_entry(&source, &destination)?;
                info!("Moved {:?} to {:?}", source, destination);
            }
            _ => {
                warn!(
                    "Leaving {:?} in place: expected a {:?}",
                    source, location.kind
                );
                continue;
            }
        }
        relocated.push(source);
    }

    Ok(relocated)
}
