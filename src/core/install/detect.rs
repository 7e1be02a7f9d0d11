// ─── Installation detection ───
// Content inspection of an install root. Never fails: unreadable
// directories become diagnostics next to whatever could be read.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::core::config::PackProfile;
use crate::core::install::layout::{InstallLayout, MODPACK_DIR, MODS_DIR};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanDiagnostic {
    pub path: PathBuf,
    pub message: String,
    pub code: String,
}

impl ScanDiagnostic {
    pub(crate) fn from_io(path: &Path, err: &io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            message: err.to_string(),
            code: match err.raw_os_error() {
                Some(os) => format!("{:?}/os-{os}", err.kind()),
                None => format!("{:?}", err.kind()),
            },
        }
    }
}

/// Which prerequisites are in place. `true` means present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Requirements {
    pub minecraft: bool,
    pub forge: bool,
    pub modpack: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub requirements: Requirements,
    /// First pack version found, or the expected one when it was matched.
    pub modpack_version: Option<String>,
    pub matched_expected: bool,
    /// Any versioned jar or any non-empty mods directory.
    pub modpack_present: bool,
    #[serde(skip)]
    nonempty_mods_dir: bool,
    pub scanned_dirs: Vec<PathBuf>,
    pub diagnostics: Vec<ScanDiagnostic>,
}

impl Detection {
    /// Whether the modpack counts as installed for `expected`.
    ///
    /// With an expected version, an exact jar match is required unless no
    /// versioned jar exists at all, in which case a non-empty mods directory
    /// is accepted (unversioned installs). Without one, presence suffices.
    pub fn modpack_satisfied(&self, expected: Option<&str>) -> bool {
        match expected.map(str::trim).filter(|v| !v.is_empty()) {
            Some(_) if self.matched_expected => true,
            Some(_) => self.modpack_version.is_none() && self.nonempty_mods_dir,
            None => self.modpack_present,
        }
    }
}

/// Inspect `layout` for the pinned game, loader and pack versions.
pub fn detect(layout: &InstallLayout, profile: &PackProfile, expected: Option<&str>) -> Detection {
    let expected = expected.map(str::trim).filter(|v| !v.is_empty());
    let mut diagnostics = Vec::new();

    let minecraft = layout.version_json(&profile.minecraft_version).is_file();
    let forge = forge_present(layout, profile);

    let candidates = mod_directories(layout, &mut diagnostics);
    let mut scanned_dirs = Vec::with_capacity(candidates.len());
    let mut first_version: Option<String> = None;
    let mut matched_expected = false;
    let mut nonempty_mods_dir = false;

    for dir in candidates {
        scanned_dirs.push(dir.clone());
        let names = match sorted_entry_names(&dir) {
            Ok(names) => names,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                debug!("Cannot scan {:?}: {}", dir, e);
                diagnostics.push(ScanDiagnostic::from_io(&dir, &e));
                continue;
            }
        };

        if !names.is_empty() {
            nonempty_mods_dir = true;
        }
        for name in &names {
            let Some(version) = profile.jar_version(name) else {
                continue;
            };
            if first_version.is_none() {
                first_version = Some(version.to_string());
            }
            if expected == Some(version) {
                matched_expected = true;
                break;
            }
        }
        if matched_expected {
            break;
        }
    }

    let modpack_version = if matched_expected {
        expected.map(str::to_string)
    } else {
        first_version
    };

    let mut detection = Detection {
        requirements: Requirements {
            minecraft,
            forge,
            modpack: false,
        },
        modpack_present: modpack_version.is_some() || nonempty_mods_dir,
        modpack_version,
        matched_expected,
        nonempty_mods_dir,
        scanned_dirs,
        diagnostics,
    };
    detection.requirements.modpack = detection.modpack_satisfied(expected);
    detection
}

fn forge_present(layout: &InstallLayout, profile: &PackProfile) -> bool {
    let id = &profile.loader_version_id;
    let installer = profile.loader_installer_name();
    layout.version_json(id).is_file()
        || layout.versions_dir().join(id).join(&installer).is_file()
        || layout.forge_dir().join(&installer).is_file()
}

/// Canonical, legacy, then every `<root>/<child>/mods` in name order.
fn mod_directories(layout: &InstallLayout, diagnostics: &mut Vec<ScanDiagnostic>) -> Vec<PathBuf> {
    let mut dirs = vec![layout.mods_dir(), layout.legacy_mods_dir()];

    match sorted_entry_names(layout.root()) {
        Ok(children) => {
            for child in children {
                if child == MODPACK_DIR {
                    continue;
                }
                let candidate = layout.root().join(&child).join(MODS_DIR);
                if candidate.is_dir() {
                    dirs.push(candidate);
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => diagnostics.push(ScanDiagnostic::from_io(layout.root(), &e)),
    }

    let mut unique = Vec::with_capacity(dirs.len());
    for dir in dirs {
        if !unique.contains(&dir) {
            unique.push(dir);
        }
    }
    unique
}

fn sorted_entry_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}
