use std::path::{Path, PathBuf};

use crate::core::error::{LauncherError, LauncherResult};

pub const MODPACK_DIR: &str = "modpack";
pub const MODS_DIR: &str = "mods";
pub const RESOURCEPACKS_DIR: &str = "resourcepacks";
pub const VERSIONS_DIR: &str = "versions";
pub const FORGE_DIR: &str = "forge";
pub const LIBRARIES_DIR: &str = "libraries";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Contents are merged entry by entry into the destination directory.
    Directory,
    /// Moved as a whole, replacing whatever sits at the destination.
    File,
}

/// A pre-migration location under the install root and where its content
/// belongs now. Both paths are relative to the install root.
#[derive(Debug, Clone, Copy)]
pub struct LegacyLocation {
    pub relative: &'static str,
    pub destination: &'static str,
    pub kind: EntryKind,
}

pub const LEGACY_LOCATIONS: &[LegacyLocation] = &[
    LegacyLocation {
        relative: "mods",
        destination: "modpack/mods",
        kind: EntryKind::Directory,
    },
    LegacyLocation {
        relative: "resourcepacks",
        destination: "modpack/resourcepacks",
        kind: EntryKind::Directory,
    },
    LegacyLocation {
        relative: "servers.dat",
        destination: "modpack/servers.dat",
        kind: EntryKind::File,
    },
    LegacyLocation {
        relative: "servers.dat_old",
        destination: "modpack/servers.dat_old",
        kind: EntryKind::File,
    },
];

/// Wiped before every extraction so mods are replaced, never merged.
pub const PURGED_ON_EXTRACT: &[&str] = &[
    "modpack/mods",
    "modpack/resourcepacks",
    "mods",
    "resourcepacks",
];

/// Paths inside one install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn modpack_dir(&self) -> PathBuf {
        self.root.join(MODPACK_DIR)
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.modpack_dir().join(MODS_DIR)
    }

    pub fn resourcepacks_dir(&self) -> PathBuf {
        self.modpack_dir().join(RESOURCEPACKS_DIR)
    }

    pub fn legacy_mods_dir(&self) -> PathBuf {
        self.root.join(MODS_DIR)
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join(VERSIONS_DIR)
    }

    pub fn forge_dir(&self) -> PathBuf {
        self.root.join(FORGE_DIR)
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.root.join(LIBRARIES_DIR)
    }

    /// `versions/<id>/<id>.json`
    pub fn version_json(&self, id: &str) -> PathBuf {
        self.versions_dir().join(id).join(format!("{id}.json"))
    }

    pub fn version_jar(&self, id: &str) -> PathBuf {
        self.versions_dir().join(id).join(format!("{id}.jar"))
    }

    pub fn purge_targets(&self) -> Vec<PathBuf> {
        PURGED_ON_EXTRACT
            .iter()
            .map(|relative| self.root.join(relative))
            .collect()
    }

    /// Create `modpack/`, `modpack/mods` and `modpack/resourcepacks`.
    pub fn ensure_skeleton(&self) -> LauncherResult<()> {
        for dir in [self.modpack_dir(), self.mods_dir(), self.resourcepacks_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| LauncherError::io(&dir, e))?;
        }
        Ok(())
    }
}
