// ─── Launch Readiness Gate ───

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::core::config::PackProfile;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::install::{detect, InstallLayout, ScanDiagnostic};
use crate::core::launch::ComponentKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub ready: bool,
    pub install_root: PathBuf,
    pub expected_version: Option<String>,
    pub modpack_version: Option<String>,
    /// Every missing component, blocking or not.
    pub missing: Vec<ComponentKind>,
    pub blocking: Vec<ComponentKind>,
    pub scanned_dirs: Vec<PathBuf>,
    pub diagnostics: Vec<ScanDiagnostic>,
}

/// Re-run detection against the live filesystem. Nothing is cached.
pub fn check_readiness(
    layout: &InstallLayout,
    profile: &PackProfile,
    expected_version: Option<&str>,
) -> Readiness {
    let detection = detect(layout, profile, expected_version);

    let mut missing = Vec::new();
    if !detection.requirements.minecraft {
        missing.push(ComponentKind::Minecraft);
    }
    if !detection.requirements.forge {
        missing.push(ComponentKind::Forge);
    }
    if !detection.requirements.modpack {
        missing.push(ComponentKind::Modpack);
    }
    let blocking: Vec<_> = missing.iter().copied().filter(|c| c.is_blocking()).collect();

    let readiness = Readiness {
        ready: blocking.is_empty(),
        install_root: layout.root().to_path_buf(),
        expected_version: expected_version.map(str::to_string),
        modpack_version: detection.modpack_version,
        missing,
        blocking,
        scanned_dirs: detection.scanned_dirs,
        diagnostics: detection.diagnostics,
    };

    if readiness.ready {
        info!(
            "Launch readiness ok for {:?} (missing non-blocking: {:?})",
            readiness.install_root, readiness.missing
        );
    } else {
        warn!("{}", readiness.describe());
    }
    readiness
}

impl Readiness {
    /// Self-contained support message: what is missing, every directory that
    /// was scanned and every filesystem error met on the way.
    pub fn describe(&self) -> String {
        let mut message = String::new();
        let names: Vec<String> = self.missing.iter().map(ToString::to_string).collect();
        if names.is_empty() {
            let _ = write!(message, "All components present in {:?}", self.install_root);
        } else {
            let _ = write!(
                message,
                "Missing {} in {:?}",
                names.join(", "),
                self.install_root
            );
        }
        if let Some(expected) = &self.expected_version {
            let _ = write!(
                message,
                "; expected modpack {expected}, found {}",
                self.modpack_version.as_deref().unwrap_or("none")
            );
        }

        message.push_str("; scanned: ");
        if self.scanned_dirs.is_empty() {
            message.push_str("(nothing)");
        } else {
            let dirs: Vec<String> = self
                .scanned_dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect();
            message.push_str(&dirs.join(", "));
        }

        for diagnostic in &self.diagnostics {
            let _ = write!(
                message,
                "; error at {} [{}]: {}",
                diagnostic.path.display(),
                diagnostic.code,
                diagnostic.message
            );
        }
        message
    }

    /// `Ok(self)` when nothing blocks the launch, `ReadinessError` otherwise.
    pub fn into_result(self) -> LauncherResult<Readiness> {
        if self.ready {
            return Ok(self);
        }
        Err(LauncherError::Readiness {
            message: self.describe(),
            missing: self.missing,
            diagnostics: self.diagnostics,
        })
    }
}
