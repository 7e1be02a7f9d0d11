// ─── Launch ───
// readiness — pre-launch gate over the reconciler's detection
// java      — Java binary resolution
// profile   — version JSON inheritance, classpath and argument building
// task      — process spawn and supervision

pub mod java;
pub mod profile;
pub mod readiness;
pub mod task;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::core::auth::LaunchAccount;
use crate::core::config::PackProfile;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::{EventSink, LaunchEvent, LogLevel};
use crate::core::install::{InstallLayout, ScanDiagnostic};
use crate::core::operation::{check_cancelled, OperationGuard};

pub use profile::{build_launch_profile, GameCommand, LaunchContext, LaunchProfile};
pub use readiness::{check_readiness, Readiness};
pub use task::{spawn_game, GameExit, LaunchHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Minecraft,
    Forge,
    Modpack,
}

impl ComponentKind {
    /// Only the modpack blocks a launch; the game and loader can be
    /// fetched on demand.
    pub fn is_blocking(self) -> bool {
        matches!(self, ComponentKind::Modpack)
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::Minecraft => write!(f, "minecraft"),
            ComponentKind::Forge => write!(f, "forge"),
            ComponentKind::Modpack => write!(f, "modpack"),
        }
    }
}

/// Everything the launch workflow needs, owned so it can cross into
/// blocking tasks.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub layout: InstallLayout,
    pub profile: PackProfile,
    pub expected_version: Option<String>,
    pub account: LaunchAccount,
    pub java_path: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub max_memory_mb: u32,
}

/// Check readiness, build the command line and start the game. Terminal
/// failures are reported through `sink` as well as returned.
pub async fn launch_game(
    request: LaunchRequest,
    guard: OperationGuard,
    sink: Arc<dyn EventSink>,
) -> LauncherResult<LaunchHandle> {
    match prepare_and_spawn(request, guard, sink.clone()).await {
        Ok(handle) => Ok(handle),
        Err(err) if err.is_cancelled() => {
            info!("Launch cancelled before the game started");
            sink.launch(LaunchEvent::Cancelled {
                message: "Launch cancelled".into(),
            });
            Err(err)
        }
        Err(err) => {
            error!("Launch failed: {}", err);
            sink.launch(LaunchEvent::Error {
                message: err.to_string(),
            });
            Err(err)
        }
    }
}

async fn prepare_and_spawn(
    request: LaunchRequest,
    guard: OperationGuard,
    sink: Arc<dyn EventSink>,
) -> LauncherResult<LaunchHandle> {
    sink.launch(LaunchEvent::Checking);
    check_cancelled(guard.token())?;

    let readiness = {
        let layout = request.layout.clone();
        let profile = request.profile.clone();
        let expected = request.expected_version.clone();
        tokio::task::spawn_blocking(move || {
            check_readiness(&layout, &profile, expected.as_deref())
        })
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?
    }
    .into_result()?;

    for component in &readiness.missing {
        let line = format!("{component} metadata not found under {:?}", readiness.install_root);
        warn!("{}", line);
        sink.launch(LaunchEvent::Log {
            level: LogLevel::Warn,
            line,
        });
    }
    check_cancelled(guard.token())?;

    let java = java::resolve_java_binary(request.java_path.as_deref(), &request.data_dir)?;

    let launch_profile = {
        let request = request.clone();
        tokio::task::spawn_blocking(move || {
            build_launch_profile(&LaunchContext {
                layout: &request.layout,
                profile: &request.profile,
                account: &request.account,
                java,
                max_memory_mb: request.max_memory_mb,
            })
        })
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?
    }
    .map_err(|err| loader_profile_error(err, &readiness))?;

    check_cancelled(guard.token())?;
    sink.launch(LaunchEvent::Launching);
    spawn_game(&launch_profile.command, guard, sink)
}

/// An unreadable loader profile means the loader is not really installed.
fn loader_profile_error(err: LauncherError, readiness: &Readiness) -> LauncherError {
    let mut diagnostics = readiness.diagnostics.clone();
    let detail = match &err {
        LauncherError::Io { path, source } => {
            diagnostics.push(ScanDiagnostic::from_io(path, source));
            format!("cannot read loader profile {}: {source}", path.display())
        }
        LauncherError::Json(e) => format!("loader profile is malformed: {e}"),
        _ => return err,
    };

    let mut missing = readiness.missing.clone();
    if !missing.contains(&ComponentKind::Forge) {
        missing.push(ComponentKind::Forge);
    }
    LauncherError::Readiness {
        message: format!("{detail}; {}", readiness.describe()),
        missing,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{ChannelSink, LauncherEvent};
    use crate::core::operation::{OperationGate, OperationKind};
    use std::fs;

    fn request_for(root: &std::path::Path) -> LaunchRequest {
        LaunchRequest {
            layout: InstallLayout::new(root),
            profile: PackProfile::default(),
            expected_version: Some("1.0.0".into()),
            account: LaunchAccount::offline("Ash"),
            java_path: Some(root.join("fake-java")),
            data_dir: root.to_path_buf(),
            max_memory_mb: 4096,
        }
    }

    #[test]
    fn only_modpack_is_blocking() {
        assert!(ComponentKind::Modpack.is_blocking());
        assert!(!ComponentKind::Forge.is_blocking());
        assert!(!ComponentKind::Minecraft.is_blocking());
        assert_eq!(
            serde_json::to_string(&ComponentKind::Forge).unwrap(),
            "\"forge\""
        );
    }

    #[tokio::test]
    async fn missing_modpack_blocks_launch_and_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let gate = OperationGate::new("launch");
        let guard = gate.try_acquire(OperationKind::Launch).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let err = launch_game(request_for(dir.path()), guard, Arc::new(ChannelSink::new(tx)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ReadinessError");
        assert!(!gate.is_busy());
        assert_eq!(
            rx.try_recv().unwrap(),
            LauncherEvent::Launch(LaunchEvent::Checking)
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            LauncherEvent::Launch(LaunchEvent::Error { .. })
        ));
    }

    #[tokio::test]
    async fn unreadable_loader_profile_is_readiness_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_for(dir.path());
        request.layout.ensure_skeleton().unwrap();
        fs::write(request.layout.mods_dir().join("hellasforms-1.0.0.jar"), "jar").unwrap();
        fs::write(dir.path().join("fake-java"), "").unwrap();

        let gate = OperationGate::new("launch");
        let guard = gate.try_acquire(OperationKind::Launch).unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let err = launch_game(request, guard, Arc::new(ChannelSink::new(tx)))
            .await
            .unwrap_err();

        match err {
            LauncherError::Readiness {
                missing,
                diagnostics,
                message,
            } => {
                assert!(missing.contains(&ComponentKind::Forge));
                assert_eq!(diagnostics.len(), 1);
                assert!(message.contains("loader profile"));
            }
            other => panic!("expected readiness error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_launch_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let gate = OperationGate::new("launch");
        let guard = gate.try_acquire(OperationKind::Launch).unwrap();
        gate.cancel();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let err = launch_game(request_for(dir.path()), guard, Arc::new(ChannelSink::new(tx)))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        let _checking = rx.try_recv().unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            LauncherEvent::Launch(LaunchEvent::Cancelled { .. })
        ));
    }
}
