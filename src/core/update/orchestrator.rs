// ─── Update Orchestrator ───
// Sequences resolve → download → verify → extract → normalize → persist for
// install, update and reinstall, one operation at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::config::LauncherConfig;
use crate::core::downloader::{ArtifactFetcher, ResolvedArtifact, TempArchive, TransferEngine};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::{EventSink, ProgressScale, StatusEvent};
use crate::core::install::fsops::remove_path;
use crate::core::install::{detect, extract_archive, ExtractSummary, InstallLayout};
use crate::core::operation::{
    check_cancelled, OperationGate, OperationKind, OperationSnapshot,
};
use crate::core::state::StateStore;

const DOWNLOAD_PHASE: ProgressScale = ProgressScale::new(0, 80);
const EXTRACT_PHASE: ProgressScale = ProgressScale::new(80, 95);
const FINALIZE_START: u8 = 95;
const FINALIZE_PERSIST: u8 = 99;

/// Result of a completed install, update or reinstall.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub kind: OperationKind,
    pub install_dir: PathBuf,
    pub version: Option<String>,
    pub artifact: ResolvedArtifact,
    pub bytes: u64,
    pub sha256: String,
    pub extract: ExtractSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheck {
    pub installed_version: Option<String>,
    pub remote_version: Option<String>,
    pub update_available: bool,
}

pub struct UpdateOrchestrator {
    config: Arc<LauncherConfig>,
    store: Arc<StateStore>,
    fetcher: ArtifactFetcher,
    transfer: TransferEngine,
    gate: OperationGate,
    sink: Arc<dyn EventSink>,
}

impl UpdateOrchestrator {
    pub fn new(
        config: Arc<LauncherConfig>,
        store: Arc<StateStore>,
        client: Client,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            store,
            fetcher: ArtifactFetcher::new(client.clone()),
            transfer: TransferEngine::new(client),
            gate: OperationGate::new("operation"),
            sink,
        }
    }

    /// First-time install into `target_dir`, or the remembered/default root.
    pub async fn install(&self, target_dir: Option<PathBuf>) -> LauncherResult<OperationReport> {
        let root = match target_dir {
            Some(dir) => dir,
            None => self.install_root().await,
        };
        self.run(OperationKind::Install, root).await
    }

    /// Converge an existing install to the latest artifact.
    pub async fn update(&self) -> LauncherResult<OperationReport> {
        let root = self.install_root().await;
        self.run(OperationKind::Update, root).await
    }

    /// Wipe the install root and install from scratch.
    pub async fn reinstall(&self) -> LauncherResult<OperationReport> {
        let root = self.install_root().await;
        self.run(OperationKind::Reinstall, root).await
    }

    /// Trip the active operation's cancellation token.
    pub fn cancel(&self) -> bool {
        self.gate.cancel()
    }

    pub fn active(&self) -> Option<OperationSnapshot> {
        self.gate.snapshot()
    }

    pub async fn install_root(&self) -> PathBuf {
        self.store
            .snapshot()
            .await
            .install_dir
            .unwrap_or_else(|| self.config.default_install_dir())
    }

    /// Resolve the update source and compare against the installed version.
    /// Nothing is downloaded or persisted.
    pub async fn check_update(&self) -> LauncherResult<UpdateCheck> {
        let source = self.config.update_source()?;
        let resolution = self
            .fetcher
            .resolve(&source, &CancellationToken::new())
            .await?;
        let remote_version = resolution.artifact.version;

        let state = self.store.snapshot().await;
        let installed_version = state.installed_version().map(str::to_string);
        let update_available = match (&installed_version, &remote_version) {
            (None, _) => true,
            (Some(installed), Some(remote)) => installed != remote,
            (Some(_), None) => false,
        };

        info!(
            "Update check: installed={:?} remote={:?} available={}",
            installed_version, remote_version, update_available
        );
        Ok(UpdateCheck {
            installed_version,
            remote_version,
            update_available,
        })
    }

    async fn run(&self, kind: OperationKind, root: PathBuf) -> LauncherResult<OperationReport> {
        // A rejected request leaves the running operation and its events alone.
        let guard = self.gate.try_acquire(kind)?;
        let token = guard.token().clone();

        let result = self.pipeline(kind, &root, &token).await;
        match &result {
            Ok(report) => {
                info!(
                    "{} finished in {:?} at version {:?}",
                    kind, report.install_dir, report.version
                );
                self.sink.status(StatusEvent::complete(report.version.clone()));
            }
            Err(err) if err.is_cancelled() => {
                info!("{} cancelled", kind);
                self.sink.status(StatusEvent::Cancelled {
                    message: format!("{kind} cancelled"),
                });
            }
            Err(err) => {
                error!("{} failed: {}", kind, err);
                self.sink.status(StatusEvent::Error {
                    message: err.to_string(),
                });
            }
        }

        guard.release();
        result
    }

    async fn pipeline(
        &self,
        kind: OperationKind,
        root: &Path,
        cancel: &CancellationToken,
    ) -> LauncherResult<OperationReport> {
        check_cancelled(cancel)?;
        // An unusable source must fail before anything is deleted.
        let source = self.config.update_source()?;
        let layout = InstallLayout::new(root);

        if kind == OperationKind::Reinstall {
            check_cancelled(cancel)?;
            wipe_install_root(root).await?;
        }
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| LauncherError::io(root, e))?;

        self.sink.status(StatusEvent::FetchingFeed);
        let resolution = self.fetcher.resolve(&source, cancel).await?;
        let artifact = resolution.artifact;

        let temp = TempArchive::create_in(&self.config.temp_dir()).await?;
        let sink = self.sink.clone();
        let outcome = self
            .transfer
            .download(
                &artifact,
                resolution.body,
                &temp,
                DOWNLOAD_PHASE,
                |progress| sink.status(StatusEvent::Downloading { progress }),
                cancel,
            )
            .await?;

        // Last checkpoint: extraction purges mods and runs to completion.
        check_cancelled(cancel)?;
        let sink = self.sink.clone();
        let mut scale = EXTRACT_PHASE;
        let extract = extract_archive(temp.path().to_path_buf(), layout.clone(), move |done, total| {
            if let Some(progress) = scale.advance(done, total) {
                sink.status(StatusEvent::Extracting { progress });
            }
        })
        .await?;
        drop(temp);

        self.sink.status(StatusEvent::Finalizing {
            progress: FINALIZE_START,
        });
        let detected = {
            let layout = layout.clone();
            let profile = self.config.profile.clone();
            let expected = artifact.version.clone();
            tokio::task::spawn_blocking(move || detect(&layout, &profile, expected.as_deref()))
                .await
                .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?
        };

        if artifact.version.is_some() && !detected.matched_expected {
            warn!(
                "Artifact announced version {:?} but the install root shows {:?}",
                artifact.version, detected.modpack_version
            );
        }
        let version = artifact
            .version
            .clone()
            .or_else(|| detected.modpack_version.clone());

        let install_dir = root.to_path_buf();
        let remote_version = artifact.version.clone();
        let persisted_version = version.clone();
        self.store
            .update(move |state| {
                state.install_dir = Some(install_dir);
                if let Some(version) = persisted_version {
                    state.installed_version = Some(version);
                }
                if let Some(remote) = remote_version {
                    state.last_known_version = Some(remote);
                }
            })
            .await?;
        self.sink.status(StatusEvent::Finalizing {
            progress: FINALIZE_PERSIST,
        });

        Ok(OperationReport {
            kind,
            install_dir: root.to_path_buf(),
            version,
            artifact,
            bytes: outcome.bytes,
            sha256: outcome.sha256,
            extract,
        })
    }
}

/// Remove the whole install root. Not cancellable once started.
async fn wipe_install_root(root: &Path) -> LauncherResult<()> {
    info!("Removing install root {:?} for reinstall", root);
    let target = root.to_path_buf();
    tokio::task::spawn_blocking(move || remove_path(&target))
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{KEY_DATA_DIR, KEY_EXPECTED_SHA256, KEY_FEED_URL, KEY_ZIP_URL};
    use crate::core::events::{ChannelSink, LauncherEvent};
    use crate::core::install::extract::tests::write_zip;
    use httpmock::prelude::*;
    use sha2::{Digest, Sha256};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        _dir: tempfile::TempDir,
        data_dir: PathBuf,
        orchestrator: Arc<UpdateOrchestrator>,
        store: Arc<StateStore>,
        events: UnboundedReceiver<LauncherEvent>,
    }

    async fn harness(pairs: &[(&str, String)]) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let mut map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        map.insert(KEY_DATA_DIR.into(), data_dir.display().to_string());
        let config = Arc::new(LauncherConfig::from_lookup(|key| map.get(key).cloned()));

        let store = Arc::new(StateStore::open(config.state_file()).await);
        let (tx, events) = tokio::sync::mpsc::unbounded_channel();
        let orchestrator = Arc::new(UpdateOrchestrator::new(
            config,
            store.clone(),
            Client::new(),
            Arc::new(ChannelSink::new(tx)),
        ));
        Harness {
            _dir: dir,
            data_dir,
            orchestrator,
            store,
            events,
        }
    }

    fn pack_zip(dir: &Path, entries: &[(&str, &[u8])]) -> Vec<u8> {
        let path = dir.join("fixture.zip");
        write_zip(&path, entries);
        std::fs::read(path).unwrap()
    }

    fn drain(rx: &mut UnboundedReceiver<LauncherEvent>) -> Vec<StatusEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let LauncherEvent::Status(status) = event {
                out.push(status);
            }
        }
        out
    }

    fn temp_files(data_dir: &Path) -> usize {
        std::fs::read_dir(data_dir.join("tmp"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    async fn wait_until_busy(orchestrator: &UpdateOrchestrator) {
        for _ in 0..100 {
            if orchestrator.active().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("operation never started");
    }

    #[tokio::test]
    async fn descriptor_source_installs_real_artifact() {
        let server = MockServer::start_async().await;
        let fixtures = tempfile::tempdir().unwrap();
        let zip = pack_zip(
            fixtures.path(),
            &[("modpack/mods/hellasforms-3.1.0.jar", b"jar")],
        );
        let descriptor = serde_json::json!({
            "modpack": { "url": server.url("/real.zip"), "version": "3.1.0" }
        });
        server.mock(|when, then| {
            when.method(GET).path("/latest");
            then.status(200)
                .header("content-type", "application/json")
                .body(descriptor.to_string());
        });
        let real = server.mock(|when, then| {
            when.method(GET).path("/real.zip");
            then.status(200)
                .header("content-type", "application/zip")
                .body(zip.clone());
        });

        let mut h = harness(&[(KEY_ZIP_URL, server.url("/latest"))]).await;
        let report = h.orchestrator.install(None).await.unwrap();
        real.assert();

        assert_eq!(report.version.as_deref(), Some("3.1.0"));
        let state = h.store.snapshot().await;
        assert_eq!(state.installed_version(), Some("3.1.0"));
        assert_eq!(state.last_known_version.as_deref(), Some("3.1.0"));
        assert_eq!(state.install_dir.as_deref(), Some(report.install_dir.as_path()));
        assert!(InstallLayout::new(&report.install_dir)
            .mods_dir()
            .join("hellasforms-3.1.0.jar")
            .is_file());
        assert_eq!(temp_files(&h.data_dir), 0);

        let events = drain(&mut h.events);
        assert_eq!(events.first(), Some(&StatusEvent::FetchingFeed));
        assert_eq!(events.last(), Some(&StatusEvent::complete(Some("3.1.0".into()))));
        let phase = |e: &StatusEvent| match e {
            StatusEvent::FetchingFeed => 0,
            StatusEvent::Downloading { .. } => 1,
            StatusEvent::Extracting { .. } => 2,
            StatusEvent::Finalizing { .. } => 3,
            _ => 4,
        };
        assert!(events.windows(2).all(|w| phase(&w[0]) <= phase(&w[1])));
        assert!(events
            .iter()
            .all(|e| !matches!(e, StatusEvent::Downloading { progress } if *progress > 99)));
    }

    #[tokio::test]
    async fn checksum_mismatch_prevents_extraction() {
        let server = MockServer::start_async().await;
        let fixtures = tempfile::tempdir().unwrap();
        let zip = pack_zip(fixtures.path(), &[("modpack/mods/hellasforms-2.0.0.jar", b"jar")]);
        server.mock(|when, then| {
            when.method(GET).path("/pack.zip");
            then.status(200)
                .header("content-type", "application/zip")
                .body(zip.clone());
        });

        let mut h = harness(&[
            (KEY_ZIP_URL, server.url("/pack.zip")),
            (KEY_EXPECTED_SHA256, "ab".repeat(32)),
        ])
        .await;
        let root = h.orchestrator.install_root().await;
        let layout = InstallLayout::new(&root);
        layout.ensure_skeleton().unwrap();
        std::fs::write(layout.mods_dir().join("oldmod.jar"), "old").unwrap();

        let err = h.orchestrator.update().await.unwrap_err();
        assert_eq!(err.kind(), "IntegrityError");
        assert!(layout.mods_dir().join("oldmod.jar").is_file());
        assert!(!layout.mods_dir().join("hellasforms-2.0.0.jar").exists());
        assert_eq!(h.store.snapshot().await.installed_version(), None);
        assert_eq!(temp_files(&h.data_dir), 0);
        assert!(matches!(
            drain(&mut h.events).last(),
            Some(StatusEvent::Error { .. })
        ));
    }

    #[tokio::test]
    async fn matching_checksum_and_update_replace_old_mods() {
        let server = MockServer::start_async().await;
        let fixtures = tempfile::tempdir().unwrap();
        let zip = pack_zip(fixtures.path(), &[("mods/hellasforms-2.0.0.jar", b"jar")]);
        let digest = hex::encode(Sha256::digest(&zip));
        server.mock(|when, then| {
            when.method(GET).path("/pack.zip");
            then.status(200)
                .header("content-type", "application/zip")
                .body(zip.clone());
        });

        let h = harness(&[
            (KEY_ZIP_URL, server.url("/pack.zip")),
            (KEY_EXPECTED_SHA256, digest.to_uppercase()),
        ])
        .await;
        let layout = InstallLayout::new(h.orchestrator.install_root().await);
        layout.ensure_skeleton().unwrap();
        std::fs::write(layout.mods_dir().join("oldmod.jar"), "old").unwrap();

        let report = h.orchestrator.update().await.unwrap();
        assert!(!layout.mods_dir().join("oldmod.jar").exists());
        assert!(layout.mods_dir().join("hellasforms-2.0.0.jar").is_file());
        assert!(!layout.root().join("mods").exists());
        // no version configured: falls back to the detected jar
        assert_eq!(report.version.as_deref(), Some("2.0.0"));
        assert_eq!(h.store.snapshot().await.installed_version(), Some("2.0.0"));
        assert_eq!(h.store.snapshot().await.last_known_version, None);
    }

    #[tokio::test]
    async fn cancellation_mid_download_leaves_state_untouched() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/slow.zip");
            then.status(200)
                .delay(Duration::from_secs(10))
                .body("never arrives in time");
        });

        let mut h = harness(&[(KEY_ZIP_URL, server.url("/slow.zip"))]).await;
        h.store
            .update(|s| s.installed_version = Some("1.0.0".into()))
            .await
            .unwrap();

        let orchestrator = h.orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.update().await });
        wait_until_busy(&h.orchestrator).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.orchestrator.cancel());

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.kind(), "CancelledError");
        assert_eq!(temp_files(&h.data_dir), 0);
        assert_eq!(h.store.snapshot().await.installed_version(), Some("1.0.0"));
        assert!(h.orchestrator.active().is_none());
        assert!(matches!(
            drain(&mut h.events).last(),
            Some(StatusEvent::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn second_operation_is_rejected_while_first_runs() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/slow.zip");
            then.status(200).delay(Duration::from_secs(10)).body("x");
        });

        let h = harness(&[(KEY_ZIP_URL, server.url("/slow.zip"))]).await;
        let orchestrator = h.orchestrator.clone();
        let first = tokio::spawn(async move { orchestrator.update().await });
        wait_until_busy(&h.orchestrator).await;
        let before = h.orchestrator.active().unwrap();

        let err = h.orchestrator.reinstall().await.unwrap_err();
        assert_eq!(err.kind(), "ConcurrencyError");
        assert!(err.to_string().contains("another operation is in progress"));

        let after = h.orchestrator.active().unwrap();
        assert_eq!(before.id, after.id);
        assert_eq!(after.kind, OperationKind::Update);
        assert!(!after.cancelling);

        h.orchestrator.cancel();
        assert!(first.await.unwrap().unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn reinstall_with_bad_source_deletes_nothing() {
        let mut h = harness(&[(KEY_FEED_URL, "ftp://example.com/feed.json".into())]).await;
        let root = h.orchestrator.install_root().await;
        let layout = InstallLayout::new(&root);
        layout.ensure_skeleton().unwrap();
        std::fs::write(layout.mods_dir().join("keep.jar"), "k").unwrap();

        let err = h.orchestrator.reinstall().await.unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
        assert!(layout.mods_dir().join("keep.jar").is_file());
        assert!(matches!(
            drain(&mut h.events).as_slice(),
            [StatusEvent::Error { .. }]
        ));
    }

    #[tokio::test]
    async fn reinstall_wipes_everything_under_the_root() {
        let server = MockServer::start_async().await;
        let fixtures = tempfile::tempdir().unwrap();
        let zip = pack_zip(fixtures.path(), &[("modpack/mods/hellasforms-1.1.0.jar", b"jar")]);
        server.mock(|when, then| {
            when.method(GET).path("/feed.json");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    serde_json::json!({ "url": server.url("/pack.zip"), "version": "1.1.0" })
                        .to_string(),
                );
        });
        server.mock(|when, then| {
            when.method(GET).path("/pack.zip");
            then.status(200).body(zip.clone());
        });

        let h = harness(&[(KEY_FEED_URL, server.url("/feed.json"))]).await;
        let root = h.orchestrator.install_root().await;
        std::fs::create_dir_all(root.join("versions").join("stale")).unwrap();

        h.orchestrator.reinstall().await.unwrap();
        assert!(!root.join("versions").join("stale").exists());
        assert!(InstallLayout::new(&root)
            .mods_dir()
            .join("hellasforms-1.1.0.jar")
            .is_file());
        assert_eq!(h.store.snapshot().await.installed_version(), Some("1.1.0"));
    }

    #[tokio::test]
    async fn check_update_compares_versions_without_persisting() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/feed.json");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"url":"https://x/pack.zip","version":"2.0.0"}"#);
        });

        let h = harness(&[(KEY_FEED_URL, server.url("/feed.json"))]).await;
        h.store
            .update(|s| s.installed_version = Some("1.0.0".into()))
            .await
            .unwrap();

        let check = h.orchestrator.check_update().await.unwrap();
        assert_eq!(
            check,
            UpdateCheck {
                installed_version: Some("1.0.0".into()),
                remote_version: Some("2.0.0".into()),
                update_available: true,
            }
        );
        assert_eq!(h.store.snapshot().await.last_known_version, None);
    }
}
