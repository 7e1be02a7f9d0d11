use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;

use crate::core::auth::LaunchAccount;
use crate::core::config::LauncherConfig;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::EventSink;
use crate::core::http::build_http_client;
use crate::core::install::{detect, InstallLayout, Requirements, ScanDiagnostic};
use crate::core::launch::LaunchRequest;
use crate::core::operation::{OperationGate, OperationSnapshot};
use crate::core::state::store::StateStore;
use crate::core::update::UpdateOrchestrator;

/// What the launcher knows right now, without touching the install root.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherSnapshot {
    pub install_dir: PathBuf,
    pub installed_version: Option<String>,
    pub last_known_version: Option<String>,
    pub username: Option<String>,
    pub active_operation: Option<OperationSnapshot>,
    pub launch_in_progress: bool,
}

/// Detection run against the install root, joined with persisted versions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationState {
    pub install_dir: PathBuf,
    pub install_dir_exists: bool,
    pub requirements: Requirements,
    pub modpack_version: Option<String>,
    pub installed_version: Option<String>,
    pub last_known_version: Option<String>,
    pub ready_to_launch: bool,
    pub diagnostics: Vec<ScanDiagnostic>,
}

pub struct AppState {
    pub config: Arc<LauncherConfig>,
    pub store: Arc<StateStore>,
    pub http_client: Client,
    pub sink: Arc<dyn EventSink>,
    pub orchestrator: Arc<UpdateOrchestrator>,
    pub launch_gate: OperationGate,
}

impl AppState {
    pub async fn new(config: LauncherConfig, sink: Arc<dyn EventSink>) -> LauncherResult<Self> {
        let config = Arc::new(config);
        let store = Arc::new(StateStore::open(config.state_file()).await);
        let http_client = build_http_client()?;
        let orchestrator = Arc::new(UpdateOrchestrator::new(
            config.clone(),
            store.clone(),
            http_client.clone(),
            sink.clone(),
        ));

        Ok(Self {
            config,
            store,
            http_client,
            sink,
            orchestrator,
            launch_gate: OperationGate::new("launch"),
        })
    }

    pub async fn snapshot(&self) -> LauncherSnapshot {
        let persisted = self.store.snapshot().await;
        LauncherSnapshot {
            install_dir: self.orchestrator.install_root().await,
            installed_version: persisted.installed_version().map(str::to_string),
            last_known_version: persisted.last_known_version.clone(),
            username: persisted.account.map(|account| account.username),
            active_operation: self.orchestrator.active(),
            launch_in_progress: self.launch_gate.is_busy(),
        }
    }

    /// Inspect the install root. Ready to launch needs an existing root, a
    /// reconciled installed version and a modpack matching that version.
    pub async fn installation(&self) -> LauncherResult<InstallationState> {
        let persisted = self.store.snapshot().await;
        let root = self.orchestrator.install_root().await;
        let installed_version = persisted.installed_version().map(str::to_string);

        let detection = {
            let layout = InstallLayout::new(&root);
            let profile = self.config.profile.clone();
            let expected = installed_version.clone();
            tokio::task::spawn_blocking(move || detect(&layout, &profile, expected.as_deref()))
                .await
                .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?
        };

        let install_dir_exists = root.is_dir();
        let ready_to_launch =
            install_dir_exists && installed_version.is_some() && detection.requirements.modpack;
        Ok(InstallationState {
            install_dir_exists,
            install_dir: root,
            ready_to_launch,
            requirements: detection.requirements,
            modpack_version: detection.modpack_version,
            installed_version,
            last_known_version: persisted.last_known_version,
            diagnostics: detection.diagnostics,
        })
    }

    /// Assemble a launch request from config and persisted state. An explicit
    /// `username` overrides the stored account for this session.
    pub async fn launch_request(&self, username: Option<&str>) -> LaunchRequest {
        let persisted = self.store.snapshot().await;
        let account = match username {
            Some(name) => LaunchAccount::offline(name),
            None => LaunchAccount::from_identity(persisted.account.as_ref()),
        };

        LaunchRequest {
            layout: InstallLayout::new(self.orchestrator.install_root().await),
            profile: self.config.profile.clone(),
            expected_version: persisted.installed_version().map(str::to_string),
            account,
            java_path: self.config.java_path.clone(),
            data_dir: self.config.data_dir.clone(),
            max_memory_mb: self.config.max_memory_mb,
        }
    }
}
