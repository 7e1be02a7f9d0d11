// Operator-facing command surface. Every front end (the CLI today) goes
// through these functions rather than reaching into `core` directly.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::info;

use crate::core::auth::AccountIdentity;
use crate::core::error::LauncherError;
use crate::core::launch::{self, LaunchHandle};
use crate::core::operation::OperationKind;
use crate::core::state::{AppState, InstallationState, LauncherSnapshot};
use crate::core::update::{OperationReport, UpdateCheck};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallPayload {
    pub target_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchPayload {
    pub username: Option<String>,
}

pub async fn get_state(state: &AppState) -> Result<LauncherSnapshot, LauncherError> {
    Ok(state.snapshot().await)
}

pub async fn get_installation(state: &AppState) -> Result<InstallationState, LauncherError> {
    state.installation().await
}

pub async fn perform_install(
    state: &AppState,
    payload: InstallPayload,
) -> Result<OperationReport, LauncherError> {
    let target = payload
        .target_dir
        .map(|dir| dir.trim().to_string())
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from);
    state.orchestrator.install(target).await
}

pub async fn trigger_update(state: &AppState) -> Result<OperationReport, LauncherError> {
    state.orchestrator.update().await
}

pub async fn fresh_reinstall(state: &AppState) -> Result<OperationReport, LauncherError> {
    state.orchestrator.reinstall().await
}

/// Returns whether an operation was running to be cancelled.
pub async fn cancel_update(state: &AppState) -> Result<bool, LauncherError> {
    Ok(state.orchestrator.cancel())
}

pub async fn check_for_update(state: &AppState) -> Result<UpdateCheck, LauncherError> {
    state.orchestrator.check_update().await
}

/// Start the game. The returned handle can be awaited for the exit status;
/// the launch gate stays closed until the process is gone.
pub async fn launch_game(
    state: &AppState,
    payload: LaunchPayload,
) -> Result<LaunchHandle, LauncherError> {
    let guard = state.launch_gate.try_acquire(OperationKind::Launch)?;

    let username = payload
        .username
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());
    if let Some(name) = &username {
        remember_account(state, name).await?;
    }

    let request = state.launch_request(username.as_deref()).await;
    info!(
        "Launch requested for {} from {:?}",
        request.account.username,
        request.layout.root()
    );
    launch::launch_game(request, guard, state.sink.clone()).await
}

pub async fn cancel_launch(state: &AppState) -> Result<bool, LauncherError> {
    Ok(state.launch_gate.cancel())
}

/// Persist the username; a refresh token survives only for the same account.
async fn remember_account(state: &AppState, username: &str) -> Result<(), LauncherError> {
    let username = username.to_string();
    state
        .store
        .update(move |persisted| {
            let refresh_token = persisted
                .account
                .take()
                .filter(|account| account.username == username)
                .and_then(|account| account.refresh_token);
            persisted.account = Some(AccountIdentity {
                username,
                refresh_token,
            });
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{LauncherConfig, KEY_DATA_DIR, KEY_ZIP_URL};
    use crate::core::events::TracingSink;
    use std::collections::HashMap;
    use std::sync::Arc;

    async fn app(pairs: &[(&str, &str)]) -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let mut map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.insert(KEY_DATA_DIR.into(), dir.path().display().to_string());
        let config = LauncherConfig::from_lookup(|key| map.get(key).cloned());
        let state = AppState::new(config, Arc::new(TracingSink)).await.unwrap();
        (dir, state)
    }

    #[tokio::test]
    async fn cancel_without_operation_is_noop() {
        let (_dir, state) = app(&[]).await;
        assert!(!cancel_update(&state).await.unwrap());
        assert!(!cancel_launch(&state).await.unwrap());
        assert!(get_state(&state).await.unwrap().active_operation.is_none());
    }

    #[tokio::test]
    async fn install_with_unusable_source_is_configuration_error() {
        let (_dir, state) = app(&[(KEY_ZIP_URL, "file:///tmp/pack.zip")]).await;
        let err = perform_install(&state, InstallPayload::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
        assert!(state.store.snapshot().await.install_dir.is_none());
    }

    #[tokio::test]
    async fn second_launch_is_rejected_while_first_holds_gate() {
        let (_dir, state) = app(&[]).await;
        let _held = state.launch_gate.try_acquire(OperationKind::Launch).unwrap();

        let err = launch_game(&state, LaunchPayload::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ConcurrencyError");
    }

    #[tokio::test]
    async fn launch_without_modpack_reports_readiness_and_keeps_username() {
        let (_dir, state) = app(&[]).await;
        state
            .store
            .update(|s| {
                s.account = Some(AccountIdentity {
                    username: "Misty".into(),
                    refresh_token: Some("refresh".into()),
                })
            })
            .await
            .unwrap();

        let err = launch_game(
            &state,
            LaunchPayload {
                username: Some(" Brock ".into()),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "ReadinessError");
        assert!(!state.launch_gate.is_busy());

        let account = state.store.snapshot().await.account.unwrap();
        assert_eq!(account.username, "Brock");
        assert_eq!(account.refresh_token, None);
    }
}
