use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::auth::AccountIdentity;
use crate::core::error::{LauncherError, LauncherResult};

/// Durable key/value state, persisted as `launcher_state.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub install_dir: Option<PathBuf>,
    /// Version confirmed by a completed reconciliation.
    pub installed_version: Option<String>,
    /// Version last observed from the update source.
    pub last_known_version: Option<String>,
    pub account: Option<AccountIdentity>,
}

impl PersistedState {
    /// Installed version, treating blank strings as unknown.
    pub fn installed_version(&self) -> Option<&str> {
        self.installed_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

pub struct StateStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl StateStore {
    /// Load from disk; a missing or unreadable file yields defaults.
    pub async fn open(path: PathBuf) -> Self {
        let state = load_state_from_disk(&path).await.unwrap_or_default();
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub async fn snapshot(&self) -> PersistedState {
        self.state.lock().await.clone()
    }

    /// Apply `mutate` and persist atomically. The in-memory copy only changes
    /// once the write succeeded.
    pub async fn update<F>(&self, mutate: F) -> LauncherResult<PersistedState>
    where
        F: FnOnce(&mut PersistedState),
    {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        mutate(&mut next);
        if next != *guard {
            write_state_atomically(&self.path, &next).await?;
            *guard = next.clone();
        }
        Ok(next)
    }
}

async fn load_state_from_disk(path: &Path) -> Option<PersistedState> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Cannot read {:?}: {}", path, e);
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("Corrupt launcher state at {:?}: {}", path, e);
            None
        }
    }
}

async fn write_state_atomically(path: &Path, state: &PersistedState) -> LauncherResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| LauncherError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(state)?;
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, json)
        .await
        .map_err(|e| LauncherError::io(&staging, e))?;
    tokio::fs::rename(&staging, path)
        .await
        .map_err(|e| LauncherError::io(path, e))?;

    debug!("Persisted launcher state to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("launcher_state.json")).await;
        assert_eq!(store.snapshot().await, PersistedState::default());
    }

    #[tokio::test]
    async fn updates_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("launcher_state.json");
        let store = StateStore::open(path.clone()).await;
        store
            .update(|s| {
                s.installed_version = Some("1.2.0".into());
                s.last_known_version = Some("1.2.0".into());
                s.account = Some(AccountIdentity {
                    username: "Alex".into(),
                    refresh_token: Some("refresh".into()),
                });
            })
            .await
            .unwrap();

        let reopened = StateStore::open(path.clone()).await;
        let state = reopened.snapshot().await;
        assert_eq!(state.installed_version(), Some("1.2.0"));
        assert_eq!(state.account.unwrap().username, "Alex");

        let raw = std::fs::read_to_string(path).unwrap();
        assert!(raw.contains("installedVersion"));
        assert!(raw.contains("refreshToken"));
        assert!(!raw.contains("accessToken"));
    }

    #[tokio::test]
    async fn corrupt_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launcher_state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = StateStore::open(path).await;
        assert_eq!(store.snapshot().await.installed_version(), None);
    }

    #[test]
    fn blank_installed_version_counts_as_unknown() {
        let state = PersistedState {
            installed_version: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(state.installed_version(), None);
    }
}
