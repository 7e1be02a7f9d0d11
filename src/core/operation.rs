// ─── Single-flight operations ───
// At most one active operation per gate; a second request fails fast.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::error::{LauncherError, LauncherResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Install,
    Update,
    Reinstall,
    Launch,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Install => write!(f, "install"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Reinstall => write!(f, "reinstall"),
            OperationKind::Launch => write!(f, "launch"),
        }
    }
}

#[derive(Debug)]
struct ActiveOperation {
    id: Uuid,
    kind: OperationKind,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Read-only view of the in-flight operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    pub id: String,
    pub kind: OperationKind,
    pub started_at: DateTime<Utc>,
    pub cancelling: bool,
}

/// Mutual-exclusion token holder. Cloning shares the same slot.
#[derive(Debug, Clone)]
pub struct OperationGate {
    name: &'static str,
    slot: Arc<Mutex<Option<ActiveOperation>>>,
}

impl OperationGate {
    /// `name` is used in the busy message ("another {name} is in progress").
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveOperation>> {
        // A poisoned slot still holds a consistent Option.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the gate. Fails with `Concurrency` without touching the active
    /// operation when one is already running.
    pub fn try_acquire(&self, kind: OperationKind) -> LauncherResult<OperationGuard> {
        let mut slot = self.lock();
        if let Some(active) = slot.as_ref() {
            debug!(
                "Rejecting {} while {} {} is active",
                kind, active.kind, active.id
            );
            return Err(LauncherError::Concurrency(format!(
                "another {} is in progress ({})",
                self.name, active.kind
            )));
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        *slot = Some(ActiveOperation {
            id,
            kind,
            started_at: Utc::now(),
            cancel: cancel.clone(),
        });
        info!("Started {} operation {}", kind, id);

        Ok(OperationGuard {
            gate: self.clone(),
            id,
            kind,
            cancel,
        })
    }

    /// Trip the active operation's cancellation token. Returns whether an
    /// operation was running.
    pub fn cancel(&self) -> bool {
        match self.lock().as_ref() {
            Some(active) => {
                info!("Cancellation requested for {} {}", active.kind, active.id);
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Option<OperationSnapshot> {
        self.lock().as_ref().map(|active| OperationSnapshot {
            id: active.id.to_string(),
            kind: active.kind,
            started_at: active.started_at,
            cancelling: active.cancel.is_cancelled(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }

    fn release_id(&self, id: Uuid) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|active| active.id == id) {
            *slot = None;
        }
    }
}

/// Held for the lifetime of one operation; dropping it frees the gate.
#[derive(Debug)]
pub struct OperationGuard {
    gate: OperationGate,
    id: Uuid,
    kind: OperationKind,
    cancel: CancellationToken,
}

impl OperationGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.gate.release_id(self.id);
        debug!("Released {} operation {}", self.kind, self.id);
    }
}

/// Return `Cancelled` if the token has been tripped.
#[inline]
pub fn check_cancelled(token: &CancellationToken) -> LauncherResult<()> {
    if token.is_cancelled() {
        Err(LauncherError::Cancelled)
    } else {
        Ok(())
    }
}

/// Await `fut` unless the token trips first; the losing future is dropped,
/// which tears down any socket or file handle it owns.
pub async fn cancellable<F, T>(token: &CancellationToken, fut: F) -> LauncherResult<T>
where
    F: Future<Output = LauncherResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(LauncherError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellable_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result = cancellable(&token, std::future::pending::<LauncherResult<()>>()).await;
        assert!(result.unwrap_err().is_cancelled());

        let live = CancellationToken::new();
        let value = cancellable(&live, async { Ok::<_, LauncherError>(7) }).await;
        assert_eq!(value.unwrap(), 7);
    }

    #[test]
    fn second_acquire_fails_fast_and_leaves_first_untouched() {
        let gate = OperationGate::new("operation");
        let first = gate.try_acquire(OperationKind::Update).unwrap();

        let err = gate.try_acquire(OperationKind::Reinstall).unwrap_err();
        assert!(matches!(err, LauncherError::Concurrency(_)));
        assert!(err.to_string().contains("another operation is in progress"));

        let snapshot = gate.snapshot().unwrap();
        assert_eq!(snapshot.kind, OperationKind::Update);
        assert_eq!(snapshot.id, first.id().to_string());
        assert!(!first.token().is_cancelled());
    }

    #[test]
    fn dropping_guard_releases_gate() {
        let gate = OperationGate::new("operation");
        {
            let _guard = gate.try_acquire(OperationKind::Install).unwrap();
            assert!(gate.is_busy());
        }
        assert!(!gate.is_busy());
        let guard = gate.try_acquire(OperationKind::Install).unwrap();
        guard.release();
        assert!(gate.snapshot().is_none());
    }

    #[test]
    fn cancel_trips_active_token_only() {
        let gate = OperationGate::new("operation");
        assert!(!gate.cancel());

        let guard = gate.try_acquire(OperationKind::Update).unwrap();
        assert!(gate.cancel());
        assert!(guard.token().is_cancelled());
        assert!(gate.snapshot().unwrap().cancelling);
        assert!(check_cancelled(guard.token()).unwrap_err().is_cancelled());
        drop(guard);

        let next = gate.try_acquire(OperationKind::Update).unwrap();
        assert!(check_cancelled(next.token()).is_ok());
    }

    #[test]
    fn separate_gates_do_not_block_each_other() {
        let operations = OperationGate::new("operation");
        let launches = OperationGate::new("launch");
        let _update = operations.try_acquire(OperationKind::Update).unwrap();
        assert!(launches.try_acquire(OperationKind::Launch).is_ok());
    }
}
