// ─── Launch Task ───
// Spawns the game process and supervises it until it exits or is cancelled.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::{EventSink, LaunchEvent, LogLevel};
use crate::core::launch::profile::GameCommand;
use crate::core::operation::OperationGuard;

/// How long to keep reading output once the process is gone. A grandchild
/// holding the pipes open must not keep the launch gate closed.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// How a supervised game process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameExit {
    Exited(Option<i32>),
    Killed,
}

/// A running game. Dropping the handle leaves the process running; the
/// supervisor task keeps reporting until it exits.
#[derive(Debug)]
pub struct LaunchHandle {
    pid: u32,
    cancel: CancellationToken,
    supervisor: JoinHandle<LauncherResult<GameExit>>,
}

impl LaunchHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Ask the supervisor to kill the process.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> LauncherResult<GameExit> {
        self.supervisor
            .await
            .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?
    }
}

/// Spawn `command`. The operation guard is held by the supervisor so the
/// launch gate stays closed until the process is gone; its token kills it.
pub fn spawn_game(
    command: &GameCommand,
    guard: OperationGuard,
    sink: Arc<dyn EventSink>,
) -> LauncherResult<LaunchHandle> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);
    configure_platform_spawn(&mut cmd);

    info!(
        "Launching {:?} in {:?}",
        command.program, command.working_dir
    );
    debug!("Arguments: {:?}", command.args);

    let mut child = cmd.spawn().map_err(|e| {
        LauncherError::Launch(format!("cannot start {}: {e}", command.program.display()))
    })?;
    let pid = child.id().unwrap_or_default();
    sink.launch(LaunchEvent::Running { pid });

    let mut forwarders = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        forwarders.push(forward_lines(stdout, LogLevel::Info, sink.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(forward_lines(stderr, LogLevel::Warn, sink.clone()));
    }

    let cancel = guard.token().clone();
    let supervisor = tokio::spawn(supervise(child, guard, forwarders, sink));

    Ok(LaunchHandle {
        pid,
        cancel,
        supervisor,
    })
}

async fn supervise(
    mut child: Child,
    guard: OperationGuard,
    forwarders: Vec<JoinHandle<()>>,
    sink: Arc<dyn EventSink>,
) -> LauncherResult<GameExit> {
    let token = guard.token().clone();
    let outcome = tokio::select! {
        status = child.wait() => status.map(|s| GameExit::Exited(s.code())),
        _ = token.cancelled() => {
            info!("Killing game process {:?}", child.id());
            child.kill().await.map(|_| GameExit::Killed)
        }
    };

    // drain whatever the process printed before it went away
    for mut forwarder in forwarders {
        if tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut forwarder)
            .await
            .is_err()
        {
            debug!("Game output still open after exit, detaching reader");
            forwarder.abort();
        }
    }

    let result = match outcome {
        Ok(GameExit::Exited(code)) => {
            info!("Game exited with {:?}", code);
            sink.launch(LaunchEvent::Exited { code });
            Ok(GameExit::Exited(code))
        }
        Ok(GameExit::Killed) => {
            sink.launch(LaunchEvent::Cancelled {
                message: "Game process stopped".into(),
            });
            Ok(GameExit::Killed)
        }
        Err(e) => {
            warn!("Lost track of game process: {}", e);
            let err = LauncherError::Launch(format!("waiting for game process failed: {e}"));
            sink.launch(LaunchEvent::Error {
                message: err.to_string(),
            });
            Err(err)
        }
    };

    drop(guard);
    result
}

fn forward_lines<R>(stream: R, level: LogLevel, sink: Arc<dyn EventSink>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let level = classify_line(&line, level);
                    sink.launch(LaunchEvent::Log { level, line });
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Stopped reading game output: {}", e);
                    break;
                }
            }
        }
    })
}

fn classify_line(line: &str, default: LogLevel) -> LogLevel {
    if line.contains("/ERROR]") || line.contains("/FATAL]") || line.contains("Exception in thread") {
        LogLevel::Error
    } else if line.contains("/WARN]") {
        LogLevel::Warn
    } else {
        default
    }
}

#[cfg(target_os = "windows")]
fn configure_platform_spawn(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(target_os = "windows"))]
fn configure_platform_spawn(_cmd: &mut Command) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{ChannelSink, LauncherEvent};
    use crate::core::operation::{OperationGate, OperationKind};

    #[test]
    fn log_lines_are_classified() {
        assert_eq!(
            classify_line("[12:00:00] [Render thread/ERROR]: boom", LogLevel::Info),
            LogLevel::Error
        );
        assert_eq!(
            classify_line("[12:00:00] [main/WARN]: careful", LogLevel::Info),
            LogLevel::Warn
        );
        assert_eq!(classify_line("plain", LogLevel::Warn), LogLevel::Warn);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_is_forwarded_and_exit_code_reported() {
        let dir = tempfile::tempdir().unwrap();
        let gate = OperationGate::new("launch");
        let guard = gate.try_acquire(OperationKind::Launch).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let command = GameCommand {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "echo hello; echo oops >&2; exit 3".into()],
            working_dir: dir.path().to_path_buf(),
        };
        let handle = spawn_game(&command, guard, Arc::new(ChannelSink::new(tx))).unwrap();
        assert!(gate.is_busy());
        assert_eq!(handle.wait().await.unwrap(), GameExit::Exited(Some(3)));
        assert!(!gate.is_busy());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(
            events.first(),
            Some(LauncherEvent::Launch(LaunchEvent::Running { .. }))
        ));
        assert!(events.contains(&LauncherEvent::Launch(LaunchEvent::Log {
            level: LogLevel::Info,
            line: "hello".into()
        })));
        assert!(events.contains(&LauncherEvent::Launch(LaunchEvent::Log {
            level: LogLevel::Warn,
            line: "oops".into()
        })));
        assert_eq!(
            events.last(),
            Some(&LauncherEvent::Launch(LaunchEvent::Exited { code: Some(3) }))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_kills_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let gate = OperationGate::new("launch");
        let guard = gate.try_acquire(OperationKind::Launch).unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let command = GameCommand {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "exec sleep 30".into()],
            working_dir: dir.path().to_path_buf(),
        };
        let handle = spawn_game(&command, guard, Arc::new(ChannelSink::new(tx))).unwrap();
        assert!(handle.pid() > 0);
        assert!(gate.cancel());
        let exit = tokio::time::timeout(std::time::Duration::from_secs(10), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, GameExit::Killed);
        assert!(!gate.is_busy());
    }

    #[tokio::test]
    async fn missing_program_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let gate = OperationGate::new("launch");
        let guard = gate.try_acquire(OperationKind::Launch).unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let command = GameCommand {
            program: dir.path().join("no-such-java"),
            args: vec![],
            working_dir: dir.path().to_path_buf(),
        };
        let err = spawn_game(&command, guard, Arc::new(ChannelSink::new(tx))).unwrap_err();
        assert_eq!(err.kind(), "LaunchError");
        assert!(!gate.is_busy());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn inherited_pipes_do_not_hold_the_gate() {
        let dir = tempfile::tempdir().unwrap();
        let gate = OperationGate::new("launch");
        let guard = gate.try_acquire(OperationKind::Launch).unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        // the background sleep keeps stdout/stderr open after the shell exits
        let command = GameCommand {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "sleep 20 & echo started".into()],
            working_dir: dir.path().to_path_buf(),
        };
        let handle = spawn_game(&command, guard, Arc::new(ChannelSink::new(tx))).unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, GameExit::Exited(Some(0)));
        assert!(!gate.is_busy());
    }
}
