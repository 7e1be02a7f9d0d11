//! Command-line front end. Each subcommand maps onto one operator command and
//! prints its result as JSON.
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::commands::{self, InstallPayload, LaunchPayload};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::{LaunchEvent, LauncherEvent, StatusEvent};
use crate::core::launch::GameExit;
use crate::core::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "hellas-launcher")]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Raise log verbosity when RUST_LOG is not set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show persisted state and any running operation.
    State,
    /// Inspect the install root.
    Installation,
    /// First-time install.
    Install {
        /// Install root; defaults to the remembered or built-in location.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Bring the install up to date.
    Update,
    /// Delete the install root and install again.
    Reinstall,
    /// Compare the installed version with the update source.
    CheckUpdate,
    /// Start the game and wait for it to exit.
    Launch {
        #[arg(long, env = "HELLAS_USERNAME")]
        username: Option<String>,
    },
}

impl Command {
    pub async fn run(&self, state: Arc<AppState>) -> LauncherResult<()> {
        match self {
            Self::State => print_json(&commands::get_state(&state).await?),
            Self::Installation => print_json(&commands::get_installation(&state).await?),
            Self::Install { dir } => {
                let payload = InstallPayload {
                    target_dir: dir.as_ref().map(|d| d.display().to_string()),
                };
                let task_state = state.clone();
                let report = until_interrupted(
                    &state,
                    async move { commands::perform_install(&task_state, payload).await },
                    Interrupt::Operation,
                )
                .await?;
                print_json(&report)
            }
            Self::Update => {
                let task_state = state.clone();
                let report = until_interrupted(
                    &state,
                    async move { commands::trigger_update(&task_state).await },
                    Interrupt::Operation,
                )
                .await?;
                print_json(&report)
            }
            Self::Reinstall => {
                let task_state = state.clone();
                let report = until_interrupted(
                    &state,
                    async move { commands::fresh_reinstall(&task_state).await },
                    Interrupt::Operation,
                )
                .await?;
                print_json(&report)
            }
            Self::CheckUpdate => print_json(&commands::check_for_update(&state).await?),
            Self::Launch { username } => {
                let payload = LaunchPayload {
                    username: username.clone(),
                };
                let task_state = state.clone();
                let exit = until_interrupted(
                    &state,
                    async move {
                        let handle = commands::launch_game(&task_state, payload).await?;
                        info!("Game running as pid {}", handle.pid());
                        handle.wait().await
                    },
                    Interrupt::Launch,
                )
                .await?;
                print_json(&ExitReport::from(exit))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Interrupt {
    Operation,
    Launch,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExitReport {
    killed: bool,
    exit_code: Option<i32>,
}

impl From<GameExit> for ExitReport {
    fn from(exit: GameExit) -> Self {
        match exit {
            GameExit::Exited(code) => Self {
                killed: false,
                exit_code: code,
            },
            GameExit::Killed => Self {
                killed: true,
                exit_code: None,
            },
        }
    }
}

/// Drive `work` to completion; Ctrl-C requests cancellation and then keeps
/// waiting so the operation can settle and clean up.
async fn until_interrupted<T, F>(state: &AppState, work: F, interrupt: Interrupt) -> LauncherResult<T>
where
    F: Future<Output = LauncherResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut task = tokio::spawn(work);
    let joined = tokio::select! {
        joined = &mut task => joined,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Cannot listen for Ctrl-C: {}", e);
            } else {
                info!("Interrupt received, cancelling");
                let cancelled = match interrupt {
                    Interrupt::Operation => commands::cancel_update(state).await?,
                    Interrupt::Launch => commands::cancel_launch(state).await?,
                };
                if !cancelled {
                    info!("Nothing was running");
                }
            }
            task.await
        }
    };
    joined.map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?
}

/// Print a one-line summary of each progress event to stderr until every
/// sender is gone.
pub async fn report_progress(mut events: UnboundedReceiver<LauncherEvent>) {
    while let Some(event) = events.recv().await {
        if let Some(line) = progress_line(&event) {
            eprintln!("{line}");
        }
    }
}

fn progress_line(event: &LauncherEvent) -> Option<String> {
    let line = match event {
        LauncherEvent::Status(status) => match status {
            StatusEvent::FetchingFeed => "resolving update source".to_string(),
            StatusEvent::Downloading { progress } => format!("downloading {progress}%"),
            StatusEvent::Extracting { progress } => format!("extracting {progress}%"),
            StatusEvent::Finalizing { progress } => format!("finalizing {progress}%"),
            StatusEvent::Complete { version, .. } => match version {
                Some(version) => format!("complete ({version})"),
                None => "complete".to_string(),
            },
            StatusEvent::Error { message } => format!("error: {message}"),
            StatusEvent::Cancelled { message } => format!("cancelled: {message}"),
        },
        LauncherEvent::Launch(launch) => match launch {
            LaunchEvent::Checking => "checking install".to_string(),
            LaunchEvent::Launching => "launching".to_string(),
            LaunchEvent::Running { pid } => format!("game running (pid {pid})"),
            // game output already goes through the log
            LaunchEvent::Log { .. } => return None,
            LaunchEvent::Exited { code } => format!("game exited ({code:?})"),
            LaunchEvent::Error { message } => format!("launch error: {message}"),
            LaunchEvent::Cancelled { message } => format!("launch cancelled: {message}"),
        },
    };
    Some(line)
}

fn print_json<T: Serialize>(value: &T) -> LauncherResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
