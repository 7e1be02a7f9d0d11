// ─── Events ───
// Status/progress payloads consumed by whatever front end drives the launcher.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

/// Install/update/reinstall progress, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum StatusEvent {
    FetchingFeed,
    Downloading { progress: u8 },
    Extracting { progress: u8 },
    Finalizing { progress: u8 },
    Complete { progress: u8, version: Option<String> },
    Error { message: String },
    Cancelled { message: String },
}

impl StatusEvent {
    pub fn complete(version: Option<String>) -> Self {
        StatusEvent::Complete {
            progress: 100,
            version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Launch workflow progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum LaunchEvent {
    Checking,
    Launching,
    Running { pid: u32 },
    Log { level: LogLevel, line: String },
    Exited { code: Option<i32> },
    Error { message: String },
    Cancelled { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum LauncherEvent {
    Status(StatusEvent),
    Launch(LaunchEvent),
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: LauncherEvent);

    fn status(&self, event: StatusEvent) {
        self.emit(LauncherEvent::Status(event));
    }

    fn launch(&self, event: LaunchEvent) {
        self.emit(LauncherEvent::Launch(event));
    }
}

/// Mirrors every event into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: LauncherEvent) {
        match &event {
            LauncherEvent::Status(StatusEvent::Error { message })
            | LauncherEvent::Launch(LaunchEvent::Error { message }) => {
                error!(target: "hellas_launcher_lib::events", "{}", message)
            }
            LauncherEvent::Launch(LaunchEvent::Log { level, line }) => match level {
                LogLevel::Info => info!(target: "hellas_launcher_lib::game", "{}", line),
                LogLevel::Warn | LogLevel::Error => {
                    warn!(target: "hellas_launcher_lib::game", "{}", line)
                }
            },
            other => match serde_json::to_string(other) {
                Ok(json) => info!(target: "hellas_launcher_lib::events", "{}", json),
                Err(_) => info!(target: "hellas_launcher_lib::events", "{:?}", other),
            },
        }
    }
}

/// Forwards events into a channel; a closed receiver is ignored.
pub struct ChannelSink {
    sender: UnboundedSender<LauncherEvent>,
}

impl ChannelSink {
    pub fn new(sender: UnboundedSender<LauncherEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: LauncherEvent) {
        let _ = self.sender.send(event);
    }
}

/// Delivers each event to every inner sink.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: LauncherEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Maps a 0..=1 fraction into a sub-range of the overall progress scale and
/// only reports when the integer percentage changes.
#[derive(Debug, Clone, Copy)]
pub struct ProgressScale {
    start: u8,
    end: u8,
    last: Option<u8>,
}

impl ProgressScale {
    pub const fn new(start: u8, end: u8) -> Self {
        Self {
            start,
            end,
            last: None,
        }
    }

    /// Scaled percentage for `done / total`, or `None` when unchanged.
    pub fn advance(&mut self, done: u64, total: u64) -> Option<u8> {
        let fraction = if total == 0 {
            0.0
        } else {
            (done as f64 / total as f64).clamp(0.0, 1.0)
        };
        let span = f64::from(self.end.saturating_sub(self.start));
        let value = self.start + (fraction * span).floor() as u8;
        if self.last == Some(value) {
            return None;
        }
        self.last = Some(value);
        Some(value)
    }
}
