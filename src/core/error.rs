use std::path::PathBuf;
use thiserror::Error;

use crate::core::install::ScanDiagnostic;
use crate::core::launch::ComponentKind;

/// Central error type for the entire launcher backend.
/// Every module returns `Result<T, LauncherError>`.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Configuration ───────────────────────────────────
    #[error("No usable update source: {0}")]
    Configuration(String),

    // ── Source (feed / descriptor) ──────────────────────
    #[error("Update source error: {0}")]
    Source(String),

    // ── Transfer ────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Insufficient disk space in {path:?}: available={available} required={required}")]
    InsufficientSpace {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    // ── Integrity ───────────────────────────────────────
    #[error("SHA-256 mismatch for {path:?}: expected {expected}, got {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── Control flow ────────────────────────────────────
    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Concurrency(String),

    // ── Readiness ───────────────────────────────────────
    #[error("{message}")]
    Readiness {
        message: String,
        missing: Vec<ComponentKind>,
        diagnostics: Vec<ScanDiagnostic>,
    },

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Archive ─────────────────────────────────────────
    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    // ── Launch ──────────────────────────────────────────
    #[error("Launch failed: {0}")]
    Launch(String),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

impl LauncherError {
    /// Stable taxonomy name, suitable for logs and UI branching.
    pub fn kind(&self) -> &'static str {
        match self {
            LauncherError::Configuration(_) => "ConfigurationError",
            LauncherError::Source(_) => "SourceError",
            LauncherError::Http(_)
            | LauncherError::DownloadFailed { .. }
            | LauncherError::InsufficientSpace { .. } => "TransferError",
            LauncherError::Integrity { .. } => "IntegrityError",
            LauncherError::Cancelled => "CancelledError",
            LauncherError::Concurrency(_) => "ConcurrencyError",
            LauncherError::Readiness { .. } => "ReadinessError",
            LauncherError::Io { .. } => "IoError",
            LauncherError::Json(_) => "JsonError",
            LauncherError::Zip(_) | LauncherError::InvalidArchive(_) => "ArchiveError",
            LauncherError::Launch(_) => "LaunchError",
            LauncherError::Other(_) => "Error",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LauncherError::Cancelled)
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LauncherError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for LauncherError {
    fn from(source: std::io::Error) -> Self {
        LauncherError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// ── Serialization across the command boundary ─────────
// Commands hand errors to whatever front end invoked them as plain strings.
impl serde::Serialize for LauncherError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
