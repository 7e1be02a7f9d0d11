// ─── Hellas Launcher Core ───
// Keeps a local modpack install in sync with the published archive and
// launches the game once the install is ready.
//
// Architecture:
//   core/
//     config/     — Environment-style settings + pinned pack profile
//     downloader/ — Update source resolution + streamed, verified transfer
//     install/    — Install root layout, extraction, detection
//     update/     — Install/update/reinstall orchestration
//     launch/     — Readiness gate, Java, launch profile, process supervision
//     operation/  — Single-flight gate + cancellation
//     events/     — Status and launch event sinks
//     state/      — Persisted state + application state

pub mod auth;
pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod http;
pub mod install;
pub mod launch;
pub mod operation;
pub mod state;
pub mod update;
