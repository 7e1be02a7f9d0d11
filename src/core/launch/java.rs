use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::core::error::{LauncherError, LauncherResult};

pub fn java_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "java.exe"
    } else {
        "java"
    }
}

/// Bundled runtime location under the launcher data directory.
pub fn embedded_java_path(data_dir: &Path) -> PathBuf {
    data_dir.join("runtime").join("bin").join(java_binary_name())
}

/// Explicit path, then the bundled runtime, then `java` on `PATH`.
pub fn resolve_java_binary(configured: Option<&Path>, data_dir: &Path) -> LauncherResult<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            info!("Using configured Java at {:?}", path);
            return Ok(path.to_path_buf());
        }
        return Err(LauncherError::Launch(format!(
            "configured Java binary {} does not exist",
            path.display()
        )));
    }

    let embedded = embedded_java_path(data_dir);
    if embedded.is_file() {
        info!("Using bundled Java at {:?}", embedded);
        return Ok(embedded);
    }
    debug!("No bundled Java at {:?}", embedded);

    find_on_path(java_binary_name()).ok_or_else(|| {
        LauncherError::Launch(format!(
            "no Java runtime found (checked {} and PATH)",
            embedded.display()
        ))
    })
}

fn find_on_path(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_path_wins_over_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = embedded_java_path(dir.path());
        std::fs::create_dir_all(bundled.parent().unwrap()).unwrap();
        std::fs::write(&bundled, "").unwrap();
        let explicit = dir.path().join("custom-java");
        std::fs::write(&explicit, "").unwrap();

        assert_eq!(
            resolve_java_binary(Some(&explicit), dir.path()).unwrap(),
            explicit
        );
        assert_eq!(resolve_java_binary(None, dir.path()).unwrap(), bundled);
    }

    #[test]
    fn missing_configured_path_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_java_binary(Some(&dir.path().join("nope")), dir.path()).unwrap_err();
        assert_eq!(err.kind(), "LaunchError");
    }
}
