// ─── Launcher Configuration ───
// Environment-style key/value options and the pinned pack profile.

use std::path::PathBuf;

use reqwest::Url;
use tracing::debug;

use crate::core::downloader::UpdateSource;
use crate::core::error::{LauncherError, LauncherResult};

pub const APP_DIR_NAME: &str = "HellasLauncher";

/// Used when neither a feed nor a direct URL is configured.
pub const DEFAULT_PACK_URL: &str = "https://dl.hellasforms.net/modpack/latest.zip";

const DEFAULT_MAX_MEMORY_MB: u32 = 4096;

pub const KEY_FEED_URL: &str = "PACK_FEED_URL";
pub const KEY_ZIP_URL: &str = "PACK_ZIP_URL";
pub const KEY_VERSION: &str = "PACK_VERSION";
pub const KEY_EXPECTED_SHA256: &str = "PACK_EXPECTED_SHA256";
pub const KEY_DATA_DIR: &str = "HELLAS_DATA_DIR";
pub const KEY_JAVA_PATH: &str = "HELLAS_JAVA_PATH";
pub const KEY_MAX_MEMORY_MB: &str = "HELLAS_MAX_MEMORY_MB";

/// Identity of the payload this launcher installs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackProfile {
    /// Base game version, e.g. `1.20.1`.
    pub minecraft_version: String,
    /// Loader version id as it appears under `versions/`.
    pub loader_version_id: String,
    /// Prefix of the versioned modpack jar (`hellasforms-<version>.jar`).
    pub jar_prefix: String,
}

impl Default for PackProfile {
    fn default() -> Self {
        Self {
            minecraft_version: "1.20.1".into(),
            loader_version_id: "1.20.1-forge-47.3.0".into(),
            jar_prefix: "hellasforms-".into(),
        }
    }
}

impl PackProfile {
    /// Loader version without the game prefix (`47.3.0`).
    pub fn loader_build(&self) -> &str {
        self.loader_version_id
            .rsplit_once("-forge-")
            .map(|(_, build)| build)
            .unwrap_or(&self.loader_version_id)
    }

    /// File name of the loader installer artifact.
    pub fn loader_installer_name(&self) -> String {
        format!(
            "forge-{}-{}-installer.jar",
            self.minecraft_version,
            self.loader_build()
        )
    }

    /// Extract the version from a jar file name following the pack convention.
    pub fn jar_version<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        let head = file_name.get(..self.jar_prefix.len())?;
        if !head.eq_ignore_ascii_case(&self.jar_prefix) {
            return None;
        }
        let rest = file_name.get(self.jar_prefix.len()..)?;
        let split = rest.len().checked_sub(".jar".len())?;
        let (version, extension) = (rest.get(..split)?, rest.get(split..)?);
        if !extension.eq_ignore_ascii_case(".jar") {
            return None;
        }
        version
            .chars()
            .next()
            .filter(|c| c.is_ascii_digit())
            .map(|_| version)
    }
}

/// Raw pack source settings, before precedence is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackSourceConfig {
    pub feed_url: Option<String>,
    pub zip_url: Option<String>,
    pub version: Option<String>,
    pub expected_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub pack: PackSourceConfig,
    pub profile: PackProfile,
    pub data_dir: PathBuf,
    pub java_path: Option<PathBuf>,
    pub max_memory_mb: u32,
}

impl LauncherConfig {
    /// Build from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value lookup. Blank values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let pack = PackSourceConfig {
            feed_url: get(KEY_FEED_URL),
            zip_url: get(KEY_ZIP_URL),
            version: get(KEY_VERSION),
            expected_sha256: get(KEY_EXPECTED_SHA256),
        };

        let data_dir = get(KEY_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let max_memory_mb = get(KEY_MAX_MEMORY_MB)
            .and_then(|raw| raw.parse::<u32>().ok())
            .filter(|mb| *mb >= 512)
            .unwrap_or(DEFAULT_MAX_MEMORY_MB);

        Self {
            pack,
            profile: PackProfile::default(),
            data_dir,
            java_path: get(KEY_JAVA_PATH).map(PathBuf::from),
            max_memory_mb,
        }
    }

    /// Apply source precedence: feed beats direct, direct falls back to the
    /// built-in default URL.
    pub fn update_source(&self) -> LauncherResult<UpdateSource> {
        if let Some(feed_url) = &self.pack.feed_url {
            let feed_url = validate_url(feed_url, KEY_FEED_URL)?;
            debug!("Using feed update source {}", feed_url);
            return Ok(UpdateSource::Feed { feed_url });
        }

        let (raw, key) = match &self.pack.zip_url {
            Some(url) => (url.as_str(), KEY_ZIP_URL),
            None => (DEFAULT_PACK_URL, "built-in default"),
        };
        let url = validate_url(raw, key)?;
        debug!("Using direct update source {}", url);
        Ok(UpdateSource::Direct {
            url,
            version: self.pack.version.clone(),
            expected_sha256: self.pack.expected_sha256.clone(),
        })
    }

    /// Directory for in-flight archives.
    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }

    /// Install root used until the operator picks another one.
    pub fn default_install_dir(&self) -> PathBuf {
        self.data_dir.join("game")
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("launcher_state.json")
    }
}

fn validate_url(raw: &str, origin: &str) -> LauncherResult<String> {
    let parsed = Url::parse(raw)
        .map_err(|e| LauncherError::Configuration(format!("{origin} is not a valid URL ({raw}): {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        other => Err(LauncherError::Configuration(format!(
            "{origin} uses unsupported scheme '{other}' ({raw})"
        ))),
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
