// ─── Launch Profile ───
// Reads the installed loader's version JSON (following `inheritsFrom`) and
// turns it into a concrete java command line.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::auth::LaunchAccount;
use crate::core::config::PackProfile;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::install::InstallLayout;

const LAUNCHER_NAME: &str = "HellasLauncher";
const LAUNCHER_VERSION: &str = env!("CARGO_PKG_VERSION");
const MAX_INHERITANCE_DEPTH: usize = 8;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionJson {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub main_class: Option<String>,
    #[serde(default)]
    pub inherits_from: Option<String>,
    #[serde(default)]
    pub libraries: Vec<LibraryEntry>,
    #[serde(default)]
    pub arguments: Option<Arguments>,
    /// Pre-1.13 space separated game arguments.
    #[serde(default)]
    pub minecraft_arguments: Option<String>,
    #[serde(default)]
    pub asset_index: Option<AssetIndexRef>,
    #[serde(default)]
    pub assets: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Arguments {
    #[serde(default)]
    pub game: Vec<Value>,
    #[serde(default)]
    pub jvm: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct AssetIndexRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct LibraryEntry {
    pub name: String,
    #[serde(default)]
    pub downloads: Option<LibraryDownloads>,
    #[serde(default)]
    pub rules: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
pub struct LibraryDownloads {
    #[serde(default)]
    pub artifact: Option<LibraryArtifact>,
}

#[derive(Debug, Deserialize)]
pub struct LibraryArtifact {
    pub path: String,
}

impl LibraryEntry {
    fn is_allowed_for_current_os(&self) -> bool {
        match &self.rules {
            Some(rules) => rules_allow_current_os(rules),
            None => true,
        }
    }

    /// Path relative to `libraries/`.
    fn relative_path(&self) -> Option<PathBuf> {
        if let Some(artifact) = self.downloads.as_ref().and_then(|d| d.artifact.as_ref()) {
            return Some(PathBuf::from(&artifact.path));
        }
        maven_relative_path(&self.name)
    }
}

impl VersionJson {
    pub fn game_args(&self) -> Vec<String> {
        match &self.arguments {
            Some(args) if !args.game.is_empty() => {
                args.game.iter().flat_map(extract_argument_values).collect()
            }
            _ => self
                .minecraft_arguments
                .as_deref()
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    pub fn jvm_args(&self) -> Vec<String> {
        match &self.arguments {
            Some(args) => args.jvm.iter().flat_map(extract_argument_values).collect(),
            None => Vec::new(),
        }
    }

    fn asset_index_name(&self) -> String {
        self.asset_index
            .as_ref()
            .map(|a| a.id.clone())
            .or_else(|| self.assets.clone())
            .unwrap_or_else(|| "legacy".into())
    }
}

/// Load `versions/<id>/<id>.json`, folding each `inheritsFrom` parent
/// underneath. Returns the merged document and the root ancestor's id, whose
/// jar is the game client.
pub fn resolve_version(layout: &InstallLayout, id: &str) -> LauncherResult<(VersionJson, String)> {
    let mut current = read_version_value(layout, id)?;
    let mut base_id = id.to_string();

    for _ in 0..MAX_INHERITANCE_DEPTH {
        let Some(parent_id) = current
            .get("inheritsFrom")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
        else {
            break;
        };

        let parent = read_version_value(layout, &parent_id)?;
        debug!("Merging {} over parent {}", base_id, parent_id);
        current = merge_with_parent(&current, &parent);
        // the parent's own inheritsFrom decides whether to keep walking
        match parent.get("inheritsFrom") {
            Some(next) => current["inheritsFrom"] = next.clone(),
            None => {
                if let Some(obj) = current.as_object_mut() {
                    obj.remove("inheritsFrom");
                }
            }
        }
        base_id = parent_id;
    }

    Ok((serde_json::from_value(current)?, base_id))
}

fn read_version_value(layout: &InstallLayout, id: &str) -> LauncherResult<Value> {
    let path = layout.version_json(id);
    let raw = std::fs::read_to_string(&path).map_err(|e| LauncherError::io(&path, e))?;
    Ok(serde_json::from_str(&raw)?)
}

/// Child keys override the parent's, except `libraries` and the argument
/// lists which are concatenated parent-first.
fn merge_with_parent(current: &Value, parent: &Value) -> Value {
    let (Some(obj), true) = (current.as_object(), parent.is_object()) else {
        return current.clone();
    };
    let mut merged = parent.clone();

    for (key, value) in obj {
        match key.as_str() {
            "libraries" => {
                let mut libraries = parent
                    .get("libraries")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                if let Some(child) = value.as_array() {
                    libraries.extend(child.iter().cloned());
                }
                merged["libraries"] = Value::Array(libraries);
            }
            "arguments" => {
                for list in ["game", "jvm"] {
                    let mut values = parent
                        .get("arguments")
                        .and_then(|a| a.get(list))
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    if let Some(child) = value.get(list).and_then(Value::as_array) {
                        values.extend(child.iter().cloned());
                    }
                    merged["arguments"][list] = Value::Array(values);
                }
            }
            _ => merged[key] = value.clone(),
        }
    }
    merged
}

fn extract_argument_values(value: &Value) -> Vec<String> {
    if let Some(arg) = value.as_str() {
        return vec![arg.to_string()];
    }

    let Some(obj) = value.as_object() else {
        return vec![];
    };

    if let Some(rules) = obj.get("rules").and_then(Value::as_array) {
        if !rules_allow_current_os(rules) {
            return vec![];
        }
    }

    match obj.get("value") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str().map(ToString::to_string))
            .collect(),
        _ => vec![],
    }
}

/// Rules start disallowed; the last matching rule wins. Rules gated on
/// `features` (demo mode, custom resolution) never match.
fn rules_allow_current_os(rules: &[Value]) -> bool {
    let mut allowed = false;
    let current_os = current_os_name();

    for rule in rules {
        if rule.get("features").is_some() {
            continue;
        }
        let action = rule
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("disallow");

        let os_matches = match rule
            .get("os")
            .and_then(|os| os.get("name"))
            .and_then(Value::as_str)
        {
            None => true,
            Some(name) => name == current_os,
        };

        if os_matches {
            allowed = action == "allow";
        }
    }

    allowed
}

fn current_os_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "osx"
    } else {
        "linux"
    }
}

/// `group:artifact:version[:classifier][@ext]` →
/// `group/path/artifact/version/artifact-version[-classifier].ext`
pub fn maven_relative_path(coordinate: &str) -> Option<PathBuf> {
    let (coord, extension) = match coordinate.rsplit_once('@') {
        Some((coord, ext)) => (coord, ext),
        None => (coordinate, "jar"),
    };
    let parts: Vec<&str> = coord.split(':').collect();
    let (group, artifact, version, classifier) = match parts.as_slice() {
        [g, a, v] => (*g, *a, *v, None),
        [g, a, v, c] => (*g, *a, *v, Some(*c)),
        _ => return None,
    };

    let file_name = match classifier {
        Some(c) => format!("{artifact}-{version}-{c}.{extension}"),
        None => format!("{artifact}-{version}.{extension}"),
    };
    let mut path = PathBuf::new();
    for segment in group.split('.') {
        path.push(segment);
    }
    path.push(artifact);
    path.push(version);
    path.push(file_name);
    Some(path)
}

pub fn classpath_separator() -> &'static str {
    if cfg!(target_os = "windows") {
        ";"
    } else {
        ":"
    }
}

/// Inputs for building a game command line.
pub struct LaunchContext<'a> {
    pub layout: &'a InstallLayout,
    pub profile: &'a PackProfile,
    pub account: &'a LaunchAccount,
    pub java: PathBuf,
    pub max_memory_mb: u32,
}

/// Everything needed to spawn the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LaunchProfile {
    pub version_id: String,
    pub main_class: String,
    pub classpath: Vec<PathBuf>,
    pub missing_libraries: Vec<PathBuf>,
    pub command: GameCommand,
}

pub fn build_launch_profile(ctx: &LaunchContext<'_>) -> LauncherResult<LaunchProfile> {
    let layout = ctx.layout;
    let version_id = ctx.profile.loader_version_id.as_str();
    let (version, base_id) = resolve_version(layout, version_id)?;

    let main_class = version
        .main_class
        .clone()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| {
            LauncherError::Launch(format!("version {version_id} does not declare a mainClass"))
        })?;

    let libraries_dir = layout.libraries_dir();
    let mut classpath: Vec<PathBuf> = Vec::new();
    let mut missing_libraries = Vec::new();
    for library in &version.libraries {
        if !library.is_allowed_for_current_os() {
            debug!("Skipping library (OS rule): {}", library.name);
            continue;
        }
        let Some(relative) = library.relative_path() else {
            warn!("Unparseable library coordinate {}", library.name);
            continue;
        };
        let path = libraries_dir.join(relative);
        if !path.is_file() {
            missing_libraries.push(path);
            continue;
        }
        if !classpath.contains(&path) {
            classpath.push(path);
        }
    }
    if !missing_libraries.is_empty() {
        warn!(
            "{} libraries referenced by {} are missing under {:?}",
            missing_libraries.len(),
            version_id,
            libraries_dir
        );
    }

    let client_jar = layout.version_jar(&base_id);
    if client_jar.is_file() {
        classpath.push(client_jar);
    } else {
        warn!("Client jar {:?} is missing", client_jar);
    }

    let separator = classpath_separator();
    let classpath_value = classpath
        .iter()
        .map(|p| path_str(p))
        .collect::<Vec<_>>()
        .join(separator);

    let natives_dir = layout.versions_dir().join(version_id).join("natives");
    let game_dir = layout.modpack_dir();
    let placeholders = placeholder_values(ctx, &version, &classpath_value, &natives_dir);

    let mut args = vec![
        format!("-Xmx{}M", ctx.max_memory_mb),
        "-Xms512M".to_string(),
    ];
    let raw_jvm = version.jvm_args();
    if raw_jvm.is_empty() {
        args.push(format!("-Djava.library.path={}", path_str(&natives_dir)));
    }
    args.extend(substitute_args(&raw_jvm, &placeholders, true));
    args.push("-cp".into());
    args.push(classpath_value);
    args.push(main_class.clone());
    args.extend(substitute_args(&version.game_args(), &placeholders, false));

    info!(
        "Built launch profile for {} ({} classpath entries, main class {})",
        version_id,
        classpath.len(),
        main_class
    );

    Ok(LaunchProfile {
        version_id: version_id.to_string(),
        main_class,
        classpath,
        missing_libraries,
        command: GameCommand {
            program: ctx.java.clone(),
            args,
            working_dir: game_dir,
        },
    })
}

fn placeholder_values(
    ctx: &LaunchContext<'_>,
    version: &VersionJson,
    classpath: &str,
    natives_dir: &Path,
) -> HashMap<&'static str, String> {
    let layout = ctx.layout;
    let account = ctx.account;
    HashMap::from([
        ("natives_directory", path_str(natives_dir)),
        ("library_directory", path_str(&layout.libraries_dir())),
        ("classpath_separator", classpath_separator().to_string()),
        ("classpath", classpath.to_string()),
        ("launcher_name", LAUNCHER_NAME.to_string()),
        ("launcher_version", LAUNCHER_VERSION.to_string()),
        ("version_name", ctx.profile.loader_version_id.clone()),
        ("version_type", "release".to_string()),
        ("game_directory", path_str(&layout.modpack_dir())),
        ("assets_root", path_str(&layout.root().join("assets"))),
        ("game_assets", path_str(&layout.root().join("assets"))),
        ("assets_index_name", version.asset_index_name()),
        ("auth_player_name", account.username.clone()),
        ("auth_uuid", account.uuid.clone()),
        ("auth_access_token", account.access_token.clone()),
        ("auth_session", account.access_token.clone()),
        ("auth_xuid", account.xuid.clone()),
        ("clientid", String::new()),
        ("user_type", account.user_type.clone()),
        ("user_properties", "{}".to_string()),
    ])
}

/// Replace `${name}` tokens. Arguments left with unknown tokens are dropped
/// together with the option flag preceding them.
fn substitute_args(
    raw: &[String],
    values: &HashMap<&'static str, String>,
    strip_classpath: bool,
) -> Vec<String> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let arg = &raw[i];
        if strip_classpath && matches!(arg.as_str(), "-cp" | "-classpath" | "--class-path") {
            i += 2;
            continue;
        }

        let resolved = substitute(arg, values);
        if resolved.contains("${") {
            debug!("Dropping unresolved argument {}", arg);
            drop_dangling_option(&mut out);
        } else {
            out.push(resolved);
        }
        i += 1;
    }
    out
}

fn substitute(arg: &str, values: &HashMap<&'static str, String>) -> String {
    let mut resolved = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(start) = rest.find("${") {
        resolved.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match values.get(key) {
                    Some(value) => resolved.push_str(value),
                    None => {
                        resolved.push_str("${");
                        resolved.push_str(key);
                        resolved.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                resolved.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    resolved.push_str(rest);
    resolved
}

fn drop_dangling_option(args: &mut Vec<String>) {
    if args.last().is_some_and(|last| last.starts_with('-')) {
        let _ = args.pop();
    }
}

fn path_str(path: &Path) -> String {
    let text = path.to_string_lossy().to_string();
    #[cfg(target_os = "windows")]
    {
        if let Some(stripped) = text.strip_prefix(r"\\?\") {
            return stripped.to_string();
        }
    }
    text
}
