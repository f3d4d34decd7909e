use nix::unistd::{AccessFlags, access};
use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable holding the colon separated search path.
pub const PATH_KEY: &str = "PATH";

/// Resolve a command name against the current value of `PATH`.
///
/// The variable is read on every call so changes made during the session
/// are picked up.
pub fn resolve(name: &str) -> Option<PathBuf> {
    let search_path = env::var_os(PATH_KEY).unwrap_or_default();
    resolve_in(&search_path, name)
}

/// Resolve a command name the way a typical shell would.
///
/// Behavior:
/// - Empty name: `None`.
/// - Name containing `/`: used as is when it names an executable file.
/// - Otherwise: each directory of `search_path` is tried in order and the
///   first `<dir>/<name>` that is a regular file executable by the current
///   user wins. Directories that cannot be inspected are skipped.
pub fn resolve_in(search_path: &OsStr, name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    if name.contains('/') {
        let path = Path::new(name);
        return is_executable_file(path).then(|| path.to_path_buf());
    }

    let found = env::split_paths(search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable_file(candidate))?;
    debug!(name, path = %found.display(), "resolved executable");
    Some(std::path::absolute(&found).unwrap_or(found))
}

/// Names of every executable in the search path starting with `prefix`.
pub fn executables_with_prefix(search_path: &OsStr, prefix: &str) -> Vec<String> {
    let mut names = Vec::new();
    for dir in env::split_paths(search_path) {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with(prefix) && is_executable_file(&entry.path()) {
                names.push(name.to_string());
            }
        }
    }
    names
}

fn is_executable_file(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => access(path, AccessFlags::X_OK).is_ok(),
        _ => false,
    }
}
