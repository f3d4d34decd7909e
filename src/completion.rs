//! Candidates printed when a line ends with the auto-complete marker.

use crate::builtin::BUILTIN_NAMES;
use crate::command::Stage;
use crate::resolver;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;

/// Sorted, deduplicated completions for the terminal stage of a line.
///
/// Without arguments the command name is completed from the built-ins and
/// the search path; otherwise the last argument is completed as a path
/// relative to `cwd`.
pub fn candidates(stage: &Stage, search_path: &OsStr, cwd: &Path) -> Vec<String> {
    let set: BTreeSet<String> = match stage.arguments.last() {
        None => {
            let prefix = stage.executable_name.as_str();
            BUILTIN_NAMES
                .iter()
                .filter(|name| name.starts_with(prefix))
                .map(|name| name.to_string())
                .chain(resolver::executables_with_prefix(search_path, prefix))
                .collect()
        }
        Some(partial) => path_candidates(partial, cwd),
    };
    set.into_iter().collect()
}

fn path_candidates(partial: &str, cwd: &Path) -> BTreeSet<String> {
    let (dir_part, file_prefix) = match partial.rfind('/') {
        Some(i) => partial.split_at(i + 1),
        None => ("", partial),
    };
    let dir = cwd.join(if dir_part.is_empty() { "." } else { dir_part });
    let Ok(entries) = fs::read_dir(&dir) else {
        return BTreeSet::new();
    };

    let mut found = BTreeSet::new();
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        let hidden = name.starts_with('.') && !file_prefix.starts_with('.');
        if hidden || !name.starts_with(file_prefix) {
            continue;
        }
        let suffix = if entry.path().is_dir() { "/" } else { "" };
        found.insert(format!("{}{}{}", dir_part, name, suffix));
    }
    found
}
