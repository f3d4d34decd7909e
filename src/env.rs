use std::collections::HashMap;
use std::env as stdenv;
use std::path::{Path, PathBuf};

/// Name shown in the prompt.
pub const SYSNAME: &str = "shellfyre";

pub const CDH_FILE_KEY: &str = "SHELLFYRE_CDH_FILE";
pub const TODO_FILE_KEY: &str = "SHELLFYRE_TODO_FILE";
pub const DEVICE_KEY: &str = "SHELLFYRE_DEVICE";
pub const MODULE_KEY: &str = "SHELLFYRE_MODULE";
/// Filter directive for the log subscriber installed by the binary.
pub const LOG_KEY: &str = "SHELLFYRE_LOG";

const DEFAULT_CDH_FILE: &str = "cdh_history.txt";
const DEFAULT_TODO_FILE: &str = "todo_list.txt";
const DEFAULT_DEVICE: &str = "/dev/my_device";
const DEFAULT_MODULE: &str = "pstraverse.ko";

/// Settings fixed at startup. Relative file names are anchored at the
/// directory the shell was started in, so `cd` does not move them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub cdh_file: PathBuf,
    pub todo_file: PathBuf,
    pub device: PathBuf,
    pub module: PathBuf,
}

impl ShellConfig {
    pub fn from_env(base: &Path) -> Self {
        Self::from_lookup(base, |key| stdenv::var(key).ok())
    }

    pub fn from_lookup(base: &Path, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let setting = |key: &str, default: &str| {
            let value = lookup(key).filter(|v| !v.is_empty());
            base.join(value.as_deref().unwrap_or(default))
        };
        Self {
            cdh_file: setting(CDH_FILE_KEY, DEFAULT_CDH_FILE),
            todo_file: setting(TODO_FILE_KEY, DEFAULT_TODO_FILE),
            device: setting(DEVICE_KEY, DEFAULT_DEVICE),
            module: setting(MODULE_KEY, DEFAULT_MODULE),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Environment {
    pub vars: HashMap<String, String>,
    pub current_dir: PathBuf,
    pub should_exit: bool,
    /// Status of the last foreground command.
    pub last_status: i32,
    pub config: ShellConfig,
}

impl Environment {
    pub fn new() -> Self {
        let vars: HashMap<String, String> = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let config = ShellConfig::from_env(&current_dir);
        Self::with_config(vars, current_dir, config)
    }

    pub fn with_config(
        vars: HashMap<String, String>,
        current_dir: PathBuf,
        config: ShellConfig,
    ) -> Self {
        Self {
            vars,
            current_dir,
            should_exit: false,
            last_status: 0,
            config,
        }
    }

    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// `<user>@<host>:<cwd> shellfyre$ `
    pub fn prompt(&self) -> String {
        let user = self.get_var("USER").unwrap_or_default();
        let host = nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}@{}:{} {}$ ", user, host, self.current_dir.display(), SYSNAME)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_defaults_are_anchored_at_base() {
        let base = Path::new("/work");
        let config = ShellConfig::from_lookup(base, |_| None);
        assert_eq!(
            config,
            ShellConfig {
                cdh_file: PathBuf::from("/work/cdh_history.txt"),
                todo_file: PathBuf::from("/work/todo_list.txt"),
                device: PathBuf::from("/dev/my_device"),
                module: PathBuf::from("/work/pstraverse.ko"),
            }
        );
    }

    #[test]
    fn test_config_overrides_from_lookup() {
        let base = Path::new("/work");
        let config = ShellConfig::from_lookup(base, |key| match key {
            TODO_FILE_KEY => Some("/tmp/tasks".to_string()),
            CDH_FILE_KEY => Some(String::new()),
            MODULE_KEY => Some("mods/traverse.ko".to_string()),
            _ => None,
        });
        assert_eq!(config.todo_file, PathBuf::from("/tmp/tasks"));
        assert_eq!(config.cdh_file, PathBuf::from("/work/cdh_history.txt"));
        assert_eq!(config.module, PathBuf::from("/work/mods/traverse.ko"));
    }

    #[test]
    fn test_prompt_contains_user_cwd_and_sysname() {
        let mut vars = HashMap::new();
        vars.insert("USER".to_string(), "ada".to_string());
        let env = Environment::with_config(
            vars,
            PathBuf::from("/home/ada"),
            ShellConfig::from_lookup(Path::new("/"), |_| None),
        );
        let prompt = env.prompt();
        assert!(prompt.starts_with("ada@"), "{}", prompt);
        assert!(prompt.ends_with(":/home/ada shellfyre$ "), "{}", prompt);
    }

    #[test]
    fn test_local_vars_shadow_process_env() {
        let mut vars = HashMap::new();
        vars.insert("PATH".to_string(), "/nowhere".to_string());
        let env = Environment::with_config(
            vars,
            PathBuf::from("/"),
            ShellConfig::from_lookup(Path::new("/"), |_| None),
        );
        assert_eq!(env.get_var("PATH").as_deref(), Some("/nowhere"));
    }
}
