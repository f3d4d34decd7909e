use crate::bridge::{self, TraversalOrder, TraversalRequest};
use crate::command::ReturnCode;
use crate::env::Environment;
use crate::executor::run_program;
use crate::interpreter::Session;
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd" or "todo".
    fn name() -> &'static str;

    /// Executes the command using provided IO streams and session.
    fn execute(
        self,
        stdin: &mut dyn BufRead,
        stdout: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ReturnCode>;
}

/// Entry point of a built-in: parses `args` and runs the command.
pub type BuiltinFn =
    fn(&[&str], &mut dyn BufRead, &mut dyn Write, &mut Session) -> Result<ReturnCode>;

pub const BUILTIN_NAMES: [&str; 8] = [
    "cd",
    "cdh",
    "exit",
    "filesearch",
    "joker",
    "pstraverse",
    "take",
    "todo",
];

pub fn match_builtin(name: &str) -> Option<BuiltinFn> {
    let command: BuiltinFn = match name {
        "cd" => run::<Cd>,
        "cdh" => run::<Cdh>,
        "exit" => run::<Exit>,
        "filesearch" => run::<FileSearch>,
        "joker" => run::<Joker>,
        "pstraverse" => run::<Pstraverse>,
        "take" => run::<Take>,
        "todo" => run::<Todo>,
        _ => return None,
    };
    Some(command)
}

fn run<T: BuiltinCommand>(
    args: &[&str],
    stdin: &mut dyn BufRead,
    stdout: &mut dyn Write,
    session: &mut Session,
) -> Result<ReturnCode> {
    match T::from_args(&[T::name()], args) {
        Ok(cmd) => cmd.execute(stdin, stdout, session),
        Err(EarlyExit { output, status }) => {
            if status.is_err() {
                bail!("{}: {}", T::name(), output.trim_end());
            }
            stdout.write_all(output.as_bytes())?;
            Ok(ReturnCode::Success)
        }
    }
}

/// Make `target` the working directory of both the process and `env`.
fn change_dir(env: &mut Environment, target: &Path) -> Result<()> {
    let new_dir = if target.is_absolute() {
        target.to_path_buf()
    } else {
        env.current_dir.join(target)
    };
    let canonical = fs::canonicalize(&new_dir)
        .with_context(|| format!("cd: {}", target.display()))?;
    std::env::set_current_dir(&canonical)
        .with_context(|| format!("cd: {}", canonical.display()))?;
    debug!(dir = %canonical.display(), "changed directory");
    env.current_dir = canonical;
    Ok(())
}

/// Append the working directory to the cd-history file.
fn log_directory(env: &Environment) -> Result<()> {
    let path = &env.config.cdh_file;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("can't open {}", path.display()))?;
    writeln!(file, "{}", env.current_dir.display())?;
    Ok(())
}

fn read_answer(stdin: &mut dyn BufRead, stdout: &mut dyn Write, question: &str) -> Result<String> {
    write!(stdout, "{}", question)?;
    stdout.flush()?;
    let mut answer = String::new();
    stdin.read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to, absolute or relative to the current
    /// directory; defaults to $HOME when omitted
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        _stdin: &mut dyn BufRead,
        _stdout: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ReturnCode> {
        let env = &mut session.env;
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => bail!("cd: no target and HOME not set"),
            },
        };
        change_dir(env, &target)?;
        log_directory(env)?;
        Ok(ReturnCode::Success)
    }
}

#[derive(FromArgs)]
/// List recently visited directories and jump back to one of them.
pub struct Cdh {}

/// Number of history entries offered by `cdh`.
const CDH_ENTRIES: usize = 10;

impl BuiltinCommand for Cdh {
    fn name() -> &'static str {
        "cdh"
    }

    fn execute(
        self,
        stdin: &mut dyn BufRead,
        stdout: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ReturnCode> {
        let env = &mut session.env;
        let history = fs::read_to_string(&env.config.cdh_file).unwrap_or_default();
        let lines: Vec<&str> = history.lines().filter(|l| !l.is_empty()).collect();
        let recent = &lines[lines.len().saturating_sub(CDH_ENTRIES)..];
        if recent.is_empty() {
            writeln!(stdout, "You didn't visit any directory yet.")?;
            return Ok(ReturnCode::Success);
        }

        let home = env.get_var("HOME");
        // Entry 1 (letter `a`) is the most recent one and is printed last.
        for number in (1..=recent.len()).rev() {
            let dir = recent[recent.len() - number];
            writeln!(
                stdout,
                "{} {}) {}",
                entry_letter(number),
                number,
                abbreviate_home(dir, home.as_deref())
            )?;
        }

        let answer = read_answer(stdin, stdout, "Select directory by letter or number: ")?;
        if let Some(number) = select_entry(&answer, recent.len()) {
            let target = PathBuf::from(recent[recent.len() - number]);
            change_dir(env, &target)?;
            log_directory(env)?;
        }
        Ok(ReturnCode::Success)
    }
}

fn entry_letter(number: usize) -> char {
    (b'a' + (number - 1) as u8) as char
}

/// Entry number picked by a `cdh` answer, either `3` or `c`.
fn select_entry(answer: &str, count: usize) -> Option<usize> {
    let number = match answer.parse::<usize>() {
        Ok(n) => n,
        Err(_) => {
            let mut chars = answer.chars();
            match (chars.next(), chars.next()) {
                (Some(c @ 'a'..='z'), None) => (c as u8 - b'a') as usize + 1,
                _ => return None,
            }
        }
    };
    (1..=count).contains(&number).then_some(number)
}

fn abbreviate_home(dir: &str, home: Option<&str>) -> String {
    match home.filter(|h| !h.is_empty()).and_then(|h| dir.strip_prefix(h)) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => format!("~{}", rest),
        _ => dir.to_string(),
    }
}

#[derive(FromArgs)]
/// Create a directory path if needed and move into it, one component at a time.
pub struct Take {
    #[argh(positional)]
    /// slash separated directories to create and enter.
    pub path: String,
}

impl BuiltinCommand for Take {
    fn name() -> &'static str {
        "take"
    }

    fn execute(
        self,
        _stdin: &mut dyn BufRead,
        _stdout: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ReturnCode> {
        let env = &mut session.env;
        if self.path.starts_with('/') {
            change_dir(env, Path::new("/"))?;
        }
        for component in self.path.split('/').filter(|c| !c.is_empty()) {
            let dir = env.current_dir.join(component);
            if !dir.is_dir() {
                fs::DirBuilder::new()
                    .mode(0o700)
                    .create(&dir)
                    .with_context(|| format!("take: can't create {}", dir.display()))?;
            }
            change_dir(env, Path::new(component))?;
            log_directory(env)?;
        }
        Ok(ReturnCode::Success)
    }
}

#[derive(FromArgs)]
/// Show, add or remove tasks of the to-do list.
pub struct Todo {
    #[argh(subcommand)]
    pub action: Option<TodoAction>,
}

#[derive(FromArgs)]
#[argh(subcommand)]
pub enum TodoAction {
    Add(TodoAdd),
    Remove(TodoRemove),
}

#[derive(FromArgs)]
/// Append a task; asks for it when no words are given.
#[argh(subcommand, name = "add")]
pub struct TodoAdd {
    #[argh(positional, greedy)]
    /// words of the task.
    pub words: Vec<String>,
}

#[derive(FromArgs)]
/// Remove a task by its number; asks for it when omitted.
#[argh(subcommand, name = "remove")]
pub struct TodoRemove {
    #[argh(positional)]
    /// number of the task as listed by `todo`, starting at 1.
    pub index: Option<String>,
}

impl BuiltinCommand for Todo {
    fn name() -> &'static str {
        "todo"
    }

    fn execute(
        self,
        stdin: &mut dyn BufRead,
        stdout: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ReturnCode> {
        let path = session.env.config.todo_file.clone();
        let tasks = read_tasks(&path);

        match self.action {
            None if tasks.is_empty() => writeln!(stdout, "There is no task to do.")?,
            None => {
                for (i, task) in tasks.iter().enumerate() {
                    writeln!(stdout, "{}) {}", i + 1, task)?;
                }
            }
            Some(TodoAction::Add(add)) => {
                let task = if add.words.is_empty() {
                    read_answer(stdin, stdout, "Task to add: ")?
                } else {
                    add.words.join(" ")
                };
                if !task.is_empty() {
                    let mut file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .with_context(|| format!("todo: can't open {}", path.display()))?;
                    writeln!(file, "{}", task)?;
                }
            }
            Some(TodoAction::Remove(_)) if tasks.is_empty() => {
                writeln!(stdout, "There is no task to remove.")?
            }
            Some(TodoAction::Remove(remove)) => {
                let answer = match remove.index {
                    Some(index) => index,
                    None => read_answer(stdin, stdout, "Index of task to remove: ")?,
                };
                let index = answer
                    .parse::<usize>()
                    .ok()
                    .filter(|i| (1..=tasks.len()).contains(i))
                    .with_context(|| format!("todo: no task number {}", answer))?;
                let kept: String = tasks
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i + 1 != index)
                    .map(|(_, task)| format!("{}\n", task))
                    .collect();
                fs::write(&path, kept)
                    .with_context(|| format!("todo: can't write {}", path.display()))?;
            }
        }
        Ok(ReturnCode::Success)
    }
}

fn read_tasks(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(FromArgs)]
/// Search the current directory for files whose name contains a pattern.
pub struct FileSearch {
    #[argh(positional)]
    /// part of the file name to look for.
    pub pattern: String,

    #[argh(switch, short = 'r')]
    /// descend into subdirectories.
    pub recursive: bool,

    #[argh(switch, short = 'o')]
    /// open every match with xdg-open.
    pub open: bool,
}

impl BuiltinCommand for FileSearch {
    fn name() -> &'static str {
        "filesearch"
    }

    fn execute(
        self,
        _stdin: &mut dyn BufRead,
        stdout: &mut dyn Write,
        _session: &mut Session,
    ) -> Result<ReturnCode> {
        let matches = search_files(Path::new("."), &self.pattern, self.recursive)?;
        for path in &matches {
            writeln!(stdout, "\t{}", path.display())?;
        }
        stdout.flush()?;
        if self.open {
            for path in &matches {
                run_program("xdg-open", &[&*path.to_string_lossy()])?;
            }
        }
        Ok(ReturnCode::Success)
    }
}

/// Regular files under `root` whose name contains `pattern`, in name order.
pub fn search_files(root: &Path, pattern: &str, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<_> = fs::read_dir(root)
        .with_context(|| format!("filesearch: can't read {}", root.display()))?
        .flatten()
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut found = Vec::new();
    for entry in entries {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = root.join(entry.file_name());
        if file_type.is_file() && entry.file_name().to_string_lossy().contains(pattern) {
            found.push(path);
        } else if recursive && file_type.is_dir() {
            match search_files(&path, pattern, true) {
                Ok(nested) => found.extend(nested),
                Err(e) => debug!(error = %e, "skipping directory"),
            }
        }
    }
    Ok(found)
}

/// Line installed by `joker`.
pub const JOKER_CRONTAB: &str = concat!(
    "*/15 * * * * XDG_RUNTIME_DIR=/run/user/$(id -u) ",
    "notify-send Joke \"$(curl -s https://icanhazdadjoke.com/)\"\n",
);

#[derive(FromArgs)]
/// Schedule a dad joke notification every 15 minutes.
pub struct Joker {}

impl BuiltinCommand for Joker {
    fn name() -> &'static str {
        "joker"
    }

    fn execute(
        self,
        _stdin: &mut dyn BufRead,
        _stdout: &mut dyn Write,
        _session: &mut Session,
    ) -> Result<ReturnCode> {
        let mut file = tempfile::NamedTempFile::new().context("joker: can't create crontab file")?;
        file.write_all(JOKER_CRONTAB.as_bytes())?;
        file.flush()?;
        let status = run_program("crontab", &[&*file.path().to_string_lossy()])?;
        if status != 0 {
            bail!("joker: crontab exited with status {}", status);
        }
        Ok(ReturnCode::Success)
    }
}

#[derive(FromArgs)]
/// Print the process tree rooted at a pid through the traversal module.
pub struct Pstraverse {
    #[argh(positional)]
    /// root of the traversal.
    pub pid: u32,

    #[argh(switch, short = 'd')]
    /// depth-first order (the default).
    pub depth_first: bool,

    #[argh(switch, short = 'b')]
    /// breadth-first order.
    pub breadth_first: bool,
}

impl BuiltinCommand for Pstraverse {
    fn name() -> &'static str {
        "pstraverse"
    }

    fn execute(
        self,
        _stdin: &mut dyn BufRead,
        _stdout: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ReturnCode> {
        let order = match (self.depth_first, self.breadth_first) {
            (true, true) => bail!("pstraverse: -d and -b are exclusive"),
            (false, true) => TraversalOrder::BreadthFirst,
            _ => TraversalOrder::DepthFirst,
        };
        let request = TraversalRequest {
            pid: self.pid,
            order,
        };

        let config = &session.env.config;
        if session.bridge_loaded {
            bridge::send(&config.device, &request)?;
        } else {
            let status = bridge::load_module(&config.module, &request)?;
            if status != 0 {
                bail!("pstraverse: insmod exited with status {}", status);
            }
            session.bridge_loaded = true;
        }
        Ok(ReturnCode::Success)
    }
}

#[derive(FromArgs)]
/// Exit shell process
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        _stdin: &mut dyn BufRead,
        _stdout: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ReturnCode> {
        if session.bridge_loaded {
            match bridge::unload_module(&session.env.config.module) {
                Ok(0) => session.bridge_loaded = false,
                Ok(status) => warn!(status, "rmmod failed"),
                Err(e) => warn!(error = %e, "rmmod failed"),
            }
        }
        session.env.should_exit = true;
        Ok(ReturnCode::Exit)
    }
}
