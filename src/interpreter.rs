use crate::builtin::match_builtin;
use crate::command::{ExitCode, ReturnCode, Stage};
use crate::completion;
use crate::env::Environment;
use crate::executor;
use crate::job::BackgroundJobs;
use crate::line_reader::{HistorySlot, LineReader, ReadOutcome};
use crate::parser;
use crate::resolver::PATH_KEY;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use tracing::{debug, warn};

/// Mutable state of one shell session, handed explicitly to every handler.
#[derive(Debug)]
pub struct Session {
    pub env: Environment,
    /// Previous accepted line, for up-arrow recall.
    pub history: HistorySlot,
    pub jobs: BackgroundJobs,
    /// The traversal module was inserted during this session.
    pub bridge_loaded: bool,
}

impl Session {
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            history: HistorySlot::default(),
            jobs: BackgroundJobs::new(),
            bridge_loaded: false,
        }
    }
}

/// Read → parse → dispatch → execute driver.
///
/// Example
/// ```no_run
/// use shellfyre::{Environment, Interpreter};
/// let status = Interpreter::new(Environment::new()).repl();
/// std::process::exit(status);
/// ```
pub struct Interpreter {
    session: Session,
}

impl Interpreter {
    pub fn new(env: Environment) -> Self {
        Self {
            session: Session::new(env),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run the interactive loop on the terminal until the session ends.
    ///
    /// Returns the status of the last foreground command.
    pub fn repl(&mut self) -> ExitCode {
        self.run(&mut LineReader::stdio())
    }

    pub fn run<R, W, T>(&mut self, reader: &mut LineReader<R, W, T>) -> ExitCode
    where
        R: Read,
        W: Write,
        T: AsFd,
    {
        while !self.session.env.should_exit {
            self.report_finished_jobs();
            if let Err(e) = reader.print(&self.session.env.prompt()) {
                warn!(error = %e, "failed to print prompt");
                break;
            }
            match reader.read_line(&mut self.session.history) {
                Ok(ReadOutcome::Line(line)) => {
                    self.process_line(&line);
                }
                Ok(ReadOutcome::Interrupted) => continue,
                Ok(ReadOutcome::Exit) => break,
                Err(e) => {
                    eprintln!("-shellfyre: {}", e);
                    break;
                }
            }
        }
        self.report_finished_jobs();
        if let Err(e) = reader.print("\n") {
            warn!(error = %e, "failed to finish the last line");
        }
        self.session.env.last_status
    }

    /// Parse and run one line.
    pub fn process_line(&mut self, line: &str) -> ReturnCode {
        let chain = parser::parse(line);
        debug!(stages = chain.len(), background = chain.last().background, "parsed line");
        self.process_command(&chain)
    }

    pub fn process_command(&mut self, chain: &Stage) -> ReturnCode {
        if chain.is_empty() && chain.next.is_none() {
            return ReturnCode::Success;
        }
        if chain.iter().any(Stage::is_empty) {
            eprintln!("-shellfyre: syntax error near '|'");
            self.session.env.last_status = ReturnCode::Unknown.code();
            return ReturnCode::Unknown;
        }

        let last = chain.last();
        if last.auto_complete_requested {
            self.print_completions(last);
            return ReturnCode::Success;
        }

        if chain.next.is_none() {
            if let Some(builtin) = match_builtin(&chain.executable_name) {
                return self.run_builtin(builtin, chain);
            }
        }

        match executor::execute(chain, &mut self.session.jobs) {
            Ok(status) => {
                self.session.env.last_status = status;
                ReturnCode::Success
            }
            Err(e) => {
                eprintln!("-shellfyre: {}", e);
                self.session.env.last_status = 1;
                ReturnCode::Unknown
            }
        }
    }

    fn run_builtin(&mut self, builtin: crate::builtin::BuiltinFn, stage: &Stage) -> ReturnCode {
        let args: Vec<&str> = stage.arguments.iter().map(String::as_str).collect();
        let mut stdin = io::stdin().lock();
        let mut stdout = io::stdout();
        debug!(name = %stage.executable_name, "running builtin");
        match builtin(&args, &mut stdin, &mut stdout, &mut self.session) {
            Ok(code) => {
                self.session.env.last_status = 0;
                code
            }
            Err(e) => {
                eprintln!("-shellfyre: {:#}", e);
                self.session.env.last_status = 1;
                ReturnCode::Success
            }
        }
    }

    fn completions(&self, stage: &Stage) -> Vec<String> {
        let search_path = std::env::var_os(PATH_KEY).unwrap_or_default();
        completion::candidates(stage, &search_path, &self.session.env.current_dir)
    }

    fn print_completions(&self, stage: &Stage) {
        let found = self.completions(stage);
        if !found.is_empty() {
            println!("{}", found.join("  "));
        }
    }

    fn report_finished_jobs(&mut self) {
        for id in self.session.jobs.reap() {
            println!("[{}] done", id);
        }
    }
}
