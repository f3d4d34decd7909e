//! An interactive command shell core.
//!
//! A line typed at the terminal goes through four steps: the raw-mode
//! [`line_reader`] collects it, the [`parser`] turns it into a chain of
//! [`command::Stage`]s, the [`resolver`] finds each stage's executable on the
//! search path, and the [`executor`] runs the chain as connected OS processes.
//! The [`Interpreter`] ties them together and dispatches the built-in
//! commands before anything is launched.

mod bridge;
mod builtin;
pub mod command;
mod completion;
pub mod env;
pub mod executor;
pub mod job;
mod interpreter;
mod lexer;
pub mod line_reader;
pub mod parser;
pub mod resolver;

pub use env::Environment;
/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::{Interpreter, Session};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    /// Serializes tests that change the process working directory.
    pub fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
