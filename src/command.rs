//! Structured form of one input line: a chain of pipeline stages.

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Status recorded for a stage whose executable could not be found.
pub const NOT_FOUND_STATUS: ExitCode = 127;

/// Outcome of processing one input line, as seen by the driver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// The line was handled (including empty input); keep reading.
    Success = 0,
    /// The user asked to end the session.
    Exit = 1,
    /// The command was not recognized.
    Unknown = 2,
}

impl ReturnCode {
    pub fn code(self) -> ExitCode {
        self as ExitCode
    }
}

/// Which standard stream a redirection replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `<path`: read standard input from a file.
    Stdin = 0,
    /// `>path`: write standard output to a file, truncating it.
    Stdout = 1,
    /// `>>path`: write standard output to a file, appending to it.
    StdoutAppend = 2,
}

/// Fixed three-slot redirection table of a stage.
///
/// Only one output slot can be occupied at a time: recording `>` clears a
/// previous `>>` and the other way round, so the last operator seen wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redirects {
    slots: [Option<String>; 3],
}

impl Redirects {
    pub fn get(&self, kind: RedirectKind) -> Option<&str> {
        self.slots[kind as usize].as_deref()
    }

    pub fn set(&mut self, kind: RedirectKind, path: impl Into<String>) {
        match kind {
            RedirectKind::Stdout => self.slots[RedirectKind::StdoutAppend as usize] = None,
            RedirectKind::StdoutAppend => self.slots[RedirectKind::Stdout as usize] = None,
            RedirectKind::Stdin => {}
        }
        self.slots[kind as usize] = Some(path.into());
    }

    /// Path that replaces standard input, if any.
    pub fn input(&self) -> Option<&str> {
        self.get(RedirectKind::Stdin)
    }

    /// Path and mode that replace standard output, if any.
    pub fn output(&self) -> Option<(&str, RedirectKind)> {
        self.get(RedirectKind::Stdout)
            .map(|path| (path, RedirectKind::Stdout))
            .or_else(|| {
                self.get(RedirectKind::StdoutAppend)
                    .map(|path| (path, RedirectKind::StdoutAppend))
            })
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// One command of a pipeline.
///
/// Stages form a singly linked chain through `next`; each stage owns its
/// successor. `background` and `auto_complete_requested` are only set on the
/// last stage of a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    /// Program to run. Empty only when the input line was blank.
    pub executable_name: String,
    /// Arguments in typed order, without the executable name.
    pub arguments: Vec<String>,
    /// The pipeline was followed by `&`.
    pub background: bool,
    /// The line ended with `?` (or Tab was pressed).
    pub auto_complete_requested: bool,
    pub redirects: Redirects,
    /// Stage receiving this stage's standard output.
    pub next: Option<Box<Stage>>,
}

impl Stage {
    pub fn new(executable_name: impl Into<String>) -> Self {
        let mut stage = Self::default();
        stage.executable_name = executable_name.into();
        stage
    }

    /// True for the stage produced by a blank line.
    pub fn is_empty(&self) -> bool {
        self.executable_name.is_empty()
    }

    /// Walk the chain starting at this stage.
    pub fn iter(&self) -> Stages<'_> {
        Stages { next: Some(self) }
    }

    /// Number of stages in the chain starting at this stage.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Terminal stage of the chain.
    pub fn last(&self) -> &Stage {
        let mut stage = self;
        while let Some(next) = stage.next.as_deref() {
            stage = next;
        }
        stage
    }

    pub fn last_mut(&mut self) -> &mut Stage {
        let mut stage = self;
        while stage.next.is_some() {
            // `next` was just checked to be present.
            stage = match stage.next.as_deref_mut() {
                Some(next) => next,
                None => unreachable!(),
            };
        }
        stage
    }

    /// Executable name followed by the arguments, as handed to the program.
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.executable_name.as_str())
            .chain(self.arguments.iter().map(String::as_str))
    }
}

impl Drop for Stage {
    // Unlink iteratively so long chains don't recurse through `Box` drops.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut stage) = next {
            next = stage.next.take();
        }
    }
}

/// Iterator over the stages of a chain, first to last.
pub struct Stages<'a> {
    next: Option<&'a Stage>,
}

impl<'a> Iterator for Stages<'a> {
    type Item = &'a Stage;

    fn next(&mut self) -> Option<Self::Item> {
        let stage = self.next?;
        self.next = stage.next.as_deref();
        Some(stage)
    }
}
