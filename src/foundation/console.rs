//! Process-wide text output and confirmation prompts.
//!
//! Everything the commands print goes through a [`Console`] rather than
//! straight to stdout. During a sync the sink is swapped for the status
//! display, which keeps whole lines from different worker threads apart and
//! redraws the task footer below them.

use crate::foundation::utils::is_affirmative;
use parking_lot::RwLock;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// Destination for console text.
pub trait OutputSink: Send + Sync {
    fn write_str(&self, text: &str);

    /// Called once when the sink stops being the active console output.
    fn finish(&self) {}
}

pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_str(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Source of answers to interactive questions.
#[cfg_attr(test, mockall::automock)]
pub trait Prompter: Send + Sync {
    fn read_reply(&self) -> io::Result<String>;
}

pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn read_reply(&self) -> io::Result<String> {
        let mut input = String::new();
        let read = io::stdin().lock().read_line(&mut input)?;
        if read == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"));
        }
        Ok(input.trim_end_matches(&['\r', '\n'][..]).to_string())
    }
}

#[derive(Clone)]
pub struct Console {
    sink: Arc<RwLock<Arc<dyn OutputSink>>>,
    prompter: Arc<dyn Prompter>,
}

impl Console {
    pub fn new(sink: Arc<dyn OutputSink>, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            sink: Arc::new(RwLock::new(sink)),
            prompter,
        }
    }

    pub fn stdout() -> Self {
        Self::new(Arc::new(StdoutSink), Arc::new(StdinPrompter))
    }

    pub fn print(&self, text: &str) {
        self.sink().write_str(text);
    }

    pub fn println(&self, line: impl AsRef<str>) {
        self.sink().write_str(&format!("{}\n", line.as_ref()));
    }

    /// Prints `question` and reads one line of input.
    pub fn prompt(&self, question: &str) -> io::Result<String> {
        self.print(question);
        self.prompter.read_reply()
    }

    /// Asks a yes/no question. Only `y` and `yes` count as consent; a closed
    /// input counts as a refusal.
    pub fn ask(&self, question: &str) -> bool {
        self.prompt(question)
            .map(|reply| is_affirmative(&reply))
            .unwrap_or(false)
    }

    pub fn sink(&self) -> Arc<dyn OutputSink> {
        self.sink.read().clone()
    }

    /// Routes all output to `sink` until the returned guard is dropped.
    pub fn intercept(&self, sink: Arc<dyn OutputSink>) -> InterceptGuard {
        let previous = std::mem::replace(&mut *self.sink.write(), sink.clone());
        InterceptGuard {
            console: self.clone(),
            previous: Some(previous),
            installed: sink,
        }
    }
}

pub struct InterceptGuard {
    console: Console,
    previous: Option<Arc<dyn OutputSink>>,
    installed: Arc<dyn OutputSink>,
}

impl Drop for InterceptGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.console.sink.write() = previous;
        }
        self.installed.finish();
    }
}

/// Sink collecting everything written to it, for assertions in tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    text: parking_lot::Mutex<String>,
}

#[cfg(test)]
impl MemorySink {
    pub fn contents(&self) -> String {
        self.text.lock().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    pub fn clear(&self) {
        self.text.lock().clear();
    }
}

#[cfg(test)]
impl OutputSink for MemorySink {
    fn write_str(&self, text: &str) {
        self.text.lock().push_str(text);
    }
}
