//! Live footer listing the tasks in progress below the regular output.
//!
//! [`StatusDisplay`] is installed as the console sink for the duration of a
//! sync. Every completed line erases the footer, prints the line, then draws
//! the footer again, so worker output and progress never overlap. Partial
//! lines are held per thread until their newline arrives.

use crate::foundation::console::OutputSink;
use crate::foundation::utils::clip_long_line;
use crossterm::cursor::MoveUp;
use crossterm::terminal;
use crossterm::Command;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Erase to the end of the line before moving to the next one.
const ENDLINE: &str = "\x1b[K\n";
const CLEAR_BELOW: &str = "\x1b[J";
const DEFAULT_WIDTH: usize = 80;
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Footer {
    tasks: BTreeMap<u8, BTreeMap<String, String>>,
    last_render: Option<Instant>,
    partial_lines: HashMap<ThreadId, String>,
}

pub struct StatusDisplay {
    downstream: Arc<dyn OutputSink>,
    min_interval: Duration,
    width: usize,
    footer: Mutex<Footer>,
}

impl StatusDisplay {
    pub fn new(downstream: Arc<dyn OutputSink>) -> Arc<Self> {
        let width = terminal::size()
            .map(|(columns, _)| usize::from(columns).saturating_sub(1))
            .ok()
            .filter(|w| *w > 0)
            .unwrap_or(DEFAULT_WIDTH - 1);
        Self::with_settings(downstream, width, MIN_REFRESH_INTERVAL)
    }

    pub fn with_settings(
        downstream: Arc<dyn OutputSink>,
        width: usize,
        min_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            downstream,
            min_interval,
            width,
            footer: Mutex::new(Footer::default()),
        })
    }

    /// Shows `task` in the footer until the returned guard is dropped.
    ///
    /// Tasks with a lower `category` are listed first.
    pub fn start_task(self: &Arc<Self>, category: u8, task: impl Into<String>) -> TaskGuard {
        let handle = TaskHandle {
            display: self.clone(),
            category,
            task: task.into(),
        };
        handle.update_status("");
        TaskGuard { handle }
    }

    fn update_status(&self, category: u8, task: &str, status: &str) {
        let mut footer = self.footer.lock();
        footer
            .tasks
            .entry(category)
            .or_default()
            .insert(task.to_string(), status.to_string());

        let due = footer
            .last_render
            .map_or(true, |last| last.elapsed() >= self.min_interval);
        if due {
            self.render(&mut footer, "");
        }
    }

    fn task_completed(&self, category: u8, task: &str) {
        let mut footer = self.footer.lock();
        if let Some(tasks) = footer.tasks.get_mut(&category) {
            tasks.remove(task);
            if tasks.is_empty() {
                footer.tasks.remove(&category);
            }
        }
        self.render(&mut footer, "");
    }

    /// Writes completed lines followed by a fresh footer. Must be called with
    /// the footer lock held.
    fn render(&self, footer: &mut Footer, lines: &str) {
        let mut out = lines.split('\n').collect::<Vec<_>>().join(ENDLINE);
        out.push_str(&self.status_block(footer));
        self.downstream.write_str(&out);
        footer.last_render = Some(Instant::now());
    }

    fn status_block(&self, footer: &Footer) -> String {
        let categories: Vec<String> = footer
            .tasks
            .values()
            .map(|tasks| {
                tasks
                    .iter()
                    .map(|(task, status)| clip_long_line(&format!("{task}{status}"), self.width))
                    .collect::<Vec<_>>()
                    .join(ENDLINE)
            })
            .collect();

        let mut block = format!(
            "{ENDLINE}{}{ENDLINE}",
            categories.join(&ENDLINE.repeat(2))
        );
        let rows = block.matches('\n').count();
        block.push_str(CLEAR_BELOW);
        if rows > 0 {
            let _ = MoveUp(rows as u16).write_ansi(&mut block);
        }
        block.push('\r');
        block
    }
}

impl OutputSink for StatusDisplay {
    fn write_str(&self, text: &str) {
        let mut footer = self.footer.lock();
        let id = thread::current().id();
        let buffer = footer.partial_lines.entry(id).or_default();
        buffer.push_str(text);

        let Some(end) = buffer.rfind('\n') else {
            return;
        };
        let rest = buffer.split_off(end + 1);
        let complete = std::mem::replace(buffer, rest);
        if buffer.is_empty() {
            footer.partial_lines.remove(&id);
        }
        self.render(&mut footer, &complete);
    }

    fn finish(&self) {
        let mut footer = self.footer.lock();
        let mut pending: Vec<String> = footer.partial_lines.drain().map(|(_, line)| line).collect();
        pending.sort();
        footer.tasks.clear();

        let mut out = String::new();
        for line in pending {
            out.push_str(&line);
            out.push_str(ENDLINE);
        }
        out.push_str(CLEAR_BELOW);
        self.downstream.write_str(&out);
    }
}

/// Keeps a task listed in the footer; removes it when dropped.
pub struct TaskGuard {
    handle: TaskHandle,
}

impl TaskGuard {
    pub fn update_status(&self, status: &str) {
        self.handle.update_status(status);
    }

    /// A cloneable reference for updating this task from a callback.
    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.handle
            .display
            .task_completed(self.handle.category, &self.handle.task);
    }
}

#[derive(Clone)]
pub struct TaskHandle {
    display: Arc<StatusDisplay>,
    category: u8,
    task: String,
}

impl TaskHandle {
    pub fn update_status(&self, status: &str) {
        self.display.update_status(self.category, &self.task, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::console::MemorySink;

    fn display(min_interval: Duration) -> (Arc<StatusDisplay>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        (StatusDisplay::with_settings(sink.clone(), 40, min_interval), sink)
    }

    #[test]
    fn test_lines_are_written_before_the_footer() {
        let (display, sink) = display(Duration::ZERO);
        let task = display.start_task(0, "+ Uploading \"a.jpg\"");
        task.update_status(": 50.0%");
        display.write_str("Creating Album \"x\".\n");

        let out = sink.contents();
        let line_at = out.rfind("Creating Album \"x\".\x1b[K\n").unwrap();
        let status_at = out.rfind("+ Uploading \"a.jpg\": 50.0%").unwrap();
        assert!(line_at < status_at);
    }

    #[test]
    fn test_footer_moves_cursor_back_up() {
        let (display, sink) = display(Duration::ZERO);
        let _first = display.start_task(0, "first");
        let _second = display.start_task(1, "second");
        sink.clear();
        display.write_str("");
        display.write_str("line\n");

        // blank, first, blank, second
        assert_eq!(
            sink.contents(),
            "line\x1b[K\n\x1b[K\nfirst\x1b[K\n\x1b[K\nsecond\x1b[K\n\x1b[J\x1b[4A\r"
        );
    }

    #[test]
    fn test_partial_lines_wait_for_newline() {
        let (display, sink) = display(Duration::ZERO);
        display.write_str("par");
        assert_eq!(sink.contents(), "");

        display.write_str("tial\nnext");
        assert!(sink.contents().starts_with("partial\x1b[K\n"));
        assert!(!sink.contents().contains("next"));
    }

    #[test]
    fn test_status_updates_are_rate_limited() {
        let (display, sink) = display(Duration::from_secs(3600));
        let task = display.start_task(0, "task");
        let after_start = sink.contents();
        assert!(after_start.contains("task"));

        task.update_status(": 10.0%");
        task.update_status(": 20.0%");
        assert_eq!(sink.contents(), after_start);

        drop(task);
        assert!(sink.contents().len() > after_start.len());
    }

    #[test]
    fn test_long_status_is_clipped() {
        let (display, sink) = display(Duration::ZERO);
        let _task = display.start_task(0, "x".repeat(100));
        assert!(sink.contents().contains(&format!("{}...{}", "x".repeat(25), "x".repeat(12))));
    }

    #[test]
    fn test_concurrent_writers_never_interleave_lines() {
        let (display, sink) = display(Duration::ZERO);
        let workers: Vec<_> = (0..4)
            .map(|n| {
                let display = display.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        display.write_str(&format!("worker {n} "));
                        display.write_str(&format!("line {i}\n"));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let lines: Vec<String> = sink
            .contents()
            .split(ENDLINE)
            .filter_map(|l| l.find("worker").map(|at| l[at..].to_string()))
            .collect();
        assert_eq!(lines.len(), 200);
        for line in lines {
            let words: Vec<&str> = line.split(' ').collect();
            assert_eq!(words.len(), 4, "garbled line {line:?}");
        }
    }

    #[test]
    fn test_finish_clears_footer() {
        let (display, sink) = display(Duration::ZERO);
        let task = display.start_task(0, "task");
        std::mem::forget(task);
        display.finish();
        assert!(sink.contents().ends_with(CLEAR_BELOW));
    }
}
