use std::collections::VecDeque;

use indexmap::IndexMap;
use vt100::Parser as VtParser;

use crate::backend::ProcessKind;
use crate::config::GantryConfig;

#[derive(Debug)]
pub enum OutputError {
    DuplicateAttach { process_id: String },
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputError::DuplicateAttach { process_id } => {
                write!(f, "a sink is already attached for process `{process_id}`")
            }
        }
    }
}

impl std::error::Error for OutputError {}

/// Per-process output consumer. Every sink keeps a bounded line ring;
/// terminal sinks additionally feed a vt100 emulator so escape-heavy output
/// stays inspectable. Overflow drops the oldest lines.
pub struct OutputSink {
    kind: ProcessKind,
    lines: VecDeque<String>,
    max_lines: usize,
    pending: String,
    vt: Option<VtParser>,
}

impl OutputSink {
    pub fn new(kind: ProcessKind, config: &GantryConfig) -> Self {
        let vt = match kind {
            ProcessKind::Terminal => Some(VtParser::new(
                config.terminal_rows,
                config.terminal_cols,
                config.terminal_scrollback,
            )),
            ProcessKind::Command => None,
        };
        Self {
            kind,
            lines: VecDeque::new(),
            max_lines: config.scrollback_lines,
            pending: String::new(),
            vt,
        }
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn write(&mut self, chunk: &[u8]) {
        if let Some(parser) = self.vt.as_mut() {
            parser.process(chunk);
        }
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        while let Some(break_at) = self.pending.find('\n') {
            let remainder = self.pending.split_off(break_at + 1);
            let mut line = std::mem::replace(&mut self.pending, remainder);
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            self.push_completed(line);
        }
    }

    pub fn push_line(&mut self, line: &str) {
        if !self.pending.is_empty() {
            let carried = std::mem::take(&mut self.pending);
            self.push_completed(carried);
        }
        self.push_completed(line.to_owned());
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn tail(&self, count: usize) -> Vec<&str> {
        let skip = self.lines.len().saturating_sub(count);
        self.lines.iter().skip(skip).map(String::as_str).collect()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Rendered emulator rows for terminal sinks; command sinks have none.
    pub fn screen_lines(&self) -> Option<Vec<String>> {
        let parser = self.vt.as_ref()?;
        let screen = parser.screen();
        let (_, cols) = screen.size();
        Some(screen.rows(0, cols).collect::<Vec<String>>())
    }

    fn push_completed(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }
}

/// Sink store keyed by process id. At most one sink is visible at a time;
/// writes to an unbound id are dropped rather than failed, which covers the
/// race between stream chunks and attach/detach.
#[derive(Default)]
pub struct OutputMultiplexer {
    sinks: IndexMap<String, OutputSink>,
    visible: Option<String>,
}

impl OutputMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, process_id: &str, sink: OutputSink) -> Result<(), OutputError> {
        if self.sinks.contains_key(process_id) {
            return Err(OutputError::DuplicateAttach {
                process_id: process_id.to_owned(),
            });
        }
        self.sinks.insert(process_id.to_owned(), sink);
        Ok(())
    }

    /// Reports whether the chunk reached a sink; `false` means it was
    /// dropped because nothing is bound to the id.
    pub fn write(&mut self, process_id: &str, chunk: &[u8]) -> bool {
        let Some(sink) = self.sinks.get_mut(process_id) else {
            return false;
        };
        sink.write(chunk);
        true
    }

    pub fn push_line(&mut self, process_id: &str, line: &str) -> bool {
        let Some(sink) = self.sinks.get_mut(process_id) else {
            return false;
        };
        sink.push_line(line);
        true
    }

    /// Makes this sink the single visible one; unknown ids leave visibility
    /// untouched and report `false`.
    pub fn show(&mut self, process_id: &str) -> bool {
        if !self.sinks.contains_key(process_id) {
            return false;
        }
        self.visible = Some(process_id.to_owned());
        true
    }

    pub fn detach(&mut self, process_id: &str) -> Option<OutputSink> {
        let removed = self.sinks.shift_remove(process_id);
        if removed.is_some() && self.visible.as_deref() == Some(process_id) {
            self.visible = None;
        }
        removed
    }

    pub fn visible(&self) -> Option<&str> {
        self.visible.as_deref()
    }

    pub fn sink(&self, process_id: &str) -> Option<&OutputSink> {
        self.sinks.get(process_id)
    }

    pub fn is_attached(&self, process_id: &str) -> bool {
        self.sinks.contains_key(process_id)
    }

    pub fn attached_ids(&self) -> Vec<String> {
        self.sinks.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn clear(&mut self) {
        self.sinks.clear();
        self.visible = None;
    }
}

#[cfg(test)]
#[path = "tests/output_tests.rs"]
mod tests;
