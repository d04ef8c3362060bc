//! Progress log channel consumed by the terminal UI.
//!
//! Lines are append-only and delivered at least once; nothing waits for an
//! acknowledgement.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::status::Component;

/// Receives per-component progress lines.
pub trait LogSink {
    /// Append one line.
    fn add_log(&self, component: Component, line: &str);

    /// Replace everything recorded for a component.
    fn set_logs(&self, component: Component, lines: Vec<String>);
}

/// Forwards lines to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn add_log(&self, component: Component, line: &str) {
        tracing::info!(%component, "{line}");
    }

    fn set_logs(&self, component: Component, lines: Vec<String>) {
        for line in lines {
            tracing::info!(%component, "{line}");
        }
    }
}

/// Keeps every line in memory, grouped by component.
#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: Mutex<BTreeMap<Component, Vec<String>>>,
}

impl LogBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines recorded for a component.
    pub fn lines(&self, component: Component) -> Vec<String> {
        self.lines
            .lock()
            .ok()
            .and_then(|l| l.get(&component).cloned())
            .unwrap_or_default()
    }
}

impl LogSink for LogBuffer {
    fn add_log(&self, component: Component, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.entry(component).or_default().push(line.to_string());
        }
    }

    fn set_logs(&self, component: Component, new_lines: Vec<String>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.insert(component, new_lines);
        }
    }
}

/// Sends every line to two sinks.
pub struct Tee<'a>(pub &'a dyn LogSink, pub &'a dyn LogSink);

impl LogSink for Tee<'_> {
    fn add_log(&self, component: Component, line: &str) {
        self.0.add_log(component, line);
        self.1.add_log(component, line);
    }

    fn set_logs(&self, component: Component, lines: Vec<String>) {
        self.0.set_logs(component, lines.clone());
        self.1.set_logs(component, lines);
    }
}
