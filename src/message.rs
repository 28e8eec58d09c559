//! User-facing diagnostics.
//!
//! Every diagnostic carries a stable textual ID, a severity, and a formatted
//! message. Informational messages go to stdout, warnings and errors to
//! stderr. Errors are fatal to the current job only.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

/// Diagnostic severity.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Severity {
    /// Never fatal; printed to stdout.
    Info,
    /// Never fatal; printed to stderr.
    Warning,
    /// Fatal to the current job; printed to stderr.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// A single diagnostic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// Stable textual identifier, e.g. `"GLB_EXTRA_CHUNK"`.
    pub id: &'static str,
    /// Severity of the condition.
    pub severity: Severity,
    /// JSON source path the message is anchored at, when known.
    pub path: String,
    /// Formatted message text.
    pub text: String,
}

impl Message {
    /// Constructs a new message with an empty path.
    pub fn new(id: &'static str, severity: Severity, text: impl Into<String>) -> Self {
        Self {
            id,
            severity,
            path: String::new(),
            text: text.into(),
        }
    }

    /// Returns the same message anchored at a JSON source path.
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Renders the message the way the CLI prints it.
    pub fn to_display_string(&self) -> String {
        if self.path.is_empty() {
            format!("{}: {} [{}]", self.severity, self.text, self.id)
        } else {
            format!("{}: {}: {} [{}]", self.severity, self.path, self.text, self.id)
        }
    }
}

/// Sink for diagnostics.
///
/// Loggers are per-job; no global state.
pub trait Logger {
    /// Records one message.
    fn add(&self, message: Message);

    /// Number of error-severity messages recorded so far.
    fn error_count(&self) -> usize;
}

/// Logger that prints each message as it arrives.
pub struct PrintLogger {
    line_prefix: String,
    error_count: RefCell<usize>,
}

impl PrintLogger {
    /// Creates a print logger with the given per-line prefix.
    pub fn new(line_prefix: impl Into<String>) -> Self {
        Self {
            line_prefix: line_prefix.into(),
            error_count: RefCell::new(0),
        }
    }
}

impl Default for PrintLogger {
    fn default() -> Self {
        Self::new("")
    }
}

impl Logger for PrintLogger {
    fn add(&self, message: Message) {
        let line = format!("{}{}", self.line_prefix, message.to_display_string());
        match message.severity {
            Severity::Info => println!("{}", line),
            Severity::Warning => eprintln!("{}", line),
            Severity::Error => {
                eprintln!("{}", line);
                *self.error_count.borrow_mut() += 1;
            }
        }
    }

    fn error_count(&self) -> usize {
        *self.error_count.borrow()
    }
}

/// Logger that stores messages for later inspection.
#[derive(Default)]
pub struct VecLogger {
    messages: RefCell<Vec<Message>>,
}

impl VecLogger {
    /// Creates an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded messages.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    /// True when a message with the given ID was recorded.
    pub fn has_id(&self, id: &str) -> bool {
        self.messages.borrow().iter().any(|m| m.id == id)
    }

    /// Drops all recorded messages.
    pub fn clear(&self) {
        self.messages.borrow_mut().clear();
    }
}

impl Logger for VecLogger {
    fn add(&self, message: Message) {
        self.messages.borrow_mut().push(message);
    }

    fn error_count(&self) -> usize {
        self.messages
            .borrow()
            .iter()
            .filter(|m| m.severity == Severity::Error)
            .count()
    }
}

/// How many subject names a merged message lists before eliding.
const ONCE_NAME_MAX: usize = 3;

/// Merges identical messages, collecting up to three example subject names.
///
/// Flushing emits each distinct (ID, text) pair once, suffixed with the
/// collected names and `(plus K more)` when elided.
pub struct OnceLogger<'a> {
    logger: &'a dyn Logger,
    entries: RefCell<BTreeMap<(&'static str, String), OnceEntry>>,
}

struct OnceEntry {
    severity: Severity,
    names: Vec<String>,
    total: usize,
}

impl<'a> OnceLogger<'a> {
    /// Wraps an underlying logger.
    pub fn new(logger: &'a dyn Logger) -> Self {
        Self {
            logger,
            entries: RefCell::new(BTreeMap::new()),
        }
    }

    /// Records a message, merging it with identical ones.
    pub fn add(&self, name: &str, message: Message) {
        let mut entries = self.entries.borrow_mut();
        let entry = entries
            .entry((message.id, message.text.clone()))
            .or_insert(OnceEntry {
                severity: message.severity,
                names: Vec::new(),
                total: 0,
            });
        entry.total += 1;
        if entry.names.len() < ONCE_NAME_MAX && !name.is_empty() {
            entry.names.push(name.to_string());
        }
    }

    /// Emits each merged message once to the underlying logger.
    pub fn flush(&self) {
        let mut entries = self.entries.borrow_mut();
        for ((id, text), entry) in entries.iter() {
            let mut full = text.clone();
            if !entry.names.is_empty() {
                full.push_str(": ");
                full.push_str(&entry.names.join(", "));
                let elided = entry.total.saturating_sub(entry.names.len());
                if elided != 0 {
                    full.push_str(&format!(" …(plus {} more)", elided));
                }
            }
            self.logger.add(Message::new(id, entry.severity, full));
        }
        entries.clear();
    }
}

impl Drop for OnceLogger<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_logger_counts_errors() {
        let logger = VecLogger::new();
        logger.add(Message::new("A", Severity::Info, "a"));
        logger.add(Message::new("B", Severity::Error, "b"));
        logger.add(Message::new("B", Severity::Error, "b"));
        assert_eq!(logger.error_count(), 2);
        assert!(logger.has_id("A"));
        assert!(!logger.has_id("C"));
    }

    #[test]
    fn once_logger_merges_and_elides() {
        let logger = VecLogger::new();
        {
            let once = OnceLogger::new(&logger);
            for i in 0..5 {
                once.add(
                    &format!("prim{}", i),
                    Message::new("VERTEX_COLOR_DROPPED", Severity::Warning, "dropped"),
                );
            }
            once.flush();
        }
        let messages = logger.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("prim0, prim1, prim2"));
        assert!(messages[0].text.contains("plus 2 more"));
    }

    #[test]
    fn once_logger_keeps_distinct_texts_separate() {
        let logger = VecLogger::new();
        let once = OnceLogger::new(&logger);
        once.add("a", Message::new("X", Severity::Warning, "first"));
        once.add("b", Message::new("X", Severity::Warning, "second"));
        once.flush();
        assert_eq!(logger.messages().len(), 2);
    }
}
