use std::collections::{BTreeSet, VecDeque};

/// Recent entries kept for inspection. Older ones are only counted.
const RECENT_LIMIT: usize = 256;

/// How bad a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Error,
}

/// A recorded diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// Diagnostics sink owned by a world session.
///
/// Every entry is forwarded to `tracing`. The most recent ones are kept so
/// tools and tests can inspect what went wrong, and totals are counted per
/// severity. `warn_once` de-duplicates by key for the lifetime of the session.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: VecDeque<Diagnostic>,
    warnings: usize,
    errors: usize,
    seen: BTreeSet<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.warnings += 1;
        self.record(Severity::Warn, message);
    }

    /// Warn only the first time `key` is seen in this session.
    pub fn warn_once(&mut self, key: &str, message: impl Into<String>) {
        if self.seen.insert(key.to_string()) {
            self.warn(message);
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.errors += 1;
        self.record(Severity::Error, message);
    }

    fn record(&mut self, severity: Severity, message: String) {
        if self.entries.len() == RECENT_LIMIT {
            self.entries.pop_front();
        }
        self.entries.push_back(Diagnostic { severity, message });
    }

    /// Recent entries, oldest first.
    pub fn entries(&self) -> &VecDeque<Diagnostic> {
        &self.entries
    }

    /// Total for the session, including entries already drained or dropped.
    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Warn => self.warnings,
            Severity::Error => self.errors,
        }
    }

    /// Take the recent entries. Totals are kept.
    pub fn drain(&mut self) -> Vec<Diagnostic> {
        self.entries.drain(..).collect()
    }
}
