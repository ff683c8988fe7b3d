//! Diagnostic collection and pretty-printing to the console.
//!
//! Validation runs repeatedly (see [`crate::driver`]); an error raised on
//! an early pass might be transient (a symbol that resolves two passes
//! later), so `Validate`-time diagnostics are *queued* and only promoted to
//! the permanent error list at the end of a pass. `Encode`-time and
//! file/include-time diagnostics are printed immediately.

use colored::Colorize;
use std::fmt;

use crate::error::{Error, FileLine, Severity};

/// A single diagnostic, already attributed to a source location.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<FileLine>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "file{}({}) {}: {}", loc.file_num, loc.line, self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Central diagnostic sink for one assemble run.
///
/// Owned by [`crate::driver::AssembleContext`] and cleared at the start of
/// every `run()`; no state here is shared across concurrent runs.
pub struct Logger {
    queue: Vec<Diagnostic>,
    errors: Vec<Diagnostic>,
    suppress_depth: u32,
    silent: bool,
    error_on_warning: bool,
    had_fatal: bool,
}

impl Default for Logger {
    fn default() -> Self {
        Logger {
            queue: Vec::new(),
            errors: Vec::new(),
            suppress_depth: 0,
            silent: false,
            error_on_warning: false,
            had_fatal: false,
        }
    }
}

impl Logger {
    pub fn new(silent: bool, error_on_warning: bool) -> Self {
        Logger {
            silent,
            error_on_warning,
            ..Default::default()
        }
    }

    /// Suppresses both printing and queueing for the duration the returned
    /// guard is alive. Used during a macro's dry-run body parse.
    pub fn suppress(&mut self) -> SuppressGuard<'_> {
        self.suppress_depth += 1;
        SuppressGuard { logger: self }
    }

    fn effective_severity(&self, severity: Severity) -> Severity {
        if self.error_on_warning && severity == Severity::Warning {
            Severity::Error
        } else {
            severity
        }
    }

    /// Queues a diagnostic raised during `Validate`. Flushed at pass end.
    pub fn queue(&mut self, severity: Severity, message: impl Into<String>, location: Option<FileLine>) {
        if self.suppress_depth > 0 {
            return;
        }
        let severity = self.effective_severity(severity);
        if severity == Severity::Fatal {
            self.had_fatal = true;
        }
        self.queue.push(Diagnostic { severity, message: message.into(), location });
    }

    /// Reports a diagnostic immediately (Encode/include/file-open time).
    pub fn report(&mut self, severity: Severity, message: impl Into<String>, location: Option<FileLine>) {
        if self.suppress_depth > 0 {
            return;
        }
        let severity = self.effective_severity(severity);
        if severity == Severity::Fatal {
            self.had_fatal = true;
        }
        let diag = Diagnostic { severity, message: message.into(), location };
        self.print(&diag);
        self.errors.push(diag);
    }

    pub fn error(&mut self, err: &Error, location: Option<FileLine>) {
        self.queue(Severity::Error, err.to_string(), location);
    }

    pub fn fatal(&mut self, message: impl Into<String>, location: Option<FileLine>) {
        self.report(Severity::Fatal, message, location);
    }

    /// Moves everything queued this pass into the permanent error list,
    /// printing as it goes. Called once per validation pass.
    pub fn flush_pass(&mut self) {
        let queued = std::mem::take(&mut self.queue);
        for diag in queued {
            self.print(&diag);
            self.errors.push(diag);
        }
    }

    fn print(&self, diag: &Diagnostic) {
        if self.silent {
            return;
        }
        let prefix = match diag.severity {
            Severity::Notice => "notice:".cyan().bold(),
            Severity::Warning => "warning:".yellow().bold(),
            Severity::Error => "error:".red().bold(),
            Severity::Fatal => "fatal error:".red().bold(),
        };
        match diag.location {
            Some(loc) => eprintln!("{} file{}({}): {}", prefix, loc.file_num, loc.line, diag.message),
            None => eprintln!("{} {}", prefix, diag.message),
        }
    }

    /// Whether the run failed: any queued/reported Error or Fatal, or an
    /// explicit fatal flag.
    pub fn has_errors(&self) -> bool {
        self.had_fatal
            || self.errors.iter().any(|d| d.severity >= Severity::Error)
            || self.queue.iter().any(|d| d.severity >= Severity::Error)
    }

    pub fn had_fatal(&self) -> bool {
        self.had_fatal
    }

    /// All diagnostics reported so far, in report order, formatted.
    pub fn formatted_errors(&self) -> Vec<String> {
        self.errors.iter().map(|d| d.to_string()).collect()
    }
}

/// RAII suppression scope returned by [`Logger::suppress`].
pub struct SuppressGuard<'a> {
    logger: &'a mut Logger,
}

impl std::ops::Deref for SuppressGuard<'_> {
    type Target = Logger;
    fn deref(&self) -> &Logger {
        self.logger
    }
}

impl std::ops::DerefMut for SuppressGuard<'_> {
    fn deref_mut(&mut self) -> &mut Logger {
        self.logger
    }
}

impl Drop for SuppressGuard<'_> {
    fn drop(&mut self) {
        self.logger.suppress_depth = self.logger.suppress_depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_errors_fail_the_run_after_flush() {
        let mut logger = Logger::default();
        logger.queue(Severity::Error, "bad thing", None);
        assert!(logger.has_errors());
        logger.flush_pass();
        assert_eq!(logger.formatted_errors().len(), 1);
    }

    #[test]
    fn error_on_warning_promotes_severity() {
        let mut logger = Logger::new(true, true);
        logger.queue(Severity::Warning, "suspect", None);
        assert!(logger.has_errors());
    }

    #[test]
    fn suppressed_diagnostics_are_dropped() {
        let mut logger = Logger::default();
        {
            let mut guard = logger.suppress();
            guard.queue(Severity::Error, "during dry run", None);
        }
        assert!(!logger.has_errors());
    }
}
