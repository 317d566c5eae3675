//! Failure reporting
//!
//! A code unit that throws synchronously (or fails to compile) is reported
//! with a diagnostic line and, unless disabled, a 500 Result Envelope. The
//! engine then completes the invocation exactly like a successful run.

use rquickjs::convert::Coerced;
use rquickjs::{CaughtError, Ctx};
use std::fmt;
use std::io;
use terrable_core::{ErrorBody, ResultEnvelope};
use tracing::warn;

use crate::output::{Output, Stream};

/// Where a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The code unit is not valid JavaScript
    Compile,
    /// A thrown value during execution
    Runtime,
}

/// A failed compile-or-run step, detached from the JavaScript context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ExecutionFailure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: kind_for(&name),
            name,
            message: message.into(),
            stack: None,
        }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Convert a caught JavaScript error into an owned failure
    pub(crate) fn from_caught<'js>(error: CaughtError<'js>) -> Self {
        match error {
            CaughtError::Exception(exception) => {
                let name = exception
                    .as_object()
                    .get::<_, Option<String>>("name")
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "Error".to_string());
                let message = exception.message().unwrap_or_default();
                let failure = Self::new(name, message);

                match exception.stack().filter(|stack| !stack.trim().is_empty()) {
                    Some(stack) => failure.with_stack(stack),
                    None => failure,
                }
            }
            CaughtError::Value(value) => {
                let message = value
                    .get::<Coerced<String>>()
                    .map(|coerced| coerced.0)
                    .unwrap_or_else(|_| "non-error value thrown".to_string());
                Self::new("Error", message)
            }
            CaughtError::Error(error) => Self::new("InternalError", error.to_string()),
        }
    }

    /// Convert a thrown exception pending in `ctx`
    pub(crate) fn from_pending(ctx: &Ctx<'_>, error: rquickjs::Error) -> Self {
        if error.is_exception() {
            Self::from_caught(CaughtError::from_error(ctx, error))
        } else {
            Self::new("InternalError", error.to_string())
        }
    }

    pub fn error_body(&self) -> ErrorBody {
        ErrorBody::new(&self.name, &self.message, self.stack.clone())
    }

    /// Human-readable diagnostic printed on the control channel
    pub fn diagnostic(&self) -> String {
        match &self.stack {
            Some(stack) => format!(
                "Error executing code unit: {self}\n{}",
                stack.trim_end()
            ),
            None => format!("Error executing code unit: {self}"),
        }
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

fn kind_for(name: &str) -> FailureKind {
    if name == "SyntaxError" {
        FailureKind::Compile
    } else {
        FailureKind::Runtime
    }
}

/// Writes failure diagnostics and envelopes
#[derive(Debug, Clone)]
pub struct FailureReporter {
    output: Output,
    envelope: bool,
}

impl FailureReporter {
    pub fn new(output: Output, envelope: bool) -> Self {
        Self { output, envelope }
    }

    /// Report a failure of an invocation that has not completed yet
    pub fn report(&self, failure: &ExecutionFailure) -> io::Result<()> {
        warn!(
            kind = ?failure.kind,
            error_type = %failure.name,
            error_message = %failure.message,
            "Code unit failed"
        );

        self.output.line(Stream::Control, &failure.diagnostic())?;

        if self.envelope {
            let envelope = ResultEnvelope::internal_error(&failure.error_body());
            self.output.line(Stream::Control, &envelope.to_marked_line())?;
        }

        Ok(())
    }

    /// Report a failure raised after the completion trigger already fired.
    ///
    /// Only the diagnostic is printed; the invocation's outcome is settled.
    pub fn report_late(&self, failure: &ExecutionFailure) -> io::Result<()> {
        warn!(
            error_type = %failure.name,
            error_message = %failure.message,
            "Code unit failed after completion"
        );
        self.output.line(Stream::Control, &failure.diagnostic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::SharedBuffer;
    use terrable_core::extract_result;

    fn reporter(envelope: bool) -> (FailureReporter, SharedBuffer) {
        let control = SharedBuffer::new();
        let output = Output::new(control.clone(), SharedBuffer::new());
        (FailureReporter::new(output, envelope), control)
    }

    #[test]
    fn test_kind_from_name() {
        assert_eq!(ExecutionFailure::new("SyntaxError", "x").kind, FailureKind::Compile);
        assert_eq!(ExecutionFailure::new("TypeError", "x").kind, FailureKind::Runtime);
    }

    #[test]
    fn test_diagnostic_format() {
        let failure = ExecutionFailure::new("Error", "boom").with_stack("    at <eval> (line 1)\n");
        assert_eq!(
            failure.diagnostic(),
            "Error executing code unit: Error: boom\n    at <eval> (line 1)"
        );

        let bare = ExecutionFailure::new("Error", "");
        assert_eq!(bare.diagnostic(), "Error executing code unit: Error");
    }

    #[test]
    fn test_report_with_envelope() {
        let (reporter, control) = reporter(true);
        reporter
            .report(&ExecutionFailure::new("Error", "boom"))
            .unwrap();

        let output = control.contents();
        assert!(output.starts_with("Error executing code unit: Error: boom\n"));

        let envelope = extract_result(&output).unwrap();
        assert_eq!(envelope.status_code, 500);
        let body = envelope.error_body().unwrap();
        assert_eq!(body.error_message, "boom");
        assert_eq!(body.error_type, "Error");
    }

    #[test]
    fn test_report_without_envelope() {
        let (reporter, control) = reporter(false);
        reporter
            .report(&ExecutionFailure::new("Error", "boom"))
            .unwrap();

        assert!(!control.contents().contains("TERRABLE_RESULT_START"));
    }

    #[test]
    fn test_report_late_prints_diagnostic_only() {
        let (reporter, control) = reporter(true);
        reporter
            .report_late(&ExecutionFailure::new("Error", "late"))
            .unwrap();

        assert_eq!(control.contents(), "Error executing code unit: Error: late\n");
    }
}
