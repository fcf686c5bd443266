//! Caller-chosen policy for failures of input files, classes and methods.

use std::path::Path;
use std::sync::Mutex;

use tracing::{error, warn};

use crate::error::ConversionError;

/// Failure code of input files that could not be loaded.
pub const INPUT_ERROR: &str = "INPUT_ERROR";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerAction {
    Continue,
    Abort,
}

pub trait ErrorHandler: Send + Sync {
    /// An input file could not be read or decoded.
    fn handle_file_error(&self, path: &Path, error: &anyhow::Error) -> HandlerAction;

    /// Conversion of one method failed; `method` is `None` when the class as a whole failed.
    fn handle_method_error(
        &self,
        class: &str,
        method: Option<&str>,
        error: &ConversionError,
    ) -> HandlerAction;
}

/// Logs each failure and keeps going.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn handle_file_error(&self, path: &Path, error: &anyhow::Error) -> HandlerAction {
        warn!(path = %path.display(), "failed to load input: {error:#}");
        HandlerAction::Continue
    }

    fn handle_method_error(
        &self,
        class: &str,
        method: Option<&str>,
        error: &ConversionError,
    ) -> HandlerAction {
        let method = method.unwrap_or("<class>");
        if error.is_internal() {
            error!(class, method, code = error.code(), "converter bug: {error}");
        } else {
            warn!(class, method, code = error.code(), "conversion failed: {error}");
        }
        HandlerAction::Continue
    }
}

/// One recorded failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    /// Input path for file failures, class name otherwise.
    pub location: String,
    pub method: Option<String>,
    /// Stable identifier, see [`ConversionError::code`].
    pub code: String,
    pub message: String,
}

/// Records failures for the report, logs them, and continues.
#[derive(Debug, Default)]
pub struct CollectingErrorHandler {
    failures: Mutex<Vec<Failure>>,
}

impl CollectingErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures recorded so far, sorted by location and method.
    pub fn failures(&self) -> Vec<Failure> {
        let mut failures = match self.failures.lock() {
            Ok(failures) => failures.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        failures.sort_by(|left, right| {
            left.location
                .cmp(&right.location)
                .then(left.method.cmp(&right.method))
        });
        failures
    }

    fn record(&self, failure: Failure) {
        match self.failures.lock() {
            Ok(mut failures) => failures.push(failure),
            Err(poisoned) => poisoned.into_inner().push(failure),
        }
    }
}

impl ErrorHandler for CollectingErrorHandler {
    fn handle_file_error(&self, path: &Path, error: &anyhow::Error) -> HandlerAction {
        LoggingErrorHandler.handle_file_error(path, error);
        self.record(Failure {
            location: path.display().to_string(),
            method: None,
            code: INPUT_ERROR.to_string(),
            message: format!("{error:#}"),
        });
        HandlerAction::Continue
    }

    fn handle_method_error(
        &self,
        class: &str,
        method: Option<&str>,
        error: &ConversionError,
    ) -> HandlerAction {
        LoggingErrorHandler.handle_method_error(class, method, error);
        self.record(Failure {
            location: class.to_string(),
            method: method.map(str::to_string),
            code: error.code().to_string(),
            message: error.to_string(),
        });
        HandlerAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_handler_records_sorted_failures() {
        let handler = CollectingErrorHandler::new();
        let action = handler.handle_method_error(
            "b/B",
            Some("run"),
            &ConversionError::MethodTooLarge { size: 70_000 },
        );
        assert_eq!(action, HandlerAction::Continue);
        handler.handle_file_error(Path::new("a.json"), &anyhow::anyhow!("bad json"));

        let failures = handler.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].location, "a.json");
        assert_eq!(failures[0].code, INPUT_ERROR);
        assert_eq!(failures[1].method.as_deref(), Some("run"));
        assert_eq!(failures[1].code, "METHOD_TOO_LARGE");
    }
}
