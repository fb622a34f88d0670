use std::sync::Arc;

use thiserror::Error;

use crate::error::{ErrorClass, ErrorCode};
use crate::frontend::token::Source;

/// One active call, as seen from the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// Name of the called function.
    pub name: Arc<str>,
    pub line: u32,
    pub file: Arc<str>,
}

/// A fault that halted a program. Carries the location of the faulting
/// instruction and the calls active at that point, latest first.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[{}] {}{} ({})", .code.id(), .code.message(), detail_suffix(.detail), .location)]
pub struct RuntimeError {
    pub code: ErrorCode,
    pub location: Source,
    pub detail: Option<String>,
    pub backtrace: Vec<TraceEntry>,
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_ref().map(|d| format!(": {}", d)).unwrap_or_default()
}

impl RuntimeError {
    pub fn new(code: ErrorCode, location: Source) -> Self {
        RuntimeError {
            code,
            location,
            detail: None,
            backtrace: Vec::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_backtrace(mut self, backtrace: Vec<TraceEntry>) -> Self {
        self.backtrace = backtrace;
        self
    }

    pub fn is_internal(&self) -> bool {
        self.code.class() == ErrorClass::Internal
    }

    /// Multi-line report shown to the program's owner.
    pub fn report(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.backtrace.len() + 3);
        match &self.detail {
            Some(detail) => lines.push(format!(
                "ERROR: {}: {} [{}]",
                self.code.message(),
                detail,
                self.code.id()
            )),
            None => lines.push(format!("ERROR: {} [{}]", self.code.message(), self.code.id())),
        }
        lines.push(format!("  at {}", self.location));
        if !self.backtrace.is_empty() {
            lines.push("Backtrace (latest call first):".to_string());
            for entry in &self.backtrace {
                lines.push(format!(
                    "  at '{}' (line {}, file '{}')",
                    entry.name, entry.line, entry.file
                ));
            }
        }
        lines
    }
}
