use std::path::PathBuf;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Warning,
    Error,
}

/// Classification for everything a build can report. Each stage maps its
/// failures onto exactly one of these; the controller never looks deeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    InvalidProject,
    Provision,
    ResourceCompile,
    ResourceLink,
    NoSourceFiles,
    KotlinCompile,
    JavaCompile,
    NoClassFiles,
    Conversion,
    Packaging,
    Signing,
    ProjectBusy,
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
}

impl Diagnostic {
    pub fn error<M: Into<String>>(kind: DiagnosticKind, message: M) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            file: None,
            line: None,
            column: None,
            message: message.into(),
        }
    }

    pub fn warning<M: Into<String>>(kind: DiagnosticKind, message: M) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, message)
        }
    }

    pub fn at(mut self, file: PathBuf, line: Option<u32>, column: Option<u32>) -> Self {
        self.file = Some(file);
        self.line = line;
        self.column = column;
        self
    }
}

/// Uniform per-stage result. A failed stage still returns this (with
/// `success = false`); `Err` is reserved for faults a stage could not
/// classify, which the controller converts at its boundary.
#[derive(Debug)]
pub struct StageResult {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub artifact: Option<PathBuf>,
}

impl StageResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            diagnostics: Vec::new(),
            artifact: None,
        }
    }

    pub fn ok_with_artifact(artifact: PathBuf) -> Self {
        Self {
            success: true,
            diagnostics: Vec::new(),
            artifact: Some(artifact),
        }
    }

    pub fn fail(diagnostic: Diagnostic) -> Self {
        Self {
            success: false,
            diagnostics: vec![diagnostic],
            artifact: None,
        }
    }

    pub fn fail_all(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            success: false,
            diagnostics,
            artifact: None,
        }
    }

    pub fn with_warning(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }
}

/// Terminal result of one build attempt, immutable once returned.
#[derive(Debug, Serialize)]
pub struct BuildOutcome {
    pub success: bool,
    pub artifact: Option<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
    pub elapsed_ms: u128,
}

impl BuildOutcome {
    pub fn failure(diagnostics: Vec<Diagnostic>, elapsed_ms: u128) -> Self {
        Self {
            success: false,
            artifact: None,
            diagnostics,
            elapsed_ms,
        }
    }
}
