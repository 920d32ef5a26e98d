//! Compile diagnostics.
//!
//! Passes report into a shared [`DiagnosticBuffer`] instead of failing fast,
//! so one pipeline run surfaces every problem it can find. Fatal parse errors
//! short-circuit later passes for the affected module only.

use std::fmt;

use crate::loc::SourceSpan;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// The kinds of compile-time problems the pipeline can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    Syntax,
    UnresolvedName,
    UnresolvedImpl,
    DuplicateImpl,
    ModuleNotFound,
    AnnexConflict,
    TypeCheck,
    AmbiguousAbility,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::Syntax => "syntax error",
            DiagnosticKind::UnresolvedName => "unresolved name",
            DiagnosticKind::UnresolvedImpl => "unresolved impl",
            DiagnosticKind::DuplicateImpl => "duplicate impl",
            DiagnosticKind::ModuleNotFound => "module not found",
            DiagnosticKind::AnnexConflict => "annex conflict",
            DiagnosticKind::TypeCheck => "type check",
            DiagnosticKind::AmbiguousAbility => "ambiguous ability",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    pub span: Option<SourceSpan>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, message: impl Into<String>, span: Option<SourceSpan>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
            span,
        }
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>, span: Option<SourceSpan>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.span {
            Some(span) => write!(f, "{span}: {tag}[{}]: {}", self.kind, self.message),
            None => write!(f, "{tag}[{}]: {}", self.kind, self.message),
        }
    }
}

/// Accumulator shared by every pass of a program run.
#[derive(Debug, Default)]
pub struct DiagnosticBuffer {
    diags: Vec<Diagnostic>,
}

impl DiagnosticBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.diags.push(diag);
    }

    pub fn extend(&mut self, diags: impl IntoIterator<Item = Diagnostic>) {
        self.diags.extend(diags);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn len(&self) -> usize {
        self.diags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    /// Drain everything accumulated so far, for example when a module is
    /// recompiled during hot reload.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diags)
    }

    /// Diagnostics attributed to the given file.
    pub fn for_path<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Diagnostic> {
        self.diags
            .iter()
            .filter(move |d| d.span.as_ref().is_some_and(|s| &*s.path == path))
    }
}
