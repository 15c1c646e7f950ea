//! Diagnostics shared by every compiler and engine phase.
//!
//! A [`Diagnostic`] carries a severity, a category (which phase produced it), a
//! message and an optional source location. Its [`Diagnostic::full_description`]
//! is the golden-file form `line:col: error: message`.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// A position in a source fragment. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    pub file: Option<Arc<str>>,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self {
            file: None,
            line,
            column,
        }
    }

    /// Attach a file name to this location.
    pub fn in_file(mut self, file: Option<Arc<str>>) -> Self {
        self.file = file;
        self
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{file}:{}:{}", self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Which phase or contract produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    /// Grammar violation while parsing.
    Syntax,
    /// Name resolution or type checking failure.
    Semantic,
    /// Failure while binding a program to build settings.
    Build,
    /// Failure while resolving the executable graph.
    Link,
    /// A feature the selected backend does not implement.
    Unsupported,
    /// Unrecoverable fault inside the performer.
    Runtime,
    /// Caller misuse of the API.
    Precondition,
    /// Lookup of an endpoint or external by a name that does not exist.
    NotFound,
    /// A value whose shape does not match a declared type.
    Type,
}

/// A single error or warning.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category,
            message: message.into(),
            location: None,
        }
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(category, message)
        }
    }

    pub fn syntax(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::error(Category::Syntax, message).at(location)
    }

    pub fn semantic(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::error(Category::Semantic, message).at(location)
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::error(Category::Build, message)
    }

    pub fn link(message: impl Into<String>) -> Self {
        Self::error(Category::Link, message)
    }

    /// A link failure for a feature the backend does not implement.
    pub fn unsupported(feature: &str) -> Self {
        Self::error(
            Category::Unsupported,
            format!("Language feature not yet implemented: {feature}!"),
        )
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::error(Category::Runtime, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::error(Category::Precondition, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::error(Category::NotFound, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::error(Category::Type, message)
    }

    /// Attach a source location.
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }

    /// True when the failure means "not available on this backend" rather than "broken".
    pub fn is_unsupported(&self) -> bool {
        self.category == Category::Unsupported
    }

    /// `line:col: severity: message`, or `severity: message` without a location.
    pub fn full_description(&self) -> String {
        match &self.location {
            Some(location) => format!("{location}: {}: {}", self.severity, self.message),
            None => format!("{}: {}", self.severity, self.message),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_description())
    }
}

impl std::error::Error for Diagnostic {}

/// An ordered sequence of diagnostics from one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosticList(Vec<Diagnostic>);

impl DiagnosticList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<&Diagnostic> {
        self.0.first()
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn has_warnings(&self) -> bool {
        self.0.iter().any(Diagnostic::is_warning)
    }

    pub fn is_unsupported(&self) -> bool {
        self.0.iter().any(Diagnostic::is_unsupported)
    }

    /// All full descriptions joined with ` //// `.
    pub fn full_description(&self) -> String {
        self.0
            .iter()
            .map(Diagnostic::full_description)
            .collect::<Vec<_>>()
            .join(" //// ")
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }
}

impl From<Diagnostic> for DiagnosticList {
    fn from(diagnostic: Diagnostic) -> Self {
        Self(vec![diagnostic])
    }
}

impl From<Vec<Diagnostic>> for DiagnosticList {
    fn from(diagnostics: Vec<Diagnostic>) -> Self {
        Self(diagnostics)
    }
}

impl Extend<Diagnostic> for DiagnosticList {
    fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for DiagnosticList {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a DiagnosticList {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for DiagnosticList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_description())
    }
}

impl std::error::Error for DiagnosticList {}
