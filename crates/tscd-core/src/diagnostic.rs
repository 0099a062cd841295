//! Diagnostic data model and query result shapes

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity of a diagnostic.
///
/// Serialized as a lowercase label. Deserialization also accepts the numeric
/// TypeScript category codes that compiler-API producers emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "CategoryRepr")]
pub enum DiagnosticCategory {
    Error,
    Warning,
    Suggestion,
    Message,
}

impl DiagnosticCategory {
    /// TypeScript numbering: 0 warning, 1 error, 2 suggestion, 3 message.
    /// Anything else counts as an error.
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => Self::Warning,
            1 => Self::Error,
            2 => Self::Suggestion,
            3 => Self::Message,
            _ => Self::Error,
        }
    }

    /// Parse the lowercase label printed by `tsc --pretty false`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "warning" => Self::Warning,
            "suggestion" => Self::Suggestion,
            "message" => Self::Message,
            _ => Self::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Suggestion => "suggestion",
            Self::Message => "message",
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CategoryRepr {
    Code(u64),
    Label(String),
}

impl From<CategoryRepr> for DiagnosticCategory {
    fn from(repr: CategoryRepr) -> Self {
        match repr {
            CategoryRepr::Code(code) => Self::from_code(code),
            CategoryRepr::Label(label) => Self::from_label(&label),
        }
    }
}

/// A single compiler diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub file: PathBuf,
    /// 1-based
    pub line: u32,
    /// 1-based
    pub column: u32,
    pub category: DiagnosticCategory,
    pub code: u32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
}

impl Diagnostic {
    pub fn new(
        file: impl Into<PathBuf>,
        line: u32,
        column: u32,
        category: DiagnosticCategory,
        code: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            category,
            code,
            message: message.into(),
            start: None,
            length: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.category == DiagnosticCategory::Error
    }
}

/// Errors, warnings and suggestions across the queried scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticCount {
    pub errors: usize,
    pub warnings: usize,
    pub suggestions: usize,
}

/// Per-category tally, including messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryTotals {
    pub errors: usize,
    pub warnings: usize,
    pub suggestions: usize,
    pub messages: usize,
}

impl CategoryTotals {
    pub fn add(&mut self, category: DiagnosticCategory) {
        match category {
            DiagnosticCategory::Error => self.errors += 1,
            DiagnosticCategory::Warning => self.warnings += 1,
            DiagnosticCategory::Suggestion => self.suggestions += 1,
            DiagnosticCategory::Message => self.messages += 1,
        }
    }

    pub fn tally<'a>(diagnostics: impl IntoIterator<Item = &'a Diagnostic>) -> Self {
        let mut totals = Self::default();
        for diagnostic in diagnostics {
            totals.add(diagnostic.category);
        }
        totals
    }
}

impl From<CategoryTotals> for DiagnosticCount {
    fn from(totals: CategoryTotals) -> Self {
        Self {
            errors: totals.errors,
            warnings: totals.warnings,
            suggestions: totals.suggestions,
        }
    }
}

/// Result of a diagnostics query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsResult {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub total_errors: usize,
    pub total_warnings: usize,
    pub total_suggestions: usize,
    pub total_messages: usize,
    pub diagnostics: Vec<Diagnostic>,
    /// "all", a file path, or a package name
    pub source: String,
    pub cache_hit: bool,
}

impl DiagnosticsResult {
    pub fn new(source: impl Into<String>, diagnostics: Vec<Diagnostic>, cache_hit: bool) -> Self {
        let totals = CategoryTotals::tally(&diagnostics);
        Self {
            timestamp: now_millis(),
            total_errors: totals.errors,
            total_warnings: totals.warnings,
            total_suggestions: totals.suggestions,
            total_messages: totals.messages,
            diagnostics,
            source: source.into(),
            cache_hit,
        }
    }

    pub fn empty(source: impl Into<String>) -> Self {
        Self::new(source, Vec::new(), false)
    }

    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Lexically normalize a path, resolving relative paths against `base`.
///
/// Never touches the filesystem, so it is safe on the query path.
pub fn normalize_path(path: &Path, base: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
