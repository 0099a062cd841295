//! Ignore Filter - glob deny-list for workspace paths
//!
//! Globs are translated to anchored regexes:
//! - `*` matches within one path segment
//! - `**` matches across segments (`**/` may match nothing, `/**` matches the
//!   directory itself and everything below it)
//! - `?` matches one non-separator character
//! - `{a,b}` alternation and `[abc]` / `[!abc]` classes
//!
//! The default deny-list is always active; user patterns extend it.

use crate::error::{Result, TscdError};
use crate::workspace::PROJECT_CONFIG_FILE;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Dependency dirs, build outputs, VCS metadata and caches
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "**/node_modules/**",
    "**/dist/**",
    "**/build/**",
    "**/out/**",
    "**/.git/**",
    "**/.hg/**",
    "**/.svn/**",
    "**/.next/**",
    "**/.turbo/**",
    "**/.cache/**",
    "**/coverage/**",
    "**/.tscd/**",
];

#[derive(Debug)]
struct CompiledPattern {
    source: String,
    regex: Regex,
}

/// Compiled deny-list bound to a workspace root
#[derive(Debug)]
pub struct IgnoreFilter {
    root: Option<PathBuf>,
    patterns: Vec<CompiledPattern>,
}

impl IgnoreFilter {
    /// Build a filter for `root` from the defaults plus `user_patterns`.
    ///
    /// Patterns that fail to compile are logged and skipped.
    pub fn new(root: impl AsRef<Path>, user_patterns: &[String]) -> Self {
        Self::build(Some(root.as_ref().to_path_buf()), user_patterns)
    }

    fn build(root: Option<PathBuf>, user_patterns: &[String]) -> Self {
        let sources = DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(user_patterns.iter().cloned());

        let mut patterns = Vec::new();
        for source in sources {
            match compile(&source) {
                Ok(regex) => patterns.push(CompiledPattern { source, regex }),
                Err(e) => warn!("Skipping ignore pattern: {}", e),
            }
        }

        Self { root, patterns }
    }

    /// Whether `path` is excluded from watching.
    ///
    /// A project config sitting directly at the workspace root is never
    /// ignored, whatever the user patterns say.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let relative = self.relative(path);

        if relative == PROJECT_CONFIG_FILE {
            return false;
        }

        self.patterns.iter().any(|p| p.regex.is_match(&relative))
    }

    /// Active pattern sources, defaults first
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.source.as_str())
    }

    /// `/`-separated path relative to the root when possible
    fn relative(&self, path: &Path) -> String {
        let stripped = self
            .root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);

        let mut out = String::new();
        for component in stripped.components() {
            match component {
                Component::Normal(name) => {
                    if !out.is_empty() && !out.ends_with('/') {
                        out.push('/');
                    }
                    out.push_str(&name.to_string_lossy());
                }
                Component::RootDir => out.push('/'),
                Component::Prefix(prefix) => out.push_str(&prefix.as_os_str().to_string_lossy()),
                Component::CurDir | Component::ParentDir => {}
            }
        }
        out
    }
}

/// One-shot check of a workspace-relative `path` against the defaults plus
/// `patterns`.
pub fn should_ignore(path: impl AsRef<Path>, patterns: &[String]) -> bool {
    IgnoreFilter::build(None, patterns).is_ignored(path.as_ref())
}

/// Compile one glob into an anchored matcher
fn compile(glob: &str) -> Result<Regex> {
    Regex::new(&glob_to_regex(glob)).map_err(|e| TscdError::Pattern {
        pattern: glob.to_string(),
        reason: e.to_string(),
    })
}

/// Translate a glob into an anchored regex source string.
pub fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    let mut brace_depth = 0usize;
    let mut i = 0;

    out.push('^');

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let segment_start = i == 0 || matches!(chars[i - 1], '/' | '{' | ',');
                if segment_start && chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '/' if is_trailing_globstar(&chars, i + 1, brace_depth) => {
                out.push_str("(?:/.*)?");
                i += 3;
                continue;
            }
            '{' => {
                brace_depth += 1;
                out.push_str("(?:");
            }
            '}' if brace_depth > 0 => {
                brace_depth -= 1;
                out.push(')');
            }
            ',' if brace_depth > 0 => out.push('|'),
            '[' => match translate_class(&chars, i) {
                Some((class, next)) => {
                    out.push_str(&class);
                    i = next;
                    continue;
                }
                None => out.push_str(r"\["),
            },
            '\\' if i + 1 < chars.len() => {
                out.push_str(&regex::escape(&chars[i + 1].to_string()));
                i += 2;
                continue;
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    // Unbalanced braces: close them so the regex still compiles
    for _ in 0..brace_depth {
        out.push(')');
    }

    out.push('$');
    out
}

/// `**` at `at` that ends the pattern (or the current alternative)
fn is_trailing_globstar(chars: &[char], at: usize, brace_depth: usize) -> bool {
    if chars.get(at) != Some(&'*') || chars.get(at + 1) != Some(&'*') {
        return false;
    }
    match chars.get(at + 2) {
        None => true,
        Some('}') | Some(',') => brace_depth > 0,
        _ => false,
    }
}

/// Bracket class starting at `start`; returns the regex class and the index
/// after the closing `]`.
fn translate_class(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start + 1;
    let mut class = String::from("[");

    if matches!(chars.get(i), Some('!') | Some('^')) {
        class.push('^');
        i += 1;
    }

    // A leading `]` is literal
    if chars.get(i) == Some(&']') {
        class.push_str(r"\]");
        i += 1;
    }

    while i < chars.len() {
        match chars[i] {
            ']' => {
                class.push(']');
                return Some((class, i + 1));
            }
            '\\' | '[' | '&' | '~' => {
                class.push('\\');
                class.push(chars[i]);
            }
            c => class.push(c),
        }
        i += 1;
    }

    None
}
