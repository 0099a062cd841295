//! tscd Core - data model and startup-time building blocks
//!
//! Features:
//! - Workspace detection (pnpm, npm/yarn workspaces, Rush, Lerna)
//! - Glob-based ignore filter with a fixed default deny-list
//! - Bounded, TTL'd LRU cache for per-file diagnostics
//! - Layered config (defaults, `.tscd.json`, environment)

pub mod cache;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod ignore_filter;
pub mod workspace;

pub use cache::{CacheStats, DiagnosticCache};
pub use config::WatchConfig;
pub use diagnostic::{
    normalize_path, now_millis, CategoryTotals, Diagnostic, DiagnosticCategory, DiagnosticCount,
    DiagnosticsResult,
};
pub use error::{Result, TscdError};
pub use ignore_filter::{should_ignore, IgnoreFilter};
pub use workspace::{
    detect, ProjectConfig, WatchMode, Workspace, WorkspaceKind, WorkspaceResolver,
    PROJECT_CONFIG_FILE,
};
