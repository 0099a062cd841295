//! tscd Daemon - Shared incremental type-checking
//!
//! Keeps one `tsc --watch` running per project and answers "are there
//! errors" from memory.
//!
//! Features:
//! - Per-file diagnostic buckets, replaced on every pass
//! - LRU + TTL cache for cache-warm file queries
//! - Partial start: one broken project never blocks the rest
//! - Unix socket for CLI communication

pub mod orchestrator;
pub mod server;
pub mod session;
pub mod store;
pub mod tsc;

#[cfg(test)]
pub(crate) mod testing;

pub use orchestrator::{
    OrchestratorState, PassSummary, ProjectState, ProjectStatus, WatchOrchestrator, WatchStatus,
};
pub use server::{send_request, DaemonRequest, DaemonResponse, DaemonServer};
pub use session::{
    CompilerSession, EventReceiver, EventSender, PhaseSignal, SessionEvent, SessionFactory,
};
pub use store::DiagnosticStore;
pub use tsc::{TscOutputParser, TscSession, TscSessionFactory};
