//! Compiler session contract
//!
//! A session watches one project and reports back through an unbounded
//! channel. Events from one session arrive in the order it sent them; there
//! is no ordering across sessions and nothing survives a restart.

use anyhow::Result;
use tokio::sync::mpsc;
use tscd_core::{Diagnostic, ProjectConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Diagnostic {
        project_id: String,
        diagnostic: Diagnostic,
    },
    PhaseChange {
        project_id: String,
        message: String,
    },
    /// The session died on its own. Nothing more will arrive from it.
    Exited {
        project_id: String,
    },
}

impl SessionEvent {
    pub fn project_id(&self) -> &str {
        match self {
            Self::Diagnostic { project_id, .. }
            | Self::PhaseChange { project_id, .. }
            | Self::Exited { project_id } => project_id,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// A running incremental build for one project
pub trait CompilerSession: Send {
    /// Source files in the most recent pass
    fn watched_files(&self) -> usize;

    /// Shut the session down. Must be safe to call on a dead session.
    fn close(&mut self) -> Result<()>;
}

/// Opens sessions for the orchestrator
pub trait SessionFactory: Send {
    fn open(&mut self, project: &ProjectConfig, events: EventSender)
        -> Result<Box<dyn CompilerSession>>;
}

/// What a phase message means for the pass lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSignal {
    PassStarted,
    PassCompleted,
    Other,
}

impl PhaseSignal {
    /// Recognize tsc watch-mode status messages.
    ///
    /// "Found 2 errors. Watching for file changes." completes a pass,
    /// "Starting compilation in watch mode..." and
    /// "File change detected. Starting incremental compilation..." start one.
    pub fn classify(message: &str) -> Self {
        let message = message.to_ascii_lowercase();

        if message.contains("watching for file changes")
            || (message.starts_with("found ") && message.contains(" error"))
        {
            Self::PassCompleted
        } else if message.contains("starting compilation")
            || message.contains("starting incremental compilation")
            || message.contains("file change detected")
        {
            Self::PassStarted
        } else {
            Self::Other
        }
    }
}
