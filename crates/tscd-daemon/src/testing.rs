//! Scripted compiler sessions for tests

use crate::session::{CompilerSession, EventReceiver, EventSender, SessionEvent, SessionFactory};
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tscd_core::{Diagnostic, DiagnosticCategory, ProjectConfig, Workspace, WorkspaceResolver};

#[derive(Clone, Default)]
pub struct FakeFactory {
    pub opened: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<AtomicUsize>,
    failing: HashSet<String>,
    files_per_session: usize,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            files_per_session: 10,
            ..Self::default()
        }
    }

    /// Opening a project with this name fails
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    files: usize,
    closed: Arc<AtomicUsize>,
}

impl CompilerSession for FakeSession {
    fn watched_files(&self) -> usize {
        self.files
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl SessionFactory for FakeFactory {
    fn open(
        &mut self,
        project: &ProjectConfig,
        _events: EventSender,
    ) -> Result<Box<dyn CompilerSession>> {
        if self.failing.contains(&project.name) {
            return Err(anyhow!("tsc exited immediately"));
        }
        self.opened.lock().unwrap().push(project.name.clone());
        Ok(Box::new(FakeSession {
            files: self.files_per_session,
            closed: Arc::clone(&self.closed),
        }))
    }
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Single project named "app" with a tsconfig
pub fn single_app(root: &Path) -> Workspace {
    write(root, "package.json", r#"{ "name": "app" }"#);
    write(root, "tsconfig.json", "{}");
    WorkspaceResolver::new(root).detect()
}

/// npm workspace with one package per name, each with a tsconfig
pub fn monorepo(root: &Path, packages: &[&str]) -> Workspace {
    write(root, "package.json", r#"{ "workspaces": ["packages/*"] }"#);
    for name in packages {
        write(
            root,
            &format!("packages/{name}/package.json"),
            &format!(r#"{{ "name": "{name}" }}"#),
        );
        write(root, &format!("packages/{name}/tsconfig.json"), "{}");
    }
    WorkspaceResolver::new(root).detect()
}

pub fn error(file: &str, code: u32) -> Diagnostic {
    Diagnostic::new(file, 1, 1, DiagnosticCategory::Error, code, format!("error TS{code}"))
}

pub fn warning(file: &str, code: u32) -> Diagnostic {
    Diagnostic::new(file, 1, 1, DiagnosticCategory::Warning, code, format!("warning TS{code}"))
}

pub const PASS_DONE_ERRORS: &str = "Found 1 error. Watching for file changes.";
pub const PASS_DONE_CLEAN: &str = "Found 0 errors. Watching for file changes.";
pub const PASS_START: &str = "File change detected. Starting incremental compilation...";

/// Install an executable `node_modules/.bin/tsc` shell script under `root`
#[cfg(unix)]
pub fn fake_tsc(root: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    let path = root.join("node_modules/.bin/tsc");
    write(root, "node_modules/.bin/tsc", &format!("#!/bin/sh\n{body}"));
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Receive events until a session reports `Exited` (included) or 10s pass
pub async fn collect_until_exit(events: &mut EventReceiver) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(10), events.recv()).await
    {
        let exited = matches!(event, SessionEvent::Exited { .. });
        out.push(event);
        if exited {
            break;
        }
    }
    out
}
