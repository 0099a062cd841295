//! tsc Session - drives `tsc --watch` as a child process
//!
//! Output is read line by line (`--pretty false`):
//! - `src/a.ts(3,7): error TS2322: Type 'string' is ...` is a diagnostic,
//!   indented lines below it continue its message
//! - `error TS6053: File 'x' not found.` is a diagnostic on the tsconfig
//! - `12:00:01 AM - Found 1 error. Watching for file changes.` is a phase
//!   message
//! - absolute paths are `--listFiles` output and make up the watched-file
//!   count of a pass

use crate::session::{CompilerSession, EventSender, PhaseSignal, SessionEvent, SessionFactory};
use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tscd_core::{normalize_path, Diagnostic, DiagnosticCategory, ProjectConfig};

static DIAGNOSTIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?P<file>.+?)\((?P<line>\d+),(?P<col>\d+)\): ",
        r"(?P<cat>error|warning|suggestion|message) TS(?P<code>\d+): (?P<msg>.*)$",
    ))
    .expect("diagnostic regex")
});

static GLOBAL_DIAGNOSTIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<cat>error|warning|suggestion|message) TS(?P<code>\d+): (?P<msg>.*)$")
        .expect("global diagnostic regex")
});

static PHASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[?\d{1,2}:\d{2}:\d{2}(?:\s?[AaPp][Mm])?\]?\s+-\s+(?P<msg>.+)$")
        .expect("phase regex")
});

/// One meaningful piece of tsc output
#[derive(Debug, Clone, PartialEq)]
pub enum TscOutput {
    Diagnostic(Diagnostic),
    Phase(String),
    ListedFile(PathBuf),
}

/// Line parser. Holds the latest diagnostic until its continuation lines
/// have been read.
pub struct TscOutputParser {
    project_root: PathBuf,
    config_path: PathBuf,
    pending: Option<Diagnostic>,
}

impl TscOutputParser {
    pub fn new(project: &ProjectConfig) -> Self {
        Self {
            project_root: project.root.clone(),
            config_path: project.config_path.clone(),
            pending: None,
        }
    }

    pub fn feed(&mut self, line: &str) -> Vec<TscOutput> {
        let line = line.trim_end();

        if line.starts_with(char::is_whitespace) && !line.trim().is_empty() {
            if let Some(pending) = self.pending.as_mut() {
                pending.message.push('\n');
                pending.message.push_str(line.trim());
                return Vec::new();
            }
        }

        let mut out: Vec<TscOutput> = self.finish().into_iter().collect();

        if let Some(caps) = DIAGNOSTIC_RE.captures(line) {
            self.pending = Some(Diagnostic::new(
                normalize_path(Path::new(&caps["file"]), &self.project_root),
                caps["line"].parse().unwrap_or(1),
                caps["col"].parse().unwrap_or(1),
                DiagnosticCategory::from_label(&caps["cat"]),
                caps["code"].parse().unwrap_or(0),
                &caps["msg"],
            ));
        } else if let Some(caps) = GLOBAL_DIAGNOSTIC_RE.captures(line) {
            self.pending = Some(Diagnostic::new(
                self.config_path.clone(),
                1,
                1,
                DiagnosticCategory::from_label(&caps["cat"]),
                caps["code"].parse().unwrap_or(0),
                &caps["msg"],
            ));
        } else if let Some(caps) = PHASE_RE.captures(line) {
            out.push(TscOutput::Phase(caps["msg"].trim().to_string()));
        } else if !line.is_empty() && Path::new(line).is_absolute() {
            out.push(TscOutput::ListedFile(PathBuf::from(line)));
        }

        out
    }

    /// Flush the diagnostic still waiting for continuation lines
    pub fn finish(&mut self) -> Option<TscOutput> {
        self.pending.take().map(TscOutput::Diagnostic)
    }
}

/// Running `tsc --watch` for one project
pub struct TscSession {
    project_id: String,
    child: Child,
    reader: JoinHandle<()>,
    watched: Arc<AtomicUsize>,
}

impl CompilerSession for TscSession {
    fn watched_files(&self) -> usize {
        self.watched.load(Ordering::Relaxed)
    }

    fn close(&mut self) -> Result<()> {
        self.reader.abort();
        match self.child.start_kill() {
            Ok(()) => {
                debug!("Killed tsc for {}", self.project_id);
                Ok(())
            }
            // Already exited
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to kill tsc for {}", self.project_id)),
        }
    }
}

/// Spawns one `tsc --watch` per project. Must be used inside a tokio runtime.
pub struct TscSessionFactory {
    workspace_root: PathBuf,
}

impl TscSessionFactory {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            workspace_root: workspace_root.as_ref().to_path_buf(),
        }
    }

    /// Nearest `node_modules/.bin/tsc` between the project and the
    /// workspace root, else `tsc` from PATH
    pub fn resolve_tsc(&self, project_root: &Path) -> PathBuf {
        let bin = if cfg!(target_os = "windows") { "tsc.cmd" } else { "tsc" };

        for dir in project_root.ancestors() {
            let candidate = dir.join("node_modules").join(".bin").join(bin);
            if candidate.is_file() {
                return candidate;
            }
            if dir == self.workspace_root {
                break;
            }
        }

        PathBuf::from(bin)
    }
}

impl SessionFactory for TscSessionFactory {
    fn open(
        &mut self,
        project: &ProjectConfig,
        events: EventSender,
    ) -> Result<Box<dyn CompilerSession>> {
        let tsc = self.resolve_tsc(&project.root);

        let mut child = Command::new(&tsc)
            .arg("--watch")
            .arg("--preserveWatchOutput")
            .arg("--pretty")
            .arg("false")
            .arg("--listFiles")
            .arg("-p")
            .arg(&project.config_path)
            .current_dir(&project.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", tsc.display()))?;

        let stdout = child.stdout.take().context("tsc stdout was not captured")?;
        let watched = Arc::new(AtomicUsize::new(0));
        let reader = tokio::spawn(read_output(
            project.clone(),
            stdout,
            events,
            Arc::clone(&watched),
        ));

        info!("Started {} for {}", tsc.display(), project.name);
        Ok(Box::new(TscSession {
            project_id: project.id.clone(),
            child,
            reader,
            watched,
        }))
    }
}

async fn read_output(
    project: ProjectConfig,
    stdout: ChildStdout,
    events: EventSender,
    watched: Arc<AtomicUsize>,
) {
    let mut parser = TscOutputParser::new(&project);
    let mut lines = BufReader::new(stdout).lines();
    let mut listed = 0usize;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read tsc output for {}: {}", project.name, e);
                break;
            }
        };

        for output in parser.feed(&line) {
            let event = match output {
                TscOutput::Diagnostic(diagnostic) => SessionEvent::Diagnostic {
                    project_id: project.id.clone(),
                    diagnostic,
                },
                TscOutput::Phase(message) => {
                    match PhaseSignal::classify(&message) {
                        PhaseSignal::PassStarted => listed = 0,
                        PhaseSignal::PassCompleted if listed > 0 => {
                            watched.store(listed, Ordering::Relaxed)
                        }
                        _ => {}
                    }
                    SessionEvent::PhaseChange {
                        project_id: project.id.clone(),
                        message,
                    }
                }
                TscOutput::ListedFile(_) => {
                    listed += 1;
                    continue;
                }
            };

            if events.send(event).is_err() {
                debug!("Orchestrator gone, stopping tsc reader for {}", project.name);
                return;
            }
        }
    }

    if let Some(TscOutput::Diagnostic(diagnostic)) = parser.finish() {
        let _ = events.send(SessionEvent::Diagnostic {
            project_id: project.id.clone(),
            diagnostic,
        });
    }
    warn!("tsc exited for {}", project.name);
    let _ = events.send(SessionEvent::Exited {
        project_id: project.id,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{collect_until_exit, fake_tsc};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn project() -> ProjectConfig {
        ProjectConfig {
            id: "packages/web".into(),
            name: "web".into(),
            root: PathBuf::from("/repo/packages/web"),
            config_path: PathBuf::from("/repo/packages/web/tsconfig.json"),
        }
    }

    fn feed_all(parser: &mut TscOutputParser, lines: &[&str]) -> Vec<TscOutput> {
        let mut out: Vec<TscOutput> = lines.iter().flat_map(|l| parser.feed(l)).collect();
        out.extend(parser.finish());
        out
    }

    #[test]
    fn test_parses_a_watch_pass() {
        let mut parser = TscOutputParser::new(&project());
        let out = feed_all(
            &mut parser,
            &[
                "12:00:00 AM - Starting compilation in watch mode...",
                "",
                "src/index.ts(3,7): error TS2322: Type 'string' is not assignable to 'number'.",
                "/repo/packages/web/src/index.ts",
                "12:00:01 AM - Found 1 error. Watching for file changes.",
            ],
        );

        assert_eq!(out.len(), 4);
        assert_eq!(
            out[0],
            TscOutput::Phase("Starting compilation in watch mode...".into())
        );
        match &out[1] {
            TscOutput::Diagnostic(d) => {
                assert_eq!(d.file, PathBuf::from("/repo/packages/web/src/index.ts"));
                assert_eq!((d.line, d.column, d.code), (3, 7, 2322));
                assert_eq!(d.category, DiagnosticCategory::Error);
            }
            other => panic!("expected diagnostic, got {other:?}"),
        }
        assert_eq!(
            out[2],
            TscOutput::ListedFile(PathBuf::from("/repo/packages/web/src/index.ts"))
        );
        assert_eq!(
            out[3],
            TscOutput::Phase("Found 1 error. Watching for file changes.".into())
        );
    }

    #[test]
    fn test_continuation_lines_join_the_message() {
        let mut parser = TscOutputParser::new(&project());
        let out = feed_all(
            &mut parser,
            &[
                "src/a.ts(1,1): error TS2345: Argument of type 'A' is not assignable.",
                "  Property 'x' is missing in type 'A'.",
                "src/b.ts(2,4): warning TS6133: 'y' is declared but never used.",
            ],
        );

        assert_eq!(out.len(), 2);
        let TscOutput::Diagnostic(first) = &out[0] else {
            panic!("expected diagnostic");
        };
        assert_eq!(
            first.message,
            "Argument of type 'A' is not assignable.\nProperty 'x' is missing in type 'A'."
        );
        let TscOutput::Diagnostic(second) = &out[1] else {
            panic!("expected diagnostic");
        };
        assert_eq!(second.category, DiagnosticCategory::Warning);
    }

    #[test]
    fn test_global_errors_land_on_the_config() {
        let mut parser = TscOutputParser::new(&project());
        let out = feed_all(&mut parser, &["error TS6053: File 'missing.ts' not found."]);

        let TscOutput::Diagnostic(d) = &out[0] else {
            panic!("expected diagnostic");
        };
        assert_eq!(d.file, PathBuf::from("/repo/packages/web/tsconfig.json"));
        assert_eq!(d.code, 6053);
    }

    #[test]
    fn test_bracketed_timestamps() {
        let mut parser = TscOutputParser::new(&project());
        let out = feed_all(
            &mut parser,
            &["[14:02:11] - Found 0 errors. Watching for file changes."],
        );
        assert_eq!(
            out,
            vec![TscOutput::Phase("Found 0 errors. Watching for file changes.".into())]
        );
    }

    #[test]
    fn test_resolve_tsc_prefers_local_install() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let bin = if cfg!(target_os = "windows") { "tsc.cmd" } else { "tsc" };
        let local = root.join("node_modules").join(".bin").join(bin);
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(&local, "").unwrap();
        std::fs::create_dir_all(root.join("packages/web")).unwrap();

        let factory = TscSessionFactory::new(root);
        assert_eq!(factory.resolve_tsc(&root.join("packages/web")), local);
    }

    #[test]
    fn test_resolve_tsc_falls_back_to_path() {
        let dir = TempDir::new().unwrap();
        let factory = TscSessionFactory::new(dir.path());
        let resolved = factory.resolve_tsc(dir.path());
        assert!(resolved.is_relative());
    }

    fn project_at(root: &Path) -> ProjectConfig {
        ProjectConfig {
            id: ".".into(),
            name: "app".into(),
            root: root.to_path_buf(),
            config_path: root.join("tsconfig.json"),
        }
    }

    const ONE_PASS: &str = "\
echo '12:00:00 AM - Starting compilation in watch mode...'
echo 'src/a.ts(1,5): error TS2322: Type string is not assignable to type number.'
echo '/work/src/a.ts'
echo '/work/src/b.ts'
echo '12:00:01 AM - Found 1 error. Watching for file changes.'
echo 'src/b.ts(2,1): warning TS6133: x is declared but its value is never read.'
";

    #[cfg(unix)]
    #[tokio::test]
    async fn test_session_forwards_a_watch_pass() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fake_tsc(root, &format!("{ONE_PASS}exit 1\n"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut factory = TscSessionFactory::new(root);
        let mut session = factory.open(&project_at(root), tx).unwrap();

        let events = collect_until_exit(&mut rx).await;
        let kinds: Vec<String> = events
            .iter()
            .map(|event| match event {
                SessionEvent::Diagnostic { diagnostic, .. } => {
                    format!("{} TS{}", diagnostic.category.as_str(), diagnostic.code)
                }
                SessionEvent::PhaseChange { message, .. } => message.clone(),
                SessionEvent::Exited { .. } => "exited".to_string(),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "Starting compilation in watch mode...",
                "error TS2322",
                "Found 1 error. Watching for file changes.",
                "warning TS6133",
                "exited",
            ]
        );
        assert!(events.iter().all(|event| event.project_id() == "."));

        let SessionEvent::Diagnostic { diagnostic, .. } = &events[1] else {
            panic!("expected diagnostic");
        };
        assert_eq!(diagnostic.file, root.join("src/a.ts"));
        assert_eq!((diagnostic.line, diagnostic.column), (1, 5));

        // Two --listFiles lines in the completed pass
        assert_eq!(session.watched_files(), 2);
        session.close().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_kills_a_running_session() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fake_tsc(root, &format!("{ONE_PASS}exec sleep 30\n"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut factory = TscSessionFactory::new(root);
        let mut session = factory.open(&project_at(root), tx).unwrap();

        // Wait for the pass to complete
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let completed = matches!(
                &event,
                SessionEvent::PhaseChange { message, .. } if message.starts_with("Found")
            );
            if completed {
                break;
            }
        }
        assert_eq!(session.watched_files(), 2);

        session.close().unwrap();
        session.close().unwrap();

        // The reader is gone, so the channel closes without an Exited event
        let rest: Vec<SessionEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(rest.iter().all(|e| !matches!(e, SessionEvent::Exited { .. })));
        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }
}
