//! Daemon Server - Unix Socket IPC
//!
//! One JSON request per line in, one JSON response per line out. The same
//! loop drains compiler-session events, so queries always see the state left
//! by every event received before them. Request lines are read by a task per
//! connection; a slow client never holds up the loop.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tscd_core::{CacheStats, DiagnosticCount, DiagnosticsResult};

use crate::orchestrator::{WatchOrchestrator, WatchStatus};
use crate::session::EventReceiver;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A parsed request line (or the parse error) and where to answer it
type Incoming = (std::result::Result<DaemonRequest, String>, OwnedWriteHalf);

/// Request from CLI to daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DaemonRequest {
    /// Every diagnostic in the workspace
    AllDiagnostics,
    /// Cache-warm diagnostics for one file
    FileDiagnostics { path: String },
    /// Diagnostics for one project by package name
    PackageDiagnostics { name: String },
    /// Any error at all, or in one file
    HasErrors { path: Option<String> },
    Count,
    ClearFile { path: String },
    ClearAll,
    Status,
    CacheStats,
    Shutdown,
}

/// Response from daemon to CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DaemonResponse {
    Diagnostics(DiagnosticsResult),
    /// `None` when the package is unknown
    Package(Option<DiagnosticsResult>),
    HasErrors(bool),
    Count(DiagnosticCount),
    Cleared(bool),
    Status(WatchStatus),
    CacheStats(CacheStats),
    Ok,
    Error(String),
}

/// Daemon server
pub struct DaemonServer {
    socket_path: PathBuf,
    orchestrator: WatchOrchestrator,
    events: EventReceiver,
}

impl DaemonServer {
    /// Socket location for a workspace root
    pub fn socket_path_for(root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(".tscd").join("daemon.sock")
    }

    pub fn new(orchestrator: WatchOrchestrator, events: EventReceiver) -> Result<Self> {
        let socket_path = Self::socket_path_for(&orchestrator.workspace().root);

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Remove stale socket from a previous run
        let _ = std::fs::remove_file(&socket_path);

        Ok(Self {
            socket_path,
            orchestrator,
            events,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Start watching and serve until Shutdown or Ctrl-C
    pub async fn run(&mut self) -> Result<()> {
        self.orchestrator.start();

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("Daemon listening on: {:?}", self.socket_path);

        let (incoming_tx, mut incoming) = mpsc::unbounded_channel::<Incoming>();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                Some(event) = self.events.recv() => {
                    self.orchestrator.handle_event(event);
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            tokio::spawn(read_request(stream, incoming_tx.clone()));
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }

                Some((request, writer)) = incoming.recv() => {
                    match self.respond(request, writer).await {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(e) => error!("Connection error: {}", e),
                    }
                }

                _ = &mut ctrl_c => {
                    info!("Interrupted");
                    break;
                }
            }
        }

        self.orchestrator.stop();
        let _ = std::fs::remove_file(&self.socket_path);
        info!("Daemon stopped");
        Ok(())
    }

    /// Answer one request. The flag is true when the daemon should exit.
    pub fn handle_request(&mut self, request: DaemonRequest) -> (DaemonResponse, bool) {
        let orch = &mut self.orchestrator;

        let response = match request {
            DaemonRequest::AllDiagnostics => {
                DaemonResponse::Diagnostics(orch.get_all_diagnostics())
            }
            DaemonRequest::FileDiagnostics { path } => {
                DaemonResponse::Diagnostics(orch.get_file_diagnostics(Path::new(&path)))
            }
            DaemonRequest::PackageDiagnostics { name } => {
                DaemonResponse::Package(orch.get_package_diagnostics(&name))
            }
            DaemonRequest::HasErrors { path } => {
                DaemonResponse::HasErrors(orch.has_errors(path.as_deref().map(Path::new)))
            }
            DaemonRequest::Count => DaemonResponse::Count(orch.get_diagnostic_count()),
            DaemonRequest::ClearFile { path } => {
                DaemonResponse::Cleared(orch.clear_file_diagnostics(Path::new(&path)))
            }
            DaemonRequest::ClearAll => {
                orch.clear_all_diagnostics();
                DaemonResponse::Cleared(true)
            }
            DaemonRequest::Status => DaemonResponse::Status(orch.status()),
            DaemonRequest::CacheStats => DaemonResponse::CacheStats(orch.cache_stats()),
            DaemonRequest::Shutdown => {
                info!("Shutdown requested");
                return (DaemonResponse::Ok, true);
            }
        };

        (response, false)
    }

    /// Answer one parsed request; returns true on shutdown
    async fn respond(
        &mut self,
        request: std::result::Result<DaemonRequest, String>,
        mut writer: OwnedWriteHalf,
    ) -> Result<bool> {
        let (response, shutdown) = match request {
            Ok(request) => {
                debug!("Request: {:?}", request);
                self.handle_request(request)
            }
            Err(e) => (DaemonResponse::Error(format!("invalid request: {}", e)), false),
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        tokio::time::timeout(RESPONSE_TIMEOUT, writer.write_all(response_json.as_bytes()))
            .await??;

        Ok(shutdown)
    }
}

/// Read one request line off the loop and hand it back with the write half
async fn read_request(stream: UnixStream, incoming: mpsc::UnboundedSender<Incoming>) {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    match tokio::time::timeout(REQUEST_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            debug!("Failed to read request: {}", e);
            return;
        }
        Err(_) => {
            debug!("Client sent no request within {:?}", REQUEST_TIMEOUT);
            return;
        }
    }

    let request = serde_json::from_str::<DaemonRequest>(&line).map_err(|e| e.to_string());
    // The loop only goes away on shutdown
    let _ = incoming.send((request, writer));
}

/// Send one request to a running daemon
pub async fn send_request(socket_path: &Path, request: &DaemonRequest) -> Result<DaemonResponse> {
    let mut stream = UnixStream::connect(socket_path).await?;

    let request_json = serde_json::to_string(request)?;
    stream.write_all(request_json.as_bytes()).await?;
    stream.write_all(b"\n").await?;

    let (reader, _) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;

    let response: DaemonResponse = serde_json::from_str(&response_line)?;
    Ok(response)
}
