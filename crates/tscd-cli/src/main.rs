//! tscd CLI - Shared TypeScript diagnostics daemon
//!
//! Commands:
//! - tscd start            - Run the daemon in the foreground
//! - tscd stop             - Stop a running daemon
//! - tscd status           - Watch status
//! - tscd check [file]     - Exit 1 if there are errors (workspace or one file)
//! - tscd errors           - Print every diagnostic
//! - tscd package <name>   - Diagnostics for one package
//! - tscd workspace        - Show detected projects (no daemon needed)

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tscd_core::{Diagnostic, DiagnosticsResult, WatchConfig, WorkspaceResolver};
use tscd_daemon::{
    send_request, DaemonRequest, DaemonResponse, DaemonServer, TscSessionFactory,
    WatchOrchestrator,
};

/// tscd - one incremental type-check per project, shared by every client
#[derive(Parser)]
#[command(name = "tscd", version, about = "Shared TypeScript diagnostics daemon")]
struct Cli {
    /// Workspace root (default: current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in the foreground
    Start,
    /// Stop the daemon
    Stop,
    /// Show watch status
    Status,
    /// Check for errors; exits with 1 when there are any
    Check {
        /// Only check this file (cache-warm lookup)
        file: Option<PathBuf>,
    },
    /// Print all diagnostics
    Errors,
    /// Print diagnostics for one package
    Package {
        /// Package name
        name: String,
    },
    /// Count errors, warnings and suggestions
    Count,
    /// Forget diagnostics for one file, or all of them
    Clear {
        file: Option<PathBuf>,
    },
    /// Show cache statistics
    CacheStats,
    /// Show the detected workspace
    Workspace,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let root = std::fs::canonicalize(&root).unwrap_or(root);
    let socket_path = DaemonServer::socket_path_for(&root);

    match cli.command {
        Commands::Start => run_daemon(&root).await?,

        Commands::Workspace => {
            let config = WatchConfig::load(&root)?;
            let workspace = WorkspaceResolver::new(&root)
                .auto_detect(config.auto_detect_workspaces)
                .detect();

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&workspace)?);
                return Ok(());
            }

            println!(
                "📦 {} workspace ({} projects)",
                workspace.kind.as_str(),
                workspace.projects.len()
            );
            for project in &workspace.projects {
                let marker = if project.config_exists() { "✓" } else { "✗" };
                println!("   {} {} ({})", marker, project.name, project.id);
            }
        }

        Commands::Stop => {
            request(&socket_path, DaemonRequest::Shutdown, cli.json).await?;
            println!("✅ Daemon stopped");
        }

        Commands::Status => match request(&socket_path, DaemonRequest::Status, cli.json).await? {
            DaemonResponse::Status(status) => {
                println!("📊 Daemon Status:");
                println!("   Active: {}", status.active);
                println!("   Mode: {:?}", status.mode);
                println!("   Projects: {}", status.watched_projects);
                println!("   Files: {}", status.watched_files);
                match status.last_compilation {
                    Some(ts) => println!("   Last compilation: {} ms since epoch", ts),
                    None => println!("   Last compilation: never"),
                }
                for project in &status.projects {
                    println!("   • {} ({}) {:?}", project.name, project.id, project.state);
                }
            }
            other => print_unexpected(other),
        },

        Commands::Check { file } => {
            let path = match file {
                Some(file) => Some(request_path(&file, &std::env::current_dir()?)),
                None => None,
            };
            match request(&socket_path, DaemonRequest::HasErrors { path }, cli.json).await? {
                DaemonResponse::HasErrors(true) => {
                    println!("❌ Errors found");
                    std::process::exit(1);
                }
                DaemonResponse::HasErrors(false) => println!("✅ No errors"),
                other => print_unexpected(other),
            }
        }

        Commands::Errors => {
            match request(&socket_path, DaemonRequest::AllDiagnostics, cli.json).await? {
                DaemonResponse::Diagnostics(result) => print_result(&result),
                other => print_unexpected(other),
            }
        }

        Commands::Package { name } => {
            let req = DaemonRequest::PackageDiagnostics { name: name.clone() };
            match request(&socket_path, req, cli.json).await? {
                DaemonResponse::Package(Some(result)) => print_result(&result),
                DaemonResponse::Package(None) => {
                    println!("❌ Package '{}' not found", name);
                    std::process::exit(2);
                }
                other => print_unexpected(other),
            }
        }

        Commands::Count => match request(&socket_path, DaemonRequest::Count, cli.json).await? {
            DaemonResponse::Count(count) => {
                println!(
                    "{} error(s), {} warning(s), {} suggestion(s)",
                    count.errors, count.warnings, count.suggestions
                );
            }
            other => print_unexpected(other),
        },

        Commands::Clear { file } => {
            let req = match file {
                Some(file) => DaemonRequest::ClearFile {
                    path: request_path(&file, &std::env::current_dir()?),
                },
                None => DaemonRequest::ClearAll,
            };
            match request(&socket_path, req, cli.json).await? {
                DaemonResponse::Cleared(true) => println!("🗑️  Cleared"),
                DaemonResponse::Cleared(false) => println!("Nothing to clear"),
                other => print_unexpected(other),
            }
        }

        Commands::CacheStats => {
            match request(&socket_path, DaemonRequest::CacheStats, cli.json).await? {
                DaemonResponse::CacheStats(stats) => {
                    println!("📊 Cache:");
                    println!("   Size: {}/{}", stats.size, stats.capacity);
                    println!("   Hits: {}  Misses: {}", stats.hits, stats.misses);
                    println!("   Hit rate: {:.1}%", stats.hit_rate * 100.0);
                    println!("   Evictions: {}", stats.evictions);
                }
                other => print_unexpected(other),
            }
        }
    }

    Ok(())
}

/// Detect the workspace and serve until stopped
async fn run_daemon(root: &Path) -> Result<()> {
    let config = WatchConfig::load(root)?;
    let workspace = WorkspaceResolver::new(root)
        .auto_detect(config.auto_detect_workspaces)
        .detect();

    println!(
        "🚀 Starting tscd for {} project(s) in {}",
        workspace.projects.len(),
        root.display()
    );

    let factory = TscSessionFactory::new(root);
    let (orchestrator, events) = WatchOrchestrator::new(workspace, &config, Box::new(factory));
    let mut server = DaemonServer::new(orchestrator, events)?;
    server.run().await
}

/// Send a request, printing the raw response in JSON mode
async fn request(socket_path: &Path, req: DaemonRequest, json: bool) -> Result<DaemonResponse> {
    let response = match send_request(socket_path, &req).await {
        Ok(response) => response,
        Err(e) => {
            debug!("Connect to {:?} failed: {}", socket_path, e);
            bail!("daemon not running (run `tscd start`)")
        }
    };

    if let DaemonResponse::Error(message) = &response {
        bail!("daemon error: {}", message);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        if let DaemonResponse::HasErrors(true) = response {
            std::process::exit(1);
        }
        std::process::exit(0);
    }

    Ok(response)
}

/// Absolute form of a file argument. The daemon resolves relative paths
/// against the workspace root, not the client's directory.
fn request_path(file: &Path, cwd: &Path) -> String {
    let path = cwd.join(file);
    std::fs::canonicalize(&path)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn print_result(result: &DiagnosticsResult) {
    for diagnostic in &result.diagnostics {
        println!("{}", format_diagnostic(diagnostic));
    }
    println!();
    println!(
        "{}: {} error(s), {} warning(s), {} suggestion(s), {} message(s)",
        result.source,
        result.total_errors,
        result.total_warnings,
        result.total_suggestions,
        result.total_messages
    );
}

fn format_diagnostic(d: &Diagnostic) -> String {
    format!(
        "{}({},{}): {} TS{}: {}",
        d.file.display(),
        d.line,
        d.column,
        d.category.as_str(),
        d.code,
        d.message
    )
}

fn print_unexpected(response: DaemonResponse) {
    eprintln!("Unexpected response: {:?}", response);
}
