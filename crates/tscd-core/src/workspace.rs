//! Workspace Resolver - monorepo topology detection
//!
//! Markers are probed in a fixed order and the first one present wins:
//! 1. `pnpm-workspace.yaml`
//! 2. `package.json` `"workspaces"` (npm / yarn)
//! 3. `rush.json`
//! 4. `lerna.json`
//!
//! Every package must have a sibling `tsconfig.json` to become a project.
//! Packages without one, or with an unreadable manifest, are skipped and the
//! scan carries on. No marker means a single project at the root.

use crate::error::{Result, TscdError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Compiler config file expected next to each package manifest
pub const PROJECT_CONFIG_FILE: &str = "tsconfig.json";

const PACKAGE_MANIFEST: &str = "package.json";
const PNPM_MARKER: &str = "pnpm-workspace.yaml";
const RUSH_MARKER: &str = "rush.json";
const LERNA_MARKER: &str = "lerna.json";

/// Which tool declared the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceKind {
    Single,
    Pnpm,
    Npm,
    Rush,
    Lerna,
}

impl WorkspaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Pnpm => "pnpm",
            Self::Npm => "npm",
            Self::Rush => "rush",
            Self::Lerna => "lerna",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    Single,
    Monorepo,
}

/// One compiler-configuration unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Root relative to the workspace root, `.` for the root itself
    pub id: String,
    pub name: String,
    pub root: PathBuf,
    pub config_path: PathBuf,
}

impl ProjectConfig {
    pub fn config_exists(&self) -> bool {
        self.config_path.is_file()
    }
}

/// Detected workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub root: PathBuf,
    pub kind: WorkspaceKind,
    pub projects: Vec<ProjectConfig>,
}

impl Workspace {
    pub fn mode(&self) -> WatchMode {
        if self.projects.len() > 1 {
            WatchMode::Monorepo
        } else {
            WatchMode::Single
        }
    }
}

#[derive(Debug, Deserialize)]
struct PackageManifest {
    name: Option<String>,
    #[serde(default)]
    workspaces: Option<WorkspacesField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WorkspacesField {
    List(Vec<String>),
    Object {
        #[serde(default)]
        packages: Vec<String>,
    },
}

impl WorkspacesField {
    fn into_patterns(self) -> Vec<String> {
        match self {
            Self::List(patterns) => patterns,
            Self::Object { packages } => packages,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PnpmWorkspace {
    #[serde(default)]
    packages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RushManifest {
    #[serde(default)]
    projects: Vec<RushProject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RushProject {
    package_name: String,
    project_folder: String,
}

#[derive(Debug, Deserialize)]
struct LernaManifest {
    packages: Option<Vec<String>>,
}

type Probe = fn(&WorkspaceResolver) -> Result<Option<Vec<ProjectConfig>>>;

/// Turns a workspace root into an ordered list of projects
pub struct WorkspaceResolver {
    root: PathBuf,
    auto_detect: bool,
}

impl WorkspaceResolver {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        Self {
            root,
            auto_detect: true,
        }
    }

    /// Disable marker probing; always resolve a single root project
    pub fn auto_detect(mut self, enabled: bool) -> Self {
        self.auto_detect = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Detect the workspace. Never fails: unreadable markers and packages
    /// are logged and skipped.
    pub fn detect(&self) -> Workspace {
        if self.auto_detect {
            let probes: [(WorkspaceKind, Probe); 4] = [
                (WorkspaceKind::Pnpm, Self::probe_pnpm),
                (WorkspaceKind::Npm, Self::probe_npm),
                (WorkspaceKind::Rush, Self::probe_rush),
                (WorkspaceKind::Lerna, Self::probe_lerna),
            ];

            for (kind, probe) in probes {
                match probe(self) {
                    Ok(Some(projects)) if !projects.is_empty() => {
                        info!(
                            "Detected {} workspace with {} project(s)",
                            kind.as_str(),
                            projects.len()
                        );
                        return Workspace {
                            root: self.root.clone(),
                            kind,
                            projects,
                        };
                    }
                    Ok(Some(_)) => {
                        warn!(
                            "{} workspace declares no project with a {}; using the root project",
                            kind.as_str(),
                            PROJECT_CONFIG_FILE
                        );
                        break;
                    }
                    Ok(None) => continue,
                    Err(e) => warn!("{}", e),
                }
            }
        }

        Workspace {
            root: self.root.clone(),
            kind: WorkspaceKind::Single,
            projects: vec![self.root_project()],
        }
    }

    fn probe_pnpm(&self) -> Result<Option<Vec<ProjectConfig>>> {
        let path = self.root.join(PNPM_MARKER);
        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let manifest: PnpmWorkspace = if content.trim().is_empty() {
            PnpmWorkspace::default()
        } else {
            serde_yaml_ng::from_str(&content).map_err(|e| TscdError::scan(&path, e))?
        };

        Ok(Some(self.resolve_patterns(&manifest.packages)))
    }

    fn probe_npm(&self) -> Result<Option<Vec<ProjectConfig>>> {
        let path = self.root.join(PACKAGE_MANIFEST);
        if !path.is_file() {
            return Ok(None);
        }

        let manifest = read_manifest(&path)?;
        Ok(manifest
            .workspaces
            .map(|field| self.resolve_patterns(&field.into_patterns())))
    }

    fn probe_rush(&self) -> Result<Option<Vec<ProjectConfig>>> {
        let path = self.root.join(RUSH_MARKER);
        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let manifest: RushManifest = serde_json::from_str(&strip_json_comments(&content))
            .map_err(|e| TscdError::scan(&path, e))?;

        let projects = manifest
            .projects
            .into_iter()
            .filter_map(|p| {
                self.project_at(&self.root.join(&p.project_folder), Some(p.package_name))
            })
            .collect();

        Ok(Some(sorted(projects)))
    }

    fn probe_lerna(&self) -> Result<Option<Vec<ProjectConfig>>> {
        let path = self.root.join(LERNA_MARKER);
        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let manifest: LernaManifest =
            serde_json::from_str(&content).map_err(|e| TscdError::scan(&path, e))?;
        let patterns = manifest
            .packages
            .unwrap_or_else(|| vec!["packages/*".to_string()]);

        Ok(Some(self.resolve_patterns(&patterns)))
    }

    /// Expand package-location globs into projects.
    ///
    /// `!pattern` entries exclude matching package directories.
    fn resolve_patterns(&self, patterns: &[String]) -> Vec<ProjectConfig> {
        let mut excludes = Vec::new();
        let mut includes = Vec::new();
        for pattern in patterns {
            let pattern = pattern.trim();
            match pattern.strip_prefix('!') {
                Some(negated) => match glob::Pattern::new(clean_pattern(negated)) {
                    Ok(p) => excludes.push(p),
                    Err(e) => warn!("Invalid exclude pattern {:?}: {}", pattern, e),
                },
                None => includes.push(clean_pattern(pattern)),
            }
        }

        let escaped_root = glob::Pattern::escape(&self.root.to_string_lossy());
        let mut projects = Vec::new();

        for pattern in includes {
            let full = format!("{}/{}/{}", escaped_root, pattern, PACKAGE_MANIFEST);
            let entries = match glob::glob(&full) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Invalid workspace pattern {:?}: {}", pattern, e);
                    continue;
                }
            };

            for manifest_path in entries.flatten() {
                let Some(dir) = manifest_path.parent() else {
                    continue;
                };
                let id = self.project_id(dir);

                if id.split('/').any(|segment| segment == "node_modules") {
                    continue;
                }
                if excludes.iter().any(|p| p.matches(&id)) {
                    debug!("Excluded by pattern: {}", id);
                    continue;
                }

                match read_manifest(&manifest_path) {
                    Ok(manifest) => {
                        if let Some(project) = self.project_at(dir, manifest.name) {
                            projects.push(project);
                        }
                    }
                    Err(e) => warn!("Skipping package: {}", e),
                }
            }
        }

        sorted(projects)
    }

    /// Pair a package directory with its compiler config
    fn project_at(&self, dir: &Path, declared_name: Option<String>) -> Option<ProjectConfig> {
        let config_path = dir.join(PROJECT_CONFIG_FILE);
        if !config_path.is_file() {
            debug!("Skipping {:?}: no {}", dir, PROJECT_CONFIG_FILE);
            return None;
        }

        Some(ProjectConfig {
            id: self.project_id(dir),
            name: declared_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| basename(dir)),
            root: dir.to_path_buf(),
            config_path,
        })
    }

    /// Fallback project at the workspace root. Its config may not exist;
    /// the orchestrator reports that when starting.
    fn root_project(&self) -> ProjectConfig {
        let manifest_path = self.root.join(PACKAGE_MANIFEST);
        let declared = if manifest_path.is_file() {
            match read_manifest(&manifest_path) {
                Ok(manifest) => manifest.name,
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            }
        } else {
            None
        };

        ProjectConfig {
            id: ".".to_string(),
            name: declared
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| basename(&self.root)),
            root: self.root.clone(),
            config_path: self.root.join(PROJECT_CONFIG_FILE),
        }
    }

    fn project_id(&self, dir: &Path) -> String {
        let relative = dir.strip_prefix(&self.root).unwrap_or(dir);
        let segments: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        if segments.is_empty() {
            ".".to_string()
        } else {
            segments.join("/")
        }
    }
}

/// Detect the workspace at `root` with auto-detection enabled
pub fn detect(root: impl AsRef<Path>) -> Workspace {
    WorkspaceResolver::new(root).detect()
}

fn read_manifest(path: &Path) -> Result<PackageManifest> {
    let content = fs::read_to_string(path).map_err(|e| TscdError::scan(path, e))?;
    serde_json::from_str(&content).map_err(|e| TscdError::scan(path, e))
}

fn clean_pattern(pattern: &str) -> &str {
    let pattern = pattern.trim();
    let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
    pattern.trim_end_matches('/')
}

fn basename(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workspace".to_string())
}

/// Order by id and drop duplicates from overlapping patterns
fn sorted(projects: Vec<ProjectConfig>) -> Vec<ProjectConfig> {
    let by_id: BTreeMap<String, ProjectConfig> =
        projects.into_iter().map(|p| (p.id.clone(), p)).collect();
    by_id.into_values().collect()
}

/// Remove `//` and `/* */` comments outside of strings (rush.json allows them)
fn strip_json_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn package(root: &Path, dir: &str, name: &str, with_tsconfig: bool) {
        write(root, &format!("{dir}/package.json"), &format!(r#"{{ "name": "{name}" }}"#));
        if with_tsconfig {
            write(root, &format!("{dir}/tsconfig.json"), "{}");
        }
    }

    fn names(workspace: &Workspace) -> Vec<&str> {
        workspace.projects.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_single_project_fallback() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "package.json", r#"{ "name": "app" }"#);
        write(dir.path(), "tsconfig.json", "{}");

        let workspace = detect(dir.path());
        assert_eq!(workspace.kind, WorkspaceKind::Single);
        assert_eq!(workspace.mode(), WatchMode::Single);
        assert_eq!(names(&workspace), vec!["app"]);
        assert_eq!(workspace.projects[0].id, ".");
        assert!(workspace.projects[0].config_exists());
    }

    #[test]
    fn test_single_project_uses_basename_without_manifest() {
        let dir = TempDir::new().unwrap();
        let workspace = detect(dir.path());
        let expected = basename(&fs::canonicalize(dir.path()).unwrap());
        assert_eq!(workspace.projects[0].name, expected);
        assert!(!workspace.projects[0].config_exists());
    }

    #[test]
    fn test_npm_workspaces_skip_packages_without_tsconfig() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "package.json", r#"{ "name": "root", "workspaces": ["packages/*"] }"#);
        package(dir.path(), "packages/a", "@acme/a", true);
        package(dir.path(), "packages/b", "@acme/b", false);

        let workspace = detect(dir.path());
        assert_eq!(workspace.kind, WorkspaceKind::Npm);
        assert_eq!(names(&workspace), vec!["@acme/a"]);
        assert_eq!(workspace.projects[0].id, "packages/a");
    }

    #[test]
    fn test_yarn_object_form() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "package.json",
            r#"{ "workspaces": { "packages": ["apps/*", "libs/*"] } }"#,
        );
        package(dir.path(), "apps/web", "web", true);
        package(dir.path(), "libs/ui", "ui", true);

        let workspace = detect(dir.path());
        assert_eq!(names(&workspace), vec!["web", "ui"]);
        assert_eq!(workspace.mode(), WatchMode::Monorepo);
    }

    #[test]
    fn test_pnpm_wins_over_npm_workspaces() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pnpm-workspace.yaml", "packages:\n  - 'apps/*'\n");
        write(dir.path(), "package.json", r#"{ "workspaces": ["packages/*"] }"#);
        package(dir.path(), "apps/web", "web", true);
        package(dir.path(), "packages/lib", "lib", true);

        let workspace = detect(dir.path());
        assert_eq!(workspace.kind, WorkspaceKind::Pnpm);
        assert_eq!(names(&workspace), vec!["web"]);
    }

    #[test]
    fn test_pnpm_negated_pattern() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "pnpm-workspace.yaml",
            "packages:\n  - 'packages/**'\n  - '!packages/legacy'\n",
        );
        package(dir.path(), "packages/core", "core", true);
        package(dir.path(), "packages/legacy", "legacy", true);

        let workspace = detect(dir.path());
        assert_eq!(names(&workspace), vec!["core"]);
    }

    #[test]
    fn test_malformed_package_is_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "package.json", r#"{ "workspaces": ["packages/*"] }"#);
        package(dir.path(), "packages/good", "good", true);
        write(dir.path(), "packages/bad/package.json", "{ nope");
        write(dir.path(), "packages/bad/tsconfig.json", "{}");

        let workspace = detect(dir.path());
        assert_eq!(names(&workspace), vec!["good"]);
    }

    #[test]
    fn test_package_name_falls_back_to_dirname() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "package.json", r#"{ "workspaces": ["packages/*"] }"#);
        write(dir.path(), "packages/tools/package.json", r#"{ "private": true }"#);
        write(dir.path(), "packages/tools/tsconfig.json", "{}");

        let workspace = detect(dir.path());
        assert_eq!(names(&workspace), vec!["tools"]);
    }

    #[test]
    fn test_rush_manifest_with_comments() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "rush.json",
            r#"{
                // managed by rush
                "rushVersion": "5.100.0",
                /* projects */
                "projects": [
                    { "packageName": "@corp/api", "projectFolder": "apps/api" },
                    { "packageName": "@corp/docs", "projectFolder": "apps/docs" }
                ]
            }"#,
        );
        write(dir.path(), "apps/api/tsconfig.json", "{}");

        let workspace = detect(dir.path());
        assert_eq!(workspace.kind, WorkspaceKind::Rush);
        assert_eq!(names(&workspace), vec!["@corp/api"]);
    }

    #[test]
    fn test_lerna_default_packages() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "lerna.json", r#"{ "version": "1.0.0" }"#);
        package(dir.path(), "packages/one", "one", true);

        let workspace = detect(dir.path());
        assert_eq!(workspace.kind, WorkspaceKind::Lerna);
        assert_eq!(names(&workspace), vec!["one"]);
    }

    #[test]
    fn test_malformed_marker_falls_through() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pnpm-workspace.yaml", "packages: [unterminated");
        write(dir.path(), "lerna.json", r#"{ "packages": ["libs/*"] }"#);
        package(dir.path(), "libs/x", "x", true);

        let workspace = detect(dir.path());
        assert_eq!(workspace.kind, WorkspaceKind::Lerna);
    }

    #[test]
    fn test_marker_without_projects_uses_root() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "package.json", r#"{ "name": "mono", "workspaces": ["packages/*"] }"#);
        write(dir.path(), "tsconfig.json", "{}");

        let workspace = detect(dir.path());
        assert_eq!(workspace.kind, WorkspaceKind::Single);
        assert_eq!(names(&workspace), vec!["mono"]);
    }

    #[test]
    fn test_auto_detect_disabled() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "package.json", r#"{ "name": "mono", "workspaces": ["packages/*"] }"#);
        package(dir.path(), "packages/a", "a", true);

        let workspace = WorkspaceResolver::new(dir.path()).auto_detect(false).detect();
        assert_eq!(workspace.kind, WorkspaceKind::Single);
        assert_eq!(names(&workspace), vec!["mono"]);
    }

    #[test]
    fn test_strip_json_comments_keeps_strings() {
        let stripped = strip_json_comments(r#"{ "url": "http://x", /* c */ "a": 1 // end
}"#);
        let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["url"], "http://x");
        assert_eq!(value["a"], 1);
    }
}
