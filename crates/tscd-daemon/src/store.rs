//! Diagnostic Store - authoritative per-project, per-file buckets
//!
//! Each project counts passes. A bucket remembers the pass that filled it:
//! the first diagnostic for a file in a newer pass replaces the bucket, and
//! buckets left untouched when a pass completes are pruned. Diagnostics from
//! a superseded pass never survive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tscd_core::{CategoryTotals, Diagnostic};

#[derive(Debug, Default)]
struct Bucket {
    pass: u64,
    diagnostics: Vec<Diagnostic>,
}

/// File path -> bucket for one project
#[derive(Debug, Default)]
pub struct ProjectIndex {
    files: BTreeMap<PathBuf, Bucket>,
    pass: u64,
    pass_open: bool,
}

impl ProjectIndex {
    fn begin_pass(&mut self) {
        if !self.pass_open {
            self.pass += 1;
            self.pass_open = true;
        }
    }

    fn insert(&mut self, diagnostic: Diagnostic) {
        self.begin_pass();
        let pass = self.pass;

        let bucket = self.files.entry(diagnostic.file.clone()).or_default();
        if bucket.pass != pass {
            bucket.diagnostics.clear();
            bucket.pass = pass;
        }
        bucket.diagnostics.push(diagnostic);
    }

    /// Close the current pass (an empty one if none is open) and prune
    /// buckets it did not refresh.
    fn complete_pass(&mut self) -> Vec<PathBuf> {
        self.begin_pass();
        let pass = self.pass;

        let stale: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|(_, bucket)| bucket.pass != pass)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &stale {
            self.files.remove(path);
        }

        self.pass_open = false;
        stale
    }

    fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.files.values().flat_map(|bucket| bucket.diagnostics.iter())
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Registry of project indexes keyed by project id
#[derive(Debug, Default)]
pub struct DiagnosticStore {
    projects: BTreeMap<String, ProjectIndex>,
}

impl DiagnosticStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, project_id: impl Into<String>) {
        self.projects.entry(project_id.into()).or_default();
    }

    pub fn contains(&self, project_id: &str) -> bool {
        self.projects.contains_key(project_id)
    }

    pub fn project_ids(&self) -> impl Iterator<Item = &str> {
        self.projects.keys().map(String::as_str)
    }

    pub fn begin_pass(&mut self, project_id: &str) -> bool {
        match self.projects.get_mut(project_id) {
            Some(index) => {
                index.begin_pass();
                true
            }
            None => false,
        }
    }

    /// Add a diagnostic; false if the project is unknown.
    pub fn insert(&mut self, project_id: &str, diagnostic: Diagnostic) -> bool {
        match self.projects.get_mut(project_id) {
            Some(index) => {
                index.insert(diagnostic);
                true
            }
            None => false,
        }
    }

    /// Finish a pass; returns the files whose buckets were pruned.
    pub fn complete_pass(&mut self, project_id: &str) -> Option<Vec<PathBuf>> {
        self.projects.get_mut(project_id).map(ProjectIndex::complete_pass)
    }

    pub fn file(&self, project_id: &str, path: &Path) -> Option<&[Diagnostic]> {
        self.projects
            .get(project_id)?
            .files
            .get(path)
            .map(|bucket| bucket.diagnostics.as_slice())
    }

    pub fn project_diagnostics(&self, project_id: &str) -> Option<Vec<Diagnostic>> {
        self.projects
            .get(project_id)
            .map(|index| index.diagnostics().cloned().collect())
    }

    pub fn all_diagnostics(&self) -> Vec<Diagnostic> {
        self.projects
            .values()
            .flat_map(|index| index.diagnostics())
            .cloned()
            .collect()
    }

    pub fn totals(&self) -> CategoryTotals {
        CategoryTotals::tally(self.projects.values().flat_map(|index| index.diagnostics()))
    }

    pub fn project_totals(&self, project_id: &str) -> Option<CategoryTotals> {
        self.projects
            .get(project_id)
            .map(|index| CategoryTotals::tally(index.diagnostics()))
    }

    /// Short-circuits on the first error
    pub fn has_errors(&self) -> bool {
        self.projects
            .values()
            .flat_map(|index| index.diagnostics())
            .any(Diagnostic::is_error)
    }

    /// Drop `path` from every project; returns the ids it was removed from.
    pub fn remove_file(&mut self, path: &Path) -> Vec<String> {
        self.projects
            .iter_mut()
            .filter_map(|(id, index)| index.files.remove(path).map(|_| id.clone()))
            .collect()
    }

    /// Empty every bucket; projects stay registered.
    pub fn clear(&mut self) {
        for index in self.projects.values_mut() {
            index.files.clear();
        }
    }

    pub fn file_count(&self) -> usize {
        self.projects.values().map(ProjectIndex::file_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tscd_core::DiagnosticCategory;

    fn diag(file: &str, code: u32, category: DiagnosticCategory) -> Diagnostic {
        Diagnostic::new(file, 1, 1, category, code, format!("TS{code}"))
    }

    fn codes(diagnostics: &[Diagnostic]) -> Vec<u32> {
        diagnostics.iter().map(|d| d.code).collect()
    }

    fn store() -> DiagnosticStore {
        let mut store = DiagnosticStore::new();
        store.register("app");
        store
    }

    #[test]
    fn test_bucket_keeps_emission_order_within_a_pass() {
        let mut store = store();
        store.insert("app", diag("/a.ts", 2, DiagnosticCategory::Error));
        assert!(store.insert("app", diag("/a.ts", 1, DiagnosticCategory::Warning)));
        assert_eq!(codes(store.file("app", Path::new("/a.ts")).unwrap()), vec![2, 1]);
    }

    #[test]
    fn test_successive_passes_replace_not_append() {
        let mut store = store();
        store.insert("app", diag("/a.ts", 1, DiagnosticCategory::Error));
        store.complete_pass("app");
        store.insert("app", diag("/a.ts", 2, DiagnosticCategory::Error));
        store.complete_pass("app");

        assert_eq!(codes(store.file("app", Path::new("/a.ts")).unwrap()), vec![2]);
    }

    #[test]
    fn test_clean_pass_prunes_stale_files() {
        let mut store = store();
        store.insert("app", diag("/a.ts", 1, DiagnosticCategory::Error));
        store.insert("app", diag("/b.ts", 2, DiagnosticCategory::Error));
        store.complete_pass("app");

        store.begin_pass("app");
        store.insert("app", diag("/b.ts", 3, DiagnosticCategory::Warning));
        let pruned = store.complete_pass("app").unwrap();

        assert_eq!(pruned, vec![PathBuf::from("/a.ts")]);
        assert!(store.file("app", Path::new("/a.ts")).is_none());
        assert!(!store.has_errors());
        assert_eq!(store.totals().warnings, 1);
    }

    #[test]
    fn test_pass_without_diagnostics_clears_everything() {
        let mut store = store();
        store.insert("app", diag("/a.ts", 1, DiagnosticCategory::Error));
        store.complete_pass("app");
        store.complete_pass("app");

        assert_eq!(store.file_count(), 0);
        assert_eq!(store.project_diagnostics("app"), Some(vec![]));
    }

    #[test]
    fn test_unknown_project() {
        let mut store = store();
        assert!(!store.insert("ghost", diag("/a.ts", 1, DiagnosticCategory::Error)));
        assert!(!store.contains("ghost"));
        assert!(store.project_diagnostics("ghost").is_none());
        assert!(store.complete_pass("ghost").is_none());
    }

    #[test]
    fn test_remove_file_across_projects() {
        let mut store = store();
        store.register("lib");
        store.insert("app", diag("/shared.ts", 1, DiagnosticCategory::Error));
        store.insert("lib", diag("/shared.ts", 2, DiagnosticCategory::Error));
        store.insert("lib", diag("/other.ts", 3, DiagnosticCategory::Error));

        let removed = store.remove_file(Path::new("/shared.ts"));
        assert_eq!(removed, vec!["app".to_string(), "lib".to_string()]);
        assert_eq!(store.file_count(), 1);

        store.clear();
        assert_eq!(store.file_count(), 0);
        assert!(store.contains("lib"));
    }
}
