// project.rs — Checked-out projects, project loading, and repository discovery.
//
// Push tests and fingerprinters only ever see a project through the
// `Project` trait. Loading is scoped: `ProjectLoader::load` hands out a boxed
// project whose checkout is released when the box is dropped, and
// `do_with_project` wraps that in a closure-shaped helper.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::GoalError;
use crate::push::RepoRef;

/// A checked-out view of a repository's files.
///
/// Paths are relative to the project root and always use `/` separators.
pub trait Project: Send + Sync {
    /// Which repository this checkout belongs to.
    fn id(&self) -> &RepoRef;

    /// All file paths in the project, sorted.
    fn file_paths(&self) -> Result<Vec<String>, GoalError>;

    /// Read a file. `Ok(None)` when the file does not exist.
    fn read_file(&self, path: &str) -> Result<Option<String>, GoalError>;

    /// Create or overwrite a file.
    fn write_file(&self, path: &str, content: &str) -> Result<(), GoalError>;

    fn has_file(&self, path: &str) -> Result<bool, GoalError> {
        Ok(self.read_file(path)?.is_some())
    }
}

/// Whether a loaded project may be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    ReadOnly,
    Writable,
}

/// Hands out scoped project checkouts.
pub trait ProjectLoader: Send + Sync {
    /// Load the project for `repo`. The checkout lives as long as the box.
    fn load(&self, repo: &RepoRef, mode: LoadMode) -> Result<Box<dyn Project>, GoalError>;
}

/// Run `f` against a freshly loaded project, releasing it afterwards.
pub fn do_with_project<T, E>(
    loader: &dyn ProjectLoader,
    repo: &RepoRef,
    mode: LoadMode,
    f: impl FnOnce(&dyn Project) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<GoalError>,
{
    let project = loader.load(repo, mode)?;
    f(project.as_ref())
}

/// Enumerates every repository known to the current execution context.
pub trait RepoFinder: Send + Sync {
    fn find_repos(&self) -> Result<Vec<RepoRef>, GoalError>;
}

/// A fixed list of repositories.
#[derive(Debug, Clone, Default)]
pub struct StaticRepoFinder {
    repos: Vec<RepoRef>,
}

impl StaticRepoFinder {
    pub fn new(repos: Vec<RepoRef>) -> Self {
        Self { repos }
    }
}

impl RepoFinder for StaticRepoFinder {
    fn find_repos(&self) -> Result<Vec<RepoRef>, GoalError> {
        Ok(self.repos.clone())
    }
}

// ── In-memory projects ──

/// A project held entirely in memory.
///
/// Clones share the same file map, so a write through one handle is visible
/// through every other handle to the same project.
#[derive(Debug, Clone)]
pub struct InMemoryProject {
    id: RepoRef,
    files: Arc<RwLock<BTreeMap<String, String>>>,
    read_only: bool,
}

impl InMemoryProject {
    pub fn new(id: RepoRef) -> Self {
        Self {
            id,
            files: Arc::new(RwLock::new(BTreeMap::new())),
            read_only: false,
        }
    }

    /// Builder-style helper to seed a file.
    pub fn with_file(self, path: impl Into<String>, content: impl Into<String>) -> Self {
        if let Ok(mut files) = self.files.write() {
            files.insert(path.into(), content.into());
        }
        self
    }

    fn handle(&self, mode: LoadMode) -> Self {
        Self {
            id: self.id.clone(),
            files: Arc::clone(&self.files),
            read_only: mode == LoadMode::ReadOnly,
        }
    }

    fn poisoned(&self) -> GoalError {
        GoalError::ProjectNotFound(format!("{} (file map lock poisoned)", self.id))
    }
}

impl Project for InMemoryProject {
    fn id(&self) -> &RepoRef {
        &self.id
    }

    fn file_paths(&self) -> Result<Vec<String>, GoalError> {
        let files = self.files.read().map_err(|_| self.poisoned())?;
        Ok(files.keys().cloned().collect())
    }

    fn read_file(&self, path: &str) -> Result<Option<String>, GoalError> {
        let files = self.files.read().map_err(|_| self.poisoned())?;
        Ok(files.get(path).cloned())
    }

    fn write_file(&self, path: &str, content: &str) -> Result<(), GoalError> {
        if self.read_only {
            return Err(GoalError::ReadOnlyProject(self.id.slug()));
        }
        let mut files = self.files.write().map_err(|_| self.poisoned())?;
        files.insert(path.to_string(), content.to_string());
        Ok(())
    }
}

/// Loader and repo finder over a set of in-memory projects.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProjectLoader {
    projects: HashMap<String, InMemoryProject>,
    order: Vec<String>,
}

impl InMemoryProjectLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project. Replaces any project with the same slug.
    pub fn add(&mut self, project: InMemoryProject) {
        let slug = project.id.slug();
        if !self.projects.contains_key(&slug) {
            self.order.push(slug.clone());
        }
        self.projects.insert(slug, project);
    }

    pub fn with_project(mut self, project: InMemoryProject) -> Self {
        self.add(project);
        self
    }
}

impl ProjectLoader for InMemoryProjectLoader {
    fn load(&self, repo: &RepoRef, mode: LoadMode) -> Result<Box<dyn Project>, GoalError> {
        let project = self
            .projects
            .get(&repo.slug())
            .ok_or_else(|| GoalError::ProjectNotFound(repo.slug()))?;
        Ok(Box::new(project.handle(mode)))
    }
}

impl RepoFinder for InMemoryProjectLoader {
    fn find_repos(&self) -> Result<Vec<RepoRef>, GoalError> {
        Ok(self
            .order
            .iter()
            .filter_map(|slug| self.projects.get(slug))
            .map(|p| p.id.clone())
            .collect())
    }
}

// ── Local directory projects ──

/// A project checked out in a local directory.
#[derive(Debug, Clone)]
pub struct LocalProject {
    id: RepoRef,
    root: PathBuf,
    read_only: bool,
}

impl LocalProject {
    pub fn new(id: RepoRef, root: impl AsRef<Path>, mode: LoadMode) -> Self {
        Self {
            id,
            root: root.as_ref().to_path_buf(),
            read_only: mode == LoadMode::ReadOnly,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, GoalError> {
        if path.split('/').any(|part| part == "..") || Path::new(path).is_absolute() {
            return Err(GoalError::InvalidPattern {
                pattern: path.to_string(),
                reason: "path escapes the project root".to_string(),
            });
        }
        Ok(self.root.join(path))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> GoalError {
    GoalError::IoError {
        path: path.display().to_string(),
        source,
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), GoalError> {
    let entries = fs::read_dir(dir).map_err(|source| io_error(dir, source))?;
    for entry in entries {
        let entry = entry.map_err(|source| io_error(dir, source))?;
        let path = entry.path();
        if path.file_name().is_some_and(|name| name == ".git") {
            continue;
        }
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(parts.join("/"));
        }
    }
    Ok(())
}

impl Project for LocalProject {
    fn id(&self) -> &RepoRef {
        &self.id
    }

    fn file_paths(&self) -> Result<Vec<String>, GoalError> {
        let mut paths = Vec::new();
        collect_files(&self.root, &self.root, &mut paths)?;
        paths.sort();
        Ok(paths)
    }

    fn read_file(&self, path: &str) -> Result<Option<String>, GoalError> {
        let full = self.resolve(path)?;
        if !full.is_file() {
            return Ok(None);
        }
        fs::read_to_string(&full)
            .map(Some)
            .map_err(|source| io_error(&full, source))
    }

    fn write_file(&self, path: &str, content: &str) -> Result<(), GoalError> {
        if self.read_only {
            return Err(GoalError::ReadOnlyProject(self.id.slug()));
        }
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }
        fs::write(&full, content).map_err(|source| io_error(&full, source))
    }
}

/// Loads projects from `<root>/<owner>/<repo>` and discovers repositories by
/// scanning the same layout.
#[derive(Debug, Clone)]
pub struct LocalProjectLoader {
    root: PathBuf,
    url_base: String,
}

impl LocalProjectLoader {
    /// `url_base` is prefixed to `owner/repo` for discovered repositories,
    /// e.g. `https://github.com`.
    pub fn new(root: impl AsRef<Path>, url_base: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            url_base: url_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn project_dir(&self, repo: &RepoRef) -> PathBuf {
        self.root.join(&repo.owner).join(&repo.repo)
    }

    fn sorted_dirs(&self, dir: &Path) -> Result<Vec<(String, PathBuf)>, GoalError> {
        let entries = fs::read_dir(dir).map_err(|source| io_error(dir, source))?;
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| io_error(dir, source))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if !name.starts_with('.') {
                    dirs.push((name.to_string(), path));
                }
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

impl ProjectLoader for LocalProjectLoader {
    fn load(&self, repo: &RepoRef, mode: LoadMode) -> Result<Box<dyn Project>, GoalError> {
        let dir = self.project_dir(repo);
        if !dir.is_dir() {
            return Err(GoalError::ProjectNotFound(repo.slug()));
        }
        Ok(Box::new(LocalProject::new(repo.clone(), dir, mode)))
    }
}

impl RepoFinder for LocalProjectLoader {
    fn find_repos(&self) -> Result<Vec<RepoRef>, GoalError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        // Only an unreadable root fails the scan. A bad owner directory or
        // repository name costs just that entry.
        let mut repos = Vec::new();
        let mut skipped = 0usize;
        for (owner, owner_dir) in self.sorted_dirs(&self.root)? {
            let names = match self.sorted_dirs(&owner_dir) {
                Ok(names) => names,
                Err(e) => {
                    tracing::warn!(owner = %owner, error = %e, "skipping unreadable owner directory");
                    skipped += 1;
                    continue;
                }
            };
            for (name, _) in names {
                let url = format!("{}/{}/{}", self.url_base, owner, name);
                match RepoRef::new(owner.clone(), name, url) {
                    Ok(repo) => repos.push(repo),
                    Err(e) => {
                        tracing::warn!(owner = %owner, error = %e, "skipping repository");
                        skipped += 1;
                    }
                }
            }
        }
        if skipped > 0 {
            tracing::warn!(found = repos.len(), skipped, "repository scan incomplete");
        }
        Ok(repos)
    }
}
