#![warn(missing_docs)]

//! # eda-workspace
//!
//! On-disk layout of per-project workspaces.
//!
//! ```text
//! <workspace_root>/
//!   <project>/
//!     src/        Verilog sources
//!     scripts/    generated Yosys / OpenROAD scripts
//!     reports/    synthesis and place-and-route reports
//!     runs/       OpenLane run directories
//!   .eda-state/
//!     <project>/
//!       project.json
//!       runs/<run_id>.json
//! ```
//!
//! Project directories are mounted read-write into tool containers, so
//! server state lives in `.eda-state/`, which is never mounted. The leading
//! dot keeps it out of the project namespace.
//!
//! Every caller-supplied path goes through the gatekeeper's path validation
//! before it reaches the filesystem.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use eda_error::EdaError;
use eda_security::names::{validate_identifier, validate_project_name};
use eda_security::{CallerIdentity, Gatekeeper};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Directory under the workspace root holding per-project server state.
pub const STATE_DIR: &str = ".eda-state";

/// Upper bound on entries returned by [`Project::list_files`].
pub const MAX_LISTED_FILES: usize = 200;

/// Sub-directories created for every project.
const PROJECT_DIRS: &[&str] = &["src", "scripts", "reports", "runs"];

/// Directories under `runs/<tag>/` that are never listed.
const NOISY_RUN_DIRS: &[&str] = &["tmp", "logs", "reports"];

fn io_error(err: std::io::Error, context: impl Into<String>) -> EdaError {
    EdaError::Internal(anyhow::Error::new(err).context(context.into()))
}

fn timestamp(time: std::io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Accepting writes and runs.
    Active,
    /// Kept for reference.
    Archived,
}

/// Persisted project metadata (`.eda-state/<project>/project.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMeta {
    /// Project identifier.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: ProjectStatus,
    /// Top module of the last successful synthesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_module: Option<String>,
}

/// One file inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
}

/// Result of [`Project::list_files`].
#[derive(Debug, Clone, Serialize)]
pub struct FileListing {
    /// Listed files, sorted by path.
    pub files: Vec<FileEntry>,
    /// Files left out because of [`MAX_LISTED_FILES`].
    pub omitted: usize,
}

/// Row of [`Workspace::list_projects`].
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    /// Project identifier.
    pub name: String,
    /// Creation time, when metadata exists.
    pub created_at: Option<DateTime<Utc>>,
    /// Number of regular files in the project.
    pub file_count: usize,
    /// Total size of those files.
    pub total_bytes: u64,
    /// Whether `reports/synth.v` exists.
    pub has_netlist: bool,
}

/// A file resolved for reading.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    /// Normalized relative path, `/`-separated.
    pub relative: String,
    /// Absolute path under the canonical project root.
    pub absolute: PathBuf,
    /// Size in bytes.
    pub size: u64,
    identity: FileIdentity,
}

/// Device and inode of a file, used to detect a swap between resolving a
/// path and opening it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &std::fs::Metadata) -> Self {
        Self {
            dev: 0,
            ino: meta.len(),
        }
    }
}

/// Outcome of [`Workspace::initialize`].
#[derive(Debug, Clone)]
pub struct Initialized {
    /// Handle to the project.
    pub project: Project,
    /// Its metadata.
    pub meta: ProjectMeta,
    /// `false` when the project already existed.
    pub created: bool,
}

/// The workspace root holding every project.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open (creating if needed) the workspace root.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, EdaError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .map_err(|e| io_error(e, format!("create workspace root {}", root.display())))?;
        let root = root
            .canonicalize()
            .map_err(|e| io_error(e, "canonicalize workspace root"))?;
        std::fs::create_dir_all(root.join(STATE_DIR))
            .map_err(|e| io_error(e, "create workspace state directory"))?;
        Ok(Self { root })
    }

    /// Canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a project, or return the existing one with the same name.
    ///
    /// Without a name, a fresh `proj-<8 hex>` identifier is generated.
    pub fn initialize(&self, name: Option<&str>) -> Result<Initialized, EdaError> {
        let name = match name {
            Some(name) => {
                validate_project_name(name)?;
                name.to_string()
            }
            None => self.generate_name(),
        };
        let root = self.root.join(&name);
        if let Ok(meta) = std::fs::symlink_metadata(&root) {
            if !meta.is_dir() {
                return Err(EdaError::Forbidden {
                    reason: format!("'{name}' exists and is not a project directory"),
                });
            }
        }

        for dir in PROJECT_DIRS {
            std::fs::create_dir_all(root.join(dir))
                .map_err(|e| io_error(e, format!("create {dir} for project {name}")))?;
        }

        let project = self.handle(name, root);
        std::fs::create_dir_all(project.runs_dir())
            .map_err(|e| io_error(e, format!("create state for project {}", project.name)))?;
        let meta_path = project.meta_path();
        if meta_path.is_file() {
            let meta = project.meta()?;
            tracing::debug!(project = %project.name, "project already initialized");
            return Ok(Initialized {
                project,
                meta,
                created: false,
            });
        }

        let meta = ProjectMeta {
            name: project.name.clone(),
            created_at: Utc::now(),
            status: ProjectStatus::Active,
            top_module: None,
        };
        project.write_meta(&meta)?;
        tracing::info!(project = %project.name, root = %project.root.display(), "project initialized");
        Ok(Initialized {
            project,
            meta,
            created: true,
        })
    }

    fn handle(&self, name: String, root: PathBuf) -> Project {
        let state = self.root.join(STATE_DIR).join(&name);
        Project { name, root, state }
    }

    fn generate_name(&self) -> String {
        loop {
            let id = uuid::Uuid::new_v4().simple().to_string();
            let name = format!("proj-{}", &id[..8]);
            if !self.root.join(&name).exists() {
                return name;
            }
        }
    }

    /// Look up an existing project. Projects are never created implicitly.
    pub fn project(&self, name: &str) -> Result<Project, EdaError> {
        validate_project_name(name)?;
        let root = self.root.join(name);
        match std::fs::symlink_metadata(&root) {
            Ok(meta) if meta.is_dir() => Ok(self.handle(name.to_string(), root)),
            _ => Err(EdaError::not_found(format!(
                "project '{name}' (create it with initialize_project)"
            ))),
        }
    }

    /// Every project directory under the root, sorted by name.
    pub fn projects(&self) -> Result<Vec<Project>, EdaError> {
        let entries =
            std::fs::read_dir(&self.root).map_err(|e| io_error(e, "read workspace root"))?;
        let mut projects: Vec<Project> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                validate_project_name(&name).ok()?;
                Some(self.handle(name, e.path()))
            })
            .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    /// Summaries of every project.
    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>, EdaError> {
        Ok(self.projects()?.iter().map(Project::summary).collect())
    }
}

/// Handle to one existing project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    name: String,
    root: PathBuf,
    state: PathBuf,
}

impl Project {
    /// Project identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Project root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Server state directory, outside the project tree.
    pub fn state_dir(&self) -> &Path {
        &self.state
    }

    /// Directory holding the run ledger.
    pub fn runs_dir(&self) -> PathBuf {
        self.state.join("runs")
    }

    fn meta_path(&self) -> PathBuf {
        self.state.join("project.json")
    }

    /// Read the project metadata.
    ///
    /// A stored `top_module` that is not a valid identifier is dropped.
    pub fn meta(&self) -> Result<ProjectMeta, EdaError> {
        let bytes =
            std::fs::read(self.meta_path()).map_err(|e| io_error(e, "read project metadata"))?;
        let mut meta: ProjectMeta = serde_json::from_slice(&bytes).map_err(|e| {
            EdaError::Internal(anyhow::Error::new(e).context("decode project metadata"))
        })?;
        if let Some(top) = meta.top_module.as_deref() {
            if validate_identifier("top_module", top).is_err() {
                tracing::warn!(project = %self.name, "ignoring invalid top_module in project metadata");
                meta.top_module = None;
            }
        }
        Ok(meta)
    }

    fn write_meta(&self, meta: &ProjectMeta) -> Result<(), EdaError> {
        let json = serde_json::to_vec_pretty(meta)
            .map_err(|e| EdaError::Internal(anyhow::Error::new(e).context("encode project metadata")))?;
        std::fs::create_dir_all(&self.state)
            .map_err(|e| io_error(e, "create project state directory"))?;
        let tmp = self.state.join(".project.json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_error(e, "write project metadata"))?;
        std::fs::rename(&tmp, self.meta_path()).map_err(|e| io_error(e, "replace project metadata"))
    }

    /// Remember the top module of a successful synthesis.
    pub fn record_top_module(&self, top_module: &str) -> Result<(), EdaError> {
        let mut meta = self.meta()?;
        meta.top_module = Some(top_module.to_string());
        self.write_meta(&meta)
    }

    /// Write `content` to `relative`, creating parent directories.
    ///
    /// `relative` is reported as the `filename` argument on rejection.
    pub fn write_file(
        &self,
        gatekeeper: &Gatekeeper,
        relative: &str,
        content: &[u8],
        identity: &CallerIdentity,
    ) -> Result<FileEntry, EdaError> {
        let validated = gatekeeper.validate_path(&self.root, "filename", relative, identity)?;
        if validated.absolute.is_dir() {
            return Err(EdaError::invalid("filename", "names an existing directory"));
        }
        if let Some(parent) = validated.absolute.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| io_error(e, "create parent directories"))?;
        }
        std::fs::write(&validated.absolute, content)
            .map_err(|e| io_error(e, format!("write {}", validated.relative.display())))?;

        let path = slash_path(&validated.relative);
        tracing::info!(project = %self.name, path = %path, bytes = content.len(), "file written");
        Ok(FileEntry {
            path,
            size: content.len() as u64,
            modified: Some(Utc::now()),
        })
    }

    /// Resolve `relative` to an existing regular file inside the project.
    ///
    /// `field` is the tool argument `relative` came from.
    pub fn resolve_file(
        &self,
        gatekeeper: &Gatekeeper,
        field: &str,
        relative: &str,
        identity: &CallerIdentity,
    ) -> Result<ResolvedFile, EdaError> {
        let validated = gatekeeper.validate_path(&self.root, field, relative, identity)?;
        let meta = match std::fs::symlink_metadata(&validated.absolute) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EdaError::not_found(format!(
                    "file '{}' in project '{}'",
                    slash_path(&validated.relative),
                    self.name
                )))
            }
            Err(e) => return Err(io_error(e, "inspect file")),
        };
        if !meta.file_type().is_file() {
            return Err(EdaError::Forbidden {
                reason: format!("'{}' is not a regular file", slash_path(&validated.relative)),
            });
        }
        Ok(ResolvedFile {
            relative: slash_path(&validated.relative),
            absolute: validated.absolute,
            size: meta.len(),
            identity: FileIdentity::of(&meta),
        })
    }

    /// Open a file returned by [`Project::resolve_file`] for reading.
    ///
    /// Containers can rewrite the project tree at any time. The opened file
    /// must be the one that was resolved, and its canonical path must still
    /// lie inside the project; otherwise this fails with
    /// [`EdaError::PathTraversal`].
    pub fn open_file(&self, file: &ResolvedFile) -> Result<std::fs::File, EdaError> {
        let swapped = || {
            tracing::warn!(project = %self.name, path = %file.relative, "file changed between resolve and open");
            EdaError::PathTraversal {
                path: file.relative.clone(),
            }
        };
        let handle = std::fs::File::open(&file.absolute).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EdaError::not_found(format!(
                "file '{}' in project '{}'",
                file.relative, self.name
            )),
            _ => io_error(e, format!("open {}", file.relative)),
        })?;
        let opened = handle
            .metadata()
            .map_err(|e| io_error(e, "inspect opened file"))?;
        if !opened.is_file() || FileIdentity::of(&opened) != file.identity {
            return Err(swapped());
        }

        let root = self
            .root
            .canonicalize()
            .map_err(|e| io_error(e, "canonicalize project root"))?;
        let canonical = file.absolute.canonicalize().map_err(|_| swapped())?;
        let current = std::fs::metadata(&canonical).map_err(|_| swapped())?;
        if !canonical.starts_with(&root) || FileIdentity::of(&current) != file.identity {
            return Err(swapped());
        }
        Ok(handle)
    }

    /// Files in the project, minus noisy run sub-directories.
    ///
    /// Symlinks are neither followed nor listed. At most
    /// [`MAX_LISTED_FILES`] entries are returned.
    pub fn list_files(&self) -> Result<FileListing, EdaError> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !is_hidden_dir(&self.root, entry.path(), entry.file_type().is_dir()));
        for entry in walker {
            let entry = entry.map_err(|e| {
                EdaError::Internal(anyhow::Error::new(e).context("walk project directory"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let meta = entry
                .metadata()
                .map_err(|e| EdaError::Internal(anyhow::Error::new(e).context("stat project file")))?;
            files.push(FileEntry {
                path: slash_path(relative),
                size: meta.len(),
                modified: timestamp(meta.modified()),
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let omitted = files.len().saturating_sub(MAX_LISTED_FILES);
        files.truncate(MAX_LISTED_FILES);
        Ok(FileListing { files, omitted })
    }

    /// Verilog sources (`*.v`, `*.sv`) directly under `src/` or the project root.
    pub fn verilog_sources(&self) -> Result<Vec<String>, EdaError> {
        let mut sources = Vec::new();
        for dir in [self.root.join("src"), self.root.clone()] {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(e, "read source directory")),
            };
            for entry in entries.filter_map(Result::ok) {
                let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                let path = entry.path();
                let is_verilog = matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("v") | Some("sv")
                );
                if is_file && is_verilog {
                    if let Ok(relative) = path.strip_prefix(&self.root) {
                        sources.push(slash_path(relative));
                    }
                }
            }
        }
        sources.sort();
        Ok(sources)
    }

    fn summary(&self) -> ProjectSummary {
        let mut file_count = 0;
        let mut total_bytes = 0;
        let walker = WalkDir::new(&self.root).follow_links(false).into_iter();
        for entry in walker.filter_map(Result::ok) {
            if entry.file_type().is_file() {
                file_count += 1;
                total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        ProjectSummary {
            name: self.name.clone(),
            created_at: self.meta().ok().map(|m| m.created_at),
            file_count,
            total_bytes,
            has_netlist: self.root.join("reports").join("synth.v").is_file(),
        }
    }
}

fn is_hidden_dir(root: &Path, path: &Path, is_dir: bool) -> bool {
    if !is_dir {
        return false;
    }
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let parts: Vec<_> = relative.components().collect();
    match parts.as_slice() {
        [Component::Normal(runs), _, Component::Normal(sub)] => {
            *runs == "runs" && NOISY_RUN_DIRS.iter().any(|n| *sub == *n)
        }
        _ => false,
    }
}

/// Render a relative path with `/` separators.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
