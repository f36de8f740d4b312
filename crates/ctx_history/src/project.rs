//! Project collaborators: files, code units and the analyzer, file-system and
//! git interfaces the history core consumes.
//!
//! The core never parses code or runs git itself. Everything here is either a
//! plain value type or a trait with a small default implementation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// Syntax style used when nothing better is known.
pub const SYNTAX_NONE: &str = "none";
/// Syntax style of markdown text.
pub const SYNTAX_MARKDOWN: &str = "markdown";

/// A file inside the project, stored as root + normalized relative path.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectFile {
    root: PathBuf,
    rel_path: PathBuf,
}

impl ProjectFile {
    /// Creates a project file. `.` components are dropped and `..` pops.
    pub fn new(root: impl Into<PathBuf>, rel_path: impl AsRef<Path>) -> Self {
        Self {
            root: root.into(),
            rel_path: normalize(rel_path.as_ref()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rel_path(&self) -> &Path {
        &self.rel_path
    }

    pub fn abs_path(&self) -> PathBuf {
        self.root.join(&self.rel_path)
    }

    /// Last path component.
    pub fn file_name(&self) -> String {
        self.rel_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Parent directory relative to the root, empty at top level.
    pub fn parent(&self) -> String {
        self.rel_path
            .parent()
            .map(slash_path)
            .unwrap_or_default()
    }

    /// Relative path with `/` separators.
    pub fn rel_display(&self) -> String {
        slash_path(&self.rel_path)
    }

    pub fn extension(&self) -> Option<String> {
        self.rel_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    /// Whether the path looks like test code.
    pub fn is_test_file(&self) -> bool {
        let rel = self.rel_display();
        rel.split('/').any(|c| c == "test" || c == "tests")
            || self.file_name().contains("_test.")
            || self.file_name().contains("Test.")
    }
}

impl fmt::Display for ProjectFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rel_display())
    }
}

impl fmt::Debug for ProjectFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProjectFile({})", self.rel_display())
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    out
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Either a project file or a path outside the project.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileRef {
    Project(ProjectFile),
    External { path: PathBuf },
}

impl FileRef {
    pub fn abs_path(&self) -> PathBuf {
        match self {
            FileRef::Project(pf) => pf.abs_path(),
            FileRef::External { path } => path.clone(),
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            FileRef::Project(pf) => pf.file_name(),
            FileRef::External { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Display path: relative for project files, absolute otherwise.
    pub fn display_path(&self) -> String {
        match self {
            FileRef::Project(pf) => pf.rel_display(),
            FileRef::External { path } => path.display().to_string(),
        }
    }

    pub fn project_file(&self) -> Option<&ProjectFile> {
        match self {
            FileRef::Project(pf) => Some(pf),
            FileRef::External { .. } => None,
        }
    }
}

/// Maps a file extension to a syntax style name.
pub fn syntax_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "rs" => "rust",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" | "cxx" => "cpp",
        "cs" => "csharp",
        "md" | "markdown" => SYNTAX_MARKDOWN,
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "xml" => "xml",
        "html" | "htm" => "html",
        "sh" | "bash" => "shell",
        "sql" => "sql",
        _ => SYNTAX_NONE,
    }
}

/// Kind of a named code declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeUnitKind {
    Class,
    Function,
    Field,
    Module,
}

/// A named declaration in a source file.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CodeUnit {
    pub kind: CodeUnitKind,
    pub fq_name: String,
    pub source: ProjectFile,
}

impl CodeUnit {
    pub fn new(kind: CodeUnitKind, fq_name: impl Into<String>, source: ProjectFile) -> Self {
        Self {
            kind,
            fq_name: fq_name.into(),
            source,
        }
    }

    /// The last segment of the qualified name.
    pub fn short_name(&self) -> &str {
        self.fq_name
            .rsplit(|c: char| c == '.' || c == ':')
            .find(|s| !s.is_empty())
            .unwrap_or(&self.fq_name)
    }

    pub fn is_class(&self) -> bool {
        self.kind == CodeUnitKind::Class
    }
}

/// One place a symbol is referenced from.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UsageHit {
    /// The declaration containing the reference.
    pub enclosing: CodeUnit,
    /// Source text around the reference.
    pub snippet: String,
}

/// Direction of a call graph walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    /// Methods the root calls.
    #[serde(rename = "OUT")]
    Callees,
    /// Methods that call the root.
    #[serde(rename = "IN")]
    Callers,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Callees => "OUT",
            CallDirection::Callers => "IN",
        }
    }
}

/// One edge of a call graph.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallSite {
    /// Distance from the root method, starting at 1.
    pub depth: u32,
    pub caller: String,
    pub callee: String,
    /// The calling source line.
    pub line: String,
}

/// Language-aware code analysis.
///
/// Every method has an empty default, and "not found" is always an empty
/// result rather than an error.
pub trait Analyzer: Send + Sync {
    /// Declarations in a file.
    fn declarations(&self, _file: &ProjectFile) -> Vec<CodeUnit> {
        Vec::new()
    }

    /// Definitions of a fully-qualified name.
    fn definitions(&self, _fq_name: &str) -> Vec<CodeUnit> {
        Vec::new()
    }

    /// Source text of a declaration.
    fn source(&self, _unit: &CodeUnit) -> Option<String> {
        None
    }

    /// Signature-only outline of a declaration.
    fn skeleton(&self, _unit: &CodeUnit) -> Option<String> {
        None
    }

    /// Top-level declarations of a file.
    fn top_level_declarations(&self, file: &ProjectFile) -> Vec<CodeUnit> {
        self.declarations(file)
    }

    /// Direct supertypes of a class.
    fn direct_ancestors(&self, _unit: &CodeUnit) -> Vec<CodeUnit> {
        Vec::new()
    }

    /// References to a symbol.
    fn usages(&self, _fq_name: &str, _include_test_files: bool) -> Vec<UsageHit> {
        Vec::new()
    }

    /// Call edges reachable from `method` within `depth` hops.
    fn call_graph(&self, _method: &CodeUnit, _depth: u32, _direction: CallDirection) -> Vec<CallSite> {
        Vec::new()
    }
}

/// Analyzer that knows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAnalyzer;

impl Analyzer for NullAnalyzer {}

/// Analyzer answering from in-memory tables.
///
/// Handy for embedding with a precomputed index and for tests.
#[derive(Debug, Default, Clone)]
pub struct TableAnalyzer {
    units: BTreeMap<String, CodeUnit>,
    sources: BTreeMap<String, String>,
    skeletons: BTreeMap<String, String>,
    ancestors: BTreeMap<String, Vec<String>>,
    usages: BTreeMap<String, Vec<UsageHit>>,
    calls: Vec<(String, String, String)>,
}

impl TableAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unit(mut self, unit: CodeUnit, source: &str, skeleton: &str) -> Self {
        self.sources.insert(unit.fq_name.clone(), source.to_string());
        self.skeletons.insert(unit.fq_name.clone(), skeleton.to_string());
        self.units.insert(unit.fq_name.clone(), unit);
        self
    }

    pub fn with_ancestor(mut self, class: &str, ancestor: &str) -> Self {
        self.ancestors
            .entry(class.to_string())
            .or_default()
            .push(ancestor.to_string());
        self
    }

    pub fn with_usage(mut self, target: &str, enclosing: &str, snippet: &str) -> Self {
        if let Some(unit) = self.units.get(enclosing).cloned() {
            self.usages
                .entry(target.to_string())
                .or_default()
                .push(UsageHit {
                    enclosing: unit,
                    snippet: snippet.to_string(),
                });
        }
        self
    }

    pub fn with_call(mut self, caller: &str, callee: &str, line: &str) -> Self {
        self.calls
            .push((caller.to_string(), callee.to_string(), line.to_string()));
        self
    }
}

impl Analyzer for TableAnalyzer {
    fn declarations(&self, file: &ProjectFile) -> Vec<CodeUnit> {
        self.units
            .values()
            .filter(|u| &u.source == file)
            .cloned()
            .collect()
    }

    fn definitions(&self, fq_name: &str) -> Vec<CodeUnit> {
        self.units.get(fq_name).cloned().into_iter().collect()
    }

    fn source(&self, unit: &CodeUnit) -> Option<String> {
        self.sources.get(&unit.fq_name).cloned()
    }

    fn skeleton(&self, unit: &CodeUnit) -> Option<String> {
        self.skeletons.get(&unit.fq_name).cloned()
    }

    fn top_level_declarations(&self, file: &ProjectFile) -> Vec<CodeUnit> {
        self.declarations(file)
            .into_iter()
            .filter(|u| u.is_class())
            .collect()
    }

    fn direct_ancestors(&self, unit: &CodeUnit) -> Vec<CodeUnit> {
        self.ancestors
            .get(&unit.fq_name)
            .into_iter()
            .flatten()
            .filter_map(|name| self.units.get(name).cloned())
            .collect()
    }

    fn usages(&self, fq_name: &str, include_test_files: bool) -> Vec<UsageHit> {
        self.usages
            .get(fq_name)
            .into_iter()
            .flatten()
            .filter(|hit| include_test_files || !hit.enclosing.source.is_test_file())
            .cloned()
            .collect()
    }

    fn call_graph(&self, method: &CodeUnit, depth: u32, direction: CallDirection) -> Vec<CallSite> {
        let mut sites = Vec::new();
        let mut frontier: BTreeSet<String> = BTreeSet::from([method.fq_name.clone()]);
        let mut seen = frontier.clone();
        for level in 1..=depth {
            let mut next = BTreeSet::new();
            for (caller, callee, line) in &self.calls {
                let (from, to) = match direction {
                    CallDirection::Callees => (caller, callee),
                    CallDirection::Callers => (callee, caller),
                };
                if frontier.contains(from) {
                    sites.push(CallSite {
                        depth: level,
                        caller: caller.clone(),
                        callee: callee.clone(),
                        line: line.clone(),
                    });
                    if seen.insert(to.clone()) {
                        next.insert(to.clone());
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        sites
    }
}

/// Read/write primitives over project and external paths.
pub trait ProjectFileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>>;
    /// Writes a file, creating parent directories.
    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// [`ProjectFileSystem`] over the local disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl ProjectFileSystem for LocalFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Version-control queries.
pub trait GitProvider: Send + Sync {
    /// Hash of the checked-out commit, `None` outside a repository.
    fn current_commit(&self) -> Option<String>;

    /// Uncommitted changes as a unified diff.
    fn working_tree_diff(&self) -> Option<String> {
        None
    }

    /// Whether the file is already known to version control.
    fn is_tracked(&self, _file: &ProjectFile) -> bool {
        false
    }

    /// File content at a revision.
    fn file_at_revision(&self, _revision: &str, _file: &ProjectFile) -> Option<String> {
        None
    }
}

/// Stand-in for projects without version control.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGit;

impl GitProvider for NoGit {
    fn current_commit(&self) -> Option<String> {
        None
    }
}
