//! Fragments: the units of content a context is made of.
//!
//! [`Fragment`] is one struct over a closed [`FragmentKind`] sum. Two identity
//! regimes live side by side:
//!
//! - *Dynamic* fragments (live files, derived code views) get a numeric id from
//!   the session and compare equal only to themselves. Their snapshot is
//!   computed from current project state on the worker pool.
//! - *Content-addressed* fragments (literal text, pastes, git revisions, task
//!   transcripts) use the hash of their content as id and compare equal by id.
//!
//! Either way [`Fragment::has_same_source`] answers whether two fragments
//! describe the same origin, which is what contexts deduplicate on.

mod compute;
mod snapshot;
mod special;

pub use snapshot::{ContentSnapshot, IMAGE_PLACEHOLDER};
pub use special::SpecialTextType;

use crate::content_id::{ContentHasher, FragmentId};
use crate::memo::ComputedValue;
use crate::project::{
    syntax_for_path, CallDirection, CodeUnit, FileRef, ProjectFile, SYNTAX_MARKDOWN, SYNTAX_NONE,
};
use crate::session::{Services, Session};
use crate::task::{format_messages, ChatMessage, TaskEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Discriminant of a fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FragmentType {
    ProjectPath,
    GitFile,
    ExternalPath,
    ImageFile,
    String,
    Skeleton,
    Usage,
    Code,
    CallGraph,
    History,
    Task,
    PasteText,
    PasteImage,
    Stacktrace,
}

impl FragmentType {
    /// Backed by a file path.
    pub fn is_path(&self) -> bool {
        matches!(
            self,
            FragmentType::ProjectPath
                | FragmentType::GitFile
                | FragmentType::ExternalPath
                | FragmentType::ImageFile
        )
    }

    pub fn is_virtual(&self) -> bool {
        !self.is_path()
    }

    /// Produced by the assistant rather than the workspace.
    pub fn is_output(&self) -> bool {
        matches!(self, FragmentType::History | FragmentType::Task)
    }

    /// Eligible for edits and for the read-only flag.
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            FragmentType::ProjectPath | FragmentType::Usage | FragmentType::Code
        )
    }

    pub fn is_text(&self) -> bool {
        !matches!(self, FragmentType::ImageFile | FragmentType::PasteImage)
    }
}

/// Flavor of a summary fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SummaryType {
    /// Outline of one class (and its direct ancestors).
    CodeUnitSkeleton,
    /// Outlines of every top-level declaration in a file.
    FileSkeletons,
}

/// Variant data of a fragment.
#[derive(Clone, Debug)]
pub enum FragmentKind {
    ProjectPath {
        file: ProjectFile,
    },
    GitFile {
        file: ProjectFile,
        revision: String,
        content: Arc<str>,
    },
    ExternalPath {
        path: PathBuf,
    },
    ImageFile {
        file: FileRef,
    },
    String {
        description: String,
        text: Arc<str>,
        syntax: String,
        special: Option<SpecialTextType>,
    },
    PasteText {
        text: Arc<str>,
        syntax: String,
    },
    PasteImage {
        description: String,
        bytes: Arc<[u8]>,
    },
    Stacktrace {
        exception: String,
        original: String,
        code: String,
        sources: BTreeSet<CodeUnit>,
    },
    Usage {
        target: String,
        include_test_files: bool,
    },
    Code {
        fq_name: String,
    },
    CallGraph {
        method: String,
        depth: u32,
        direction: CallDirection,
    },
    Summary {
        target: String,
        summary_type: SummaryType,
    },
    Task {
        description: String,
        messages: Vec<ChatMessage>,
    },
    History {
        entries: Vec<TaskEntry>,
    },
}

impl FragmentKind {
    pub fn fragment_type(&self) -> FragmentType {
        match self {
            FragmentKind::ProjectPath { .. } => FragmentType::ProjectPath,
            FragmentKind::GitFile { .. } => FragmentType::GitFile,
            FragmentKind::ExternalPath { .. } => FragmentType::ExternalPath,
            FragmentKind::ImageFile { .. } => FragmentType::ImageFile,
            FragmentKind::String { .. } => FragmentType::String,
            FragmentKind::PasteText { .. } => FragmentType::PasteText,
            FragmentKind::PasteImage { .. } => FragmentType::PasteImage,
            FragmentKind::Stacktrace { .. } => FragmentType::Stacktrace,
            FragmentKind::Usage { .. } => FragmentType::Usage,
            FragmentKind::Code { .. } => FragmentType::Code,
            FragmentKind::CallGraph { .. } => FragmentType::CallGraph,
            FragmentKind::Summary { .. } => FragmentType::Skeleton,
            FragmentKind::Task { .. } => FragmentType::Task,
            FragmentKind::History { .. } => FragmentType::History,
        }
    }

    /// Whether the content is derived from live project state.
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self,
            FragmentKind::ProjectPath { .. }
                | FragmentKind::ExternalPath { .. }
                | FragmentKind::ImageFile { .. }
                | FragmentKind::Usage { .. }
                | FragmentKind::Code { .. }
                | FragmentKind::CallGraph { .. }
                | FragmentKind::Summary { .. }
        )
    }

    /// Hash of the canonical content, for content-addressed variants.
    fn content_hash(&self) -> Option<crate::content_id::ContentId> {
        let id = match self {
            FragmentKind::GitFile {
                file,
                revision,
                content,
            } => ContentHasher::new("GIT_FILE")
                .text(&file.rel_display())
                .text(revision)
                .text(content)
                .finish(),
            FragmentKind::String {
                description,
                text,
                syntax,
                ..
            } => ContentHasher::new("STRING")
                .text(description)
                .text(text)
                .text(syntax)
                .finish(),
            FragmentKind::PasteText { text, syntax } => ContentHasher::new("PASTE_TEXT")
                .text(text)
                .text(syntax)
                .finish(),
            FragmentKind::PasteImage { bytes, .. } => {
                ContentHasher::new("PASTE_IMAGE").bytes(bytes).finish()
            }
            FragmentKind::Stacktrace {
                exception,
                original,
                code,
                ..
            } => ContentHasher::new("STACKTRACE")
                .text(exception)
                .text(original)
                .text(code)
                .finish(),
            FragmentKind::Task {
                description,
                messages,
            } => ContentHasher::new("TASK")
                .text(description)
                .text(&format_messages(messages))
                .finish(),
            FragmentKind::History { entries } => {
                let mut hasher = ContentHasher::new("HISTORY");
                for entry in entries {
                    hasher = hasher
                        .text(&entry.sequence().to_string())
                        .text(entry.summary().unwrap_or(""))
                        .text(entry.log().map(|l| l.id().as_str()).unwrap_or(""));
                }
                hasher.finish()
            }
            _ => return None,
        };
        Some(id)
    }

    fn static_snapshot(&self) -> Option<ContentSnapshot> {
        let snapshot = match self {
            FragmentKind::GitFile { file, content, .. } => {
                ContentSnapshot::text(Arc::clone(content)).with_files([file.clone()])
            }
            FragmentKind::String { text, .. } | FragmentKind::PasteText { text, .. } => {
                ContentSnapshot::text(Arc::clone(text))
            }
            FragmentKind::PasteImage { bytes, .. } => ContentSnapshot::image(Some(Arc::clone(bytes))),
            FragmentKind::Stacktrace {
                original,
                code,
                sources,
                ..
            } => ContentSnapshot::text(format!(
                "{}\n\nStacktrace methods in this project:\n\n{}",
                original, code
            ))
            .with_sources(sources.iter().cloned()),
            FragmentKind::Task { messages, .. } => ContentSnapshot::text(format_messages(messages)),
            FragmentKind::History { entries } => ContentSnapshot::text(
                entries
                    .iter()
                    .map(TaskEntry::to_ai_text)
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            ),
            _ => return None,
        };
        Some(snapshot)
    }

    fn compute_snapshot(&self, services: &Services) -> ContentSnapshot {
        match self {
            FragmentKind::ProjectPath { file } => compute::project_file(services, file),
            FragmentKind::ExternalPath { path } => compute::external_file(services, path),
            FragmentKind::ImageFile { file } => compute::image_file(services, file),
            FragmentKind::Usage {
                target,
                include_test_files,
            } => compute::usages(services, target, *include_test_files),
            FragmentKind::Code { fq_name } => compute::code(services, fq_name),
            FragmentKind::CallGraph {
                method,
                depth,
                direction,
            } => compute::call_graph(services, method, *depth, *direction),
            FragmentKind::Summary {
                target,
                summary_type,
            } => compute::summary(services, target, *summary_type),
            other => other
                .static_snapshot()
                .unwrap_or_else(|| ContentSnapshot::text("").invalid()),
        }
    }

    fn static_description(&self) -> Option<String> {
        let description = match self {
            FragmentKind::ProjectPath { file } => {
                let parent = file.parent();
                if parent.is_empty() {
                    file.file_name()
                } else {
                    format!("{} [{}]", file.file_name(), parent)
                }
            }
            FragmentKind::GitFile { file, revision, .. } => {
                let short_rev: String = revision.chars().take(7).collect();
                let parent = file.parent();
                if parent.is_empty() {
                    format!("{} @{}", file.file_name(), short_rev)
                } else {
                    format!("{} @{} [{}]", file.file_name(), short_rev, parent)
                }
            }
            FragmentKind::ExternalPath { path } => path.display().to_string(),
            FragmentKind::ImageFile { file } => file.display_path(),
            FragmentKind::String { description, .. } => description.clone(),
            FragmentKind::PasteText { .. } => return None,
            FragmentKind::PasteImage { description, .. } => format!("Paste of {}", description),
            FragmentKind::Stacktrace { exception, .. } => format!("stacktrace of {}", exception),
            FragmentKind::Usage { target, .. } => format!("Uses of {}", target),
            FragmentKind::Code { fq_name } => format!("Source for {}", fq_name),
            FragmentKind::CallGraph {
                method,
                depth,
                direction,
            } => {
                let which = match direction {
                    CallDirection::Callees => "Callees",
                    CallDirection::Callers => "Callers",
                };
                format!("{} of {} (depth {})", which, method, depth)
            }
            FragmentKind::Summary { target, .. } => format!("Summary of {}", target),
            FragmentKind::Task { description, .. } => description.clone(),
            FragmentKind::History { entries } => format!("Conversation ({} thread(s))", entries.len()),
        };
        Some(description)
    }
}

/// A unit of workspace content.
///
/// Always handled as `Arc<Fragment>`; contexts share fragment instances
/// instead of copying them.
pub struct Fragment {
    id: FragmentId,
    kind: FragmentKind,
    description: ComputedValue<String>,
    snapshot: ComputedValue<Arc<ContentSnapshot>>,
}

impl Fragment {
    /// A live reference to a project file.
    pub fn project_path(session: &Session, file: ProjectFile) -> Arc<Fragment> {
        Self::create(session, FragmentKind::ProjectPath { file })
    }

    /// A file frozen at a git revision.
    pub fn git_file(
        session: &Session,
        file: ProjectFile,
        revision: impl Into<String>,
        content: impl Into<Arc<str>>,
    ) -> Arc<Fragment> {
        Self::create(
            session,
            FragmentKind::GitFile {
                file,
                revision: revision.into(),
                content: content.into(),
            },
        )
    }

    /// A live reference to a file outside the project.
    pub fn external_path(session: &Session, path: impl Into<PathBuf>) -> Arc<Fragment> {
        Self::create(session, FragmentKind::ExternalPath { path: path.into() })
    }

    pub fn image_file(session: &Session, file: FileRef) -> Arc<Fragment> {
        Self::create(session, FragmentKind::ImageFile { file })
    }

    pub fn string(
        session: &Session,
        description: impl Into<String>,
        text: impl Into<Arc<str>>,
        syntax: impl Into<String>,
    ) -> Arc<Fragment> {
        let description = description.into();
        let special = SpecialTextType::from_description(&description);
        Self::create(
            session,
            FragmentKind::String {
                description,
                text: text.into(),
                syntax: syntax.into(),
                special,
            },
        )
    }

    /// One of the singleton string fragments.
    pub fn special(session: &Session, kind: SpecialTextType, text: impl Into<Arc<str>>) -> Arc<Fragment> {
        Self::create(
            session,
            FragmentKind::String {
                description: kind.description().to_string(),
                text: text.into(),
                syntax: kind.syntax_style().to_string(),
                special: Some(kind),
            },
        )
    }

    /// Pasted text. The description is derived in the background.
    pub fn paste_text(session: &Session, text: impl Into<Arc<str>>, syntax: impl Into<String>) -> Arc<Fragment> {
        Self::create(
            session,
            FragmentKind::PasteText {
                text: text.into(),
                syntax: syntax.into(),
            },
        )
    }

    pub fn paste_image(
        session: &Session,
        description: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Arc<Fragment> {
        Self::create(
            session,
            FragmentKind::PasteImage {
                description: description.into(),
                bytes: bytes.into(),
            },
        )
    }

    pub fn stacktrace(
        session: &Session,
        exception: impl Into<String>,
        original: impl Into<String>,
        code: impl Into<String>,
        sources: impl IntoIterator<Item = CodeUnit>,
    ) -> Arc<Fragment> {
        Self::create(
            session,
            FragmentKind::Stacktrace {
                exception: exception.into(),
                original: original.into(),
                code: code.into(),
                sources: sources.into_iter().collect(),
            },
        )
    }

    pub fn usage(session: &Session, target: impl Into<String>, include_test_files: bool) -> Arc<Fragment> {
        Self::create(
            session,
            FragmentKind::Usage {
                target: target.into(),
                include_test_files,
            },
        )
    }

    pub fn code(session: &Session, fq_name: impl Into<String>) -> Arc<Fragment> {
        Self::create(
            session,
            FragmentKind::Code {
                fq_name: fq_name.into(),
            },
        )
    }

    pub fn call_graph(
        session: &Session,
        method: impl Into<String>,
        depth: u32,
        direction: CallDirection,
    ) -> Arc<Fragment> {
        Self::create(
            session,
            FragmentKind::CallGraph {
                method: method.into(),
                depth,
                direction,
            },
        )
    }

    pub fn summary(session: &Session, target: impl Into<String>, summary_type: SummaryType) -> Arc<Fragment> {
        Self::create(
            session,
            FragmentKind::Summary {
                target: target.into(),
                summary_type,
            },
        )
    }

    /// A task transcript.
    pub fn task(session: &Session, description: impl Into<String>, messages: Vec<ChatMessage>) -> Arc<Fragment> {
        Self::create(
            session,
            FragmentKind::Task {
                description: description.into(),
                messages,
            },
        )
    }

    /// The aggregate view of a context's task history.
    pub fn history(session: &Session, entries: Vec<TaskEntry>) -> Arc<Fragment> {
        Self::create(session, FragmentKind::History { entries })
    }

    fn create(session: &Session, kind: FragmentKind) -> Arc<Fragment> {
        let id = match kind.content_hash() {
            Some(hash) => FragmentId::from_content(hash),
            None => session.next_fragment_id(),
        };
        Self::assemble(session, id, kind, None)
    }

    /// Rebuilds a fragment read back from storage.
    ///
    /// `frozen` replaces the computed snapshot, so a restored dynamic fragment
    /// shows the content it had when it was saved. Numeric ids advance the
    /// session's counter past them.
    pub fn restore(
        session: &Session,
        id: FragmentId,
        kind: FragmentKind,
        frozen: Option<ContentSnapshot>,
    ) -> Arc<Fragment> {
        session.id_counter().observe(&id);
        Self::assemble(session, id, kind, frozen.map(Arc::new))
    }

    fn assemble(
        session: &Session,
        id: FragmentId,
        kind: FragmentKind,
        frozen: Option<Arc<ContentSnapshot>>,
    ) -> Arc<Fragment> {
        let name = format!("fragment-{}", id);

        let description = match kind.static_description() {
            Some(text) => ComputedValue::completed(format!("{}-description", name), text),
            None => {
                let text = match &kind {
                    FragmentKind::PasteText { text, .. } => Arc::clone(text),
                    _ => Arc::from(""),
                };
                ComputedValue::submit(format!("{}-description", name), session.pool(), move || {
                    format!("Paste of {}", compute::paste_label(&text))
                })
            }
        };

        let snapshot = match (frozen, kind.static_snapshot()) {
            (Some(frozen), _) => ComputedValue::completed(name, frozen),
            (None, Some(fixed)) => ComputedValue::completed(name, Arc::new(fixed)),
            (None, None) => {
                let services = Arc::clone(session.services());
                let task_kind = kind.clone();
                ComputedValue::submit(name, session.pool(), move || {
                    Arc::new(task_kind.compute_snapshot(&services))
                })
            }
        };

        Arc::new(Fragment {
            id,
            kind,
            description,
            snapshot,
        })
    }

    pub fn id(&self) -> &FragmentId {
        &self.id
    }

    pub fn kind(&self) -> &FragmentKind {
        &self.kind
    }

    pub fn fragment_type(&self) -> FragmentType {
        self.kind.fragment_type()
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind.is_dynamic()
    }

    pub fn is_content_addressed(&self) -> bool {
        !self.kind.is_dynamic()
    }

    pub fn is_text(&self) -> bool {
        self.fragment_type().is_text()
    }

    pub fn special_type(&self) -> Option<SpecialTextType> {
        match &self.kind {
            FragmentKind::String { special, .. } => *special,
            _ => None,
        }
    }

    /// The project file behind a `ProjectPath` fragment.
    pub fn project_file(&self) -> Option<&ProjectFile> {
        match &self.kind {
            FragmentKind::ProjectPath { file } => Some(file),
            _ => None,
        }
    }

    /// Handle to the memoized description.
    pub fn description_value(&self) -> &ComputedValue<String> {
        &self.description
    }

    /// Blocks until the description is available.
    pub fn description(&self) -> String {
        self.description
            .get()
            .unwrap_or_else(|_| "text content".to_string())
    }

    pub fn short_description(&self) -> String {
        match &self.kind {
            FragmentKind::ProjectPath { file } => file.file_name(),
            FragmentKind::GitFile { file, revision, .. } => {
                let short_rev: String = revision.chars().take(7).collect();
                format!("{} @{}", file.file_name(), short_rev)
            }
            FragmentKind::ExternalPath { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            FragmentKind::ImageFile { file } => file.file_name(),
            _ => self.description(),
        }
    }

    pub fn syntax_style(&self) -> String {
        match &self.kind {
            FragmentKind::ProjectPath { file } | FragmentKind::GitFile { file, .. } => {
                syntax_for_path(file.rel_path()).to_string()
            }
            FragmentKind::ExternalPath { path } => syntax_for_path(path).to_string(),
            FragmentKind::ImageFile { .. } | FragmentKind::PasteImage { .. } => SYNTAX_NONE.to_string(),
            FragmentKind::String { syntax, .. } | FragmentKind::PasteText { syntax, .. } => syntax.clone(),
            FragmentKind::Task { .. } | FragmentKind::History { .. } => SYNTAX_MARKDOWN.to_string(),
            FragmentKind::Stacktrace { sources, .. } => sources
                .iter()
                .next()
                .map(|u| syntax_for_path(u.source.rel_path()).to_string())
                .unwrap_or_else(|| SYNTAX_NONE.to_string()),
            FragmentKind::Usage { .. }
            | FragmentKind::Code { .. }
            | FragmentKind::CallGraph { .. }
            | FragmentKind::Summary { .. } => self
                .content()
                .files
                .iter()
                .next()
                .map(|f| syntax_for_path(f.rel_path()).to_string())
                .unwrap_or_else(|| SYNTAX_NONE.to_string()),
        }
    }

    /// Handle to the memoized snapshot.
    pub fn snapshot(&self) -> &ComputedValue<Arc<ContentSnapshot>> {
        &self.snapshot
    }

    /// Blocks until the snapshot is available. A failed computation yields an
    /// empty invalid snapshot.
    pub fn content(&self) -> Arc<ContentSnapshot> {
        self.snapshot.get().unwrap_or_else(|e| {
            warn!(fragment = %self.id, error = %e, "snapshot unavailable");
            Arc::new(ContentSnapshot::text("").invalid())
        })
    }

    pub fn text(&self) -> String {
        self.content().text.to_string()
    }

    pub fn image_bytes(&self) -> Option<Arc<[u8]>> {
        self.content().image.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.content().valid
    }

    /// Project files this fragment depends on.
    pub fn files(&self) -> BTreeSet<ProjectFile> {
        match &self.kind {
            FragmentKind::ProjectPath { file } | FragmentKind::GitFile { file, .. } => {
                BTreeSet::from([file.clone()])
            }
            FragmentKind::ImageFile { file } => file.project_file().cloned().into_iter().collect(),
            FragmentKind::ExternalPath { .. } => BTreeSet::new(),
            _ => self.content().files.clone(),
        }
    }

    pub fn sources(&self) -> BTreeSet<CodeUnit> {
        self.content().sources.clone()
    }

    /// Tool-call style rendering of a derived or file fragment, empty for
    /// literal content.
    pub fn repr(&self) -> String {
        match &self.kind {
            FragmentKind::ProjectPath { file } => format!("File(['{}'])", quote(&file.rel_display())),
            FragmentKind::ExternalPath { path } => format!("ExternalFile('{}')", quote_path(path)),
            FragmentKind::ImageFile { file } => format!("ImageFile('{}')", quote(&file.display_path())),
            FragmentKind::Usage {
                target,
                include_test_files,
            } => format!(
                "SymbolUsages('{}', includeTestFiles={})",
                quote(target),
                include_test_files
            ),
            FragmentKind::Code { fq_name } => format!("Method(['{}'])", quote(fq_name)),
            FragmentKind::CallGraph {
                method,
                depth,
                direction,
            } => format!(
                "CallGraph('{}', depth={}, direction={})",
                quote(method),
                depth,
                direction.as_str()
            ),
            FragmentKind::Summary {
                target,
                summary_type,
            } => match summary_type {
                SummaryType::CodeUnitSkeleton => format!("ClassSummary('{}')", quote(target)),
                SummaryType::FileSkeletons => format!("FileSummary('{}')", quote(target)),
            },
            _ => String::new(),
        }
    }

    /// Whether `other` describes the same origin, regardless of instance.
    pub fn has_same_source(&self, other: &Fragment) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        match (&self.kind, &other.kind) {
            (FragmentKind::ProjectPath { file: a }, FragmentKind::ProjectPath { file: b }) => a == b,
            (FragmentKind::ExternalPath { path: a }, FragmentKind::ExternalPath { path: b }) => {
                normalized(a) == normalized(b)
            }
            (FragmentKind::ImageFile { file: a }, FragmentKind::ImageFile { file: b }) => a == b,
            (
                FragmentKind::GitFile {
                    file: fa,
                    revision: ra,
                    ..
                },
                FragmentKind::GitFile {
                    file: fb,
                    revision: rb,
                    ..
                },
            ) => fa == fb && ra == rb,
            (
                FragmentKind::String {
                    description: da,
                    text: ta,
                    syntax: sa,
                    special: ka,
                },
                FragmentKind::String {
                    description: db,
                    text: tb,
                    syntax: sb,
                    special: kb,
                },
            ) => (ka.is_some() && ka == kb) || (da == db && sa == sb && ta == tb),
            (a, b) if a.is_dynamic() && b.is_dynamic() => {
                a.fragment_type() == b.fragment_type() && {
                    let repr = self.repr();
                    (!repr.is_empty() && repr == other.repr()) || self.id == other.id
                }
            }
            (a, b) => a.fragment_type() == b.fragment_type() && self.id == other.id,
        }
    }

    /// A fragment over current project state.
    ///
    /// Dynamic fragments come back as a new instance with a new id; literal
    /// content comes back unchanged.
    pub fn refresh(self: &Arc<Self>, session: &Session) -> Arc<Fragment> {
        if self.is_dynamic() {
            Self::create(session, self.kind.clone())
        } else {
            Arc::clone(self)
        }
    }
}

fn quote(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn quote_path(path: &Path) -> String {
    quote(&path.display().to_string())
}

fn normalized(path: &Path) -> PathBuf {
    path.components().collect()
}

impl PartialEq for Fragment {
    fn eq(&self, other: &Self) -> bool {
        if self.is_content_addressed() && other.is_content_addressed() {
            self.id == other.id
        } else {
            std::ptr::eq(self, other)
        }
    }
}

impl Eq for Fragment {}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.repr() {
            r if r.is_empty() => self.description.get_now_or("(pending)".to_string()),
            r => r,
        };
        write!(f, "Fragment({:?}, {:?}, {})", self.id, self.fragment_type(), label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{CodeUnitKind, TableAnalyzer};
    use std::fs;
    use tempfile::TempDir;

    fn session_with_analyzer(tmp: &TempDir) -> Session {
        let root = tmp.path().to_path_buf();
        let file = ProjectFile::new(root.clone(), "src/Foo.java");
        let base = ProjectFile::new(root.clone(), "src/Base.java");
        let foo = CodeUnit::new(CodeUnitKind::Class, "pkg.Foo", file.clone());
        let run = CodeUnit::new(CodeUnitKind::Function, "pkg.Foo.run", file.clone());
        let base_unit = CodeUnit::new(CodeUnitKind::Class, "pkg.Base", base);
        let analyzer = TableAnalyzer::new()
            .with_unit(foo, "class Foo extends Base { void run() { go(); } }", "class Foo { void run(); }")
            .with_unit(run, "void run() { go(); }", "void run();")
            .with_unit(base_unit, "class Base {}", "class Base {}")
            .with_ancestor("pkg.Foo", "pkg.Base")
            .with_usage("pkg.Foo.run", "pkg.Foo", "run();")
            .with_call("pkg.Foo.run", "pkg.Foo.go", "go();");
        Session::builder(root).analyzer(analyzer).build()
    }

    #[test]
    fn test_project_path_identity_regime() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "hello").unwrap();
        let session = Session::new(tmp.path());

        let a = Fragment::project_path(&session, session.file("a.txt"));
        let b = Fragment::project_path(&session, session.file("./a.txt"));

        assert!(a.has_same_source(&b));
        assert!(b.has_same_source(&a));
        assert_ne!(*a, *b);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.text(), "hello");
        assert!(a.is_valid());
        assert_eq!(a.repr(), "File(['a.txt'])");
        assert_eq!(a.description(), "a.txt");
    }

    #[test]
    fn test_content_addressed_regime() {
        let tmp = TempDir::new().unwrap();
        let session = Session::new(tmp.path());
        let file = session.file("src/lib.rs");

        let a = Fragment::git_file(&session, file.clone(), "abcdef123456", "fn a() {}");
        let b = Fragment::git_file(&session, file.clone(), "abcdef123456", "fn a() {}");
        let c = Fragment::git_file(&session, file, "abcdef123456", "fn b() {}");

        assert!(a.has_same_source(&b));
        assert_eq!(*a, *b);
        assert_eq!(a.id(), b.id());
        assert!(a.id().is_content_hash());
        assert_ne!(*a, *c);
        assert!(a.has_same_source(&c));
        assert_eq!(a.description(), "lib.rs @abcdef1 [src]");
    }

    #[test]
    fn test_missing_file_is_invalid_not_error() {
        let tmp = TempDir::new().unwrap();
        let session = Session::new(tmp.path());
        let f = Fragment::project_path(&session, session.file("missing.rs"));
        assert_eq!(f.text(), "");
        assert!(!f.is_valid());
    }

    #[test]
    fn test_string_same_source_rules() {
        let tmp = TempDir::new().unwrap();
        let session = Session::new(tmp.path());

        let a = Fragment::special(&session, SpecialTextType::BuildResults, "error one");
        let b = Fragment::special(&session, SpecialTextType::BuildResults, "error two");
        assert!(a.has_same_source(&b));
        assert_ne!(*a, *b);

        let c = Fragment::string(&session, "notes", "x", SYNTAX_NONE);
        let d = Fragment::string(&session, "notes", "x", SYNTAX_NONE);
        let e = Fragment::string(&session, "notes", "y", SYNTAX_NONE);
        assert!(c.has_same_source(&d));
        assert_eq!(*c, *d);
        assert!(!c.has_same_source(&e));
        assert_eq!(
            Fragment::string(&session, "Latest Build Results", "z", SYNTAX_NONE).special_type(),
            Some(SpecialTextType::BuildResults)
        );
    }

    #[test]
    fn test_paste_text_description_is_async_and_memoized() {
        let tmp = TempDir::new().unwrap();
        let session = Session::new(tmp.path());
        let paste = Fragment::paste_text(&session, "# Crash log\nline", SYNTAX_MARKDOWN);
        assert_eq!(paste.description(), "Paste of Crash log");
        assert_eq!(paste.description_value().try_get().as_deref(), Some("Paste of Crash log"));
        assert!(Arc::ptr_eq(&paste.refresh(&session), &paste));
    }

    #[test]
    fn test_derived_views_resolve_and_not_found() {
        let tmp = TempDir::new().unwrap();
        let session = session_with_analyzer(&tmp);

        let usage = Fragment::usage(&session, "pkg.Foo.run", false);
        assert!(usage.text().contains("run();"));
        assert!(usage.is_valid());
        assert_eq!(usage.description(), "Uses of pkg.Foo.run");

        let missing = Fragment::usage(&session, "pkg.Nope", false);
        assert_eq!(missing.text(), "No relevant usages found for symbol: pkg.Nope");
        assert!(!missing.is_valid());

        let code = Fragment::code(&session, "pkg.Foo.run");
        assert_eq!(code.text(), "void run() { go(); }");
        assert_eq!(code.syntax_style(), "java");
        let no_code = Fragment::code(&session, "pkg.Missing");
        assert_eq!(no_code.text(), "No source found for method/class: pkg.Missing");

        let graph = Fragment::call_graph(&session, "pkg.Foo.run", 2, CallDirection::Callees);
        assert!(graph.text().contains("-> pkg.Foo.go"));
        assert_eq!(graph.description(), "Callees of pkg.Foo.run (depth 2)");
        let no_method = Fragment::call_graph(&session, "pkg.X.y", 1, CallDirection::Callers);
        assert_eq!(no_method.text(), "Method not found: pkg.X.y");

        let summary = Fragment::summary(&session, "pkg.Foo", SummaryType::CodeUnitSkeleton);
        let text = summary.text();
        assert!(text.contains("class Foo { void run(); }"));
        assert!(text.contains("class Base {}"));
        assert_eq!(summary.repr(), "ClassSummary('pkg.Foo')");
        let no_summary = Fragment::summary(&session, "pkg.Zed", SummaryType::CodeUnitSkeleton);
        assert_eq!(no_summary.text(), "No summary found for: pkg.Zed");
    }

    #[test]
    fn test_derived_same_source_compares_parameters() {
        let tmp = TempDir::new().unwrap();
        let session = session_with_analyzer(&tmp);

        let a = Fragment::call_graph(&session, "pkg.Foo.run", 2, CallDirection::Callees);
        let b = Fragment::call_graph(&session, "pkg.Foo.run", 2, CallDirection::Callees);
        let c = Fragment::call_graph(&session, "pkg.Foo.run", 3, CallDirection::Callees);
        let d = Fragment::call_graph(&session, "pkg.Foo.run", 2, CallDirection::Callers);
        assert!(a.has_same_source(&b));
        assert!(!a.has_same_source(&c));
        assert!(!a.has_same_source(&d));

        let u1 = Fragment::usage(&session, "pkg.Foo.run", true);
        let u2 = Fragment::usage(&session, "pkg.Foo.run", false);
        assert!(!u1.has_same_source(&u2));
        assert_eq!(u1.repr(), "SymbolUsages('pkg.Foo.run', includeTestFiles=true)");

        let s1 = Fragment::summary(&session, "pkg.Foo", SummaryType::CodeUnitSkeleton);
        let s2 = Fragment::summary(&session, "pkg.Foo", SummaryType::FileSkeletons);
        assert!(!s1.has_same_source(&s2));
    }

    #[test]
    fn test_refresh_dynamic_gets_new_instance() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "one").unwrap();
        let session = Session::new(tmp.path());

        let a = Fragment::project_path(&session, session.file("a.txt"));
        assert_eq!(a.text(), "one");
        fs::write(tmp.path().join("a.txt"), "two").unwrap();

        let b = a.refresh(&session);
        assert_ne!(a.id(), b.id());
        assert!(a.has_same_source(&b));
        assert_eq!(a.text(), "one");
        assert_eq!(b.text(), "two");
    }

    #[test]
    fn test_images_are_not_text() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("logo.png"), [1u8, 2, 3]).unwrap();
        let session = Session::new(tmp.path());

        let img = Fragment::image_file(&session, FileRef::Project(session.file("logo.png")));
        assert!(!img.is_text());
        assert_eq!(img.text(), IMAGE_PLACEHOLDER);
        assert_eq!(img.image_bytes().as_deref(), Some(&[1u8, 2, 3][..]));

        let paste = Fragment::paste_image(&session, "screenshot", vec![9u8, 9]);
        let again = Fragment::paste_image(&session, "other label", vec![9u8, 9]);
        assert_eq!(*paste, *again);
        assert_eq!(paste.description(), "Paste of screenshot");
    }

    #[test]
    fn test_stacktrace_and_task_text() {
        let tmp = TempDir::new().unwrap();
        let session = Session::new(tmp.path());

        let st = Fragment::stacktrace(&session, "NullPointerException", "at Foo.run", "void run() {}", []);
        assert_eq!(
            st.text(),
            "at Foo.run\n\nStacktrace methods in this project:\n\nvoid run() {}"
        );
        assert_eq!(st.description(), "stacktrace of NullPointerException");

        let t1 = Fragment::task(&session, "Fix", vec![ChatMessage::user("go")]);
        let t2 = Fragment::task(&session, "Fix", vec![ChatMessage::user("go")]);
        assert_eq!(*t1, *t2);
        assert!(t1.fragment_type().is_output());
    }

    #[test]
    fn test_type_sets() {
        assert!(FragmentType::ProjectPath.is_path());
        assert!(FragmentType::ProjectPath.is_editable());
        assert!(FragmentType::Usage.is_virtual());
        assert!(FragmentType::Usage.is_editable());
        assert!(!FragmentType::ExternalPath.is_editable());
        assert!(!FragmentType::PasteImage.is_text());
        assert!(FragmentType::History.is_output());
    }
}
