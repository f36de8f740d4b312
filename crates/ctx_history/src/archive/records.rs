//! Serialized shapes of the current archive layout and their conversion
//! to and from in-memory fragments.
//!
//! Literal text and bytes never appear inline in a record. They go to the
//! content store and the record keeps the blob's hex id, so a blob shared by
//! many fragments or contexts is written once.

use crate::content_id::{ContentId, FragmentId};
use crate::content_store::ContentStore;
use crate::context::ContextId;
use crate::error::{HistoryError, Result};
use crate::fragment::{ContentSnapshot, Fragment, FragmentKind, SpecialTextType, SummaryType};
use crate::memo::Awaited;
use crate::project::{CallDirection, CodeUnit, CodeUnitKind, FileRef, ProjectFile};
use crate::session::Session;
use crate::task::{ChatMessage, TaskEntry, TaskMeta};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

pub(crate) const FRAGMENTS_FILE: &str = "fragments-v4.json";
pub(crate) const CONTEXTS_FILE: &str = "contexts.jsonl";
pub(crate) const GIT_STATES_FILE: &str = "git_states.json";
pub(crate) const RESET_EDGES_FILE: &str = "reset_edges.json";
pub(crate) const ENTRY_INFOS_FILE: &str = "entry_infos.json";
pub(crate) const CONTENT_DIR: &str = "content/";

/// Layout version of a history archive.
#[derive(Serialize_repr, Deserialize_repr, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FormatVersion {
    /// Split fragment tables, `content/<id>.txt` and `images/<id>.png`.
    V3 = 3,
    /// Single fragment table over a hash-keyed, compressed content pool.
    V4 = 4,
}

impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion::V4;
}

#[derive(Serialize, Deserialize)]
pub(crate) struct FragmentsFile {
    pub(crate) version: FormatVersion,
    pub(crate) fragments: Vec<FragmentRecord>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct FragmentRecord {
    pub(crate) id: FragmentId,
    pub(crate) kind: KindRecord,
    /// Captured content of a dynamic fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) snapshot: Option<SnapshotRecord>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum KindRecord {
    ProjectPath {
        path: String,
    },
    GitFile {
        path: String,
        revision: String,
        content: String,
    },
    ExternalPath {
        path: PathBuf,
    },
    ImageFile {
        file: FileRefRecord,
    },
    String {
        description: String,
        text: String,
        syntax: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        special: Option<SpecialTextType>,
    },
    PasteText {
        text: String,
        syntax: String,
    },
    PasteImage {
        description: String,
        image: String,
    },
    Stacktrace {
        exception: String,
        original: String,
        code: String,
        #[serde(default)]
        sources: Vec<CodeUnitRecord>,
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
        /// Blob holding the JSON message list.
        messages: String,
    },
    History {
        entries: Vec<TaskEntryRecord>,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum FileRefRecord {
    Project { path: String },
    External { path: PathBuf },
}

#[derive(Serialize, Deserialize)]
pub(crate) struct CodeUnitRecord {
    pub(crate) kind: CodeUnitKind,
    pub(crate) fq_name: String,
    pub(crate) source: String,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct SnapshotRecord {
    pub(crate) text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) sources: Vec<CodeUnitRecord>,
    pub(crate) valid: bool,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct TaskEntryRecord {
    pub(crate) sequence: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) log: Option<FragmentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) meta: Option<TaskMeta>,
}

/// One line of `contexts.jsonl`.
#[derive(Serialize, Deserialize)]
pub(crate) struct ContextRecord {
    pub(crate) id: ContextId,
    pub(crate) action: String,
    pub(crate) fragments: Vec<FragmentId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) readonly: Vec<FragmentId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) pinned: Vec<FragmentId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) tasks: Vec<TaskEntryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) parsed_output: Option<FragmentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) group_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) group_label: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct DeletedFileRecord {
    pub(crate) path: String,
    pub(crate) content: String,
    pub(crate) was_tracked: bool,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct EntryInfoRecord {
    pub(crate) deleted_files: Vec<DeletedFileRecord>,
}

pub(crate) fn task_entry_record(entry: &TaskEntry) -> TaskEntryRecord {
    TaskEntryRecord {
        sequence: entry.sequence(),
        log: entry.log().map(|log| log.id().clone()),
        summary: entry.summary().map(str::to_string),
        meta: entry.meta().cloned(),
    }
}

fn code_unit_record(unit: &CodeUnit) -> CodeUnitRecord {
    CodeUnitRecord {
        kind: unit.kind,
        fq_name: unit.fq_name.clone(),
        source: unit.source.rel_display(),
    }
}

/// Turns fragments into records, pooling their literal content.
pub(crate) struct RecordWriter<'a> {
    store: &'a ContentStore,
    snapshot_timeout: Duration,
}

impl<'a> RecordWriter<'a> {
    pub(crate) fn new(store: &'a ContentStore, snapshot_timeout: Duration) -> Self {
        Self {
            store,
            snapshot_timeout,
        }
    }

    pub(crate) fn blob(&self, text: &str) -> String {
        self.store.put_text(text).as_hex()
    }

    fn bytes(&self, bytes: &[u8]) -> String {
        self.store.put(bytes).as_hex()
    }

    pub(crate) fn fragment(&self, fragment: &Fragment) -> Result<FragmentRecord> {
        let kind = match fragment.kind() {
            FragmentKind::ProjectPath { file } => KindRecord::ProjectPath {
                path: file.rel_display(),
            },
            FragmentKind::GitFile {
                file,
                revision,
                content,
            } => KindRecord::GitFile {
                path: file.rel_display(),
                revision: revision.clone(),
                content: self.blob(content),
            },
            FragmentKind::ExternalPath { path } => KindRecord::ExternalPath { path: path.clone() },
            FragmentKind::ImageFile { file } => KindRecord::ImageFile {
                file: match file {
                    FileRef::Project(pf) => FileRefRecord::Project {
                        path: pf.rel_display(),
                    },
                    FileRef::External { path } => FileRefRecord::External { path: path.clone() },
                },
            },
            FragmentKind::String {
                description,
                text,
                syntax,
                special,
            } => KindRecord::String {
                description: description.clone(),
                text: self.blob(text),
                syntax: syntax.clone(),
                special: *special,
            },
            FragmentKind::PasteText { text, syntax } => KindRecord::PasteText {
                text: self.blob(text),
                syntax: syntax.clone(),
            },
            FragmentKind::PasteImage { description, bytes } => KindRecord::PasteImage {
                description: description.clone(),
                image: self.bytes(bytes),
            },
            FragmentKind::Stacktrace {
                exception,
                original,
                code,
                sources,
            } => KindRecord::Stacktrace {
                exception: exception.clone(),
                original: self.blob(original),
                code: self.blob(code),
                sources: sources.iter().map(code_unit_record).collect(),
            },
            FragmentKind::Usage {
                target,
                include_test_files,
            } => KindRecord::Usage {
                target: target.clone(),
                include_test_files: *include_test_files,
            },
            FragmentKind::Code { fq_name } => KindRecord::Code {
                fq_name: fq_name.clone(),
            },
            FragmentKind::CallGraph {
                method,
                depth,
                direction,
            } => KindRecord::CallGraph {
                method: method.clone(),
                depth: *depth,
                direction: *direction,
            },
            FragmentKind::Summary {
                target,
                summary_type,
            } => KindRecord::Summary {
                target: target.clone(),
                summary_type: *summary_type,
            },
            FragmentKind::Task {
                description,
                messages,
            } => {
                let json = serde_json::to_string(messages)
                    .map_err(|e| HistoryError::Serialization(e.to_string()))?;
                KindRecord::Task {
                    description: description.clone(),
                    messages: self.blob(&json),
                }
            }
            FragmentKind::History { entries } => KindRecord::History {
                entries: entries.iter().map(task_entry_record).collect(),
            },
        };

        let snapshot = if fragment.is_dynamic() {
            self.snapshot(fragment)
        } else {
            None
        };

        Ok(FragmentRecord {
            id: fragment.id().clone(),
            kind,
            snapshot,
        })
    }

    fn snapshot(&self, fragment: &Fragment) -> Option<SnapshotRecord> {
        let snapshot = match fragment.snapshot().await_timeout(self.snapshot_timeout) {
            Awaited::Ready(snapshot) => snapshot,
            Awaited::Failed(e) => {
                warn!(fragment = %fragment.id(), error = %e, "not persisting failed snapshot");
                return None;
            }
            Awaited::TimedOut => {
                warn!(fragment = %fragment.id(), "not persisting unresolved snapshot");
                return None;
            }
        };
        Some(SnapshotRecord {
            text: self.blob(&snapshot.text),
            image: snapshot.image.as_deref().map(|bytes| self.bytes(bytes)),
            files: snapshot.files.iter().map(ProjectFile::rel_display).collect(),
            sources: snapshot.sources.iter().map(code_unit_record).collect(),
            valid: snapshot.valid,
        })
    }
}

/// Rebuilds fragments from records, resolving blobs from a loaded store.
pub(crate) struct RecordReader<'a> {
    session: &'a Session,
    store: &'a ContentStore,
}

impl<'a> RecordReader<'a> {
    pub(crate) fn new(session: &'a Session, store: &'a ContentStore) -> Self {
        Self { session, store }
    }

    pub(crate) fn text(&self, hex: &str) -> Result<Arc<str>> {
        let id = ContentId::from_hex(hex)?;
        Ok(Arc::from(self.store.get_text(&id)?))
    }

    fn bytes(&self, hex: &str) -> Result<Arc<[u8]>> {
        let id = ContentId::from_hex(hex)?;
        self.store
            .get(&id)
            .ok_or_else(|| HistoryError::ContentNotFound(id.as_hex()))
    }

    pub(crate) fn file(&self, rel: &str) -> ProjectFile {
        self.session.file(rel)
    }

    fn code_unit(&self, record: &CodeUnitRecord) -> CodeUnit {
        CodeUnit::new(record.kind, record.fq_name.clone(), self.file(&record.source))
    }

    /// Rebuilds a task entry. Its log must already be in `restored`.
    pub(crate) fn task_entry(
        &self,
        record: &TaskEntryRecord,
        owner: &str,
        restored: &HashMap<FragmentId, Arc<Fragment>>,
    ) -> Result<TaskEntry> {
        let log = match &record.log {
            Some(id) => Some(Arc::clone(restored.get(id).ok_or_else(|| {
                HistoryError::MissingFragment {
                    context: owner.to_string(),
                    fragment: id.to_string(),
                }
            })?)),
            None => None,
        };
        TaskEntry::new(record.sequence, log, record.summary.clone(), record.meta.clone())
    }

    pub(crate) fn fragment(
        &self,
        record: &FragmentRecord,
        restored: &HashMap<FragmentId, Arc<Fragment>>,
    ) -> Result<Arc<Fragment>> {
        let kind = match &record.kind {
            KindRecord::ProjectPath { path } => FragmentKind::ProjectPath {
                file: self.file(path),
            },
            KindRecord::GitFile {
                path,
                revision,
                content,
            } => FragmentKind::GitFile {
                file: self.file(path),
                revision: revision.clone(),
                content: self.text(content)?,
            },
            KindRecord::ExternalPath { path } => FragmentKind::ExternalPath { path: path.clone() },
            KindRecord::ImageFile { file } => FragmentKind::ImageFile {
                file: match file {
                    FileRefRecord::Project { path } => FileRef::Project(self.file(path)),
                    FileRefRecord::External { path } => FileRef::External { path: path.clone() },
                },
            },
            KindRecord::String {
                description,
                text,
                syntax,
                special,
            } => FragmentKind::String {
                description: description.clone(),
                text: self.text(text)?,
                syntax: syntax.clone(),
                special: *special,
            },
            KindRecord::PasteText { text, syntax } => FragmentKind::PasteText {
                text: self.text(text)?,
                syntax: syntax.clone(),
            },
            KindRecord::PasteImage { description, image } => FragmentKind::PasteImage {
                description: description.clone(),
                bytes: self.bytes(image)?,
            },
            KindRecord::Stacktrace {
                exception,
                original,
                code,
                sources,
            } => FragmentKind::Stacktrace {
                exception: exception.clone(),
                original: self.text(original)?.to_string(),
                code: self.text(code)?.to_string(),
                sources: sources.iter().map(|s| self.code_unit(s)).collect(),
            },
            KindRecord::Usage {
                target,
                include_test_files,
            } => FragmentKind::Usage {
                target: target.clone(),
                include_test_files: *include_test_files,
            },
            KindRecord::Code { fq_name } => FragmentKind::Code {
                fq_name: fq_name.clone(),
            },
            KindRecord::CallGraph {
                method,
                depth,
                direction,
            } => FragmentKind::CallGraph {
                method: method.clone(),
                depth: *depth,
                direction: *direction,
            },
            KindRecord::Summary {
                target,
                summary_type,
            } => FragmentKind::Summary {
                target: target.clone(),
                summary_type: *summary_type,
            },
            KindRecord::Task {
                description,
                messages,
            } => {
                let json = self.text(messages)?;
                let messages: Vec<ChatMessage> = serde_json::from_str(&json)
                    .map_err(|e| HistoryError::Deserialization(e.to_string()))?;
                FragmentKind::Task {
                    description: description.clone(),
                    messages,
                }
            }
            KindRecord::History { entries } => {
                let owner = format!("history {}", record.id);
                FragmentKind::History {
                    entries: entries
                        .iter()
                        .map(|e| self.task_entry(e, &owner, restored))
                        .collect::<Result<_>>()?,
                }
            }
        };

        let frozen = match &record.snapshot {
            Some(snapshot) => Some(self.snapshot(snapshot)?),
            None => None,
        };
        Ok(Fragment::restore(self.session, record.id.clone(), kind, frozen))
    }

    fn snapshot(&self, record: &SnapshotRecord) -> Result<ContentSnapshot> {
        let image = match &record.image {
            Some(hex) => Some(self.bytes(hex)?),
            None => None,
        };
        Ok(ContentSnapshot {
            text: self.text(&record.text)?,
            sources: record.sources.iter().map(|s| self.code_unit(s)).collect(),
            files: record.files.iter().map(|f| self.file(f)).collect(),
            image,
            valid: record.valid,
        })
    }
}

/// Whether a record depends on other fragments being restored first.
pub(crate) fn is_composite(record: &FragmentRecord) -> bool {
    matches!(record.kind, KindRecord::History { .. })
}
