//! Reader for the v3 archive layout.
//!
//! v3 kept three fragment tables (referenced, virtual, task), stored text as
//! `content/<id>.txt` and images as `images/<id>.png`, and split each
//! context's fragments into editable, read-only and virtual id lists. Some
//! fragments were written as frozen placeholders: an original type name, a
//! metadata map and the content captured at save time. Loading expands every
//! placeholder back into a live fragment kind; a placeholder that cannot be
//! expanded fails the whole load.

use super::Entries;
use crate::content_id::FragmentId;
use crate::context::{Context, ContextId, ContextParts};
use crate::error::{HistoryError, Result};
use crate::fragment::{ContentSnapshot, Fragment, FragmentKind, SummaryType};
use crate::history::{ContextHistory, DeletedFile, EntryInfo, GitState, ResetEdge};
use crate::project::{CallDirection, CodeUnit, CodeUnitKind, FileRef, SYNTAX_NONE};
use crate::session::Session;
use crate::task::{ChatMessage, ChatMessageType, TaskEntry};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub(crate) const LEGACY_FRAGMENTS_FILE: &str = "fragments-v3.json";
const CONTENT_DIR: &str = "content/";
const IMAGES_DIR: &str = "images/";
const CONTEXTS_FILE: &str = "contexts.jsonl";
const GIT_STATES_FILE: &str = "git_states.json";
const RESET_EDGES_FILE: &str = "reset_edges.json";
const ENTRY_INFOS_FILE: &str = "entry_infos.json";

/// Original type of build output fragments, which are no longer kept.
const DEPRECATED_BUILD_LOG: &str = "BUILD_LOG";

/// Whether the v3 reader consumes `name`. Everything else is carried over
/// untouched when a v3 archive is rewritten.
pub(crate) fn is_legacy_entry(name: &str) -> bool {
    matches!(
        name,
        LEGACY_FRAGMENTS_FILE | CONTEXTS_FILE | GIT_STATES_FILE | RESET_EDGES_FILE | ENTRY_INFOS_FILE
    ) || (name.starts_with(CONTENT_DIR) && name.ends_with(".txt"))
        || name.starts_with(IMAGES_DIR)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyFragments {
    version: u32,
    #[serde(default)]
    referenced: BTreeMap<String, LegacyReferenced>,
    #[serde(default, rename = "virtual")]
    virtuals: BTreeMap<String, LegacyVirtual>,
    #[serde(default)]
    task: BTreeMap<String, LegacyTask>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
enum LegacyReferenced {
    ProjectFile {
        rel_path: String,
    },
    ExternalFile {
        abs_path: PathBuf,
    },
    ImageFile {
        #[serde(default)]
        rel_path: Option<String>,
        #[serde(default)]
        abs_path: Option<PathBuf>,
    },
    GitFile {
        rel_path: String,
        revision: String,
        content_id: String,
    },
    Frozen(LegacyFrozen),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
enum LegacyVirtual {
    String {
        description: String,
        content_id: String,
        #[serde(default)]
        syntax: Option<String>,
    },
    PasteText {
        content_id: String,
        #[serde(default)]
        syntax: Option<String>,
    },
    PasteImage {
        description: String,
    },
    Stacktrace {
        exception: String,
        original_id: String,
        code_id: String,
        #[serde(default)]
        sources: Vec<LegacyCodeUnit>,
    },
    Usage {
        target_identifier: String,
        #[serde(default)]
        include_test_files: bool,
    },
    Code {
        fq_name: String,
    },
    CallGraph {
        method_name: String,
        depth: u32,
        is_callee_graph: bool,
    },
    Skeleton {
        target_identifiers: Vec<String>,
        summary_type: LegacySummaryType,
    },
    History {
        entries: Vec<LegacyTaskEntry>,
    },
    Frozen(LegacyFrozen),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyFrozen {
    original_type: String,
    #[serde(default)]
    content_id: Option<String>,
    #[serde(default = "default_true")]
    is_text: bool,
    #[serde(default)]
    meta: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum LegacySummaryType {
    ClassSkeleton,
    CodeunitSkeleton,
    FileSkeletons,
}

impl LegacySummaryType {
    fn upgrade(self) -> SummaryType {
        match self {
            LegacySummaryType::ClassSkeleton | LegacySummaryType::CodeunitSkeleton => {
                SummaryType::CodeUnitSkeleton
            }
            LegacySummaryType::FileSkeletons => SummaryType::FileSkeletons,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "CLASS_SKELETON" => Some(LegacySummaryType::ClassSkeleton),
            "CODEUNIT_SKELETON" => Some(LegacySummaryType::CodeunitSkeleton),
            "FILE_SKELETONS" => Some(LegacySummaryType::FileSkeletons),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyCodeUnit {
    kind: CodeUnitKind,
    fq_name: String,
    rel_path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyTask {
    description: String,
    messages: Vec<LegacyMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMessage {
    role: ChatMessageType,
    content_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyTaskEntry {
    sequence: u32,
    #[serde(default)]
    log_id: Option<String>,
    #[serde(default)]
    summary_content_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyContext {
    id: Uuid,
    #[serde(default)]
    editable: Vec<String>,
    #[serde(default)]
    readonly: Vec<String>,
    #[serde(default)]
    virtuals: Vec<String>,
    #[serde(default)]
    tasks: Vec<LegacyTaskEntry>,
    #[serde(default)]
    parsed_output_id: Option<String>,
    #[serde(default)]
    action: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyGitState {
    commit_hash: String,
    #[serde(default)]
    diff_content_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyEdge {
    source_id: Uuid,
    target_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyEntryInfo {
    deleted_files: Vec<LegacyDeletedFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyDeletedFile {
    rel_path: String,
    content_id: String,
    was_tracked: bool,
}

/// State of one v3 load.
struct LegacyReader<'a> {
    session: &'a Session,
    path: &'a Path,
    entries: &'a Entries,
    tables: LegacyFragments,
    /// Old id to its replacement(s). A multi-target skeleton maps to one
    /// fragment per target; a dropped fragment maps to nothing.
    resolved: HashMap<String, Vec<Arc<Fragment>>>,
    unexpanded: BTreeSet<String>,
}

/// Reads a v3 archive already loaded into memory.
pub(crate) fn read_legacy(session: &Session, path: &Path, entries: &Entries) -> Result<ContextHistory> {
    let tables: LegacyFragments = parse_json(path, entries, LEGACY_FRAGMENTS_FILE)?.ok_or_else(|| {
        HistoryError::ArchiveCorrupted {
            path: path.to_path_buf(),
            reason: format!("missing {}", LEGACY_FRAGMENTS_FILE),
        }
    })?;
    if tables.version != 3 {
        return Err(HistoryError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: format!("legacy fragment table version {}", tables.version),
        });
    }

    let mut reader = LegacyReader {
        session,
        path,
        entries,
        tables,
        resolved: HashMap::new(),
        unexpanded: BTreeSet::new(),
    };
    reader.resolve_all()?;
    if !reader.unexpanded.is_empty() {
        return Err(HistoryError::UnexpandedPlaceholders {
            ids: reader.unexpanded.into_iter().collect(),
        });
    }

    let contexts = reader.contexts()?;
    let git_states = reader.git_states()?;
    let entry_infos = reader.entry_infos()?;
    let reset_edges: Vec<ResetEdge> = parse_json::<Vec<LegacyEdge>>(path, entries, RESET_EDGES_FILE)?
        .unwrap_or_default()
        .into_iter()
        .map(|e| ResetEdge {
            source: ContextId::from_uuid(e.source_id),
            target: ContextId::from_uuid(e.target_id),
        })
        .collect();

    info!(
        path = %path.display(),
        contexts = contexts.len(),
        fragments = reader.resolved.len(),
        "read legacy history archive"
    );
    ContextHistory::from_parts(contexts, reset_edges, git_states, entry_infos)
}

impl<'a> LegacyReader<'a> {
    fn text(&self, content_id: &str) -> Result<String> {
        let name = format!("{}{}.txt", CONTENT_DIR, content_id);
        let bytes = self
            .entries
            .get(&name)
            .ok_or_else(|| HistoryError::ContentNotFound(content_id.to_string()))?;
        String::from_utf8(bytes.clone()).map_err(|e| self.corrupted(format!("{} is not UTF-8: {}", name, e)))
    }

    fn image(&self, id: &str) -> Option<Arc<[u8]>> {
        self.entries
            .iter()
            .find(|(name, _)| {
                name.strip_prefix(IMAGES_DIR)
                    .map(|rest| rest.split('.').next() == Some(id))
                    .unwrap_or(false)
            })
            .map(|(_, bytes)| Arc::from(bytes.as_slice()))
    }

    fn corrupted(&self, reason: String) -> HistoryError {
        HistoryError::ArchiveCorrupted {
            path: self.path.to_path_buf(),
            reason,
        }
    }

    /// A dynamic fragment with a freshly allocated id.
    fn dynamic(&self, kind: FragmentKind, frozen: Option<ContentSnapshot>) -> Arc<Fragment> {
        Fragment::restore(self.session, self.session.next_fragment_id(), kind, frozen)
    }

    fn resolve_all(&mut self) -> Result<()> {
        // Task transcripts first: history fragments point at them.
        let task_ids: Vec<String> = self.tables.task.keys().cloned().collect();
        for id in task_ids {
            let fragment = self.task(&id)?;
            self.resolved.insert(id, vec![fragment]);
        }

        let referenced_ids: Vec<String> = self.tables.referenced.keys().cloned().collect();
        for id in referenced_ids {
            let fragments = self.referenced(&id)?;
            self.settle(id, fragments);
        }

        let virtual_ids: Vec<String> = self.tables.virtuals.keys().cloned().collect();
        for id in virtual_ids {
            let fragments = self.virtual_fragment(&id)?;
            self.settle(id, fragments);
        }
        Ok(())
    }

    fn settle(&mut self, id: String, fragments: Option<Vec<Arc<Fragment>>>) {
        match fragments {
            Some(fragments) => {
                self.resolved.insert(id, fragments);
            }
            None => {
                self.unexpanded.insert(id);
            }
        }
    }

    fn task(&self, id: &str) -> Result<Arc<Fragment>> {
        let dto = &self.tables.task[id];
        let messages = dto
            .messages
            .iter()
            .map(|m| Ok(ChatMessage::new(m.role, self.text(&m.content_id)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Fragment::task(self.session, dto.description.clone(), messages))
    }

    /// `None` marks a placeholder that cannot be expanded.
    fn referenced(&self, id: &str) -> Result<Option<Vec<Arc<Fragment>>>> {
        let fragment = match &self.tables.referenced[id] {
            LegacyReferenced::ProjectFile { rel_path } => self.dynamic(
                FragmentKind::ProjectPath {
                    file: self.session.file(rel_path),
                },
                None,
            ),
            LegacyReferenced::ExternalFile { abs_path } => self.dynamic(
                FragmentKind::ExternalPath {
                    path: abs_path.clone(),
                },
                None,
            ),
            LegacyReferenced::ImageFile { rel_path, abs_path } => {
                let Some(file) = self.file_ref(rel_path.as_deref(), abs_path.as_deref()) else {
                    return Err(self.corrupted(format!("image fragment {} has no path", id)));
                };
                self.dynamic(FragmentKind::ImageFile { file }, None)
            }
            LegacyReferenced::GitFile {
                rel_path,
                revision,
                content_id,
            } => Fragment::git_file(
                self.session,
                self.session.file(rel_path),
                revision.clone(),
                self.text(content_id)?,
            ),
            LegacyReferenced::Frozen(frozen) => return self.expand(id, frozen),
        };
        Ok(Some(vec![fragment]))
    }

    fn virtual_fragment(&self, id: &str) -> Result<Option<Vec<Arc<Fragment>>>> {
        let session = self.session;
        let fragment = match &self.tables.virtuals[id] {
            LegacyVirtual::String {
                description,
                content_id,
                syntax,
            } => Fragment::string(
                session,
                description.clone(),
                self.text(content_id)?,
                syntax.clone().unwrap_or_else(|| SYNTAX_NONE.to_string()),
            ),
            LegacyVirtual::PasteText { content_id, syntax } => Fragment::paste_text(
                session,
                self.text(content_id)?,
                syntax.clone().unwrap_or_else(|| SYNTAX_NONE.to_string()),
            ),
            LegacyVirtual::PasteImage { description } => {
                let bytes = self
                    .image(id)
                    .ok_or_else(|| HistoryError::ContentNotFound(format!("{}{}.png", IMAGES_DIR, id)))?;
                Fragment::paste_image(session, description.clone(), bytes)
            }
            LegacyVirtual::Stacktrace {
                exception,
                original_id,
                code_id,
                sources,
            } => Fragment::stacktrace(
                session,
                exception.clone(),
                self.text(original_id)?,
                self.text(code_id)?,
                sources
                    .iter()
                    .map(|u| CodeUnit::new(u.kind, u.fq_name.clone(), session.file(&u.rel_path)))
                    .collect::<Vec<_>>(),
            ),
            LegacyVirtual::Usage {
                target_identifier,
                include_test_files,
            } => Fragment::usage(session, target_identifier.clone(), *include_test_files),
            LegacyVirtual::Code { fq_name } => Fragment::code(session, fq_name.clone()),
            LegacyVirtual::CallGraph {
                method_name,
                depth,
                is_callee_graph,
            } => Fragment::call_graph(session, method_name.clone(), *depth, direction(*is_callee_graph)),
            LegacyVirtual::Skeleton {
                target_identifiers,
                summary_type,
            } => {
                let summary_type = summary_type.upgrade();
                if target_identifiers.len() > 1 {
                    debug!(fragment = id, targets = target_identifiers.len(), "splitting multi-target skeleton");
                }
                return Ok(Some(
                    target_identifiers
                        .iter()
                        .map(|target| Fragment::summary(session, target.clone(), summary_type))
                        .collect(),
                ));
            }
            LegacyVirtual::History { entries } => {
                let entries = entries
                    .iter()
                    .map(|e| self.task_entry(e, &format!("history {}", id)))
                    .collect::<Result<Vec<_>>>()?;
                Fragment::history(session, entries)
            }
            LegacyVirtual::Frozen(frozen) => return self.expand(id, frozen),
        };
        Ok(Some(vec![fragment]))
    }

    fn file_ref(&self, rel_path: Option<&str>, abs_path: Option<&Path>) -> Option<FileRef> {
        match (rel_path, abs_path) {
            (Some(rel), _) => Some(FileRef::Project(self.session.file(rel))),
            (None, Some(abs)) => Some(FileRef::External {
                path: abs.to_path_buf(),
            }),
            (None, None) => None,
        }
    }

    /// Turns a frozen placeholder back into the fragment it stood for. The
    /// captured content becomes the restored fragment's snapshot.
    fn expand(&self, id: &str, frozen: &LegacyFrozen) -> Result<Option<Vec<Arc<Fragment>>>> {
        if frozen.original_type == DEPRECATED_BUILD_LOG {
            info!(fragment = id, "dropping deprecated build log fragment");
            return Ok(Some(Vec::new()));
        }

        let meta = |key: &str| frozen.meta.get(key).map(String::as_str);
        let captured = match (&frozen.content_id, frozen.is_text) {
            (Some(content_id), true) => Some(ContentSnapshot::text(self.text(content_id)?)),
            (_, false) => Some(ContentSnapshot::image(self.image(id))),
            (None, true) => None,
        };

        let expanded: Option<Vec<Arc<Fragment>>> = match frozen.original_type.as_str() {
            "PROJECT_PATH" => meta("relPath").map(|rel| {
                let file = self.session.file(rel);
                let captured = captured.map(|s| s.with_files([file.clone()]));
                vec![self.dynamic(FragmentKind::ProjectPath { file }, captured)]
            }),
            "EXTERNAL_PATH" => meta("absPath").map(|abs| {
                vec![self.dynamic(
                    FragmentKind::ExternalPath {
                        path: PathBuf::from(abs),
                    },
                    captured,
                )]
            }),
            "IMAGE_FILE" => self
                .file_ref(meta("relPath"), meta("absPath").map(Path::new))
                .map(|file| vec![self.dynamic(FragmentKind::ImageFile { file }, captured)]),
            "GIT_FILE" => match (meta("relPath"), meta("revision"), captured) {
                (Some(rel), Some(revision), Some(snapshot)) => Some(vec![Fragment::git_file(
                    self.session,
                    self.session.file(rel),
                    revision.to_string(),
                    snapshot.text.to_string(),
                )]),
                _ => None,
            },
            "USAGE" => meta("targetIdentifier").map(|target| {
                let include_test_files = meta("includeTestFiles") == Some("true");
                vec![self.dynamic(
                    FragmentKind::Usage {
                        target: target.to_string(),
                        include_test_files,
                    },
                    captured,
                )]
            }),
            "CODE" => meta("fqName").map(|fq_name| {
                vec![self.dynamic(
                    FragmentKind::Code {
                        fq_name: fq_name.to_string(),
                    },
                    captured,
                )]
            }),
            "CALL_GRAPH" => match (
                meta("methodName"),
                meta("depth").and_then(|d| d.parse::<u32>().ok()),
            ) {
                (Some(method), Some(depth)) => Some(vec![self.dynamic(
                    FragmentKind::CallGraph {
                        method: method.to_string(),
                        depth,
                        direction: direction(meta("isCalleeGraph") == Some("true")),
                    },
                    captured,
                )]),
                _ => None,
            },
            "SKELETON" => match (
                meta("targetIdentifiers"),
                meta("summaryType").and_then(LegacySummaryType::parse),
            ) {
                (Some(targets), Some(summary_type)) => {
                    let targets: Vec<&str> = targets.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
                    // Captured text covers every target at once, so only a
                    // single-target skeleton keeps it.
                    let captured = if targets.len() == 1 { captured } else { None };
                    Some(
                        targets
                            .iter()
                            .map(|target| {
                                self.dynamic(
                                    FragmentKind::Summary {
                                        target: target.to_string(),
                                        summary_type: summary_type.upgrade(),
                                    },
                                    captured.clone(),
                                )
                            })
                            .collect(),
                    )
                }
                _ => None,
            },
            _ => None,
        };

        Ok(expanded.filter(|fragments| !fragments.is_empty()))
    }

    fn task_entry(&self, dto: &LegacyTaskEntry, owner: &str) -> Result<TaskEntry> {
        let log = match &dto.log_id {
            Some(log_id) => Some(self.single(log_id, owner)?),
            None => None,
        };
        let summary = match &dto.summary_content_id {
            Some(content_id) => Some(self.text(content_id)?),
            None => None,
        };
        TaskEntry::new(dto.sequence, log, summary, None)
    }

    fn lookup(&self, id: &str, owner: &str) -> Result<&[Arc<Fragment>]> {
        self.resolved
            .get(id)
            .map(Vec::as_slice)
            .ok_or_else(|| HistoryError::MissingFragment {
                context: owner.to_string(),
                fragment: id.to_string(),
            })
    }

    fn single(&self, id: &str, owner: &str) -> Result<Arc<Fragment>> {
        self.lookup(id, owner)?
            .first()
            .cloned()
            .ok_or_else(|| HistoryError::MissingFragment {
                context: owner.to_string(),
                fragment: id.to_string(),
            })
    }

    fn contexts(&self) -> Result<Vec<Arc<Context>>> {
        let Some(bytes) = self.entries.get(CONTEXTS_FILE) else {
            return Err(self.corrupted(format!("missing {}", CONTEXTS_FILE)));
        };
        let text = std::str::from_utf8(bytes).map_err(|e| self.corrupted(e.to_string()))?;

        let mut contexts = Vec::new();
        for (line_no, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            let dto: LegacyContext = serde_json::from_str(line)
                .map_err(|e| self.corrupted(format!("{} line {}: {}", CONTEXTS_FILE, line_no + 1, e)))?;
            let owner = dto.id.to_string();

            let mut fragments: Vec<Arc<Fragment>> = Vec::new();
            let mut readonly: BTreeSet<FragmentId> = BTreeSet::new();
            for id in dto.editable.iter().chain(&dto.virtuals) {
                fragments.extend(self.lookup(id, &owner)?.iter().cloned());
            }
            for id in &dto.readonly {
                for fragment in self.lookup(id, &owner)? {
                    readonly.insert(fragment.id().clone());
                    fragments.push(Arc::clone(fragment));
                }
            }

            let task_history = dto
                .tasks
                .iter()
                .map(|t| self.task_entry(t, &owner))
                .collect::<Result<Vec<_>>>()?;
            let parsed_output = match &dto.parsed_output_id {
                Some(id) => Some(self.single(id, &owner)?),
                None => None,
            };

            contexts.push(Context::restore(
                self.session,
                ContextId::from_uuid(dto.id),
                ContextParts {
                    fragments,
                    task_history,
                    parsed_output,
                    readonly,
                    pinned: BTreeSet::new(),
                    action: dto.action,
                    group_id: None,
                    group_label: None,
                },
            ));
        }
        Ok(contexts)
    }

    fn git_states(&self) -> Result<HashMap<ContextId, GitState>> {
        let raw: BTreeMap<String, LegacyGitState> =
            parse_json(self.path, self.entries, GIT_STATES_FILE)?.unwrap_or_default();
        raw.into_iter()
            .map(|(key, dto)| {
                let diff = match &dto.diff_content_id {
                    Some(content_id) => Some(self.text(content_id)?),
                    None => None,
                };
                Ok((
                    self.context_key(&key)?,
                    GitState {
                        commit_hash: dto.commit_hash,
                        diff,
                    },
                ))
            })
            .collect()
    }

    fn entry_infos(&self) -> Result<HashMap<ContextId, EntryInfo>> {
        let raw: BTreeMap<String, LegacyEntryInfo> =
            parse_json(self.path, self.entries, ENTRY_INFOS_FILE)?.unwrap_or_default();
        raw.into_iter()
            .map(|(key, dto)| {
                let deleted_files = dto
                    .deleted_files
                    .iter()
                    .map(|d| {
                        Ok(DeletedFile {
                            file: self.session.file(&d.rel_path),
                            content: self.text(&d.content_id)?,
                            was_tracked: d.was_tracked,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((self.context_key(&key)?, EntryInfo { deleted_files }))
            })
            .collect()
    }

    fn context_key(&self, key: &str) -> Result<ContextId> {
        Uuid::parse_str(key)
            .map(ContextId::from_uuid)
            .map_err(|e| self.corrupted(format!("invalid context id {}: {}", key, e)))
    }
}

fn direction(is_callee_graph: bool) -> CallDirection {
    if is_callee_graph {
        CallDirection::Callees
    } else {
        CallDirection::Callers
    }
}

fn parse_json<T: DeserializeOwned>(path: &Path, entries: &Entries, name: &str) -> Result<Option<T>> {
    let Some(bytes) = entries.get(name) else {
        return Ok(None);
    };
    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(|e| HistoryError::ArchiveCorrupted {
            path: path.to_path_buf(),
            reason: format!("{}: {}", name, e),
        })
}
