//! Durable storage of a [`ContextHistory`] as a zip archive.
//!
//! The current layout:
//!
//! ```text
//! fragments-v4.json    format version + one record per distinct fragment
//! contexts.jsonl       one context record per line, oldest first
//! git_states.json      context id -> commit hash and optional diff
//! reset_edges.json     list of {source, target}
//! entry_infos.json     context id -> files the step deleted
//! content/<blake3>     zstd-compressed blobs, verified against their name
//! ```
//!
//! Writes go to a temp file that is fsynced and renamed over the target
//! while an exclusive lock is held on `<archive>.lock`. Archives in the v3
//! layout are read transparently; [`migrate_archive`] rewrites them in place.

mod legacy;
mod records;

pub use records::FormatVersion;

use crate::content_id::{ContentId, FragmentId};
use crate::content_store::{decode_blob, encode_blob, ContentStore, MAX_BLOB_SIZE};
use crate::context::{Context, ContextId, ContextParts};
use crate::error::{HistoryError, Result};
use crate::fragment::{Fragment, FragmentKind};
use crate::history::{ContextHistory, DeletedFile, EntryInfo, GitState, ResetEdge};
use crate::session::Session;
use fs2::FileExt;
use records::{
    is_composite, task_entry_record, ContextRecord, DeletedFileRecord, EntryInfoRecord, FragmentsFile,
    RecordReader, RecordWriter, CONTENT_DIR, CONTEXTS_FILE, ENTRY_INFOS_FILE, FRAGMENTS_FILE,
    GIT_STATES_FILE, RESET_EDGES_FILE,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Archive entries read into memory, by name.
pub(crate) type Entries = BTreeMap<String, Vec<u8>>;

/// Detects the layout of the archive at `path`.
pub fn archive_format(path: &Path) -> Result<FormatVersion> {
    let archive = open_archive(path)?;
    let names: BTreeSet<&str> = archive.file_names().collect();
    if names.contains(FRAGMENTS_FILE) {
        Ok(FormatVersion::V4)
    } else if names.contains(legacy::LEGACY_FRAGMENTS_FILE) {
        Ok(FormatVersion::V3)
    } else {
        Err(HistoryError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: "no fragment table found".to_string(),
        })
    }
}

/// Loads a history from `path`, in either the current or the v3 layout.
pub fn read_archive(session: &Session, path: &Path) -> Result<ContextHistory> {
    let entries = load_entries(path)?;
    if entries.contains_key(FRAGMENTS_FILE) {
        read_current(session, path, &entries)
    } else if entries.contains_key(legacy::LEGACY_FRAGMENTS_FILE) {
        legacy::read_legacy(session, path, &entries)
    } else {
        Err(HistoryError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: "no fragment table found".to_string(),
        })
    }
}

/// Writes `history` to `path` in the current layout.
pub fn write_archive(history: &ContextHistory, path: &Path) -> Result<()> {
    write_locked(history, path, None)
}

/// Upgrades a v3 archive at `path` to the current layout in place and
/// returns the loaded history.
///
/// Entries the v3 reader does not consume are copied into the new archive
/// byte for byte. An archive already in the current layout is read and left
/// untouched.
pub fn migrate_archive(session: &Session, path: &Path) -> Result<ContextHistory> {
    if archive_format(path)? == FormatVersion::CURRENT {
        debug!(path = %path.display(), "archive already current");
        return read_archive(session, path);
    }

    let entries = load_entries(path)?;
    let history = legacy::read_legacy(session, path, &entries)?;
    write_locked(&history, path, Some(path))?;
    info!(path = %path.display(), contexts = history.len(), "migrated history archive");
    Ok(history)
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    if !path.exists() {
        return Err(HistoryError::ArchiveNotFound(path.to_path_buf()));
    }
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(|e| corrupted(path, e))
}

fn load_entries(path: &Path) -> Result<Entries> {
    let mut archive = open_archive(path)?;
    let mut entries = Entries::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| corrupted(path, e))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let data = read_entry(path, &name, file.size(), &mut file)?;
        entries.insert(name, data);
    }
    Ok(entries)
}

/// Reads one entry, refusing anything past the blob size limit. The size
/// declared in the entry header only sizes the buffer.
fn read_entry(path: &Path, name: &str, declared: u64, reader: impl Read) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(entry_capacity(declared));
    let read = reader.take(MAX_BLOB_SIZE as u64 + 1).read_to_end(&mut data)?;
    if read > MAX_BLOB_SIZE {
        return Err(corrupted(path, format!("entry {} exceeds {} bytes", name, MAX_BLOB_SIZE)));
    }
    Ok(data)
}

fn entry_capacity(declared: u64) -> usize {
    usize::try_from(declared).unwrap_or(usize::MAX).min(MAX_BLOB_SIZE)
}

fn corrupted(path: &Path, reason: impl ToString) -> HistoryError {
    HistoryError::ArchiveCorrupted {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn parse_entry<T: serde::de::DeserializeOwned>(path: &Path, entries: &Entries, name: &str) -> Result<Option<T>> {
    let Some(bytes) = entries.get(name) else {
        return Ok(None);
    };
    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(|e| corrupted(path, format!("{}: {}", name, e)))
}

fn read_current(session: &Session, path: &Path, entries: &Entries) -> Result<ContextHistory> {
    let table: FragmentsFile = parse_entry(path, entries, FRAGMENTS_FILE)?
        .ok_or_else(|| corrupted(path, format!("missing {}", FRAGMENTS_FILE)))?;
    if table.version != FormatVersion::V4 {
        return Err(HistoryError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: format!("{} declares version {:?}", FRAGMENTS_FILE, table.version),
        });
    }

    let store = ContentStore::new();
    for (name, compressed) in entries.range(CONTENT_DIR.to_string()..) {
        let Some(hex) = name.strip_prefix(CONTENT_DIR) else {
            break;
        };
        let id = ContentId::from_hex(hex)?;
        store.insert(id, decode_blob(id, compressed)?)?;
    }

    let reader = RecordReader::new(session, &store);
    let mut restored: HashMap<FragmentId, Arc<Fragment>> = HashMap::new();
    let (composite, simple): (Vec<_>, Vec<_>) = table.fragments.iter().partition(|r| is_composite(r));
    for record in simple.into_iter().chain(composite) {
        let fragment = reader.fragment(record, &restored)?;
        restored.insert(record.id.clone(), fragment);
    }

    let contexts = read_contexts(session, path, entries, &reader, &restored)?;

    let git_states = parse_entry::<BTreeMap<String, GitState>>(path, entries, GIT_STATES_FILE)?
        .unwrap_or_default()
        .into_iter()
        .map(|(key, state)| Ok((context_key(path, &key)?, state)))
        .collect::<Result<HashMap<_, _>>>()?;
    let reset_edges: Vec<ResetEdge> = parse_entry(path, entries, RESET_EDGES_FILE)?.unwrap_or_default();
    let entry_infos = parse_entry::<BTreeMap<String, EntryInfoRecord>>(path, entries, ENTRY_INFOS_FILE)?
        .unwrap_or_default()
        .into_iter()
        .map(|(key, record)| {
            let deleted_files = record
                .deleted_files
                .iter()
                .map(|d| {
                    Ok(DeletedFile {
                        file: reader.file(&d.path),
                        content: reader.text(&d.content)?.to_string(),
                        was_tracked: d.was_tracked,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((context_key(path, &key)?, EntryInfo { deleted_files }))
        })
        .collect::<Result<HashMap<_, _>>>()?;

    info!(
        path = %path.display(),
        contexts = contexts.len(),
        fragments = restored.len(),
        blobs = store.len(),
        "read history archive"
    );
    ContextHistory::from_parts(contexts, reset_edges, git_states, entry_infos)
}

fn read_contexts(
    session: &Session,
    path: &Path,
    entries: &Entries,
    reader: &RecordReader<'_>,
    restored: &HashMap<FragmentId, Arc<Fragment>>,
) -> Result<Vec<Arc<Context>>> {
    let bytes = entries
        .get(CONTEXTS_FILE)
        .ok_or_else(|| corrupted(path, format!("missing {}", CONTEXTS_FILE)))?;
    let text = std::str::from_utf8(bytes).map_err(|e| corrupted(path, e))?;

    let mut contexts = Vec::new();
    for (line_no, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let record: ContextRecord = serde_json::from_str(line)
            .map_err(|e| corrupted(path, format!("{} line {}: {}", CONTEXTS_FILE, line_no + 1, e)))?;
        let owner = record.id.to_string();
        let lookup = |id: &FragmentId| {
            restored
                .get(id)
                .cloned()
                .ok_or_else(|| HistoryError::MissingFragment {
                    context: owner.clone(),
                    fragment: id.to_string(),
                })
        };

        let fragments = record.fragments.iter().map(lookup).collect::<Result<Vec<_>>>()?;
        let task_history = record
            .tasks
            .iter()
            .map(|t| reader.task_entry(t, &owner, restored))
            .collect::<Result<Vec<_>>>()?;
        let parsed_output = record.parsed_output.as_ref().map(lookup).transpose()?;

        contexts.push(Context::restore(
            session,
            record.id,
            ContextParts {
                fragments,
                task_history,
                parsed_output,
                readonly: record.readonly.into_iter().collect(),
                pinned: record.pinned.into_iter().collect(),
                action: record.action,
                group_id: record.group_id,
                group_label: record.group_label,
            },
        ));
    }
    Ok(contexts)
}

fn context_key(path: &Path, key: &str) -> Result<ContextId> {
    Uuid::parse_str(key)
        .map(ContextId::from_uuid)
        .map_err(|e| corrupted(path, format!("invalid context id {}: {}", key, e)))
}

/// Every fragment reachable from the timeline, each once.
fn collect_fragments(contexts: &[Arc<Context>]) -> BTreeMap<FragmentId, Arc<Fragment>> {
    let mut all = BTreeMap::new();
    for ctx in contexts {
        let logs = ctx.task_history().iter().filter_map(|entry| entry.log());
        for fragment in ctx.fragments().iter().chain(ctx.parsed_output()).chain(logs) {
            add_fragment(&mut all, fragment);
        }
    }

    // History fragments reference task logs that may appear nowhere else.
    let nested: Vec<Arc<Fragment>> = all
        .values()
        .filter_map(|f| match f.kind() {
            FragmentKind::History { entries } => Some(entries),
            _ => None,
        })
        .flatten()
        .filter_map(|entry| entry.log().cloned())
        .collect();
    for log in &nested {
        add_fragment(&mut all, log);
    }
    all
}

fn add_fragment(all: &mut BTreeMap<FragmentId, Arc<Fragment>>, fragment: &Arc<Fragment>) {
    all.entry(fragment.id().clone())
        .or_insert_with(|| Arc::clone(fragment));
}

fn write_locked(history: &ContextHistory, path: &Path, preserve_from: Option<&Path>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(sidecar(path, "lock"))?;
    lock.lock_exclusive()?;

    let result = write_atomic(history, path, preserve_from);
    let _ = lock.unlock();
    result
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn write_atomic(history: &ContextHistory, path: &Path, preserve_from: Option<&Path>) -> Result<()> {
    let tmp_path = sidecar(path, "tmp");
    let result = write_to(history, &tmp_path, preserve_from);
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, path)?;

    // fsync parent directory (Unix-specific for crash safety)
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir_file) = File::open(parent) {
                let _ = dir_file.sync_all();
            }
        }
    }
    Ok(())
}

fn zip_error(e: zip::result::ZipError) -> HistoryError {
    HistoryError::Serialization(format!("zip: {}", e))
}

fn json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| HistoryError::Serialization(e.to_string()))
}

fn write_to(history: &ContextHistory, tmp_path: &Path, preserve_from: Option<&Path>) -> Result<()> {
    let config = history.session().config();
    let store = ContentStore::new();
    let writer = RecordWriter::new(&store, config.history.snapshot_await_timeout());

    let contexts = history.contexts();
    let fragments = collect_fragments(&contexts)
        .values()
        .map(|f| writer.fragment(f))
        .collect::<Result<Vec<_>>>()?;
    let table = FragmentsFile {
        version: FormatVersion::CURRENT,
        fragments,
    };

    let mut lines = String::new();
    for ctx in &contexts {
        let record = ContextRecord {
            id: ctx.id(),
            action: ctx.action().to_string(),
            fragments: ctx.fragments().iter().map(|f| f.id().clone()).collect(),
            readonly: ctx.readonly_ids().iter().cloned().collect(),
            pinned: ctx.pinned_ids().iter().cloned().collect(),
            tasks: ctx.task_history().iter().map(task_entry_record).collect(),
            parsed_output: ctx.parsed_output().map(|f| f.id().clone()),
            group_id: ctx.group_id(),
            group_label: ctx.group_label().map(str::to_string),
        };
        let line = serde_json::to_string(&record).map_err(|e| HistoryError::Serialization(e.to_string()))?;
        lines.push_str(&line);
        lines.push('\n');
    }

    let git_states: BTreeMap<String, GitState> = history
        .git_states()
        .into_iter()
        .map(|(id, state)| (id.to_string(), state))
        .collect();
    let entry_infos: BTreeMap<String, EntryInfoRecord> = history
        .entry_infos()
        .into_iter()
        .map(|(id, info)| {
            let deleted_files = info
                .deleted_files
                .iter()
                .map(|d| DeletedFileRecord {
                    path: d.file.rel_display(),
                    content: writer.blob(&d.content),
                    was_tracked: d.was_tracked,
                })
                .collect();
            (id.to_string(), EntryInfoRecord { deleted_files })
        })
        .collect();

    let file = File::create(tmp_path)?;
    let mut zip = ZipWriter::new(file);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let put = |zip: &mut ZipWriter<File>, name: &str, bytes: &[u8], options: SimpleFileOptions| -> Result<()> {
        zip.start_file(name, options).map_err(zip_error)?;
        zip.write_all(bytes)?;
        Ok(())
    };
    put(&mut zip, FRAGMENTS_FILE, &json(&table)?, deflated)?;
    put(&mut zip, CONTEXTS_FILE, lines.as_bytes(), deflated)?;
    put(&mut zip, GIT_STATES_FILE, &json(&git_states)?, deflated)?;
    put(&mut zip, RESET_EDGES_FILE, &json(&history.reset_edges())?, deflated)?;
    put(&mut zip, ENTRY_INFOS_FILE, &json(&entry_infos)?, deflated)?;

    let level = config.storage.compression_level;
    for id in store.ids() {
        let data = store.get_bytes(&id)?;
        let name = format!("{}{}", CONTENT_DIR, id.as_hex());
        put(&mut zip, &name, &encode_blob(&data, level)?, stored)?;
    }

    if let Some(source) = preserve_from {
        copy_foreign_entries(&mut zip, source)?;
    }

    let file = zip.finish().map_err(zip_error)?;
    file.sync_all()?;
    debug!(
        path = %tmp_path.display(),
        contexts = contexts.len(),
        fragments = table.fragments.len(),
        blobs = store.len(),
        "wrote history archive"
    );
    Ok(())
}

/// Copies entries the v3 reader does not own, without recompressing them.
fn copy_foreign_entries(zip: &mut ZipWriter<File>, source: &Path) -> Result<()> {
    let mut archive = open_archive(source)?;
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i).map_err(|e| corrupted(source, e))?;
        let name = file.name().to_string();
        if legacy::is_legacy_entry(&name) || is_current_entry(&name) {
            continue;
        }
        debug!(entry = %name, "preserving unrelated archive entry");
        zip.raw_copy_file(file).map_err(zip_error)?;
    }
    Ok(())
}

fn is_current_entry(name: &str) -> bool {
    matches!(
        name,
        FRAGMENTS_FILE | CONTEXTS_FILE | GIT_STATES_FILE | RESET_EDGES_FILE | ENTRY_INFOS_FILE
    ) || name.starts_with(CONTENT_DIR)
}
