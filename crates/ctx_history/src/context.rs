//! Immutable workspace snapshots.
//!
//! Every "mutator" on [`Context`] takes `&Arc<Context>` and returns a new
//! `Arc<Context>` with a fresh id. Fragments are shared between contexts by
//! reference, so a new context costs one vector of handles. Operations that
//! change nothing return the receiver itself, which lets callers detect a
//! no-op with `Arc::ptr_eq`.

use crate::content_id::FragmentId;
use crate::delta::{self, ContextDelta};
use crate::fragment::{Fragment, FragmentType, SpecialTextType};
use crate::project::ProjectFile;
use crate::session::Session;
use crate::task::TaskEntry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::warn;
use uuid::Uuid;

/// Action label of a brand-new context.
pub const SESSION_START: &str = "Session Start";
/// Action label of [`Context::remove_all`].
pub const DROPPED_ALL: &str = "Dropped all Context";
/// Action label of [`Context::clear_history`].
pub const CLEARED_HISTORY: &str = "Cleared Task History";
/// Action label of [`Context::with_compressed_history`].
pub const COMPRESSED_HISTORY: &str = "Compress History";

/// Identifier of a context.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({})", &self.0.to_string()[..8])
    }
}

/// Field values of a context read back from storage.
pub(crate) struct ContextParts {
    pub(crate) fragments: Vec<Arc<Fragment>>,
    pub(crate) task_history: Vec<TaskEntry>,
    pub(crate) parsed_output: Option<Arc<Fragment>>,
    pub(crate) readonly: BTreeSet<FragmentId>,
    pub(crate) pinned: BTreeSet<FragmentId>,
    pub(crate) action: String,
    pub(crate) group_id: Option<Uuid>,
    pub(crate) group_label: Option<String>,
}

#[derive(Clone, Copy)]
enum Flag {
    Readonly,
    Pinned,
}

/// One immutable snapshot of the assistant's workspace.
pub struct Context {
    id: ContextId,
    session: Session,
    fragments: Vec<Arc<Fragment>>,
    task_history: Vec<TaskEntry>,
    parsed_output: Option<Arc<Fragment>>,
    readonly: BTreeSet<FragmentId>,
    pinned: BTreeSet<FragmentId>,
    action: String,
    group_id: Option<Uuid>,
    group_label: Option<String>,
}

impl Context {
    /// An empty context labelled "Session Start".
    pub fn new(session: &Session) -> Arc<Context> {
        Arc::new(Context {
            id: ContextId::new(),
            session: session.clone(),
            fragments: Vec::new(),
            task_history: Vec::new(),
            parsed_output: None,
            readonly: BTreeSet::new(),
            pinned: BTreeSet::new(),
            action: SESSION_START.to_string(),
            group_id: None,
            group_label: None,
        })
    }

    pub(crate) fn restore(session: &Session, id: ContextId, parts: ContextParts) -> Arc<Context> {
        let present: BTreeSet<&FragmentId> = parts.fragments.iter().map(|f| f.id()).collect();
        let readonly = parts.readonly.into_iter().filter(|id| present.contains(id)).collect();
        let pinned = parts.pinned.into_iter().filter(|id| present.contains(id)).collect();
        Arc::new(Context {
            id,
            session: session.clone(),
            fragments: parts.fragments,
            task_history: parts.task_history,
            parsed_output: parts.parsed_output,
            readonly,
            pinned,
            action: parts.action,
            group_id: parts.group_id,
            group_label: parts.group_label,
        })
    }

    /// Copy with a fresh id and a new action label.
    fn successor(&self, action: impl Into<String>) -> Context {
        Context {
            id: ContextId::new(),
            session: self.session.clone(),
            fragments: self.fragments.clone(),
            task_history: self.task_history.clone(),
            parsed_output: self.parsed_output.clone(),
            readonly: self.readonly.clone(),
            pinned: self.pinned.clone(),
            action: action.into(),
            group_id: self.group_id,
            group_label: self.group_label.clone(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn group_id(&self) -> Option<Uuid> {
        self.group_id
    }

    pub fn group_label(&self) -> Option<&str> {
        self.group_label.as_deref()
    }

    /// Fragments in insertion order.
    pub fn fragments(&self) -> &[Arc<Fragment>] {
        &self.fragments
    }

    pub fn path_fragments(&self) -> impl Iterator<Item = &Arc<Fragment>> {
        self.fragments.iter().filter(|f| f.fragment_type().is_path())
    }

    pub fn virtual_fragments(&self) -> impl Iterator<Item = &Arc<Fragment>> {
        self.fragments.iter().filter(|f| f.fragment_type().is_virtual())
    }

    pub fn task_history(&self) -> &[TaskEntry] {
        &self.task_history
    }

    pub fn parsed_output(&self) -> Option<&Arc<Fragment>> {
        self.parsed_output.as_ref()
    }

    pub fn readonly_ids(&self) -> &BTreeSet<FragmentId> {
        &self.readonly
    }

    pub fn pinned_ids(&self) -> &BTreeSet<FragmentId> {
        &self.pinned
    }

    /// No fragments and no task history.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty() && self.task_history.is_empty()
    }

    pub fn contains(&self, fragment: &Fragment) -> bool {
        self.fragments.iter().any(|f| **f == *fragment)
    }

    /// The first fragment with the same source as `fragment`.
    pub fn find_same_source(&self, fragment: &Fragment) -> Option<&Arc<Fragment>> {
        self.fragments.iter().find(|f| f.has_same_source(fragment))
    }

    pub fn fragment_by_id(&self, id: &FragmentId) -> Option<&Arc<Fragment>> {
        self.fragments.iter().find(|f| f.id() == id)
    }

    /// Read-only flag, honored only for editable fragment types.
    pub fn is_readonly(&self, fragment: &Fragment) -> bool {
        fragment.fragment_type().is_editable() && self.readonly.contains(fragment.id())
    }

    pub fn is_pinned(&self, fragment: &Fragment) -> bool {
        self.pinned.contains(fragment.id())
    }

    /// The special fragment of `kind`, if present.
    pub fn special(&self, kind: SpecialTextType) -> Option<&Arc<Fragment>> {
        self.fragments
            .iter()
            .find(|f| f.special_type() == Some(kind))
    }

    pub fn specials(&self) -> BTreeMap<SpecialTextType, Arc<Fragment>> {
        let mut out = BTreeMap::new();
        for f in &self.fragments {
            if let Some(kind) = f.special_type() {
                out.entry(kind).or_insert_with(|| Arc::clone(f));
            }
        }
        out
    }

    /// Editable fragments not flagged read-only: virtual ones first in
    /// insertion order, then project files by modification time, oldest
    /// first. Files whose modification time cannot be read are left out.
    pub fn editable_fragments(&self) -> Vec<Arc<Fragment>> {
        let editable: Vec<&Arc<Fragment>> = self
            .fragments
            .iter()
            .filter(|f| f.fragment_type().is_editable() && !self.is_readonly(f))
            .collect();

        let mut out: Vec<Arc<Fragment>> = editable
            .iter()
            .filter(|f| f.fragment_type().is_virtual())
            .map(|f| Arc::clone(f))
            .collect();

        let fs = self.session.fs();
        let mut by_mtime: Vec<(SystemTime, Arc<Fragment>)> = editable
            .iter()
            .filter_map(|f| {
                let file = f.project_file()?;
                match fs.modified(&file.abs_path()) {
                    Ok(mtime) => Some((mtime, Arc::clone(f))),
                    Err(e) => {
                        warn!(file = %file, error = %e, "skipping file without modification time");
                        None
                    }
                }
            })
            .collect();
        by_mtime.sort_by_key(|(mtime, _)| *mtime);
        out.extend(by_mtime.into_iter().map(|(_, f)| f));
        out
    }

    /// Fragments of non-editable types plus read-only flagged ones.
    pub fn readonly_fragments(&self) -> Vec<Arc<Fragment>> {
        self.fragments
            .iter()
            .filter(|f| !f.fragment_type().is_editable() || self.is_readonly(f))
            .cloned()
            .collect()
    }

    /// The aggregate history fragment, when there is task history.
    pub fn history_fragment(&self) -> Option<Arc<Fragment>> {
        if self.task_history.is_empty() {
            None
        } else {
            Some(Fragment::history(&self.session, self.task_history.clone()))
        }
    }

    /// Display order: path fragments, virtual fragments, then the history.
    pub fn all_fragments(&self) -> Vec<Arc<Fragment>> {
        self.path_fragments()
            .chain(self.virtual_fragments())
            .cloned()
            .chain(self.history_fragment())
            .collect()
    }

    /// The next free task sequence number.
    pub fn next_sequence(&self) -> u32 {
        self.task_history
            .iter()
            .map(TaskEntry::sequence)
            .max()
            .map_or(1, |s| s + 1)
    }

    /// Waits up to `timeout` in total for every fragment snapshot.
    /// Returns false if any did not resolve in time.
    pub fn await_snapshots(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut all_ready = true;
        for fragment in self.fragments.iter().chain(self.parsed_output.iter()) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let crate::memo::Awaited::TimedOut = fragment.snapshot().await_timeout(remaining) {
                warn!(fragment = %fragment.id(), context = %self.id, "snapshot not ready before timeout");
                all_ready = false;
            }
        }
        all_ready
    }

    /// Whether `file`'s content on disk differs from what this context captured.
    ///
    /// Files no fragment depends on are never stale. A captured snapshot that
    /// has not resolved yet counts as stale, as does any derived view over
    /// the file. Images compare raw bytes.
    pub fn is_file_stale(&self, file: &ProjectFile) -> bool {
        let dependents: Vec<&Arc<Fragment>> = self
            .fragments
            .iter()
            .filter(|f| f.is_dynamic() && f.files().contains(file))
            .collect();
        if dependents.is_empty() {
            return false;
        }

        let fs = self.session.fs();
        let path = file.abs_path();
        dependents.iter().any(|f| {
            let Some(snap) = f.snapshot().try_get() else {
                return true;
            };
            match f.fragment_type() {
                FragmentType::ProjectPath => {
                    let on_disk = fs.read_to_string(&path).ok();
                    snap.valid != on_disk.is_some() || on_disk.as_deref().unwrap_or("") != &*snap.text
                }
                FragmentType::ImageFile => {
                    let on_disk = fs.read_bytes(&path).ok();
                    snap.valid != on_disk.is_some() || on_disk.as_deref() != snap.image.as_deref()
                }
                _ => true,
            }
        })
    }

    /// Candidates whose source is not yet present, deduplicated among
    /// themselves. The first instance wins.
    fn novel(&self, candidates: impl IntoIterator<Item = Arc<Fragment>>) -> Vec<Arc<Fragment>> {
        let mut added: Vec<Arc<Fragment>> = Vec::new();
        for candidate in candidates {
            let duplicate = self
                .fragments
                .iter()
                .chain(added.iter())
                .any(|f| f.has_same_source(&candidate));
            if !duplicate {
                added.push(candidate);
            }
        }
        added
    }

    /// Adds fragments, skipping any whose source is already present.
    pub fn add_fragments(
        self: &Arc<Self>,
        candidates: impl IntoIterator<Item = Arc<Fragment>>,
    ) -> Arc<Context> {
        let added = self.novel(candidates);
        if added.is_empty() {
            return Arc::clone(self);
        }

        let mut next = self.successor(delta::add_label(&added));
        next.fragments.extend(added);
        Arc::new(next)
    }

    pub fn add_fragment(self: &Arc<Self>, fragment: Arc<Fragment>) -> Arc<Context> {
        self.add_fragments([fragment])
    }

    /// Removes the given fragments and any flags keyed to them.
    pub fn remove_fragments(self: &Arc<Self>, targets: &[Arc<Fragment>]) -> Arc<Context> {
        let ids: BTreeSet<FragmentId> = self
            .fragments
            .iter()
            .filter(|f| targets.iter().any(|t| **t == ***f))
            .map(|f| f.id().clone())
            .collect();
        self.remove_by_ids(&ids)
    }

    pub fn remove_by_ids(self: &Arc<Self>, ids: &BTreeSet<FragmentId>) -> Arc<Context> {
        let removed: Vec<Arc<Fragment>> = self
            .fragments
            .iter()
            .filter(|f| ids.contains(f.id()))
            .cloned()
            .collect();
        if removed.is_empty() {
            return Arc::clone(self);
        }
        Arc::new(self.without(ids, delta::remove_label(&removed)))
    }

    /// Drops every fragment that is not pinned, along with the streaming
    /// output. Task history stays.
    pub fn remove_all(self: &Arc<Self>) -> Arc<Context> {
        let ids: BTreeSet<FragmentId> = self
            .fragments
            .iter()
            .filter(|f| !self.pinned.contains(f.id()))
            .map(|f| f.id().clone())
            .collect();
        let mut next = self.without(&ids, DROPPED_ALL);
        next.parsed_output = None;
        Arc::new(next)
    }

    fn without(&self, ids: &BTreeSet<FragmentId>, action: impl Into<String>) -> Context {
        let mut next = self.successor(action);
        next.fragments.retain(|f| !ids.contains(f.id()));
        next.readonly.retain(|id| !ids.contains(id));
        next.pinned.retain(|id| !ids.contains(id));
        next
    }

    /// Sets or clears the read-only flag. Fragments not in this context are
    /// ignored. The flag is stored for any type, but only editable types
    /// observe it.
    pub fn set_readonly(self: &Arc<Self>, fragment: &Fragment, readonly: bool) -> Arc<Context> {
        let label = if readonly { "Set read-only" } else { "Set editable" };
        self.with_flag(Flag::Readonly, fragment, readonly, label)
    }

    /// Pins or unpins a fragment. Pinned fragments survive `remove_all`.
    pub fn with_pinned(self: &Arc<Self>, fragment: &Fragment, pinned: bool) -> Arc<Context> {
        let label = if pinned { "Pin" } else { "Unpin" };
        self.with_flag(Flag::Pinned, fragment, pinned, label)
    }

    fn with_flag(self: &Arc<Self>, flag: Flag, fragment: &Fragment, on: bool, label: &str) -> Arc<Context> {
        let Some(present) = self.fragments.iter().find(|f| ***f == *fragment) else {
            return Arc::clone(self);
        };
        let id = present.id().clone();
        if self.flags(flag).contains(&id) == on {
            return Arc::clone(self);
        }

        let mut next = self.successor(format!("{} {}", label, present.short_description()));
        let flags = next.flags_mut(flag);
        if on {
            flags.insert(id);
        } else {
            flags.remove(&id);
        }
        Arc::new(next)
    }

    fn flags(&self, flag: Flag) -> &BTreeSet<FragmentId> {
        match flag {
            Flag::Readonly => &self.readonly,
            Flag::Pinned => &self.pinned,
        }
    }

    fn flags_mut(&mut self, flag: Flag) -> &mut BTreeSet<FragmentId> {
        match flag {
            Flag::Readonly => &mut self.readonly,
            Flag::Pinned => &mut self.pinned,
        }
    }

    /// Replaces dynamic fragments that depend on `changed` with fresh ones.
    ///
    /// Unaffected fragments are carried over by reference. Flags move to the
    /// replacement. Returns `self` when nothing depends on the changed files.
    pub fn copy_and_refresh(
        self: &Arc<Self>,
        changed: &BTreeSet<ProjectFile>,
        action: impl Into<String>,
    ) -> Arc<Context> {
        if changed.is_empty() {
            return Arc::clone(self);
        }

        let mut next = self.successor(action);
        let mut replaced = 0usize;
        for slot in next.fragments.iter_mut() {
            if !slot.is_dynamic() || slot.files().is_disjoint(changed) {
                continue;
            }
            let fresh = slot.refresh(&self.session);
            if self.readonly.contains(slot.id()) {
                next.readonly.remove(slot.id());
                next.readonly.insert(fresh.id().clone());
            }
            if self.pinned.contains(slot.id()) {
                next.pinned.remove(slot.id());
                next.pinned.insert(fresh.id().clone());
            }
            *slot = fresh;
            replaced += 1;
        }

        if replaced == 0 {
            Arc::clone(self)
        } else {
            Arc::new(next)
        }
    }

    /// Adds `other`'s fragments with the same dedup rule as `add_fragments`.
    /// Flags of the adopted fragments come along.
    pub fn union(self: &Arc<Self>, other: &Arc<Context>) -> Arc<Context> {
        if self.fragments.is_empty() {
            return Arc::clone(other);
        }
        let added = self.novel(other.fragments.iter().cloned());
        if added.is_empty() {
            return Arc::clone(self);
        }

        let mut next = self.successor(delta::add_label(&added));
        for f in &added {
            if other.readonly.contains(f.id()) {
                next.readonly.insert(f.id().clone());
            }
            if other.pinned.contains(f.id()) {
                next.pinned.insert(f.id().clone());
            }
        }
        next.fragments.extend(added);
        Arc::new(next)
    }

    /// Replaces the "Latest Build Results" fragment. A successful build
    /// clears it; a failed one stores `output`.
    pub fn with_build_result(self: &Arc<Self>, success: bool, output: &str) -> Arc<Context> {
        let action = if success {
            "Build results cleared (success)"
        } else {
            "Build results updated (failure)"
        };
        let mut next = self.successor(action);
        next.drop_special(SpecialTextType::BuildResults);
        if !success {
            next.fragments.push(Fragment::special(
                &self.session,
                SpecialTextType::BuildResults,
                output,
            ));
        }
        Arc::new(next)
    }

    /// Sets the text of a special fragment, replacing any previous one.
    pub fn with_special(self: &Arc<Self>, kind: SpecialTextType, text: &str) -> Arc<Context> {
        if let Some(existing) = self.special(kind) {
            if &*existing.content().text == text {
                return Arc::clone(self);
            }
        }
        let mut next = self.successor(format!("Update {}", kind.description()));
        next.drop_special(kind);
        next.fragments
            .push(Fragment::special(&self.session, kind, text));
        Arc::new(next)
    }

    fn drop_special(&mut self, kind: SpecialTextType) {
        let dropped: BTreeSet<FragmentId> = self
            .fragments
            .iter()
            .filter(|f| f.special_type() == Some(kind))
            .map(|f| f.id().clone())
            .collect();
        self.fragments.retain(|f| !dropped.contains(f.id()));
        self.readonly.retain(|id| !dropped.contains(id));
        self.pinned.retain(|id| !dropped.contains(id));
    }

    /// Appends a finished task and clears the streaming output.
    pub fn add_history_entry(
        self: &Arc<Self>,
        entry: TaskEntry,
        action: impl Into<String>,
    ) -> Arc<Context> {
        let mut next = self.successor(action);
        next.task_history.push(entry);
        next.parsed_output = None;
        Arc::new(next)
    }

    pub fn clear_history(self: &Arc<Self>) -> Arc<Context> {
        let mut next = self.successor(CLEARED_HISTORY);
        next.task_history.clear();
        Arc::new(next)
    }

    /// Replaces the task history with compressed entries.
    pub fn with_compressed_history(self: &Arc<Self>, entries: Vec<TaskEntry>) -> Arc<Context> {
        let mut next = self.successor(COMPRESSED_HISTORY);
        next.task_history = entries;
        Arc::new(next)
    }

    /// Sets the task transcript currently being produced.
    pub fn with_parsed_output(
        self: &Arc<Self>,
        output: Option<Arc<Fragment>>,
        action: impl Into<String>,
    ) -> Arc<Context> {
        let mut next = self.successor(action);
        next.parsed_output = output;
        Arc::new(next)
    }

    pub fn with_action(self: &Arc<Self>, action: impl Into<String>) -> Arc<Context> {
        Arc::new(self.successor(action))
    }

    pub fn with_group(self: &Arc<Self>, group_id: Option<Uuid>, label: Option<String>) -> Arc<Context> {
        let mut next = self.successor(self.action.clone());
        next.group_id = group_id;
        next.group_label = label;
        Arc::new(next)
    }

    /// Changes from `previous` to this context. `None` means everything is new.
    pub fn delta(&self, previous: Option<&Context>) -> ContextDelta {
        ContextDelta::between(previous, self)
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("action", &self.action)
            .field("fragments", &self.fragments.len())
            .field("tasks", &self.task_history.len())
            .finish()
    }
}
