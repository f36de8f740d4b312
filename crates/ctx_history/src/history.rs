//! The versioned timeline of contexts.
//!
//! [`ContextHistory`] is a mutable pointer over immutable [`Context`]
//! values: a timeline whose last entry is the live context, a redo stack,
//! and per-context bookkeeping (git state, deleted files, reset edges).
//! All state sits behind one lock, so each public operation is atomic.
//! Undo and redo also rewrite files on disk; callers should drive them
//! from a single thread.

use crate::context::{Context, ContextId};
use crate::delta::LOAD_EXTERNAL_CHANGES;
use crate::diff::DiffService;
use crate::error::{HistoryError, Result};
use crate::memo::Awaited;
use crate::project::ProjectFile;
use crate::session::Session;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A recorded jump between two points in history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResetEdge {
    pub source: ContextId,
    pub target: ContextId,
}

/// Version-control state captured alongside a context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitState {
    pub commit_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// A file the step that produced a context deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletedFile {
    pub file: ProjectFile,
    /// Content before deletion, written back on undo.
    pub content: String,
    pub was_tracked: bool,
}

/// Side effects of the step that produced a context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryInfo {
    pub deleted_files: Vec<DeletedFile>,
}

/// Outcome of an undo. Exhausting the timeline is not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UndoResult {
    pub was_undone: bool,
    pub steps: usize,
}

impl UndoResult {
    pub fn none() -> Self {
        Self {
            was_undone: false,
            steps: 0,
        }
    }

    pub fn success(steps: usize) -> Self {
        Self {
            was_undone: true,
            steps,
        }
    }
}

pub(crate) type SharedTimeline = Arc<Mutex<Timeline>>;

pub(crate) struct Timeline {
    contexts: VecDeque<Arc<Context>>,
    redo: Vec<Arc<Context>>,
    reset_edges: Vec<ResetEdge>,
    git_states: HashMap<ContextId, GitState>,
    entry_infos: HashMap<ContextId, EntryInfo>,
    selected: Option<ContextId>,
}

impl Timeline {
    pub(crate) fn previous_of(&self, id: ContextId) -> Option<Arc<Context>> {
        let idx = self.index_of(id)?;
        idx.checked_sub(1).and_then(|i| self.contexts.get(i)).cloned()
    }

    fn index_of(&self, id: ContextId) -> Option<usize> {
        self.contexts.iter().position(|c| c.id() == id)
    }

    fn ids(&self) -> HashSet<ContextId> {
        self.contexts.iter().map(|c| c.id()).collect()
    }

    /// The live context. The timeline is never empty.
    fn top(&self) -> &Arc<Context> {
        &self.contexts[self.contexts.len() - 1]
    }
}

/// Undo/redo timeline of contexts plus its diff cache.
pub struct ContextHistory {
    session: Session,
    timeline: SharedTimeline,
    diff: DiffService,
}

impl ContextHistory {
    /// A history whose only entry is `initial`.
    pub fn new(initial: Arc<Context>) -> Self {
        await_capture(&initial);
        let session = initial.session().clone();
        let selected = Some(initial.id());
        Self::assemble(
            session,
            Timeline {
                contexts: VecDeque::from([initial]),
                redo: Vec::new(),
                reset_edges: Vec::new(),
                git_states: HashMap::new(),
                entry_infos: HashMap::new(),
                selected,
            },
        )
    }

    /// Rebuilds a history from stored parts, oldest context first.
    pub fn from_parts(
        contexts: Vec<Arc<Context>>,
        reset_edges: Vec<ResetEdge>,
        git_states: HashMap<ContextId, GitState>,
        entry_infos: HashMap<ContextId, EntryInfo>,
    ) -> Result<Self> {
        let Some(last) = contexts.last() else {
            return Err(HistoryError::EmptyHistory);
        };
        let session = last.session().clone();
        let selected = Some(last.id());
        Ok(Self::assemble(
            session,
            Timeline {
                contexts: contexts.into(),
                redo: Vec::new(),
                reset_edges,
                git_states,
                entry_infos,
                selected,
            },
        ))
    }

    fn assemble(session: Session, timeline: Timeline) -> Self {
        let timeline = Arc::new(Mutex::new(timeline));
        let diff = DiffService::new(Arc::clone(&timeline));
        Self {
            session,
            timeline,
            diff,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn diff_service(&self) -> &DiffService {
        &self.diff
    }

    /// The live context.
    pub fn live(&self) -> Arc<Context> {
        Arc::clone(self.timeline.lock().top())
    }

    /// Contexts, oldest first.
    pub fn contexts(&self) -> Vec<Arc<Context>> {
        self.timeline.lock().contexts.iter().cloned().collect()
    }

    /// Undone contexts, the next one to redo last.
    pub fn redo_contexts(&self) -> Vec<Arc<Context>> {
        self.timeline.lock().redo.clone()
    }

    pub fn len(&self) -> usize {
        self.timeline.lock().contexts.len()
    }

    /// Always false; a history holds at least one context.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn has_undo_states(&self) -> bool {
        self.timeline.lock().contexts.len() > 1
    }

    pub fn has_redo_states(&self) -> bool {
        !self.timeline.lock().redo.is_empty()
    }

    pub fn get(&self, id: ContextId) -> Option<Arc<Context>> {
        let timeline = self.timeline.lock();
        timeline.index_of(id).map(|i| Arc::clone(&timeline.contexts[i]))
    }

    /// The context just before `id` on the timeline.
    pub fn previous_of(&self, id: ContextId) -> Option<Arc<Context>> {
        self.timeline.lock().previous_of(id)
    }

    /// The selected context, falling back to the live one.
    pub fn selected_context(&self) -> Arc<Context> {
        let mut timeline = self.timeline.lock();
        let selected = timeline.selected.and_then(|id| timeline.index_of(id));
        match selected {
            Some(i) => Arc::clone(&timeline.contexts[i]),
            None => {
                let top = Arc::clone(timeline.top());
                timeline.selected = Some(top.id());
                top
            }
        }
    }

    /// Selects a context on the timeline. Returns false if it is not there.
    pub fn set_selected_context(&self, id: ContextId) -> bool {
        let mut timeline = self.timeline.lock();
        if timeline.index_of(id).is_some() {
            timeline.selected = Some(id);
            true
        } else {
            warn!(context = %id, size = timeline.contexts.len(), "cannot select context outside the timeline");
            false
        }
    }

    /// Appends `ctx` as the live context and clears the redo stack.
    ///
    /// Waits (bounded) for the new context's snapshots first, so undo later
    /// restores what was captured now. Pushing the live context itself is a
    /// no-op.
    pub fn push(&self, ctx: Arc<Context>) -> Arc<Context> {
        if Arc::ptr_eq(&ctx, &self.live()) {
            return ctx;
        }
        await_capture(&ctx);
        let mut timeline = self.timeline.lock();
        timeline.contexts.push_back(Arc::clone(&ctx));
        self.truncate(&mut timeline);
        timeline.redo.clear();
        timeline.selected = Some(ctx.id());
        ctx
    }

    /// Derives a context from the live one and pushes it if it changed.
    pub fn push_fn(&self, derive: impl FnOnce(&Arc<Context>) -> Arc<Context>) -> Arc<Context> {
        let live = self.live();
        let next = derive(&live);
        if Arc::ptr_eq(&next, &live) {
            return live;
        }
        self.push(next)
    }

    /// Replaces the live context, coalescing it with the previous step.
    pub fn replace_top(&self, ctx: Arc<Context>) -> Arc<Context> {
        await_capture(&ctx);
        let mut timeline = self.timeline.lock();
        timeline.contexts.pop_back();
        timeline.contexts.push_back(Arc::clone(&ctx));
        timeline.redo.clear();
        timeline.selected = Some(ctx.id());
        ctx
    }

    /// Reloads project files changed outside the assistant.
    ///
    /// Files whose disk content still matches the live context are ignored.
    /// If any differ, the affected fragments are refreshed into a new live
    /// context. Consecutive loads collapse into one timeline entry whose
    /// label counts them: "Load External Changes", then "(2)", "(3)", ...
    pub fn process_external_file_changes_if_needed(
        &self,
        changed: &BTreeSet<ProjectFile>,
    ) -> Option<Arc<Context>> {
        let live = self.live();
        let stale: BTreeSet<ProjectFile> = changed
            .iter()
            .filter(|file| live.is_file_stale(file))
            .cloned()
            .collect();
        if stale.is_empty() {
            return None;
        }

        let (action, continuation) = match external_change_count(live.action()) {
            Some(count) => (format!("{} ({})", LOAD_EXTERNAL_CHANGES, count + 1), true),
            None => (LOAD_EXTERNAL_CHANGES.to_string(), false),
        };
        let refreshed = live.copy_and_refresh(&stale, action);
        if Arc::ptr_eq(&refreshed, &live) {
            return None;
        }
        debug!(files = stale.len(), continuation, "loading external changes");

        Some(if continuation {
            self.replace_top(refreshed)
        } else {
            self.push(refreshed)
        })
    }

    fn truncate(&self, timeline: &mut Timeline) {
        let max_depth = self.session.config().history.max_depth.max(1);
        if timeline.contexts.len() <= max_depth {
            return;
        }
        while timeline.contexts.len() > max_depth {
            if let Some(removed) = timeline.contexts.pop_front() {
                timeline.git_states.remove(&removed.id());
                timeline.entry_infos.remove(&removed.id());
                debug!(context = %removed.id(), action = removed.action(), "truncated oldest context");
            }
        }
        let ids = timeline.ids();
        timeline
            .reset_edges
            .retain(|edge| ids.contains(&edge.source) && ids.contains(&edge.target));
        self.diff.retain_only(&ids);
    }

    /// Steps back up to `steps` contexts and restores the workspace to what
    /// the new live context captured.
    ///
    /// The timeline lock is released before any snapshot wait or file write.
    pub fn undo(&self, steps: usize) -> UndoResult {
        let (live, count, deleted) = {
            let mut timeline = self.timeline.lock();
            if steps == 0 || timeline.contexts.len() <= 1 {
                return UndoResult::none();
            }

            let count = steps.min(timeline.contexts.len() - 1);
            let mut deleted = Vec::new();
            for _ in 0..count {
                let Some(popped) = timeline.contexts.pop_back() else {
                    break;
                };
                timeline.reset_edges.retain(|edge| edge.target != popped.id());
                if let Some(info) = timeline.entry_infos.get(&popped.id()) {
                    deleted.push(info.clone());
                }
                timeline.redo.push(popped);
            }

            let live = Arc::clone(timeline.top());
            timeline.selected = Some(live.id());
            (live, count, deleted)
        };

        debug!(steps = count, context = %live.id(), "undo");
        for info in &deleted {
            self.restore_deleted_files(info);
        }
        self.apply_snapshot(&live);
        UndoResult::success(count)
    }

    /// Undoes back to the context `id`. No-op if `id` is live or unknown.
    pub fn undo_until(&self, id: ContextId) -> UndoResult {
        let distance = {
            let timeline = self.timeline.lock();
            match timeline.index_of(id) {
                Some(idx) => timeline.contexts.len() - 1 - idx,
                None => return UndoResult::none(),
            }
        };
        if distance == 0 {
            return UndoResult::none();
        }
        self.undo(distance)
    }

    /// Re-applies the most recently undone context. Returns false if there
    /// is nothing to redo.
    pub fn redo(&self) -> bool {
        let (popped, deleted) = {
            let mut timeline = self.timeline.lock();
            let Some(popped) = timeline.redo.pop() else {
                return false;
            };
            timeline.contexts.push_back(Arc::clone(&popped));
            self.truncate(&mut timeline);
            timeline.selected = Some(popped.id());
            let deleted = timeline.entry_infos.get(&popped.id()).cloned();
            (popped, deleted)
        };

        debug!(context = %popped.id(), "redo");
        self.apply_snapshot(&popped);
        if let Some(info) = deleted {
            self.delete_files(&info);
        }
        true
    }

    /// Writes each editable project file's captured text back to disk when
    /// it differs from what is there now.
    fn apply_snapshot(&self, ctx: &Context) {
        let fs = self.session.fs();
        let timeout = self.session.config().history.snapshot_await_timeout();
        for fragment in ctx.fragments() {
            let Some(file) = fragment.project_file() else {
                continue;
            };
            if ctx.is_readonly(fragment) {
                continue;
            }
            let snapshot = match fragment.snapshot().await_timeout(timeout) {
                Awaited::Ready(snapshot) => snapshot,
                Awaited::Failed(e) => {
                    warn!(file = %file, error = %e, "cannot restore file, snapshot failed");
                    continue;
                }
                Awaited::TimedOut => {
                    warn!(file = %file, "cannot restore file, snapshot not ready");
                    continue;
                }
            };
            if !snapshot.valid {
                continue;
            }

            let path = file.abs_path();
            let current = fs.read_to_string(&path).unwrap_or_default();
            if current != *snapshot.text {
                match fs.write(&path, snapshot.text.as_bytes()) {
                    Ok(()) => info!(file = %file, "restored file"),
                    Err(e) => warn!(file = %file, error = %e, "failed to restore file"),
                }
            }
        }
    }

    fn restore_deleted_files(&self, info: &EntryInfo) {
        let fs = self.session.fs();
        for deleted in &info.deleted_files {
            match fs.write(&deleted.file.abs_path(), deleted.content.as_bytes()) {
                Ok(()) => info!(file = %deleted.file, tracked = deleted.was_tracked, "restored deleted file"),
                Err(e) => warn!(file = %deleted.file, error = %e, "failed to restore deleted file"),
            }
        }
    }

    fn delete_files(&self, info: &EntryInfo) {
        let fs = self.session.fs();
        for deleted in &info.deleted_files {
            match fs.remove(&deleted.file.abs_path()) {
                Ok(()) => info!(file = %deleted.file, "deleted file again on redo"),
                Err(e) => warn!(file = %deleted.file, error = %e, "failed to delete file on redo"),
            }
        }
    }

    pub fn add_reset_edge(&self, source: ContextId, target: ContextId) {
        self.timeline.lock().reset_edges.push(ResetEdge { source, target });
    }

    pub fn reset_edges(&self) -> Vec<ResetEdge> {
        self.timeline.lock().reset_edges.clone()
    }

    pub fn add_git_state(&self, id: ContextId, state: GitState) {
        self.timeline.lock().git_states.insert(id, state);
    }

    /// Captures the current commit and working-tree diff for `id`. Returns
    /// the state, or `None` outside a repository.
    pub fn record_git_state(&self, id: ContextId) -> Option<GitState> {
        let git = self.session.git();
        let state = GitState {
            commit_hash: git.current_commit()?,
            diff: git.working_tree_diff(),
        };
        self.add_git_state(id, state.clone());
        Some(state)
    }

    pub fn git_state(&self, id: ContextId) -> Option<GitState> {
        self.timeline.lock().git_states.get(&id).cloned()
    }

    pub fn git_states(&self) -> HashMap<ContextId, GitState> {
        self.timeline.lock().git_states.clone()
    }

    pub fn add_entry_info(&self, id: ContextId, info: EntryInfo) {
        self.timeline.lock().entry_infos.insert(id, info);
    }

    pub fn entry_info(&self, id: ContextId) -> Option<EntryInfo> {
        self.timeline.lock().entry_infos.get(&id).cloned()
    }

    pub fn entry_infos(&self) -> HashMap<ContextId, EntryInfo> {
        self.timeline.lock().entry_infos.clone()
    }

    /// Whether two histories disagree at some position both have. One being
    /// a prefix of the other is not divergence.
    pub fn are_diverged(a: &ContextHistory, b: &ContextHistory) -> bool {
        let left = a.contexts();
        let right = b.contexts();
        left.iter().zip(&right).any(|(x, y)| x.id() != y.id())
    }

    /// Combines two histories that share a prefix.
    ///
    /// The result is the common prefix, then `older`'s entries past it that
    /// `newer` lacks, then `newer`'s entries past it. `newer`'s redo stack is
    /// kept. Bookkeeping maps are unioned and `newer` wins on collisions.
    pub fn merge(older: &ContextHistory, newer: &ContextHistory) -> Result<ContextHistory> {
        let old_contexts = older.contexts();
        let new_contexts = newer.contexts();
        let prefix = old_contexts
            .iter()
            .zip(&new_contexts)
            .take_while(|(x, y)| x.id() == y.id())
            .count();
        if prefix == 0 {
            return Err(HistoryError::NoCommonPrefix);
        }

        let newer_ids: HashSet<ContextId> = new_contexts.iter().map(|c| c.id()).collect();
        let mut merged: Vec<Arc<Context>> = new_contexts[..prefix].to_vec();
        merged.extend(
            old_contexts[prefix..]
                .iter()
                .filter(|c| !newer_ids.contains(&c.id()))
                .cloned(),
        );
        merged.extend(new_contexts[prefix..].iter().cloned());

        let mut reset_edges = older.reset_edges();
        for edge in newer.reset_edges() {
            if !reset_edges.contains(&edge) {
                reset_edges.push(edge);
            }
        }
        let mut git_states = older.git_states();
        git_states.extend(newer.git_states());
        let mut entry_infos = older.entry_infos();
        entry_infos.extend(newer.entry_infos());

        info!(
            common = prefix,
            older = old_contexts.len(),
            newer = new_contexts.len(),
            merged = merged.len(),
            "merged diverged histories"
        );
        let history = ContextHistory::from_parts(merged, reset_edges, git_states, entry_infos)?;
        {
            let mut timeline = history.timeline.lock();
            timeline.redo = newer.redo_contexts();
            history.truncate(&mut timeline);
        }
        Ok(history)
    }
}

/// Bounded wait for a context's snapshots; a timeout is logged, not fatal.
fn await_capture(ctx: &Context) {
    let timeout = ctx.session().config().history.snapshot_await_timeout();
    if !ctx.await_snapshots(timeout) {
        warn!(context = %ctx.id(), ?timeout, "snapshots unresolved when recorded");
    }
}

/// Load count encoded in an external-change label: 1 for the bare label,
/// N for "(N)". `None` for any other action.
fn external_change_count(action: &str) -> Option<u32> {
    let rest = action.strip_prefix(LOAD_EXTERNAL_CHANGES)?;
    let count = rest
        .trim()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .and_then(|n| n.parse::<u32>().ok())
        .unwrap_or(1);
    Some(count)
}
