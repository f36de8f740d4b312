//! Content diffs between consecutive contexts.
//!
//! [`DiffService`] memoizes one [`ComputedValue`] per `(previous, current)`
//! context pair. Concurrent callers asking for the same pair get the same
//! handle, so each pair is computed at most once until the cache is cleared.

use crate::context::{Context, ContextId};
use crate::executor::is_worker_thread;
use crate::fragment::Fragment;
use crate::history::SharedTimeline;
use crate::memo::{Awaited, ComputedValue};
use crate::project::{GitProvider, ProjectFile};
use crate::session::Session;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use similar::{Algorithm, ChangeTag, TextDiff};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// New-side text used when a fragment's content did not materialize in time.
pub const TIMEOUT_TEXT: &str = "Timeout loading contents. Please consider reporting a bug";
/// New-side text used when a fragment's content computation failed.
pub const ERROR_TEXT: &str = "Error loading contents. Please consider reporting a bug.";
/// Diff text of an image whose bytes changed.
pub const IMAGE_CHANGED: &str = "[Image changed]";
/// Ref name that reads the working tree in [`DiffService::summarize_changes`].
pub const WORKING_TREE: &str = "WORKING";

/// Shared result of one diff computation.
pub type DiffResult = Arc<Vec<DiffEntry>>;

type PairKey = (Option<ContextId>, ContextId);

/// A content change of one fragment.
#[derive(Clone, Debug)]
pub struct DiffEntry {
    /// The fragment on the new side.
    pub fragment: Arc<Fragment>,
    /// Unified diff text, or a placeholder for images.
    pub diff: String,
    pub lines_added: usize,
    pub lines_deleted: usize,
    pub old_content: String,
    pub new_content: String,
}

impl DiffEntry {
    pub fn title(&self) -> String {
        self.fragment.short_description()
    }
}

/// Line totals across files between two refs.
#[derive(Clone, Debug, Default)]
pub struct CumulativeChanges {
    pub files_changed: usize,
    pub total_added: usize,
    pub total_deleted: usize,
    pub per_file: Vec<DiffEntry>,
}

struct DiffInner {
    timeline: SharedTimeline,
    cache: DashMap<PairKey, ComputedValue<DiffResult>>,
}

/// Memoizing diff dispatcher owned by a [`ContextHistory`](crate::ContextHistory).
#[derive(Clone)]
pub struct DiffService {
    inner: Arc<DiffInner>,
}

impl DiffService {
    pub(crate) fn new(timeline: SharedTimeline) -> Self {
        Self {
            inner: Arc::new(DiffInner {
                timeline,
                cache: DashMap::new(),
            }),
        }
    }

    fn key_for(&self, curr: &Context) -> (PairKey, Option<Arc<Context>>) {
        let prev = self.inner.timeline.lock().previous_of(curr.id());
        ((prev.as_ref().map(|p| p.id()), curr.id()), prev)
    }

    /// Handle to the diff of `curr` against its predecessor in the history.
    ///
    /// On a worker thread a fresh computation runs inline before returning.
    /// Elsewhere it is queued on the session's pool and the handle returns
    /// immediately. A context without a predecessor diffs to an empty list.
    pub fn diff(&self, curr: &Arc<Context>) -> ComputedValue<DiffResult> {
        let (key, prev) = self.key_for(curr);
        let (value, fresh) = match self.inner.cache.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let target = Arc::clone(curr);
                let value = ComputedValue::lazy(format!("diff-{}", curr.id()), move || {
                    Arc::new(match prev {
                        Some(prev) => compute_diff(&target, &prev),
                        None => Vec::new(),
                    })
                });
                entry.insert(value.clone());
                (value, true)
            }
        };

        if fresh {
            if is_worker_thread() {
                value.run_now();
            } else {
                value.schedule(curr.session().pool());
            }
        }
        value
    }

    /// The finished diff of `curr`, without blocking or starting work.
    pub fn peek(&self, curr: &Context) -> Option<DiffResult> {
        let (key, _) = self.key_for(curr);
        self.inner.cache.get(&key).and_then(|value| value.try_get())
    }

    /// Starts diffs for every context that has a predecessor.
    pub fn warm_up(&self, contexts: &[Arc<Context>]) {
        for ctx in contexts {
            if self.inner.timeline.lock().previous_of(ctx.id()).is_some() {
                self.diff(ctx);
            }
        }
    }

    pub fn clear(&self) {
        self.inner.cache.clear();
    }

    /// Drops cached pairs that mention a context outside `ids`.
    pub fn retain_only(&self, ids: &HashSet<ContextId>) {
        self.inner
            .cache
            .retain(|(prev, curr), _| ids.contains(curr) && prev.map_or(true, |p| ids.contains(&p)));
    }

    pub fn cached_pairs(&self) -> usize {
        self.inner.cache.len()
    }

    /// Project files whose content differs between `prev` and `curr`.
    pub fn changed_files(curr: &Context, prev: &Context) -> BTreeSet<ProjectFile> {
        compute_diff(curr, prev)
            .iter()
            .flat_map(|entry| entry.fragment.files())
            .collect()
    }

    /// Line statistics for `files` between two refs.
    ///
    /// [`WORKING_TREE`] reads the files on disk, a blank ref is empty content
    /// and any other ref is resolved through the git collaborator. Missing
    /// files count as empty, so additions and deletions show up in full.
    pub fn summarize_changes(
        session: &Session,
        left_ref: &str,
        right_ref: &str,
        files: &[ProjectFile],
    ) -> CumulativeChanges {
        let mut summary = CumulativeChanges::default();
        for file in files {
            let left = content_at(session, left_ref, file);
            let right = content_at(session, right_ref, file);
            let Some((diff, added, deleted)) = line_diff(&left, &right, &file.rel_display()) else {
                continue;
            };
            summary.total_added += added;
            summary.total_deleted += deleted;
            summary.per_file.push(DiffEntry {
                fragment: Fragment::git_file(session, file.clone(), right_ref, right.as_str()),
                diff,
                lines_added: added,
                lines_deleted: deleted,
                old_content: left,
                new_content: right,
            });
        }
        summary.files_changed = summary.per_file.len();
        summary
    }
}

fn content_at(session: &Session, git_ref: &str, file: &ProjectFile) -> String {
    if git_ref.trim().is_empty() {
        return String::new();
    }
    if git_ref == WORKING_TREE {
        return session.fs().read_to_string(&file.abs_path()).unwrap_or_default();
    }
    session.git().file_at_revision(git_ref, file).unwrap_or_else(|| {
        debug!(file = %file, git_ref, "file absent at ref, treating as empty");
        String::new()
    })
}

/// Per-fragment diffs of `curr` against `prev`.
///
/// Candidates are the editable fragments of `curr` plus its images. A
/// candidate with no same-source fragment in `prev` diffs against empty
/// text, except images and project files git already tracks.
pub(crate) fn compute_diff(curr: &Context, prev: &Context) -> Vec<DiffEntry> {
    let timeout = curr.session().config().diff.text_fallback_timeout();
    let git = curr.session().git();
    let previous = prev.all_fragments();

    let candidates = curr
        .editable_fragments()
        .into_iter()
        .chain(curr.all_fragments().into_iter().filter(|f| !f.is_text()));

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for fragment in candidates {
        let old = previous.iter().find(|o| fragment.has_same_source(o));
        let entry = match old {
            Some(old) if Arc::ptr_eq(old, &fragment) => None,
            Some(old) if !fragment.is_text() => image_entry(old, &fragment),
            Some(old) => text_entry(Some(old), &fragment, timeout),
            None if !fragment.is_text() => None,
            None if tracked_by_git(&**git, &fragment) => None,
            None => text_entry(None, &fragment, timeout),
        };
        if let Some(entry) = entry {
            if seen.insert(entry.fragment.id().clone()) {
                entries.push(entry);
            }
        }
    }
    entries
}

fn tracked_by_git(git: &dyn GitProvider, fragment: &Fragment) -> bool {
    fragment.project_file().is_some_and(|file| git.is_tracked(file))
}

fn text_entry(old: Option<&Arc<Fragment>>, new: &Arc<Fragment>, timeout: Duration) -> Option<DiffEntry> {
    let old_content = old.map(|f| text_within(f, timeout)).unwrap_or_default();
    let new_content = text_within(new, timeout);
    let (diff, lines_added, lines_deleted) =
        line_diff(&old_content, &new_content, &new.short_description())?;
    Some(DiffEntry {
        fragment: Arc::clone(new),
        diff,
        lines_added,
        lines_deleted,
        old_content,
        new_content,
    })
}

fn image_entry(old: &Fragment, new: &Arc<Fragment>) -> Option<DiffEntry> {
    match (old.image_bytes(), new.image_bytes()) {
        (None, None) => None,
        (Some(a), Some(b)) if a == b => None,
        _ => Some(DiffEntry {
            fragment: Arc::clone(new),
            diff: IMAGE_CHANGED.to_string(),
            lines_added: 1,
            lines_deleted: 1,
            old_content: "[image]".to_string(),
            new_content: "[image]".to_string(),
        }),
    }
}

/// Fragment text, or a fallback message if it is late or failed.
fn text_within(fragment: &Fragment, timeout: Duration) -> String {
    match fragment.snapshot().await_timeout(timeout) {
        Awaited::Ready(snapshot) => snapshot.text.to_string(),
        Awaited::TimedOut => {
            warn!(fragment = %fragment.id(), ?timeout, "content not ready, using fallback text");
            TIMEOUT_TEXT.to_string()
        }
        Awaited::Failed(e) => {
            warn!(fragment = %fragment.id(), error = %e, "content failed, using fallback text");
            format!(
                "{}\n\nDetails:\nFragment type {:?}\nFragment description: {}\nError: {}\n",
                ERROR_TEXT,
                fragment.fragment_type(),
                fragment.short_description(),
                e
            )
        }
    }
}

/// Unified diff plus added/deleted line counts, `None` when equal.
fn line_diff(old: &str, new: &str, name: &str) -> Option<(String, usize, usize)> {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Patience)
        .diff_lines(old, new);

    let mut added = 0;
    let mut deleted = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => deleted += 1,
            ChangeTag::Equal => {}
        }
    }
    if added == 0 && deleted == 0 {
        return None;
    }

    let text = diff
        .unified_diff()
        .context_radius(3)
        .header(&format!("old/{}", name), &format!("new/{}", name))
        .to_string();
    Some((text, added, deleted))
}
