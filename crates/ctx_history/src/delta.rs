//! What changed between two contexts.
//!
//! Unlike [`DiffService`](crate::DiffService), which compares file content,
//! a delta reports changes to the workspace itself: fragments entering or
//! leaving, task history growth or rewrites, special fragment updates.

use crate::context::{Context, CLEARED_HISTORY, COMPRESSED_HISTORY, DROPPED_ALL};
use crate::fragment::{Fragment, SpecialTextType};
use crate::task::{TaskEntry, TaskType};
use std::sync::Arc;

/// Label of a delta whose only change is refreshed content.
pub const LOAD_EXTERNAL_CHANGES: &str = "Load External Changes";

const TASK_LABEL_MAX: usize = 80;

/// Differences from a baseline context to a target context.
#[derive(Clone, Debug, Default)]
pub struct ContextDelta {
    /// Target fragments with no same-source match in the baseline.
    pub added: Vec<Arc<Fragment>>,
    /// Baseline fragments with no same-source match in the target.
    pub removed: Vec<Arc<Fragment>>,
    /// Task entries appended after the baseline's history.
    pub added_tasks: Vec<TaskEntry>,
    pub cleared_history: bool,
    /// An entry present in both became compressed.
    pub compressed_history: bool,
    /// A fragment present in both renders different text.
    pub contents_changed: bool,
    /// The baseline had content and the target has none.
    pub session_reset: bool,
    /// Special fragments present in both whose text changed.
    pub updated_specials: Vec<Arc<Fragment>>,
}

impl ContextDelta {
    /// Changes from `from` to reach `to`. A missing baseline reports every
    /// fragment and task of `to` as added.
    pub fn between(from: Option<&Context>, to: &Context) -> ContextDelta {
        let Some(from) = from else {
            return ContextDelta {
                added: to.fragments().to_vec(),
                added_tasks: to.task_history().to_vec(),
                ..Default::default()
            };
        };
        if from.id() == to.id() {
            return ContextDelta::default();
        }

        let added = to
            .fragments()
            .iter()
            .filter(|f| from.find_same_source(f).is_none())
            .cloned()
            .collect();
        let removed = from
            .fragments()
            .iter()
            .filter(|f| to.find_same_source(f).is_none())
            .cloned()
            .collect();

        let old_tasks = from.task_history();
        let new_tasks = to.task_history();
        let added_tasks = new_tasks
            .get(old_tasks.len()..)
            .map(<[TaskEntry]>::to_vec)
            .unwrap_or_default();
        let compressed_history = old_tasks
            .iter()
            .zip(new_tasks)
            .any(|(old, new)| new.is_compressed() && !old.is_compressed());
        let cleared_history = old_tasks.len() > new_tasks.len() && new_tasks.is_empty();

        let updated_specials = SpecialTextType::ALL
            .iter()
            .filter_map(|kind| {
                let old = from.special(*kind)?;
                let new = to.special(*kind)?;
                (rendered(old) != rendered(new)).then(|| Arc::clone(new))
            })
            .collect();

        let contents_changed = to
            .fragments()
            .iter()
            .filter(|f| f.special_type().is_none())
            .any(|new| {
                from.find_same_source(new)
                    .is_some_and(|old| !Arc::ptr_eq(old, new) && rendered(old) != rendered(new))
            });

        ContextDelta {
            added,
            removed,
            added_tasks,
            cleared_history,
            compressed_history,
            contents_changed,
            session_reset: !from.is_empty() && to.is_empty(),
            updated_specials,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.added_tasks.is_empty()
            && !self.cleared_history
            && !self.compressed_history
            && !self.contents_changed
            && !self.session_reset
            && self.updated_specials.is_empty()
    }

    /// One-line human label for the change.
    ///
    /// A new task wins over everything but a reset; otherwise the individual
    /// changes are joined with "; ". Blocks on the short descriptions of at
    /// most two added and two removed fragments.
    pub fn description(&self) -> String {
        if self.session_reset {
            return DROPPED_ALL.to_string();
        }
        if self.is_empty() {
            return "(No changes)".to_string();
        }

        if let Some(latest) = self.added_tasks.last() {
            let prefix = match latest.meta() {
                Some(meta) if meta.task_type != TaskType::Context => format!("{}: ", meta.task_type),
                _ => String::new(),
            };
            return format!("{}{}", prefix, task_label(&latest.short_text()));
        }

        let mut parts: Vec<String> = Vec::new();
        if self.compressed_history {
            parts.push(COMPRESSED_HISTORY.to_string());
        }
        if self.cleared_history {
            parts.push(CLEARED_HISTORY.to_string());
        }
        if !self.added.is_empty() {
            parts.push(add_label(&self.added));
        }
        if !self.removed.is_empty() {
            parts.push(remove_label(&self.removed));
        }
        for special in &self.updated_specials {
            if let Some(kind) = special.special_type() {
                parts.push(format!("Update {}", kind.description()));
            }
        }
        if parts.is_empty() && self.contents_changed {
            parts.push(LOAD_EXTERNAL_CHANGES.to_string());
        }

        if parts.is_empty() {
            "(No changes detected)".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// Text of a fragment if it is already rendered, empty otherwise.
fn rendered(fragment: &Fragment) -> Arc<str> {
    fragment
        .snapshot()
        .try_get()
        .map(|snapshot| Arc::clone(&snapshot.text))
        .unwrap_or_else(|| Arc::from(""))
}

fn task_label(text: &str) -> String {
    let label = if text.chars().count() > TASK_LABEL_MAX {
        let cut: String = text.chars().take(TASK_LABEL_MAX - 3).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    };
    label.replace(['\n', '\r'], " ")
}

pub(crate) fn add_label(fragments: &[Arc<Fragment>]) -> String {
    action_label("Add", fragments)
}

pub(crate) fn remove_label(fragments: &[Arc<Fragment>]) -> String {
    action_label("Remove", fragments)
}

/// "Verb a, b, N more" over the first two short descriptions.
fn action_label(verb: &str, fragments: &[Arc<Fragment>]) -> String {
    let names: Vec<String> = fragments
        .iter()
        .take(2)
        .map(|f| f.short_description())
        .collect();
    let mut label = format!("{} {}", verb, names.join(", "));
    if fragments.len() > 2 {
        label.push_str(&format!(", {} more", fragments.len() - 2));
    }
    label
}
