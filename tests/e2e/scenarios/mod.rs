mod diff_concurrency;
mod external_changes;
mod merge;
mod persistence;
mod undo_redo;
