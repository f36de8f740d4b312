//! CTX History Library
//!
//! The working memory of a coding agent, kept as a versioned timeline of
//! immutable workspace snapshots:
//! - Fragments: files, pasted text, derived code views and task logs, with
//!   content computed lazily on a worker pool
//! - Contexts: immutable sets of fragments plus task history
//! - History: push, undo, redo, external-change reconciliation and merge
//! - Diffs: memoized per pair of consecutive contexts
//! - Archives: zip storage with content-addressed, deduplicated blobs
//!
//! # Quick Start
//!
//! ```
//! use ctx_history::{Context, ContextHistory, Fragment, Session};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! std::fs::write(tmp.path().join("main.rs"), "fn main() {}\n").unwrap();
//! let session = Session::new(tmp.path());
//!
//! let start = Context::new(&session);
//! let history = ContextHistory::new(start);
//!
//! // Add a file; its content is captured when the context is pushed
//! let file = Fragment::project_path(&session, session.file("main.rs"));
//! history.push_fn(|live| live.add_fragment(file));
//! assert_eq!(history.len(), 2);
//!
//! // Edits on disk do not leak into history: undo restores what was captured
//! std::fs::write(tmp.path().join("main.rs"), "fn main() { panic!() }\n").unwrap();
//! history.push_fn(|live| live.with_action("edit"));
//! assert!(history.undo(1).was_undone);
//! assert!(history.redo());
//! ```
//!
//! # Persistence
//!
//! ```
//! use ctx_history::{read_archive, write_archive, Context, ContextHistory, Fragment, Session};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let session = Session::new(tmp.path());
//! let note = Fragment::string(&session, "note", "remember the milk", "none");
//! let history = ContextHistory::new(Context::new(&session).add_fragment(note));
//!
//! let path = tmp.path().join("history.zip");
//! write_archive(&history, &path).unwrap();
//!
//! let loaded = read_archive(&session, &path).unwrap();
//! assert_eq!(loaded.live().fragments()[0].text(), "remember the milk");
//! ```

mod archive;
mod config;
mod content_id;
mod content_store;
mod context;
mod delta;
mod diff;
mod error;
mod executor;
mod fragment;
mod history;
mod memo;
mod project;
mod session;
mod task;

pub use archive::{archive_format, migrate_archive, read_archive, write_archive, FormatVersion};
pub use config::{Config, DiffConfig, HistoryConfig, StorageConfig, WorkerConfig, CONFIG_FILE};
pub use content_id::{ContentId, FragmentId, FragmentIdCounter};
pub use content_store::{ContentStore, MAX_BLOB_SIZE};
pub use context::{
    Context, ContextId, CLEARED_HISTORY, COMPRESSED_HISTORY, DROPPED_ALL, SESSION_START,
};
pub use delta::{ContextDelta, LOAD_EXTERNAL_CHANGES};
pub use diff::{
    CumulativeChanges, DiffEntry, DiffResult, DiffService, ERROR_TEXT, IMAGE_CHANGED,
    TIMEOUT_TEXT, WORKING_TREE,
};
pub use error::{HistoryError, Result};
pub use executor::{
    current_role, enter_interactive, is_interactive_thread, is_worker_thread, RoleGuard,
    ThreadRole, WorkerPool,
};
pub use fragment::{
    ContentSnapshot, Fragment, FragmentKind, FragmentType, SpecialTextType, SummaryType,
    IMAGE_PLACEHOLDER,
};
pub use history::{ContextHistory, DeletedFile, EntryInfo, GitState, ResetEdge, UndoResult};
pub use memo::{Awaited, ComputeFailed, ComputedValue};
pub use project::{
    syntax_for_path, Analyzer, CallDirection, CallSite, CodeUnit, CodeUnitKind, FileRef,
    GitProvider, LocalFileSystem, NoGit, NullAnalyzer, ProjectFile, ProjectFileSystem,
    TableAnalyzer, UsageHit, SYNTAX_MARKDOWN, SYNTAX_NONE,
};
pub use session::{Session, SessionBuilder};
pub use task::{format_messages, ChatMessage, ChatMessageType, TaskEntry, TaskMeta, TaskType};
