use anyhow::Result;
use ctx_history::ContextHistory;

/// Declarative assertions on history state
pub enum Assertion {
    // Timeline
    TimelineLength(usize),
    RedoLength(usize),
    LiveAction(String),
    LiveActionStartsWith(String),
    LastUndoSteps(usize),
    LastUndoWasNoop,

    // Live context
    LiveContainsFile {
        path: String,
    },
    LiveLacksFile {
        path: String,
    },
    LiveFileText {
        path: String,
        content: String,
    },
    LiveNoteText {
        description: String,
        content: String,
    },
    TaskCount(usize),
    FileStale {
        path: String,
    },

    // Disk
    DiskContent {
        path: String,
        content: String,
    },
    DiskMissing {
        path: String,
    },

    // Diffs of the live context against its predecessor
    LiveDiffTouches {
        path: String,
        added: usize,
        deleted: usize,
    },
    LiveDiffEmpty,

    // Bookkeeping
    GitStateRecorded,

    // Custom
    Custom(Box<dyn Fn(&ContextHistory) -> Result<()> + Send + Sync>),
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimelineLength(n) => write!(f, "TimelineLength({})", n),
            Self::RedoLength(n) => write!(f, "RedoLength({})", n),
            Self::LiveAction(s) => write!(f, "LiveAction({:?})", s),
            Self::LiveActionStartsWith(s) => write!(f, "LiveActionStartsWith({:?})", s),
            Self::LastUndoSteps(n) => write!(f, "LastUndoSteps({})", n),
            Self::LastUndoWasNoop => write!(f, "LastUndoWasNoop"),
            Self::LiveContainsFile { path } => write!(f, "LiveContainsFile {{ path: {:?} }}", path),
            Self::LiveLacksFile { path } => write!(f, "LiveLacksFile {{ path: {:?} }}", path),
            Self::LiveFileText { path, content } => {
                write!(f, "LiveFileText {{ path: {:?}, content: {:?} }}", path, content)
            }
            Self::LiveNoteText { description, content } => write!(
                f,
                "LiveNoteText {{ description: {:?}, content: {:?} }}",
                description, content
            ),
            Self::TaskCount(n) => write!(f, "TaskCount({})", n),
            Self::FileStale { path } => write!(f, "FileStale {{ path: {:?} }}", path),
            Self::DiskContent { path, content } => {
                write!(f, "DiskContent {{ path: {:?}, content: {:?} }}", path, content)
            }
            Self::DiskMissing { path } => write!(f, "DiskMissing {{ path: {:?} }}", path),
            Self::LiveDiffTouches { path, added, deleted } => write!(
                f,
                "LiveDiffTouches {{ path: {:?}, added: {}, deleted: {} }}",
                path, added, deleted
            ),
            Self::LiveDiffEmpty => write!(f, "LiveDiffEmpty"),
            Self::GitStateRecorded => write!(f, "GitStateRecorded"),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}
