use super::assertions::Assertion;

/// All possible actions in a test scenario
#[derive(Debug)]
pub enum ScenarioStep {
    // Context edits
    AddFile {
        path: String,
    },
    AddNote {
        description: String,
        text: String,
    },
    RemoveFile {
        path: String,
    },
    PinFile {
        path: String,
    },
    Label {
        action: String,
    },
    CompleteTask {
        description: String,
        messages: Vec<String>,
    },

    // Agent file edits (captured by the next push)
    AgentWriteFile {
        path: String,
        content: Vec<u8>,
    },
    AgentDeleteFile {
        path: String,
    },

    // Edits made outside the agent, reconciled explicitly
    ExternalEdit {
        path: String,
        content: Vec<u8>,
    },
    DetectExternalChanges {
        paths: Vec<String>,
    },

    // Timeline navigation
    Undo {
        steps: usize,
    },
    UndoToStart,
    Redo,
    RecordGitState,

    // Persistence
    Save,
    Restart,
    MergeWithSaved,

    // Assertions (can be interspersed)
    Assert {
        assertion: Assertion,
    },
}
