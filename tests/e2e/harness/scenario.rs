use super::assertions::Assertion;
use super::runner::ScenarioRunner;
use super::steps::ScenarioStep;
use ctx_history::Config;
use std::collections::HashMap;

/// Fluent DSL for building test scenarios
pub struct Scenario {
    name: String,
    initial_files: HashMap<String, Vec<u8>>,
    fixture: Option<String>,
    config: Config,
    steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// Create a new scenario with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            initial_files: HashMap::new(),
            fixture: None,
            config: Config::default(),
            steps: Vec::new(),
        }
    }

    // ===== Initial setup =====

    /// Add a single file to initial workspace
    pub fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        self.initial_files
            .insert(path.to_string(), content.to_vec());
        self
    }

    /// Load initial workspace from fixtures
    pub fn from_fixture(mut self, fixture_name: &str) -> Self {
        self.fixture = Some(fixture_name.to_string());
        self
    }

    /// Cap the timeline length
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.config.history.max_depth = max_depth;
        self
    }

    // ===== Context edits =====

    /// Add a project file to the context
    pub fn add_file(mut self, path: &str) -> Self {
        self.steps.push(ScenarioStep::AddFile {
            path: path.to_string(),
        });
        self
    }

    /// Add a text note
    pub fn add_note(mut self, description: &str, text: &str) -> Self {
        self.steps.push(ScenarioStep::AddNote {
            description: description.to_string(),
            text: text.to_string(),
        });
        self
    }

    /// Drop a project file from the context
    pub fn remove_file(mut self, path: &str) -> Self {
        self.steps.push(ScenarioStep::RemoveFile {
            path: path.to_string(),
        });
        self
    }

    /// Pin a project file in the context
    pub fn pin_file(mut self, path: &str) -> Self {
        self.steps.push(ScenarioStep::PinFile {
            path: path.to_string(),
        });
        self
    }

    /// Push an unchanged context under a new label
    pub fn label(mut self, action: &str) -> Self {
        self.steps.push(ScenarioStep::Label {
            action: action.to_string(),
        });
        self
    }

    /// Record a finished task with its conversation
    pub fn complete_task(mut self, description: &str, messages: &[&str]) -> Self {
        self.steps.push(ScenarioStep::CompleteTask {
            description: description.to_string(),
            messages: messages.iter().map(|m| m.to_string()).collect(),
        });
        self
    }

    // ===== Agent edits =====

    /// Agent writes a file and the edit is pushed
    pub fn agent_writes(mut self, path: &str, content: &[u8]) -> Self {
        self.steps.push(ScenarioStep::AgentWriteFile {
            path: path.to_string(),
            content: content.to_vec(),
        });
        self
    }

    /// Agent deletes a file and the deletion is pushed
    pub fn agent_deletes(mut self, path: &str) -> Self {
        self.steps.push(ScenarioStep::AgentDeleteFile {
            path: path.to_string(),
        });
        self
    }

    // ===== External edits =====

    /// Someone else edits a file; nothing is pushed
    pub fn external_edit(mut self, path: &str, content: &[u8]) -> Self {
        self.steps.push(ScenarioStep::ExternalEdit {
            path: path.to_string(),
            content: content.to_vec(),
        });
        self
    }

    /// Reconcile external edits to the given files
    pub fn detect_external_changes(mut self, paths: &[&str]) -> Self {
        self.steps.push(ScenarioStep::DetectExternalChanges {
            paths: paths.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    // ===== Navigation =====

    /// Undo up to N steps
    pub fn undo(mut self, steps: usize) -> Self {
        self.steps.push(ScenarioStep::Undo { steps });
        self
    }

    /// Undo back to the first context
    pub fn undo_to_start(mut self) -> Self {
        self.steps.push(ScenarioStep::UndoToStart);
        self
    }

    /// Redo one step
    pub fn redo(mut self) -> Self {
        self.steps.push(ScenarioStep::Redo);
        self
    }

    /// Record the current commit for the live context
    pub fn record_git_state(mut self) -> Self {
        self.steps.push(ScenarioStep::RecordGitState);
        self
    }

    // ===== Persistence =====

    /// Save history to the workspace archive
    pub fn save(mut self) -> Self {
        self.steps.push(ScenarioStep::Save);
        self
    }

    /// Reload history from the archive with a fresh session
    pub fn restart(mut self) -> Self {
        self.steps.push(ScenarioStep::Restart);
        self
    }

    /// Merge the saved history (older) with the current one (newer)
    pub fn merge_with_saved(mut self) -> Self {
        self.steps.push(ScenarioStep::MergeWithSaved);
        self
    }

    // ===== Assertions =====

    /// Add a general assertion
    pub fn assert(mut self, assertion: Assertion) -> Self {
        self.steps.push(ScenarioStep::Assert { assertion });
        self
    }

    /// Assert timeline length
    pub fn assert_timeline_len(self, len: usize) -> Self {
        self.assert(Assertion::TimelineLength(len))
    }

    /// Assert redo stack length
    pub fn assert_redo_len(self, len: usize) -> Self {
        self.assert(Assertion::RedoLength(len))
    }

    /// Assert the live context's action label
    pub fn assert_action(self, action: &str) -> Self {
        self.assert(Assertion::LiveAction(action.to_string()))
    }

    /// Assert file content on disk
    pub fn assert_disk(self, path: &str, content: &str) -> Self {
        self.assert(Assertion::DiskContent {
            path: path.to_string(),
            content: content.to_string(),
        })
    }

    /// Assert the live context captured the given file text
    pub fn assert_captured(self, path: &str, content: &str) -> Self {
        self.assert(Assertion::LiveFileText {
            path: path.to_string(),
            content: content.to_string(),
        })
    }

    // ===== Execution =====

    /// Execute the scenario and return results
    pub fn run(self) -> ScenarioResult {
        super::init_tracing();
        let mut runner =
            match ScenarioRunner::new(self.initial_files.clone(), self.fixture.as_deref(), self.config.clone()) {
                Ok(r) => r,
                Err(e) => {
                    return ScenarioResult {
                        name: self.name.clone(),
                        success: false,
                        steps_executed: 0,
                        failure_step: Some(0),
                        error: Some(format!("Failed to create runner: {}", e)),
                    }
                }
            };

        match runner.execute(&self.steps) {
            Ok(()) => ScenarioResult {
                name: self.name,
                success: true,
                steps_executed: self.steps.len(),
                failure_step: None,
                error: None,
            },
            Err(e) => {
                let failure_step = runner.current_step();
                ScenarioResult {
                    name: self.name,
                    success: false,
                    steps_executed: failure_step,
                    failure_step: Some(failure_step),
                    error: Some(format!("{:?}", e)),
                }
            }
        }
    }
}

/// Result of running a scenario
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub steps_executed: usize,
    pub failure_step: Option<usize>,
    pub error: Option<String>,
}

impl ScenarioResult {
    /// Unwrap the result, panicking if it failed
    pub fn unwrap(self) {
        if !self.success {
            panic!(
                "Scenario '{}' failed at step {}: {}",
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }

    /// Expect the result to be successful
    pub fn expect(self, msg: &str) {
        if !self.success {
            panic!(
                "{}: Scenario '{}' failed at step {}: {}",
                msg,
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }

    /// Assert the scenario failed
    pub fn expect_failure(self) {
        if self.success {
            panic!("Scenario '{}' was expected to fail", self.name);
        }
    }
}
