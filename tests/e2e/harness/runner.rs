use super::assertions::Assertion;
use super::steps::ScenarioStep;
use super::workspace::TestWorkspace;
use anyhow::{anyhow, Context as _, Result};
use ctx_history::{
    read_archive, write_archive, ChatMessage, Config, Context, ContextHistory, DeletedFile,
    EntryInfo, Fragment, FragmentType, GitProvider, ProjectFile, Session, TaskEntry, TaskMeta,
    TaskType, UndoResult, SYNTAX_MARKDOWN,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Commit every scenario session reports.
pub const SCENARIO_COMMIT: &str = "5ce7a810";

/// Git stand-in that treats every file under `src/` as tracked.
struct ScenarioGit;

impl GitProvider for ScenarioGit {
    fn current_commit(&self) -> Option<String> {
        Some(SCENARIO_COMMIT.to_string())
    }

    fn is_tracked(&self, file: &ProjectFile) -> bool {
        file.rel_display().starts_with("src/")
    }
}

/// Executes scenarios against a real history over a temp project
pub struct ScenarioRunner {
    workspace: TestWorkspace,
    config: Config,
    session: Session,
    history: ContextHistory,
    last_undo: Option<UndoResult>,
    current_step: usize,
}

impl ScenarioRunner {
    /// Create a new runner with initial files
    pub fn new(
        initial_files: HashMap<String, Vec<u8>>,
        fixture: Option<&str>,
        config: Config,
    ) -> Result<Self> {
        let workspace = TestWorkspace::with_files(initial_files)?;
        if let Some(name) = fixture {
            workspace.load_fixture(name)?;
        }
        let session = open_session(&workspace, &config);
        let history = ContextHistory::new(Context::new(&session));

        Ok(Self {
            workspace,
            config,
            session,
            history,
            last_undo: None,
            current_step: 0,
        })
    }

    /// Get current step number
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Execute all steps in sequence
    pub fn execute(&mut self, steps: &[ScenarioStep]) -> Result<()> {
        for (i, step) in steps.iter().enumerate() {
            self.current_step = i;
            self.execute_step(step)
                .with_context(|| format!("Step {}: {:?}", i, step))?;
        }
        Ok(())
    }

    /// Execute a single step
    fn execute_step(&mut self, step: &ScenarioStep) -> Result<()> {
        match step {
            ScenarioStep::AddFile { path } => self.handle_add_file(path),
            ScenarioStep::AddNote { description, text } => self.handle_add_note(description, text),
            ScenarioStep::RemoveFile { path } => self.handle_remove_file(path),
            ScenarioStep::PinFile { path } => self.handle_pin_file(path),
            ScenarioStep::Label { action } => {
                self.history.push_fn(|live| live.with_action(action.as_str()));
                Ok(())
            }
            ScenarioStep::CompleteTask {
                description,
                messages,
            } => self.handle_complete_task(description, messages),

            ScenarioStep::AgentWriteFile { path, content } => self.handle_agent_write(path, content),
            ScenarioStep::AgentDeleteFile { path } => self.handle_agent_delete(path),

            ScenarioStep::ExternalEdit { path, content } => self.workspace.write_file(path, content),
            ScenarioStep::DetectExternalChanges { paths } => {
                let changed: BTreeSet<ProjectFile> =
                    paths.iter().map(|p| self.session.file(p)).collect();
                self.history.process_external_file_changes_if_needed(&changed);
                Ok(())
            }

            ScenarioStep::Undo { steps } => {
                self.last_undo = Some(self.history.undo(*steps));
                Ok(())
            }
            ScenarioStep::UndoToStart => {
                let first = self.history.contexts()[0].id();
                self.last_undo = Some(self.history.undo_until(first));
                Ok(())
            }
            ScenarioStep::Redo => {
                if !self.history.redo() {
                    return Err(anyhow!("Nothing to redo"));
                }
                Ok(())
            }
            ScenarioStep::RecordGitState => {
                let live = self.history.live();
                self.history
                    .record_git_state(live.id())
                    .ok_or_else(|| anyhow!("Git provider reported no commit"))?;
                Ok(())
            }

            ScenarioStep::Save => self.handle_save(),
            ScenarioStep::Restart => self.handle_restart(),
            ScenarioStep::MergeWithSaved => self.handle_merge_with_saved(),

            ScenarioStep::Assert { assertion } => self.handle_assertion(assertion),
        }
    }

    // ===== Context edit handlers =====

    fn handle_add_file(&mut self, path: &str) -> Result<()> {
        if !self.workspace.file_exists(path) {
            return Err(anyhow!("Cannot add missing file '{}'", path));
        }
        let fragment = Fragment::project_path(&self.session, self.session.file(path));
        self.history.push_fn(|live| live.add_fragment(fragment));
        Ok(())
    }

    fn handle_add_note(&mut self, description: &str, text: &str) -> Result<()> {
        let note = Fragment::string(&self.session, description, text, SYNTAX_MARKDOWN);
        self.history.push_fn(|live| live.add_fragment(note));
        Ok(())
    }

    fn handle_remove_file(&mut self, path: &str) -> Result<()> {
        let fragment = self.live_file(path)?;
        self.history.push_fn(|live| live.remove_fragments(&[fragment]));
        Ok(())
    }

    fn handle_pin_file(&mut self, path: &str) -> Result<()> {
        let fragment = self.live_file(path)?;
        self.history.push_fn(|live| live.with_pinned(&fragment, true));
        Ok(())
    }

    fn handle_complete_task(&mut self, description: &str, messages: &[String]) -> Result<()> {
        // Conversation alternates, starting with the user.
        let messages: Vec<ChatMessage> = messages
            .iter()
            .enumerate()
            .map(|(i, text)| {
                if i % 2 == 0 {
                    ChatMessage::user(text.as_str())
                } else {
                    ChatMessage::ai(text.as_str())
                }
            })
            .collect();
        let log = Fragment::task(&self.session, description, messages);
        let live = self.history.live();
        let entry = TaskEntry::from_log(live.next_sequence(), log, Some(TaskMeta::new(TaskType::Code)));
        self.history.push(live.add_history_entry(entry, description));
        Ok(())
    }

    // ===== Agent edit handlers =====

    fn handle_agent_write(&mut self, path: &str, content: &[u8]) -> Result<()> {
        self.workspace.write_file(path, content)?;
        let file = self.session.file(path);
        let live = self.history.live();
        let next = if self.find_live_file(path).is_some() {
            live.copy_and_refresh(&BTreeSet::from([file]), format!("Edit {}", path))
        } else {
            live.add_fragment(Fragment::project_path(&self.session, file))
        };
        self.history.push(next);
        Ok(())
    }

    fn handle_agent_delete(&mut self, path: &str) -> Result<()> {
        let content = String::from_utf8(self.workspace.read_file(path)?)
            .with_context(|| format!("File '{}' is not UTF-8", path))?;
        let file = self.session.file(path);
        let was_tracked = self.session.git().is_tracked(&file);
        self.workspace.delete_file(path)?;

        let live = self.history.live();
        let next = match self.find_live_file(path) {
            Some(fragment) => live.remove_fragments(&[fragment]),
            None => live.with_action(format!("Delete {}", path)),
        };
        let next = self.history.push(next);
        self.history.add_entry_info(
            next.id(),
            EntryInfo {
                deleted_files: vec![DeletedFile {
                    file,
                    content,
                    was_tracked,
                }],
            },
        );
        Ok(())
    }

    // ===== Persistence handlers =====

    fn handle_save(&mut self) -> Result<()> {
        write_archive(&self.history, &self.workspace.archive_path())
            .context("Failed to write history archive")
    }

    fn handle_restart(&mut self) -> Result<()> {
        self.session = open_session(&self.workspace, &self.config);
        self.history = read_archive(&self.session, &self.workspace.archive_path())
            .context("Failed to reload history archive")?;
        self.last_undo = None;
        Ok(())
    }

    fn handle_merge_with_saved(&mut self) -> Result<()> {
        let saved = read_archive(&self.session, &self.workspace.archive_path())?;
        self.history = ContextHistory::merge(&saved, &self.history).context("Failed to merge histories")?;
        Ok(())
    }

    // ===== Assertion handlers =====

    fn handle_assertion(&self, assertion: &Assertion) -> Result<()> {
        let live = self.history.live();
        match assertion {
            Assertion::TimelineLength(expected) => {
                expect_eq("timeline length", self.history.len(), *expected)
            }
            Assertion::RedoLength(expected) => {
                expect_eq("redo length", self.history.redo_contexts().len(), *expected)
            }
            Assertion::LiveAction(expected) => expect_eq("live action", live.action(), expected.as_str()),
            Assertion::LiveActionStartsWith(prefix) => {
                if !live.action().starts_with(prefix.as_str()) {
                    return Err(anyhow!(
                        "Live action '{}' doesn't start with '{}'",
                        live.action(),
                        prefix
                    ));
                }
                Ok(())
            }
            Assertion::LastUndoSteps(expected) => {
                let result = self.last_undo.ok_or_else(|| anyhow!("No undo was performed"))?;
                if !result.was_undone {
                    return Err(anyhow!("Last undo was a no-op"));
                }
                expect_eq("undo steps", result.steps, *expected)
            }
            Assertion::LastUndoWasNoop => match self.last_undo {
                Some(result) if !result.was_undone => Ok(()),
                Some(result) => Err(anyhow!("Last undo moved {} step(s)", result.steps)),
                None => Err(anyhow!("No undo was performed")),
            },

            Assertion::LiveContainsFile { path } => self.live_file(path).map(|_| ()),
            Assertion::LiveLacksFile { path } => match self.find_live_file(path) {
                Some(_) => Err(anyhow!("Live context unexpectedly holds '{}'", path)),
                None => Ok(()),
            },
            Assertion::LiveFileText { path, content } => {
                let fragment = self.live_file(path)?;
                expect_eq("captured text", fragment.text().as_str(), content.as_str())
            }
            Assertion::LiveNoteText {
                description,
                content,
            } => {
                let note = live
                    .fragments()
                    .iter()
                    .find(|f| f.fragment_type() == FragmentType::String && f.description() == *description)
                    .ok_or_else(|| anyhow!("No note '{}' in live context", description))?;
                expect_eq("note text", note.text().as_str(), content.as_str())
            }
            Assertion::TaskCount(expected) => expect_eq("task count", live.task_history().len(), *expected),
            Assertion::FileStale { path } => {
                if !live.is_file_stale(&self.session.file(path)) {
                    return Err(anyhow!("Expected '{}' to be stale", path));
                }
                Ok(())
            }

            Assertion::DiskContent { path, content } => {
                let on_disk = String::from_utf8(self.workspace.read_file(path)?)?;
                expect_eq("disk content", on_disk.as_str(), content.as_str())
            }
            Assertion::DiskMissing { path } => {
                if self.workspace.file_exists(path) {
                    return Err(anyhow!("File '{}' unexpectedly exists", path));
                }
                Ok(())
            }

            Assertion::LiveDiffTouches { path, added, deleted } => {
                let entries = self.history.diff_service().diff(&live).get()?;
                let entry = entries
                    .iter()
                    .find(|e| e.fragment.project_file().map(|f| f.rel_display()).as_deref() == Some(path.as_str()))
                    .ok_or_else(|| anyhow!("Diff of live context doesn't touch '{}'", path))?;
                expect_eq("lines added", entry.lines_added, *added)?;
                expect_eq("lines deleted", entry.lines_deleted, *deleted)
            }
            Assertion::LiveDiffEmpty => {
                let entries = self.history.diff_service().diff(&live).get()?;
                if !entries.is_empty() {
                    return Err(anyhow!("Expected empty diff, got {} entries", entries.len()));
                }
                Ok(())
            }

            Assertion::GitStateRecorded => {
                let state = self
                    .history
                    .git_state(live.id())
                    .ok_or_else(|| anyhow!("No git state recorded for live context"))?;
                expect_eq("commit", state.commit_hash.as_str(), SCENARIO_COMMIT)
            }

            Assertion::Custom(check) => check(&self.history),
        }
    }

    // ===== Helper methods =====

    fn find_live_file(&self, path: &str) -> Option<Arc<Fragment>> {
        self.history
            .live()
            .fragments()
            .iter()
            .find(|f| f.fragment_type() == FragmentType::ProjectPath && f.project_file().map(|p| p.rel_display()).as_deref() == Some(path))
            .cloned()
    }

    fn live_file(&self, path: &str) -> Result<Arc<Fragment>> {
        self.find_live_file(path)
            .ok_or_else(|| anyhow!("Live context has no fragment for '{}'", path))
    }
}

fn open_session(workspace: &TestWorkspace, config: &Config) -> Session {
    Session::builder(workspace.path())
        .config(config.clone())
        .git(ScenarioGit)
        .build()
}

fn expect_eq<T: PartialEq + std::fmt::Debug>(what: &str, actual: T, expected: T) -> Result<()> {
    if actual != expected {
        return Err(anyhow!("{} mismatch: expected {:?}, got {:?}", what, expected, actual));
    }
    Ok(())
}
