use crate::harness::{Assertion, Scenario};

#[test]
fn test_undo_restores_captured_not_current_content() {
    Scenario::new("undo_restores_captured")
        .with_file("src/lib.rs", b"v1\n")
        .add_file("src/lib.rs")
        .agent_writes("src/lib.rs", b"v2\n")
        .assert_timeline_len(3)
        // Edit nobody told the history about
        .external_edit("src/lib.rs", b"v3\n")
        .undo(1)
        .assert_disk("src/lib.rs", "v1\n")
        .assert_redo_len(1)
        .redo()
        .assert_disk("src/lib.rs", "v2\n")
        .assert_redo_len(0)
        .run()
        .expect("undo should restore the content captured at push time");
}

#[test]
fn test_undo_with_single_context_is_noop() {
    Scenario::new("undo_exhausted")
        .undo(1)
        .assert(Assertion::LastUndoWasNoop)
        .assert_timeline_len(1)
        .assert_action("Session Start")
        .run()
        .unwrap();
}

#[test]
fn test_undo_several_steps() {
    Scenario::new("undo_several_steps")
        .from_fixture("default")
        .add_file("src/lib.rs")
        .agent_writes("src/lib.rs", b"pub fn greet() {}\n")
        .agent_writes("src/lib.rs", b"pub fn greet() -> u8 { 0 }\n")
        .undo(2)
        .assert(Assertion::LastUndoSteps(2))
        .assert_disk("src/lib.rs", "pub fn greet(name: &str) -> String {\n    format!(\"Hello, {}!\", name)\n}\n")
        .assert_redo_len(2)
        .redo()
        .redo()
        .assert_disk("src/lib.rs", "pub fn greet() -> u8 { 0 }\n")
        .run()
        .unwrap();
}

#[test]
fn test_push_after_undo_clears_redo() {
    Scenario::new("push_clears_redo")
        .with_file("src/lib.rs", b"v1\n")
        .add_file("src/lib.rs")
        .agent_writes("src/lib.rs", b"v2\n")
        .undo(1)
        .assert_redo_len(1)
        .add_note("Plan", "try a different approach")
        .assert_redo_len(0)
        .assert_timeline_len(3)
        .run()
        .unwrap();
}

#[test]
fn test_undo_to_start() {
    Scenario::new("undo_to_start")
        .label("first")
        .label("second")
        .label("third")
        .undo_to_start()
        .assert(Assertion::LastUndoSteps(3))
        .assert_timeline_len(1)
        .assert_action("Session Start")
        .assert_redo_len(3)
        .redo()
        .assert_action("first")
        .run()
        .unwrap();
}

#[test]
fn test_deleted_file_comes_back_on_undo() {
    Scenario::new("deleted_file_undo")
        .with_file("notes/todo.md", b"- ship it\n")
        .agent_deletes("notes/todo.md")
        .assert(Assertion::DiskMissing {
            path: "notes/todo.md".into(),
        })
        .undo(1)
        .assert_disk("notes/todo.md", "- ship it\n")
        .redo()
        .assert(Assertion::DiskMissing {
            path: "notes/todo.md".into(),
        })
        .run()
        .unwrap();
}

#[test]
fn test_removed_fragment_returns_on_undo() {
    Scenario::new("remove_then_undo")
        .from_fixture("default")
        .add_file("src/lib.rs")
        .add_file("README.md")
        .remove_file("src/lib.rs")
        .assert(Assertion::LiveLacksFile {
            path: "src/lib.rs".into(),
        })
        .undo(1)
        .assert(Assertion::LiveContainsFile {
            path: "src/lib.rs".into(),
        })
        .run()
        .unwrap();
}

#[test]
fn test_timeline_is_truncated_to_max_depth() {
    Scenario::new("max_depth")
        .with_max_depth(3)
        .label("a")
        .label("b")
        .label("c")
        .label("d")
        .assert_timeline_len(3)
        .assert_action("d")
        .undo(10)
        .assert(Assertion::LastUndoSteps(2))
        .assert_action("b")
        .run()
        .unwrap();
}

#[test]
fn test_task_history_follows_undo() {
    Scenario::new("task_history_undo")
        .complete_task("Fix greeting", &["make it polite", "done"])
        .complete_task("Add docs", &["document greet", "added"])
        .assert(Assertion::TaskCount(2))
        .undo(1)
        .assert(Assertion::TaskCount(1))
        .assert_action("Fix greeting")
        .run()
        .unwrap();
}
