use crate::harness::{Assertion, Scenario};
use anyhow::{anyhow, ensure};
use ctx_history::{archive_format, FormatVersion};

#[test]
fn test_restart_restores_timeline() {
    Scenario::new("restart_restores_timeline")
        .with_file("src/lib.rs", b"v1\n")
        .add_file("src/lib.rs")
        .add_note("Plan", "rename greet")
        .complete_task("Rename greet", &["rename it", "renamed"])
        .save()
        .external_edit("src/lib.rs", b"edited while closed\n")
        .restart()
        .assert_timeline_len(4)
        .assert(Assertion::TaskCount(1))
        .assert(Assertion::LiveNoteText {
            description: "Plan".into(),
            content: "rename greet".into(),
        })
        // The archive remembers what was captured, not what is on disk now
        .assert_captured("src/lib.rs", "v1\n")
        .assert(Assertion::FileStale {
            path: "src/lib.rs".into(),
        })
        .run()
        .expect("saved history should reload intact");
}

#[test]
fn test_undo_after_restart() {
    Scenario::new("undo_after_restart")
        .with_file("src/lib.rs", b"v1\n")
        .add_file("src/lib.rs")
        .agent_writes("src/lib.rs", b"v2\n")
        .save()
        .restart()
        .undo(1)
        .assert_disk("src/lib.rs", "v1\n")
        .redo()
        .assert_disk("src/lib.rs", "v2\n")
        .run()
        .unwrap();
}

#[test]
fn test_git_state_survives_restart() {
    Scenario::new("git_state_restart")
        .from_fixture("default")
        .add_file("src/main.rs")
        .record_git_state()
        .assert(Assertion::GitStateRecorded)
        .save()
        .restart()
        .assert(Assertion::GitStateRecorded)
        .run()
        .unwrap();
}

#[test]
fn test_deleted_files_survive_restart() {
    Scenario::new("deleted_files_restart")
        .with_file("notes/todo.md", b"- ship it\n")
        .agent_deletes("notes/todo.md")
        .save()
        .restart()
        .undo(1)
        .assert_disk("notes/todo.md", "- ship it\n")
        .run()
        .unwrap();
}

#[test]
fn test_saved_archive_is_current_format() {
    Scenario::new("archive_format")
        .from_fixture("default")
        .add_file("README.md")
        .save()
        .assert(Assertion::Custom(Box::new(|history| {
            let path = history.session().root().join(".history").join("session.zip");
            let format = archive_format(&path)?;
            ensure!(format == FormatVersion::CURRENT, "unexpected format {:?}", format);
            Ok(())
        })))
        .run()
        .unwrap();
}

#[test]
fn test_restart_without_archive_fails() {
    Scenario::new("restart_without_archive")
        .label("never saved")
        .restart()
        .run()
        .expect_failure();
}

#[test]
fn test_pinned_flag_survives_restart() {
    Scenario::new("pinned_restart")
        .from_fixture("default")
        .add_file("src/lib.rs")
        .pin_file("src/lib.rs")
        .save()
        .restart()
        .assert(Assertion::Custom(Box::new(|history| {
            let live = history.live();
            let pinned = live
                .fragments()
                .iter()
                .find(|f| live.is_pinned(f))
                .ok_or_else(|| anyhow!("no pinned fragment after restart"))?;
            ensure!(
                pinned.project_file().map(|f| f.rel_display()).as_deref() == Some("src/lib.rs"),
                "wrong fragment pinned"
            );
            Ok(())
        })))
        .run()
        .unwrap();
}
