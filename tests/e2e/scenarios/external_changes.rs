use crate::harness::{Assertion, Scenario};
use anyhow::anyhow;

#[test]
fn test_consecutive_external_edits_collapse() {
    Scenario::new("external_edits_collapse")
        .with_file("src/lib.rs", b"one\n")
        .add_file("src/lib.rs")
        .assert_timeline_len(2)
        .external_edit("src/lib.rs", b"two\n")
        .detect_external_changes(&["src/lib.rs"])
        .assert_timeline_len(3)
        .assert_action("Load External Changes")
        .assert_captured("src/lib.rs", "two\n")
        .external_edit("src/lib.rs", b"three\n")
        .detect_external_changes(&["src/lib.rs"])
        // Replaced, not appended
        .assert_timeline_len(3)
        .assert_action("Load External Changes (2)")
        .assert_captured("src/lib.rs", "three\n")
        .external_edit("src/lib.rs", b"four\n")
        .detect_external_changes(&["src/lib.rs"])
        .assert_timeline_len(3)
        .assert_action("Load External Changes (3)")
        .run()
        .expect("external edits should collapse into one entry");
}

#[test]
fn test_unchanged_files_push_nothing() {
    Scenario::new("external_no_change")
        .from_fixture("default")
        .add_file("src/lib.rs")
        .detect_external_changes(&["src/lib.rs", "src/main.rs"])
        .assert_timeline_len(2)
        .run()
        .unwrap();
}

#[test]
fn test_other_push_breaks_the_collapse() {
    Scenario::new("external_collapse_reset")
        .with_file("src/lib.rs", b"one\n")
        .add_file("src/lib.rs")
        .external_edit("src/lib.rs", b"two\n")
        .detect_external_changes(&["src/lib.rs"])
        .add_note("Plan", "look at the edit")
        .external_edit("src/lib.rs", b"three\n")
        .detect_external_changes(&["src/lib.rs"])
        .assert_timeline_len(5)
        .assert_action("Load External Changes")
        .run()
        .unwrap();
}

#[test]
fn test_file_is_stale_until_reconciled() {
    Scenario::new("external_staleness")
        .with_file("src/lib.rs", b"one\n")
        .add_file("src/lib.rs")
        .external_edit("src/lib.rs", b"two\n")
        .assert(Assertion::FileStale {
            path: "src/lib.rs".into(),
        })
        .assert_captured("src/lib.rs", "one\n")
        .detect_external_changes(&["src/lib.rs"])
        .assert(Assertion::Custom(Box::new(|history| {
            let live = history.live();
            let file = history.session().file("src/lib.rs");
            if live.is_file_stale(&file) {
                return Err(anyhow!("src/lib.rs still stale after reconciling"));
            }
            Ok(())
        })))
        .run()
        .unwrap();
}

#[test]
fn test_external_change_diff_and_undo() {
    Scenario::new("external_change_diff")
        .with_file("src/lib.rs", b"a\nb\n")
        .add_file("src/lib.rs")
        .external_edit("src/lib.rs", b"a\nc\n")
        .detect_external_changes(&["src/lib.rs"])
        .assert(Assertion::LiveDiffTouches {
            path: "src/lib.rs".into(),
            added: 1,
            deleted: 1,
        })
        .undo(1)
        .assert_disk("src/lib.rs", "a\nb\n")
        .run()
        .unwrap();
}
