use crate::harness::{Assertion, Scenario};
use anyhow::ensure;
use ctx_history::ContextHistory;

fn actions(history: &ContextHistory) -> Vec<String> {
    history
        .contexts()
        .iter()
        .map(|ctx| ctx.action().to_string())
        .collect()
}

#[test]
fn test_merge_keeps_both_branches() {
    Scenario::new("merge_branches")
        .label("A")
        .label("B")
        .label("C")
        .save()
        // Branch off after B in this session
        .undo(1)
        .label("D")
        .label("E")
        .merge_with_saved()
        .assert_timeline_len(6)
        .assert_action("E")
        .assert(Assertion::Custom(Box::new(|history| {
            let got = actions(history);
            ensure!(
                got == ["Session Start", "A", "B", "C", "D", "E"],
                "unexpected merged order {:?}",
                got
            );
            Ok(())
        })))
        .run()
        .expect("merge should interleave older extras before newer tail");
}

#[test]
fn test_merge_keeps_newer_redo_stack() {
    Scenario::new("merge_redo")
        .label("A")
        .label("B")
        .label("C")
        .save()
        .undo(1)
        .label("D")
        .label("E")
        .undo(1)
        .assert_redo_len(1)
        .merge_with_saved()
        .assert_timeline_len(5)
        .assert_redo_len(1)
        .redo()
        .assert_action("E")
        .run()
        .unwrap();
}

#[test]
fn test_merge_with_prefix_history() {
    Scenario::new("merge_prefix")
        .label("A")
        .save()
        .label("B")
        .label("C")
        .merge_with_saved()
        .assert_timeline_len(4)
        .assert(Assertion::Custom(Box::new(|history| {
            ensure!(actions(history) == ["Session Start", "A", "B", "C"]);
            Ok(())
        })))
        .run()
        .unwrap();
}

#[test]
fn test_merged_history_round_trips() {
    Scenario::new("merge_then_save")
        .with_file("src/lib.rs", b"v1\n")
        .add_file("src/lib.rs")
        .save()
        .undo(1)
        .label("elsewhere")
        .merge_with_saved()
        .save()
        .restart()
        .assert_timeline_len(3)
        .assert_action("elsewhere")
        .run()
        .unwrap();
}
