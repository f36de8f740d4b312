use crate::harness::{Assertion, Scenario};
use anyhow::{anyhow, ensure};
use ctx_history::{ComputedValue, DiffService, WORKING_TREE};
use std::sync::Arc;
use std::thread;

#[test]
fn test_concurrent_diff_requests_share_one_computation() {
    Scenario::new("diff_shared_handle")
        .with_file("src/lib.rs", b"one\n")
        .add_file("src/lib.rs")
        .agent_writes("src/lib.rs", b"one\ntwo\n")
        .assert(Assertion::Custom(Box::new(|history| {
            let live = history.live();
            let service = history.diff_service();
            let handles: Vec<_> = thread::scope(|scope| {
                let workers: Vec<_> = (0..16)
                    .map(|_| scope.spawn(|| service.diff(&live)))
                    .collect();
                workers.into_iter().map(|w| w.join()).collect::<Result<_, _>>()
            })
            .map_err(|_| anyhow!("diff thread panicked"))?;

            let first: &ComputedValue<_> = &handles[0];
            for handle in &handles {
                ensure!(ComputedValue::ptr_eq(first, handle), "diff computed more than once");
            }
            let entries = first.get()?;
            ensure!(entries.len() == 1, "expected one entry, got {}", entries.len());
            ensure!(entries[0].lines_added == 1 && entries[0].lines_deleted == 0);

            let peeked = service
                .peek(&live)
                .ok_or_else(|| anyhow!("finished diff not visible to peek"))?;
            ensure!(Arc::ptr_eq(&peeked, &entries), "peek returned a different result");
            Ok(())
        })))
        .run()
        .expect("every caller should get the same diff handle");
}

#[test]
fn test_clear_forces_recomputation() {
    Scenario::new("diff_clear")
        .with_file("src/lib.rs", b"one\n")
        .add_file("src/lib.rs")
        .agent_writes("src/lib.rs", b"uno\n")
        .assert(Assertion::Custom(Box::new(|history| {
            let live = history.live();
            let service = history.diff_service();
            let before = service.diff(&live);
            before.get()?;
            service.clear();
            ensure!(service.peek(&live).is_none(), "cleared cache still answers peek");
            let after = service.diff(&live);
            ensure!(!ComputedValue::ptr_eq(&before, &after), "clear kept the old handle");
            ensure!(after.get()?.len() == 1);
            Ok(())
        })))
        .run()
        .unwrap();
}

#[test]
fn test_new_untracked_file_diffs_as_addition() {
    Scenario::new("diff_untracked_addition")
        .from_fixture("default")
        .add_file("README.md")
        .assert(Assertion::LiveDiffTouches {
            path: "README.md".into(),
            added: 3,
            deleted: 0,
        })
        .run()
        .unwrap();
}

#[test]
fn test_new_tracked_file_is_not_a_change() {
    Scenario::new("diff_tracked_addition")
        .from_fixture("default")
        .add_file("src/main.rs")
        .assert(Assertion::LiveDiffEmpty)
        .run()
        .unwrap();
}

#[test]
fn test_labels_alone_do_not_diff() {
    Scenario::new("diff_label_only")
        .from_fixture("default")
        .add_file("src/lib.rs")
        .label("thinking")
        .assert(Assertion::LiveDiffEmpty)
        .run()
        .unwrap();
}

#[test]
fn test_working_tree_summary() {
    Scenario::new("diff_working_tree_summary")
        .from_fixture("default")
        .add_file("src/lib.rs")
        .external_edit("src/lib.rs", b"pub fn greet() {}\n")
        .assert(Assertion::Custom(Box::new(|history| {
            let session = history.session();
            let files = [session.file("src/lib.rs"), session.file("README.md")];
            // The empty ref stands for "no content", so every line is new.
            let summary = DiffService::summarize_changes(session, "", WORKING_TREE, &files);
            ensure!(summary.files_changed == 2, "files changed: {}", summary.files_changed);
            ensure!(summary.total_added == 4, "lines added: {}", summary.total_added);
            ensure!(summary.total_deleted == 0);
            Ok(())
        })))
        .run()
        .unwrap();
}
