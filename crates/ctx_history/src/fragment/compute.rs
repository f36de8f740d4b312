//! Snapshot computations for dynamic fragments.
//!
//! These run on the worker pool. Missing files and unresolved symbols give an
//! invalid or empty snapshot, never an error.

use super::snapshot::ContentSnapshot;
use super::SummaryType;
use crate::project::{CallDirection, CodeUnit, FileRef, ProjectFile};
use crate::session::Services;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub(crate) fn project_file(services: &Services, file: &ProjectFile) -> ContentSnapshot {
    let path = file.abs_path();
    let valid = services.fs.exists(&path);
    let text = services.fs.read_to_string(&path).unwrap_or_else(|e| {
        debug!(file = %file, error = %e, "project file unreadable");
        String::new()
    });
    let snapshot = ContentSnapshot::text(text)
        .with_files([file.clone()])
        .with_sources(services.analyzer.declarations(file));
    if valid {
        snapshot
    } else {
        snapshot.invalid()
    }
}

pub(crate) fn external_file(services: &Services, path: &Path) -> ContentSnapshot {
    match services.fs.read_to_string(path) {
        Ok(text) => ContentSnapshot::text(text),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "external file unreadable");
            ContentSnapshot::text("").invalid()
        }
    }
}

pub(crate) fn image_file(services: &Services, file: &FileRef) -> ContentSnapshot {
    let bytes = services.fs.read_bytes(&file.abs_path()).ok().map(Arc::from);
    ContentSnapshot::image(bytes).with_files(file.project_file().cloned())
}

pub(crate) fn usages(services: &Services, target: &str, include_test_files: bool) -> ContentSnapshot {
    let definitions = services.analyzer.definitions(target);
    let hits = services.analyzer.usages(target, include_test_files);
    if hits.is_empty() {
        let snapshot =
            ContentSnapshot::text(format!("No relevant usages found for symbol: {}", target));
        return if definitions.is_empty() {
            snapshot.invalid()
        } else {
            snapshot
        };
    }

    let text = hits
        .iter()
        .map(|hit| {
            format!(
                "<usage in=\"{}\" file=\"{}\">\n{}\n</usage>",
                hit.enclosing.fq_name,
                hit.enclosing.source,
                hit.snippet.trim_end()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let snapshot =
        ContentSnapshot::text(text).with_sources(hits.into_iter().map(|hit| hit.enclosing));
    if definitions.is_empty() {
        snapshot.invalid()
    } else {
        snapshot
    }
}

pub(crate) fn code(services: &Services, fq_name: &str) -> ContentSnapshot {
    let definitions = services.analyzer.definitions(fq_name);
    let bodies: Vec<String> = definitions
        .iter()
        .filter_map(|unit| services.analyzer.source(unit))
        .collect();
    if bodies.is_empty() {
        return ContentSnapshot::text(format!("No source found for method/class: {}", fq_name))
            .invalid();
    }
    ContentSnapshot::text(bodies.join("\n\n")).with_sources(definitions)
}

pub(crate) fn call_graph(
    services: &Services,
    method: &str,
    depth: u32,
    direction: CallDirection,
) -> ContentSnapshot {
    let Some(root) = services.analyzer.definitions(method).into_iter().next() else {
        return ContentSnapshot::text(format!("Method not found: {}", method)).invalid();
    };

    let sites = services.analyzer.call_graph(&root, depth, direction);
    if sites.is_empty() {
        return ContentSnapshot::text(format!("No call graph available for {}", method))
            .with_sources([root]);
    }

    let mut text = format!("Root: {}\n", root.fq_name);
    for site in &sites {
        let indent = "  ".repeat(site.depth as usize);
        let (arrow, other) = match direction {
            CallDirection::Callees => ("->", &site.callee),
            CallDirection::Callers => ("<-", &site.caller),
        };
        text.push_str(&format!("{}{} {}", indent, arrow, other));
        if !site.line.is_empty() {
            text.push_str(&format!("  `{}`", site.line.trim()));
        }
        text.push('\n');
    }
    ContentSnapshot::text(text).with_sources([root])
}

pub(crate) fn summary(services: &Services, target: &str, summary_type: SummaryType) -> ContentSnapshot {
    let units: Vec<CodeUnit> = match summary_type {
        SummaryType::CodeUnitSkeleton => services
            .analyzer
            .definitions(target)
            .into_iter()
            .filter(CodeUnit::is_class)
            .collect(),
        SummaryType::FileSkeletons => {
            let file = ProjectFile::new(services.root.clone(), target);
            services.analyzer.top_level_declarations(&file)
        }
    };

    let mut seen = BTreeSet::new();
    let mut parts = Vec::new();
    let mut covered = Vec::new();
    for unit in &units {
        if let Some(skeleton) = services.analyzer.skeleton(unit) {
            if seen.insert(unit.fq_name.clone()) {
                parts.push(skeleton);
                covered.push(unit.clone());
            }
        }
        let ancestors = services.analyzer.direct_ancestors(unit);
        if ancestors.is_empty() {
            continue;
        }
        let names: Vec<&str> = ancestors.iter().map(|a| a.fq_name.as_str()).collect();
        parts.push(format!("// Direct ancestors of {}: {}", unit.short_name(), names.join(", ")));
        for ancestor in ancestors {
            if !seen.insert(ancestor.fq_name.clone()) {
                continue;
            }
            if let Some(skeleton) = services.analyzer.skeleton(&ancestor) {
                parts.push(skeleton);
                covered.push(ancestor);
            }
        }
    }

    if covered.is_empty() {
        return ContentSnapshot::text(format!("No summary found for: {}", target)).invalid();
    }
    ContentSnapshot::text(parts.join("\n\n")).with_sources(covered)
}

/// Short label for pasted text: a markdown title or the first line.
pub(crate) fn paste_label(text: &str) -> String {
    const MAX: usize = 60;
    let Some(line) = text.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return "text content".to_string();
    };
    let line = line.trim_start_matches('#').trim();
    if line.is_empty() {
        return "text content".to_string();
    }
    if line.chars().count() > MAX {
        let cut: String = line.chars().take(MAX - 3).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}
