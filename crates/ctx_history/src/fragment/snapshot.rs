use crate::project::{CodeUnit, ProjectFile};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Text shown in place of image bytes.
pub const IMAGE_PLACEHOLDER: &str = "[Image content provided out of band]";

/// Materialized content of a fragment at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentSnapshot {
    pub text: Arc<str>,
    /// Declarations the content covers.
    pub sources: BTreeSet<CodeUnit>,
    /// Project files the content was derived from.
    pub files: BTreeSet<ProjectFile>,
    pub image: Option<Arc<[u8]>>,
    /// False when the source was missing or a symbol did not resolve.
    pub valid: bool,
}

impl ContentSnapshot {
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Self {
            text: text.into(),
            sources: BTreeSet::new(),
            files: BTreeSet::new(),
            image: None,
            valid: true,
        }
    }

    pub fn image(bytes: Option<Arc<[u8]>>) -> Self {
        let valid = bytes.is_some();
        Self {
            text: Arc::from(IMAGE_PLACEHOLDER),
            sources: BTreeSet::new(),
            files: BTreeSet::new(),
            image: bytes,
            valid,
        }
    }

    pub fn with_files(mut self, files: impl IntoIterator<Item = ProjectFile>) -> Self {
        self.files.extend(files);
        self
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = CodeUnit>) -> Self {
        for unit in sources {
            self.files.insert(unit.source.clone());
            self.sources.insert(unit);
        }
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }
}
