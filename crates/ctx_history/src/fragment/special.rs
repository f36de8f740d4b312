//! Well-known text fragments a context holds at most one of.

use crate::project::{SYNTAX_MARKDOWN, SYNTAX_NONE};
use serde::{Deserialize, Serialize};

/// Kinds of singleton string fragments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpecialTextType {
    BuildResults,
    SearchNotes,
    DiscardedContext,
    TaskList,
}

impl SpecialTextType {
    pub const ALL: [SpecialTextType; 4] = [
        SpecialTextType::BuildResults,
        SpecialTextType::SearchNotes,
        SpecialTextType::DiscardedContext,
        SpecialTextType::TaskList,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            SpecialTextType::BuildResults => "Latest Build Results",
            SpecialTextType::SearchNotes => "Code Notes",
            SpecialTextType::DiscardedContext => "Discarded Context",
            SpecialTextType::TaskList => "Task List",
        }
    }

    pub fn syntax_style(&self) -> &'static str {
        match self {
            SpecialTextType::BuildResults => SYNTAX_NONE,
            _ => SYNTAX_MARKDOWN,
        }
    }

    pub fn from_description(description: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.description() == description)
    }
}
