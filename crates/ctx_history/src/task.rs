//! Task history: chat transcripts and their compressed summaries.

use crate::error::{HistoryError, Result};
use crate::fragment::Fragment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMessageType {
    User,
    Ai,
    System,
    Custom,
}

impl ChatMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMessageType::User => "user",
            ChatMessageType::Ai => "ai",
            ChatMessageType::System => "system",
            ChatMessageType::Custom => "custom",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    pub kind: ChatMessageType,
    pub text: String,
}

impl ChatMessage {
    pub fn new(kind: ChatMessageType, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ChatMessageType::User, text)
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self::new(ChatMessageType::Ai, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(ChatMessageType::System, text)
    }
}

/// Renders a transcript the way it is shown to the model.
pub fn format_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("<message type={}>\n{}\n</message>", m.kind.as_str(), m.text.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// What kind of task produced an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    None,
    Context,
    Code,
    Ask,
    Search,
    Architect,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::None => "None",
            TaskType::Context => "Context",
            TaskType::Code => "Code",
            TaskType::Ask => "Ask",
            TaskType::Search => "Search",
            TaskType::Architect => "Architect",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskMeta {
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TaskMeta {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            model: None,
        }
    }
}

/// One finished task in a context's history.
///
/// Holds the full transcript (`log`), a `summary`, or both. An entry with a
/// summary counts as compressed even if the log is kept for replay.
#[derive(Clone, Debug)]
pub struct TaskEntry {
    sequence: u32,
    log: Option<Arc<Fragment>>,
    summary: Option<String>,
    meta: Option<TaskMeta>,
}

impl TaskEntry {
    /// Builds an entry, rejecting one with neither log nor summary.
    pub fn new(
        sequence: u32,
        log: Option<Arc<Fragment>>,
        summary: Option<String>,
        meta: Option<TaskMeta>,
    ) -> Result<Self> {
        if log.is_none() && summary.is_none() {
            return Err(HistoryError::InvalidTaskEntry { sequence });
        }
        Ok(Self {
            sequence,
            log,
            summary,
            meta,
        })
    }

    pub fn from_log(sequence: u32, log: Arc<Fragment>, meta: Option<TaskMeta>) -> Self {
        Self {
            sequence,
            log: Some(log),
            summary: None,
            meta,
        }
    }

    pub fn from_summary(sequence: u32, summary: impl Into<String>) -> Self {
        Self {
            sequence,
            log: None,
            summary: Some(summary.into()),
            meta: None,
        }
    }

    /// The same entry with a summary attached; the log is retained.
    pub fn compressed(&self, summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            ..self.clone()
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn log(&self) -> Option<&Arc<Fragment>> {
        self.log.as_ref()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn meta(&self) -> Option<&TaskMeta> {
        self.meta.as_ref()
    }

    pub fn is_compressed(&self) -> bool {
        self.summary.is_some()
    }

    /// Text given to the model: the summary if present, else the transcript.
    pub fn to_ai_text(&self) -> String {
        match (&self.summary, &self.log) {
            (Some(summary), _) => format!(
                "<task sequence={} summarized=true>\n{}\n</task>",
                self.sequence,
                summary.trim_end()
            ),
            (None, Some(log)) => format!(
                "<task sequence={}>\n{}\n</task>",
                self.sequence,
                log.text()
            ),
            (None, None) => String::new(),
        }
    }

    /// One-line label for history lists.
    pub fn short_text(&self) -> String {
        match (&self.summary, &self.log) {
            (Some(summary), _) => summary.clone(),
            (None, Some(log)) => log.short_description(),
            (None, None) => String::new(),
        }
    }
}

impl PartialEq for TaskEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
            && self.summary == other.summary
            && self.meta == other.meta
            && match (&self.log, &other.log) {
                (Some(a), Some(b)) => a == b,
                (None, None) => true,
                _ => false,
            }
    }
}
