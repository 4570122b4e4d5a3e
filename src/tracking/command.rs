//! Command lifecycle notifications

use std::fmt;
use uuid::Uuid;

/// Identity of one command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    /// Unique execution id
    pub id: Uuid,
    /// Human readable label
    pub label: String,
}

impl CommandInfo {
    /// New command execution with a fresh id
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
        }
    }
}

impl fmt::Display for CommandInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// Lifecycle event of a user level command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
    /// A command began executing
    Started(CommandInfo),
    /// A command finished successfully
    Completed(CommandInfo),
    /// A command aborted with a reason
    Failed(CommandInfo, String),
}

impl CommandEvent {
    /// Command the event refers to
    pub fn info(&self) -> &CommandInfo {
        match self {
            CommandEvent::Started(info)
            | CommandEvent::Completed(info)
            | CommandEvent::Failed(info, _) => info,
        }
    }
}
