//! Chat dialog types.
//!
//! The engine only flattens dialogs through a [`PromptBuilder`] collaborator;
//! these types carry the turns and tag generated output with a role.
//!
//! [`PromptBuilder`]: crate::traits::PromptBuilder

use std::fmt;

use serde::Serialize;

/// A role in a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (sets behavior).
    System,
    /// User messages (human input).
    User,
    /// Assistant responses (model output).
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a dialog.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// An ordered multi-turn conversation.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Dialog {
    messages: Vec<Message>,
}

impl Dialog {
    /// Create an empty dialog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dialog seeded with a system prompt.
    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Add a user message.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    /// Add an assistant message.
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    /// Add any message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Get all messages in turn order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}
