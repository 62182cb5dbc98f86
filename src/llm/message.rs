use serde::{Deserialize, Serialize};

use crate::{
    arguments::Arguments,
    invocation::{Invocation, InvocationResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    pub arguments: Arguments,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub content: String,
    pub is_error: bool,
}

/// Content passed inside a message: plain text, a model's request to run an
/// operation, or the result handed back for one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    ToolRequest(ToolRequest),
    ToolResult(ToolResult),
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_request(&self) -> Option<&ToolRequest> {
        match self {
            MessageContent::ToolRequest(request) => Some(request),
            _ => None,
        }
    }
}

/// A message to or from a language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
}

impl Message {
    pub fn user() -> Self {
        Message {
            role: Role::User,
            content: Vec::new(),
        }
    }

    pub fn assistant() -> Self {
        Message {
            role: Role::Assistant,
            content: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_content(MessageContent::text(text))
    }

    pub fn with_tool_request(
        self,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Arguments,
    ) -> Self {
        self.with_content(MessageContent::ToolRequest(ToolRequest {
            id: id.into(),
            name: name.into(),
            arguments,
        }))
    }

    pub fn with_tool_result(self, result: &InvocationResult) -> Self {
        self.with_content(MessageContent::ToolResult(ToolResult {
            id: result.id.clone(),
            content: result.to_content(),
            is_error: !result.is_success(),
        }))
    }

    /// Text blocks joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(MessageContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Operation calls requested in this message, in order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.content
            .iter()
            .filter_map(MessageContent::as_tool_request)
            .map(|r| Invocation::new(&r.id, &r.name, r.arguments.clone()))
            .collect()
    }

    pub fn has_tool_requests(&self) -> bool {
        self.content.iter().any(|c| c.as_tool_request().is_some())
    }
}

/// Ordered turns of one agent session under a fixed system prompt.
#[derive(Debug, Clone)]
pub struct Conversation {
    system: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            messages: Vec::new(),
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop every turn after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    /// Forget all turns; the system prompt stays.
    pub fn reset(&mut self) {
        self.messages.clear();
    }
}
