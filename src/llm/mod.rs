//! Language-model conversation types and providers.

mod anthropic;
mod message;

pub use anthropic::AnthropicProvider;
pub use message::{Conversation, Message, MessageContent, Role, ToolRequest, ToolResult};

use async_trait::async_trait;

use crate::{error::Result, registry::OperationDescriptor};

/// A language model that can answer a conversation, optionally requesting
/// operation calls.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next assistant message.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        operations: &[OperationDescriptor],
    ) -> Result<Message>;
}
