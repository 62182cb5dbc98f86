use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    arguments::Arguments,
    error::Result,
    invocation::{Invocation, InvocationResult},
    registry::{OperationDescriptor, Registry},
};

/// A source of operations the agent can call, independent of where the
/// handlers actually run.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Set up the transport and discover the plugin's operations.
    async fn start(&mut self) -> Result<Vec<OperationDescriptor>>;

    /// Operations discovered by the last successful `start`.
    fn operations(&self) -> &[OperationDescriptor];

    async fn call(&mut self, name: &str, arguments: Arguments) -> Result<Value>;

    /// Run an invocation, folding any failure into the result.
    async fn invoke(&mut self, invocation: Invocation) -> InvocationResult {
        let result = self.call(&invocation.name, invocation.arguments).await;
        InvocationResult::from_result(invocation.id, result)
    }

    async fn shutdown(&mut self) -> Result<()>;
}

/// Operations served from a registry in the same process.
pub struct LocalPlugin {
    name: String,
    registry: Arc<Registry>,
    operations: Vec<OperationDescriptor>,
}

impl LocalPlugin {
    pub fn new(name: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            name: name.into(),
            registry,
            operations: Vec::new(),
        }
    }
}

#[async_trait]
impl Plugin for LocalPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<Vec<OperationDescriptor>> {
        self.operations = self.registry.describe_all();
        Ok(self.operations.clone())
    }

    fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    async fn call(&mut self, name: &str, arguments: Arguments) -> Result<Value> {
        self.registry.dispatch(name, arguments).await
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
