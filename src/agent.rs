//! The agent loop: a conversation with a language model that can call the
//! operations advertised by a set of plugins.

use std::{collections::HashMap, sync::Arc};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    classifier::{QueryClassifier, QueryIntent},
    config::AgentConfig,
    error::{Error, Result},
    invocation::{Invocation, InvocationResult},
    llm::{Conversation, Message, Provider},
    plugin::Plugin,
    registry::OperationDescriptor,
};

pub const SYSTEM_PROMPT: &str = r#"You are a helpful weather assistant. Use the available tools to answer questions about weather, historical data, and agricultural conditions.

When users ask about weather, ALWAYS use the available tools to get data. Make reasonable assumptions:

For ambiguous locations:
- "Fresno" → "Fresno, CA" (most populous)
- "Grand Island" → "Grand Island, NE" (agricultural region)
- "Ames" → "Ames, IA" (agricultural region)

For time periods when not specified:
- General forecast → next 7 days
- "last month" → previous 30 days
- Agricultural/planting → next 14 days

Always call tools first with reasonable defaults, then provide specific data. Only ask for clarification if the tool call fails."#;

/// Final answer to one query.
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    /// Operations called while answering, in call order.
    pub operations_used: Vec<String>,
    /// Classification of the query, when a classifier is configured.
    pub intent: Option<QueryIntent>,
}

pub struct Agent {
    provider: Arc<dyn Provider>,
    plugins: Vec<Box<dyn Plugin>>,
    classifier: Option<QueryClassifier>,
    config: AgentConfig,
    operations: Vec<OperationDescriptor>,
    /// Operation name to index in `plugins`.
    routes: HashMap<String, usize>,
    conversation: Conversation,
    initialized: bool,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        plugins: Vec<Box<dyn Plugin>>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            plugins,
            classifier: None,
            config,
            operations: Vec::new(),
            routes: HashMap::new(),
            conversation: Conversation::new(SYSTEM_PROMPT),
            initialized: false,
        }
    }

    /// Classify each query before answering it and pass the detected
    /// location along to the model.
    pub fn with_classifier(mut self, classifier: QueryClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Start every plugin and collect the operations they advertise. On
    /// failure the plugins started so far are shut down again.
    pub async fn initialize(&mut self) -> Result<()> {
        self.operations.clear();
        self.routes.clear();

        let mut started = 0;
        if let Err(e) = self.start_plugins(&mut started).await {
            warn!("Initialization failed: {}", e);
            for plugin in self.plugins.iter_mut().take(started) {
                if let Err(e) = plugin.shutdown().await {
                    warn!("Failed to shut down plugin {}: {}", plugin.name(), e);
                }
            }
            self.operations.clear();
            self.routes.clear();
            return Err(e);
        }
        self.initialized = true;
        Ok(())
    }

    async fn start_plugins(&mut self, started: &mut usize) -> Result<()> {
        for (index, plugin) in self.plugins.iter_mut().enumerate() {
            let discovered = plugin.start().await?;
            *started += 1;
            info!(
                "Plugin {} provides {} operations",
                plugin.name(),
                discovered.len()
            );
            for descriptor in discovered {
                if self.routes.contains_key(&descriptor.name) {
                    return Err(Error::DuplicateOperation(descriptor.name));
                }
                debug!("  {}: {}", descriptor.name, descriptor.description);
                self.routes.insert(descriptor.name.clone(), index);
                self.operations.push(descriptor);
            }
        }

        if self.operations.is_empty() {
            return Err(Error::NoOperations);
        }
        Ok(())
    }

    pub fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Answer `text`, calling operations as the model requests them.
    ///
    /// The whole exchange runs under the configured query timeout. When it
    /// fails or times out, the turns it added are removed so the
    /// conversation stays well-formed for the next query.
    pub async fn query(&mut self, text: &str) -> Result<Reply> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        let checkpoint = self.conversation.len();
        let limit = self.config.query_timeout;
        let outcome = timeout(limit, self.run(text)).await;

        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                warn!("Query failed: {}", e);
                self.conversation.truncate(checkpoint);
                Err(e)
            }
            Err(_) => {
                warn!("Query timed out after {:?}", limit);
                self.conversation.truncate(checkpoint);
                Err(Error::QueryTimeout(limit))
            }
        }
    }

    async fn run(&mut self, text: &str) -> Result<Reply> {
        let intent = match &self.classifier {
            Some(classifier) => Some(classifier.classify(text).await?),
            None => None,
        };
        let content = match intent.as_ref().and_then(QueryIntent::location) {
            Some(location) => format!("{text}\n\n[Location context: {location}]"),
            None => text.to_string(),
        };
        self.conversation.push(Message::user().with_text(content));

        let mut operations_used = Vec::new();
        let mut rounds = 0;
        loop {
            let response = self
                .provider
                .complete(
                    self.conversation.system(),
                    self.conversation.messages(),
                    &self.operations,
                )
                .await?;
            let invocations = response.invocations();
            self.conversation.push(response.clone());

            if invocations.is_empty() {
                return Ok(Reply {
                    text: response.text(),
                    operations_used,
                    intent,
                });
            }

            if let Some(max) = self.config.max_rounds {
                if rounds >= max {
                    return Err(Error::RoundLimit(max));
                }
            }
            rounds += 1;

            // One call at a time, in the order the model asked for them.
            let mut results = Message::user();
            for invocation in invocations {
                operations_used.push(invocation.name.clone());
                let result = self.dispatch(invocation).await;
                results = results.with_tool_result(&result);
            }
            self.conversation.push(results);
        }
    }

    async fn dispatch(&mut self, invocation: Invocation) -> InvocationResult {
        let Some(&index) = self.routes.get(&invocation.name) else {
            let error = Error::UnknownOperation(invocation.name.clone());
            return InvocationResult::failure(invocation.id, &error);
        };
        let plugin = &mut self.plugins[index];
        debug!("Calling {} via {}", invocation.name, plugin.name());
        let result = plugin.invoke(invocation).await;
        if let Some(kind) = result.error_kind() {
            warn!("Operation call {} failed ({})", result.id, kind);
        }
        result
    }

    /// Forget the conversation; plugins stay connected.
    pub fn reset(&mut self) {
        self.conversation.reset();
    }

    /// Shut down every plugin. All plugins are attempted; the first error
    /// is returned.
    pub async fn cleanup(&mut self) -> Result<()> {
        let mut first_error = None;
        for plugin in &mut self.plugins {
            if let Err(e) = plugin.shutdown().await {
                warn!("Failed to shut down plugin {}: {}", plugin.name(), e);
                first_error.get_or_insert(e);
            }
        }
        self.initialized = false;
        self.operations.clear();
        self.routes.clear();
        first_error.map_or(Ok(()), Err)
    }
}
