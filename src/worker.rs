use std::sync::Arc;

use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    arguments::Arguments,
    error::{Error, Result},
    registry::Registry,
    schema::*,
    transport::{Transport, TransportStream},
};

/// Serves a [`Registry`] over a JSON-RPC transport. This is the process on
/// the far side of a subprocess plugin.
pub struct Worker {
    info: Implementation,
    registry: Arc<Registry>,
    initialized: bool,
}

/// Handle to a worker loop running in the background.
pub struct WorkerHandle {
    pub handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(name: impl Into<String>, version: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            info: Implementation::new(name, version),
            registry,
            initialized: false,
        }
    }

    /// Start serving in a background task.
    pub async fn serve(self, transport: Box<dyn Transport>) -> Result<WorkerHandle> {
        let shutdown = CancellationToken::new();
        let stream = Self::open(transport).await?;
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            self.run_loop(stream, token).await;
        });
        Ok(WorkerHandle { handle, shutdown })
    }

    /// Serve until the peer closes the stream.
    pub async fn run(self, transport: Box<dyn Transport>) -> Result<()> {
        let stream = Self::open(transport).await?;
        self.run_loop(stream, CancellationToken::new()).await;
        Ok(())
    }

    async fn open(mut transport: Box<dyn Transport>) -> Result<Box<dyn TransportStream>> {
        transport.connect().await?;
        transport.framed()
    }

    async fn run_loop(mut self, stream: Box<dyn TransportStream>, shutdown: CancellationToken) {
        let (mut sink_tx, mut stream_rx) = stream.split();
        info!(
            "Worker {} serving {} operations",
            self.info.name,
            self.registry.len()
        );

        loop {
            tokio::select! {
                result = stream_rx.next() => {
                    match result {
                        Some(Ok(message)) => {
                            if let Err(e) = self.handle_message(message, &mut sink_tx).await {
                                error!("Error handling message: {}", e);
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!("Error reading message: {}", e);
                            break;
                        }
                        None => {
                            info!("Parent disconnected");
                            break;
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Worker shutdown requested");
                    break;
                }
            }
        }
        info!("Worker stopped");
    }

    async fn handle_message(
        &mut self,
        message: JSONRPCMessage,
        sink: &mut SplitSink<Box<dyn TransportStream>, JSONRPCMessage>,
    ) -> Result<()> {
        match message {
            JSONRPCMessage::Request(request) => {
                let response = self.handle_request(request).await;
                sink.send(response).await?;
            }
            JSONRPCMessage::Notification(notification) => {
                debug!(
                    "Received notification: {}",
                    notification.notification.method
                );
            }
            JSONRPCMessage::Response(_) => {
                warn!("Worker received unexpected response message");
            }
            JSONRPCMessage::Error(error) => {
                warn!("Worker received error message: {:?}", error);
            }
        }
        Ok(())
    }

    async fn handle_request(&mut self, request: JSONRPCRequest) -> JSONRPCMessage {
        let params = request.params_value();
        let method = request.request.method.as_str();

        let result = match method {
            "initialize" => self.handle_initialize(params),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" | "tools/call" if !self.initialized => Err(Error::Protocol(format!(
                "{method} received before initialize"
            ))),
            "tools/list" => self.handle_list_tools(),
            "tools/call" => self.handle_call_tool(params).await,
            _ => Err(Error::UnknownOperation(method.to_string())),
        };

        match result {
            Ok(value) => JSONRPCMessage::Response(JSONRPCResponse::new(request.id, value)),
            Err(e) => {
                debug!("Request {} failed: {}", request.id, e);
                JSONRPCMessage::Error(e.to_jsonrpc_error(request.id))
            }
        }
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value> {
        let params: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| Error::Protocol("initialize requires parameters".into()))?;
        info!(
            "Initialized by {} {} (protocol {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );
        self.initialized = true;

        let result = InitializeResult {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: self.info.clone(),
            instructions: None,
        };
        Ok(serde_json::to_value(result)?)
    }

    fn handle_list_tools(&self) -> Result<Value> {
        let result = ListToolsResult {
            tools: self
                .registry
                .describe_all()
                .iter()
                .map(|d| d.to_tool())
                .collect(),
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value> {
        let params: CallToolParams = params
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| Error::Protocol("tools/call requires parameters".into()))?;
        let arguments = Arguments::from(params.arguments.unwrap_or_default());
        let value = self.registry.dispatch(&params.name, arguments).await?;
        Ok(serde_json::to_value(CallToolResult::from_value(value))?)
    }
}

impl WorkerHandle {
    /// Stop the worker loop and wait for it to finish.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.handle
            .await
            .map_err(|e| Error::Transport(format!("worker task failed: {e}")))
    }
}
