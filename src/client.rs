use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    arguments::Arguments,
    error::{Error, Result},
    schema::*,
    transport::{Transport, TransportStream},
};

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value>>>>>;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Parent side of the plugin protocol.
///
/// Requests carry monotonically increasing numeric ids and are matched to
/// responses through a pending map, so several calls may be in flight at
/// once. A background task reads the stream; when it ends or yields a
/// malformed line every pending call fails with a transport error and the
/// client refuses further requests.
pub struct RpcClient {
    sink: Mutex<SplitSink<Box<dyn TransportStream>, JSONRPCMessage>>,
    pending: PendingMap,
    next_request_id: AtomicI64,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    timeout: Duration,
}

impl RpcClient {
    /// Connect using the provided transport
    pub async fn connect(mut transport: Box<dyn Transport>) -> Result<Self> {
        transport.connect().await?;
        let stream = transport.framed()?;
        let (sink, stream) = stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(stream, pending.clone(), closed.clone()));

        info!("Plugin client connected");
        Ok(Self {
            sink: Mutex::new(sink),
            pending,
            next_request_id: AtomicI64::new(1),
            closed,
            reader,
            timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the peer has gone away.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Perform the handshake: `initialize`, then `notifications/initialized`.
    pub async fn initialize(&self, client_info: Implementation) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info,
        };
        let value = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;
        let result: InitializeResult = serde_json::from_value(value)?;
        if result.protocol_version != LATEST_PROTOCOL_VERSION {
            warn!(
                "Worker speaks protocol {} (we speak {})",
                result.protocol_version, LATEST_PROTOCOL_VERSION
            );
        }
        self.notify("notifications/initialized").await?;
        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<ListToolsResult> {
        let value = self.request("tools/list", None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call an operation and return its JSON payload.
    pub async fn call_tool(&self, name: &str, arguments: Arguments) -> Result<Value> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments.into_map()),
        };
        let value = self
            .request("tools/call", Some(serde_json::to_value(params)?))
            .await?;
        let result: CallToolResult = serde_json::from_value(value)?;
        if result.is_error == Some(true) {
            return Err(Error::handler(name, result.into_value().to_string()));
        }
        Ok(result.into_value())
    }

    pub async fn ping(&self) -> Result<()> {
        self.request("ping", None).await.map(|_| ())
    }

    /// Send a request and wait for the matching response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = RequestId::Number(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        // The reader marks the client closed before draining the pending
        // map, so a request registered after the drain is caught here.
        if self.is_closed() {
            self.pending.lock().await.remove(&id);
            return Err(Error::ConnectionClosed);
        }

        let request = JSONRPCRequest::new(id.clone(), method, params);
        debug!("Sending {} request {}", method, id);
        if let Err(e) = self
            .sink
            .lock()
            .await
            .send(JSONRPCMessage::Request(request))
            .await
        {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::timeout(self.timeout, id.to_string()))
            }
        }
    }

    async fn notify(&self, method: &str) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(JSONRPCMessage::Notification(JSONRPCNotification::new(
                method,
            )))
            .await
    }

    /// Close our half of the stream, signalling end-of-input to the peer.
    pub async fn close(&self) -> Result<()> {
        self.sink.lock().await.close().await
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut stream: futures::stream::SplitStream<Box<dyn TransportStream>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(JSONRPCMessage::Response(response))) => {
                let value = Value::Object(response.result.other);
                complete(&pending, &response.id, Ok(value)).await;
            }
            Some(Ok(JSONRPCMessage::Error(error))) => {
                let err = Error::from_jsonrpc_error(error.error);
                complete(&pending, &error.id, Err(err)).await;
            }
            Some(Ok(JSONRPCMessage::Request(request))) => {
                warn!(
                    "Ignoring request {} from worker",
                    request.request.method
                );
            }
            Some(Ok(JSONRPCMessage::Notification(notification))) => {
                debug!(
                    "Received notification: {}",
                    notification.notification.method
                );
            }
            Some(Err(e)) => {
                error!("Malformed message from worker: {}", e);
                break format!("worker sent a malformed message: {e}");
            }
            None => {
                info!("Worker closed the connection");
                break "worker closed the connection".to_string();
            }
        }
    };

    closed.store(true, Ordering::SeqCst);
    let mut pending = pending.lock().await;
    for (id, tx) in pending.drain() {
        debug!("Failing pending request {}", id);
        let _ = tx.send(Err(Error::Transport(reason.clone())));
    }
}

async fn complete(pending: &PendingMap, id: &RequestId, result: Result<Value>) {
    match pending.lock().await.remove(id) {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => warn!("Response for unknown request {}", id),
    }
}
