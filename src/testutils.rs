//! Test utilities for `weather_mcp`.
//!
//! Helpers shared by the unit tests and by external test crates via
//! `use weather_mcp::testutils::*`: in-memory duplex pipes, raw
//! newline-delimited JSON-RPC send/receive, an in-process worker wired to a
//! connected client, and a scripted language model.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{
    client::RpcClient,
    error::{Error, Result},
    llm::{Message, Provider},
    registry::{OperationDescriptor, Registry},
    schema::{Implementation, JSONRPCMessage},
    transport::{GenericDuplex, StreamTransport},
    worker::{Worker, WorkerHandle},
};

/// Two independent in-memory pipes forming one bidirectional channel. The
/// first pair is the worker's (`reader`, `writer`), the second the client's.
pub fn make_duplex_pair() -> (
    impl AsyncRead + Send + Sync + Unpin + 'static,
    impl AsyncWrite + Send + Sync + Unpin + 'static,
    impl AsyncRead + Send + Sync + Unpin + 'static,
    impl AsyncWrite + Send + Sync + Unpin + 'static,
) {
    let (worker_reader, client_writer) = io::duplex(64 * 1024);
    let (client_reader, worker_writer) = io::duplex(64 * 1024);
    (worker_reader, worker_writer, client_reader, client_writer)
}

/// Serialise a [`JSONRPCMessage`], append a `\n` delimiter and write it to the
/// provided writer.
pub async fn send_message<W>(writer: &mut W, message: &JSONRPCMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(message)?;
    writer.write_all(&json).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read a single newline-delimited JSON-RPC message from the reader.
pub async fn read_message<R>(reader: &mut BufReader<R>) -> Result<JSONRPCMessage>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.read_until(b'\n', &mut buf).await?;
    if buf.is_empty() {
        return Err(Error::ConnectionClosed);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    Ok(serde_json::from_slice(&buf)?)
}

/// Serve `registry` from an in-process worker and return an initialized
/// client connected to it.
pub async fn connected_client_and_worker(
    registry: Arc<Registry>,
) -> Result<(RpcClient, WorkerHandle)> {
    let (worker_reader, worker_writer, client_reader, client_writer) = make_duplex_pair();

    let worker_transport = StreamTransport::new(GenericDuplex::new(worker_reader, worker_writer));
    let handle = Worker::new("test-worker", "0.1.0", registry)
        .serve(Box::new(worker_transport))
        .await?;

    let client_transport = StreamTransport::new(GenericDuplex::new(client_reader, client_writer));
    let client = RpcClient::connect(Box::new(client_transport)).await?;
    client
        .initialize(Implementation::new("test-client", "0.1.0"))
        .await?;

    Ok((client, handle))
}

/// One `complete` call as seen by a [`ScriptedProvider`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub operations: Vec<OperationDescriptor>,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Message>,
    requests: Vec<RecordedRequest>,
}

/// A language model that plays back canned replies in order and records
/// what it was asked. Clones share the same script.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Message>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                replies: replies.into(),
                requests: Vec::new(),
            })),
        }
    }

    pub fn push_reply(&self, reply: Message) {
        if let Ok(mut script) = self.script.lock() {
            script.replies.push_back(reply);
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        operations: &[OperationDescriptor],
    ) -> Result<Message> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| Error::Model("script lock poisoned".into()))?;
        script.requests.push(RecordedRequest {
            system: system.to_string(),
            messages: messages.to_vec(),
            operations: operations.to_vec(),
        });
        script
            .replies
            .pop_front()
            .ok_or_else(|| Error::Model("scripted provider has no replies left".into()))
    }
}
