use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::{
    arguments::Arguments,
    client::{RpcClient, DEFAULT_CALL_TIMEOUT},
    error::{Error, Result},
    plugin::Plugin,
    registry::OperationDescriptor,
    schema::Implementation,
    transport::{GenericDuplex, StreamTransport},
};

/// How long a worker gets to exit on its own after its stdin is closed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    /// Spawned; handshake in flight.
    Starting,
    Ready,
    ShuttingDown,
    Terminated,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::NotStarted => "not started",
            WorkerState::Starting => "starting",
            WorkerState::Ready => "ready",
            WorkerState::ShuttingDown => "shutting down",
            WorkerState::Terminated => "terminated",
        }
    }
}

/// A plugin hosted in a child process speaking line-delimited JSON-RPC over
/// its stdin and stdout. The child's stderr is inherited.
///
/// The worker is never restarted: once it exits, calls fail with a transport
/// error until the plugin is shut down.
pub struct SubprocessPlugin {
    name: String,
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    call_timeout: Duration,
    state: WorkerState,
    child: Option<Child>,
    client: Option<RpcClient>,
    server_info: Option<Implementation>,
    operations: Vec<OperationDescriptor>,
}

impl SubprocessPlugin {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            state: WorkerState::NotStarted,
            child: None,
            client: None,
            server_info: None,
            operations: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// OS process id of the running worker.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    fn expect_state(&self, expected: WorkerState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    /// Spawn the worker, perform the handshake and fetch its operations.
    pub async fn start(&mut self) -> Result<Vec<OperationDescriptor>> {
        self.expect_state(WorkerState::NotStarted)?;
        self.state = WorkerState::Starting;
        info!("Starting worker {} ({})", self.name, self.program.display());

        match self.spawn_and_handshake().await {
            Ok(operations) => {
                self.operations = operations.clone();
                self.state = WorkerState::Ready;
                info!(
                    "Worker {} ready with {} operations",
                    self.name,
                    operations.len()
                );
                Ok(operations)
            }
            Err(e) => {
                warn!("Worker {} failed to start: {}", self.name, e);
                self.client = None;
                if let Some(mut child) = self.child.take() {
                    let _ = child.kill().await;
                }
                self.state = WorkerState::Terminated;
                Err(e)
            }
        }
    }

    async fn spawn_and_handshake(&mut self) -> Result<Vec<OperationDescriptor>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Transport(format!(
                    "failed to spawn {}: {e}",
                    self.program.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("worker stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("worker stdout unavailable".into()))?;
        self.child = Some(child);

        let transport = StreamTransport::new(GenericDuplex::new(stdout, stdin));
        let client = RpcClient::connect(Box::new(transport))
            .await?
            .with_timeout(self.call_timeout);

        let info = client
            .initialize(Implementation::new(
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
            ))
            .await?;
        debug!("Worker {} is {} {}", self.name, info.server_info.name, info.server_info.version);
        self.server_info = Some(info.server_info);

        let tools = client.list_tools().await?;
        self.client = Some(client);
        Ok(tools.tools.iter().map(OperationDescriptor::from_tool).collect())
    }

    /// Call an operation on the worker.
    pub async fn call(&mut self, name: &str, arguments: Arguments) -> Result<Value> {
        self.expect_state(WorkerState::Ready)?;
        let client = self.client.as_ref().ok_or(Error::ConnectionClosed)?;
        let result = client.call_tool(name, arguments).await;
        if client.is_closed() {
            warn!("Worker {} has exited", self.name);
            self.state = WorkerState::Terminated;
        }
        result
    }

    /// Close the worker's stdin and wait for it to exit, killing it after a
    /// grace period.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.state {
            WorkerState::Terminated => return Ok(()),
            WorkerState::NotStarted => {
                self.state = WorkerState::Terminated;
                return Ok(());
            }
            _ => {}
        }
        self.state = WorkerState::ShuttingDown;
        info!("Shutting down worker {}", self.name);

        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                debug!("Closing worker stdin: {}", e);
            }
        }

        let result = match self.child.take() {
            Some(mut child) => match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!("Worker {} exited with {}", self.name, status);
                    Ok(())
                }
                Ok(Err(e)) => Err(Error::Io(e)),
                Err(_) => {
                    warn!("Worker {} did not exit, killing it", self.name);
                    child.kill().await.map_err(Error::Io)
                }
            },
            None => Ok(()),
        };
        self.state = WorkerState::Terminated;
        result
    }
}

#[async_trait]
impl Plugin for SubprocessPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<Vec<OperationDescriptor>> {
        SubprocessPlugin::start(self).await
    }

    fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    async fn call(&mut self, name: &str, arguments: Arguments) -> Result<Value> {
        SubprocessPlugin::call(self, name, arguments).await
    }

    async fn shutdown(&mut self) -> Result<()> {
        SubprocessPlugin::shutdown(self).await
    }
}
