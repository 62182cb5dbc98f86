use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::{
    arguments::Arguments,
    error::{Error, ErrorKind, Result},
    plugin::Plugin,
    registry::{OperationDescriptor, Registry},
    schema::{CallRequest, ErrorBody, Tool},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Serves a [`Registry`] over HTTP.
///
/// Routes:
/// - `POST /` with `{"name", "arguments"}` runs one operation and answers
///   with its JSON result, or an [`ErrorBody`] and a matching status
/// - `GET /operations` lists the advertised operations
/// - `GET /health`
pub struct HttpServer {
    bind_addr: String,
    registry: Arc<Registry>,
}

pub struct HttpServerHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl HttpServer {
    pub fn new(bind_addr: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            registry,
        }
    }

    pub fn router(registry: Arc<Registry>) -> Router {
        Router::new()
            .route("/", post(handle_call))
            .route("/operations", get(handle_operations))
            .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
            .layer(CorsLayer::permissive())
            .with_state(registry)
    }

    /// Bind and start serving in the background.
    pub async fn start(self) -> Result<HttpServerHandle> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| {
                Error::Transport(format!("Failed to bind to {}: {}", self.bind_addr, e))
            })?;

        // Read back the actual address in case port 0 was used
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Transport(format!("Failed to get local address: {e}")))?;

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let router = Self::router(self.registry);

        let handle = tokio::spawn(async move {
            info!("HTTP plugin server listening on {}", addr);
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    token.cancelled().await;
                })
                .await
                .map_err(|e| Error::Transport(format!("Server error: {e}")))
        });

        Ok(HttpServerHandle {
            addr,
            shutdown,
            handle,
        })
    }
}

impl HttpServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.handle
            .await
            .map_err(|e| Error::Transport(format!("server task failed: {e}")))?
    }
}

async fn handle_call(
    State(registry): State<Arc<Registry>>,
    body: std::result::Result<Json<CallRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_response(&Error::Validation(format!(
                "Invalid call body: {}",
                rejection.body_text()
            )));
        }
    };
    debug!("HTTP call {} {:?}", request.name, request.arguments);

    match registry
        .dispatch(&request.name, Arguments::from(request.arguments))
        .await
    {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => {
            info!("Operation {} failed: {}", request.name, e);
            error_response(&e)
        }
    }
}

async fn handle_operations(State(registry): State<Arc<Registry>>) -> Json<Vec<Tool>> {
    Json(
        registry
            .describe_all()
            .iter()
            .map(OperationDescriptor::to_tool)
            .collect(),
    )
}

fn error_response(error: &Error) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody {
        error: error.to_string(),
        status_code: status.as_u16(),
        kind: Some(error.kind()),
    };
    (status, Json(body)).into_response()
}

/// Client side of the HTTP plugin protocol. Each call is an independent
/// POST; nothing is retried.
pub struct HttpPlugin {
    name: String,
    endpoint: String,
    client: HttpClient,
    timeout: Duration,
    operations: Vec<OperationDescriptor>,
}

impl HttpPlugin {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            name: endpoint.clone(),
            endpoint,
            client,
            timeout,
            operations: Vec::new(),
        })
    }

    /// Fetch the server's operation list.
    pub async fn connect(&mut self) -> Result<Vec<OperationDescriptor>> {
        info!("Connecting to HTTP plugin at {}", self.endpoint);
        let response = self
            .client
            .get(format!("{}/operations", self.endpoint))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "{} returned {} for operation discovery",
                self.endpoint,
                response.status()
            )));
        }
        let tools: Vec<Tool> = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Invalid operation list: {e}")))?;
        self.operations = tools.iter().map(OperationDescriptor::from_tool).collect();
        Ok(self.operations.clone())
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(self.timeout, &self.endpoint)
        } else {
            Error::Transport(format!("Request to {} failed: {e}", self.endpoint))
        }
    }

    pub async fn call(&self, name: &str, arguments: Arguments) -> Result<Value> {
        let request = CallRequest {
            name: name.to_string(),
            arguments: arguments.into_map(),
        };
        let response = self
            .client
            .post(format!("{}/", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| Error::InvalidMessageFormat {
                message: format!("Invalid JSON from {}: {e}", self.endpoint),
            });
        }

        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(Error::remote(
                body.kind.unwrap_or(ErrorKind::Provider),
                body.error,
                Some(body.status_code),
            )),
            Err(_) => {
                warn!("Unstructured error from {}: {}", self.endpoint, status);
                Err(Error::remote(
                    ErrorKind::Transport,
                    format!("HTTP {status}: {text}"),
                    Some(status.as_u16()),
                ))
            }
        }
    }
}

#[async_trait]
impl Plugin for HttpPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<Vec<OperationDescriptor>> {
        self.connect().await
    }

    fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    async fn call(&mut self, name: &str, arguments: Arguments) -> Result<Value> {
        HttpPlugin::call(self, name, arguments).await
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_is_normalized() {
        let plugin = HttpPlugin::new("http://127.0.0.1:8000/").unwrap();
        assert_eq!(plugin.endpoint, "http://127.0.0.1:8000");
        assert_eq!(plugin.name(), "http://127.0.0.1:8000");
    }

    #[test]
    fn test_error_response_uses_provider_status() {
        let response = error_response(&Error::LocationNotFound("Atlantis".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = error_response(&Error::UnknownOperation("nope".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
