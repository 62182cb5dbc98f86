//! # weather-mcp
//!
//! A language-model weather agent whose tools live behind a small plugin
//! protocol.
//!
//! ## Overview
//!
//! Operations are described and dispatched by a [`Registry`]. A registry can
//! be used in-process ([`LocalPlugin`]), served from a worker process over
//! newline-delimited JSON-RPC on stdio ([`SubprocessPlugin`] talking to a
//! [`Worker`]), or served over HTTP ([`HttpPlugin`] talking to an
//! [`HttpServer`]). An [`Agent`] discovers the operations of its plugins,
//! presents them to a language model and runs whatever the model asks for
//! until it produces a final answer.
//!
//! The bundled operations fetch forecasts, historical data and agricultural
//! conditions from Open-Meteo; see [`weather`].
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weather_mcp::{
//!     config::Config, llm::AnthropicProvider, weather, Agent, LocalPlugin, OperationGroup,
//!     Result,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_env()?;
//!     let client = Arc::new(weather::WeatherClient::new(config.weather.clone())?);
//!     let registry = weather::tools::registry(client, OperationGroup::All)?;
//!
//!     let provider = Arc::new(AnthropicProvider::new(config.anthropic.clone())?);
//!     let plugin = LocalPlugin::new("weather", Arc::new(registry));
//!     let mut agent = Agent::new(provider, vec![Box::new(plugin)], config.agent.clone());
//!     agent.initialize().await?;
//!
//!     let reply = agent.query("What's the weather forecast for Ames, Iowa?").await?;
//!     println!("{}", reply.text);
//!     agent.cleanup().await
//! }
//! ```

mod agent;
mod arguments;
mod classifier;
mod client;
mod codec;
mod error;
mod http;
mod invocation;
mod plugin;
mod registry;
mod subprocess;
mod transport;
mod worker;

pub mod config;
pub mod llm;
pub mod schema;
pub mod testutils;
pub mod weather;

pub use agent::{Agent, Reply, SYSTEM_PROMPT};
pub use arguments::Arguments;
pub use classifier::{
    parse_classification, resolve_date_range, DateRange, QueryClassifier, QueryIntent, QueryType,
};
pub use client::{RpcClient, DEFAULT_CALL_TIMEOUT};
pub use error::{Error, ErrorKind, Result};
pub use http::{HttpPlugin, HttpServer, HttpServerHandle};
pub use invocation::{Invocation, InvocationResult, Outcome};
pub use plugin::{LocalPlugin, Plugin};
pub use registry::{Handler, OperationDescriptor, ParamType, Parameter, Registry};
pub use subprocess::{SubprocessPlugin, WorkerState};
pub use transport::{GenericDuplex, StdioTransport, StreamTransport, Transport, TransportStream};
pub use weather::OperationGroup;
pub use worker::{Worker, WorkerHandle};
