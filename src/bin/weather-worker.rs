//! Stdio plugin process serving the weather operations.
//!
//! Usage:
//!   weather-worker [--operations forecast|historical|agricultural|all]
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout; logs go to stderr.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, level_filters::LevelFilter};
use weather_mcp::{
    config::Config, weather, OperationGroup, Result, StdioTransport, Worker,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Weather operations over stdio JSON-RPC", long_about = None)]
struct Args {
    /// Which operations to serve
    #[arg(short, long, default_value = "all")]
    operations: OperationGroup,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        })
        .with_writer(std::io::stderr) // stdout carries the protocol
        .init();

    let config = Config::from_env()?;
    let client = Arc::new(weather::WeatherClient::new(config.weather)?);
    let registry = weather::tools::registry(client, args.operations)?;

    info!("Starting weather worker ({})", args.operations);
    Worker::new(
        format!("weather-{}", args.operations),
        env!("CARGO_PKG_VERSION"),
        Arc::new(registry),
    )
    .run(Box::new(StdioTransport::new()))
    .await
}
