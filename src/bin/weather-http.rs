//! HTTP plugin server for the weather operations.
//!
//! Usage:
//!   weather-http [--bind 127.0.0.1:8000] [--operations all]

use std::sync::Arc;

use clap::Parser;
use tracing::{info, level_filters::LevelFilter};
use weather_mcp::{config::Config, weather, HttpServer, OperationGroup, Result};

#[derive(Parser, Debug)]
#[command(author, version, about = "Weather operations over HTTP", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    bind: String,

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
        .init();

    let config = Config::from_env()?;
    let client = Arc::new(weather::WeatherClient::new(config.weather)?);
    let registry = weather::tools::registry(client, args.operations)?;

    let handle = HttpServer::new(args.bind, Arc::new(registry)).start().await?;
    info!("Serving {} operations at {}", args.operations, handle.url());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down HTTP server");
    handle.stop().await
}
