//! Command-line weather agent.
//!
//! Usage:
//!   weather-agent "What's the weather forecast for Ames, Iowa?"
//!   weather-agent --demo
//!   weather-agent --transport subprocess
//!   weather-agent --transport http --server http://127.0.0.1:8000
//!
//! With neither a query nor `--demo`, questions are read interactively from
//! stdin. Requires `ANTHROPIC_API_KEY` in the environment or a `.env` file.

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, level_filters::LevelFilter};
use weather_mcp::{
    config::Config, llm::AnthropicProvider, weather, Agent, Error, HttpPlugin, LocalPlugin,
    OperationGroup, Plugin, QueryClassifier, Reply, Result, SubprocessPlugin,
};

const DEMO_QUERIES: &[&str] = &[
    "What's the weather forecast for Ames, Iowa?",
    "How much rain did we get in Austin last week?",
    "What was the average temperature in Iowa City in May?",
    "Tell me about soil moisture in Des Moines for the past 10 days.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    /// Operations run inside this process
    Local,
    /// One worker process per operation family
    Subprocess,
    /// Already-running HTTP plugin servers
    Http,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Ask a language model about the weather", long_about = None)]
struct Args {
    /// Question to ask
    query: Option<String>,

    /// Run the canned demo queries
    #[arg(long)]
    demo: bool,

    /// Where the weather operations run
    #[arg(short, long, value_enum, default_value = "subprocess")]
    transport: TransportKind,

    /// HTTP plugin server URL; repeat for several servers
    #[arg(short, long = "server")]
    servers: Vec<String>,

    /// Path to the weather-worker binary
    #[arg(short, long)]
    worker: Option<PathBuf>,

    /// Classify each query before answering it
    #[arg(short, long)]
    classify: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn default_worker_path() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| Error::Config("cannot locate the weather-worker binary".into()))?;
    Ok(dir.join(format!("weather-worker{}", std::env::consts::EXE_SUFFIX)))
}

fn build_plugins(args: &Args, config: &Config) -> Result<Vec<Box<dyn Plugin>>> {
    let mut plugins: Vec<Box<dyn Plugin>> = Vec::new();
    match args.transport {
        TransportKind::Local => {
            let client = Arc::new(weather::WeatherClient::new(config.weather.clone())?);
            let registry = weather::tools::registry(client, OperationGroup::All)?;
            plugins.push(Box::new(LocalPlugin::new("weather", Arc::new(registry))));
        }
        TransportKind::Subprocess => {
            let program = match &args.worker {
                Some(path) => path.clone(),
                None => default_worker_path()?,
            };
            for group in [
                OperationGroup::Forecast,
                OperationGroup::Historical,
                OperationGroup::Agricultural,
            ] {
                let plugin = SubprocessPlugin::new(group.as_str(), &program)
                    .arg("--operations")
                    .arg(group.as_str())
                    .with_call_timeout(config.agent.call_timeout);
                plugins.push(Box::new(plugin));
            }
        }
        TransportKind::Http => {
            let servers = if args.servers.is_empty() {
                vec!["http://127.0.0.1:8000".to_string()]
            } else {
                args.servers.clone()
            };
            for server in servers {
                plugins.push(Box::new(HttpPlugin::with_timeout(
                    server,
                    config.agent.call_timeout,
                )?));
            }
        }
    }
    Ok(plugins)
}

fn print_reply(reply: &Reply) {
    println!("\n{}", reply.text);
    if !reply.operations_used.is_empty() {
        let mut used = reply.operations_used.clone();
        used.dedup();
        println!("\nOperations used: {}", used.join(", "));
    }
}

async fn ask(agent: &mut Agent, query: &str) {
    println!("\n> {query}");
    match agent.query(query).await {
        Ok(reply) => print_reply(&reply),
        Err(e) => eprintln!("Error ({}): {}", e.kind(), e),
    }
}

async fn interactive(agent: &mut Agent) -> Result<()> {
    println!("Ask about the weather. Type 'clear' to start over, 'quit' to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "clear" => {
                agent.reset();
                println!("Conversation cleared.");
            }
            query => ask(agent, query).await,
        }
    }
    Ok(())
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
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    let provider = Arc::new(AnthropicProvider::new(config.anthropic.clone())?);
    let plugins = build_plugins(&args, &config)?;

    let mut agent = Agent::new(provider.clone(), plugins, config.agent.clone());
    if args.classify {
        agent = agent.with_classifier(QueryClassifier::new(provider));
    }
    agent.initialize().await?;
    info!(
        "Agent ready with {} operations via {:?} transport",
        agent.operations().len(),
        args.transport
    );

    let result = if args.demo {
        for query in DEMO_QUERIES {
            ask(&mut agent, query).await;
            agent.reset();
        }
        Ok(())
    } else if let Some(query) = &args.query {
        ask(&mut agent, query).await;
        Ok(())
    } else {
        interactive(&mut agent).await
    };

    agent.cleanup().await?;
    result
}
