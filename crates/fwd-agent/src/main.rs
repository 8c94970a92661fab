//! fwdagent entry point.

use anyhow::Context;
use clap::Parser;
use fwd_agent::audit::{init_logging, LogFormat};
use fwd_agent::config::load_startup_data;
use fwd_agent::{AgentConfig, AgentDaemon};
use fwd_rpc::sim::SimulatedEngine;
use fwd_rpc::Connector;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Data-tree translation agent for the forwarding engine
#[derive(Parser, Debug)]
#[command(name = "fwdagent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Per-call RPC timeout in milliseconds
    #[arg(long)]
    rpc_timeout_ms: Option<u64>,

    /// Directory of the persisted naming contexts
    #[arg(long)]
    context_dir: Option<PathBuf>,

    /// Data committed as the first transaction (YAML)
    #[arg(long)]
    startup_config: Option<PathBuf>,

    /// Run against the in-memory simulated engine
    #[arg(long)]
    simulate: bool,
}

impl Args {
    /// Loads the configuration file, if any, and applies the overrides.
    fn agent_config(&self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::load(path)
                .with_context(|| format!("loading configuration {}", path.display()))?,
            None => AgentConfig::default(),
        };
        if let Some(timeout) = self.rpc_timeout_ms {
            config.rpc_timeout_ms = timeout;
        }
        if let Some(dir) = &self.context_dir {
            config.context_dir = Some(dir.clone());
        }
        if let Some(path) = &self.startup_config {
            config.startup_config = Some(path.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

async fn run(config: AgentConfig, connector: Arc<dyn Connector>) -> anyhow::Result<()> {
    let startup = match &config.startup_config {
        Some(path) => Some(
            load_startup_data(path).with_context(|| format!("loading startup data {}", path.display()))?,
        ),
        None => None,
    };

    let daemon = AgentDaemon::start(config, connector)
        .await
        .context("agent startup failed")?;

    if let Some(image) = startup {
        if let Err(e) = daemon.apply_startup(image).await {
            daemon.shutdown()?;
            return Err(e).context("startup data was not applied");
        }
    }

    info!("fwdagent running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for the shutdown signal")?;
    info!("shutdown signal received");

    daemon.shutdown()?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.log_format, &args.log_level);

    info!("====================================================================");
    info!("Starting fwdagent {}", env!("CARGO_PKG_VERSION"));
    info!("====================================================================");

    let config = match args.agent_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("RPC timeout: {}ms", config.rpc_timeout_ms);
    match &config.context_dir {
        Some(dir) => info!("Naming contexts: {}", dir.display()),
        None => warn!("No context directory, naming contexts are not persisted"),
    }

    if !args.simulate {
        error!("no native engine transport is built in; run with --simulate");
        return ExitCode::FAILURE;
    }
    info!("Simulation mode: ENABLED");
    let engine = Arc::new(SimulatedEngine::new());
    let connector: Arc<dyn Connector> = Arc::new(engine.connector());

    match run(config, connector).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
