mod agent;
mod bootstrap;
mod config;
mod defaults;
mod logging;
mod scheduler;
mod service_cmd;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::AgentConfig;

#[derive(Parser, Debug)]
#[command(name = "edgemon", version, about = "Bus-driven edge agent for managed hosts")]
struct Cli {
    /// Configuration file (platform default when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent in the foreground
    Run,
    /// Host service-manager integration
    Service {
        #[command(subcommand)]
        cmd: ServiceCmd,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ServiceCmd {
    Install,
    Uninstall,
    Start,
    Stop,
    /// Run as the installed service process
    Run,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    // Several dependencies build rustls configs; pin the process-wide
    // crypto provider before any of them race to pick one.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(defaults::config_path);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_agent(&config_path).await,
        Commands::Service { cmd } => match cmd {
            ServiceCmd::Run => run_agent(&config_path).await,
            other => service_cmd::handle(other, &config_path),
        },
    }
}

async fn run_agent(config_path: &Path) -> Result<()> {
    let cfg = match AgentConfig::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            // logging is not up yet; make sure the reason reaches stderr
            eprintln!("edgemon: {e}");
            return Err(e.into());
        }
    };
    let _guard = logging::init(&cfg.logging)?;
    agent::run(cfg, env!("CARGO_PKG_VERSION")).await
}
