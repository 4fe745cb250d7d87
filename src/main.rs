use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use cluster_installer::api::{self, Workflow};
use cluster_installer::config::InstallerConfig;
use cluster_installer::controller::{ControllerOptions, InstallController, UpgradeController};
use cluster_installer::shutdown::ShutdownCoordinator;
use cluster_installer::steps::{CommandSteps, Steps};
use cluster_installer::telemetry::{init_telemetry, shutdown_telemetry};
use cluster_installer::workflows::{
    describe_table, install_table, upgrade_table, InstallState, Mode, Target, UpgradeState,
};

#[derive(Parser)]
#[command(name = "cluster-installer")]
#[command(about = "Install or upgrade an application and the cluster it runs on")]
#[command(long_about = "Runs the installer API. Every install or upgrade step is started \
                       through the API and runs one at a time; clients poll each step's \
                       status until it finishes.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the installer API until interrupted
    Serve {
        /// Configuration file (defaults to ./cluster-installer.toml when present)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
        /// Address to listen on, overriding the configuration
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print a workflow's transition table, one `target <- predecessors` line per state
    Graph {
        /// Workflow to describe: install or upgrade
        #[arg(long, default_value = "install")]
        mode: Mode,
        /// Deployment target: linux or kubernetes
        #[arg(long, default_value = "linux")]
        target: Target,
        /// Include airgap bundle processing
        #[arg(long)]
        airgap: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind } => {
            tokio::runtime::Runtime::new()?.block_on(async {
                serve_command(config.as_deref(), bind).await
            })
        }
        Commands::Graph {
            mode,
            target,
            airgap,
        } => {
            println!("{}", graph_command(mode, target, airgap));
            Ok(())
        }
    }
}

fn graph_command(mode: Mode, target: Target, airgap: bool) -> String {
    match mode {
        Mode::Install => describe_table(&install_table(target, airgap), InstallState::ALL),
        Mode::Upgrade => describe_table(&upgrade_table(target, airgap), UpgradeState::ALL),
    }
}

async fn serve_command(config_path: Option<&Path>, bind: Option<String>) -> Result<()> {
    if let Err(e) = InstallerConfig::load_env_file() {
        eprintln!("Warning: failed to load .env file: {e}");
    }
    let mut config = InstallerConfig::load(config_path)?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    let addr = config.bind_addr()?;
    init_telemetry(&config.observability)?;

    let coordinator = ShutdownCoordinator::new();
    let steps = Steps::uniform(Arc::new(CommandSteps::new(config.steps.clone())));
    let options = ControllerOptions::from(&config.workflow);
    let workflow = match config.workflow.mode {
        Mode::Install => Workflow::Install(Arc::new(InstallController::new(
            options,
            config.app_config.clone(),
            steps,
            coordinator.child_token(),
        ))),
        Mode::Upgrade => Workflow::Upgrade(Arc::new(UpgradeController::new(
            options,
            config.app_config.clone(),
            steps,
            coordinator.child_token(),
        ))),
    };

    info!(
        mode = %config.workflow.mode,
        target = %config.workflow.target,
        airgap = config.workflow.airgap,
        address = %addr,
        "Starting cluster installer"
    );

    let app = api::router(workflow.clone());
    let mut server = tokio::spawn(api::serve(addr, app, coordinator.token()));

    tokio::select! {
        joined = &mut server => {
            // the server only returns on its own when it failed
            workflow.shutdown();
            joined.context("API server task failed")??;
            shutdown_telemetry();
            return Ok(());
        }
        result = coordinator.wait_for_shutdown() => result?,
    }

    coordinator.shutdown_all_services(&workflow, server).await?;
    shutdown_telemetry();
    Ok(())
}
